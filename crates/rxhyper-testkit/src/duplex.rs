//! In-memory byte duplex
//!
//! One end of a replication stream. The owning protocol pushes outbound
//! chunks with [`MemoryDuplex::push`] and drains whatever the local side
//! writes from the command receiver returned by [`MemoryDuplex::new`].
//! Events emitted before the first listener attaches are buffered for it;
//! after that, events with no listener are dropped.

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use rxhyper_core::{ByteDuplex, DuplexEvent, RxError, RxResult};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace};

/// What the local side did to the duplex, as seen by the owning protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplexCommand {
    /// A chunk written with [`ByteDuplex::write`]
    Write(Bytes),
    /// The writable half was ended
    End,
    /// The duplex was destroyed
    Destroy(RxError),
}

#[derive(Default)]
struct DuplexState {
    listeners: Vec<mpsc::UnboundedSender<DuplexEvent>>,
    backlog: VecDeque<DuplexEvent>,
    flowing: bool,
    writable: bool,
    closed: bool,
}

/// Memory-backed [`ByteDuplex`]
pub struct MemoryDuplex {
    is_initiator: bool,
    state: Mutex<DuplexState>,
    commands: mpsc::UnboundedSender<DuplexCommand>,
    closed: watch::Sender<bool>,
}

impl MemoryDuplex {
    /// New duplex plus the receiver the protocol drains local writes from
    pub fn new(is_initiator: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<DuplexCommand>) {
        let (commands, receiver) = mpsc::unbounded_channel();
        let duplex = Arc::new(Self {
            is_initiator,
            state: Mutex::new(DuplexState {
                writable: true,
                ..DuplexState::default()
            }),
            commands,
            closed: watch::Sender::new(false),
        });
        (duplex, receiver)
    }

    /// Emit an outbound chunk toward the local listener
    pub fn push(&self, chunk: Bytes) {
        self.emit(DuplexEvent::Data(chunk));
    }

    /// Signal that no more outbound chunks follow
    pub fn push_end(&self) {
        self.emit(DuplexEvent::End);
    }

    /// Fail the duplex from the protocol side
    pub fn fail(&self, error: RxError) {
        debug!(initiator = self.is_initiator, error = %error, "Memory duplex failed");
        self.emit(DuplexEvent::Error(error));
        self.close();
    }

    /// Close the duplex; idempotent
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.writable = false;
        }
        self.emit(DuplexEvent::Close);
        self.closed.send_replace(true);
    }

    /// Resolves once the duplex has closed
    pub async fn closed(&self) {
        let mut receiver = self.closed.subscribe();
        let _ = receiver.wait_for(|closed| *closed).await;
    }

    fn emit(&self, event: DuplexEvent) {
        let mut state = self.state.lock();
        if state.closed {
            trace!(?event, "Dropping event on closed duplex");
            return;
        }
        let is_close = event == DuplexEvent::Close;
        if state.flowing {
            state
                .listeners
                .retain(|listener| listener.send(event.clone()).is_ok());
        } else {
            state.backlog.push_back(event);
        }
        if is_close {
            state.closed = true;
            state.listeners.clear();
        }
    }
}

impl ByteDuplex for MemoryDuplex {
    fn write(&self, chunk: Bytes) -> RxResult<()> {
        if !self.state.lock().writable {
            return Err(RxError::closed("Replication stream"));
        }
        self.commands
            .send(DuplexCommand::Write(chunk))
            .map_err(|_| RxError::closed("Replication stream"))
    }

    fn end(&self) {
        let mut state = self.state.lock();
        if state.writable {
            state.writable = false;
            let _ = self.commands.send(DuplexCommand::End);
        }
    }

    fn destroy(&self, error: RxError) {
        if self.state.lock().closed {
            return;
        }
        let _ = self.commands.send(DuplexCommand::Destroy(error.clone()));
        self.fail(error);
    }

    fn events(&self) -> BoxStream<'static, DuplexEvent> {
        let mut state = self.state.lock();
        let (sender, receiver) = mpsc::unbounded_channel();
        let first = !state.flowing;
        if first {
            state.flowing = true;
            for event in state.backlog.drain(..) {
                let _ = sender.send(event);
            }
        }
        if state.closed {
            if !first {
                return stream::iter([DuplexEvent::Close]).boxed();
            }
        } else {
            state.listeners.push(sender);
        }
        UnboundedReceiverStream::new(receiver).boxed()
    }

    fn is_initiator(&self) -> bool {
        self.is_initiator
    }

    fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl std::fmt::Debug for MemoryDuplex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryDuplex")
            .field("is_initiator", &self.is_initiator)
            .field("listeners", &state.listeners.len())
            .field("backlog", &state.backlog.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// Connect two duplexes directly, each one's events driving the other's
/// write side, until both close.
pub fn pipe(a: Arc<dyn ByteDuplex>, b: Arc<dyn ByteDuplex>) {
    tokio::spawn(forward(a.clone(), b.clone()));
    tokio::spawn(forward(b, a));
}

async fn forward(from: Arc<dyn ByteDuplex>, to: Arc<dyn ByteDuplex>) {
    let mut events = from.events();
    while let Some(event) = events.next().await {
        match event {
            DuplexEvent::Data(chunk) => {
                if let Err(err) = to.write(chunk) {
                    trace!(error = %err, "Dropping chunk for closed duplex");
                }
            }
            DuplexEvent::End => to.end(),
            DuplexEvent::Error(err) => to.destroy(err),
            DuplexEvent::Close => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn data_before_first_listener_is_buffered() {
        let (duplex, _commands) = MemoryDuplex::new(true);
        duplex.push(Bytes::from_static(b"early"));
        duplex.push_end();
        duplex.close();

        let events: Vec<_> = duplex.events().collect().await;
        assert_eq!(
            events,
            vec![
                DuplexEvent::Data(Bytes::from_static(b"early")),
                DuplexEvent::End,
                DuplexEvent::Close
            ]
        );
        assert_eq!(duplex.events().collect::<Vec<_>>().await, vec![DuplexEvent::Close]);
    }

    #[tokio::test]
    async fn writes_reach_protocol_until_end() {
        let (duplex, mut commands) = MemoryDuplex::new(false);
        duplex.write(Bytes::from_static(b"a")).unwrap();
        duplex.end();

        assert!(duplex.write(Bytes::from_static(b"b")).unwrap_err().is_closed());
        assert_eq!(
            commands.recv().await,
            Some(DuplexCommand::Write(Bytes::from_static(b"a")))
        );
        assert_eq!(commands.recv().await, Some(DuplexCommand::End));
        assert!(!duplex.is_initiator());
    }

    #[tokio::test]
    async fn destroy_reports_error_then_close() {
        let (duplex, mut commands) = MemoryDuplex::new(true);
        let mut events = duplex.events();
        duplex.destroy(RxError::transport("boom"));

        assert_eq!(
            events.next().await,
            Some(DuplexEvent::Error(RxError::transport("boom")))
        );
        assert_eq!(events.next().await, Some(DuplexEvent::Close));
        assert_eq!(events.next().await, None);
        assert_eq!(
            commands.recv().await,
            Some(DuplexCommand::Destroy(RxError::transport("boom")))
        );
        assert!(duplex.is_closed());
        duplex.closed().await;
    }

    #[tokio::test]
    async fn pipe_forwards_chunks_both_ways() {
        let (a, mut a_commands) = MemoryDuplex::new(true);
        let (b, mut b_commands) = MemoryDuplex::new(false);
        pipe(a.clone(), b.clone());

        a.push(Bytes::from_static(b"to-b"));
        b.push(Bytes::from_static(b"to-a"));

        assert_eq!(
            b_commands.recv().await,
            Some(DuplexCommand::Write(Bytes::from_static(b"to-b")))
        );
        assert_eq!(
            a_commands.recv().await,
            Some(DuplexCommand::Write(Bytes::from_static(b"to-a")))
        );
    }
}
