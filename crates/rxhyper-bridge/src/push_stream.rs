//! Push-stream adapter over a byte duplex
//!
//! Inbound transport events become a lazy data sequence; `next`, `complete`
//! and `error` drive the transport's write, end and destroy. Writes are
//! unconditional. A producer that outpaces the transport relies on the
//! transport's own buffering.

use bytes::Bytes;
use futures::future::{AbortHandle, Abortable};
use futures::stream::{self, BoxStream, StreamExt};
use futures::FutureExt;
use rxhyper_core::{ByteDuplex, DuplexEvent, Pipeline, RxError, RxResult};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::observer::{Notification, Observer};

/// Handle on one forwarding task.
///
/// `unsubscribe` stops forwarding only. It never closes the transport;
/// transports close through `complete`, `error`, or their own events.
#[derive(Debug, Clone)]
pub struct Subscription {
    handle: AbortHandle,
    finished: Arc<AtomicBool>,
}

impl Subscription {
    /// Stop forwarding
    pub fn unsubscribe(&self) {
        self.handle.abort();
    }

    /// Whether forwarding has stopped, by unsubscribe or because the source
    /// ended
    pub fn is_closed(&self) -> bool {
        self.handle.is_aborted() || self.finished.load(Ordering::SeqCst)
    }
}

enum Feed {
    Pending(Arc<dyn ByteDuplex>),
    Flowing(BoxStream<'static, DuplexEvent>),
    Done,
}

/// Uniform push-stream over a [`ByteDuplex`]
#[derive(Clone)]
pub struct PushStream {
    transport: Arc<dyn ByteDuplex>,
    pipeline: Arc<dyn Pipeline>,
}

impl PushStream {
    /// Wrap `transport`; forwarding tasks run on `pipeline`
    pub fn new(transport: Arc<dyn ByteDuplex>, pipeline: Arc<dyn Pipeline>) -> Self {
        Self {
            transport,
            pipeline,
        }
    }

    /// The concrete transport
    pub fn transport(&self) -> &Arc<dyn ByteDuplex> {
        &self.transport
    }

    /// Whether the transport was opened as initiator
    pub fn is_initiator(&self) -> bool {
        self.transport.is_initiator()
    }

    /// Inbound chunks as notifications.
    ///
    /// Nothing listens on the transport until the sequence is first polled.
    /// `End` completes the sequence, `Error` fails it, and `Close` ends it
    /// silently.
    pub fn data_stream(&self) -> BoxStream<'static, Notification> {
        stream::unfold(Feed::Pending(self.transport.clone()), |feed| async move {
            let mut events = match feed {
                Feed::Pending(transport) => transport.events(),
                Feed::Flowing(events) => events,
                Feed::Done => return None,
            };
            match events.next().await? {
                DuplexEvent::Data(chunk) => Some((Notification::Next(chunk), Feed::Flowing(events))),
                DuplexEvent::End => Some((Notification::Complete, Feed::Done)),
                DuplexEvent::Error(error) => Some((Notification::Error(error), Feed::Done)),
                DuplexEvent::Close => None,
            }
        })
        .boxed()
    }

    /// Forward every notification to `observer`, in order.
    ///
    /// Fails when the pipeline cannot run the forwarding task.
    pub fn subscribe(&self, observer: Arc<dyn Observer>) -> RxResult<Subscription> {
        self.spawn_forwarding(observer, true)
    }

    /// Forward data chunks only; completion and errors stop forwarding
    /// without reaching `observer`
    pub fn subscribe_data(&self, observer: Arc<dyn Observer>) -> RxResult<Subscription> {
        self.spawn_forwarding(observer, false)
    }

    fn spawn_forwarding(
        &self,
        observer: Arc<dyn Observer>,
        lifecycle: bool,
    ) -> RxResult<Subscription> {
        let (handle, registration) = AbortHandle::new_pair();
        let finished = Arc::new(AtomicBool::new(false));
        let mut data = self.data_stream();

        let forwarding = async move {
            while let Some(notification) = data.next().await {
                let terminal = !matches!(notification, Notification::Next(_));
                if lifecycle || !terminal {
                    observer.notify(notification);
                }
                if terminal {
                    break;
                }
            }
        };

        let done = finished.clone();
        self.pipeline.spawn(
            async move {
                if Abortable::new(forwarding, registration).await.is_err() {
                    trace!("Forwarding aborted by unsubscribe");
                }
                done.store(true, Ordering::SeqCst);
            }
            .boxed(),
        )?;

        Ok(Subscription { handle, finished })
    }
}

impl Observer for PushStream {
    fn next(&self, chunk: Bytes) {
        if let Err(err) = self.transport.write(chunk) {
            debug!(error = %err, "Dropping chunk written to a closed transport");
        }
    }

    fn complete(&self) {
        self.transport.end();
    }

    fn error(&self, error: RxError) {
        debug!(initiator = self.is_initiator(), error = %error, "Destroying transport");
        self.transport.destroy(error);
    }
}

impl fmt::Debug for PushStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushStream")
            .field("initiator", &self.transport.is_initiator())
            .field("closed", &self.transport.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxhyper_effects::TokioPipeline;
    use rxhyper_testkit::{DuplexCommand, MemoryDuplex};

    fn wrap(duplex: Arc<MemoryDuplex>) -> PushStream {
        PushStream::new(duplex, Arc::new(TokioPipeline::new()))
    }

    #[tokio::test]
    async fn data_stream_maps_transport_events() {
        let (duplex, _commands) = MemoryDuplex::new(false);
        duplex.push(Bytes::from_static(b"a"));
        duplex.push(Bytes::from_static(b"b"));
        duplex.push_end();
        duplex.push(Bytes::from_static(b"ignored"));

        let items: Vec<_> = wrap(duplex).data_stream().collect().await;
        assert_eq!(
            items,
            vec![
                Notification::Next(Bytes::from_static(b"a")),
                Notification::Next(Bytes::from_static(b"b")),
                Notification::Complete,
            ]
        );
    }

    #[tokio::test]
    async fn close_ends_silently_and_error_fails() {
        let (closing, _c) = MemoryDuplex::new(false);
        closing.close();
        assert!(wrap(closing).data_stream().collect::<Vec<_>>().await.is_empty());

        let (failing, _f) = MemoryDuplex::new(false);
        failing.fail(RxError::transport("reset"));
        assert_eq!(
            wrap(failing).data_stream().collect::<Vec<_>>().await,
            vec![Notification::Error(RxError::transport("reset"))]
        );
    }

    #[tokio::test]
    async fn observer_side_drives_transport() {
        let (duplex, mut commands) = MemoryDuplex::new(true);
        let stream = wrap(duplex.clone());

        stream.next(Bytes::from_static(b"x"));
        stream.complete();
        stream.next(Bytes::from_static(b"after end"));

        assert_eq!(
            commands.recv().await,
            Some(DuplexCommand::Write(Bytes::from_static(b"x")))
        );
        assert_eq!(commands.recv().await, Some(DuplexCommand::End));

        stream.error(RxError::transport("bye"));
        assert!(duplex.is_closed());
        assert!(stream.is_initiator());
    }
}
