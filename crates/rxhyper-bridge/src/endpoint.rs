//! Replication endpoints
//!
//! A remote side of a replication link is one of three explicit shapes,
//! chosen by the caller. Peer facades implement [`ReplicationPeer`] so the
//! bridge can ask them for their own responder stream.

use rxhyper_core::{ByteDuplex, LogKey, Pipeline, RxError, RxResult};
use std::fmt;
use std::sync::Arc;

use crate::push_stream::PushStream;

/// What a peer facade replicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerKind {
    /// A single replicated log
    Log,
    /// A multi-log store
    Store,
}

impl fmt::Display for PeerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerKind::Log => write!(f, "log"),
            PeerKind::Store => write!(f, "store"),
        }
    }
}

/// A facade that can open replication transports on its underlying log or
/// store
pub trait ReplicationPeer: Send + Sync {
    /// Kind of the underlying replicated object
    fn peer_kind(&self) -> PeerKind;

    /// Identity of the underlying replicated object; equal ids mean the
    /// same instance
    fn peer_id(&self) -> usize;

    /// Key of the replicated log, for peers that have one
    fn key(&self) -> Option<LogKey> {
        None
    }

    /// Pipeline that drives forwarding for this peer's streams
    fn pipeline(&self) -> Arc<dyn Pipeline>;

    /// Open a fresh replication transport
    fn open_transport(&self, is_initiator: bool) -> RxResult<Arc<dyn ByteDuplex>>;

    /// Open a responder transport wrapped as a push-stream
    fn open_push_stream(&self) -> RxResult<PushStream> {
        let transport = self.open_transport(false)?;
        Ok(PushStream::new(transport, self.pipeline()))
    }
}

/// The remote side handed to a bridge call
#[derive(Clone)]
pub enum Endpoint {
    /// A raw byte duplex, typically another log's responder transport
    RawDuplex(Arc<dyn ByteDuplex>),
    /// A push-stream, typically a detached bridge result
    PushStream(PushStream),
    /// Another facade; it opens its own responder stream
    Peer(Arc<dyn ReplicationPeer>),
}

impl Endpoint {
    /// Wrap a facade as an endpoint
    pub fn peer<P: ReplicationPeer + 'static>(peer: P) -> Self {
        Endpoint::Peer(Arc::new(peer))
    }

    /// Log key carried by a peer endpoint
    pub fn key(&self) -> Option<LogKey> {
        match self {
            Endpoint::Peer(peer) => peer.key(),
            _ => None,
        }
    }

    /// Reduce to a push-stream on behalf of `local`.
    ///
    /// Peers must match `local`'s kind and must not be `local` itself.
    pub fn into_push_stream(self, local: &dyn ReplicationPeer) -> RxResult<PushStream> {
        match self {
            Endpoint::RawDuplex(transport) => Ok(PushStream::new(transport, local.pipeline())),
            Endpoint::PushStream(stream) => Ok(stream),
            Endpoint::Peer(peer) => {
                if peer.peer_kind() != local.peer_kind() {
                    return Err(RxError::usage(format!(
                        "Cannot replicate a {} with a {}",
                        local.peer_kind(),
                        peer.peer_kind()
                    )));
                }
                if peer.peer_id() == local.peer_id() {
                    return Err(RxError::usage(format!(
                        "Cannot replicate a {} with itself",
                        local.peer_kind()
                    )));
                }
                peer.open_push_stream()
            }
        }
    }
}

impl From<Arc<dyn ByteDuplex>> for Endpoint {
    fn from(transport: Arc<dyn ByteDuplex>) -> Self {
        Endpoint::RawDuplex(transport)
    }
}

impl From<PushStream> for Endpoint {
    fn from(stream: PushStream) -> Self {
        Endpoint::PushStream(stream)
    }
}

impl From<Arc<dyn ReplicationPeer>> for Endpoint {
    fn from(peer: Arc<dyn ReplicationPeer>) -> Self {
        Endpoint::Peer(peer)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::RawDuplex(transport) => f
                .debug_struct("RawDuplex")
                .field("initiator", &transport.is_initiator())
                .finish(),
            Endpoint::PushStream(stream) => f.debug_tuple("PushStream").field(stream).finish(),
            Endpoint::Peer(peer) => f
                .debug_struct("Peer")
                .field("kind", &peer.peer_kind())
                .field("id", &peer.peer_id())
                .finish(),
        }
    }
}
