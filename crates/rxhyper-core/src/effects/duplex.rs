//! Raw byte duplex transports
//!
//! A duplex is the replication transport produced by a log or store. Writes
//! are unconditional: there is no backpressure signal, so a producer that
//! outpaces the consumer relies on the transport's own buffering.

use bytes::Bytes;
use futures::stream::BoxStream;

use crate::errors::{RxError, RxResult};

/// Lifecycle and data events emitted by a duplex
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplexEvent {
    /// A chunk arrived for the local side to consume
    Data(Bytes),
    /// The remote side ended its half
    End,
    /// The transport failed
    Error(RxError),
    /// The transport is fully closed; no more events follow
    Close,
}

/// Bidirectional byte transport
pub trait ByteDuplex: Send + Sync {
    /// Write a chunk toward the transport's protocol peer
    fn write(&self, chunk: Bytes) -> RxResult<()>;

    /// End the writable half
    fn end(&self);

    /// Tear the transport down with an error
    fn destroy(&self, error: RxError);

    /// Subscribe to events.
    ///
    /// Every call creates an independent listener. Data produced before the
    /// first listener attaches is buffered and delivered to it.
    fn events(&self) -> BoxStream<'static, DuplexEvent>;

    /// Whether this transport was opened as the initiator
    fn is_initiator(&self) -> bool;

    /// Whether the transport has closed
    fn is_closed(&self) -> bool;
}
