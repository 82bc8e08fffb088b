//! Multi-log store boundary

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

use super::codec::ValueCodec;
use super::duplex::ByteDuplex;
use super::log::{LogKey, LogOptions, PeerDiscoveryDone, ReplicatedLog};
use super::storage::StorageBackend;
use crate::errors::RxResult;

/// Options for opening a store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Namespace applied to every name-derived log key
    pub namespace: Option<String>,
    /// Capacity of the store's event channel and of its logs' channels;
    /// falls back to the library's default
    pub event_buffer: Option<usize>,
}

impl StoreOptions {
    /// Set the event channel capacity
    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = Some(capacity);
        self
    }
}

/// Events emitted by a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    /// A log was opened through the store
    CoreOpen(LogKey),
    /// A log opened through the store closed
    CoreClose(LogKey),
}

/// Keyed collection of related logs
#[async_trait]
pub trait MultiLogStore: Send + Sync {
    /// Open a log by name or key
    fn get(&self, options: LogOptions) -> RxResult<Arc<dyn ReplicatedLog>>;

    /// Identity of the underlying store, shared by its sessions and
    /// namespaces
    fn instance_id(&self) -> usize;

    /// Derived store whose name-derived keys live under `name`
    fn namespace(&self, name: &str) -> RxResult<Arc<dyn MultiLogStore>>;

    /// Derived store sharing this store's logs
    fn session(&self) -> RxResult<Arc<dyn MultiLogStore>>;

    /// Open a replication transport covering every log in the store
    fn replicate(&self, is_initiator: bool) -> RxResult<Arc<dyn ByteDuplex>>;

    /// Mark peer discovery as in progress until the handle is called
    fn finding_peers(&self) -> PeerDiscoveryDone;

    /// Subscribe to store events
    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;

    /// Whether the store has been closed
    fn is_closed(&self) -> bool;

    /// Close the store and every log opened through it
    async fn close(&self) -> RxResult<()>;
}

/// Constructor capability of a store library
pub trait StoreFactory: Send + Sync {
    /// Construct a store
    fn open(
        &self,
        storage: Arc<dyn StorageBackend>,
        codec: Arc<dyn ValueCodec>,
        options: StoreOptions,
    ) -> RxResult<Arc<dyn MultiLogStore>>;
}
