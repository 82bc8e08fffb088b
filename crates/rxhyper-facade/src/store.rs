//! Reactive store facade

use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use rxhyper_bridge::{bridge, BridgeOutcome, Endpoint, PeerKind, ReplicationPeer};
use rxhyper_core::{
    ByteDuplex, LogKey, LogOptions, MultiLogStore, Pipeline, RxError, RxResult, StorageBackend,
    StoreEvent, StoreOptions,
};
use std::fmt;
use std::sync::Arc;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, warn};

use crate::context::StoreContext;
use crate::log::{DoneFactory, RxLog};

/// Reactive handle on a multi-log store
#[derive(Clone)]
pub struct RxStore {
    ctx: Arc<StoreContext>,
    store: Arc<dyn MultiLogStore>,
}

impl RxStore {
    /// Open a store on the context's default storage
    pub fn create(ctx: Arc<StoreContext>, options: StoreOptions) -> RxResult<Self> {
        let storage = ctx.base().make_file()?;
        Self::create_with_storage(ctx, storage, options)
    }

    /// Open a store on `storage`. The event buffer defaults to the runtime
    /// settings.
    pub fn create_with_storage(
        ctx: Arc<StoreContext>,
        storage: Arc<dyn StorageBackend>,
        mut options: StoreOptions,
    ) -> RxResult<Self> {
        options
            .event_buffer
            .get_or_insert(ctx.base().settings().event_buffer);
        let store = ctx.factory().open(storage, ctx.base().codec(), options)?;
        debug!("Store created");
        Ok(Self::from_store(ctx, store))
    }

    /// Open one store per options value, in order
    pub fn create_many<I>(ctx: Arc<StoreContext>, configs: I) -> RxResult<Vec<Self>>
    where
        I: IntoIterator<Item = StoreOptions>,
    {
        configs
            .into_iter()
            .map(|options| Self::create(ctx.clone(), options))
            .collect()
    }

    /// Wrap an existing store
    pub fn from_store(ctx: Arc<StoreContext>, store: Arc<dyn MultiLogStore>) -> Self {
        Self { ctx, store }
    }

    /// The store context
    pub fn context(&self) -> &Arc<StoreContext> {
        &self.ctx
    }

    /// The wrapped store
    pub fn inner(&self) -> &Arc<dyn MultiLogStore> {
        &self.store
    }

    /// Open a log by name or key
    pub fn get(&self, options: LogOptions) -> RxResult<RxLog> {
        let log = self.store.get(options)?;
        Ok(RxLog::from_log(self.ctx.log().clone(), log))
    }

    /// Lazy [`RxStore::get`]
    pub fn get_stream(&self, options: LogOptions) -> BoxStream<'static, RxResult<RxLog>> {
        let this = self.clone();
        stream::once(async move { this.get(options) }).boxed()
    }

    /// Derived store sharing this store's logs
    pub fn session(&self) -> RxResult<RxStore> {
        Ok(Self::from_store(self.ctx.clone(), self.store.session()?))
    }

    /// Derived store whose named logs live under `name`
    pub fn namespace(&self, name: &str) -> RxResult<RxStore> {
        Ok(Self::from_store(self.ctx.clone(), self.store.namespace(name)?))
    }

    /// Keys of logs opened through the store, from subscription on
    pub fn on_core_open(&self) -> BoxStream<'static, LogKey> {
        self.on_event(|event| match event {
            StoreEvent::CoreOpen(key) => Some(key),
            StoreEvent::CoreClose(_) => None,
        })
    }

    /// Keys of logs that closed, from subscription on
    pub fn on_core_close(&self) -> BoxStream<'static, LogKey> {
        self.on_event(|event| match event {
            StoreEvent::CoreClose(key) => Some(key),
            StoreEvent::CoreOpen(_) => None,
        })
    }

    fn on_event<F>(&self, select: F) -> BoxStream<'static, LogKey>
    where
        F: Fn(StoreEvent) -> Option<LogKey> + Send + 'static,
    {
        let store = self.store.clone();
        stream::once(future::lazy(move |_| BroadcastStream::new(store.subscribe())))
            .flatten()
            .filter_map(move |event| {
                future::ready(match event {
                    Ok(event) => select(event),
                    Err(BroadcastStreamRecvError::Lagged(missed)) => {
                        warn!(missed, "Store event listener lagged");
                        None
                    }
                })
            })
            .boxed()
    }

    /// Replicate every log with `remote`, or open a detached responder
    /// stream when there is none
    pub fn replicate(&self, remote: Option<Endpoint>) -> RxResult<BridgeOutcome> {
        bridge(self, remote)
    }

    /// Mark peer discovery as running until `done` resolves, or until the
    /// configured quiescence window passes
    pub fn finding_peers(&self, done: Option<DoneFactory>) -> BoxStream<'static, RxResult<()>> {
        let this = self.clone();
        stream::once(async move {
            let finished = this.store.finding_peers();
            let signal = match done {
                Some(factory) => factory(this.ctx.container()),
                None => this
                    .pipeline()
                    .timer(this.ctx.base().settings().finding_peers_quiescence()),
            };
            signal.await;
            finished();
            debug!("Store peer discovery finished");
            Ok::<_, RxError>(())
        })
        .boxed()
    }

    /// Whether the store has closed
    pub fn is_closed(&self) -> bool {
        self.store.is_closed()
    }

    /// Close the store and its logs
    pub async fn close(&self) -> RxResult<()> {
        self.store.close().await
    }
}

impl ReplicationPeer for RxStore {
    fn peer_kind(&self) -> PeerKind {
        PeerKind::Store
    }

    fn peer_id(&self) -> usize {
        self.store.instance_id()
    }

    fn pipeline(&self) -> Arc<dyn Pipeline> {
        self.ctx.base().pipeline()
    }

    fn open_transport(&self, is_initiator: bool) -> RxResult<Arc<dyn ByteDuplex>> {
        self.store.replicate(is_initiator)
    }
}

impl From<RxStore> for Endpoint {
    fn from(store: RxStore) -> Self {
        Endpoint::peer(store)
    }
}

impl fmt::Debug for RxStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RxStore")
            .field("closed", &self.store.is_closed())
            .finish()
    }
}
