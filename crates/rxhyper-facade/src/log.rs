//! Reactive log facade
//!
//! [`RxLog`] is a cheap clonable handle pairing a log context with one log
//! session. Async methods are thin pass-throughs. Methods returning streams
//! are lazy: nothing touches the log until the stream is polled, and every
//! stream waits for the log to be ready first.

use bytes::Bytes;
use futures::future::{self, BoxFuture};
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use futures::FutureExt;
use rxhyper_bridge::{bridge, BridgeOutcome, Endpoint, PeerKind, ReplicationPeer};
use rxhyper_core::{
    AppendOutcome, Block, BlockRange, ByteDuplex, ByteStreamOptions, Container, GetOptions,
    LogEvent, LogKey, LogOptions, Pipeline, ReadStreamOptions, ReplicatedLog, RxError, RxResult,
};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, warn};

use crate::context::LogContext;

/// Produces the signal that ends peer discovery; receives the subsystem
/// container
pub type DoneFactory = Box<dyn FnOnce(&Container) -> BoxFuture<'static, ()> + Send>;

/// One appended value and the log's size after appending it
#[derive(Debug, Clone, PartialEq)]
pub struct AppendResult {
    /// Log length after the append
    pub length: u64,
    /// Total encoded size after the append
    pub byte_length: u64,
    /// The appended value
    pub value: Block,
}

/// Reactive handle on a replicated log
#[derive(Clone)]
pub struct RxLog {
    ctx: Arc<LogContext>,
    log: Arc<dyn ReplicatedLog>,
}

impl RxLog {
    /// Open a new log. Uses `options.storage`, or the context's default
    /// storage when none is given. The event buffer defaults to the runtime
    /// settings.
    pub fn create(ctx: Arc<LogContext>, mut options: LogOptions) -> RxResult<Self> {
        options
            .event_buffer
            .get_or_insert(ctx.base().settings().event_buffer);
        let storage = match &options.storage {
            Some(storage) => storage.clone(),
            None => ctx.base().make_file()?,
        };
        let log = ctx.factory().open(storage, ctx.base().codec(), options)?;
        debug!(key = ?log.key(), writable = log.writable(), "Log created");
        Ok(Self::from_log(ctx, log))
    }

    /// Open one log per options value, in order
    pub fn create_many<I>(ctx: Arc<LogContext>, configs: I) -> RxResult<Vec<Self>>
    where
        I: IntoIterator<Item = LogOptions>,
    {
        configs
            .into_iter()
            .map(|options| Self::create(ctx.clone(), options))
            .collect()
    }

    /// Wrap an existing log
    pub fn from_log(ctx: Arc<LogContext>, log: Arc<dyn ReplicatedLog>) -> Self {
        Self { ctx, log }
    }

    /// Open a reader log for `key` and replicate it from `remote` until the
    /// new log closes.
    ///
    /// The key comes from `key`, then `options.key`, then a peer endpoint.
    pub fn from_replication(
        ctx: Arc<LogContext>,
        remote: Endpoint,
        key: Option<LogKey>,
        options: LogOptions,
    ) -> RxResult<Self> {
        let key = key
            .or(options.key)
            .or_else(|| remote.key())
            .ok_or_else(|| RxError::usage("Replicating into a new log needs the source key"))?;

        let log = Self::create(ctx, options.key(key))?;
        let mut events = log.log.subscribe();
        let link = log.replicate(Some(remote))?;
        let release = link.clone();

        let watched = log.pipeline().spawn(
            async move {
                loop {
                    match events.recv().await {
                        Ok(LogEvent::Close) | Err(RecvError::Closed) => break,
                        Ok(_) | Err(RecvError::Lagged(_)) => {}
                    }
                }
                debug!(%key, "Replicated log closed, releasing link");
                link.unsubscribe();
            }
            .boxed(),
        );
        if let Err(err) = watched {
            release.unsubscribe();
            return Err(err);
        }
        Ok(log)
    }

    /// The log context
    pub fn context(&self) -> &Arc<LogContext> {
        &self.ctx
    }

    /// The wrapped log session
    pub fn inner(&self) -> &Arc<dyn ReplicatedLog> {
        &self.log
    }

    /// Wait until the log is ready
    pub async fn ready(&self) -> RxResult<RxLog> {
        self.log.ready().await?;
        Ok(self.clone())
    }

    /// Lazy readiness: emits this handle once the log is ready
    pub fn ready_stream(&self) -> BoxStream<'static, RxResult<RxLog>> {
        let this = self.clone();
        stream::once(async move { this.ready().await }).boxed()
    }

    /// Append blocks
    pub async fn append(&self, blocks: Vec<Block>) -> RxResult<AppendOutcome> {
        self.log.ready().await?;
        self.log.append(blocks).await
    }

    /// Append each value of `values`, one at a time, in order
    pub fn append_stream<S>(&self, values: S) -> BoxStream<'static, RxResult<AppendResult>>
    where
        S: Stream<Item = Block> + Send + 'static,
    {
        let this = self.clone();
        stream::once(async move {
            this.log.ready().await?;
            Ok::<_, RxError>(values.then(move |value| {
                let log = this.log.clone();
                async move {
                    let outcome = log.append(vec![value.clone()]).await?;
                    Ok::<_, RxError>(AppendResult {
                        length: outcome.length,
                        byte_length: outcome.byte_length,
                        value,
                    })
                }
            }))
        })
        .try_flatten()
        .boxed()
    }

    /// Append the values produced by `factory`, which receives the log
    /// container
    pub fn append_with<F, S>(&self, factory: F) -> BoxStream<'static, RxResult<AppendResult>>
    where
        F: FnOnce(&Container) -> S,
        S: Stream<Item = Block> + Send + 'static,
    {
        let values = factory(self.ctx.container());
        self.append_stream(values)
    }

    /// Read one block
    pub async fn get(&self, index: u64, options: GetOptions) -> RxResult<Option<Block>> {
        self.log.ready().await?;
        self.log.get(index, options).await
    }

    /// Lazy [`RxLog::get`]
    pub fn get_stream(
        &self,
        index: u64,
        options: GetOptions,
    ) -> BoxStream<'static, RxResult<Option<Block>>> {
        let this = self.clone();
        stream::once(async move { this.get(index, options).await }).boxed()
    }

    /// Emits this handle once `range` is available locally
    pub fn download(&self, range: BlockRange) -> BoxStream<'static, RxResult<RxLog>> {
        let this = self.clone();
        stream::once(async move {
            this.log.ready().await?;
            this.log.download(range).await?;
            Ok::<_, RxError>(this)
        })
        .boxed()
    }

    /// Blocks in index order
    pub fn create_read_stream(
        &self,
        options: ReadStreamOptions,
    ) -> BoxStream<'static, RxResult<Block>> {
        let log = self.log.clone();
        stream::once(async move {
            log.ready().await?;
            Ok::<_, RxError>(log.create_read_stream(options))
        })
        .try_flatten()
        .boxed()
    }

    /// Raw encoded block bytes in index order
    pub fn create_byte_stream(
        &self,
        options: ByteStreamOptions,
    ) -> BoxStream<'static, RxResult<Bytes>> {
        let log = self.log.clone();
        stream::once(async move {
            log.ready().await?;
            Ok::<_, RxError>(log.create_byte_stream(options))
        })
        .try_flatten()
        .boxed()
    }

    /// Emits this handle on every append, local or replicated
    pub fn on_append(&self) -> BoxStream<'static, RxResult<RxLog>> {
        self.on_event(LogEvent::Append)
    }

    /// Emits this handle whenever a replication peer connects
    pub fn on_peer_add(&self) -> BoxStream<'static, RxResult<RxLog>> {
        self.on_event(LogEvent::PeerAdd)
    }

    /// Emits this handle whenever a replication peer disconnects
    pub fn on_peer_remove(&self) -> BoxStream<'static, RxResult<RxLog>> {
        self.on_event(LogEvent::PeerRemove)
    }

    /// Emits this handle when the log closes
    pub fn on_close(&self) -> BoxStream<'static, RxResult<RxLog>> {
        self.on_event(LogEvent::Close)
    }

    fn on_event(&self, wanted: LogEvent) -> BoxStream<'static, RxResult<RxLog>> {
        let this = self.clone();
        stream::once(async move {
            this.log.ready().await?;
            let events = BroadcastStream::new(this.log.subscribe());
            Ok::<_, RxError>(events.filter_map(move |event| {
                future::ready(match event {
                    Ok(event) if event == wanted => Some(Ok(this.clone())),
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(missed)) => {
                        warn!(?wanted, missed, "Log event listener lagged");
                        None
                    }
                })
            }))
        })
        .try_flatten()
        .boxed()
    }

    /// New session on the same log
    pub fn session(&self, options: LogOptions) -> RxResult<RxLog> {
        Ok(Self::from_log(self.ctx.clone(), self.log.session(options)?))
    }

    /// Read-only view frozen at the current length
    pub fn snapshot(&self, options: LogOptions) -> RxResult<RxLog> {
        Ok(Self::from_log(self.ctx.clone(), self.log.snapshot(options)?))
    }

    /// Replicate with `remote`, or open a detached responder stream when
    /// there is none. The caller that passes a remote is the initiator.
    pub fn replicate(&self, remote: Option<Endpoint>) -> RxResult<BridgeOutcome> {
        bridge(self, remote)
    }

    /// Mark peer discovery as running until `done` resolves, or until the
    /// configured quiescence window passes. Emits once discovery is marked
    /// finished.
    pub fn finding_peers(&self, done: Option<DoneFactory>) -> BoxStream<'static, RxResult<()>> {
        let this = self.clone();
        stream::once(async move {
            this.log.ready().await?;
            let finished = this.log.finding_peers();
            let signal = match done {
                Some(factory) => factory(this.ctx.container()),
                None => this
                    .pipeline()
                    .timer(this.ctx.base().settings().finding_peers_quiescence()),
            };
            signal.await;
            finished();
            debug!(key = ?this.log.key(), "Peer discovery finished");
            Ok::<_, RxError>(())
        })
        .boxed()
    }

    /// Public key, once ready
    pub fn key(&self) -> Option<LogKey> {
        self.log.key()
    }

    /// Discovery key, once ready
    pub fn discovery_key(&self) -> Option<LogKey> {
        self.log.discovery_key()
    }

    /// Number of blocks
    pub fn length(&self) -> u64 {
        self.log.length()
    }

    /// Whether this session can append
    pub fn writable(&self) -> bool {
        self.log.writable()
    }

    /// Whether this session has closed
    pub fn is_closed(&self) -> bool {
        self.log.is_closed()
    }

    /// Close this session
    pub async fn close(&self) -> RxResult<()> {
        self.log.close().await
    }
}

impl ReplicationPeer for RxLog {
    fn peer_kind(&self) -> PeerKind {
        PeerKind::Log
    }

    fn peer_id(&self) -> usize {
        self.log.instance_id()
    }

    fn key(&self) -> Option<LogKey> {
        self.log.key()
    }

    fn pipeline(&self) -> Arc<dyn Pipeline> {
        self.ctx.base().pipeline()
    }

    fn open_transport(&self, is_initiator: bool) -> RxResult<Arc<dyn ByteDuplex>> {
        self.log.replicate(is_initiator)
    }
}

impl From<RxLog> for Endpoint {
    fn from(log: RxLog) -> Self {
        Endpoint::peer(log)
    }
}

impl fmt::Debug for RxLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RxLog")
            .field("key", &self.log.key())
            .field("length", &self.log.length())
            .field("closed", &self.log.is_closed())
            .finish()
    }
}
