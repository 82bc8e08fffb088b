//! In-memory replicated log
//!
//! A stand-in for the external log library. Sessions on the same log share a
//! [`LogCore`]; the core closes once its last session closes. Blocks are
//! persisted through a [`BlockFile`] named after the log key.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use rxhyper_core::{
    AppendOutcome, Block, BlockFile, BlockRange, ByteDuplex, ByteStreamOptions, GetOptions,
    LogEvent, LogFactory, LogKey, LogOptions, PeerDiscoveryDone, ReadStreamOptions,
    ReplicatedLog, RxError, RxResult, StorageBackend, ValueCodec, ValueEncoding,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace, warn};

use crate::duplex::{DuplexCommand, MemoryDuplex};
use crate::protocol::{Frame, FrameDecoder};

/// Default capacity of per-session event channels
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Discovery key derived from a log key
pub fn discovery_key(key: &LogKey) -> LogKey {
    LogKey::from_bytes(*blake3::keyed_hash(key.as_bytes(), b"hypercore").as_bytes())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Progress {
    length: u64,
    closed: bool,
}

type CloseHook = Box<dyn FnOnce(LogKey) + Send>;

/// State shared by every session of one log
pub struct LogCore {
    key: LogKey,
    discovery_key: LogKey,
    writable: bool,
    file: Arc<dyn BlockFile>,
    codec: Arc<dyn ValueCodec>,
    event_buffer: usize,
    progress: watch::Sender<Progress>,
    byte_length: AtomicU64,
    write_lock: Mutex<BTreeMap<u64, Bytes>>,
    listeners: Mutex<HashMap<u64, broadcast::Sender<LogEvent>>>,
    next_session: AtomicU64,
    open_sessions: AtomicUsize,
    peers: AtomicUsize,
    finding_peers: Arc<AtomicUsize>,
    close_hooks: Mutex<Vec<CloseHook>>,
}

impl LogCore {
    /// Open a core over `file`
    pub fn open(
        key: LogKey,
        writable: bool,
        file: Arc<dyn BlockFile>,
        codec: Arc<dyn ValueCodec>,
        event_buffer: usize,
    ) -> RxResult<Arc<Self>> {
        let length = file.len();
        let mut byte_length = 0u64;
        for index in 0..length {
            if let Some(block) = file.read(index)? {
                byte_length += block.len() as u64;
            }
        }
        debug!(key = %key, writable, length, "Opening memory log");

        Ok(Arc::new(Self {
            key,
            discovery_key: discovery_key(&key),
            writable,
            file,
            codec,
            event_buffer: event_buffer.max(1),
            progress: watch::Sender::new(Progress {
                length,
                closed: false,
            }),
            byte_length: AtomicU64::new(byte_length),
            write_lock: Mutex::new(BTreeMap::new()),
            listeners: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(0),
            open_sessions: AtomicUsize::new(0),
            peers: AtomicUsize::new(0),
            finding_peers: Arc::new(AtomicUsize::new(0)),
            close_hooks: Mutex::new(Vec::new()),
        }))
    }

    /// Log key
    pub fn key(&self) -> LogKey {
        self.key
    }

    /// Whether local appends are allowed
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// Current length
    pub fn length(&self) -> u64 {
        self.progress.borrow().length
    }

    /// Whether every session has closed
    pub fn is_closed(&self) -> bool {
        self.progress.borrow().closed
    }

    /// Connected replication peers
    pub fn peer_count(&self) -> usize {
        self.peers.load(Ordering::SeqCst)
    }

    /// Outstanding peer discovery handles
    pub fn finding_peers_count(&self) -> usize {
        self.finding_peers.load(Ordering::SeqCst)
    }

    /// Run `hook` once the core closes
    pub fn on_close(&self, hook: impl FnOnce(LogKey) + Send + 'static) {
        self.close_hooks.lock().push(Box::new(hook));
    }

    fn open_session(&self) -> u64 {
        let id = self.next_session.fetch_add(1, Ordering::SeqCst);
        let (sender, _) = broadcast::channel(self.event_buffer);
        self.listeners.lock().insert(id, sender);
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        id
    }

    fn subscribe(&self, session: u64) -> broadcast::Receiver<LogEvent> {
        match self.listeners.lock().get(&session) {
            Some(sender) => sender.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    fn emit(&self, event: LogEvent) {
        for sender in self.listeners.lock().values() {
            let _ = sender.send(event);
        }
    }

    fn close_session(&self, session: u64) {
        if let Some(sender) = self.listeners.lock().remove(&session) {
            let _ = sender.send(LogEvent::Close);
        }
        if self.open_sessions.fetch_sub(1, Ordering::SeqCst) != 1 {
            return;
        }

        debug!(key = %self.key, "Closing memory log");
        if let Err(err) = self.file.close() {
            warn!(key = %self.key, error = %err, "Failed to close block file");
        }
        self.progress.send_modify(|progress| progress.closed = true);
        let hooks = std::mem::take(&mut *self.close_hooks.lock());
        for hook in hooks {
            hook(self.key);
        }
    }

    fn append_encoded(&self, blocks: Vec<Bytes>) -> RxResult<AppendOutcome> {
        let _guard = self.write_lock.lock();
        if self.is_closed() {
            return Err(RxError::closed("Log"));
        }
        let start = self.length();
        let mut added = 0u64;
        for (offset, block) in blocks.into_iter().enumerate() {
            added += block.len() as u64;
            self.file.write(start + offset as u64, block)?;
        }
        let length = self.file.len();
        let byte_length = self.byte_length.fetch_add(added, Ordering::SeqCst) + added;
        self.progress.send_modify(|progress| progress.length = length);
        self.emit(LogEvent::Append);
        Ok(AppendOutcome {
            length,
            byte_length,
        })
    }

    /// Apply a block received from a peer
    pub fn apply_remote(&self, index: u64, block: Bytes) -> RxResult<()> {
        let mut parked = self.write_lock.lock();
        if self.is_closed() {
            return Ok(());
        }
        let mut length = self.length();
        if index < length {
            trace!(key = %self.key, index, "Ignoring block already held");
            return Ok(());
        }
        parked.insert(index, block);

        let before = length;
        while let Some(block) = parked.remove(&length) {
            self.byte_length.fetch_add(block.len() as u64, Ordering::SeqCst);
            self.file.write(length, block)?;
            length += 1;
        }
        if length > before {
            self.progress.send_modify(|progress| progress.length = length);
            self.emit(LogEvent::Append);
        }
        Ok(())
    }

    fn read_raw(&self, index: u64) -> RxResult<Bytes> {
        self.file
            .read(index)?
            .ok_or_else(|| RxError::not_found(format!("Block {index} of log {}", self.key)))
    }

    fn read_block(&self, index: u64, encoding: ValueEncoding) -> RxResult<Block> {
        self.codec.decode(self.read_raw(index)?, encoding)
    }

    /// Wait until the log holds at least `length` blocks
    async fn wait_for_length(&self, length: u64) -> RxResult<()> {
        let mut receiver = self.progress.subscribe();
        let reached = receiver
            .wait_for(|progress| progress.length >= length || progress.closed)
            .await
            .map(|progress| progress.length >= length)
            .unwrap_or(false);
        if reached {
            Ok(())
        } else {
            Err(RxError::closed("Log"))
        }
    }

    /// Handshake followed by every block, live, until the core closes
    pub fn outbound_frames(self: Arc<Self>) -> BoxStream<'static, Frame> {
        let receiver = self.progress.subscribe();
        let handshake = Frame::Handshake {
            key: self.key,
            length: self.length(),
        };
        let blocks = stream::unfold((self, 0u64, receiver), |(core, next, mut receiver)| async move {
            loop {
                if next < core.length() {
                    return match core.read_raw(next) {
                        Ok(bytes) => {
                            let frame = Frame::block(core.key, next, &bytes);
                            Some((frame, (core, next + 1, receiver)))
                        }
                        Err(err) => {
                            warn!(key = %core.key, error = %err, "Stopping replication feed");
                            None
                        }
                    };
                }
                if core.is_closed() || receiver.changed().await.is_err() {
                    return None;
                }
            }
        });
        stream::iter([handshake]).chain(blocks).boxed()
    }

    /// Apply an inbound frame; returns whether it was a handshake
    pub fn receive(&self, frame: &Frame) -> RxResult<bool> {
        match frame {
            Frame::Handshake { .. } => Ok(true),
            Frame::Block { index, .. } => {
                if let Some(payload) = frame.payload()? {
                    self.apply_remote(*index, payload)?;
                }
                Ok(false)
            }
        }
    }

    pub(crate) fn peer_added(&self) {
        self.peers.fetch_add(1, Ordering::SeqCst);
        self.emit(LogEvent::PeerAdd);
    }

    pub(crate) fn peer_removed(&self) {
        self.peers.fetch_sub(1, Ordering::SeqCst);
        self.emit(LogEvent::PeerRemove);
    }
}

impl std::fmt::Debug for LogCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogCore")
            .field("key", &self.key)
            .field("writable", &self.writable)
            .field("progress", &*self.progress.borrow())
            .finish()
    }
}

/// Push a core's frames into `duplex` until either closes
pub(crate) async fn feed(core: Arc<LogCore>, duplex: Arc<MemoryDuplex>) {
    let mut frames = core.outbound_frames();
    loop {
        tokio::select! {
            frame = frames.next() => match frame {
                Some(frame) => match frame.encode() {
                    Ok(chunk) => duplex.push(chunk),
                    Err(err) => {
                        duplex.fail(err);
                        return;
                    }
                },
                None => return,
            },
            _ = duplex.closed() => return,
        }
    }
}

fn runtime() -> RxResult<Handle> {
    Handle::try_current()
        .map_err(|e| RxError::transport(format!("Replication needs a Tokio runtime: {e}")))
}

fn spawn_link(core: Arc<LogCore>, is_initiator: bool) -> RxResult<Arc<MemoryDuplex>> {
    let runtime = runtime()?;
    let (duplex, mut commands) = MemoryDuplex::new(is_initiator);
    debug!(key = %core.key, initiator = is_initiator, "Opening log replication stream");

    let (feed_core, feed_duplex) = (core.clone(), duplex.clone());
    runtime.spawn(async move {
        feed(feed_core, feed_duplex.clone()).await;
        feed_duplex.push_end();
        feed_duplex.close();
    });

    let inbound = duplex.clone();
    runtime.spawn(async move {
        let mut decoder = FrameDecoder::default();
        let mut connected = false;
        while let Some(command) = commands.recv().await {
            let chunk = match command {
                DuplexCommand::Write(chunk) => chunk,
                DuplexCommand::End | DuplexCommand::Destroy(_) => break,
            };
            let applied = decoder.push(&chunk).and_then(|frames| {
                for frame in frames.iter().filter(|frame| frame.key() == core.key) {
                    if core.receive(frame)? && !connected {
                        connected = true;
                        core.peer_added();
                    }
                }
                Ok(())
            });
            if let Err(err) = applied {
                inbound.fail(err);
                break;
            }
        }
        if connected {
            core.peer_removed();
        }
        inbound.close();
    });

    Ok(duplex)
}

/// One session on a memory log
pub struct MemoryLog {
    core: Arc<LogCore>,
    session: u64,
    encoding: ValueEncoding,
    snapshot: Option<u64>,
    closed: AtomicBool,
}

impl MemoryLog {
    /// New session on `core`
    pub fn session_on(core: Arc<LogCore>, encoding: ValueEncoding, snapshot: Option<u64>) -> Self {
        let session = core.open_session();
        Self {
            core,
            session,
            encoding,
            snapshot,
            closed: AtomicBool::new(false),
        }
    }

    /// Shared core
    pub fn core(&self) -> &Arc<LogCore> {
        &self.core
    }

    /// Whether peer discovery is in progress
    pub fn is_finding_peers(&self) -> bool {
        self.core.finding_peers_count() > 0
    }

    fn check_open(&self) -> RxResult<()> {
        if self.closed.load(Ordering::SeqCst) || self.core.is_closed() {
            Err(RxError::closed("Log"))
        } else {
            Ok(())
        }
    }

    fn visible_length(&self) -> u64 {
        let length = self.core.length();
        self.snapshot.map_or(length, |limit| limit.min(length))
    }
}

#[async_trait]
impl ReplicatedLog for MemoryLog {
    async fn ready(&self) -> RxResult<()> {
        self.check_open()
    }

    fn instance_id(&self) -> usize {
        Arc::as_ptr(&self.core) as usize
    }

    fn key(&self) -> Option<LogKey> {
        Some(self.core.key)
    }

    fn discovery_key(&self) -> Option<LogKey> {
        Some(self.core.discovery_key)
    }

    fn length(&self) -> u64 {
        self.visible_length()
    }

    fn writable(&self) -> bool {
        self.core.writable && self.snapshot.is_none()
    }

    fn is_closed(&self) -> bool {
        self.check_open().is_err()
    }

    async fn append(&self, blocks: Vec<Block>) -> RxResult<AppendOutcome> {
        self.check_open()?;
        if !self.writable() {
            return Err(RxError::usage(format!("Log {} is not writable", self.core.key)));
        }
        let encoded = blocks
            .iter()
            .map(|block| self.core.codec.encode(block, self.encoding))
            .collect::<RxResult<Vec<_>>>()?;
        self.core.append_encoded(encoded)
    }

    async fn get(&self, index: u64, options: GetOptions) -> RxResult<Option<Block>> {
        self.check_open()?;
        if let Some(limit) = self.snapshot {
            if index >= limit {
                return Ok(None);
            }
        }
        if index >= self.core.length() {
            // No log can reach a length past u64::MAX
            let Some(needed) = index.checked_add(1).filter(|_| options.wait) else {
                return Ok(None);
            };
            self.core.wait_for_length(needed).await?;
            self.check_open()?;
        }
        self.core.read_block(index, self.encoding).map(Some)
    }

    fn create_read_stream(&self, options: ReadStreamOptions) -> BoxStream<'static, RxResult<Block>> {
        if let Err(err) = self.check_open() {
            return stream::iter([Err(err)]).boxed();
        }
        let live = options.live && self.snapshot.is_none();
        let end = match (options.end, live) {
            (Some(end), _) => Some(end),
            (None, true) => None,
            (None, false) => Some(self.visible_length()),
        };
        let cursor = ReadCursor {
            core: self.core.clone(),
            next: options.start,
            end,
            live,
            encoding: self.encoding,
            progress: self.core.progress.subscribe(),
        };
        stream::unfold(cursor, ReadCursor::advance).boxed()
    }

    fn create_byte_stream(&self, options: ByteStreamOptions) -> BoxStream<'static, RxResult<Bytes>> {
        if let Err(err) = self.check_open() {
            return stream::iter([Err(err)]).boxed();
        }
        let end = options
            .end
            .unwrap_or_else(|| self.visible_length())
            .min(self.visible_length());
        let core = self.core.clone();
        stream::iter(options.start..end)
            .map(move |index| core.read_raw(index))
            .boxed()
    }

    async fn download(&self, range: BlockRange) -> RxResult<()> {
        self.check_open()?;
        match range.end {
            Some(end) if end > range.start => self.core.wait_for_length(end).await,
            _ => Ok(()),
        }
    }

    fn replicate(&self, is_initiator: bool) -> RxResult<Arc<dyn ByteDuplex>> {
        self.check_open()?;
        let duplex: Arc<dyn ByteDuplex> = spawn_link(self.core.clone(), is_initiator)?;
        Ok(duplex)
    }

    fn session(&self, options: LogOptions) -> RxResult<Arc<dyn ReplicatedLog>> {
        self.check_open()?;
        Ok(Arc::new(MemoryLog::session_on(
            self.core.clone(),
            options.value_encoding,
            self.snapshot,
        )))
    }

    fn snapshot(&self, options: LogOptions) -> RxResult<Arc<dyn ReplicatedLog>> {
        self.check_open()?;
        Ok(Arc::new(MemoryLog::session_on(
            self.core.clone(),
            options.value_encoding,
            Some(self.visible_length()),
        )))
    }

    fn finding_peers(&self) -> PeerDiscoveryDone {
        let counter = self.core.finding_peers.clone();
        counter.fetch_add(1, Ordering::SeqCst);
        Box::new(move || {
            counter.fetch_sub(1, Ordering::SeqCst);
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<LogEvent> {
        self.core.subscribe(self.session)
    }

    async fn close(&self) -> RxResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.core.close_session(self.session);
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLog")
            .field("key", &self.core.key)
            .field("session", &self.session)
            .field("encoding", &self.encoding)
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

struct ReadCursor {
    core: Arc<LogCore>,
    next: u64,
    end: Option<u64>,
    live: bool,
    encoding: ValueEncoding,
    progress: watch::Receiver<Progress>,
}

impl ReadCursor {
    async fn advance(mut self) -> Option<(RxResult<Block>, Self)> {
        loop {
            if self.end.is_some_and(|end| self.next >= end) {
                return None;
            }
            if self.next < self.core.length() {
                let block = self.core.read_block(self.next, self.encoding);
                self.next += 1;
                return Some((block, self));
            }
            if !self.live || self.core.is_closed() || self.progress.changed().await.is_err() {
                return None;
            }
        }
    }
}

/// [`LogFactory`] producing memory logs
#[derive(Debug, Clone)]
pub struct MemoryLogFactory {
    event_buffer: usize,
}

impl MemoryLogFactory {
    /// Factory with the default event buffer
    pub fn new() -> Self {
        Self {
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    /// Factory with a specific event channel capacity
    pub fn with_event_buffer(event_buffer: usize) -> Self {
        Self { event_buffer }
    }
}

impl Default for MemoryLogFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl LogFactory for MemoryLogFactory {
    fn open(
        &self,
        storage: Arc<dyn StorageBackend>,
        codec: Arc<dyn ValueCodec>,
        options: LogOptions,
    ) -> RxResult<Arc<dyn ReplicatedLog>> {
        let (key, writable) = match options.key {
            Some(key) => (key, false),
            None => (LogKey::from_bytes(rand::random()), true),
        };
        let file = storage.open(&key.to_hex())?;
        let event_buffer = options.event_buffer.unwrap_or(self.event_buffer);
        let core = LogCore::open(key, writable, file, codec, event_buffer)?;
        Ok(Arc::new(MemoryLog::session_on(
            core,
            options.value_encoding,
            None,
        )))
    }
}
