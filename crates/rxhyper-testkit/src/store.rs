//! In-memory multi-log store
//!
//! Logs are opened by key or by name. Name-derived keys come from a random
//! per-store seed and the namespace path, so the same name always maps to the
//! same writable log within one store. A store replication stream carries
//! every log either side opens, including logs opened after the stream.

use async_trait::async_trait;
use parking_lot::Mutex;
use rxhyper_core::{
    ByteDuplex, LogKey, LogOptions, MultiLogStore, PeerDiscoveryDone, ReplicatedLog, RxError,
    RxResult, StorageBackend, StoreEvent, StoreFactory, StoreOptions, ValueCodec,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::duplex::{DuplexCommand, MemoryDuplex};
use crate::log::{feed, LogCore, MemoryLog, DEFAULT_EVENT_BUFFER};
use crate::protocol::{Frame, FrameDecoder};

struct StoreShared {
    storage: Arc<dyn StorageBackend>,
    codec: Arc<dyn ValueCodec>,
    seed: [u8; 32],
    event_buffer: usize,
    cores: Mutex<HashMap<LogKey, Weak<LogCore>>>,
    owned: Mutex<HashSet<LogKey>>,
    events: broadcast::Sender<StoreEvent>,
    closed: watch::Sender<bool>,
    finding_peers: Arc<AtomicUsize>,
}

impl StoreShared {
    fn core(&self, key: &LogKey) -> Option<Arc<LogCore>> {
        self.cores
            .lock()
            .get(key)
            .and_then(Weak::upgrade)
            .filter(|core| !core.is_closed())
    }

    fn open_cores(&self) -> Vec<Arc<LogCore>> {
        self.cores
            .lock()
            .values()
            .filter_map(Weak::upgrade)
            .filter(|core| !core.is_closed())
            .collect()
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

/// One view (root, namespace, or session) of a memory store
pub struct MemoryStore {
    shared: Arc<StoreShared>,
    namespace: Vec<String>,
    root: bool,
    opened: Mutex<Vec<Arc<MemoryLog>>>,
    closed: AtomicBool,
}

impl MemoryStore {
    fn root(
        storage: Arc<dyn StorageBackend>,
        codec: Arc<dyn ValueCodec>,
        namespace: Vec<String>,
        event_buffer: usize,
    ) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self {
            shared: Arc::new(StoreShared {
                storage,
                codec,
                seed: rand::random(),
                event_buffer,
                cores: Mutex::new(HashMap::new()),
                owned: Mutex::new(HashSet::new()),
                events,
                closed: watch::Sender::new(false),
                finding_peers: Arc::new(AtomicUsize::new(0)),
            }),
            namespace,
            root: true,
            opened: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn derived(&self, namespace: Vec<String>) -> Self {
        Self {
            shared: self.shared.clone(),
            namespace,
            root: false,
            opened: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Namespace path of this view
    pub fn namespace_path(&self) -> &[String] {
        &self.namespace
    }

    /// Keys of every log currently open in the store
    pub fn open_keys(&self) -> Vec<LogKey> {
        let mut keys: Vec<_> = self.shared.open_cores().iter().map(|c| c.key()).collect();
        keys.sort();
        keys
    }

    /// Whether peer discovery is in progress
    pub fn is_finding_peers(&self) -> bool {
        self.shared.finding_peers.load(Ordering::SeqCst) > 0
    }

    /// Key a name maps to in this view
    pub fn derive_key(&self, name: &str) -> LogKey {
        let mut hasher = blake3::Hasher::new_keyed(&self.shared.seed);
        for segment in &self.namespace {
            hasher.update(segment.as_bytes());
            hasher.update(&[0]);
        }
        hasher.update(name.as_bytes());
        LogKey::from_bytes(*hasher.finalize().as_bytes())
    }

    fn check_open(&self) -> RxResult<()> {
        if self.closed.load(Ordering::SeqCst) || self.shared.is_closed() {
            Err(RxError::closed("Store"))
        } else {
            Ok(())
        }
    }

    fn core_for(&self, key: LogKey, writable: bool) -> RxResult<Arc<LogCore>> {
        let mut cores = self.shared.cores.lock();
        if let Some(core) = cores.get(&key).and_then(Weak::upgrade) {
            if !core.is_closed() {
                return Ok(core);
            }
        }

        let file = self.shared.storage.open(&key.to_hex())?;
        let core = LogCore::open(
            key,
            writable,
            file,
            self.shared.codec.clone(),
            self.shared.event_buffer,
        )?;
        cores.insert(key, Arc::downgrade(&core));
        drop(cores);

        let shared = Arc::downgrade(&self.shared);
        core.on_close(move |key| {
            let Some(shared) = shared.upgrade() else {
                return;
            };
            {
                let mut cores = shared.cores.lock();
                let stale = cores
                    .get(&key)
                    .and_then(Weak::upgrade)
                    .map_or(true, |core| core.is_closed());
                if stale {
                    cores.remove(&key);
                }
            }
            let _ = shared.events.send(StoreEvent::CoreClose(key));
        });
        let _ = self.shared.events.send(StoreEvent::CoreOpen(key));
        Ok(core)
    }
}

#[async_trait]
impl MultiLogStore for MemoryStore {
    fn instance_id(&self) -> usize {
        Arc::as_ptr(&self.shared) as usize
    }

    fn get(&self, options: LogOptions) -> RxResult<Arc<dyn ReplicatedLog>> {
        self.check_open()?;
        let (key, writable) = match (options.key, options.name.as_deref()) {
            (Some(key), _) => (key, self.shared.owned.lock().contains(&key)),
            (None, Some(name)) => {
                let key = self.derive_key(name);
                self.shared.owned.lock().insert(key);
                (key, true)
            }
            (None, None) => return Err(RxError::usage("Store logs need a name or a key")),
        };

        let core = self.core_for(key, writable)?;
        let log = Arc::new(MemoryLog::session_on(core, options.value_encoding, None));
        self.opened.lock().push(log.clone());
        Ok(log)
    }

    fn namespace(&self, name: &str) -> RxResult<Arc<dyn MultiLogStore>> {
        self.check_open()?;
        if name.is_empty() {
            return Err(RxError::usage("Namespace cannot be empty"));
        }
        let mut namespace = self.namespace.clone();
        namespace.push(name.to_string());
        Ok(Arc::new(self.derived(namespace)))
    }

    fn session(&self) -> RxResult<Arc<dyn MultiLogStore>> {
        self.check_open()?;
        Ok(Arc::new(self.derived(self.namespace.clone())))
    }

    fn replicate(&self, is_initiator: bool) -> RxResult<Arc<dyn ByteDuplex>> {
        self.check_open()?;
        let runtime = Handle::try_current()
            .map_err(|e| RxError::transport(format!("Replication needs a Tokio runtime: {e}")))?;
        let (duplex, commands) = MemoryDuplex::new(is_initiator);
        debug!(initiator = is_initiator, "Opening store replication stream");

        // Subscribe before snapshotting open logs so none slip through
        let feed_events = self.shared.events.subscribe();
        let inbound_events = self.shared.events.subscribe();
        let open = self.shared.open_cores();

        runtime.spawn(feed_store(
            self.shared.clone(),
            duplex.clone(),
            feed_events,
            open,
        ));
        runtime.spawn(receive_store(
            self.shared.clone(),
            duplex.clone(),
            commands,
            inbound_events,
        ));
        Ok(duplex)
    }

    fn finding_peers(&self) -> PeerDiscoveryDone {
        let counter = self.shared.finding_peers.clone();
        counter.fetch_add(1, Ordering::SeqCst);
        Box::new(move || {
            counter.fetch_sub(1, Ordering::SeqCst);
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.shared.events.subscribe()
    }

    fn is_closed(&self) -> bool {
        self.check_open().is_err()
    }

    async fn close(&self) -> RxResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let opened = std::mem::take(&mut *self.opened.lock());
        for log in opened {
            log.close().await?;
        }
        if self.root {
            debug!("Closing memory store");
            self.shared.closed.send_replace(true);
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("namespace", &self.namespace)
            .field("root", &self.root)
            .field("open_logs", &self.shared.open_cores().len())
            .finish()
    }
}

fn start_feed(fed: &mut HashSet<LogKey>, core: Arc<LogCore>, duplex: &Arc<MemoryDuplex>) {
    if fed.insert(core.key()) {
        tokio::spawn(feed(core, duplex.clone()));
    }
}

async fn feed_store(
    shared: Arc<StoreShared>,
    duplex: Arc<MemoryDuplex>,
    mut events: broadcast::Receiver<StoreEvent>,
    open: Vec<Arc<LogCore>>,
) {
    let mut fed = HashSet::new();
    for core in open {
        start_feed(&mut fed, core, &duplex);
    }
    let mut closed = shared.closed.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(StoreEvent::CoreOpen(key)) => {
                    if let Some(core) = shared.core(&key) {
                        start_feed(&mut fed, core, &duplex);
                    }
                }
                Ok(StoreEvent::CoreClose(key)) => {
                    fed.remove(&key);
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Store feed lagged, rescanning open logs");
                    for core in shared.open_cores() {
                        start_feed(&mut fed, core, &duplex);
                    }
                }
                Err(RecvError::Closed) => break,
            },
            _ = closed.wait_for(|closed| *closed) => break,
            _ = duplex.closed() => break,
        }
    }
    duplex.push_end();
    duplex.close();
}

fn deliver(core: &LogCore, frame: &Frame, connected: &mut HashSet<LogKey>) -> RxResult<()> {
    if core.receive(frame)? && connected.insert(core.key()) {
        core.peer_added();
    }
    Ok(())
}

async fn receive_store(
    shared: Arc<StoreShared>,
    duplex: Arc<MemoryDuplex>,
    mut commands: mpsc::UnboundedReceiver<DuplexCommand>,
    mut events: broadcast::Receiver<StoreEvent>,
) {
    let mut decoder = FrameDecoder::default();
    let mut parked: HashMap<LogKey, Vec<Frame>> = HashMap::new();
    let mut connected = HashSet::new();

    let outcome: RxResult<()> = async {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let chunk = match command {
                        Some(DuplexCommand::Write(chunk)) => chunk,
                        _ => return Ok(()),
                    };
                    for frame in decoder.push(&chunk)? {
                        match shared.core(&frame.key()) {
                            Some(core) => deliver(&core, &frame, &mut connected)?,
                            None => {
                                trace!(key = %frame.key(), "Parking frame for unopened log");
                                parked.entry(frame.key()).or_default().push(frame);
                            }
                        }
                    }
                }
                event = events.recv() => match event {
                    Ok(StoreEvent::CoreOpen(key)) => {
                        if let (Some(core), Some(frames)) = (shared.core(&key), parked.remove(&key)) {
                            for frame in &frames {
                                deliver(&core, frame, &mut connected)?;
                            }
                        }
                    }
                    Ok(StoreEvent::CoreClose(key)) => {
                        connected.remove(&key);
                    }
                    Err(RecvError::Lagged(_)) => {
                        let ready: Vec<_> = parked
                            .keys()
                            .filter_map(|key| shared.core(key))
                            .collect();
                        for core in ready {
                            for frame in parked.remove(&core.key()).unwrap_or_default() {
                                deliver(&core, &frame, &mut connected)?;
                            }
                        }
                    }
                    Err(RecvError::Closed) => return Ok(()),
                },
            }
        }
    }
    .await;

    for key in &connected {
        if let Some(core) = shared.core(key) {
            core.peer_removed();
        }
    }
    match outcome {
        Ok(()) => duplex.close(),
        Err(err) => duplex.fail(err),
    }
}

/// [`StoreFactory`] producing memory stores
#[derive(Debug, Clone)]
pub struct MemoryStoreFactory {
    event_buffer: usize,
}

impl MemoryStoreFactory {
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

impl Default for MemoryStoreFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreFactory for MemoryStoreFactory {
    fn open(
        &self,
        storage: Arc<dyn StorageBackend>,
        codec: Arc<dyn ValueCodec>,
        options: StoreOptions,
    ) -> RxResult<Arc<dyn MultiLogStore>> {
        let event_buffer = options.event_buffer.unwrap_or(self.event_buffer);
        let namespace = options.namespace.into_iter().collect();
        Ok(Arc::new(MemoryStore::root(
            storage,
            codec,
            namespace,
            event_buffer,
        )))
    }
}
