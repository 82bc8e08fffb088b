//! Coalescing Async Initializer
//!
//! Runs a subsystem's bootstrap at most once at a time and hands every caller
//! the same context. Callers that arrive while a bootstrap is in flight attach
//! to a shared one-shot future instead of polling, so a failed bootstrap
//! releases all of them with the same error and leaves the subsystem
//! retryable.
//!
//! ```text
//! Uninitialized --initialize--> Initializing --ok--> Ready
//!       ^                            |
//!       +-----------err--------------+
//! ```
//!
//! Every call merges its overrides into the shared configuration before
//! anything else, including calls that find the subsystem already `Ready`;
//! those overrides only affect capabilities resolved later.

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

use crate::configuration::ConfigOverrides;
use crate::errors::{RxError, RxResult};
use crate::resolver::CapabilityResolver;

/// A subsystem's expensive asynchronous setup
#[async_trait]
pub trait Bootstrap: Send + Sync + 'static {
    /// Context produced by a successful bootstrap
    type Context: Send + Sync + 'static;

    /// Subsystem name used in errors and logs
    fn subsystem(&self) -> &'static str;

    /// Resolve capabilities (and parent subsystems) and build the context
    async fn bootstrap(&self, resolver: &CapabilityResolver) -> RxResult<Self::Context>;
}

/// Observable lifecycle tag of an initializer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializerState {
    /// No bootstrap has succeeded and none is running
    Uninitialized,
    /// A bootstrap is in flight
    Initializing,
    /// The context is available
    Ready,
}

type SharedBootstrap<C> = Shared<BoxFuture<'static, RxResult<Arc<C>>>>;

enum Phase<C> {
    Uninitialized,
    Initializing {
        generation: u64,
        task: SharedBootstrap<C>,
    },
    Ready(Arc<C>),
}

/// Single-flight, retry-on-failure initializer for one subsystem
pub struct CoalescingInitializer<B: Bootstrap> {
    bootstrap: Arc<B>,
    resolver: CapabilityResolver,
    phase: Mutex<Phase<B::Context>>,
    install_count: AtomicU64,
    in_flight: AtomicUsize,
    generations: AtomicU64,
}

impl<B: Bootstrap> CoalescingInitializer<B> {
    /// Initializer running `bootstrap` against `resolver`
    pub fn new(bootstrap: B, resolver: CapabilityResolver) -> Self {
        Self {
            bootstrap: Arc::new(bootstrap),
            resolver,
            phase: Mutex::new(Phase::Uninitialized),
            install_count: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
            generations: AtomicU64::new(0),
        }
    }

    /// Merge `overrides`, then return the shared context, bootstrapping it if
    /// no bootstrap has succeeded yet.
    pub async fn initialize(&self, overrides: ConfigOverrides) -> RxResult<Arc<B::Context>> {
        self.resolver.configuration().merge(overrides);
        let call = self.install_count.fetch_add(1, Ordering::SeqCst);
        let subsystem = self.bootstrap.subsystem();

        let (generation, task) = {
            let mut phase = self.phase.lock();
            match &*phase {
                Phase::Ready(context) => return Ok(context.clone()),
                Phase::Initializing { generation, task } => {
                    debug!(subsystem, call, "Joining in-flight bootstrap");
                    (*generation, task.clone())
                }
                Phase::Uninitialized => {
                    let generation = self.generations.fetch_add(1, Ordering::SeqCst);
                    let task = self.start_bootstrap();
                    self.in_flight.fetch_add(1, Ordering::SeqCst);
                    *phase = Phase::Initializing {
                        generation,
                        task: task.clone(),
                    };
                    debug!(subsystem, call, generation, "Starting bootstrap");
                    (generation, task)
                }
            }
        };

        let outcome = task.await;
        self.settle(generation, &outcome);
        outcome
    }

    /// Current lifecycle tag
    pub fn state(&self) -> InitializerState {
        match &*self.phase.lock() {
            Phase::Uninitialized => InitializerState::Uninitialized,
            Phase::Initializing { .. } => InitializerState::Initializing,
            Phase::Ready(_) => InitializerState::Ready,
        }
    }

    /// The context, once ready
    pub fn context(&self) -> Option<Arc<B::Context>> {
        match &*self.phase.lock() {
            Phase::Ready(context) => Some(context.clone()),
            _ => None,
        }
    }

    /// Number of `initialize` calls so far
    pub fn install_count(&self) -> u64 {
        self.install_count.load(Ordering::SeqCst)
    }

    /// Number of bootstraps currently running (0 or 1)
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// The resolver shared with the bootstrap
    pub fn resolver(&self) -> &CapabilityResolver {
        &self.resolver
    }

    fn start_bootstrap(&self) -> SharedBootstrap<B::Context> {
        let bootstrap = self.bootstrap.clone();
        let resolver = self.resolver.clone();
        let subsystem = bootstrap.subsystem();

        async move {
            match bootstrap.bootstrap(&resolver).await {
                Ok(context) => Ok(Arc::new(context)),
                Err(err @ (RxError::Resolution { .. } | RxError::Initialization { .. })) => {
                    Err(err)
                }
                Err(other) => Err(RxError::initialization(subsystem, other.to_string())),
            }
        }
        .instrument(tracing::info_span!("bootstrap", subsystem))
        .boxed()
        .shared()
    }

    // Whichever waiter observes the outcome first moves the phase on; the
    // generation check keeps stale waiters from clobbering a later attempt.
    fn settle(&self, generation: u64, outcome: &RxResult<Arc<B::Context>>) {
        let subsystem = self.bootstrap.subsystem();
        let mut phase = self.phase.lock();
        let current = match &*phase {
            Phase::Initializing { generation, .. } => *generation,
            _ => return,
        };
        if current != generation {
            return;
        }

        *phase = match outcome {
            Ok(context) => {
                info!(subsystem, generation, "Subsystem ready");
                Phase::Ready(context.clone())
            }
            Err(err) => {
                warn!(subsystem, generation, error = %err, "Bootstrap failed");
                Phase::Uninitialized
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<B: Bootstrap> fmt::Debug for CoalescingInitializer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoalescingInitializer")
            .field("subsystem", &self.bootstrap.subsystem())
            .field("state", &self.state())
            .field("install_count", &self.install_count())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use crate::capability::{Capability, CapabilityRecord, ModuleLoader};
    use crate::configuration::SharedConfiguration;
    use futures::future::join_all;
    use std::sync::atomic::AtomicBool;
    use tokio::sync::Notify;

    struct StaticLoader;

    #[async_trait]
    impl ModuleLoader for StaticLoader {
        async fn load(&self, specifier: &str) -> RxResult<Capability> {
            Ok(Capability::new(specifier.to_string()))
        }
    }

    struct GatedBootstrap {
        gate: Arc<Notify>,
        runs: Arc<AtomicUsize>,
        fail_next: Arc<AtomicBool>,
    }

    #[derive(Debug)]
    struct TestContext {
        codec: String,
    }

    #[async_trait]
    impl Bootstrap for GatedBootstrap {
        type Context = TestContext;

        fn subsystem(&self) -> &'static str {
            "test"
        }

        async fn bootstrap(&self, resolver: &CapabilityResolver) -> RxResult<TestContext> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(RxError::storage("disk on fire"));
            }
            let codec = resolver.resolve("codec").await?;
            Ok(TestContext {
                codec: codec.get::<String>().unwrap_or_default(),
            })
        }
    }

    struct Fixture {
        init: CoalescingInitializer<GatedBootstrap>,
        gate: Arc<Notify>,
        runs: Arc<AtomicUsize>,
        fail_next: Arc<AtomicBool>,
    }

    fn fixture() -> Fixture {
        let gate = Arc::new(Notify::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let fail_next = Arc::new(AtomicBool::new(false));
        let resolver = CapabilityResolver::new(SharedConfiguration::new(Arc::new(StaticLoader)));
        let init = CoalescingInitializer::new(
            GatedBootstrap {
                gate: gate.clone(),
                runs: runs.clone(),
                fail_next: fail_next.clone(),
            },
            resolver,
        );
        Fixture {
            init,
            gate,
            runs,
            fail_next,
        }
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_bootstrap() {
        let fx = fixture();
        let callers = join_all((0..8).map(|_| fx.init.initialize(ConfigOverrides::new())));
        let release = async {
            tokio::task::yield_now().await;
            assert_eq!(fx.init.state(), InitializerState::Initializing);
            assert_eq!(fx.init.in_flight(), 1);
            fx.gate.notify_one();
        };

        let (results, ()) = tokio::join!(callers, release);
        let contexts: Vec<_> = results.into_iter().map(|r| r.unwrap()).collect();

        assert_eq!(fx.runs.load(Ordering::SeqCst), 1);
        assert!(contexts.iter().all(|c| Arc::ptr_eq(c, &contexts[0])));
        assert_eq!(contexts[0].codec, "codec");
        assert_eq!(fx.init.state(), InitializerState::Ready);
        assert_eq!(fx.init.install_count(), 8);
        assert_eq!(fx.init.in_flight(), 0);
    }

    #[tokio::test]
    async fn ready_reentry_skips_bootstrap_but_merges_overrides() {
        let fx = fixture();
        fx.gate.notify_one();
        let first = fx.init.initialize(ConfigOverrides::new()).await.unwrap();

        let second = fx
            .init
            .initialize(ConfigOverrides::new().dependency("later", CapabilityRecord::value(5u8)))
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fx.runs.load(Ordering::SeqCst), 1);
        assert!(fx.init.resolver().configuration().record("later").is_some());
        assert_eq!(fx.init.install_count(), 2);
        assert!(fx.init.context().is_some());
    }

    #[tokio::test]
    async fn failure_reaches_every_waiter_and_allows_retry() {
        let fx = fixture();
        fx.fail_next.store(true, Ordering::SeqCst);

        let early = fx.init.initialize(ConfigOverrides::new());
        let late = async {
            tokio::task::yield_now().await;
            let late = fx.init.initialize(ConfigOverrides::new());
            fx.gate.notify_one();
            late.await
        };
        let (early, late) = tokio::join!(early, late);

        assert_eq!(fx.runs.load(Ordering::SeqCst), 1);
        let early = early.unwrap_err();
        assert_eq!(early, late.unwrap_err());
        assert_matches!(early, RxError::Initialization { ref subsystem, .. } if subsystem == "test");
        assert_eq!(fx.init.state(), InitializerState::Uninitialized);
        assert_eq!(fx.init.in_flight(), 0);

        fx.gate.notify_one();
        let context = fx.init.initialize(ConfigOverrides::new()).await.unwrap();
        assert_eq!(context.codec, "codec");
        assert_eq!(fx.runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn resolution_errors_are_not_rewrapped() {
        let fx = fixture();
        fx.gate.notify_one();
        let err = fx
            .init
            .initialize(ConfigOverrides::new().dependency(
                "codec",
                CapabilityRecord::new(|| async { Err(RxError::not_found("codec")) }),
            ))
            .await
            .unwrap_err();

        assert_matches!(err, RxError::Resolution { ref name, .. } if name == "codec");
        assert_eq!(fx.init.state(), InitializerState::Uninitialized);
    }

    #[tokio::test]
    async fn dropped_winner_does_not_strand_waiters() {
        let fx = fixture();
        {
            let winner = fx.init.initialize(ConfigOverrides::new());
            futures::pin_mut!(winner);
            assert!(futures::poll!(winner.as_mut()).is_pending());
        }
        assert_eq!(fx.init.state(), InitializerState::Initializing);

        fx.gate.notify_one();
        let context = fx.init.initialize(ConfigOverrides::new()).await.unwrap();
        assert_eq!(context.codec, "codec");
        assert_eq!(fx.runs.load(Ordering::SeqCst), 1);
    }
}
