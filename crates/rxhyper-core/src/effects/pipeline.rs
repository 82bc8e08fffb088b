//! Pipeline capability: the runtime that drives reactive forwarding

use futures::future::BoxFuture;
use std::time::Duration;

use crate::errors::RxResult;

/// Task spawning and timers backing every subscription and timed signal.
pub trait Pipeline: Send + Sync {
    /// Run a detached task to completion. Fails when the task cannot be
    /// scheduled; the task is dropped in that case.
    fn spawn(&self, task: BoxFuture<'static, ()>) -> RxResult<()>;

    /// Future that resolves after `duration`
    fn timer(&self, duration: Duration) -> BoxFuture<'static, ()>;
}
