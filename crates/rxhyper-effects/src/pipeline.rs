//! Tokio-backed pipeline handler

use futures::future::BoxFuture;
use futures::FutureExt;
use rxhyper_core::{Pipeline, RxError, RxResult};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::warn;

/// Spawns forwarding tasks on the ambient Tokio runtime
#[derive(Debug, Clone, Default)]
pub struct TokioPipeline {
    handle: Option<Handle>,
}

impl TokioPipeline {
    /// Pipeline that spawns on whichever runtime is current at spawn time
    pub fn new() -> Self {
        Self { handle: None }
    }

    /// Pipeline pinned to a specific runtime
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }
}

impl Pipeline for TokioPipeline {
    fn spawn(&self, task: BoxFuture<'static, ()>) -> RxResult<()> {
        let handle = match &self.handle {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|err| {
                warn!(error = %err, "No Tokio runtime available for pipeline task");
                RxError::usage(format!("Pipeline task needs a Tokio runtime: {err}"))
            })?,
        };
        handle.spawn(task);
        Ok(())
    }

    fn timer(&self, duration: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(duration).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn spawned_task_runs() {
        let pipeline = TokioPipeline::new();
        let (tx, rx) = oneshot::channel();
        pipeline.spawn(
            async move {
                let _ = tx.send(7u8);
            }
            .boxed(),
        )
        .unwrap();
        assert_eq!(rx.await.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_waits_for_duration() {
        let pipeline = TokioPipeline::new();
        let start = tokio::time::Instant::now();
        pipeline.timer(Duration::from_millis(6_000)).await;
        assert!(start.elapsed() >= Duration::from_millis(6_000));
    }

    #[test]
    fn spawn_without_runtime_fails() {
        let (tx, mut rx) = oneshot::channel::<()>();
        let result = TokioPipeline::new().spawn(
            async move {
                let _ = tx.send(());
            }
            .boxed(),
        );
        assert_matches!(result, Err(RxError::Usage { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn pinned_handle_spawns_from_any_thread() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let pipeline = TokioPipeline::with_handle(runtime.handle().clone());
        let (tx, rx) = oneshot::channel();
        pipeline
            .spawn(
                async move {
                    let _ = tx.send(3u8);
                }
                .boxed(),
            )
            .unwrap();
        assert_eq!(runtime.block_on(rx).unwrap(), 3);
    }
}
