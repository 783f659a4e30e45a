//! Redo drainer: works off the engine's internal backlog.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use drift_core::emit;
use drift_core::metrics::events::RedoProcessed;
use drift_core::{IterationResult, PollingProcessor, Worker, WorkerKey, run_polling_loop};

use crate::engine::EngineLifecycle;
use crate::error::WorkerError;

/// Polls the redo backlog and processes one item per iteration.
pub struct RedoDrainer {
    key: WorkerKey,
    lifecycle: Arc<EngineLifecycle>,
}

impl RedoDrainer {
    pub fn new(key: WorkerKey, lifecycle: Arc<EngineLifecycle>) -> Self {
        Self { key, lifecycle }
    }
}

#[async_trait]
impl PollingProcessor for RedoDrainer {
    type State = u64;
    type Error = WorkerError;

    async fn prepare(&mut self, _cold_start: bool) -> Result<Option<u64>, WorkerError> {
        match self.lifecycle.engine().count_redo_records().await {
            Ok(0) => Ok(None),
            Ok(count) => Ok(Some(count)),
            Err(e) => {
                warn!(target = %self.key, error = %e, "Failed to count redo records");
                Ok(None)
            }
        }
    }

    async fn process(&mut self, backlog: u64) -> Result<IterationResult, WorkerError> {
        match self.lifecycle.engine().process_redo_record().await {
            Ok(_) => {
                debug!(target = %self.key, backlog, "Redo record processed");
                emit!(RedoProcessed { success: true });
            }
            Err(e) => {
                warn!(target = %self.key, error = %e, "Redo processing failed");
                emit!(RedoProcessed { success: false });
                if let Err(e) = self.lifecycle.recover_if_stale().await {
                    warn!(target = %self.key, error = %e, "Configuration recovery failed");
                }
            }
        }
        Ok(IterationResult::ProcessedItems)
    }
}

/// One member of the redo pool.
pub struct RedoWorker {
    drainer: RedoDrainer,
    idle_poll: Duration,
    shutdown: CancellationToken,
}

impl RedoWorker {
    pub fn new(
        index: usize,
        lifecycle: Arc<EngineLifecycle>,
        idle_poll: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            drainer: RedoDrainer::new(WorkerKey::new("redo", index), lifecycle),
            idle_poll,
            shutdown,
        }
    }
}

impl Worker for RedoWorker {
    type Error = WorkerError;

    fn key(&self) -> &WorkerKey {
        &self.drainer.key
    }

    async fn run(mut self) -> Result<(), WorkerError> {
        let name = self.drainer.key.to_string();
        run_polling_loop(
            &mut self.drainer,
            self.idle_poll,
            self.shutdown,
            &name,
            "redo",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ConfigStore, MemoryEngine, ResolutionEngine};

    async fn bootstrapped() -> (MemoryEngine, Arc<EngineLifecycle>) {
        let engine = MemoryEngine::new();
        let lifecycle = Arc::new(EngineLifecycle::new(
            Arc::new(engine.clone()),
            Arc::new(engine.clone()),
        ));
        lifecycle.bootstrap().await.unwrap();
        (engine, lifecycle)
    }

    #[tokio::test]
    async fn test_idle_when_backlog_empty() {
        let (engine, lifecycle) = bootstrapped().await;
        let mut drainer = RedoDrainer::new(WorkerKey::new("redo", 0), lifecycle);
        assert_eq!(drainer.prepare(true).await.unwrap(), None);

        engine.fail_next_count(1);
        engine.push_redo("r1");
        assert_eq!(drainer.prepare(false).await.unwrap(), None);
        assert_eq!(drainer.prepare(false).await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn test_failure_triggers_recovery() {
        let (engine, lifecycle) = bootstrapped().await;
        let default = engine.default_config_id().await.unwrap().unwrap();
        let stale = engine.add_config(r#"{"DATA_SOURCES":[]}"#, "old").await.unwrap();
        engine.set_active(stale);
        engine.push_redo("r1");
        engine.fail_next_redo(1);

        let mut drainer = RedoDrainer::new(WorkerKey::new("redo", 0), lifecycle);
        let result = drainer.process(1).await.unwrap();
        assert_eq!(result, IterationResult::ProcessedItems);
        assert_eq!(engine.active_config_id().await.unwrap(), default);
        assert_eq!(engine.redo_pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_drains_backlog() {
        let (engine, lifecycle) = bootstrapped().await;
        for i in 0..3 {
            engine.push_redo(format!("r{i}"));
        }
        let shutdown = CancellationToken::new();
        let worker = RedoWorker::new(0, lifecycle, Duration::from_secs(10), shutdown.clone());
        let handle = tokio::spawn(worker.run());

        while engine.redo_pending() > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        shutdown.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(engine.count_redo_records().await.unwrap(), 0);
    }
}
