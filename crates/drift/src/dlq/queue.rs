//! Dead-letter queue on the broker.

use chrono::Utc;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use drift_core::emit;
use drift_core::metrics::events::{FailureStage, TasksDeadLettered};

use super::FailureStats;
use crate::error::BrokerError;
use crate::queue::{Broker, TaskEnvelope};

/// Publishes given-up tasks to the dead-letter queue.
pub struct DeadLetterQueue {
    broker: Arc<dyn Broker>,
    queue: String,
    daemon_name: String,
    stats: Mutex<FailureStats>,
}

impl DeadLetterQueue {
    pub fn new(broker: Arc<dyn Broker>, queue: impl Into<String>, daemon_name: impl Into<String>) -> Self {
        Self {
            broker,
            queue: queue.into(),
            daemon_name: daemon_name.into(),
            stats: Mutex::new(FailureStats::default()),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Stamp `task` with `error`, this daemon and the current time, then publish it.
    pub async fn deposit(
        &self,
        mut task: TaskEnvelope,
        error: &str,
        stage: FailureStage,
    ) -> Result<(), BrokerError> {
        task.error = Some(error.to_string());
        task.mark_dead(&self.daemon_name, Utc::now());

        let body = task.to_vec().map_err(|e| BrokerError::Unavailable {
            queue: self.queue.clone(),
            message: format!("cannot encode dead letter: {e}"),
        })?;
        self.broker.publish(&self.queue, body).await?;

        warn!(
            queue = %self.queue,
            stage = stage.as_str(),
            tries = task.tries(),
            error,
            "Task dead-lettered"
        );
        emit!(TasksDeadLettered {
            stage,
            queue: self.queue.clone(),
        });
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .increment(stage);
        Ok(())
    }

    pub fn stats(&self) -> FailureStats {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Log the totals deposited by this process.
    pub fn finalize(&self) {
        let stats = self.stats();
        if stats.total() > 0 {
            info!(
                "DLQ '{}': {} tasks dead-lettered (publish={}, decode={}, submit={})",
                self.queue,
                stats.total(),
                stats.publish,
                stats.decode,
                stats.submit
            );
        }
    }
}
