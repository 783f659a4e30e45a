//! Reliable publishing with linear backoff and dead-lettering.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use drift_core::emit;
use drift_core::metrics::events::{FailureStage, PublishRetried, TasksPublished};

use crate::dlq::DeadLetterQueue;
use crate::error::{BrokerError, PublishError};
use crate::queue::{Broker, TaskEnvelope};

/// Attempt budget and backoff step.
///
/// After a failed attempt with `remaining` attempts left (counting down from
/// `max_attempts`), the publisher sleeps `remaining * step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub step: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            step: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay(&self, remaining: u32) -> Duration {
        self.step * remaining
    }

    /// Time spent sleeping when every attempt fails.
    pub fn total(&self) -> Duration {
        (1..=self.max_attempts).map(|r| self.delay(r)).sum()
    }
}

/// How a publish ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Delivered { attempts: u32 },
    DeadLettered { attempts: u32, error: String },
}

/// Counters for one publisher's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub published: u64,
    pub dead_lettered: u64,
}

/// Publishes tasks to the primary queue, falling back to the dead-letter queue.
pub struct ReliablePublisher {
    broker: Arc<dyn Broker>,
    queue: String,
    dlq: Arc<DeadLetterQueue>,
    policy: BackoffPolicy,
    sender: String,
    published: AtomicU64,
    dead_lettered: AtomicU64,
}

impl ReliablePublisher {
    pub fn new(
        broker: Arc<dyn Broker>,
        queue: impl Into<String>,
        dlq: Arc<DeadLetterQueue>,
        policy: BackoffPolicy,
        sender: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            queue: queue.into(),
            dlq,
            policy,
            sender: sender.into(),
            published: AtomicU64::new(0),
            dead_lettered: AtomicU64::new(0),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Publish `task`, retrying transient failures.
    ///
    /// Only a failed dead-letter deposit is an error.
    pub async fn publish(&self, mut task: TaskEnvelope) -> Result<PublishOutcome, PublishError> {
        if task.data_sender.is_none() {
            task.data_sender = Some(self.sender.clone());
        }
        let body = task
            .to_vec()
            .map_err(|source| PublishError::Encode { source })?;

        let mut last_error: Option<BrokerError> = None;
        for attempt in 1..=self.policy.max_attempts {
            match self.broker.publish(&self.queue, body.clone()).await {
                Ok(()) => {
                    self.published.fetch_add(1, Ordering::Relaxed);
                    emit!(TasksPublished {
                        count: 1,
                        queue: self.queue.clone(),
                    });
                    debug!(queue = %self.queue, attempt, "Task published");
                    return Ok(PublishOutcome::Delivered { attempts: attempt });
                }
                Err(e) => {
                    let remaining = self.policy.max_attempts - attempt + 1;
                    let delay = self.policy.delay(remaining);
                    warn!(
                        queue = %self.queue,
                        attempt,
                        remaining,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "Publish failed, backing off"
                    );
                    emit!(PublishRetried {
                        remaining: remaining - 1,
                        queue: self.queue.clone(),
                    });
                    last_error = Some(e);
                    tokio::time::sleep(delay).await;
                }
            }
        }

        let attempts = self.policy.max_attempts;
        let error = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no publish attempts configured".to_string());
        self.dlq
            .deposit(task, &error, FailureStage::Publish)
            .await
            .map_err(|source| PublishError::DeadLetter {
                attempts,
                last_error: error.clone(),
                source,
            })?;
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
        Ok(PublishOutcome::DeadLettered { attempts, error })
    }

    pub fn stats(&self) -> PublishStats {
        PublishStats {
            published: self.published.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }

    /// Log the batch totals.
    pub fn report(&self, elapsed: Duration) {
        let stats = self.stats();
        info!(
            queue = %self.queue,
            published = stats.published,
            dead_lettered = stats.dead_lettered,
            elapsed_ms = elapsed.as_millis() as u64,
            "Publish batch complete"
        );
    }
}

/// Identity stamped as `data_sender`: the host name, or `unknown`.
pub fn default_sender() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::CanonicalRecord;
    use crate::queue::{MemoryBroker, QueueOptions};
    use tokio::time::Instant;

    async fn setup() -> (MemoryBroker, ReliablePublisher) {
        let broker = MemoryBroker::new();
        for q in ["primary", "dlq"] {
            broker
                .declare_queue(q, &QueueOptions::default())
                .await
                .unwrap();
        }
        let shared: Arc<dyn Broker> = Arc::new(broker.clone());
        let dlq = Arc::new(DeadLetterQueue::new(shared.clone(), "dlq", "loader"));
        let publisher =
            ReliablePublisher::new(shared, "primary", dlq, BackoffPolicy::default(), "loader");
        (broker, publisher)
    }

    fn task() -> TaskEnvelope {
        TaskEnvelope::new(CanonicalRecord::new("TEST", "P1"))
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (1..=5).rev().map(|r| policy.delay(r).as_secs()).collect();
        assert_eq!(delays, vec![25, 20, 15, 10, 5]);
        assert_eq!(policy.total(), Duration::from_secs(75));
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_first_try() {
        let (broker, publisher) = setup().await;

        let outcome = publisher.publish(task()).await.unwrap();
        assert_eq!(outcome, PublishOutcome::Delivered { attempts: 1 });

        let bodies = broker.ready("primary");
        let sent = TaskEnvelope::from_slice(&bodies[0]).unwrap();
        assert_eq!(sent.data_sender.as_deref(), Some("loader"));
        assert_eq!(publisher.stats().published, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_recovers_after_backoff() {
        let (broker, publisher) = setup().await;
        broker.fail_publishes("primary", 2, "connection reset");

        let start = Instant::now();
        let outcome = publisher.publish(task()).await.unwrap();
        assert_eq!(outcome, PublishOutcome::Delivered { attempts: 3 });
        assert_eq!(start.elapsed(), Duration::from_secs(45));
        assert_eq!(broker.ready("primary").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_exhausted_goes_to_dlq() {
        let (broker, publisher) = setup().await;
        broker.fail_publishes("primary", 5, "connection reset");

        let start = Instant::now();
        let outcome = publisher.publish(task()).await.unwrap();
        assert!(matches!(outcome, PublishOutcome::DeadLettered { attempts: 5, .. }));
        assert_eq!(start.elapsed(), Duration::from_secs(75));

        assert!(broker.ready("primary").is_empty());
        let dead = TaskEnvelope::from_slice(&broker.ready("dlq")[0]).unwrap();
        assert!(dead.error.unwrap().contains("connection reset"));
        assert_eq!(publisher.stats().dead_lettered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dlq_failure_is_error() {
        let (broker, publisher) = setup().await;
        broker.fail_publishes("primary", 5, "down");
        broker.fail_publishes("dlq", 1, "down");

        let err = publisher.publish(task()).await.unwrap_err();
        assert!(matches!(err, PublishError::DeadLetter { attempts: 5, .. }));
    }
}
