//! Resolution consumer: work queue to engine.
//!
//! Each delivery is submitted to the engine, with one retry after a stale
//! configuration is recovered. Failed tasks travel back to the primary queue
//! as new publishes with `tries` incremented, until they reach `max_tries`
//! and are dead-lettered with an alert. Every delivery is acknowledged once,
//! after it has been routed. A requeued delivery stays unacknowledged until
//! its re-publish has landed, so a worker that dies during the requeue delay
//! leaves the task with the broker.

use snafu::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use drift_core::emit;
use drift_core::metrics::events::{FailureStage, SubmitStatus, TaskRequeued, TaskSubmitted};
use drift_core::{Worker, WorkerKey};

use crate::alert::{AlertChannel, Severity};
use crate::dlq::DeadLetterQueue;
use crate::engine::{EngineLifecycle, Recovery};
use crate::error::{
    AckSnafu, ConsumeSnafu, EngineError, FailureKind, PublishError, WorkerError,
};
use crate::publisher::{PublishOutcome, ReliablePublisher};
use crate::queue::{Broker, Delivery, TaskEnvelope};

/// Per-consumer knobs.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub queue: String,
    pub prefetch: u16,
    pub max_tries: u32,
    pub requeue_delay: Duration,
    pub daemon_name: String,
}

/// Where a delivery went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Submitted,
    /// Submitted on the retry after a configuration reinit.
    Recovered,
    Requeued { tries: u32 },
    DeadLettered,
}

/// A scheduled re-publish and the delivery it settles.
type PendingRequeue = (Delivery, Result<PublishOutcome, PublishError>);

/// A failed submission and how it should be handled.
struct SubmitFailure {
    error: EngineError,
    kind: FailureKind,
}

enum Step {
    Settled(Result<PendingRequeue, JoinError>),
    Received(Delivery),
}

pub struct ResolutionConsumer {
    key: WorkerKey,
    broker: Arc<dyn Broker>,
    lifecycle: Arc<EngineLifecycle>,
    publisher: Arc<ReliablePublisher>,
    dlq: Arc<DeadLetterQueue>,
    alert: Arc<dyn AlertChannel>,
    settings: ConsumerSettings,
    shutdown: CancellationToken,
    pending: JoinSet<PendingRequeue>,
}

impl ResolutionConsumer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        index: usize,
        broker: Arc<dyn Broker>,
        lifecycle: Arc<EngineLifecycle>,
        publisher: Arc<ReliablePublisher>,
        dlq: Arc<DeadLetterQueue>,
        alert: Arc<dyn AlertChannel>,
        settings: ConsumerSettings,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            key: WorkerKey::new("consumer", index),
            broker,
            lifecycle,
            publisher,
            dlq,
            alert,
            settings,
            shutdown,
            pending: JoinSet::new(),
        }
    }

    /// Scheduled re-publishes not yet finished. Each holds one unacknowledged
    /// delivery.
    pub fn pending_requeues(&self) -> usize {
        self.pending.len()
    }

    /// Submit one delivery and route it on failure. Does not acknowledge; a
    /// `Requeued` delivery is handed back by [`Self::drain_requeues`] or the
    /// run loop once its re-publish completes.
    pub async fn handle(&mut self, delivery: &Delivery) -> Result<Disposition, WorkerError> {
        let task = match TaskEnvelope::from_slice(&delivery.body) {
            Ok(task) => task,
            Err(e) => {
                let task = TaskEnvelope::undecodable(&delivery.body);
                return self.give_up(task, e.to_string(), FailureStage::Decode).await;
            }
        };
        let ids = task
            .data_source()
            .and_then(|ds| Ok((ds.to_string(), task.record_id()?.to_string())));
        let (data_source, record_id) = match ids {
            Ok(ids) => ids,
            Err(e) => return self.give_up(task, e.to_string(), FailureStage::Decode).await,
        };
        let record = match task.record_json() {
            Ok(record) => record,
            Err(e) => return self.give_up(task, e.to_string(), FailureStage::Decode).await,
        };

        let failure = match self.submit(&data_source, &record_id, &record).await {
            Ok(disposition) => return Ok(disposition),
            Err(failure) => failure,
        };

        let mut task = task;
        let error = failure.error.to_string();
        let tries = task.record_failure(error.clone());
        match self.classify(failure.kind, tries) {
            FailureKind::PermanentData => {
                warn!(target = %self.key, record_id = %record_id, error = %error, "Record rejected by engine");
                self.give_up(task, error, FailureStage::Submit).await
            }
            FailureKind::ExhaustedRetries => {
                warn!(target = %self.key, record_id = %record_id, tries, error = %error, "Retries exhausted");
                self.give_up(task, error, FailureStage::Submit).await
            }
            kind => {
                self.schedule_requeue(task, delivery.clone());
                warn!(target = %self.key, record_id = %record_id, tries, ?kind, error = %error, "Submission failed, requeueing");
                emit!(TaskRequeued { tries });
                Ok(Disposition::Requeued { tries })
            }
        }
    }

    /// Escalate a locally handled failure once the task has used up its tries.
    fn classify(&self, kind: FailureKind, tries: u32) -> FailureKind {
        match kind {
            FailureKind::PermanentData => kind,
            _ if tries >= self.settings.max_tries => FailureKind::ExhaustedRetries,
            _ => kind,
        }
    }

    /// `add_record`, retried once if the engine turns out to be running a stale
    /// configuration. The first error is the one returned, classified as
    /// `ConfigStale` when a reinit happened.
    async fn submit(
        &self,
        data_source: &str,
        record_id: &str,
        record: &str,
    ) -> Result<Disposition, SubmitFailure> {
        let engine = self.lifecycle.engine();
        let start = Instant::now();

        let Err(original) = engine.add_record(data_source, record_id, record).await else {
            emit!(TaskSubmitted {
                status: SubmitStatus::Success,
                duration: start.elapsed(),
            });
            debug!(target = %self.key, record_id = %record_id, "Record submitted");
            return Ok(Disposition::Submitted);
        };

        let mut kind = original.kind();
        match self.lifecycle.recover_if_stale().await {
            Ok(Recovery::Reinitialized(config_id)) => {
                if kind == FailureKind::TransientIo {
                    kind = FailureKind::ConfigStale;
                }
                match engine.add_record(data_source, record_id, record).await {
                    Ok(()) => {
                        info!(target = %self.key, record_id = %record_id, config_id, "Record submitted after reinit");
                        emit!(TaskSubmitted {
                            status: SubmitStatus::RecoveredAfterReinit,
                            duration: start.elapsed(),
                        });
                        return Ok(Disposition::Recovered);
                    }
                    Err(e) => {
                        warn!(target = %self.key, record_id = %record_id, error = %e, "Retry after reinit failed");
                    }
                }
            }
            Ok(Recovery::Current) => {}
            Err(e) => {
                warn!(target = %self.key, error = %e, "Configuration recovery failed");
            }
        }

        emit!(TaskSubmitted {
            status: SubmitStatus::Failed,
            duration: start.elapsed(),
        });
        Err(SubmitFailure {
            error: original,
            kind,
        })
    }

    fn schedule_requeue(&mut self, task: TaskEnvelope, delivery: Delivery) {
        let publisher = Arc::clone(&self.publisher);
        let delay = self.settings.requeue_delay;
        self.pending.spawn(async move {
            tokio::time::sleep(delay).await;
            (delivery, publisher.publish(task).await)
        });
    }

    async fn give_up(
        &self,
        task: TaskEnvelope,
        error: String,
        stage: FailureStage,
    ) -> Result<Disposition, WorkerError> {
        let attempts = task.tries();
        if let Err(source) = self.dlq.deposit(task, &error, stage).await {
            return Err(WorkerError::Route {
                source: PublishError::DeadLetter {
                    attempts,
                    last_error: error,
                    source,
                },
            });
        }

        let title = format!("{} Error!", self.settings.daemon_name);
        self.alert
            .alert(&title, &format!("Error: {error}"), Severity::Error)
            .await;
        Ok(Disposition::DeadLettered)
    }

    /// The delivery a finished re-publish releases for acknowledgement.
    fn settle(&self, finished: Result<PendingRequeue, JoinError>) -> Result<Delivery, WorkerError> {
        let (delivery, outcome) = finished.map_err(|source| WorkerError::Requeue { source })?;
        match outcome {
            Ok(PublishOutcome::Delivered { .. }) => Ok(delivery),
            Ok(PublishOutcome::DeadLettered { error, .. }) => {
                warn!(target = %self.key, error = %error, "Requeue publish dead-lettered");
                Ok(delivery)
            }
            Err(source) => Err(WorkerError::Route { source }),
        }
    }

    /// Wait for every scheduled re-publish and return the deliveries that are
    /// now safe to acknowledge.
    pub async fn drain_requeues(&mut self) -> Result<Vec<Delivery>, WorkerError> {
        if !self.pending.is_empty() {
            info!(target = %self.key, pending = self.pending.len(), "Waiting for scheduled requeues");
        }
        let mut settled = Vec::with_capacity(self.pending.len());
        while let Some(finished) = self.pending.join_next().await {
            settled.push(self.settle(finished)?);
        }
        Ok(settled)
    }
}

impl Worker for ResolutionConsumer {
    type Error = WorkerError;

    fn key(&self) -> &WorkerKey {
        &self.key
    }

    async fn run(mut self) -> Result<(), WorkerError> {
        let queue = self.settings.queue.clone();
        let mut subscription = self
            .broker
            .subscribe(&queue, self.settings.prefetch)
            .await
            .context(ConsumeSnafu { queue: &queue })?;
        info!(target = %self.key, queue, "Consuming");
        let window = usize::from(self.settings.prefetch.max(1));

        loop {
            let has_room = self.pending.len() < window;
            let step = tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    info!(target = %self.key, "Shutdown requested");
                    break;
                }

                Some(finished) = self.pending.join_next(), if !self.pending.is_empty() => {
                    Step::Settled(finished)
                }

                delivery = subscription.next(), if has_room => {
                    Step::Received(delivery.context(ConsumeSnafu { queue: &queue })?)
                }
            };

            match step {
                Step::Settled(finished) => {
                    let delivery = self.settle(finished)?;
                    subscription.ack(&delivery).await.context(AckSnafu)?;
                }
                Step::Received(delivery) => {
                    if !matches!(self.handle(&delivery).await?, Disposition::Requeued { .. }) {
                        subscription.ack(&delivery).await.context(AckSnafu)?;
                    }
                }
            }
        }

        for delivery in self.drain_requeues().await? {
            subscription.ack(&delivery).await.context(AckSnafu)?;
        }
        Ok(())
    }
}
