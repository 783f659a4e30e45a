//! Internal events for drift metrics emission.
//!
//! Each struct is one measurable occurrence; `InternalEvent::emit` records the
//! matching Prometheus metric. Mapping events carry a `target` label (the data
//! source code), queue events carry the queue name.

use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    fn emit(self);
}

/// Stage at which a record or task was given up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    /// Entity line could not be parsed or transformed.
    Map,
    /// Publishing to the primary queue exhausted its attempts.
    Publish,
    /// Queue body was not a usable task.
    Decode,
    /// Engine submission exhausted its tries.
    Submit,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::Map => "map",
            FailureStage::Publish => "publish",
            FailureStage::Decode => "decode",
            FailureStage::Submit => "submit",
        }
    }
}

/// Attachment entities added to the relationship index.
pub struct EntitiesIndexed {
    pub count: u64,
    pub target: String,
}

impl InternalEvent for EntitiesIndexed {
    fn emit(self) {
        trace!(count = self.count, target = %self.target, "Entities indexed");
        counter!("drift_entities_indexed_total", "target" => self.target).increment(self.count);
    }
}

/// Why an entity produced no record.
#[derive(Debug, Clone, Copy)]
pub enum SkipReason {
    UnknownSchema,
    Deferred,
    Malformed,
}

impl SkipReason {
    fn as_str(&self) -> &'static str {
        match self {
            SkipReason::UnknownSchema => "unknown_schema",
            SkipReason::Deferred => "deferred",
            SkipReason::Malformed => "malformed",
        }
    }
}

/// Entities that were neither indexed nor transformed.
pub struct EntitiesSkipped {
    pub count: u64,
    pub reason: SkipReason,
    pub target: String,
}

impl InternalEvent for EntitiesSkipped {
    fn emit(self) {
        trace!(count = self.count, reason = self.reason.as_str(), target = %self.target, "Entities skipped");
        counter!(
            "drift_entities_skipped_total",
            "reason" => self.reason.as_str(),
            "target" => self.target
        )
        .increment(self.count);
    }
}

/// Principal entities turned into canonical records.
pub struct RecordsMapped {
    pub count: u64,
    pub target: String,
}

impl InternalEvent for RecordsMapped {
    fn emit(self) {
        trace!(count = self.count, target = %self.target, "Records mapped");
        counter!("drift_records_mapped_total", "target" => self.target).increment(self.count);
    }
}

/// Tasks accepted by the broker.
pub struct TasksPublished {
    pub count: u64,
    pub queue: String,
}

impl InternalEvent for TasksPublished {
    fn emit(self) {
        trace!(count = self.count, queue = %self.queue, "Tasks published");
        counter!("drift_tasks_published_total", "queue" => self.queue).increment(self.count);
    }
}

/// A failed publish attempt that will be retried.
pub struct PublishRetried {
    pub remaining: u32,
    pub queue: String,
}

impl InternalEvent for PublishRetried {
    fn emit(self) {
        trace!(remaining = self.remaining, queue = %self.queue, "Publish retried");
        counter!("drift_publish_retries_total", "queue" => self.queue).increment(1);
    }
}

/// A task deposited on the dead-letter queue.
pub struct TasksDeadLettered {
    pub stage: FailureStage,
    pub queue: String,
}

impl InternalEvent for TasksDeadLettered {
    fn emit(self) {
        trace!(stage = self.stage.as_str(), queue = %self.queue, "Task dead-lettered");
        counter!(
            "drift_tasks_dead_lettered_total",
            "stage" => self.stage.as_str(),
            "queue" => self.queue
        )
        .increment(1);
    }
}

/// Outcome of handing a task to the resolution engine.
#[derive(Debug, Clone, Copy)]
pub enum SubmitStatus {
    Success,
    RecoveredAfterReinit,
    Failed,
}

impl SubmitStatus {
    fn as_str(&self) -> &'static str {
        match self {
            SubmitStatus::Success => "success",
            SubmitStatus::RecoveredAfterReinit => "recovered",
            SubmitStatus::Failed => "failed",
        }
    }
}

/// One engine submission attempt and how long it took.
pub struct TaskSubmitted {
    pub status: SubmitStatus,
    pub duration: Duration,
}

impl InternalEvent for TaskSubmitted {
    fn emit(self) {
        trace!(status = self.status.as_str(), duration_ms = self.duration.as_millis(), "Task submitted");
        counter!("drift_tasks_submitted_total", "status" => self.status.as_str()).increment(1);
        histogram!("drift_engine_submit_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// A failed task scheduled for another try.
pub struct TaskRequeued {
    pub tries: u32,
}

impl InternalEvent for TaskRequeued {
    fn emit(self) {
        trace!(tries = self.tries, "Task requeued");
        counter!("drift_tasks_requeued_total").increment(1);
    }
}

/// The engine was switched to the default configuration.
pub struct EngineReinitialized {
    pub target: String,
}

impl InternalEvent for EngineReinitialized {
    fn emit(self) {
        trace!(target = %self.target, "Engine reinitialized");
        counter!("drift_engine_reinits_total", "target" => self.target).increment(1);
    }
}

/// A redo backlog item handed to the engine.
pub struct RedoProcessed {
    pub success: bool,
}

impl InternalEvent for RedoProcessed {
    fn emit(self) {
        let status = if self.success { "success" } else { "failed" };
        trace!(status, "Redo item processed");
        counter!("drift_redo_processed_total", "status" => status).increment(1);
    }
}

/// An alert raised on terminal task failure.
pub struct AlertRaised {
    pub delivered: bool,
}

impl InternalEvent for AlertRaised {
    fn emit(self) {
        let status = if self.delivered { "delivered" } else { "failed" };
        trace!(status, "Alert raised");
        counter!("drift_alerts_total", "status" => status).increment(1);
    }
}

/// Result type for polling iterations.
#[derive(Debug, Clone, Copy)]
pub enum IterationResultType {
    Processed,
    NoItems,
}

impl IterationResultType {
    fn as_str(&self) -> &'static str {
        match self {
            IterationResultType::Processed => "processed",
            IterationResultType::NoItems => "no_items",
        }
    }
}

/// Event emitted when a polling iteration completes.
pub struct IterationCompleted {
    pub service: &'static str,
    pub result: IterationResultType,
    pub target: String,
}

impl InternalEvent for IterationCompleted {
    fn emit(self) {
        trace!(service = self.service, result = self.result.as_str(), target = %self.target, "Iteration completed");
        counter!(
            "drift_iterations_total",
            "service" => self.service,
            "result" => self.result.as_str(),
            "target" => self.target
        )
        .increment(1);
    }
}

/// Duration of one polling iteration.
pub struct IterationDuration {
    pub service: &'static str,
    pub duration: Duration,
    pub target: String,
}

impl InternalEvent for IterationDuration {
    fn emit(self) {
        histogram!(
            "drift_iteration_duration_seconds",
            "service" => self.service,
            "target" => self.target
        )
        .record(self.duration.as_secs_f64());
    }
}
