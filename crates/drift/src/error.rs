//! Error types for the drift pipeline.
//!
//! Every error maps onto a [`FailureKind`], which decides how the owning
//! component reacts: retry locally, recover the engine configuration,
//! dead-letter the task, or stop the worker.

use snafu::prelude::*;

pub use drift_core::error::{ConfigError, SetupError};

/// How a failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Broker or engine call failed; retrying may help.
    TransientIo,
    /// Engine's active configuration differs from the default; reinit first.
    ConfigStale,
    /// The record itself is unusable; retrying cannot help.
    PermanentData,
    /// The retry budget for one task is spent.
    ExhaustedRetries,
    /// The worker cannot continue.
    Fatal,
}

/// Errors raised while reading a single entity line.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EntityError {
    /// Line is not a JSON entity object.
    #[snafu(display("Line {line}: invalid entity JSON: {source}"))]
    InvalidJson {
        line: usize,
        source: serde_json::Error,
    },

    /// A required top-level field is missing or empty.
    #[snafu(display("Line {line}: entity has no '{field}'"))]
    MissingField { line: usize, field: &'static str },
}

/// Errors raised while indexing, transforming or emitting records.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MappingError {
    /// A malformed entity line.
    #[snafu(display("{source}"))]
    Entity { source: EntityError },

    /// The transformer was handed something that is not a principal entity.
    #[snafu(display("Entity '{id}' has schema '{schema}', which does not produce a record"))]
    NotPrincipal { id: String, schema: String },

    /// Failed to open or read the source file.
    #[snafu(display("Failed to read {path}: {source}"))]
    ReadSource {
        path: String,
        source: std::io::Error,
    },

    /// Streaming mode saw an attachment after the principal it refers to.
    #[snafu(display(
        "Attachment '{attachment}' refers to '{subject}', which was already emitted; \
         use two_pass ordering for this input"
    ))]
    OrderingViolation { attachment: String, subject: String },

    /// Too many malformed lines.
    #[snafu(display("Max failures ({count}) reached, stopping mapping job"))]
    MaxFailures { count: usize },

    /// Failed to serialize a record.
    #[snafu(display("Failed to serialize record: {source}"))]
    SerializeRecord { source: serde_json::Error },

    /// Failed to write records to the offline output.
    #[snafu(display("Failed to write mapped records: {source}"))]
    WriteOutput { source: std::io::Error },

    /// Publishing a record failed beyond recovery.
    #[snafu(display("Failed to deliver record: {source}"))]
    Deliver { source: PublishError },

    /// Registering the data source with the engine failed.
    #[snafu(display("Failed to register data source: {source}"))]
    Register { source: EngineError },

    /// The publishing side stopped taking records.
    #[snafu(display("Record delivery stopped before mapping finished"))]
    SinkClosed,

    /// The blocking indexing task panicked or was cancelled.
    #[snafu(display("Mapping task did not complete: {source}"))]
    Join { source: tokio::task::JoinError },
}

impl MappingError {
    pub fn kind(&self) -> FailureKind {
        match self {
            MappingError::Entity { .. } | MappingError::NotPrincipal { .. } => {
                FailureKind::PermanentData
            }
            MappingError::ReadSource { .. } | MappingError::WriteOutput { .. } => {
                FailureKind::TransientIo
            }
            MappingError::Deliver { source } => source.kind(),
            MappingError::Register { source } => source.kind(),
            _ => FailureKind::Fatal,
        }
    }
}

/// Errors raised by a work-queue broker.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum BrokerError {
    /// The broker refused or dropped the operation.
    #[snafu(display("Broker unavailable for queue '{queue}': {message}"))]
    Unavailable { queue: String, message: String },

    /// The queue was never declared.
    #[snafu(display("Queue '{queue}' is not declared"))]
    UnknownQueue { queue: String },

    /// Redeclaring a queue with different arguments.
    #[snafu(display("Queue '{queue}' already declared with different arguments"))]
    QueueMismatch { queue: String },

    /// Ack for a delivery that is not outstanding.
    #[snafu(display("Delivery {tag} on queue '{queue}' is not awaiting acknowledgement"))]
    UnknownDelivery { queue: String, tag: u64 },

    /// More deliveries requested than the prefetch window allows.
    #[snafu(display("Prefetch window of {prefetch} exhausted on queue '{queue}'"))]
    PrefetchExhausted { queue: String, prefetch: u16 },

    /// The broker has been closed.
    #[snafu(display("Broker closed"))]
    Closed,
}

impl BrokerError {
    pub fn kind(&self) -> FailureKind {
        match self {
            BrokerError::Unavailable { .. } => FailureKind::TransientIo,
            _ => FailureKind::Fatal,
        }
    }
}

/// Errors raised while decoding a queue body into a task.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TaskError {
    /// Body is not a JSON object.
    #[snafu(display("Task body is not a JSON object: {source}"))]
    InvalidBody { source: serde_json::Error },

    /// A required record key is missing or not a string.
    #[snafu(display("Task has no string '{key}'"))]
    MissingKey { key: &'static str },
}

/// Errors raised by the resolution engine or its configuration store.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EngineError {
    /// An engine call failed.
    #[snafu(display("Engine call '{operation}' failed: {message}"))]
    Call {
        operation: &'static str,
        message: String,
    },

    /// The engine rejected the record contents.
    #[snafu(display("Engine rejected record: {message}"))]
    BadInput { message: String },

    /// The data source already exists in the configuration.
    #[snafu(display("Data source '{code}' already exists"))]
    DataSourceExists { code: String },

    /// The configuration store has no entry for this id.
    #[snafu(display("Configuration {config_id} not found"))]
    UnknownConfig { config_id: u64 },

    /// No default configuration has been registered.
    #[snafu(display("No default configuration is registered"))]
    NoDefaultConfig,

    /// The configuration handle is no longer open.
    #[snafu(display("Configuration handle {handle} is not open"))]
    InvalidHandle { handle: u64 },

    /// A configuration document is not valid JSON.
    #[snafu(display("Malformed configuration document: {source}"))]
    MalformedConfig { source: serde_json::Error },

    /// Reading or writing the persisted configuration failed.
    #[snafu(display("Failed to access configuration file {path}: {source}"))]
    ConfigFile {
        path: String,
        source: std::io::Error,
    },
}

impl EngineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            EngineError::Call { .. } => FailureKind::TransientIo,
            EngineError::BadInput { .. } => FailureKind::PermanentData,
            EngineError::DataSourceExists { .. } => FailureKind::PermanentData,
            _ => FailureKind::Fatal,
        }
    }
}

/// Errors raised by the reliable publisher.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum PublishError {
    /// The task could not be encoded.
    #[snafu(display("Failed to encode task: {source}"))]
    Encode { source: serde_json::Error },

    /// The dead-letter deposit itself failed.
    #[snafu(display(
        "Failed to dead-letter task after {attempts} attempts ({last_error}): {source}"
    ))]
    DeadLetter {
        attempts: u32,
        last_error: String,
        source: BrokerError,
    },
}

impl PublishError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PublishError::Encode { .. } => FailureKind::PermanentData,
            PublishError::DeadLetter { .. } => FailureKind::Fatal,
        }
    }
}

/// Errors raised while delivering an alert.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AlertError {
    /// Failed to build the HTTP client.
    #[snafu(display("Failed to build alert client: {source}"))]
    Client { source: reqwest::Error },

    /// The webhook request failed.
    #[snafu(display("Alert request failed: {source}"))]
    Request { source: reqwest::Error },

    /// The webhook answered with a non-success status.
    #[snafu(display("Alert webhook returned status {status}"))]
    Status { status: u16 },
}

/// Errors that end a worker.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum WorkerError {
    /// Receiving from the work queue failed.
    #[snafu(display("Failed to consume from '{queue}': {source}"))]
    Consume { queue: String, source: BrokerError },

    /// Acknowledging a delivery failed.
    #[snafu(display("Failed to acknowledge delivery: {source}"))]
    Ack { source: BrokerError },

    /// A requeue or dead-letter publish failed.
    #[snafu(display("Failed to route failed task: {source}"))]
    Route { source: PublishError },

    /// Engine bootstrap or configuration persistence failed.
    #[snafu(display("Engine lifecycle failure: {source}"))]
    Lifecycle { source: EngineError },

    /// A scheduled requeue task panicked.
    #[snafu(display("Scheduled requeue did not complete: {source}"))]
    Requeue { source: tokio::task::JoinError },
}

impl WorkerError {
    pub fn kind(&self) -> FailureKind {
        FailureKind::Fatal
    }
}

/// Top-level error for the drift binary.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum DriftError {
    #[snafu(display("Configuration error: {source}"))]
    Config { source: ConfigError },

    #[snafu(display("Setup error: {source}"))]
    Setup { source: SetupError },

    #[snafu(display("Mapping error: {source}"))]
    Mapping { source: MappingError },

    #[snafu(display("Engine error: {source}"))]
    Engine { source: EngineError },

    #[snafu(display("Worker error: {source}"))]
    Worker { source: WorkerError },

    #[snafu(display("Broker error: {source}"))]
    Broker { source: BrokerError },

    #[snafu(display("Alert setup error: {source}"))]
    Alert { source: AlertError },
}

impl From<ConfigError> for DriftError {
    fn from(source: ConfigError) -> Self {
        DriftError::Config { source }
    }
}

impl From<SetupError> for DriftError {
    fn from(source: SetupError) -> Self {
        DriftError::Setup { source }
    }
}

impl From<MappingError> for DriftError {
    fn from(source: MappingError) -> Self {
        DriftError::Mapping { source }
    }
}

impl From<EngineError> for DriftError {
    fn from(source: EngineError) -> Self {
        DriftError::Engine { source }
    }
}

impl From<BrokerError> for DriftError {
    fn from(source: BrokerError) -> Self {
        DriftError::Broker { source }
    }
}

impl From<AlertError> for DriftError {
    fn from(source: AlertError) -> Self {
        DriftError::Alert { source }
    }
}

impl From<WorkerError> for DriftError {
    fn from(source: WorkerError) -> Self {
        DriftError::Worker { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_outage_is_transient() {
        let err = BrokerError::Unavailable {
            queue: "load_senzing_q".to_string(),
            message: "connection reset".to_string(),
        };
        assert_eq!(err.kind(), FailureKind::TransientIo);
        assert_eq!(BrokerError::Closed.kind(), FailureKind::Fatal);
    }

    #[test]
    fn test_dead_letter_failure_is_fatal() {
        let err = PublishError::DeadLetter {
            attempts: 5,
            last_error: "timeout".to_string(),
            source: BrokerError::Closed,
        };
        assert_eq!(err.kind(), FailureKind::Fatal);
        assert!(err.to_string().contains("after 5 attempts"));
    }

    #[test]
    fn test_mapping_kind_follows_source() {
        let err = MappingError::Register {
            source: EngineError::Call {
                operation: "add_config",
                message: "busy".to_string(),
            },
        };
        assert_eq!(err.kind(), FailureKind::TransientIo);

        let err = MappingError::NotPrincipal {
            id: "addr-1".to_string(),
            schema: "Address".to_string(),
        };
        assert_eq!(err.kind(), FailureKind::PermanentData);
    }
}
