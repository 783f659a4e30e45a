//! Error types for configuration loading and runtime setup.

use snafu::prelude::*;

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Data source code is empty.
    #[snafu(display("data_source cannot be empty"))]
    EmptyDataSource,

    /// A queue name is empty.
    #[snafu(display("Queue name for '{which}' cannot be empty"))]
    EmptyQueueName { which: String },

    /// Primary and dead-letter queues collide.
    #[snafu(display("Primary and dead-letter queue are both '{name}'"))]
    QueueCollision { name: String },

    /// Queue priority outside the broker's supported range.
    #[snafu(display("Queue max_priority must be between 1 and 6, got {value}"))]
    InvalidPriority { value: u8 },

    /// A numeric setting that must be positive is zero.
    #[snafu(display("'{field}' must be greater than zero"))]
    ZeroValue { field: String },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML: {source}"))]
    YamlParse { source: serde_yaml::Error },

    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file {}: {source}", path.display()))]
    ReadFile {
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    /// Multiple configuration errors occurred.
    #[snafu(display("Multiple config errors:\n{}", errors.join("\n")))]
    MultipleErrors { errors: Vec<String> },
}

/// Errors that can occur during metrics initialization.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MetricsError {
    /// Failed to initialize Prometheus recorder.
    #[snafu(display("Failed to initialize Prometheus recorder"))]
    PrometheusInit {
        source: metrics_exporter_prometheus::BuildError,
    },

    /// Metrics server already initialized.
    #[snafu(display("Metrics server already initialized"))]
    AlreadyInitialized,

    /// Controller accessed before init.
    #[snafu(display("Metrics server not initialized"))]
    NotInitialized,
}

/// Errors that can occur before workers start running.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SetupError {
    /// Failed to parse metrics address.
    #[snafu(display("Failed to parse metrics address: {source}"))]
    AddressParse { source: std::net::AddrParseError },

    /// Failed to initialize metrics.
    #[snafu(display("Failed to initialize metrics: {source}"))]
    Metrics { source: MetricsError },
}
