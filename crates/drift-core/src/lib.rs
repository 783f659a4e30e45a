//! drift-core: runtime plumbing shared by the drift workers.
//!
//! - `config/` - YAML loading with environment variable interpolation
//! - `metrics/` - Prometheus metrics infrastructure and internal events
//! - `topology` - Worker orchestration with jittered starts and graceful shutdown
//! - `polling` - Cooperative polling loop trait and runner
//! - `signal` - Signal handling for graceful shutdown
//! - `error` - Setup and configuration error types

pub mod config;
pub mod error;
pub mod metrics;
pub mod polling;
pub mod signal;
pub mod topology;
pub mod tracing;

pub use config::{
    InterpolationResult, MetricsConfig, RuntimeConfig, interpolate, load_yaml, parse_yaml,
};
pub use error::{ConfigError, MetricsError, SetupError};
pub use metrics::{
    DEFAULT_METRICS_ADDR, MetricsController, init_global as init_metrics,
    init_test as init_metrics_test,
};
pub use polling::{IterationResult, PollingProcessor, run_polling_loop};
pub use signal::shutdown_signal;
pub use topology::{RunSummary, Worker, WorkerKey, WorkerRunner, random_jitter, run_workers};
pub use tracing::init_tracing;
