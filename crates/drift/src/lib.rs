//! drift: maps FollowTheMoney entity graphs into canonical resolution
//! records and delivers them through a work queue to a resolution engine.
//!
//! - `entity/` - Source entities and schema classification
//! - `mapping/` - Relationship index, record transformer, mapping driver
//! - `queue/` - Broker abstraction, task envelope, in-process broker
//! - `publisher` - Reliable publishing with backoff and dead-lettering
//! - `engine/` - Engine contracts, in-process engine, configuration lifecycle
//! - `consumer` - Work queue consumer with stale-config recovery and requeue
//! - `redo` - Redo backlog drainer
//! - `dlq` - Dead-letter queue and failure accounting
//! - `alert` - Alert channels
//! - `job` / `service` - Mapping jobs and worker wiring

pub mod alert;
pub mod cli;
pub mod config;
pub mod consumer;
pub mod dlq;
pub mod engine;
pub mod entity;
pub mod error;
pub mod job;
pub mod mapping;
pub mod publisher;
pub mod queue;
pub mod redo;
pub mod service;

pub use cli::{CliArgs, Command, execute};
pub use config::Config;
pub use error::{DriftError, FailureKind};
pub use job::{JobReport, MappingJob, write_records};
pub use service::{Service, ServiceWorker};

pub use drift_core::{MetricsConfig, RunSummary, init_tracing, shutdown_signal};
