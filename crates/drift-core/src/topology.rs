//! Worker orchestration.
//!
//! Runs a set of long-lived workers on a shared cancellation token, staggers
//! their start, and reports how each one ended.

use std::fmt::{self, Display};
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use snafu::ResultExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{MetricsConfig, RuntimeConfig};
use crate::error::{AddressParseSnafu, MetricsSnafu, SetupError};
use crate::signal::shutdown_signal;

/// Identifies one worker instance in logs and metrics, e.g. `consumer-2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerKey {
    role: &'static str,
    index: usize,
}

impl WorkerKey {
    pub fn new(role: &'static str, index: usize) -> Self {
        Self { role, index }
    }

    pub fn role(&self) -> &'static str {
        self.role
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

impl Display for WorkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.role, self.index)
    }
}

/// A long-running unit of work.
pub trait Worker: Send + 'static {
    type Error: std::error::Error + Send + 'static;

    fn key(&self) -> &WorkerKey;

    /// Run until the worker's shutdown token fires or a fatal error occurs.
    fn run(self) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Outcome counts from a [`WorkerRunner::run`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: usize,
    pub failed: usize,
    pub panicked: usize,
}

/// Spawns workers and waits for all of them.
pub struct WorkerRunner<W: Worker> {
    workers: Vec<W>,
    shutdown: CancellationToken,
    start_jitter_secs: u64,
    typetag: &'static str,
}

impl<W: Worker> WorkerRunner<W> {
    pub fn new(
        workers: Vec<W>,
        shutdown: CancellationToken,
        start_jitter_secs: u64,
        typetag: &'static str,
    ) -> Self {
        Self {
            workers,
            shutdown,
            start_jitter_secs,
            typetag,
        }
    }

    /// Cancel the shared token when the process receives a shutdown signal.
    pub fn spawn_shutdown_handler(&self) {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }

    /// Run all workers to completion.
    ///
    /// A worker that fails with a fatal error is logged and does not stop the
    /// others.
    pub async fn run(self) -> RunSummary {
        let mut handles: JoinSet<(WorkerKey, Result<(), W::Error>)> = JoinSet::new();
        let typetag = self.typetag;

        for worker in self.workers {
            let shutdown = self.shutdown.clone();
            let key = worker.key().clone();
            let start_jitter = random_jitter(self.start_jitter_secs);

            handles.spawn(async move {
                if !start_jitter.is_zero() {
                    info!(
                        target = %key,
                        jitter_ms = start_jitter.as_millis() as u64,
                        "Delaying {} start", typetag
                    );
                    if shutdown
                        .run_until_cancelled(tokio::time::sleep(start_jitter))
                        .await
                        .is_none()
                    {
                        return (key, Ok(()));
                    }
                }

                let result = worker.run().await;
                (key, result)
            });
        }

        info!("Spawned {} {} tasks", handles.len(), typetag);

        let mut summary = RunSummary::default();
        while let Some(result) = handles.join_next().await {
            match result {
                Ok((key, Ok(()))) => {
                    summary.completed += 1;
                    info!(target = %key, "{} stopped", typetag);
                }
                Ok((key, Err(e))) => {
                    summary.failed += 1;
                    error!(target = %key, error = %e, "{} failed", typetag);
                }
                Err(e) => {
                    summary.panicked += 1;
                    error!(error = %e, "{} task panicked", typetag);
                }
            }
        }

        info!("All {}s stopped", typetag);
        summary
    }
}

/// Start the metrics endpoint, then run the workers built by `create_workers`
/// until `shutdown` is cancelled (by the caller or by a process signal).
pub async fn run_workers<W, F>(
    metrics: &MetricsConfig,
    runtime: &RuntimeConfig,
    typetag: &'static str,
    shutdown: CancellationToken,
    create_workers: F,
) -> Result<RunSummary, SetupError>
where
    W: Worker,
    F: FnOnce(CancellationToken) -> Vec<W>,
{
    if metrics.enabled {
        let addr = metrics.address.parse().context(AddressParseSnafu)?;
        crate::init_metrics(addr).context(MetricsSnafu)?;
    }

    let workers = create_workers(shutdown.clone());

    let runner = WorkerRunner::new(workers, shutdown, runtime.start_jitter_secs, typetag);
    runner.spawn_shutdown_handler();
    Ok(runner.run().await)
}

/// Random duration in `[0, max_secs)`.
pub fn random_jitter(max_secs: u64) -> Duration {
    if max_secs > 0 {
        Duration::from_millis(rand::rng().random_range(0..max_secs * 1000))
    } else {
        Duration::ZERO
    }
}
