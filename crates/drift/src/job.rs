//! Mapping jobs: one source file under one data source code.
//!
//! [`MappingJob`] registers the data source with the engine and publishes
//! every record through the reliable publisher. [`write_records`] is the
//! offline route and writes NDJSON instead.

use snafu::prelude::*;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::info;

use crate::engine::{EngineLifecycle, Registration};
use crate::error::{
    JoinSnafu, MappingError, RegisterSnafu, SerializeRecordSnafu, WriteOutputSnafu,
};
use crate::mapping::{CanonicalRecord, EntitySource, Mapper, MappingOptions, MappingReport};
use crate::publisher::ReliablePublisher;
use crate::queue::TaskEnvelope;

/// Records buffered between the mapper thread and the publisher.
const RECORD_BUFFER: usize = 1024;

/// Outcome of a published mapping job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub data_source: String,
    pub registration: Registration,
    pub mapping: MappingReport,
    pub published: u64,
    pub dead_lettered: u64,
    pub elapsed: Duration,
}

pub struct MappingJob {
    lifecycle: Arc<EngineLifecycle>,
    publisher: Arc<ReliablePublisher>,
    options: MappingOptions,
}

impl MappingJob {
    pub fn new(
        lifecycle: Arc<EngineLifecycle>,
        publisher: Arc<ReliablePublisher>,
        options: MappingOptions,
    ) -> Self {
        Self {
            lifecycle,
            publisher,
            options,
        }
    }

    /// Register `data_source`, map `source` on a blocking thread and publish
    /// each record as it is produced.
    pub async fn run<S>(&self, source: S, data_source: &str) -> Result<JobReport, MappingError>
    where
        S: EntitySource + Send + 'static,
    {
        let start = Instant::now();
        let code = data_source.trim().to_uppercase();
        let registration = self
            .lifecycle
            .register_data_source(&code)
            .await
            .context(RegisterSnafu)?;

        let (tx, mut rx) = mpsc::channel::<CanonicalRecord>(RECORD_BUFFER);
        let options = self.options.clone();
        let mapper_code = code.clone();
        let mapper = tokio::task::spawn_blocking(move || {
            Mapper::new(source, &mapper_code, options).run(|record| {
                tx.blocking_send(record).map_err(|_| MappingError::SinkClosed)
            })
        });

        let before = self.publisher.stats();
        let mut delivery_failure = None;
        while let Some(record) = rx.recv().await {
            if let Err(source) = self.publisher.publish(TaskEnvelope::new(record)).await {
                delivery_failure = Some(source);
                break;
            }
        }
        drop(rx);

        let mapped = mapper.await.context(JoinSnafu)?;
        if let Some(source) = delivery_failure {
            return Err(MappingError::Deliver { source });
        }
        let mapping = mapped?;

        let after = self.publisher.stats();
        let elapsed = start.elapsed();
        self.publisher.report(elapsed);

        Ok(JobReport {
            data_source: code,
            registration,
            mapping,
            published: after.published - before.published,
            dead_lettered: after.dead_lettered - before.dead_lettered,
            elapsed,
        })
    }
}

/// Map `source` and write one JSON record per line to `writer`.
pub fn write_records<S, W>(
    source: S,
    data_source: &str,
    options: MappingOptions,
    mut writer: W,
) -> Result<MappingReport, MappingError>
where
    S: EntitySource,
    W: Write,
{
    let code = data_source.trim().to_uppercase();
    let report = Mapper::new(source, &code, options).run(|record| {
        serde_json::to_writer(&mut writer, &record).context(SerializeRecordSnafu)?;
        writer.write_all(b"\n").context(WriteOutputSnafu)
    })?;
    writer.flush().context(WriteOutputSnafu)?;
    info!(data_source = %code, records = report.records, "Records written");
    Ok(report)
}
