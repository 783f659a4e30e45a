//! Reading entity sources and driving index building plus transformation.

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use drift_core::emit;
use drift_core::metrics::events::{EntitiesIndexed, EntitiesSkipped, RecordsMapped, SkipReason};

use super::index::RelationshipIndex;
use super::record::CanonicalRecord;
use super::transform::{GenderPolicy, Transformer};
use crate::dlq::FailureTracker;
use crate::entity::{Bucket, Entity, SchemaRole};
use crate::error::{EntitySnafu, MappingError, ReadSourceSnafu};

/// Principal property naming the addresses it lives at.
const ADDRESS_REF: &str = "addressEntity";

/// A re-readable, line-oriented source of entity JSON.
pub trait EntitySource {
    /// Human-readable name for logs.
    fn name(&self) -> &str;

    /// Open a fresh pass over the lines.
    fn open(&self) -> Result<Box<dyn Iterator<Item = Result<String, MappingError>> + '_>, MappingError>;
}

/// NDJSON file on local disk.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    name: String,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let name = path.display().to_string();
        Self { path, name }
    }
}

impl EntitySource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<Box<dyn Iterator<Item = Result<String, MappingError>> + '_>, MappingError> {
        let file = File::open(&self.path).context(ReadSourceSnafu { path: &self.name })?;
        let lines = BufReader::new(file)
            .lines()
            .map(move |line| line.context(ReadSourceSnafu { path: &self.name }));
        Ok(Box::new(lines))
    }
}

/// Lines held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    lines: Vec<String>,
}

impl MemorySource {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }
}

impl EntitySource for MemorySource {
    fn name(&self) -> &str {
        "memory"
    }

    fn open(&self) -> Result<Box<dyn Iterator<Item = Result<String, MappingError>> + '_>, MappingError> {
        Ok(Box::new(self.lines.iter().cloned().map(Ok)))
    }
}

/// Assumption made about where attachments appear relative to principals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOrdering {
    /// Read the source twice: index everything, then transform.
    #[default]
    TwoPass,
    /// Read once; attachments must precede the principals they describe.
    Streaming,
}

/// What to do with a line that cannot be parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MalformedPolicy {
    /// Log, count and continue (up to `max_failures`).
    #[default]
    Skip,
    /// Fail the job on the first malformed line.
    Abort,
}

/// Knobs for a mapping job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingOptions {
    #[serde(default)]
    pub ordering: SourceOrdering,
    #[serde(default)]
    pub on_malformed: MalformedPolicy,
    /// Malformed lines tolerated before the job fails (0 = unlimited).
    #[serde(default)]
    pub max_failures: usize,
    #[serde(default)]
    pub gender: GenderPolicy,
    /// Log a per-schema breakdown of entities that were not mapped.
    #[serde(default)]
    pub report_unknown: bool,
}

/// Counts gathered over one mapping job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappingReport {
    pub lines: usize,
    pub records: usize,
    pub attachments: usize,
    pub deferred: usize,
    pub malformed: usize,
    /// Unmapped schema names and how often each appeared.
    pub unknown: BTreeMap<String, usize>,
}

impl MappingReport {
    pub fn unknown_total(&self) -> usize {
        self.unknown.values().sum()
    }
}

/// Indexes attachments and transforms principals from one source.
pub struct Mapper<S> {
    source: S,
    transformer: Transformer,
    options: MappingOptions,
}

impl<S: EntitySource> Mapper<S> {
    pub fn new(source: S, data_source: &str, options: MappingOptions) -> Self {
        Self {
            source,
            transformer: Transformer::new(data_source, options.gender),
            options,
        }
    }

    /// Run the job, handing each record to `sink` in source order.
    pub fn run<F>(&self, mut sink: F) -> Result<MappingReport, MappingError>
    where
        F: FnMut(CanonicalRecord) -> Result<(), MappingError>,
    {
        let start = Instant::now();
        let target = self.transformer.data_source().to_string();
        let mut report = MappingReport::default();
        let mut tracker = FailureTracker::new(self.options.max_failures, target.clone());
        let mut index = RelationshipIndex::new();

        info!(
            target = %target,
            source = self.source.name(),
            ordering = ?self.options.ordering,
            "Mapping entities"
        );

        match self.options.ordering {
            SourceOrdering::TwoPass => {
                self.pass(&mut report, Some(&mut tracker), |entity, report| {
                    if let SchemaRole::Attachment(bucket) = entity.schema().role() {
                        index.insert(bucket, entity);
                        report.attachments += 1;
                    }
                    Ok(())
                })?;
                debug!(target = %target, attachments = index.indexed(), "Index built");
                for bucket in Bucket::ALL {
                    debug!(
                        target = %target,
                        bucket = bucket.as_str(),
                        subjects = index.subject_count(bucket),
                        "Index bucket"
                    );
                }

                // Line and failure counts come from the first pass.
                let mut second = MappingReport::default();
                self.pass(&mut second, None, |entity, _| {
                    if let SchemaRole::Principal(_) = entity.schema().role() {
                        sink(self.transformer.transform(&entity, &index)?)?;
                        report.records += 1;
                    }
                    Ok(())
                })?;
            }
            SourceOrdering::Streaming => {
                let mut emitted: HashSet<String> = HashSet::new();
                // Address id to the first emitted principal that referenced it.
                let mut referenced: HashMap<String, String> = HashMap::new();
                let mut records = 0;
                self.pass(&mut report, Some(&mut tracker), |entity, report| {
                    match entity.schema().role() {
                        SchemaRole::Attachment(bucket) => {
                            let attachment = entity.id().to_string();
                            let subjects = index.insert(bucket, entity);
                            report.attachments += 1;
                            let late = if bucket == Bucket::Addresses {
                                referenced.get(&attachment).cloned()
                            } else {
                                subjects.into_iter().find(|s| emitted.contains(s))
                            };
                            if let Some(subject) = late {
                                return Err(MappingError::OrderingViolation { attachment, subject });
                            }
                        }
                        SchemaRole::Principal(_) => {
                            sink(self.transformer.transform(&entity, &index)?)?;
                            for address in entity.values(ADDRESS_REF) {
                                referenced
                                    .entry(address.clone())
                                    .or_insert_with(|| entity.id().to_string());
                            }
                            emitted.insert(entity.id().to_string());
                            records += 1;
                        }
                        _ => {}
                    }
                    Ok(())
                })?;
                report.records = records;
            }
        }

        if tracker.has_failures() {
            warn!(
                target = %target,
                count = tracker.count(),
                last_error = tracker.last_error().unwrap_or_default(),
                "Malformed lines skipped"
            );
        }

        emit!(EntitiesIndexed {
            count: report.attachments as u64,
            target: target.clone(),
        });
        emit!(RecordsMapped {
            count: report.records as u64,
            target: target.clone(),
        });
        if report.unknown_total() > 0 {
            emit!(EntitiesSkipped {
                count: report.unknown_total() as u64,
                reason: SkipReason::UnknownSchema,
                target: target.clone(),
            });
        }
        if report.deferred > 0 {
            emit!(EntitiesSkipped {
                count: report.deferred as u64,
                reason: SkipReason::Deferred,
                target: target.clone(),
            });
        }

        info!(
            target = %target,
            records = report.records,
            attachments = report.attachments,
            unknown = report.unknown_total(),
            malformed = report.malformed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Mapping complete"
        );
        if self.options.report_unknown {
            for (schema, count) in &report.unknown {
                info!(target = %target, schema = %schema, count, "Unmapped schema");
            }
        }

        Ok(report)
    }

    /// One pass over the source. Classification counters live here; `visit`
    /// sees every well-formed entity of a known kind. Without a tracker,
    /// malformed lines are passed over silently.
    fn pass<V>(
        &self,
        report: &mut MappingReport,
        mut tracker: Option<&mut FailureTracker>,
        mut visit: V,
    ) -> Result<(), MappingError>
    where
        V: FnMut(Entity, &mut MappingReport) -> Result<(), MappingError>,
    {
        for (i, line) in self.source.open()?.enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            report.lines += 1;

            let entity = match Entity::from_json_line(line.trim(), i + 1).context(EntitySnafu) {
                Ok(entity) => entity,
                Err(e) => {
                    report.malformed += 1;
                    let Some(tracker) = tracker.as_deref_mut() else {
                        continue;
                    };
                    match self.options.on_malformed {
                        MalformedPolicy::Abort => return Err(e),
                        MalformedPolicy::Skip => {
                            warn!(error = %e, "Skipping malformed entity");
                            tracker.record_failure(&e)?;
                            continue;
                        }
                    }
                }
            };

            match entity.schema().role() {
                SchemaRole::Deferred => report.deferred += 1,
                SchemaRole::Unknown => {
                    *report
                        .unknown
                        .entry(entity.schema().name().to_string())
                        .or_default() += 1;
                }
                SchemaRole::Principal(_) | SchemaRole::Attachment(_) => visit(entity, report)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PRINCIPAL_FIRST: [&str; 4] = [
        r#"{"id":"P1","schema":"Person","properties":{"name":["Jane Roe"]}}"#,
        r#"{"id":"D1","schema":"Directorship","properties":{"director":["P1"],"organization":["O1"],"role":["CEO"]}}"#,
        r#"{"id":"O1","schema":"Company","properties":{"name":["Acme"]}}"#,
        r#"{"id":"V1","schema":"Vessel","properties":{"name":["Boaty"]}}"#,
    ];

    fn collect<S: EntitySource>(
        mapper: &Mapper<S>,
    ) -> Result<(Vec<CanonicalRecord>, MappingReport), MappingError> {
        let mut records = Vec::new();
        let report = mapper.run(|record| {
            records.push(record);
            Ok(())
        })?;
        Ok((records, report))
    }

    #[test]
    fn test_two_pass_handles_principal_before_attachment() {
        let mapper = Mapper::new(
            MemorySource::new(PRINCIPAL_FIRST),
            "TEST",
            MappingOptions::default(),
        );

        let (records, report) = collect(&mapper).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].record_id(), Some("P1"));
        assert!(records[0].contains("RELATIONSHIP_LIST"));
        assert_eq!(report.lines, 4);
        assert_eq!(report.records, 2);
        assert_eq!(report.attachments, 1);
        assert_eq!(report.unknown.get("Vessel"), Some(&1));
    }

    #[test]
    fn test_streaming_rejects_late_attachment() {
        let options = MappingOptions {
            ordering: SourceOrdering::Streaming,
            ..Default::default()
        };
        let mapper = Mapper::new(MemorySource::new(PRINCIPAL_FIRST), "TEST", options);

        let err = collect(&mapper).unwrap_err();
        assert!(matches!(
            err,
            MappingError::OrderingViolation { ref attachment, ref subject }
                if attachment == "D1" && subject == "P1"
        ));
    }

    #[test]
    fn test_streaming_rejects_late_address() {
        let options = MappingOptions {
            ordering: SourceOrdering::Streaming,
            ..Default::default()
        };
        let person = r#"{"id":"P1","schema":"Person","properties":{"name":["Jane Roe"],"addressEntity":["A1"]}}"#;
        let address = r#"{"id":"A1","schema":"Address","properties":{"full":["1 Main St"]}}"#;

        let late = Mapper::new(MemorySource::new([person, address]), "TEST", options.clone());
        let err = collect(&late).unwrap_err();
        assert!(matches!(
            err,
            MappingError::OrderingViolation { ref attachment, ref subject }
                if attachment == "A1" && subject == "P1"
        ));

        let early = Mapper::new(MemorySource::new([address, person]), "TEST", options);
        let (records, _) = collect(&early).unwrap();
        assert!(records[0].contains("ADDRESS_LIST"));
    }

    #[test]
    fn test_streaming_accepts_unreferenced_address() {
        let options = MappingOptions {
            ordering: SourceOrdering::Streaming,
            ..Default::default()
        };
        let lines = [
            PRINCIPAL_FIRST[0],
            r#"{"id":"A9","schema":"Address","properties":{"full":["9 Side St"]}}"#,
        ];
        let mapper = Mapper::new(MemorySource::new(lines), "TEST", options);

        let (records, report) = collect(&mapper).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(report.attachments, 1);
    }

    #[test]
    fn test_two_pass_reports_malformed_line_once() {
        drift_core::metrics::init_test();
        let lines = ["{broken", PRINCIPAL_FIRST[0]];
        let mapper = Mapper::new(
            MemorySource::new(lines),
            "MALFORMED_ONCE",
            MappingOptions::default(),
        );

        let (records, report) = collect(&mapper).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(report.malformed, 1);

        let rendered = drift_core::metrics::MetricsController::get().unwrap().render();
        let skipped: Vec<&str> = rendered
            .lines()
            .filter(|line| {
                line.starts_with("drift_entities_skipped_total")
                    && line.contains(r#"reason="malformed""#)
                    && line.contains(r#"target="MALFORMED_ONCE""#)
            })
            .collect();
        assert_eq!(skipped.len(), 1);
        assert!(skipped[0].ends_with(" 1"));
    }

    #[test]
    fn test_streaming_accepts_attachments_first() {
        let options = MappingOptions {
            ordering: SourceOrdering::Streaming,
            ..Default::default()
        };
        let lines = [PRINCIPAL_FIRST[1], PRINCIPAL_FIRST[0], PRINCIPAL_FIRST[2]];
        let mapper = Mapper::new(MemorySource::new(lines), "TEST", options);

        let (records, report) = collect(&mapper).unwrap();
        assert_eq!(report.records, 2);
        assert!(records[0].contains("RELATIONSHIP_LIST"));
    }

    #[test]
    fn test_malformed_lines_skipped_and_counted_once() {
        let lines = [
            "not json",
            r#"{"schema":"Person"}"#,
            r#"{"id":"S1","schema":"Succession"}"#,
            PRINCIPAL_FIRST[0],
            "",
        ];
        let mapper = Mapper::new(MemorySource::new(lines), "TEST", MappingOptions::default());

        let (records, report) = collect(&mapper).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(report.malformed, 2);
        assert_eq!(report.deferred, 1);
        assert_eq!(report.lines, 4);
    }

    #[test]
    fn test_abort_policy_stops_on_first_malformed_line() {
        let options = MappingOptions {
            on_malformed: MalformedPolicy::Abort,
            ..Default::default()
        };
        let mapper = Mapper::new(
            MemorySource::new([PRINCIPAL_FIRST[0], "{oops"]),
            "TEST",
            options,
        );

        let err = collect(&mapper).unwrap_err();
        assert!(matches!(err, MappingError::Entity { .. }));
    }

    #[test]
    fn test_max_failures_enforced() {
        let options = MappingOptions {
            max_failures: 2,
            ..Default::default()
        };
        let mapper = Mapper::new(MemorySource::new(["x", "y", "z"]), "TEST", options);

        let err = collect(&mapper).unwrap_err();
        assert!(matches!(err, MappingError::MaxFailures { count: 2 }));
    }

    #[test]
    fn test_sink_error_stops_job() {
        let mapper = Mapper::new(
            MemorySource::new(PRINCIPAL_FIRST),
            "TEST",
            MappingOptions::default(),
        );
        let mut seen = 0;
        let result = mapper.run(|_| {
            seen += 1;
            Err(MappingError::MaxFailures { count: 0 })
        });
        assert!(result.is_err());
        assert_eq!(seen, 1);
    }

    #[test]
    fn test_file_source_reads_twice() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in PRINCIPAL_FIRST {
            writeln!(file, "{line}").unwrap();
        }

        let mapper = Mapper::new(FileSource::new(file.path()), "TEST", MappingOptions::default());
        let (records, _) = collect(&mapper).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get_str("RECORD_TYPE"), Some("ORGANIZATION"));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let mapper = Mapper::new(
            FileSource::new("/nonexistent/entities.json"),
            "TEST",
            MappingOptions::default(),
        );
        let err = collect(&mapper).unwrap_err();
        assert!(matches!(err, MappingError::ReadSource { .. }));
    }
}
