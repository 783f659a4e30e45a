//! Task envelope carried on the work queues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::prelude::*;

use crate::error::{InvalidBodySnafu, MissingKeySnafu, TaskError};
use crate::mapping::CanonicalRecord;

/// A canonical record plus delivery bookkeeping.
///
/// On the wire the record's fields sit at the top level of the JSON object
/// next to the bookkeeping keys, which are omitted until set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    #[serde(flatten)]
    record: Map<String, Value>,
    /// Failed submissions so far; absent on first publish.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daemon_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errored_at: Option<DateTime<Utc>>,
    /// Identity of the process that first published the task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_sender: Option<String>,
}

impl TaskEnvelope {
    pub fn new(record: CanonicalRecord) -> Self {
        Self {
            record: record.into_map(),
            tries: None,
            error: None,
            daemon_name: None,
            errored_at: None,
            data_sender: None,
        }
    }

    /// Wrap a body that could not be decoded so it can still be dead-lettered.
    pub fn undecodable(body: &[u8]) -> Self {
        let mut record = Map::new();
        record.insert(
            "body".to_string(),
            Value::String(String::from_utf8_lossy(body).into_owned()),
        );
        Self {
            record,
            ..Self::new(CanonicalRecord::from(Map::new()))
        }
    }

    pub fn from_slice(body: &[u8]) -> Result<Self, TaskError> {
        serde_json::from_slice(body).context(InvalidBodySnafu)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn data_source(&self) -> Result<&str, TaskError> {
        self.record_str("DATA_SOURCE")
    }

    pub fn record_id(&self) -> Result<&str, TaskError> {
        self.record_str("RECORD_ID")
    }

    fn record_str(&self, key: &'static str) -> Result<&str, TaskError> {
        self.record
            .get(key)
            .and_then(Value::as_str)
            .context(MissingKeySnafu { key })
    }

    /// The record alone, as sent to the engine.
    pub fn record_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.record)
    }

    pub fn tries(&self) -> u32 {
        self.tries.unwrap_or(0)
    }

    /// Count one more failed try and remember why. Returns the new count.
    pub fn record_failure(&mut self, error: impl Into<String>) -> u32 {
        let tries = self.tries() + 1;
        self.tries = Some(tries);
        self.error = Some(error.into());
        tries
    }

    /// Stamp the fields attached when a task is given up on.
    pub fn mark_dead(&mut self, daemon_name: &str, at: DateTime<Utc>) {
        self.daemon_name = Some(daemon_name.to_string());
        self.errored_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn task() -> TaskEnvelope {
        let mut record = CanonicalRecord::new("TEST", "P1");
        record.set("RECORD_TYPE", "PERSON");
        TaskEnvelope::new(record)
    }

    #[test]
    fn test_fresh_task_has_no_bookkeeping() {
        let body = String::from_utf8(task().to_vec().unwrap()).unwrap();
        assert_eq!(
            body,
            r#"{"DATA_SOURCE":"TEST","RECORD_ID":"P1","RECORD_TYPE":"PERSON"}"#
        );
    }

    #[test]
    fn test_failures_increment_tries() {
        let mut task = task();
        assert_eq!(task.record_failure("first"), 1);
        assert_eq!(task.record_failure("second"), 2);

        let decoded = TaskEnvelope::from_slice(&task.to_vec().unwrap()).unwrap();
        assert_eq!(decoded.tries, Some(2));
        assert_eq!(decoded.error.as_deref(), Some("second"));
        assert_eq!(decoded.record_id().unwrap(), "P1");
    }

    #[test]
    fn test_record_json_excludes_bookkeeping() {
        let mut task = task();
        task.record_failure("boom");
        task.mark_dead("drift-consumer", Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
        task.data_sender = Some("host(10.0.0.1)".to_string());

        let record: Value = serde_json::from_str(&task.record_json().unwrap()).unwrap();
        assert_eq!(record.as_object().unwrap().len(), 3);
        assert!(record.get("tries").is_none());

        let wire: Value = serde_json::from_slice(&task.to_vec().unwrap()).unwrap();
        assert_eq!(wire["daemon_name"], "drift-consumer");
        assert_eq!(wire["errored_at"], "2024-01-02T03:04:05Z");
    }

    #[test]
    fn test_missing_keys_and_bad_bodies() {
        let task = TaskEnvelope::from_slice(br#"{"RECORD_ID":"1"}"#).unwrap();
        assert!(matches!(
            task.data_source(),
            Err(TaskError::MissingKey { key: "DATA_SOURCE" })
        ));

        assert!(TaskEnvelope::from_slice(b"[1,2]").is_err());
        assert!(TaskEnvelope::from_slice(b"\xff").is_err());
    }

    #[test]
    fn test_undecodable_body_is_preserved() {
        let task = TaskEnvelope::undecodable(b"not json");
        let wire: Value = serde_json::from_slice(&task.to_vec().unwrap()).unwrap();
        assert_eq!(wire["body"], "not json");
    }
}
