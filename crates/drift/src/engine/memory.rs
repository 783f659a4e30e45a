//! In-process engine and configuration store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::{ConfigHandle, ConfigStore, ResolutionEngine};
use crate::error::{EngineError, MalformedConfigSnafu};

/// Data sources present in a fresh configuration.
const TEMPLATE_DATA_SOURCES: [&str; 2] = ["TEST", "SEARCH"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct ConfigDocument {
    #[serde(rename = "DATA_SOURCES", default)]
    data_sources: Vec<DataSource>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct DataSource {
    #[serde(rename = "DSRC_CODE")]
    code: String,
}

impl ConfigDocument {
    fn template() -> Self {
        Self {
            data_sources: TEMPLATE_DATA_SOURCES
                .iter()
                .map(|code| DataSource {
                    code: code.to_string(),
                })
                .collect(),
        }
    }

    fn parse(text: &str) -> Result<Self, EngineError> {
        serde_json::from_str(text).context(MalformedConfigSnafu)
    }

    fn has(&self, code: &str) -> bool {
        self.data_sources.iter().any(|ds| ds.code == code)
    }
}

#[derive(Default)]
struct EngineState {
    configs: BTreeMap<u64, (ConfigDocument, String)>,
    next_config_id: u64,
    default_id: Option<u64>,
    /// 0 until the first reinit.
    active_id: u64,
    documents: HashMap<u64, ConfigDocument>,
    next_handle: u64,
    records: BTreeMap<(String, String), String>,
    redo: VecDeque<String>,
    add_record_failures: VecDeque<EngineError>,
    redo_failures: usize,
    count_failures: usize,
    add_record_calls: usize,
    reinits: usize,
}

impl EngineState {
    fn document(&mut self, handle: ConfigHandle) -> Result<&mut ConfigDocument, EngineError> {
        self.documents
            .get_mut(&handle.0)
            .context(crate::error::InvalidHandleSnafu { handle: handle.0 })
    }
}

/// An engine living in process memory.
///
/// Records are stored keyed by data source and id. Submission fails while the
/// active configuration lacks the record's data source. Cloning shares state.
#[derive(Clone, Default)]
pub struct MemoryEngine {
    state: Arc<Mutex<EngineState>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `count` submissions fail with a transient call error.
    pub fn fail_next_add_records(&self, count: usize, message: &str) {
        let mut state = self.lock();
        for _ in 0..count {
            state.add_record_failures.push_back(EngineError::Call {
                operation: "add_record",
                message: message.to_string(),
            });
        }
    }

    /// Make the next submission fail as unusable input.
    pub fn reject_next_record(&self, message: &str) {
        self.lock()
            .add_record_failures
            .push_back(EngineError::BadInput {
                message: message.to_string(),
            });
    }

    pub fn fail_next_redo(&self, count: usize) {
        self.lock().redo_failures += count;
    }

    pub fn fail_next_count(&self, count: usize) {
        self.lock().count_failures += count;
    }

    pub fn push_redo(&self, payload: impl Into<String>) {
        self.lock().redo.push_back(payload.into());
    }

    /// Point the engine at `config_id` without counting a reinit.
    pub fn set_active(&self, config_id: u64) {
        self.lock().active_id = config_id;
    }

    pub fn record(&self, data_source: &str, record_id: &str) -> Option<String> {
        self.lock()
            .records
            .get(&(data_source.to_string(), record_id.to_string()))
            .cloned()
    }

    pub fn record_count(&self) -> usize {
        self.lock().records.len()
    }

    pub fn redo_pending(&self) -> usize {
        self.lock().redo.len()
    }

    pub fn add_record_calls(&self) -> usize {
        self.lock().add_record_calls
    }

    pub fn reinits(&self) -> usize {
        self.lock().reinits
    }

    pub fn config_count(&self) -> usize {
        self.lock().configs.len()
    }

    pub fn config_comment(&self, config_id: u64) -> Option<String> {
        self.lock()
            .configs
            .get(&config_id)
            .map(|(_, comment)| comment.clone())
    }
}

#[async_trait]
impl ResolutionEngine for MemoryEngine {
    async fn add_record(
        &self,
        data_source: &str,
        record_id: &str,
        record_json: &str,
    ) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.add_record_calls += 1;
        if let Some(err) = state.add_record_failures.pop_front() {
            return Err(err);
        }

        let active = state.active_id;
        let known = state
            .configs
            .get(&active)
            .is_some_and(|(doc, _)| doc.has(data_source));
        if !known {
            return Err(EngineError::Call {
                operation: "add_record",
                message: format!(
                    "data source '{data_source}' not in active configuration {active}"
                ),
            });
        }
        if serde_json::from_str::<serde_json::Value>(record_json).is_err() {
            return Err(EngineError::BadInput {
                message: format!("record '{record_id}' is not valid JSON"),
            });
        }

        state.records.insert(
            (data_source.to_string(), record_id.to_string()),
            record_json.to_string(),
        );
        debug!(data_source, record_id, "Record added");
        Ok(())
    }

    async fn active_config_id(&self) -> Result<u64, EngineError> {
        Ok(self.lock().active_id)
    }

    async fn reinit(&self, config_id: u64) -> Result<(), EngineError> {
        let mut state = self.lock();
        ensure!(
            state.configs.contains_key(&config_id),
            crate::error::UnknownConfigSnafu { config_id }
        );
        state.active_id = config_id;
        state.reinits += 1;
        Ok(())
    }

    async fn count_redo_records(&self) -> Result<u64, EngineError> {
        let mut state = self.lock();
        if state.count_failures > 0 {
            state.count_failures -= 1;
            return Err(EngineError::Call {
                operation: "count_redo_records",
                message: "engine busy".to_string(),
            });
        }
        Ok(state.redo.len() as u64)
    }

    async fn process_redo_record(&self) -> Result<String, EngineError> {
        let mut state = self.lock();
        if state.redo_failures > 0 {
            state.redo_failures -= 1;
            return Err(EngineError::Call {
                operation: "process_redo_record",
                message: "redo processing failed".to_string(),
            });
        }
        Ok(state.redo.pop_front().unwrap_or_default())
    }
}

#[async_trait]
impl ConfigStore for MemoryEngine {
    async fn default_config_id(&self) -> Result<Option<u64>, EngineError> {
        Ok(self.lock().default_id)
    }

    async fn get_config(&self, config_id: u64) -> Result<String, EngineError> {
        let state = self.lock();
        let (doc, _) = state
            .configs
            .get(&config_id)
            .context(crate::error::UnknownConfigSnafu { config_id })?;
        serde_json::to_string(doc).context(MalformedConfigSnafu)
    }

    async fn add_config(&self, document: &str, comment: &str) -> Result<u64, EngineError> {
        let doc = ConfigDocument::parse(document)?;
        let mut state = self.lock();
        state.next_config_id += 1;
        let id = state.next_config_id;
        state.configs.insert(id, (doc, comment.to_string()));
        debug!(config_id = id, comment, "Configuration added");
        Ok(id)
    }

    async fn set_default_config_id(&self, config_id: u64) -> Result<(), EngineError> {
        let mut state = self.lock();
        ensure!(
            state.configs.contains_key(&config_id),
            crate::error::UnknownConfigSnafu { config_id }
        );
        state.default_id = Some(config_id);
        Ok(())
    }

    async fn create_document(&self) -> Result<ConfigHandle, EngineError> {
        let mut state = self.lock();
        state.next_handle += 1;
        let handle = state.next_handle;
        state.documents.insert(handle, ConfigDocument::template());
        Ok(ConfigHandle(handle))
    }

    async fn load_document(&self, document: &str) -> Result<ConfigHandle, EngineError> {
        let doc = ConfigDocument::parse(document)?;
        let mut state = self.lock();
        state.next_handle += 1;
        let handle = state.next_handle;
        state.documents.insert(handle, doc);
        Ok(ConfigHandle(handle))
    }

    async fn add_data_source(&self, handle: ConfigHandle, code: &str) -> Result<(), EngineError> {
        let mut state = self.lock();
        let doc = state.document(handle)?;
        ensure!(
            !doc.has(code),
            crate::error::DataSourceExistsSnafu { code }
        );
        doc.data_sources.push(DataSource {
            code: code.to_string(),
        });
        Ok(())
    }

    async fn list_data_sources(&self, handle: ConfigHandle) -> Result<Vec<String>, EngineError> {
        let mut state = self.lock();
        let doc = state.document(handle)?;
        Ok(doc.data_sources.iter().map(|ds| ds.code.clone()).collect())
    }

    async fn save_document(&self, handle: ConfigHandle) -> Result<String, EngineError> {
        let mut state = self.lock();
        let doc = state.document(handle)?;
        serde_json::to_string(doc).context(MalformedConfigSnafu)
    }

    async fn close_document(&self, handle: ConfigHandle) -> Result<(), EngineError> {
        self.lock()
            .documents
            .remove(&handle.0)
            .map(|_| ())
            .context(crate::error::InvalidHandleSnafu { handle: handle.0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn configured(sources: &str) -> (MemoryEngine, u64) {
        let engine = MemoryEngine::new();
        let id = engine.add_config(sources, "test").await.unwrap();
        engine.set_default_config_id(id).await.unwrap();
        engine.reinit(id).await.unwrap();
        (engine, id)
    }

    #[tokio::test]
    async fn test_add_record_needs_data_source() {
        let (engine, _) = configured(r#"{"DATA_SOURCES":[{"DSRC_CODE":"TEST"}]}"#).await;

        engine
            .add_record("TEST", "1", r#"{"RECORD_ID":"1"}"#)
            .await
            .unwrap();
        let err = engine
            .add_record("OTHER", "2", r#"{"RECORD_ID":"2"}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Call { .. }));
        assert_eq!(engine.record_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_record_is_bad_input() {
        let (engine, _) = configured(r#"{"DATA_SOURCES":[{"DSRC_CODE":"TEST"}]}"#).await;
        let err = engine.add_record("TEST", "1", "not json").await.unwrap_err();
        assert!(matches!(err, EngineError::BadInput { .. }));
    }

    #[tokio::test]
    async fn test_injected_failures_consumed_in_order() {
        let (engine, _) = configured(r#"{"DATA_SOURCES":[{"DSRC_CODE":"TEST"}]}"#).await;
        engine.fail_next_add_records(1, "timeout");
        engine.reject_next_record("bad");

        let first = engine.add_record("TEST", "1", "{}").await.unwrap_err();
        assert!(matches!(first, EngineError::Call { .. }));
        let second = engine.add_record("TEST", "1", "{}").await.unwrap_err();
        assert!(matches!(second, EngineError::BadInput { .. }));
        engine.add_record("TEST", "1", "{}").await.unwrap();
        assert_eq!(engine.add_record_calls(), 3);
    }

    #[tokio::test]
    async fn test_documents() {
        let engine = MemoryEngine::new();
        let handle = engine.create_document().await.unwrap();
        engine.add_data_source(handle, "ACME").await.unwrap();
        let err = engine.add_data_source(handle, "TEST").await.unwrap_err();
        assert!(matches!(err, EngineError::DataSourceExists { .. }));

        assert_eq!(
            engine.list_data_sources(handle).await.unwrap(),
            vec!["TEST", "SEARCH", "ACME"]
        );
        engine.close_document(handle).await.unwrap();
        assert!(matches!(
            engine.list_data_sources(handle).await.unwrap_err(),
            EngineError::InvalidHandle { .. }
        ));
    }

    #[tokio::test]
    async fn test_redo_backlog() {
        let engine = MemoryEngine::new();
        engine.push_redo("r1");
        engine.fail_next_redo(1);

        assert_eq!(engine.count_redo_records().await.unwrap(), 1);
        assert!(engine.process_redo_record().await.is_err());
        assert_eq!(engine.process_redo_record().await.unwrap(), "r1");
        assert_eq!(engine.count_redo_records().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_config() {
        let engine = MemoryEngine::new();
        assert!(matches!(
            engine.reinit(7).await.unwrap_err(),
            EngineError::UnknownConfig { config_id: 7 }
        ));
        assert!(matches!(
            engine.add_config("not json", "bad").await.unwrap_err(),
            EngineError::MalformedConfig { .. }
        ));
    }
}
