//! Contracts of the external resolution engine and its configuration store.
//!
//! The engine's matching behavior is opaque here. Workers only submit records,
//! drain the redo backlog, and keep the engine's active configuration in step
//! with the registered default through [`EngineLifecycle`].

mod lifecycle;
mod memory;

pub use lifecycle::{EngineLifecycle, Recovery, Registration};
pub use memory::MemoryEngine;

use async_trait::async_trait;

use crate::error::EngineError;

/// Record ingestion and redo processing.
#[async_trait]
pub trait ResolutionEngine: Send + Sync {
    /// Hand one record to the engine.
    async fn add_record(
        &self,
        data_source: &str,
        record_id: &str,
        record_json: &str,
    ) -> Result<(), EngineError>;

    /// Configuration the engine is currently running with.
    async fn active_config_id(&self) -> Result<u64, EngineError>;

    /// Switch the engine to `config_id`.
    async fn reinit(&self, config_id: u64) -> Result<(), EngineError>;

    async fn count_redo_records(&self) -> Result<u64, EngineError>;

    /// Process the oldest redo item, returning its payload.
    async fn process_redo_record(&self) -> Result<String, EngineError>;
}

/// Open configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfigHandle(pub u64);

/// Registered configurations and editable configuration documents.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn default_config_id(&self) -> Result<Option<u64>, EngineError>;

    async fn get_config(&self, config_id: u64) -> Result<String, EngineError>;

    /// Register a document, returning its new id.
    async fn add_config(&self, document: &str, comment: &str) -> Result<u64, EngineError>;

    async fn set_default_config_id(&self, config_id: u64) -> Result<(), EngineError>;

    /// Open a document seeded from the engine's template.
    async fn create_document(&self) -> Result<ConfigHandle, EngineError>;

    async fn load_document(&self, document: &str) -> Result<ConfigHandle, EngineError>;

    /// Fails with [`EngineError::DataSourceExists`] when `code` is present.
    async fn add_data_source(&self, handle: ConfigHandle, code: &str) -> Result<(), EngineError>;

    async fn list_data_sources(&self, handle: ConfigHandle) -> Result<Vec<String>, EngineError>;

    async fn save_document(&self, handle: ConfigHandle) -> Result<String, EngineError>;

    async fn close_document(&self, handle: ConfigHandle) -> Result<(), EngineError>;
}
