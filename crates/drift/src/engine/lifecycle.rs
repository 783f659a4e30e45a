//! Engine configuration lifecycle: bootstrap, staleness recovery,
//! data-source registration and persistence.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use drift_core::emit;
use drift_core::metrics::events::EngineReinitialized;

use super::{ConfigHandle, ConfigStore, ResolutionEngine};
use crate::error::EngineError;

/// Result of a staleness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Active configuration already matches the default.
    Current,
    /// Engine was switched to this configuration.
    Reinitialized(u64),
}

/// Result of registering a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    AlreadyPresent,
    Added { config_id: u64, total: usize },
}

/// Configuration lifecycle shared by every worker.
pub struct EngineLifecycle {
    engine: Arc<dyn ResolutionEngine>,
    store: Arc<dyn ConfigStore>,
    config_path: Option<PathBuf>,
    force_load: bool,
    target: String,
}

impl EngineLifecycle {
    pub fn new(engine: Arc<dyn ResolutionEngine>, store: Arc<dyn ConfigStore>) -> Self {
        Self {
            engine,
            store,
            config_path: None,
            force_load: false,
            target: "engine".to_string(),
        }
    }

    /// File the configuration is seeded from and saved to.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Seed from the file even when a default configuration exists.
    pub fn with_force_load(mut self, force_load: bool) -> Self {
        self.force_load = force_load;
        self
    }

    /// Label used in logs and metrics.
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn engine(&self) -> &Arc<dyn ResolutionEngine> {
        &self.engine
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Make sure a default configuration exists and the engine runs it.
    pub async fn bootstrap(&self) -> Result<Recovery, EngineError> {
        let existing = self.store.default_config_id().await?;
        match existing {
            Some(id) if !self.force_load => {
                debug!(target = %self.target, config_id = id, "Default configuration present");
            }
            _ => {
                let document = match self.read_config_file().await {
                    Some(document) => document,
                    None => self.template().await?,
                };
                let comment = format!("drift bootstrap at {}", Utc::now().to_rfc3339());
                let id = self.store.add_config(&document, &comment).await?;
                self.store.set_default_config_id(id).await?;
                info!(target = %self.target, config_id = id, "Default configuration registered");
            }
        }
        self.recover_if_stale().await
    }

    async fn read_config_file(&self) -> Option<String> {
        let path = self.config_path.as_ref()?;
        match tokio::fs::read_to_string(path).await {
            Ok(text) => {
                info!(target = %self.target, path = %path.display(), "Seeding configuration from file");
                Some(text)
            }
            Err(e) => {
                debug!(target = %self.target, path = %path.display(), error = %e, "Configuration file not readable, using template");
                None
            }
        }
    }

    async fn template(&self) -> Result<String, EngineError> {
        let handle = self.store.create_document().await?;
        let saved = self.store.save_document(handle).await;
        self.close(handle).await;
        saved
    }

    /// Reinitialize the engine when its active configuration is not the default.
    pub async fn recover_if_stale(&self) -> Result<Recovery, EngineError> {
        let active = self.engine.active_config_id().await?;
        let Some(default) = self.store.default_config_id().await? else {
            return Ok(Recovery::Current);
        };
        if active == default {
            return Ok(Recovery::Current);
        }

        info!(target = %self.target, active, default, "Engine configuration is stale, reinitializing");
        self.engine.reinit(default).await?;
        emit!(EngineReinitialized {
            target: self.target.clone(),
        });
        Ok(Recovery::Reinitialized(default))
    }

    /// Add `code` to the default configuration and make the result the new default.
    pub async fn register_data_source(&self, code: &str) -> Result<Registration, EngineError> {
        let code = code.to_uppercase();
        let default = self
            .store
            .default_config_id()
            .await?
            .ok_or(EngineError::NoDefaultConfig)?;
        let document = self.store.get_config(default).await?;
        let handle = self.store.load_document(&document).await?;

        let result = self.register_in(handle, &code).await;
        self.close(handle).await;
        result
    }

    async fn register_in(
        &self,
        handle: ConfigHandle,
        code: &str,
    ) -> Result<Registration, EngineError> {
        match self.store.add_data_source(handle, code).await {
            Ok(()) => {}
            Err(EngineError::DataSourceExists { .. }) => {
                info!(target = %self.target, data_source = code, "Data source already registered");
                return Ok(Registration::AlreadyPresent);
            }
            Err(e) => return Err(e),
        }

        let document = self.store.save_document(handle).await?;
        let total = self.store.list_data_sources(handle).await?.len();
        info!(target = %self.target, data_source = code, total, "Data source added");

        let config_id = self.store.add_config(&document, "New configuration.").await?;
        self.store.set_default_config_id(config_id).await?;
        Ok(Registration::Added { config_id, total })
    }

    async fn close(&self, handle: ConfigHandle) {
        if let Err(e) = self.store.close_document(handle).await {
            warn!(target = %self.target, error = %e, "Failed to close configuration document");
        }
    }

    /// Write the default configuration to the configured path, if any.
    pub async fn save_config(&self) -> Result<Option<PathBuf>, EngineError> {
        let Some(path) = self.config_path.clone() else {
            return Ok(None);
        };
        let Some(default) = self.store.default_config_id().await? else {
            warn!(target = %self.target, "No default configuration to save");
            return Ok(None);
        };

        let document = self.store.get_config(default).await?;
        let value: serde_json::Value = serde_json::from_str(&document)
            .map_err(|source| EngineError::MalformedConfig { source })?;
        let pretty = serde_json::to_string_pretty(&value)
            .map_err(|source| EngineError::MalformedConfig { source })?;
        tokio::fs::write(&path, pretty)
            .await
            .map_err(|source| EngineError::ConfigFile {
                path: path.display().to_string(),
                source,
            })?;

        info!(target = %self.target, config_id = default, path = %path.display(), "Configuration saved");
        Ok(Some(path))
    }
}
