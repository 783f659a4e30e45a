//! Configuration for the drift loader and workers.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::mapping::MappingOptions;
use crate::queue::QueueOptions;
pub use drift_core::config::{MetricsConfig, RuntimeConfig};

/// Work queue names and declaration arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    #[serde(default = "default_primary")]
    pub primary: String,
    #[serde(default = "default_dead_letter")]
    pub dead_letter: String,
    /// `x-max-priority` for both queues, 1 to 6.
    #[serde(default)]
    pub max_priority: Option<u8>,
    /// Unacknowledged deliveries per consumer.
    #[serde(default = "default_prefetch")]
    pub prefetch: u16,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            dead_letter: default_dead_letter(),
            max_priority: None,
            prefetch: default_prefetch(),
        }
    }
}

impl QueueConfig {
    pub fn options(&self) -> QueueOptions {
        QueueOptions {
            durable: true,
            max_priority: self.max_priority,
        }
    }
}

fn default_primary() -> String {
    "load_senzing_q".to_string()
}

fn default_dead_letter() -> String {
    "load_senzing_q_err".to_string()
}

fn default_prefetch() -> u16 {
    1
}

/// Reliable publisher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublisherConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff unit; the wait after a failure is this times the attempts left.
    #[serde(default = "default_backoff_step")]
    pub backoff_step_secs: u64,
    /// Value stamped as `data_sender` (default: host name).
    #[serde(default)]
    pub sender: Option<String>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_step_secs: default_backoff_step(),
            sender: None,
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_backoff_step() -> u64 {
    5
}

/// Resolution consumer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsumerConfig {
    #[serde(default = "default_one")]
    pub workers: usize,
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,
    #[serde(default = "default_requeue_delay")]
    pub requeue_delay_secs: u64,
    /// Name recorded on dead-lettered tasks and used in alert titles.
    #[serde(default = "default_daemon_name")]
    pub daemon_name: String,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            workers: default_one(),
            max_tries: default_max_tries(),
            requeue_delay_secs: default_requeue_delay(),
            daemon_name: default_daemon_name(),
        }
    }
}

impl ConsumerConfig {
    pub fn requeue_delay(&self) -> Duration {
        Duration::from_secs(self.requeue_delay_secs)
    }
}

fn default_one() -> usize {
    1
}

fn default_max_tries() -> u32 {
    5
}

fn default_requeue_delay() -> u64 {
    10
}

fn default_daemon_name() -> String {
    "ResolutionConsumer".to_string()
}

/// Redo pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedoConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_redo_workers")]
    pub workers: usize,
    #[serde(default = "default_idle_poll")]
    pub idle_poll_secs: u64,
}

impl Default for RedoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            workers: default_redo_workers(),
            idle_poll_secs: default_idle_poll(),
        }
    }
}

impl RedoConfig {
    pub fn idle_poll(&self) -> Duration {
        Duration::from_secs(self.idle_poll_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_redo_workers() -> usize {
    5
}

fn default_idle_poll() -> u64 {
    10
}

/// Engine configuration persistence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Seeded from at bootstrap and written on shutdown.
    #[serde(default)]
    pub config_path: Option<PathBuf>,
    /// Seed from `config_path` even when a default configuration exists.
    #[serde(default)]
    pub force_load_config: bool,
}

/// Where alerts go. Without a webhook, alerts are logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AlertConfig {
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default = "default_alert_timeout")]
    pub timeout_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: default_alert_timeout(),
        }
    }
}

fn default_alert_timeout() -> u64 {
    10
}

/// Main configuration for drift.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Data source code records are mapped under; upper-cased on load.
    #[serde(default)]
    pub data_source: Option<String>,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub redo: RedoConfig,
    #[serde(default)]
    pub mapping: MappingOptions,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config: Config = drift_core::load_yaml(path)?;
        config.normalized()
    }

    /// Parse configuration from a YAML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = drift_core::parse_yaml(contents)?;
        config.normalized()
    }

    fn normalized(mut self) -> Result<Self, ConfigError> {
        self.data_source = self.data_source.map(|ds| ds.trim().to_uppercase());
        self.validate()?;
        Ok(self)
    }

    /// Check every section, reporting all problems at once.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<ConfigError> = Vec::new();

        if self.data_source.as_deref().is_some_and(str::is_empty) {
            errors.push(ConfigError::EmptyDataSource);
        }
        for (which, name) in [
            ("primary", &self.queue.primary),
            ("dead_letter", &self.queue.dead_letter),
        ] {
            if name.is_empty() {
                errors.push(ConfigError::EmptyQueueName {
                    which: which.to_string(),
                });
            }
        }
        if !self.queue.primary.is_empty() && self.queue.primary == self.queue.dead_letter {
            errors.push(ConfigError::QueueCollision {
                name: self.queue.primary.clone(),
            });
        }
        if let Some(value) = self.queue.max_priority.filter(|v| !(1..=6).contains(v)) {
            errors.push(ConfigError::InvalidPriority { value });
        }

        let positive = [
            ("queue.prefetch", u64::from(self.queue.prefetch)),
            ("publisher.max_attempts", u64::from(self.publisher.max_attempts)),
            ("consumer.workers", self.consumer.workers as u64),
            ("consumer.max_tries", u64::from(self.consumer.max_tries)),
            ("redo.idle_poll_secs", self.redo.idle_poll_secs),
        ];
        for (field, value) in positive {
            if value == 0 {
                errors.push(ConfigError::ZeroValue {
                    field: field.to_string(),
                });
            }
        }
        if self.redo.enabled && self.redo.workers == 0 {
            errors.push(ConfigError::ZeroValue {
                field: "redo.workers".to_string(),
            });
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleErrors {
                errors: errors.iter().map(ToString::to_string).collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{GenderPolicy, SourceOrdering};

    #[test]
    fn test_defaults() {
        let config = Config::parse("{}").unwrap();
        assert_eq!(config.queue.primary, "load_senzing_q");
        assert_eq!(config.queue.dead_letter, "load_senzing_q_err");
        assert_eq!(config.queue.prefetch, 1);
        assert_eq!(config.publisher.max_attempts, 5);
        assert_eq!(config.consumer.max_tries, 5);
        assert_eq!(config.consumer.requeue_delay(), Duration::from_secs(10));
        assert_eq!(config.redo.workers, 5);
        assert_eq!(config.redo.idle_poll(), Duration::from_secs(10));
        assert_eq!(config.mapping.ordering, SourceOrdering::TwoPass);
        assert_eq!(config.mapping.gender, GenderPolicy::TriState);
        assert!(config.alert.webhook_url.is_none());
    }

    #[test]
    fn test_parse_full() {
        let yaml = r#"
data_source: acme
queue:
  max_priority: 3
  prefetch: 4
publisher:
  backoff_step_secs: 1
consumer:
  workers: 2
  daemon_name: loader
redo:
  enabled: false
  workers: 0
mapping:
  ordering: streaming
  gender: binary
  max_failures: 10
engine:
  config_path: /tmp/drift.json
  force_load_config: true
runtime:
  start_jitter_secs: 5
metrics:
  enabled: false
"#;
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.data_source.as_deref(), Some("ACME"));
        assert_eq!(config.queue.options().max_priority, Some(3));
        assert_eq!(config.consumer.daemon_name, "loader");
        assert!(!config.redo.enabled);
        assert_eq!(config.mapping.ordering, SourceOrdering::Streaming);
        assert_eq!(config.mapping.max_failures, 10);
        assert!(config.engine.force_load_config);
        assert_eq!(config.runtime.start_jitter_secs, 5);
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn test_env_interpolation() {
        // SAFETY: test-only variable with a unique name.
        unsafe { std::env::set_var("DRIFT_TEST_CONFIG_DS", "envsource") };
        let config = Config::parse("data_source: ${DRIFT_TEST_CONFIG_DS}").unwrap();
        assert_eq!(config.data_source.as_deref(), Some("ENVSOURCE"));
    }

    #[test]
    fn test_invalid_priority() {
        let err = Config::parse("queue:\n  max_priority: 9").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPriority { value: 9 }));
    }

    #[test]
    fn test_collects_multiple_errors() {
        let yaml = "queue:\n  primary: q\n  dead_letter: q\nconsumer:\n  max_tries: 0";
        let err = Config::parse(yaml).unwrap_err();
        let ConfigError::MultipleErrors { errors } = err else {
            panic!("expected multiple errors");
        };
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert!(matches!(
            Config::parse("queues: {}").unwrap_err(),
            ConfigError::YamlParse { .. }
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drift.yaml");
        std::fs::write(&path, "data_source: test\n").unwrap();
        assert_eq!(
            Config::from_file(&path).unwrap().data_source.as_deref(),
            Some("TEST")
        );
        assert!(matches!(
            Config::from_file(&dir.path().join("missing.yaml")).unwrap_err(),
            ConfigError::ReadFile { .. }
        ));
    }
}
