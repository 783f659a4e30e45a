//! Configuration types shared by every drift component.

mod vars;

pub use vars::{InterpolationResult, interpolate};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::path::Path;

use crate::error::{ConfigError, EnvInterpolationSnafu, ReadFileSnafu, YamlParseSnafu};

/// Metrics configuration for the Prometheus endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Address to bind the metrics HTTP server (default: "0.0.0.0:9090").
    #[serde(default = "default_metrics_address")]
    pub address: String,
    /// Whether to start the HTTP endpoint at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            address: default_metrics_address(),
            enabled: true,
        }
    }
}

fn default_metrics_address() -> String {
    crate::metrics::DEFAULT_METRICS_ADDR.to_string()
}

fn default_true() -> bool {
    true
}

/// Process-wide runtime settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Maximum random delay before each worker starts, in seconds (0 = none).
    #[serde(default)]
    pub start_jitter_secs: u64,
}

/// Interpolate environment variables in `contents` and deserialize the result.
pub fn parse_yaml<T: DeserializeOwned>(contents: &str) -> Result<T, ConfigError> {
    let interpolated = interpolate(contents);
    if !interpolated.is_ok() {
        return EnvInterpolationSnafu {
            message: interpolated.errors.join("\n"),
        }
        .fail();
    }
    serde_yaml::from_str(&interpolated.text).context(YamlParseSnafu)
}

/// Read a YAML file from disk and parse it with [`parse_yaml`].
pub fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let contents = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
    parse_yaml(&contents)
}
