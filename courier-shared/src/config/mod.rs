//! # Configuration
//!
//! This module contains the configuration structures for the delivery server
//! and for the client transport adapter.

pub mod client;
pub mod server;

use std::path::Path;

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yml::Error),
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Unsupported configuration format '{0}'. Use 'yaml', 'json' or 'toml'.")]
    UnsupportedFormat(String),
    #[error("Invalid {key} value '{value}': {reason}")]
    InvalidEnv {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Reads a configuration file, choosing the decoder from its extension.
pub(crate) fn read_config_file<T>(path: &Path) -> Result<T, ConfigError>
where
    T: DeserializeOwned + 'static,
{
    let content = std::fs::read_to_string(path)?;
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    match extension.as_str() {
        "yaml" | "yml" => Ok(serde_yml::from_str(&content)?),
        "json" => Ok(serde_json::from_str(&content)?),
        "toml" => Ok(toml::from_str(&content)?),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}
