//! YAML configuration for the profile engine.
//!
//! All tunables (archive allow-list, similarity threshold, conflict TTL,
//! file category table) live in one document so a deployment can be
//! described by a single file. Every section has full serde defaults, so an
//! empty document with just a version line is a valid configuration.
//!
//! ## Example YAML Configuration
//!
//! ```yaml
//! # Profile engine configuration
//! version: "1.0"
//! name: "production"
//!
//! archive:
//!   max_entry_bytes: 33554432
//!   use_parallel: false
//!
//! matcher:
//!   similarity_threshold: 0.8
//!
//! conflict:
//!   pending_ttl_secs: 86400
//!
//! files:
//!   slicer_limit: 1
//!   image_limit: 1
//!   removal_window_hours: 24
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::archive::ArchiveConfig;
use crate::completeness::FilesConfig;
use crate::conflict::ConflictConfig;
use crate::matcher::MatcherConfig;

/// Errors that can occur when loading YAML configuration files
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),
}

/// Top-level configuration for a [`ProfileEngine`](crate::engine::ProfileEngine).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Configuration format version
    pub version: String,

    /// Optional configuration name/description
    #[serde(default)]
    pub name: Option<String>,

    /// Archive sandbox configuration
    #[serde(default)]
    pub archive: ArchiveConfig,

    /// Printer-identity matcher configuration
    #[serde(default)]
    pub matcher: MatcherConfig,

    /// Pending-conflict hold configuration
    #[serde(default)]
    pub conflict: ConflictConfig,

    /// File category and removal-window configuration
    #[serde(default)]
    pub files: FilesConfig,
}

impl EngineConfig {
    /// Load a YAML configuration file from the given path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse YAML configuration from a string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;

        self.archive
            .validate()
            .map_err(|err| ConfigLoadError::Validation(err.to_string()))?;
        self.matcher
            .validate()
            .map_err(|err| ConfigLoadError::Validation(err.to_string()))?;
        self.conflict
            .validate()
            .map_err(|err| ConfigLoadError::Validation(err.to_string()))?;
        self.files
            .validate()
            .map_err(|err| ConfigLoadError::Validation(err.to_string()))?;

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            name: None,
            archive: ArchiveConfig::default(),
            matcher: MatcherConfig::default(),
            conflict: ConflictConfig::default(),
            files: FilesConfig::default(),
        }
    }
}
