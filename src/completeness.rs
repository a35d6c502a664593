//! File completeness and category limits.
//!
//! A model version is considered complete when it carries a printable model,
//! a slicer project, and a preview image. Files are classified into those
//! categories by extension, per-category cardinality limits gate additions,
//! and removals are only allowed inside a grace window after upload. The
//! extension table and limits are plain configuration so deployments (and
//! tests) can vary them without touching shared state.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::FileRecord;

/// Errors raised by the completeness layer.
#[derive(Debug, Error)]
pub enum CompletenessError {
    /// Configuration failed validation.
    #[error("invalid files config: {0}")]
    InvalidConfig(String),
}

/// The three file roles a complete version is expected to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    /// Printable geometry (`.stl`, `.obj`, ...).
    Model,
    /// A slicer project container (`.3mf`).
    Slicer,
    /// A preview picture.
    Image,
}

impl std::fmt::Display for FileCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileCategory::Model => write!(f, "model"),
            FileCategory::Slicer => write!(f, "slicer"),
            FileCategory::Image => write!(f, "image"),
        }
    }
}

/// Classification table and limits for version files.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesConfig {
    /// Lowercase extension (no dot) to category. Unmapped extensions are
    /// outside the completeness model entirely.
    #[serde(default = "FilesConfig::default_extension_categories")]
    pub extension_categories: HashMap<String, FileCategory>,
    /// Maximum model files per version. `None` means unbounded.
    #[serde(default = "FilesConfig::default_model_limit")]
    pub model_limit: Option<u32>,
    /// Maximum slicer files per version.
    #[serde(default = "FilesConfig::default_slicer_limit")]
    pub slicer_limit: Option<u32>,
    /// Maximum image files per version. A stored thumbnail occupies one
    /// image slot.
    #[serde(default = "FilesConfig::default_image_limit")]
    pub image_limit: Option<u32>,
    /// Hours after upload during which a file may still be removed.
    #[serde(default = "FilesConfig::default_removal_window_hours")]
    pub removal_window_hours: u64,
}

impl FilesConfig {
    pub(crate) fn default_extension_categories() -> HashMap<String, FileCategory> {
        let mut table = HashMap::new();
        for ext in ["stl", "obj", "ply"] {
            table.insert(ext.to_string(), FileCategory::Model);
        }
        table.insert("3mf".to_string(), FileCategory::Slicer);
        for ext in ["jpg", "jpeg", "png", "webp", "gif"] {
            table.insert(ext.to_string(), FileCategory::Image);
        }
        table
    }

    pub(crate) fn default_model_limit() -> Option<u32> {
        None
    }

    pub(crate) fn default_slicer_limit() -> Option<u32> {
        Some(1)
    }

    pub(crate) fn default_image_limit() -> Option<u32> {
        Some(1)
    }

    pub(crate) fn default_removal_window_hours() -> u64 {
        24
    }

    pub fn validate(&self) -> Result<(), CompletenessError> {
        if self.removal_window_hours == 0 {
            return Err(CompletenessError::InvalidConfig(
                "removal_window_hours must be at least 1".into(),
            ));
        }
        for ext in self.extension_categories.keys() {
            if ext.is_empty()
                || ext.contains('.')
                || ext.chars().any(|ch| ch.is_ascii_uppercase())
            {
                return Err(CompletenessError::InvalidConfig(format!(
                    "extension key {ext:?} must be lowercase without a dot"
                )));
            }
        }
        Ok(())
    }
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            extension_categories: Self::default_extension_categories(),
            model_limit: Self::default_model_limit(),
            slicer_limit: Self::default_slicer_limit(),
            image_limit: Self::default_image_limit(),
            removal_window_hours: Self::default_removal_window_hours(),
        }
    }
}

/// Which categories a version currently covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletenessStatus {
    pub has_model: bool,
    pub has_slicer: bool,
    pub has_image: bool,
}

impl CompletenessStatus {
    pub fn is_complete(&self) -> bool {
        self.has_model && self.has_slicer && self.has_image
    }
}

/// Outcome of an addition check. Denials are routine business outcomes,
/// not errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddDecision {
    Allowed,
    Denied { reason: String },
}

/// Outcome of a removal check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalDecision {
    Allowed {
        /// Whole hours left in the window, rounded up.
        hours_remaining: u64,
        /// Exact seconds left in the window.
        remaining_secs: u64,
    },
    Denied {
        reason: String,
    },
}

/// Human rendering of time left in the removal window. Sub-hour remainders
/// come out in minutes.
pub fn format_remaining(remaining_secs: u64) -> String {
    if remaining_secs >= 3600 {
        let hours = remaining_secs.div_ceil(3600);
        if hours == 1 {
            "1 hour".to_string()
        } else {
            format!("{hours} hours")
        }
    } else {
        let minutes = remaining_secs.div_ceil(60).max(1);
        if minutes == 1 {
            "1 minute".to_string()
        } else {
            format!("{minutes} minutes")
        }
    }
}

/// Classification and limit checks built from a validated [`FilesConfig`].
#[derive(Debug, Clone)]
pub struct FileRules {
    config: FilesConfig,
}

impl FileRules {
    pub fn new(config: FilesConfig) -> Result<Self, CompletenessError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FilesConfig {
        &self.config
    }

    /// Category for an extension, dot and case insensitive.
    pub fn classify(&self, extension: &str) -> Option<FileCategory> {
        let ext = extension.trim_start_matches('.').to_ascii_lowercase();
        self.config.extension_categories.get(&ext).copied()
    }

    /// Category for a full file name. Names without an extension (or bare
    /// dotfiles) map to nothing.
    pub fn classify_name(&self, file_name: &str) -> Option<FileCategory> {
        let (stem, ext) = file_name.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        self.classify(ext)
    }

    fn limit(&self, category: FileCategory) -> Option<u32> {
        match category {
            FileCategory::Model => self.config.model_limit,
            FileCategory::Slicer => self.config.slicer_limit,
            FileCategory::Image => self.config.image_limit,
        }
    }

    /// Which categories the given files (plus a stored thumbnail) cover.
    pub fn status(&self, files: &[FileRecord], has_thumbnail: bool) -> CompletenessStatus {
        let mut status = CompletenessStatus {
            has_model: false,
            has_slicer: false,
            has_image: has_thumbnail,
        };
        for file in files {
            match self.classify_name(&file.file_name) {
                Some(FileCategory::Model) => status.has_model = true,
                Some(FileCategory::Slicer) => status.has_slicer = true,
                Some(FileCategory::Image) => status.has_image = true,
                None => {}
            }
        }
        status
    }

    /// May a file of `category` be added next to `files`? Uncategorized
    /// files are never limited.
    pub fn add_decision(
        &self,
        files: &[FileRecord],
        category: Option<FileCategory>,
        has_thumbnail: bool,
    ) -> AddDecision {
        let Some(category) = category else {
            return AddDecision::Allowed;
        };
        let Some(limit) = self.limit(category) else {
            return AddDecision::Allowed;
        };
        let mut count = files
            .iter()
            .filter(|file| self.classify_name(&file.file_name) == Some(category))
            .count();
        if category == FileCategory::Image && has_thumbnail {
            count += 1;
        }
        if count >= limit as usize {
            return AddDecision::Denied {
                reason: self.limit_reason(category),
            };
        }
        AddDecision::Allowed
    }

    fn limit_reason(&self, category: FileCategory) -> String {
        match category {
            FileCategory::Slicer => {
                "version already has a slicer project file; create a new version instead"
                    .to_string()
            }
            FileCategory::Image => "version already has a preview image".to_string(),
            FileCategory::Model => format!("{category} file limit reached"),
        }
    }

    /// May a file created at `created_at` still be removed at `now`?
    ///
    /// The window boundary itself is inclusive. Category limits play no
    /// part here; removal is purely time-boxed.
    pub fn removal_decision(
        &self,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> RemovalDecision {
        let window_secs = self.config.removal_window_hours * 3600;
        let elapsed_secs = now.signed_duration_since(created_at).num_seconds();
        if elapsed_secs < 0 {
            // Clock skew puts the file in the future; the full window remains.
            return RemovalDecision::Allowed {
                hours_remaining: self.config.removal_window_hours,
                remaining_secs: window_secs,
            };
        }
        let elapsed_secs = elapsed_secs as u64;
        if elapsed_secs > window_secs {
            return RemovalDecision::Denied {
                reason: format!(
                    "files can only be removed within {} hours of upload",
                    self.config.removal_window_hours
                ),
            };
        }
        let remaining_secs = window_secs - elapsed_secs;
        RemovalDecision::Allowed {
            hours_remaining: remaining_secs.div_ceil(3600),
            remaining_secs,
        }
    }

    pub fn can_remove(&self, created_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        matches!(
            self.removal_decision(created_at, now),
            RemovalDecision::Allowed { .. }
        )
    }
}

impl Default for FileRules {
    fn default() -> Self {
        Self {
            config: FilesConfig::default(),
        }
    }
}
