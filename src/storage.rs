//! Persistence collaborators.
//!
//! The engine treats storage as two black boxes: an object store for raw
//! bytes (derived thumbnails) and a relational-style store for profile and
//! file rows. Both are traits so embedders can bring their own backends;
//! the in-memory implementations here back the tests and ephemeral use.

use std::collections::HashMap;
use std::sync::RwLock;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::profile::{ProfileMetadata, SlicerType};

/// Errors surfaced by storage collaborators.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The addressed record does not exist. Doubles as the existence
    /// precondition for compare-and-delete.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// The backend itself failed.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn backend<S: Into<String>>(msg: S) -> Self {
        StorageError::Backend(msg.into())
    }

    fn profile_not_found(id: Uuid) -> Self {
        StorageError::NotFound {
            kind: "print profile",
            id: id.to_string(),
        }
    }

    fn object_not_found(key: &str) -> Self {
        StorageError::NotFound {
            kind: "object",
            id: key.to_string(),
        }
    }
}

/// A persisted print profile row.
///
/// Only the raw printer name is stored; the normalized form is recomputed
/// wherever matching happens so normalization changes never require a
/// migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintProfile {
    pub id: Uuid,
    pub version_id: Uuid,
    /// The uploaded file this profile was extracted from, when known.
    pub source_file_id: Option<Uuid>,
    pub printer_name: String,
    pub slicer: SlicerType,
    pub thumbnail_url: Option<String>,
    pub metadata: ProfileMetadata,
    pub created_at: DateTime<Utc>,
}

/// A profile row awaiting insertion; the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPrintProfile {
    pub version_id: Uuid,
    pub source_file_id: Option<Uuid>,
    pub printer_name: String,
    pub slicer: SlicerType,
    pub thumbnail_url: Option<String>,
    pub metadata: ProfileMetadata,
}

/// A file attached to a model version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: Uuid,
    pub version_id: Uuid,
    pub file_name: String,
    pub created_at: DateTime<Utc>,
}

/// Relational-style persistence for profiles and version files.
pub trait ProfileStore: Send + Sync {
    /// Persist a new profile and return the stored row.
    fn insert_profile(&self, profile: NewPrintProfile) -> Result<PrintProfile, StorageError>;

    /// Delete a profile by id. [`StorageError::NotFound`] when the row is
    /// already gone; callers rely on this as a concurrency precondition.
    fn delete_profile(&self, id: Uuid) -> Result<(), StorageError>;

    /// Profiles attached to a version, oldest first.
    fn profiles_for_version(&self, version_id: Uuid) -> Result<Vec<PrintProfile>, StorageError>;

    /// Files attached to a version, oldest first.
    fn files_for_version(&self, version_id: Uuid) -> Result<Vec<FileRecord>, StorageError>;
}

/// Raw byte persistence for derived artifacts.
pub trait ObjectStore: Send + Sync {
    /// Write bytes under `key` and return a caller-usable URL.
    fn upload(&self, key: &str, bytes: Bytes) -> Result<String, StorageError>;

    /// Remove the object under `key`.
    fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Reference [`ProfileStore`] holding rows per version in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryProfileStore {
    profiles: RwLock<HashMap<Uuid, Vec<PrintProfile>>>,
    files: RwLock<HashMap<Uuid, Vec<FileRecord>>>,
}

impl InMemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file row for a version. Timestamps are caller-supplied so
    /// grace-window scenarios can backdate them.
    pub fn add_file(
        &self,
        version_id: Uuid,
        file_name: &str,
        created_at: DateTime<Utc>,
    ) -> Result<FileRecord, StorageError> {
        let record = FileRecord {
            id: Uuid::new_v4(),
            version_id,
            file_name: file_name.to_string(),
            created_at,
        };
        let mut files = self
            .files
            .write()
            .map_err(|_| StorageError::backend("poisoned lock"))?;
        files.entry(version_id).or_default().push(record.clone());
        Ok(record)
    }
}

impl ProfileStore for InMemoryProfileStore {
    fn insert_profile(&self, profile: NewPrintProfile) -> Result<PrintProfile, StorageError> {
        let row = PrintProfile {
            id: Uuid::new_v4(),
            version_id: profile.version_id,
            source_file_id: profile.source_file_id,
            printer_name: profile.printer_name,
            slicer: profile.slicer,
            thumbnail_url: profile.thumbnail_url,
            metadata: profile.metadata,
            created_at: Utc::now(),
        };
        let mut profiles = self
            .profiles
            .write()
            .map_err(|_| StorageError::backend("poisoned lock"))?;
        profiles.entry(row.version_id).or_default().push(row.clone());
        Ok(row)
    }

    fn delete_profile(&self, id: Uuid) -> Result<(), StorageError> {
        let mut profiles = self
            .profiles
            .write()
            .map_err(|_| StorageError::backend("poisoned lock"))?;
        for rows in profiles.values_mut() {
            if let Some(pos) = rows.iter().position(|row| row.id == id) {
                rows.remove(pos);
                return Ok(());
            }
        }
        Err(StorageError::profile_not_found(id))
    }

    fn profiles_for_version(&self, version_id: Uuid) -> Result<Vec<PrintProfile>, StorageError> {
        let profiles = self
            .profiles
            .read()
            .map_err(|_| StorageError::backend("poisoned lock"))?;
        Ok(profiles.get(&version_id).cloned().unwrap_or_default())
    }

    fn files_for_version(&self, version_id: Uuid) -> Result<Vec<FileRecord>, StorageError> {
        let files = self
            .files
            .read()
            .map_err(|_| StorageError::backend("poisoned lock"))?;
        Ok(files.get(&version_id).cloned().unwrap_or_default())
    }
}

/// Reference [`ObjectStore`] addressing objects as `mem://{key}`.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<String, Bytes>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently stored under `key`, if any.
    pub fn get(&self, key: &str) -> Result<Option<Bytes>, StorageError> {
        let objects = self
            .objects
            .read()
            .map_err(|_| StorageError::backend("poisoned lock"))?;
        Ok(objects.get(key).cloned())
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn upload(&self, key: &str, bytes: Bytes) -> Result<String, StorageError> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| StorageError::backend("poisoned lock"))?;
        objects.insert(key.to_string(), bytes);
        Ok(format!("mem://{key}"))
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| StorageError::backend("poisoned lock"))?;
        objects
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| StorageError::object_not_found(key))
    }
}
