//! Upload orchestration.
//!
//! [`ProfileEngine`] wires the pieces together: sandbox the archive, run the
//! parser chain, match the extracted printer identity against the version's
//! existing profiles, and either persist immediately or suspend into a
//! pending conflict that a later [`resolve_conflict`] call settles. It also
//! fronts the completeness rules with store-backed lookups.
//!
//! [`resolve_conflict`]: ProfileEngine::resolve_conflict

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{Level, info, warn};
use uuid::Uuid;

use crate::archive::ArchiveError;
use crate::completeness::{AddDecision, CompletenessStatus, FileRules, RemovalDecision};
use crate::config::{ConfigLoadError, EngineConfig};
use crate::conflict::{
    ConflictError, PendingConflict, PendingConflictStore, PendingKey, ResolveAction,
};
use crate::hash::content_hash_hex;
use crate::matcher::find_conflict;
use crate::parser::{ParseOutcome, parse_container};
use crate::profile::{ParsedProfile, SlicerType};
use crate::storage::{
    FileRecord, InMemoryObjectStore, InMemoryProfileStore, NewPrintProfile, ObjectStore,
    PrintProfile, ProfileStore, StorageError,
};

/// Errors that can abort an upload or resolution.
///
/// A conflict is not represented here: it is a normal outcome, carried in
/// [`UploadOutcome::ConflictDetected`].
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("archive rejected: {0}")]
    Archive(#[from] ArchiveError),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("conflict tracking failure: {0}")]
    Conflict(#[from] ConflictError),

    #[error("resolution failed: {0}")]
    Resolve(#[from] ResolveError),
}

/// Why a resolution call could not complete.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No claimable pending record for these bytes: the hold expired, was
    /// already resolved, or never existed.
    #[error("no pending conflict for this upload; it expired or was already resolved")]
    PendingExpired,

    /// The world moved under the pending record.
    #[error("pending conflict is stale: {0}")]
    StaleConflict(String),

    /// The resubmitted buffer no longer parses.
    #[error("held upload no longer parses: {0}")]
    Unparseable(String),
}

/// A profile upload for one model version.
#[derive(Debug, Clone)]
pub struct ProfileUpload {
    pub version_id: Uuid,
    /// File row the buffer was stored under, when the caller tracks one.
    pub source_file_id: Option<Uuid>,
    /// The raw archive bytes.
    pub buffer: Bytes,
}

/// The caller's decision round-trip for a detected conflict. The buffer
/// must be the same bytes that produced the conflict; the content hash is
/// the proof.
#[derive(Debug, Clone)]
pub struct ConflictResolution {
    pub version_id: Uuid,
    pub existing_profile_id: Uuid,
    pub action: ResolveAction,
    pub source_file_id: Option<Uuid>,
    pub buffer: Bytes,
}

/// What an upload produced.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// No conflict; the profile row is persisted.
    Persisted(PrintProfile),
    /// The archive opened but no vendor parser matched. Nothing persisted;
    /// callers typically offer a "tell us your slicer" path.
    UnknownFormat,
    /// A same-printer profile already exists. Nothing persisted until the
    /// caller resolves.
    ConflictDetected(ConflictDetails),
}

/// Everything the caller needs to present a conflict decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictDetails {
    pub existing_profile_id: Uuid,
    pub existing_printer_name: String,
    pub candidate_printer_name: String,
    pub candidate_slicer: SlicerType,
    pub similarity: f64,
    /// Hex SHA-256 of the uploaded buffer; resubmit the same bytes to
    /// resolve.
    pub content_hash: String,
}

/// The profile extraction and conflict-resolution engine.
pub struct ProfileEngine {
    profiles: Arc<dyn ProfileStore>,
    objects: Arc<dyn ObjectStore>,
    rules: FileRules,
    pending: PendingConflictStore,
    config: EngineConfig,
}

impl ProfileEngine {
    /// Build an engine over the given collaborators. The configuration is
    /// validated up front so a bad deployment fails at startup, not on the
    /// first upload.
    pub fn new(
        config: EngineConfig,
        profiles: Arc<dyn ProfileStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> Result<Self, ConfigLoadError> {
        config.validate()?;
        let rules = FileRules::new(config.files.clone())
            .map_err(|err| ConfigLoadError::Validation(err.to_string()))?;
        Ok(Self {
            profiles,
            objects,
            rules,
            pending: PendingConflictStore::new(),
            config,
        })
    }

    /// Engine over in-memory stores, for tests and ephemeral embedding.
    pub fn in_memory(config: EngineConfig) -> Result<Self, ConfigLoadError> {
        Self::new(
            config,
            Arc::new(InMemoryProfileStore::new()),
            Arc::new(InMemoryObjectStore::new()),
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The file classification rules this engine was built with.
    pub fn rules(&self) -> &FileRules {
        &self.rules
    }

    /// Parse an uploaded archive and persist its profile unless it collides
    /// with an existing printer identity.
    pub fn upload_profile(&self, upload: ProfileUpload) -> Result<UploadOutcome, UploadError> {
        let start = Instant::now();
        let span = tracing::span!(
            Level::INFO,
            "engine.upload",
            version_id = %upload.version_id,
            bytes = upload.buffer.len()
        );
        let _guard = span.enter();

        match self.upload_inner(&upload) {
            Ok(outcome) => {
                match &outcome {
                    UploadOutcome::Persisted(profile) => info!(
                        profile_id = %profile.id,
                        printer = %profile.printer_name,
                        elapsed_micros = start.elapsed().as_micros(),
                        "upload_persisted"
                    ),
                    UploadOutcome::UnknownFormat => info!(
                        elapsed_micros = start.elapsed().as_micros(),
                        "upload_unknown_format"
                    ),
                    UploadOutcome::ConflictDetected(details) => info!(
                        existing_profile_id = %details.existing_profile_id,
                        similarity = details.similarity,
                        elapsed_micros = start.elapsed().as_micros(),
                        "upload_conflict_detected"
                    ),
                }
                Ok(outcome)
            }
            Err(err) => {
                warn!(error = %err, "upload_failure");
                Err(err)
            }
        }
    }

    fn upload_inner(&self, upload: &ProfileUpload) -> Result<UploadOutcome, UploadError> {
        let profile = match parse_container(&upload.buffer, &self.config.archive)? {
            ParseOutcome::Parsed(profile) => profile,
            ParseOutcome::UnknownFormat => return Ok(UploadOutcome::UnknownFormat),
        };

        let existing = self.profiles.profiles_for_version(upload.version_id)?;
        let content_hash = content_hash_hex(&upload.buffer);

        if let Some(hit) = find_conflict(
            &profile.printer_name,
            &existing,
            self.config.matcher.similarity_threshold,
        ) {
            let details = ConflictDetails {
                existing_profile_id: hit.profile.id,
                existing_printer_name: hit.profile.printer_name.clone(),
                candidate_printer_name: profile.printer_name.clone(),
                candidate_slicer: profile.slicer,
                similarity: hit.score,
                content_hash: content_hash.clone(),
            };
            self.pending.hold(PendingConflict::new(
                PendingKey {
                    version_id: upload.version_id,
                    content_hash,
                },
                hit.profile.id,
                profile.printer_name,
                hit.score,
                Utc::now(),
                self.config.conflict.ttl(),
            ))?;
            return Ok(UploadOutcome::ConflictDetected(details));
        }

        let stored = self.persist(upload.version_id, upload.source_file_id, &content_hash, profile)?;
        Ok(UploadOutcome::Persisted(stored))
    }

    /// Settle a previously detected conflict with the caller's decision.
    pub fn resolve_conflict(
        &self,
        resolution: ConflictResolution,
    ) -> Result<PrintProfile, UploadError> {
        let start = Instant::now();
        let span = tracing::span!(
            Level::INFO,
            "engine.resolve",
            version_id = %resolution.version_id,
            action = ?resolution.action
        );
        let _guard = span.enter();

        match self.resolve_inner(&resolution) {
            Ok(profile) => {
                info!(
                    profile_id = %profile.id,
                    elapsed_micros = start.elapsed().as_micros(),
                    "conflict_resolved"
                );
                Ok(profile)
            }
            Err(err) => {
                warn!(error = %err, "resolve_failure");
                Err(err)
            }
        }
    }

    fn resolve_inner(&self, resolution: &ConflictResolution) -> Result<PrintProfile, UploadError> {
        let content_hash = content_hash_hex(&resolution.buffer);
        let key = PendingKey {
            version_id: resolution.version_id,
            content_hash: content_hash.clone(),
        };
        let pending = self
            .pending
            .take_valid(&key, Utc::now())?
            .ok_or(ResolveError::PendingExpired)?;

        if pending.existing_profile_id != resolution.existing_profile_id {
            return Err(ResolveError::StaleConflict(
                "pending record points at a different existing profile".into(),
            )
            .into());
        }

        let profile = match parse_container(&resolution.buffer, &self.config.archive)
            .map_err(|err| ResolveError::Unparseable(err.to_string()))?
        {
            ParseOutcome::Parsed(profile) => profile,
            ParseOutcome::UnknownFormat => {
                return Err(ResolveError::Unparseable(
                    "buffer no longer matches any known slicer format".into(),
                )
                .into());
            }
        };

        if resolution.action == ResolveAction::Replace {
            // Compare-and-delete: the existing row is the precondition, so
            // a resolution racing a deletion fails instead of double-writing.
            self.profiles
                .delete_profile(resolution.existing_profile_id)
                .map_err(|err| match err {
                    StorageError::NotFound { .. } => UploadError::Resolve(
                        ResolveError::StaleConflict("existing profile was already removed".into()),
                    ),
                    other => UploadError::Storage(other),
                })?;
        }

        self.persist(
            resolution.version_id,
            resolution.source_file_id,
            &content_hash,
            profile,
        )
    }

    fn persist(
        &self,
        version_id: Uuid,
        source_file_id: Option<Uuid>,
        content_hash: &str,
        profile: ParsedProfile,
    ) -> Result<PrintProfile, UploadError> {
        let thumbnail_url = match &profile.thumbnail {
            Some(bytes) => {
                let key = format!("thumbnails/{version_id}/{content_hash}.png");
                Some(self.objects.upload(&key, bytes.clone())?)
            }
            None => None,
        };

        let stored = self.profiles.insert_profile(NewPrintProfile {
            version_id,
            source_file_id,
            printer_name: profile.printer_name,
            slicer: profile.slicer,
            thumbnail_url,
            metadata: profile.metadata,
        })?;
        Ok(stored)
    }

    /// Which completeness categories a version currently covers.
    ///
    /// `has_thumbnail` flags a preview the caller tracks outside this
    /// engine; thumbnails this engine stored itself are counted
    /// automatically.
    pub fn completeness(
        &self,
        version_id: Uuid,
        has_thumbnail: bool,
    ) -> Result<CompletenessStatus, StorageError> {
        let files = self.profiles.files_for_version(version_id)?;
        let has_thumbnail = has_thumbnail || self.version_has_stored_thumbnail(version_id)?;
        Ok(self.rules.status(&files, has_thumbnail))
    }

    /// May `file_name` be added to this version under the category limits?
    pub fn check_file_addition(
        &self,
        version_id: Uuid,
        file_name: &str,
        has_thumbnail: bool,
    ) -> Result<AddDecision, StorageError> {
        let files = self.profiles.files_for_version(version_id)?;
        let category = self.rules.classify_name(file_name);
        let has_thumbnail = has_thumbnail || self.version_has_stored_thumbnail(version_id)?;
        Ok(self.rules.add_decision(&files, category, has_thumbnail))
    }

    /// May this file still be removed, and how long remains?
    pub fn check_file_removal(&self, file: &FileRecord) -> RemovalDecision {
        self.rules.removal_decision(file.created_at, Utc::now())
    }

    /// Drop expired pending conflicts; returns how many were removed.
    /// Intended to be called from a periodic cleanup job.
    pub fn sweep_pending(&self) -> Result<usize, ConflictError> {
        self.pending.sweep_expired(Utc::now())
    }

    /// Number of conflicts currently awaiting a decision.
    pub fn pending_count(&self) -> Result<usize, ConflictError> {
        self.pending.held_count()
    }

    fn version_has_stored_thumbnail(&self, version_id: Uuid) -> Result<bool, StorageError> {
        let profiles = self.profiles.profiles_for_version(version_id)?;
        Ok(profiles.iter().any(|profile| profile.thumbnail_url.is_some()))
    }
}
