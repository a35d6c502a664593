//! Pending printer-identity conflicts.
//!
//! A detected conflict suspends the upload workflow: nothing is persisted
//! until the caller comes back with a decision, which may be a separate call
//! minutes later or never. The suspension is modeled as an explicit
//! [`PendingConflict`] record keyed by the version and the uploaded bytes,
//! held in process with a TTL so abandoned conflicts age out instead of
//! accumulating forever.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the conflict layer.
#[derive(Debug, Error)]
pub enum ConflictError {
    /// Configuration failed validation.
    #[error("invalid conflict config: {0}")]
    InvalidConfig(String),

    /// The pending store could not be read or written.
    #[error("pending conflict store failure: {0}")]
    Store(String),
}

impl ConflictError {
    pub fn store<S: Into<String>>(msg: S) -> Self {
        ConflictError::Store(msg.into())
    }
}

/// Tuning for the pending-conflict hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictConfig {
    /// Seconds an unresolved conflict stays claimable before expiring.
    #[serde(default = "ConflictConfig::default_pending_ttl_secs")]
    pub pending_ttl_secs: u64,
}

impl ConflictConfig {
    pub(crate) fn default_pending_ttl_secs() -> u64 {
        86_400
    }

    /// The hold TTL as a duration.
    pub fn ttl(&self) -> Duration {
        Duration::seconds(self.pending_ttl_secs as i64)
    }

    pub fn validate(&self) -> Result<(), ConflictError> {
        if self.pending_ttl_secs == 0 {
            return Err(ConflictError::InvalidConfig(
                "pending_ttl_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            pending_ttl_secs: Self::default_pending_ttl_secs(),
        }
    }
}

/// Caller decision for a detected conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveAction {
    /// Delete the existing profile and persist the new one in its place.
    Replace,
    /// Persist the new profile alongside the existing one.
    KeepBoth,
}

/// Identity of a held conflict: the model version plus the exact uploaded
/// bytes, so resubmitting different content never claims someone else's
/// pending decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingKey {
    pub version_id: Uuid,
    /// Hex SHA-256 of the uploaded archive buffer.
    pub content_hash: String,
}

/// A detected conflict awaiting a caller decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingConflict {
    pub key: PendingKey,
    /// The already-persisted profile the candidate collided with.
    pub existing_profile_id: Uuid,
    pub candidate_printer_name: String,
    pub similarity: f64,
    pub held_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingConflict {
    pub fn new(
        key: PendingKey,
        existing_profile_id: Uuid,
        candidate_printer_name: String,
        similarity: f64,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            key,
            existing_profile_id,
            candidate_printer_name,
            similarity,
            held_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// In-process registry of conflicts awaiting resolution.
#[derive(Debug, Default)]
pub struct PendingConflictStore {
    held: RwLock<HashMap<PendingKey, PendingConflict>>,
}

impl PendingConflictStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a detected conflict. Re-uploading the same bytes for the same
    /// version refreshes the existing hold rather than stacking a second.
    pub fn hold(&self, conflict: PendingConflict) -> Result<(), ConflictError> {
        let mut held = self
            .held
            .write()
            .map_err(|_| ConflictError::store("poisoned lock"))?;
        held.insert(conflict.key.clone(), conflict);
        Ok(())
    }

    /// Claim a held conflict if it is still within its TTL.
    ///
    /// Removal and the expiry check happen under one write lock, so a
    /// double-submitted resolution claims the record at most once; the
    /// loser sees `None`. An expired record is dropped on the way out.
    pub fn take_valid(
        &self,
        key: &PendingKey,
        now: DateTime<Utc>,
    ) -> Result<Option<PendingConflict>, ConflictError> {
        let mut held = self
            .held
            .write()
            .map_err(|_| ConflictError::store("poisoned lock"))?;
        match held.remove(key) {
            Some(conflict) if conflict.is_expired(now) => Ok(None),
            other => Ok(other),
        }
    }

    /// Drop every record past its TTL, returning how many were removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, ConflictError> {
        let mut held = self
            .held
            .write()
            .map_err(|_| ConflictError::store("poisoned lock"))?;
        let before = held.len();
        held.retain(|_, conflict| !conflict.is_expired(now));
        Ok(before - held.len())
    }

    /// Number of conflicts currently held.
    pub fn held_count(&self) -> Result<usize, ConflictError> {
        let held = self
            .held
            .read()
            .map_err(|_| ConflictError::store("poisoned lock"))?;
        Ok(held.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(version_id: Uuid, hash: &str, now: DateTime<Utc>, ttl_secs: i64) -> PendingConflict {
        PendingConflict::new(
            PendingKey {
                version_id,
                content_hash: hash.to_string(),
            },
            Uuid::new_v4(),
            "Bambu Lab X1C".to_string(),
            0.87,
            now,
            Duration::seconds(ttl_secs),
        )
    }

    #[test]
    fn default_ttl_is_one_day() {
        let config = ConflictConfig::default();
        assert_eq!(config.pending_ttl_secs, 86_400);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_ttl_fails_validation() {
        let config = ConflictConfig {
            pending_ttl_secs: 0,
        };
        assert!(matches!(
            config.validate(),
            Err(ConflictError::InvalidConfig(_))
        ));
    }

    #[test]
    fn held_conflict_is_claimable_exactly_once() {
        let store = PendingConflictStore::new();
        let now = Utc::now();
        let conflict = sample(Uuid::new_v4(), "abc123", now, 3600);
        let key = conflict.key.clone();

        store.hold(conflict.clone()).expect("hold");
        assert_eq!(store.held_count().expect("count"), 1);

        let claimed = store.take_valid(&key, now).expect("take");
        assert_eq!(claimed, Some(conflict));

        // A double-submit loses the race for the same record.
        assert_eq!(store.take_valid(&key, now).expect("retake"), None);
        assert_eq!(store.held_count().expect("count"), 0);
    }

    #[test]
    fn expired_record_is_not_claimable() {
        let store = PendingConflictStore::new();
        let held_at = Utc::now() - Duration::seconds(7200);
        let conflict = sample(Uuid::new_v4(), "abc123", held_at, 3600);
        let key = conflict.key.clone();

        store.hold(conflict).expect("hold");
        assert_eq!(store.take_valid(&key, Utc::now()).expect("take"), None);
        // The dead record was dropped on the failed claim.
        assert_eq!(store.held_count().expect("count"), 0);
    }

    #[test]
    fn reholding_the_same_key_refreshes_the_expiry() {
        let store = PendingConflictStore::new();
        let version_id = Uuid::new_v4();
        let early = Utc::now();
        let late = early + Duration::seconds(600);

        store.hold(sample(version_id, "abc123", early, 3600)).expect("hold");
        store.hold(sample(version_id, "abc123", late, 3600)).expect("rehold");

        assert_eq!(store.held_count().expect("count"), 1);
        let claimed = store
            .take_valid(
                &PendingKey {
                    version_id,
                    content_hash: "abc123".to_string(),
                },
                early,
            )
            .expect("take")
            .expect("still held");
        assert_eq!(claimed.held_at, late);
    }

    #[test]
    fn distinct_buffers_hold_distinct_records() {
        let store = PendingConflictStore::new();
        let version_id = Uuid::new_v4();
        let now = Utc::now();

        store.hold(sample(version_id, "aaa", now, 3600)).expect("hold");
        store.hold(sample(version_id, "bbb", now, 3600)).expect("hold");
        assert_eq!(store.held_count().expect("count"), 2);
    }

    #[test]
    fn sweep_drops_only_expired_records() {
        let store = PendingConflictStore::new();
        let now = Utc::now();
        let stale_start = now - Duration::seconds(7200);

        store
            .hold(sample(Uuid::new_v4(), "fresh", now, 3600))
            .expect("hold");
        store
            .hold(sample(Uuid::new_v4(), "stale", stale_start, 3600))
            .expect("hold");

        assert_eq!(store.sweep_expired(now).expect("sweep"), 1);
        assert_eq!(store.held_count().expect("count"), 1);
    }
}
