//! Content identity for uploaded containers.
//!
//! An upload is identified by the SHA-256 of its raw bytes. The hex digest
//! keys pending-conflict records and content-addressed thumbnail objects, so
//! a buffer resubmitted during conflict resolution maps back to the record
//! that was held for it without the engine retaining the bytes.

use sha2::{Digest, Sha256};

/// Hash an uploaded buffer with SHA-256 and return the hex digest.
///
/// # Examples
///
/// ```rust
/// use slicemeta::content_hash_hex;
///
/// let hash = content_hash_hex(b"PK\x03\x04");
/// assert_eq!(hash.len(), 64);
/// assert_eq!(hash, content_hash_hex(b"PK\x03\x04"));
/// ```
pub fn content_hash_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
