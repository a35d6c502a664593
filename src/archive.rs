//! Allow-listed extraction of slicer project archives.
//!
//! Slicer projects (`.3mf`, Bambu `.gcode.3mf`, and friends) are ZIP
//! containers. Uploads are untrusted, so this module never exposes an
//! arbitrary-entry API: [`extract_allowed`] walks the central directory once,
//! keeps only entries on the configured allow-list, and returns them as an
//! immutable [`ZipContents`] map that the vendor parsers read from. Everything
//! else in the archive, including entries with hostile names, is dropped
//! without being decompressed.
//!
//! Entry names are normalized before matching: backslashes become slashes and
//! any name that is absolute, escapes the archive root, embeds a NUL, or
//! carries a Windows drive prefix is skipped. Per-entry reads are bounded by
//! [`ArchiveConfig::max_entry_bytes`]; an allow-listed entry that blows the
//! bound fails the whole attempt, since a config file that large is a hostile
//! archive rather than a dialect quirk.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::{Cursor, Read};

use bytes::Bytes;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Bambu/Orca object and plate layout.
pub const MODEL_SETTINGS_PATH: &str = "Metadata/model_settings.config";
/// Bambu/Orca process and printer settings (JSON).
pub const PROJECT_SETTINGS_PATH: &str = "Metadata/project_settings.config";
/// Bambu/Orca per-plate slice summary (JSON).
pub const PLATE_JSON_PATH: &str = "Metadata/plate_1.json";
/// Bambu/Orca plate preview render.
pub const PLATE_PNG_PATH: &str = "Metadata/plate_1.png";
/// Bambu/Orca project thumbnail.
pub const METADATA_THUMBNAIL_PATH: &str = "Metadata/thumbnail.png";
/// Bambu slice header, carries the `X-BBL-Client` marker.
pub const SLICE_INFO_PATH: &str = "Metadata/slice_info.config";
/// PrusaSlicer config at the archive root.
pub const PRUSA_CONFIG_PATH: &str = "slic3r_pe.config";
/// PrusaSlicer config under `Metadata/` (newer exports).
pub const PRUSA_METADATA_CONFIG_PATH: &str = "Metadata/Slic3r_PE.config";
/// PrusaSlicer thumbnail.
pub const THUMBNAILS_THUMBNAIL_PATH: &str = "Thumbnails/thumbnail.png";
/// The 3MF model document itself.
pub const MODEL_DOCUMENT_PATH: &str = "3D/3dmodel.model";
/// OPC content-type manifest present in every 3MF.
pub const CONTENT_TYPES_PATH: &str = "[Content_Types].xml";

/// Runtime configuration for the archive sandbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchiveConfig {
    /// Exact archive-relative paths eligible for extraction.
    #[serde(default = "ArchiveConfig::default_allowed_paths")]
    pub allowed_paths: Vec<String>,
    /// Path prefixes admitted in addition to the exact allow-list. Empty by
    /// default; lets a deployment pick up e.g. extra plate files without a
    /// code change.
    #[serde(default)]
    pub allowed_prefixes: Vec<String>,
    /// Upper bound on the decompressed size of a single allow-listed entry.
    #[serde(default = "ArchiveConfig::default_max_entry_bytes")]
    pub max_entry_bytes: u64,
    /// Extract allow-listed entries on the rayon pool. Results are merged
    /// into one map before any parser sees them.
    #[serde(default)]
    pub use_parallel: bool,
}

impl ArchiveConfig {
    pub(crate) fn default_allowed_paths() -> Vec<String> {
        [
            MODEL_SETTINGS_PATH,
            PROJECT_SETTINGS_PATH,
            PLATE_JSON_PATH,
            PLATE_PNG_PATH,
            METADATA_THUMBNAIL_PATH,
            SLICE_INFO_PATH,
            PRUSA_CONFIG_PATH,
            PRUSA_METADATA_CONFIG_PATH,
            THUMBNAILS_THUMBNAIL_PATH,
            MODEL_DOCUMENT_PATH,
            CONTENT_TYPES_PATH,
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    pub(crate) fn default_max_entry_bytes() -> u64 {
        32 * 1024 * 1024
    }

    /// Validate the sandbox configuration.
    pub fn validate(&self) -> Result<(), ArchiveError> {
        if self.allowed_paths.is_empty() && self.allowed_prefixes.is_empty() {
            return Err(ArchiveError::InvalidConfig(
                "allowed_paths and allowed_prefixes must not both be empty".into(),
            ));
        }
        if self.max_entry_bytes == 0 {
            return Err(ArchiveError::InvalidConfig(
                "max_entry_bytes must be >= 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            allowed_paths: Self::default_allowed_paths(),
            allowed_prefixes: Vec::new(),
            max_entry_bytes: Self::default_max_entry_bytes(),
            use_parallel: false,
        }
    }
}

/// Errors produced by the archive sandbox.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Invalid sandbox configuration.
    #[error("invalid archive config: {0}")]
    InvalidConfig(String),
    /// The buffer is not a readable ZIP container.
    #[error("container is not a readable archive: {0}")]
    Unreadable(String),
    /// An allow-listed entry decompressed past the configured bound.
    #[error("archive entry `{path}` exceeds the {limit}-byte entry limit")]
    EntryTooLarge { path: String, limit: u64 },
}

/// Allow-listed entries from one container, keyed by normalized path.
///
/// Built once per parse attempt and dropped when the attempt ends; parsers
/// can only look entries up, never enumerate the raw archive.
#[derive(Debug, Default)]
pub struct ZipContents {
    entries: HashMap<String, Bytes>,
}

impl ZipContents {
    /// Raw bytes of an extracted entry.
    pub fn get(&self, path: &str) -> Option<&Bytes> {
        self.entries.get(path)
    }

    /// An extracted entry decoded as text. Invalid UTF-8 sequences are
    /// replaced rather than rejected; vendor configs are ASCII in practice.
    pub fn get_text(&self, path: &str) -> Option<Cow<'_, str>> {
        self.entries
            .get(path)
            .map(|bytes| String::from_utf8_lossy(bytes))
    }

    /// Whether the entry was present and allow-listed.
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// Paths captured from this container.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn from_entries<I, P, B>(entries: I) -> Self
    where
        I: IntoIterator<Item = (P, B)>,
        P: Into<String>,
        B: AsRef<[u8]>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(path, bytes)| (path.into(), Bytes::copy_from_slice(bytes.as_ref())))
                .collect(),
        }
    }
}

/// Open `buffer` as a ZIP container and extract the allow-listed entries.
///
/// Entries outside the allow-list, and entries whose names fail
/// normalization, are skipped silently. A buffer that is not a ZIP at all is
/// fatal to the attempt.
pub fn extract_allowed(buffer: &[u8], cfg: &ArchiveConfig) -> Result<ZipContents, ArchiveError> {
    cfg.validate()?;

    let mut archive = zip::ZipArchive::new(Cursor::new(buffer))
        .map_err(|err| ArchiveError::Unreadable(err.to_string()))?;

    // Resolve the allow-list against the central directory up front; the
    // parallel path fans out per entry with its own reader over the buffer.
    let mut wanted: Vec<(String, String)> = Vec::new();
    for name in archive.file_names() {
        let Some(path) = normalize_entry_path(name) else {
            debug!(entry = name, "entry_name_rejected");
            continue;
        };
        if is_allowed(&path, cfg) {
            wanted.push((name.to_string(), path));
        }
    }

    let entries = if cfg.use_parallel {
        wanted
            .into_par_iter()
            .map(|(raw, path)| {
                let mut archive = zip::ZipArchive::new(Cursor::new(buffer))
                    .map_err(|err| ArchiveError::Unreadable(err.to_string()))?;
                let bytes = read_entry(&mut archive, &raw, &path, cfg.max_entry_bytes)?;
                Ok((path, bytes))
            })
            .collect::<Result<HashMap<_, _>, ArchiveError>>()?
    } else {
        let mut entries = HashMap::with_capacity(wanted.len());
        for (raw, path) in wanted {
            let bytes = read_entry(&mut archive, &raw, &path, cfg.max_entry_bytes)?;
            entries.insert(path, bytes);
        }
        entries
    };

    Ok(ZipContents { entries })
}

fn read_entry<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    raw_name: &str,
    path: &str,
    max_bytes: u64,
) -> Result<Bytes, ArchiveError> {
    let mut file = archive
        .by_name(raw_name)
        .map_err(|err| ArchiveError::Unreadable(err.to_string()))?;

    let mut out = Vec::new();
    let mut total = 0u64;
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|err| ArchiveError::Unreadable(err.to_string()))?;
        if n == 0 {
            break;
        }
        total += n as u64;
        if total > max_bytes {
            return Err(ArchiveError::EntryTooLarge {
                path: path.to_string(),
                limit: max_bytes,
            });
        }
        out.extend_from_slice(&buf[..n]);
    }
    Ok(Bytes::from(out))
}

/// Normalize an archive entry name for allow-list matching. Returns `None`
/// for names that must never match: absolute paths, drive prefixes, NUL
/// bytes, and any `..` segment.
fn normalize_entry_path(raw: &str) -> Option<String> {
    let mut cleaned = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => cleaned.push('/'),
            '\0' => return None,
            _ => cleaned.push(ch),
        }
    }

    if cleaned.starts_with('/') {
        return None;
    }

    let bytes = cleaned.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return None;
    }

    let mut segments: Vec<&str> = Vec::new();
    for seg in cleaned.split('/') {
        if seg.is_empty() || seg == "." {
            continue;
        }
        if seg == ".." {
            return None;
        }
        segments.push(seg);
    }

    if segments.is_empty() {
        return None;
    }
    Some(segments.join("/"))
}

fn is_allowed(path: &str, cfg: &ArchiveConfig) -> bool {
    cfg.allowed_paths.iter().any(|allowed| allowed == path)
        || cfg
            .allowed_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
}
