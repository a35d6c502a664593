//! Print-profile extraction and conflict resolution for slicer project
//! archives.
//!
//! Feed the engine the raw bytes of a 3MF-style container and it will
//! sandbox the ZIP, detect which slicer produced it (Bambu Studio,
//! OrcaSlicer, PrusaSlicer), extract a normalized print profile, and check
//! the printer identity against the profiles already attached to the same
//! model version. A fuzzy identity collision suspends the upload into a
//! pending conflict that the caller settles with an explicit replace or
//! keep-both decision. Alongside the upload path, the completeness rules
//! classify version files into model/slicer/image categories, enforce
//! per-category limits, and time-box file removal.

pub mod archive;
pub mod completeness;
pub mod config;
pub mod conflict;
pub mod engine;
pub mod hash;
pub mod matcher;
pub mod parser;
pub mod profile;
pub mod storage;

pub use archive::{ArchiveConfig, ArchiveError, ZipContents, extract_allowed};
pub use completeness::{
    AddDecision, CompletenessError, CompletenessStatus, FileCategory, FileRules, FilesConfig,
    RemovalDecision, format_remaining,
};
pub use config::{ConfigLoadError, EngineConfig};
pub use conflict::{
    ConflictConfig, ConflictError, PendingConflict, PendingConflictStore, PendingKey,
    ResolveAction,
};
pub use engine::{
    ConflictDetails, ConflictResolution, ProfileEngine, ProfileUpload, ResolveError, UploadError,
    UploadOutcome,
};
pub use hash::content_hash_hex;
pub use matcher::{
    MatcherConfig, MatcherError, NameMatch, find_conflict, levenshtein, normalize_printer_name,
    similarity,
};
pub use parser::{
    BambuParser, OrcaParser, PARSER_CHAIN, ParseError, ParseOutcome, PrusaParser, SlicerParser,
    parse_container, parse_contents,
};
pub use profile::{
    Filament, ParsedProfile, PlateInfo, PrintSettings, ProfileMetadata, SlicerType,
    UNKNOWN_PRINTER, filament_summary,
};
pub use storage::{
    FileRecord, InMemoryObjectStore, InMemoryProfileStore, NewPrintProfile, ObjectStore,
    PrintProfile, ProfileStore, StorageError,
};
