//! Vendor parser chain.
//!
//! Each slicer vendor ships its own container dialect; every parser is a
//! self-contained strategy behind [`SlicerParser`] with cheap marker-based
//! detection and a full extraction pass. Dispatch walks [`PARSER_CHAIN`] in
//! priority order and takes the first parser whose detection matches. A
//! parser that matches but then fails to extract is logged and skipped, so a
//! detection false-positive degrades to [`ParseOutcome::UnknownFormat`]
//! instead of failing the whole operation.

use std::time::Instant;

use thiserror::Error;
use tracing::{Level, info, warn};

use crate::archive::{ArchiveConfig, ArchiveError, ZipContents, extract_allowed};
use crate::profile::{ParsedProfile, SlicerType};

mod bambu;
mod fields;
mod orca;
mod prusa;

pub use bambu::BambuParser;
pub use orca::OrcaParser;
pub use prusa::PrusaParser;

/// Errors raised by a single vendor parser.
///
/// These never leave the dispatcher: a failing parser is logged and the
/// chain moves on to the next candidate.
#[derive(Debug, Error)]
pub enum ParseError {
    /// A settings entry was present but held malformed JSON.
    #[error("malformed JSON in {path}: {source}")]
    InvalidJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Detection matched but the entry it promised is gone.
    #[error("missing source entry {path}")]
    MissingSource { path: String },
}

/// One vendor dialect: marker detection plus full extraction.
pub trait SlicerParser: Send + Sync {
    /// Which dialect this parser produces.
    fn slicer(&self) -> SlicerType;

    /// Cheap signature check against the sandboxed contents.
    fn can_parse(&self, zip: &ZipContents) -> bool;

    /// Extract a normalized profile. Only called after `can_parse`.
    fn parse(&self, zip: &ZipContents) -> Result<ParsedProfile, ParseError>;
}

/// Registered parsers in detection priority order.
///
/// Order is load-bearing: Orca's container is a near-superset of Bambu's,
/// so the Bambu markers are checked first and the Orca marker second.
/// Prusa's presence-based check goes last.
pub static PARSER_CHAIN: [&dyn SlicerParser; 3] = [&BambuParser, &OrcaParser, &PrusaParser];

/// Result of running the parser chain over a sandboxed archive.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// Exactly one parser matched and extracted a profile.
    Parsed(ParsedProfile),
    /// No registered parser recognized the contents.
    UnknownFormat,
}

/// Unpack an archive buffer and run the parser chain over it.
///
/// Archive-level failures (not a ZIP, oversized entry) are the caller's
/// problem and propagate as [`ArchiveError`]. Parser-level failures are
/// swallowed into the chain walk, surfacing only as `UnknownFormat` when
/// every candidate is exhausted.
pub fn parse_container(
    buffer: &[u8],
    config: &ArchiveConfig,
) -> Result<ParseOutcome, ArchiveError> {
    let zip = extract_allowed(buffer, config)?;
    Ok(parse_contents(&zip))
}

/// Run the parser chain over already-sandboxed contents.
pub fn parse_contents(zip: &ZipContents) -> ParseOutcome {
    let start = Instant::now();
    let span = tracing::span!(Level::INFO, "parser.dispatch", entries = zip.len());
    let _guard = span.enter();

    for parser in PARSER_CHAIN {
        if !parser.can_parse(zip) {
            continue;
        }
        match parser.parse(zip) {
            Ok(profile) => {
                info!(
                    slicer = %parser.slicer(),
                    printer = %profile.printer_name,
                    elapsed_micros = start.elapsed().as_micros(),
                    "parse_success"
                );
                return ParseOutcome::Parsed(profile);
            }
            Err(err) => {
                warn!(
                    slicer = %parser.slicer(),
                    error = %err,
                    "parser_rejected"
                );
            }
        }
    }

    info!(
        entries = zip.len(),
        elapsed_micros = start.elapsed().as_micros(),
        "parse_unknown_format"
    );
    ParseOutcome::UnknownFormat
}
