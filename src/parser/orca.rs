//! OrcaSlicer containers.
//!
//! Orca forked Bambu Studio and kept its container layout byte-for-byte, so
//! the only Orca-specific work is detection. Extraction delegates to the
//! shared Bambu routine tagged with the Orca dialect.

use crate::archive::{MODEL_SETTINGS_PATH, PROJECT_SETTINGS_PATH, ZipContents};
use crate::profile::{ParsedProfile, SlicerType};

use super::bambu::parse_bbl;
use super::{ParseError, SlicerParser};

/// Application marker written by Orca builds.
const ORCA_APP_MARKER: &str = "OrcaSlicer";

/// Parser for OrcaSlicer exports.
pub struct OrcaParser;

impl SlicerParser for OrcaParser {
    fn slicer(&self) -> SlicerType {
        SlicerType::Orca
    }

    fn can_parse(&self, zip: &ZipContents) -> bool {
        // Orca stamps its name either in the model settings Application
        // field or in the generator key of the project settings JSON.
        zip.get_text(MODEL_SETTINGS_PATH)
            .is_some_and(|text| text.contains(ORCA_APP_MARKER))
            || zip
                .get_text(PROJECT_SETTINGS_PATH)
                .is_some_and(|text| text.contains(ORCA_APP_MARKER))
    }

    fn parse(&self, zip: &ZipContents) -> Result<ParsedProfile, ParseError> {
        parse_bbl(zip, SlicerType::Orca)
    }
}
