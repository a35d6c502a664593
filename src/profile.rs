//! Parsed print-profile data model.
//!
//! [`ParsedProfile`] is what a vendor parser produces from one container:
//! the printer name as the slicer wrote it, the slicer dialect, an optional
//! thumbnail, and the extracted print metadata. Every metadata field is
//! optional; missing or malformed values stay `None` instead of turning into
//! sentinel numbers.

use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::matcher::normalize_printer_name;

/// Placeholder printer name when no extraction layer could produce one.
pub const UNKNOWN_PRINTER: &str = "Unknown Printer";

/// Slicer dialects the parser chain understands. Closed set; adding a vendor
/// means adding a parser.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SlicerType {
    Bambu,
    Orca,
    Prusa,
}

impl fmt::Display for SlicerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SlicerType::Bambu => "Bambu Studio",
            SlicerType::Orca => "OrcaSlicer",
            SlicerType::Prusa => "PrusaSlicer",
        };
        f.write_str(name)
    }
}

/// Everything extracted from one uploaded container.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedProfile {
    /// Printer name exactly as the slicer recorded it, or [`UNKNOWN_PRINTER`].
    pub printer_name: String,
    /// Which vendor parser recognized the container.
    pub slicer: SlicerType,
    /// Preview image bytes when the container carried one.
    pub thumbnail: Option<Bytes>,
    /// Extracted print metadata.
    pub metadata: ProfileMetadata,
}

impl ParsedProfile {
    /// Normalized form of the printer name, recomputed on demand.
    ///
    /// Only the raw name is ever persisted, so a change to the normalization
    /// rules applies retroactively to stored profiles.
    pub fn printer_name_normalized(&self) -> String {
        normalize_printer_name(&self.printer_name)
    }
}

/// Print metadata persisted alongside a profile row.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProfileMetadata {
    /// Estimated print time.
    pub print_time_seconds: Option<u64>,
    /// Caller-facing filament line, e.g. `"2x PLA (#FF0000, #00FF00), PETG"`.
    pub filament_summary: Option<String>,
    /// Key slicer settings.
    #[serde(default)]
    pub settings: PrintSettings,
    /// Plate layout when the container describes plates.
    pub plate_info: Option<PlateInfo>,
    /// Total filament weight.
    pub filament_weight_grams: Option<f64>,
}

/// The fixed set of slicer settings the extractor cares about.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PrintSettings {
    pub layer_height: Option<f64>,
    pub infill_percent: Option<f64>,
    pub nozzle_temp: Option<f64>,
    pub bed_temp: Option<f64>,
}

/// Plate layout summary for multi-plate projects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlateInfo {
    pub count: u32,
    pub copies_per_plate: u32,
}

/// One filament slot as the vendor config lists it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filament {
    pub material: String,
    pub color: Option<String>,
}

/// Render the caller-facing filament summary.
///
/// A single filament renders as `"{type} ({COLOR})"`. Multiple filaments are
/// grouped by type in first-appearance order; a group with more than one
/// filament renders as `"{count}x {type} ({color1, color2})"`. Colors are
/// uppercased and the parenthetical is omitted when a group has none.
pub fn filament_summary(filaments: &[Filament]) -> Option<String> {
    if filaments.is_empty() {
        return None;
    }

    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, (usize, Vec<String>)> = HashMap::new();
    for filament in filaments {
        let entry = groups
            .entry(filament.material.as_str())
            .or_insert_with(|| {
                order.push(filament.material.as_str());
                (0, Vec::new())
            });
        entry.0 += 1;
        if let Some(color) = &filament.color {
            let trimmed = color.trim();
            if !trimmed.is_empty() {
                entry.1.push(trimmed.to_uppercase());
            }
        }
    }

    let mut parts = Vec::with_capacity(order.len());
    for material in order {
        let (count, colors) = &groups[material];
        let mut part = if *count > 1 {
            format!("{count}x {material}")
        } else {
            material.to_string()
        };
        if !colors.is_empty() {
            part.push_str(" (");
            part.push_str(&colors.join(", "));
            part.push(')');
        }
        parts.push(part);
    }

    Some(parts.join(", "))
}
