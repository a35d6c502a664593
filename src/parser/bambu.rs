//! Bambu Studio containers.
//!
//! Bambu exports carry their process settings in
//! `Metadata/project_settings.config` (JSON, values encoded as strings or
//! one-per-extruder arrays), a per-plate slice summary in
//! `Metadata/plate_1.json`, and XML-ish metadata blocks in
//! `Metadata/model_settings.config` and `Metadata/slice_info.config`. Every
//! field is extracted in layers: the structured value when present, then a
//! regex scan of the raw metadata text, then a derived fallback, and for the
//! printer name finally the placeholder.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::archive::{
    METADATA_THUMBNAIL_PATH, MODEL_SETTINGS_PATH, PLATE_JSON_PATH, PLATE_PNG_PATH,
    PROJECT_SETTINGS_PATH, SLICE_INFO_PATH, ZipContents,
};
use crate::profile::{
    Filament, ParsedProfile, PlateInfo, PrintSettings, ProfileMetadata, SlicerType,
    UNKNOWN_PRINTER, filament_summary,
};

use super::fields::{
    capture_f64, capture_string, capture_u64, count_occurrences, json_f64, json_f64_any,
    json_string, json_strings, json_u64,
};
use super::{ParseError, SlicerParser};

/// Header marker written by Bambu clients into `slice_info.config`.
const BAMBU_CLIENT_MARKER: &str = "X-BBL-Client";
/// Application marker in `model_settings.config`.
const BAMBU_APP_MARKER: &str = "BambuStudio";

static PRINTER_MODEL_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"key="printer_model(?:_id)?"\s+value="([^"]+)""#).ok());
static PREDICTION_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"key="prediction"\s+value="(\d+)""#).ok());
static WEIGHT_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"key="weight"\s+value="([0-9.]+)""#).ok());

/// Parser for Bambu Studio exports.
pub struct BambuParser;

impl SlicerParser for BambuParser {
    fn slicer(&self) -> SlicerType {
        SlicerType::Bambu
    }

    fn can_parse(&self, zip: &ZipContents) -> bool {
        zip.get_text(SLICE_INFO_PATH)
            .is_some_and(|text| text.contains(BAMBU_CLIENT_MARKER))
            || zip
                .get_text(MODEL_SETTINGS_PATH)
                .is_some_and(|text| text.contains(BAMBU_APP_MARKER))
    }

    fn parse(&self, zip: &ZipContents) -> Result<ParsedProfile, ParseError> {
        parse_bbl(zip, SlicerType::Bambu)
    }
}

/// Parse the shared Bambu container layout.
///
/// Orca exports keep this layout unchanged, so both parsers funnel here
/// tagged with their own dialect.
pub(super) fn parse_bbl(
    zip: &ZipContents,
    slicer: SlicerType,
) -> Result<ParsedProfile, ParseError> {
    let settings = load_json(zip, PROJECT_SETTINGS_PATH)?;
    let plate = load_json(zip, PLATE_JSON_PATH)?;
    let model_text = zip.get_text(MODEL_SETTINGS_PATH);
    let slice_text = zip.get_text(SLICE_INFO_PATH);

    let printer_name = printer_name(
        settings.as_ref(),
        model_text.as_deref(),
        slice_text.as_deref(),
        slicer,
    );

    let print_time_seconds = plate
        .as_ref()
        .and_then(|plate| json_u64(plate, "prediction"))
        .or_else(|| {
            slice_text
                .as_deref()
                .and_then(|text| capture_u64(&PREDICTION_RE, text))
        });

    let filament_weight_grams = plate
        .as_ref()
        .and_then(|plate| json_f64(plate, "weight"))
        .or_else(|| {
            slice_text
                .as_deref()
                .and_then(|text| capture_f64(&WEIGHT_RE, text))
        });

    let filaments = extract_filaments(plate.as_ref(), settings.as_ref());

    let print_settings = PrintSettings {
        layer_height: settings
            .as_ref()
            .and_then(|settings| json_f64(settings, "layer_height")),
        infill_percent: settings
            .as_ref()
            .and_then(|settings| json_f64(settings, "sparse_infill_density")),
        nozzle_temp: settings.as_ref().and_then(|settings| {
            json_f64_any(
                settings,
                &["nozzle_temperature", "nozzle_temperature_initial_layer"],
            )
        }),
        bed_temp: settings.as_ref().and_then(|settings| {
            json_f64_any(
                settings,
                &[
                    "bed_temperature",
                    "hot_plate_temp",
                    "textured_plate_temp",
                    "cool_plate_temp",
                    "eng_plate_temp",
                ],
            )
        }),
    };

    let plate_info = plate_layout(model_text.as_deref(), slice_text.as_deref());

    let thumbnail = zip
        .get(PLATE_PNG_PATH)
        .or_else(|| zip.get(METADATA_THUMBNAIL_PATH))
        .cloned();

    Ok(ParsedProfile {
        printer_name,
        slicer,
        thumbnail,
        metadata: ProfileMetadata {
            print_time_seconds,
            filament_summary: filament_summary(&filaments),
            settings: print_settings,
            plate_info,
            filament_weight_grams,
        },
    })
}

fn load_json(zip: &ZipContents, path: &str) -> Result<Option<Value>, ParseError> {
    let Some(text) = zip.get_text(path) else {
        return Ok(None);
    };
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|source| ParseError::InvalidJson {
            path: path.to_string(),
            source,
        })
}

fn printer_name(
    settings: Option<&Value>,
    model_text: Option<&str>,
    slice_text: Option<&str>,
    slicer: SlicerType,
) -> String {
    if let Some(name) = settings.and_then(|settings| json_string(settings, "printer_model")) {
        return name;
    }
    if let Some(name) = settings.and_then(|settings| json_string(settings, "printer_settings_id"))
    {
        return name;
    }
    if let Some(name) = model_text.and_then(|text| capture_string(&PRINTER_MODEL_RE, text)) {
        return name;
    }
    if let Some(name) = slice_text.and_then(|text| capture_string(&PRINTER_MODEL_RE, text)) {
        return name;
    }
    if let Some(name) = derived_name(settings, slicer) {
        return name;
    }
    UNKNOWN_PRINTER.to_string()
}

/// Last-resort name from the machine setup when no model id survives the
/// export. Distinguishable rather than pretty.
fn derived_name(settings: Option<&Value>, slicer: SlicerType) -> Option<String> {
    let settings = settings?;
    let nozzle = json_f64(settings, "nozzle_diameter");
    let bed = json_string(settings, "curr_bed_type");
    let brand = match slicer {
        SlicerType::Orca => "Orca",
        _ => "Bambu Lab",
    };
    match (nozzle, bed) {
        (Some(diameter), Some(bed)) => Some(format!("{brand} ({diameter}mm nozzle, {bed})")),
        (Some(diameter), None) => Some(format!("{brand} ({diameter}mm nozzle)")),
        (None, Some(bed)) => Some(format!("{brand} ({bed})")),
        (None, None) => None,
    }
}

fn extract_filaments(plate: Option<&Value>, settings: Option<&Value>) -> Vec<Filament> {
    if let Some(Value::Array(items)) = plate.and_then(|plate| plate.get("filaments")) {
        let filaments: Vec<Filament> = items
            .iter()
            .filter_map(|item| {
                let material = json_string(item, "type")?;
                Some(Filament {
                    material,
                    color: json_string(item, "color"),
                })
            })
            .collect();
        if !filaments.is_empty() {
            return filaments;
        }
    }

    let Some(settings) = settings else {
        return Vec::new();
    };
    let types = json_strings(settings, "filament_type");
    let colors = json_strings(settings, "filament_colour");
    types
        .into_iter()
        .enumerate()
        .map(|(idx, material)| Filament {
            material,
            color: colors.get(idx).cloned(),
        })
        .collect()
}

fn plate_layout(model_text: Option<&str>, slice_text: Option<&str>) -> Option<PlateInfo> {
    let text = model_text.or(slice_text)?;
    let plates = count_occurrences(text, "<plate");
    if plates == 0 {
        return None;
    }
    let copies = first_plate_instances(text).max(1);
    Some(PlateInfo {
        count: plates as u32,
        copies_per_plate: copies as u32,
    })
}

fn first_plate_instances(text: &str) -> usize {
    let Some(start) = text.find("<plate") else {
        return 0;
    };
    let rest = &text[start..];
    let end = rest.find("</plate>").unwrap_or(rest.len());
    count_occurrences(&rest[..end], "<model_instance")
}
