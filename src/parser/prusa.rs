//! PrusaSlicer containers.
//!
//! Prusa projects embed a flat `key = value` config bundle, either at the
//! archive root (`slic3r_pe.config`) or under `Metadata/`. Values that vary
//! per extruder are `;`-joined lists. Durations come as human-readable
//! strings like `2h 30m 10s`.

use crate::archive::{
    METADATA_THUMBNAIL_PATH, PRUSA_CONFIG_PATH, PRUSA_METADATA_CONFIG_PATH,
    THUMBNAILS_THUMBNAIL_PATH, ZipContents,
};
use crate::profile::{
    Filament, ParsedProfile, PrintSettings, ProfileMetadata, SlicerType, UNKNOWN_PRINTER,
    filament_summary,
};

use super::fields::{ini_value, non_empty, parse_duration_secs, parse_f64, split_list};
use super::{ParseError, SlicerParser};

/// Parser for PrusaSlicer exports.
pub struct PrusaParser;

impl SlicerParser for PrusaParser {
    fn slicer(&self) -> SlicerType {
        SlicerType::Prusa
    }

    fn can_parse(&self, zip: &ZipContents) -> bool {
        // Presence of the config bundle is the marker; Prusa writes no
        // application stamp worth scanning for.
        zip.contains(PRUSA_CONFIG_PATH) || zip.contains(PRUSA_METADATA_CONFIG_PATH)
    }

    fn parse(&self, zip: &ZipContents) -> Result<ParsedProfile, ParseError> {
        let config = zip
            .get_text(PRUSA_CONFIG_PATH)
            .or_else(|| zip.get_text(PRUSA_METADATA_CONFIG_PATH))
            .ok_or_else(|| ParseError::MissingSource {
                path: PRUSA_CONFIG_PATH.to_string(),
            })?;

        let printer_name = printer_name(&config);

        let print_time_seconds = ini_value(&config, "estimated printing time (normal mode)")
            .and_then(|text| parse_duration_secs(&text));

        let filaments = extract_filaments(&config);

        let settings = PrintSettings {
            layer_height: ini_value(&config, "layer_height").and_then(|v| parse_f64(&v)),
            infill_percent: ini_value(&config, "fill_density").and_then(|v| parse_f64(&v)),
            nozzle_temp: first_of_list(&config, "temperature"),
            bed_temp: first_of_list(&config, "bed_temperature"),
        };

        let thumbnail = zip
            .get(THUMBNAILS_THUMBNAIL_PATH)
            .or_else(|| zip.get(METADATA_THUMBNAIL_PATH))
            .cloned();

        Ok(ParsedProfile {
            printer_name,
            slicer: SlicerType::Prusa,
            thumbnail,
            metadata: ProfileMetadata {
                print_time_seconds,
                filament_summary: filament_summary(&filaments),
                settings,
                plate_info: None,
                filament_weight_grams: ini_value(&config, "total filament used [g]")
                    .and_then(|v| parse_f64(&v)),
            },
        })
    }
}

fn printer_name(config: &str) -> String {
    if let Some(name) = ini_value(config, "printer_settings_id").and_then(non_empty) {
        return name;
    }
    if let Some(name) = ini_value(config, "printer_model").and_then(non_empty) {
        return name;
    }
    if let Some(diameter) = first_of_list(config, "nozzle_diameter") {
        return format!("Prusa ({diameter}mm nozzle)");
    }
    UNKNOWN_PRINTER.to_string()
}

fn extract_filaments(config: &str) -> Vec<Filament> {
    let types = ini_value(config, "filament_type")
        .map(|v| split_list(&v))
        .unwrap_or_default();
    let colors = ini_value(config, "filament_colour")
        .map(|v| split_list(&v))
        .unwrap_or_default();
    types
        .into_iter()
        .enumerate()
        .map(|(idx, material)| Filament {
            material,
            color: colors.get(idx).cloned(),
        })
        .collect()
}

/// First entry of a `;`-joined per-extruder list, parsed as a number.
fn first_of_list(config: &str, key: &str) -> Option<f64> {
    let value = ini_value(config, key)?;
    let first = split_list(&value).into_iter().next()?;
    parse_f64(&first)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = "\
; generated by PrusaSlicer 2.7.4 on 2024-05-11
bed_temperature = 60;55
estimated printing time (normal mode) = 2h 30m 10s
filament_colour = #FF8000;#0080FF
filament_type = PLA;PETG
fill_density = 15%
layer_height = 0.2
nozzle_diameter = 0.4;0.4
printer_model = MK4
printer_settings_id = Original Prusa MK4 0.4 nozzle
temperature = 215;230
";

    #[test]
    fn detected_via_root_config() {
        let zip = ZipContents::from_entries([(PRUSA_CONFIG_PATH, CONFIG)]);
        assert!(PrusaParser.can_parse(&zip));
    }

    #[test]
    fn detected_via_metadata_config() {
        let zip = ZipContents::from_entries([(PRUSA_METADATA_CONFIG_PATH, CONFIG)]);
        assert!(PrusaParser.can_parse(&zip));
    }

    #[test]
    fn undetected_without_config_bundle() {
        let zip = ZipContents::from_entries([("3D/3dmodel.model", "<model/>")]);
        assert!(!PrusaParser.can_parse(&zip));
    }

    #[test]
    fn settings_id_preferred_for_printer_name() {
        let zip = ZipContents::from_entries([(PRUSA_CONFIG_PATH, CONFIG)]);
        let profile = PrusaParser.parse(&zip).expect("parse");
        assert_eq!(profile.printer_name, "Original Prusa MK4 0.4 nozzle");
        assert_eq!(profile.slicer, SlicerType::Prusa);
    }

    #[test]
    fn printer_model_backfills_a_blank_settings_id() {
        let config = "printer_settings_id = \nprinter_model = MK4\n";
        let zip = ZipContents::from_entries([(PRUSA_CONFIG_PATH, config)]);
        let profile = PrusaParser.parse(&zip).expect("parse");
        assert_eq!(profile.printer_name, "MK4");
    }

    #[test]
    fn nozzle_heuristic_then_placeholder() {
        let zip =
            ZipContents::from_entries([(PRUSA_CONFIG_PATH, "nozzle_diameter = 0.6;0.6\n")]);
        let profile = PrusaParser.parse(&zip).expect("parse");
        assert_eq!(profile.printer_name, "Prusa (0.6mm nozzle)");

        let bare = ZipContents::from_entries([(PRUSA_CONFIG_PATH, "layer_height = 0.2\n")]);
        let profile = PrusaParser.parse(&bare).expect("parse");
        assert_eq!(profile.printer_name, UNKNOWN_PRINTER);
    }

    #[test]
    fn duration_string_becomes_seconds() {
        let zip = ZipContents::from_entries([(PRUSA_CONFIG_PATH, CONFIG)]);
        let profile = PrusaParser.parse(&zip).expect("parse");
        assert_eq!(profile.metadata.print_time_seconds, Some(9010));
    }

    #[test]
    fn filament_lists_zip_into_a_summary() {
        let zip = ZipContents::from_entries([(PRUSA_CONFIG_PATH, CONFIG)]);
        let profile = PrusaParser.parse(&zip).expect("parse");
        assert_eq!(
            profile.metadata.filament_summary.as_deref(),
            Some("PLA (#FF8000), PETG (#0080FF)")
        );
    }

    #[test]
    fn per_extruder_lists_take_the_first_entry() {
        let zip = ZipContents::from_entries([(PRUSA_CONFIG_PATH, CONFIG)]);
        let profile = PrusaParser.parse(&zip).expect("parse");
        let settings = &profile.metadata.settings;
        assert_eq!(settings.layer_height, Some(0.2));
        assert_eq!(settings.infill_percent, Some(15.0));
        assert_eq!(settings.nozzle_temp, Some(215.0));
        assert_eq!(settings.bed_temp, Some(60.0));
    }

    #[test]
    fn thumbnail_prefers_the_thumbnails_directory() {
        let zip = ZipContents::from_entries([
            (PRUSA_CONFIG_PATH, CONFIG),
            (THUMBNAILS_THUMBNAIL_PATH, "thumbs-dir-bytes"),
            (METADATA_THUMBNAIL_PATH, "metadata-bytes"),
        ]);
        let profile = PrusaParser.parse(&zip).expect("parse");
        assert_eq!(
            profile.thumbnail.as_deref(),
            Some(b"thumbs-dir-bytes".as_slice())
        );
    }
}
