use std::io::{Cursor, Write};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use uuid::Uuid;
use zip::write::{SimpleFileOptions, ZipWriter};

use slicemeta::{
    AddDecision, ConflictResolution, EngineConfig, InMemoryObjectStore, InMemoryProfileStore,
    ProfileEngine, ProfileStore, ProfileUpload, ResolveAction, SlicerType, UploadOutcome,
    content_hash_hex,
};

const BAMBU_SLICE_INFO: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<config>
  <header>
    <header_item key="X-BBL-Client-Type" value="slicer"/>
  </header>
  <plate>
    <metadata key="printer_model_id" value="Bambu Lab X1 Carbon"/>
  </plate>
</config>"#;

const BAMBU_PLATE_JSON: &str =
    r##"{"prediction": 3600, "weight": 25.4, "filaments": [{"type": "PLA", "color": "#FF0000"}]}"##;

const PRUSA_CONFIG: &str = "\
printer_settings_id = Original Prusa MK4 0.4 nozzle
estimated printing time (normal mode) = 1h 30m
filament_type = PLA
filament_colour = #00FF00
layer_height = 0.2
";

fn build_archive(entries: &[(&str, &[u8])]) -> Bytes {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (path, body) in entries {
        writer
            .start_file(*path, SimpleFileOptions::default())
            .expect("start entry");
        writer.write_all(body).expect("write entry");
    }
    Bytes::from(writer.finish().expect("finish archive").into_inner())
}

fn bambu_archive() -> Bytes {
    build_archive(&[
        ("Metadata/slice_info.config", BAMBU_SLICE_INFO.as_bytes()),
        ("Metadata/plate_1.json", BAMBU_PLATE_JSON.as_bytes()),
        ("Metadata/plate_1.png", b"plate-png"),
    ])
}

fn prusa_archive() -> Bytes {
    build_archive(&[("slic3r_pe.config", PRUSA_CONFIG.as_bytes())])
}

fn engine_with_stores() -> (ProfileEngine, Arc<InMemoryProfileStore>, Arc<InMemoryObjectStore>) {
    let profiles = Arc::new(InMemoryProfileStore::new());
    let objects = Arc::new(InMemoryObjectStore::new());
    let engine = ProfileEngine::new(EngineConfig::default(), profiles.clone(), objects.clone())
        .expect("valid config");
    (engine, profiles, objects)
}

fn upload(version_id: Uuid, buffer: Bytes) -> ProfileUpload {
    ProfileUpload {
        version_id,
        source_file_id: None,
        buffer,
    }
}

fn expect_persisted(outcome: UploadOutcome) -> slicemeta::PrintProfile {
    match outcome {
        UploadOutcome::Persisted(profile) => profile,
        other => panic!("expected persisted profile, got {other:?}"),
    }
}

fn expect_conflict(outcome: UploadOutcome) -> slicemeta::ConflictDetails {
    match outcome {
        UploadOutcome::ConflictDetected(details) => details,
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[test]
fn bambu_upload_extracts_the_plate_metadata() {
    let (engine, _, objects) = engine_with_stores();
    let version_id = Uuid::new_v4();
    let buffer = bambu_archive();
    let hash = content_hash_hex(&buffer);

    let profile = expect_persisted(engine.upload_profile(upload(version_id, buffer)).expect("upload"));

    assert_eq!(profile.printer_name, "Bambu Lab X1 Carbon");
    assert_eq!(profile.slicer, SlicerType::Bambu);
    assert_eq!(profile.metadata.print_time_seconds, Some(3600));
    assert_eq!(profile.metadata.filament_weight_grams, Some(25.4));
    assert_eq!(
        profile.metadata.filament_summary.as_deref(),
        Some("PLA (#FF0000)")
    );

    let key = format!("thumbnails/{version_id}/{hash}.png");
    let expected_url = format!("mem://{key}");
    assert_eq!(profile.thumbnail_url.as_deref(), Some(expected_url.as_str()));
    assert_eq!(objects.get(&key).expect("get"), Some(Bytes::from_static(b"plate-png")));
}

#[test]
fn prusa_upload_extracts_the_config_bundle() {
    let (engine, _, _) = engine_with_stores();
    let version_id = Uuid::new_v4();

    let profile =
        expect_persisted(engine.upload_profile(upload(version_id, prusa_archive())).expect("upload"));

    assert_eq!(profile.printer_name, "Original Prusa MK4 0.4 nozzle");
    assert_eq!(profile.slicer, SlicerType::Prusa);
    assert_eq!(profile.metadata.print_time_seconds, Some(5400));
    assert_eq!(profile.metadata.filament_summary.as_deref(), Some("PLA (#00FF00)"));
    assert!(profile.thumbnail_url.is_none());
}

#[test]
fn orca_upload_flows_through_the_shared_container_layout() {
    let (engine, _, _) = engine_with_stores();
    let version_id = Uuid::new_v4();
    let settings = r#"{"generator": "OrcaSlicer-2.1.1", "printer_model": "Voron 2.4 350"}"#;
    let buffer = build_archive(&[("Metadata/project_settings.config", settings.as_bytes())]);

    let profile = expect_persisted(engine.upload_profile(upload(version_id, buffer)).expect("upload"));
    assert_eq!(profile.slicer, SlicerType::Orca);
    assert_eq!(profile.printer_name, "Voron 2.4 350");
}

#[test]
fn unknown_container_is_a_distinct_outcome_not_an_error() {
    let (engine, profiles, _) = engine_with_stores();
    let version_id = Uuid::new_v4();
    let buffer = build_archive(&[("3D/3dmodel.model", b"<model/>")]);

    let outcome = engine.upload_profile(upload(version_id, buffer)).expect("upload");
    assert_eq!(outcome, UploadOutcome::UnknownFormat);
    assert!(profiles.profiles_for_version(version_id).expect("list").is_empty());
}

#[test]
fn conflict_spans_two_calls_and_keep_both_lists_both() {
    let (engine, profiles, _) = engine_with_stores();
    let version_id = Uuid::new_v4();

    let existing =
        expect_persisted(engine.upload_profile(upload(version_id, bambu_archive())).expect("upload"));

    // Near-identical identity: one inserted letter after normalization.
    let near_info = BAMBU_SLICE_INFO.replace("Bambu Lab X1 Carbon", "Bambu Lab X1E Carbon");
    let near = build_archive(&[("Metadata/slice_info.config", near_info.as_bytes())]);

    let details = expect_conflict(
        engine
            .upload_profile(upload(version_id, near.clone()))
            .expect("upload"),
    );
    assert_eq!(details.existing_profile_id, existing.id);
    assert_eq!(details.existing_printer_name, "Bambu Lab X1 Carbon");
    assert_eq!(details.candidate_printer_name, "Bambu Lab X1E Carbon");
    assert!(details.similarity >= 0.8);

    // The workflow is suspended: nothing was inserted by the detect call.
    assert_eq!(profiles.profiles_for_version(version_id).expect("list").len(), 1);

    let resolved = engine
        .resolve_conflict(ConflictResolution {
            version_id,
            existing_profile_id: details.existing_profile_id,
            action: ResolveAction::KeepBoth,
            source_file_id: None,
            buffer: near,
        })
        .expect("resolution");

    let listed = profiles.profiles_for_version(version_id).expect("list");
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, existing.id);
    assert_eq!(listed[1].id, resolved.id);
    assert_eq!(listed[1].printer_name, "Bambu Lab X1E Carbon");
}

#[test]
fn replace_resolution_swaps_the_existing_profile() {
    let (engine, profiles, _) = engine_with_stores();
    let version_id = Uuid::new_v4();

    let existing =
        expect_persisted(engine.upload_profile(upload(version_id, bambu_archive())).expect("upload"));

    let near_info = BAMBU_SLICE_INFO.replace("Bambu Lab X1 Carbon", "Bambu Lab X1E Carbon");
    let near = build_archive(&[("Metadata/slice_info.config", near_info.as_bytes())]);
    let details = expect_conflict(
        engine
            .upload_profile(upload(version_id, near.clone()))
            .expect("upload"),
    );

    let resolved = engine
        .resolve_conflict(ConflictResolution {
            version_id,
            existing_profile_id: details.existing_profile_id,
            action: ResolveAction::Replace,
            source_file_id: None,
            buffer: near,
        })
        .expect("resolution");

    let listed = profiles.profiles_for_version(version_id).expect("list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, resolved.id);
    assert_ne!(listed[0].id, existing.id);
    assert_eq!(listed[0].printer_name, "Bambu Lab X1E Carbon");
}

#[test]
fn profiles_on_other_versions_never_conflict() {
    let (engine, _, _) = engine_with_stores();
    let version_a = Uuid::new_v4();
    let version_b = Uuid::new_v4();

    expect_persisted(engine.upload_profile(upload(version_a, bambu_archive())).expect("upload"));
    // Identical printer name, different version: no cross-talk.
    expect_persisted(engine.upload_profile(upload(version_b, bambu_archive())).expect("upload"));
}

#[test]
fn raised_threshold_lets_similar_names_coexist() {
    let yaml = r#"
version: "1.0"
matcher:
  similarity_threshold: 0.95
"#;
    let config = EngineConfig::from_yaml(yaml).expect("config");
    let engine = ProfileEngine::in_memory(config).expect("engine");
    let version_id = Uuid::new_v4();

    expect_persisted(engine.upload_profile(upload(version_id, bambu_archive())).expect("upload"));

    // "bambulabx1ecarbon" scores ~0.94 against "bambulabx1carbon": a
    // conflict under the default 0.8, clean under 0.95.
    let near_info = BAMBU_SLICE_INFO.replace("Bambu Lab X1 Carbon", "Bambu Lab X1E Carbon");
    let near = build_archive(&[("Metadata/slice_info.config", near_info.as_bytes())]);
    expect_persisted(engine.upload_profile(upload(version_id, near)).expect("upload"));
}

#[test]
fn completeness_reflects_files_and_stored_thumbnail() {
    let (engine, profiles, _) = engine_with_stores();
    let version_id = Uuid::new_v4();

    profiles
        .add_file(version_id, "benchy.stl", Utc::now())
        .expect("seed");
    profiles
        .add_file(version_id, "benchy.3mf", Utc::now())
        .expect("seed");

    let status = engine.completeness(version_id, false).expect("status");
    assert!(status.has_model);
    assert!(status.has_slicer);
    assert!(!status.has_image);
    assert!(!status.is_complete());

    // The uploaded profile's thumbnail completes the image slot.
    expect_persisted(engine.upload_profile(upload(version_id, bambu_archive())).expect("upload"));
    let status = engine.completeness(version_id, false).expect("status");
    assert!(status.has_image);
    assert!(status.is_complete());
}

#[test]
fn category_limits_apply_through_the_engine() {
    let (engine, profiles, _) = engine_with_stores();
    let version_id = Uuid::new_v4();

    profiles
        .add_file(version_id, "benchy.3mf", Utc::now())
        .expect("seed");

    match engine
        .check_file_addition(version_id, "second.3mf", false)
        .expect("check")
    {
        AddDecision::Denied { reason } => assert!(reason.contains("new version")),
        AddDecision::Allowed => panic!("second slicer file must be denied"),
    }

    // Models stay unbounded and uncategorized files are never limited.
    assert_eq!(
        engine
            .check_file_addition(version_id, "part.stl", false)
            .expect("check"),
        AddDecision::Allowed
    );
    assert_eq!(
        engine
            .check_file_addition(version_id, "print.gcode", true)
            .expect("check"),
        AddDecision::Allowed
    );
}
