//! End-to-end tests of the map pipeline: stitch, detect, describe, save.

mod common;

use common::{write_map_input, Workspace, BACKGROUND, CAPILLARY};
use hemoscope::engine::MapState;
use hemoscope::error::ErrorCategory;
use hemoscope::map::Map;
use hemoscope::EngineError;
use std::fs;

#[test]
fn test_build_map_stitches_all_tiles() {
    let ws = Workspace::new();
    write_map_input(&ws.path("map_in"), true);
    let mut engine = ws.engine();

    let map = engine.build_map().unwrap();
    assert_eq!(map.layers().len(), 2);
    assert_eq!((map.cols(), map.rows()), (200, 200));
    assert_eq!(map.geometry().seam_cols, vec![100]);
    assert_eq!(map.geometry().seam_rows, vec![100]);
    assert_eq!(map.layer(1).unwrap().z, 0.1);
    assert_eq!(engine.map_state(), MapState::Built);
}

#[test]
fn test_value_at_uses_stage_coordinates() {
    let ws = Workspace::new();
    write_map_input(&ws.path("map_in"), true);
    let mut engine = ws.engine();
    engine.build_map().unwrap();

    // pixel (45, 45) of the second tile column: 1.0 mm origin + 1.45 mm
    assert_eq!(engine.value_at(2.45, 2.45, 0.0).unwrap(), Some(CAPILLARY));
    assert_eq!(engine.value_at(1.05, 2.05, 0.0).unwrap(), Some(BACKGROUND));
    assert_eq!(engine.value_at(0.5, 2.05, 0.0).unwrap(), None);
    assert_eq!(engine.value_at(5.0, 2.05, 0.0).unwrap(), None);
}

#[test]
fn test_detect_before_build_is_precondition() {
    let ws = Workspace::new();
    let mut engine = ws.engine();

    let err = engine.detect_capillaries().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Precondition);
    let err = engine.describe_capillaries().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Precondition);
    let err = engine.save_stitched().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Precondition);
    assert_eq!(engine.map_state(), MapState::Empty);
}

#[test]
fn test_full_map_pipeline() {
    let ws = Workspace::new();
    write_map_input(&ws.path("map_in"), true);
    let mut engine = ws.engine();
    engine.override_int("HemoScope.Procedures.Detection.MinDistancePixels", 50);

    engine.build_map().unwrap();
    let layers = engine.detect_capillaries().unwrap();
    assert_eq!(layers.len(), 2);
    assert!(layers.iter().all(|layer| !layer.apexes.is_empty()));
    assert_eq!(engine.map_state(), MapState::Detected);

    let out = ws.path("map_out");
    assert!(out.join("Capillaries/AllLayers.csv").is_file());
    assert!(out.join("Capillaries/Layer2.csv").is_file());

    engine.save_stitched().unwrap();
    assert!(out.join("Stitched/Layer1.tif").is_file());
    assert!(out.join("Stitched/Layer1Corners.tif").is_file());
    assert!(out.join("Stitched/ScanPositions.csv").is_file());

    let outcome = engine.describe_capillaries().unwrap();
    assert_eq!(outcome.layers.len(), 2);
    assert_eq!(engine.map_state(), MapState::Described);
    let summary = fs::read_to_string(out.join("Summary.txt")).unwrap();
    assert!(summary.starts_with("Best layer: "));
    assert!(out.join("Capillaries/ActualLayersFrames.csv").is_file());
}

#[test]
fn test_rebuild_discards_detection() {
    let ws = Workspace::new();
    write_map_input(&ws.path("map_in"), true);
    let mut engine = ws.engine();

    engine.build_map().unwrap();
    engine.detect_capillaries().unwrap();
    assert!(engine.detected_layers().is_some());

    engine.build_map().unwrap();
    assert_eq!(engine.map_state(), MapState::Built);
    assert!(engine.detected_layers().is_none());
}

#[test]
fn test_describe_without_apexes_is_precondition() {
    let ws = Workspace::new();
    write_map_input(&ws.path("map_in"), false);
    let mut engine = ws.engine();

    engine.build_map().unwrap();
    let layers = engine.detect_capillaries().unwrap();
    assert!(layers.iter().all(|layer| layer.apexes.is_empty()));
    assert_eq!(engine.best_detected_layer().unwrap(), None);

    let err = engine.describe_capillaries().unwrap_err();
    assert!(matches!(
        err,
        EngineError::Precondition {
            operation: "describe_capillaries",
            ..
        }
    ));
    assert_eq!(engine.map_state(), MapState::Detected);
}

#[test]
fn test_saved_map_reloads_equal() {
    let ws = Workspace::new();
    write_map_input(&ws.path("map_in"), true);
    let mut engine = ws.engine();

    engine.build_map().unwrap();
    engine.save_stitched().unwrap();

    let reloaded = Map::load(&ws.path("map_out")).unwrap();
    assert_eq!(Some(&reloaded), engine.map());
}

#[test]
fn test_cancelled_build_leaves_no_map() {
    let ws = Workspace::new();
    write_map_input(&ws.path("map_in"), true);
    let mut engine = ws.engine();

    engine.cancel_flag().trigger("test");
    let err = engine.build_map().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Cancelled);
    assert!(engine.map().is_none());
    assert_eq!(engine.map_state(), MapState::Empty);

    // the flag is cleared, so the next call runs
    engine.build_map().unwrap();
    assert_eq!(engine.map_state(), MapState::Built);
}

#[test]
fn test_cancelled_detection_keeps_previous_results() {
    let ws = Workspace::new();
    write_map_input(&ws.path("map_in"), true);
    let mut engine = ws.engine();

    engine.build_map().unwrap();
    let first = engine.detect_capillaries().unwrap().to_vec();

    engine.cancel_flag().trigger("test");
    assert!(engine.detect_capillaries().is_err());
    assert_eq!(engine.detected_layers(), Some(first.as_slice()));
}

#[test]
fn test_missing_tile_count_is_malformed() {
    let ws = Workspace::new();
    let folder = ws.path("map_in");
    write_map_input(&folder, true);
    fs::remove_file(folder.join("Tile003.tif")).unwrap();
    let mut engine = ws.engine();

    let err = engine.build_map().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::MalformedInput);
}
