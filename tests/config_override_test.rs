//! Configuration loading and session overrides.

mod common;

use common::{write_map_input, Workspace};
use hemoscope::config::{keys, Configuration, OverrideValue};
use hemoscope::error::ErrorCategory;
use hemoscope::{ConfigError, Engine, EngineError};
use serial_test::serial;
use std::fs;

#[test]
#[serial]
fn test_missing_config_file() {
    let ws = Workspace::new();
    let mut engine = Engine::new();
    let err = engine.load_config(ws.path("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Missing(_)));
}

#[test]
#[serial]
fn test_malformed_config_file() {
    let ws = Workspace::new();
    let path = ws.path("bad.toml");
    fs::write(&path, "[general\npixels_in_mm = ").unwrap();
    let err = Configuration::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}

#[test]
#[serial]
fn test_invalid_config_values() {
    let ws = Workspace::new();
    let path = ws.path("invalid.toml");
    fs::write(&path, "[general]\npixels_in_mm = 0\n").unwrap();
    let err = Configuration::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
#[serial]
fn test_override_visible_to_next_read() {
    let ws = Workspace::new();
    let mut engine = ws.engine();
    let before = engine.settings().unwrap();

    engine.override_int("HemoScope.Procedures.Detection.GradientThreshold", 75);
    let after = engine.settings().unwrap();
    assert_eq!(after.procedures.detection.gradient_threshold, 75);
    assert_eq!(after.procedures.description, before.procedures.description);
    assert_eq!(after.input, before.input);

    engine.override_int("HemoScope.Procedures.Detection.GradientThreshold", 80);
    assert_eq!(
        engine.settings().unwrap().procedures.detection.gradient_threshold,
        80
    );
}

#[test]
#[serial]
fn test_override_without_prefix_and_float() {
    let ws = Workspace::new();
    let mut engine = ws.engine();
    engine.override_float("Procedures.Description.ScoreThreshold", 62.5);
    engine.override_string("Input.Map.Folder", "/data/other");

    let settings = engine.settings().unwrap();
    assert_eq!(settings.procedures.description.score_threshold, 62.5);
    assert_eq!(
        settings.input.map.folder.as_deref(),
        Some(std::path::Path::new("/data/other"))
    );
}

#[test]
#[serial]
fn test_unknown_override_is_ignored() {
    let ws = Workspace::new();
    let mut engine = ws.engine();
    let before = engine.settings().unwrap();
    engine.override_string("HemoScope.Nothing.Here", "x");
    assert_eq!(engine.settings().unwrap(), before);
    assert_eq!(engine.overrides().len(), 1);
}

#[test]
#[serial]
fn test_wrongly_typed_override_fails_at_resolution() {
    let ws = Workspace::new();
    let mut engine = ws.engine();
    engine.override_string("HemoScope.Procedures.Detection.GradientThreshold", "steep");
    let err = engine.settings().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
}

#[test]
#[serial]
fn test_bad_override_only_fails_operations_reading_it() {
    let ws = Workspace::new();
    write_map_input(&ws.path("map_in"), true);
    let mut engine = ws.engine();
    engine.override_string(keys::FOCUSING_METHOD, "Autofocus");
    engine.override_string("HemoScope.Procedures.Detection.GradientThreshold", "steep");

    engine.init_general_data().unwrap();
    engine.build_map().unwrap();
    engine.save_stitched().unwrap();

    let err = engine.detect_capillaries().unwrap_err();
    assert!(matches!(
        err,
        EngineError::Config(ConfigError::RejectedOverride { .. })
    ));
    assert!(err.to_string().contains("GradientThreshold"));

    engine.override_int("HemoScope.Procedures.Detection.GradientThreshold", 60);
    engine.detect_capillaries().unwrap();
}

#[test]
#[serial]
fn test_numeric_folder_name_and_float_threshold() {
    let ws = Workspace::new();
    let mut engine = ws.engine();
    engine.override_value(keys::OUTPUT_MAP_FOLDER, OverrideValue::parse("2024"));
    engine.override_float("HemoScope.Procedures.Detection.GradientThreshold", 70.0);

    let settings = engine.settings().unwrap();
    assert_eq!(
        settings.output.map.folder.as_deref(),
        Some(std::path::Path::new("2024"))
    );
    assert_eq!(settings.procedures.detection.gradient_threshold, 70);
}

#[test]
#[serial]
fn test_table_key_override_is_ignored() {
    let ws = Workspace::new();
    let mut engine = ws.engine();
    let before = engine.settings().unwrap();
    engine.override_int("HemoScope.General", 5);
    engine.override_int("HemoScope.Procedures", 5);

    assert_eq!(engine.settings().unwrap(), before);
    engine.init_general_data().unwrap();
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let ws = Workspace::new();
    let config = ws.write_config("");
    std::env::set_var("HEMOSCOPE_PROCEDURES__SEQUENCE__LINE_THRESHOLD", "99");

    let mut engine = Engine::new();
    let loaded = engine.load_config(&config);
    let settings = engine.settings();
    std::env::remove_var("HEMOSCOPE_PROCEDURES__SEQUENCE__LINE_THRESHOLD");

    loaded.unwrap();
    assert_eq!(settings.unwrap().procedures.sequence.line_threshold, 99);
}

#[test]
#[serial]
fn test_overrides_beat_environment() {
    let ws = Workspace::new();
    let config = ws.write_config("");
    std::env::set_var("HEMOSCOPE_PROCEDURES__SEQUENCE__LINE_THRESHOLD", "99");

    let mut engine = Engine::new();
    let loaded = engine.load_config(&config);
    engine.override_int("HemoScope.Procedures.Sequence.LineThreshold", 42);
    let settings = engine.settings();
    std::env::remove_var("HEMOSCOPE_PROCEDURES__SEQUENCE__LINE_THRESHOLD");

    loaded.unwrap();
    assert_eq!(settings.unwrap().procedures.sequence.line_threshold, 42);
}
