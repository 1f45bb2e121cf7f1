//! The processing engine and its session state.
//!
//! [`Engine`] owns everything a processing session produces: the loaded
//! configuration, the override store, the stitched map with its detection and
//! description results, the Z-position stack with its depth report, and the
//! wide/line sequence. Every operation checks its prerequisites first and returns
//! [`EngineError::Precondition`] without touching state when they are not met.
//! Operations build their results on the side and only replace engine state on
//! success, so a failed or cancelled operation leaves the previous results intact.
//!
//! # State Machines
//!
//! ```text
//! Session:  Uninitialized ──load_config──> ConfigLoaded ──init_general_data──> Ready
//!
//! Map:      Empty ──build_map──> Built ──detect──> Detected ──describe──> Described
//!                                  ▲                  │ ▲                     │
//!                                  └──── build_map ───┘ └────── detect ───────┘
//!
//! Depth:    Empty ──load_positions_z──> Loaded ──calculate_depth──> Calculated
//!
//! Sequence: Empty ──build_sequence──> Built
//! ```
//!
//! Settings are resolved from the configuration and the override store at the start
//! of every operation, so an override set between two operations is seen by the
//! second one. General data (pixel scale and gray windows) is the exception: it is
//! captured by [`Engine::init_general_data`] and kept until that is called again.
//!
//! Each operation names the settings it reads. An override that could not be applied
//! fails only the operations reading its setting; the others run on the remaining
//! settings.

use crate::cancel::CancelFlag;
use crate::capillary::{self, describe::DescriptionOutcome, LayerInfo};
use crate::config::{Configuration, GrayWindow, OverrideStore, OverrideValue, Settings};
use crate::depth::{self, DepthReport, FocusStack};
use crate::error::{ConfigError, EngineError, EngineResult};
use crate::map::{self, Map};
use crate::sequence::{self, ColumnProfile, Sequence};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// Settings read by each operation, as dotted paths.
const READS_ALL: &[&str] = &[""];
const READS_GENERAL: &[&str] = &["general"];
const READS_BUILD_MAP: &[&str] = &["input.map", "procedures.stitching"];
const READS_SAVE_STITCHED: &[&str] = &["output.map", "procedures.stitching.marker_corner_size"];
const READS_DETECT: &[&str] = &["output.map", "procedures.detection"];
const READS_DESCRIBE: &[&str] = &["output.map", "procedures.description"];
const READS_BEST_LAYER: &[&str] = &["procedures.detection.min_found_capillaries"];
const READS_LOAD_POSITIONS: &[&str] = &[
    "input.lock",
    "procedures.focusing.z_pos_file",
    "procedures.focusing.wide_prefix",
    "procedures.focusing.extension",
];
const READS_CALCULATE_DEPTH: &[&str] = &[
    "output.lock",
    "procedures.focusing.method",
    "procedures.focusing.half_split",
];
const READS_BUILD_SEQUENCE: &[&str] = &[
    "input.lock",
    "procedures.focusing.z_pos_file",
    "procedures.focusing.wide_prefix",
    "procedures.focusing.line_prefix",
    "procedures.focusing.extension",
    "procedures.sequence",
];
const READS_LOCK_OUTPUT: &[&str] = &["output.lock"];

/// Configuration lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No configuration loaded
    Uninitialized,
    /// Configuration loaded, general data not yet captured
    ConfigLoaded,
    /// General data captured, map operations available
    Ready,
}

/// Progress of the map pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MapState {
    /// No map
    Empty,
    /// Layers stitched
    Built,
    /// Apexes detected in every layer
    Detected,
    /// Capillaries described and best layer chosen
    Described,
}

/// Progress of the depth pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepthState {
    /// No Z positions
    Empty,
    /// Z positions and wide frames loaded
    Loaded,
    /// Depth report available
    Calculated,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "Uninitialized"),
            SessionState::ConfigLoaded => write!(f, "ConfigLoaded"),
            SessionState::Ready => write!(f, "Ready"),
        }
    }
}

/// Pixel scale and gray windows captured by [`Engine::init_general_data`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeneralData {
    /// Scale of the stitched map
    pub pixels_in_mm: u32,
    /// Raw gray levels that may hold an apex
    pub original: GrayWindow,
    /// Filtered gray levels that belong to a capillary body
    pub processed: GrayWindow,
}

/// Snapshot of the engine state for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineStatus {
    /// Configuration lifecycle
    pub session: SessionState,
    /// Map pipeline progress
    pub map: MapState,
    /// Depth pipeline progress
    pub depth: DepthState,
    /// Frames in the built sequence, if any
    pub sequence_frames: Option<usize>,
    /// Distinct override keys
    pub overrides: usize,
    /// Loaded configuration file
    pub config_path: Option<PathBuf>,
}

/// Owner of one processing session.
#[derive(Debug, Default)]
pub struct Engine {
    configuration: Option<Configuration>,
    general: Option<GeneralData>,
    overrides: OverrideStore,
    cancel: CancelFlag,
    map: Option<Map>,
    scan_positions: Option<PathBuf>,
    detected: Option<Vec<LayerInfo>>,
    described: Option<DescriptionOutcome>,
    stack: Option<FocusStack>,
    depth: Option<DepthReport>,
    sequence: Option<Sequence>,
}

impl Engine {
    /// Engine with no configuration and no results.
    pub fn new() -> Self {
        Self::default()
    }

    // ---- session ----

    /// Load the configuration file. Any previously captured general data is dropped.
    pub fn load_config<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ConfigError> {
        let configuration = Configuration::load(path)?;
        self.use_configuration(configuration);
        Ok(())
    }

    /// Adopt an already loaded configuration, as [`Engine::load_config`] does.
    pub fn use_configuration(&mut self, configuration: Configuration) {
        info!(path = %configuration.path().display(), "Configuration loaded");
        self.configuration = Some(configuration);
        self.general = None;
    }

    /// Capture pixel scale and gray windows from the configuration and overrides.
    pub fn init_general_data(&mut self) -> EngineResult<GeneralData> {
        let settings = self.resolve("init_general_data", READS_GENERAL)?;
        let general = GeneralData {
            pixels_in_mm: settings.general.pixels_in_mm,
            original: settings.general.gray_level.original,
            processed: settings.general.gray_level.processed,
        };
        info!(
            pixels_in_mm = general.pixels_in_mm,
            original = ?general.original,
            processed = ?general.processed,
            "General data initialised"
        );
        self.general = Some(general);
        Ok(general)
    }

    /// Override an integer setting for the rest of the session.
    ///
    /// The key may omit the `HemoScope.` prefix. Unknown keys are kept and ignored.
    /// A value that does not suit its setting is reported by the next operation
    /// reading that setting.
    pub fn override_int(&mut self, key: &str, value: i64) {
        self.overrides.set_int(key, value);
    }

    /// Override a real-valued setting. Whole values also set integer settings.
    pub fn override_float(&mut self, key: &str, value: f64) {
        self.overrides.set_float(key, value);
    }

    /// Override a text setting such as a folder or the focusing method.
    pub fn override_string(&mut self, key: &str, value: &str) {
        self.overrides.set_string(key, value);
    }

    /// Override with an already typed value.
    pub fn override_value(&mut self, key: &str, value: OverrideValue) {
        self.overrides.set(key, value);
    }

    /// Overrides set so far.
    pub fn overrides(&self) -> &OverrideStore {
        &self.overrides
    }

    /// Settings as the next operation would see them.
    ///
    /// Fails if any override could not be applied.
    pub fn settings(&self) -> EngineResult<Settings> {
        self.settings_for("settings", READS_ALL)
    }

    /// Flag polled by long operations. Clones may be triggered from another thread.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    // ---- map pipeline ----

    /// Stitch `Input.Map.Folder` into a new map, discarding detection and description.
    pub fn build_map(&mut self) -> EngineResult<&Map> {
        const OP: &str = "build_map";
        let settings = self.ready_settings(OP, READS_BUILD_MAP)?;
        let folder = require_folder(&settings.input.map.folder, "input.map.folder")?;

        let result = map::stitch::build_map(&folder, &settings, &self.cancel);
        let built = self.finish(result)?;

        self.scan_positions = Some(folder.join(&settings.procedures.stitching.scan_pos_file));
        self.detected = None;
        self.described = None;
        Ok(&*self.map.insert(built))
    }

    /// Write the stitched layers into `Output.Map.Folder/Stitched`.
    pub fn save_stitched(&mut self) -> EngineResult<PathBuf> {
        const OP: &str = "save_stitched";
        let settings = self.ready_settings(OP, READS_SAVE_STITCHED)?;
        let map = self
            .map
            .as_ref()
            .ok_or(EngineError::precondition(OP, "a built map"))?;
        let folder = require_folder(&settings.output.map.folder, "output.map.folder")?;

        let detected = self.detected.as_deref().unwrap_or(&[]);
        map.save(
            &folder,
            detected,
            settings.procedures.stitching.marker_corner_size,
            self.scan_positions.as_deref().filter(|p| p.is_file()),
        )
    }

    /// Detect apexes in every layer. Replaces earlier detection and description results.
    pub fn detect_capillaries(&mut self) -> EngineResult<&[LayerInfo]> {
        const OP: &str = "detect_capillaries";
        let settings = self.ready_settings(OP, READS_DETECT)?;
        let map = self
            .map
            .as_ref()
            .ok_or(EngineError::precondition(OP, "a built map"))?;
        let folder = require_folder(&settings.output.map.folder, "output.map.folder")?;

        let result = capillary::detect::detect_capillaries(
            map,
            &settings.procedures.detection,
            settings.general.gray_level.original,
            &folder,
            &self.cancel,
        );
        let layers = self.finish(result)?;

        self.described = None;
        Ok(self.detected.insert(layers).as_slice())
    }

    /// Describe the detected capillaries and select the best layer.
    pub fn describe_capillaries(&mut self) -> EngineResult<&DescriptionOutcome> {
        const OP: &str = "describe_capillaries";
        let settings = self.ready_settings(OP, READS_DESCRIBE)?;
        let (Some(map), Some(detected)) = (self.map.as_ref(), self.detected.as_ref()) else {
            return Err(EngineError::precondition(OP, "detected capillaries"));
        };
        if detected.iter().all(|layer| layer.apexes.is_empty()) {
            return Err(EngineError::precondition(OP, "at least one detected apex"));
        }
        let folder = require_folder(&settings.output.map.folder, "output.map.folder")?;

        let result = capillary::describe::describe_capillaries(
            map,
            detected,
            &settings.procedures.description,
            settings.general.gray_level.processed,
            &folder,
            &self.cancel,
        );
        let outcome = self.finish(result)?;
        Ok(&*self.described.insert(outcome))
    }

    /// Layer with the highest apex-score sum among those with enough apexes.
    pub fn best_detected_layer(&self) -> EngineResult<Option<usize>> {
        const OP: &str = "best_detected_layer";
        let detected = self
            .detected
            .as_ref()
            .ok_or(EngineError::precondition(OP, "detected capillaries"))?;
        let settings = self.settings_for(OP, READS_BEST_LAYER)?;
        Ok(capillary::best_detected_layer(
            detected,
            settings.procedures.detection.min_found_capillaries,
        ))
    }

    /// Gray level at absolute stage coordinates in mm and layer position `z`.
    pub fn value_at(&self, x_mm: f32, y_mm: f32, z: f32) -> EngineResult<Option<u8>> {
        let map = self
            .map
            .as_ref()
            .ok_or(EngineError::precondition("value_at", "a built map"))?;
        Ok(map.value_at(x_mm, y_mm, z))
    }

    /// Trilinear gray level between pixels and layers.
    pub fn interpolated_value_at(&self, x_mm: f32, y_mm: f32, z: f32) -> EngineResult<Option<f32>> {
        let map = self
            .map
            .as_ref()
            .ok_or(EngineError::precondition("interpolated_value_at", "a built map"))?;
        Ok(map.interpolated_value_at(x_mm, y_mm, z))
    }

    // ---- depth pipeline ----

    /// Read the Z list and wide frames from `Input.Lock.Folder`. Drops any depth report.
    pub fn load_positions_z(&mut self) -> EngineResult<&FocusStack> {
        const OP: &str = "load_positions_z";
        let settings = self.loaded_settings(OP, READS_LOAD_POSITIONS)?;
        let folder = require_folder(&settings.input.lock.folder, "input.lock.folder")?;

        let result = depth::load_positions_z(&folder, &settings.procedures.focusing, &self.cancel);
        let stack = self.finish(result)?;

        self.depth = None;
        Ok(&*self.stack.insert(stack))
    }

    /// Compute focus markers and fit Z with the configured focusing method.
    pub fn calculate_depth(&mut self) -> EngineResult<&DepthReport> {
        const OP: &str = "calculate_depth";
        let settings = self.loaded_settings(OP, READS_CALCULATE_DEPTH)?;
        let stack = self
            .stack
            .as_ref()
            .ok_or(EngineError::precondition(OP, "loaded Z positions"))?;
        let focusing = &settings.procedures.focusing;
        let method = focusing
            .method
            .ok_or(EngineError::precondition(OP, "a selected focusing method"))?;
        let folder = require_folder(&settings.output.lock.folder, "output.lock.folder")?;

        let result =
            depth::calculate_depth(stack, method, focusing.half_split, &folder, &self.cancel);
        let report = self.finish(result)?;
        Ok(&*self.depth.insert(report))
    }

    // ---- sequence ----

    /// Pair the wide and line frames of `Input.Lock.Folder`.
    pub fn build_sequence(&mut self) -> EngineResult<&Sequence> {
        const OP: &str = "build_sequence";
        let settings = self.loaded_settings(OP, READS_BUILD_SEQUENCE)?;
        let folder = require_folder(&settings.input.lock.folder, "input.lock.folder")?;

        let result = sequence::build_sequence(
            &folder,
            &settings.procedures.focusing,
            &settings.procedures.sequence,
            &self.cancel,
        );
        let built = self.finish(result)?;
        Ok(&*self.sequence.insert(built))
    }

    /// Write the wide and binarised line projections into `Output.Lock.Folder`.
    pub fn save_projections(&mut self) -> EngineResult<()> {
        const OP: &str = "save_projections";
        let settings = self.loaded_settings(OP, READS_LOCK_OUTPUT)?;
        let sequence = self
            .sequence
            .as_ref()
            .ok_or(EngineError::precondition(OP, "a built sequence"))?;
        let folder = require_folder(&settings.output.lock.folder, "output.lock.folder")?;

        let result = sequence::save_projections(sequence, &folder, &self.cancel);
        self.finish(result)
    }

    /// Row gradients and white-pixel column profiles of every line frame.
    pub fn analyze_lines(&mut self) -> EngineResult<Vec<ColumnProfile>> {
        const OP: &str = "analyze_lines";
        let settings = self.loaded_settings(OP, READS_LOCK_OUTPUT)?;
        let sequence = self
            .sequence
            .as_ref()
            .ok_or(EngineError::precondition(OP, "a built sequence"))?;
        let folder = require_folder(&settings.output.lock.folder, "output.lock.folder")?;

        let result = sequence::analyze_lines(sequence, &folder, &self.cancel);
        self.finish(result)
    }

    // ---- state ----

    /// Where the session is in its configuration lifecycle.
    pub fn session_state(&self) -> SessionState {
        match (&self.configuration, &self.general) {
            (None, _) => SessionState::Uninitialized,
            (Some(_), None) => SessionState::ConfigLoaded,
            (Some(_), Some(_)) => SessionState::Ready,
        }
    }

    /// Progress of the map pipeline.
    pub fn map_state(&self) -> MapState {
        match (&self.map, &self.detected, &self.described) {
            (None, _, _) => MapState::Empty,
            (Some(_), None, _) => MapState::Built,
            (Some(_), Some(_), None) => MapState::Detected,
            (Some(_), Some(_), Some(_)) => MapState::Described,
        }
    }

    /// Progress of the depth pipeline.
    pub fn depth_state(&self) -> DepthState {
        match (&self.stack, &self.depth) {
            (None, _) => DepthState::Empty,
            (Some(_), None) => DepthState::Loaded,
            (Some(_), Some(_)) => DepthState::Calculated,
        }
    }

    /// Snapshot for reporting.
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            session: self.session_state(),
            map: self.map_state(),
            depth: self.depth_state(),
            sequence_frames: self.sequence.as_ref().map(Sequence::len),
            overrides: self.overrides.len(),
            config_path: self.configuration.as_ref().map(|c| c.path().to_path_buf()),
        }
    }

    /// General data captured by the last [`Engine::init_general_data`].
    pub fn general_data(&self) -> Option<GeneralData> {
        self.general
    }

    /// Stitched map, if built.
    pub fn map(&self) -> Option<&Map> {
        self.map.as_ref()
    }

    /// Apexes of every layer from the last detection.
    pub fn detected_layers(&self) -> Option<&[LayerInfo]> {
        self.detected.as_deref()
    }

    /// Result of the last description.
    pub fn description(&self) -> Option<&DescriptionOutcome> {
        self.described.as_ref()
    }

    /// Loaded Z positions and wide frames.
    pub fn focus_stack(&self) -> Option<&FocusStack> {
        self.stack.as_ref()
    }

    /// Report of the last depth calculation.
    pub fn depth_report(&self) -> Option<&DepthReport> {
        self.depth.as_ref()
    }

    /// Wide/line sequence, if built.
    pub fn sequence(&self) -> Option<&Sequence> {
        self.sequence.as_ref()
    }

    // ---- helpers ----

    fn resolve(&self, operation: &'static str, reads: &[&str]) -> EngineResult<Settings> {
        let configuration = self
            .configuration
            .as_ref()
            .ok_or(EngineError::precondition(operation, "a loaded configuration"))?;
        Ok(configuration.resolve(&self.overrides)?.reading(reads)?)
    }

    /// Resolved settings with the captured general data in place.
    fn settings_for(&self, operation: &'static str, reads: &[&str]) -> EngineResult<Settings> {
        let mut settings = self.resolve(operation, reads)?;
        if let Some(general) = self.general {
            settings.general.pixels_in_mm = general.pixels_in_mm;
            settings.general.gray_level.original = general.original;
            settings.general.gray_level.processed = general.processed;
        }
        Ok(settings)
    }

    fn loaded_settings(&self, operation: &'static str, reads: &[&str]) -> EngineResult<Settings> {
        if self.configuration.is_none() {
            return Err(EngineError::precondition(operation, "a loaded configuration"));
        }
        self.settings_for(operation, reads)
    }

    fn ready_settings(&self, operation: &'static str, reads: &[&str]) -> EngineResult<Settings> {
        if self.session_state() != SessionState::Ready {
            return Err(EngineError::precondition(operation, "initialised general data"));
        }
        self.settings_for(operation, reads)
    }

    /// Clear the cancel flag once an operation has stopped because of it.
    fn finish<T>(&self, result: EngineResult<T>) -> EngineResult<T> {
        if let Err(EngineError::Cancelled(operation)) = &result {
            debug!(operation, "Clearing cancel flag");
            self.cancel.reset();
        }
        result
    }
}

fn require_folder(folder: &Option<PathBuf>, key: &str) -> EngineResult<PathBuf> {
    folder
        .clone()
        .ok_or_else(|| ConfigError::Invalid(format!("{key} is not set")).into())
}
