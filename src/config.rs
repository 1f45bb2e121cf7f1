//! Configuration loading using Figment.
//!
//! Settings are resolved from, in increasing priority:
//! 1. built-in defaults (`Settings::default()`),
//! 2. the TOML file passed to [`Configuration::load`],
//! 3. environment variables prefixed with `HEMOSCOPE_` (`__` separates tables),
//! 4. the session's [`OverrideStore`].
//!
//! The file itself is parsed once; [`Configuration::resolve`] re-applies the overrides
//! every time an engine operation needs settings, so an override set between two
//! operations is visible to the second one.
//!
//! # Example
//! ```no_run
//! use hemoscope::config::{Configuration, OverrideStore};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Configuration::load("config/hemoscope.toml")?;
//! let mut overrides = OverrideStore::new();
//! overrides.set_string("HemoScope.Input.Map.Folder", "data/17");
//! let settings = config.resolve(&overrides)?.all()?;
//! println!("pixels per mm: {}", settings.general.pixels_in_mm);
//! # Ok(())
//! # }
//! ```

pub mod keys;
pub mod overrides;

pub use overrides::{OverrideStore, OverrideValue};

use crate::depth::FocusingMethod;
use crate::error::ConfigError;
use crate::validation::{is_in_range, is_not_empty, is_ordered_window, is_positive, is_valid_file_name};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Top-level engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Pixel scale and gray-level windows
    pub general: GeneralSettings,
    /// Input folders
    pub input: PipelineFolders,
    /// Output folders
    pub output: PipelineFolders,
    /// Algorithm parameters
    pub procedures: ProcedureSettings,
    /// Logging output
    pub logging: LoggingSettings,
}

/// Folder pair for the map pipeline and the Z-lock (depth) pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PipelineFolders {
    /// Map pipeline folder
    pub map: FolderSettings,
    /// Z-lock pipeline folder
    pub lock: FolderSettings,
}

/// A folder that may be left unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FolderSettings {
    /// Unset folders fail the operations that need them
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<PathBuf>,
}

/// Pixel scale and gray windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Scale of the stitched map
    pub pixels_in_mm: u32,
    /// Gray windows for apexes and capillary bodies
    pub gray_level: GrayLevelSettings,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            pixels_in_mm: 2600,
            gray_level: GrayLevelSettings::default(),
        }
    }
}

/// Gray-level windows used by detection and description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrayLevelSettings {
    /// Window of raw gray levels that may hold a capillary apex
    pub original: GrayWindow,
    /// Window of excess-filtered gray levels that belong to a capillary body
    pub processed: GrayWindow,
}

impl Default for GrayLevelSettings {
    fn default() -> Self {
        Self {
            original: GrayWindow { min: 30, max: 90 },
            processed: GrayWindow { min: 0, max: 120 },
        }
    }
}

/// Inclusive gray-level window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrayWindow {
    /// Lowest accepted level
    pub min: u8,
    /// Highest accepted level
    pub max: u8,
}

impl GrayWindow {
    /// Whether `value` lies inside the window.
    pub fn contains(&self, value: u8) -> bool {
        self.min <= value && value <= self.max
    }
}

/// Parameters of every processing step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProcedureSettings {
    /// Map stitching
    pub stitching: StitchingSettings,
    /// Apex detection
    pub detection: DetectionSettings,
    /// Capillary description
    pub description: DescriptionSettings,
    /// Z-lock frames and depth calculation
    pub focusing: FocusingSettings,
    /// Wide/line sequence analysis
    pub sequence: SequenceSettings,
}

/// How tiles are stitched into layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StitchingSettings {
    /// Name of the scan-position CSV inside the map input folder
    pub scan_pos_file: String,
    /// Half size of the apex cross drawn on marked layers
    pub marker_corner_size: u32,
    /// Part of every tile that is kept
    pub image: TileImageSettings,
}

impl Default for StitchingSettings {
    fn default() -> Self {
        Self {
            scan_pos_file: "ScanPositions.csv".to_string(),
            marker_corner_size: 5,
            image: TileImageSettings::default(),
        }
    }
}

/// Which part of every tile goes into the stitched layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileImageSettings {
    /// Extra offset of the kept region
    pub bias_pixels: AxisPair<u32>,
    /// Offset of the kept region as a fraction of the tile size
    pub margin_relative: AxisPair<f32>,
    /// Size of the kept region as a fraction of the tile size
    pub frame_relative: FrameRelative,
}

impl Default for TileImageSettings {
    fn default() -> Self {
        Self {
            bias_pixels: AxisPair { x: 0, y: 0 },
            margin_relative: AxisPair { x: 0.0, y: 0.0 },
            frame_relative: FrameRelative {
                width: 1.0,
                height: 1.0,
            },
        }
    }
}

/// A value per image axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisPair<T> {
    /// Horizontal
    pub x: T,
    /// Vertical
    pub y: T,
}

/// Width and height as fractions of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameRelative {
    /// Fraction of the tile width
    pub width: f32,
    /// Fraction of the tile height
    pub height: f32,
}

/// Apex detection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionSettings {
    /// Minimal Sobel response on both axes for an apex candidate
    pub gradient_threshold: u8,
    /// Minimal distance between two accepted apexes
    pub min_distance_pixels: u32,
    /// Limit the apex search to the first rows of a layer (0 = all rows)
    pub cropped_rows: u32,
    /// Minimal apex count for a layer to compete for best layer
    pub min_found_capillaries: usize,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            gradient_threshold: 60,
            min_distance_pixels: 100,
            cropped_rows: 0,
            min_found_capillaries: 3,
        }
    }
}

/// Capillary description parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptionSettings {
    /// Capillaries kept per layer, best scores first
    pub described_capillaries: usize,
    /// Smaller regions are not described
    pub min_pixels_in_capillary: usize,
    /// Field-of-view frame that has to fit inside a capillary
    pub frame_width: u32,
    /// Frame height in pixels
    pub frame_height: u32,
    /// Minimal percentage of marked pixels inside the fitted frame
    pub score_threshold: f32,
    /// Width of the band measured around a capillary
    pub surrounding_pixels: u32,
    /// Rotation step of the frame search
    pub angle_step_degrees: u32,
    /// Write Original/Processed/Marked/Framed images per layer
    pub save_debug_images: bool,
}

impl Default for DescriptionSettings {
    fn default() -> Self {
        Self {
            described_capillaries: 10,
            min_pixels_in_capillary: 20,
            frame_width: 60,
            frame_height: 30,
            score_threshold: 50.0,
            surrounding_pixels: 10,
            angle_step_degrees: 5,
            save_debug_images: false,
        }
    }
}

/// Z-lock input naming and depth calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusingSettings {
    /// Focus marker; required by depth calculation only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<FocusingMethod>,
    /// Name of the Z-position list inside the lock input folder
    pub z_pos_file: String,
    /// File name prefix of the wide frames
    pub wide_prefix: String,
    /// File name prefix of the line frames
    pub line_prefix: String,
    /// Frame file extension
    pub extension: String,
    /// Fit on even frames and evaluate on odd frames as well
    pub half_split: bool,
}

impl Default for FocusingSettings {
    fn default() -> Self {
        Self {
            method: None,
            z_pos_file: "PositionsZ.txt".to_string(),
            wide_prefix: "Bright".to_string(),
            line_prefix: "Line".to_string(),
            extension: "tif".to_string(),
            half_split: false,
        }
    }
}

/// Wide/line sequence parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceSettings {
    /// Line-image gray levels at or below this value become black
    pub line_threshold: u8,
}

impl Default for SequenceSettings {
    fn default() -> Self {
        Self { line_threshold: 128 }
    }
}

/// The `[logging]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Logging level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (pretty, compact, json)
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Settings {
    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let check = |field: &str, result: Result<(), &'static str>| {
            result.map_err(|msg| ConfigError::Invalid(format!("{field}: {msg}")))
        };

        check("general.pixels_in_mm", is_positive(self.general.pixels_in_mm))?;
        let gray = &self.general.gray_level;
        check(
            "general.gray_level.original",
            is_ordered_window(gray.original.min, gray.original.max),
        )?;
        check(
            "general.gray_level.processed",
            is_ordered_window(gray.processed.min, gray.processed.max),
        )?;

        let stitching = &self.procedures.stitching;
        check(
            "procedures.stitching.scan_pos_file",
            is_valid_file_name(&stitching.scan_pos_file),
        )?;
        let image = &stitching.image;
        check(
            "procedures.stitching.image.margin_relative.x",
            is_in_range(image.margin_relative.x, 0.0..=1.0),
        )?;
        check(
            "procedures.stitching.image.margin_relative.y",
            is_in_range(image.margin_relative.y, 0.0..=1.0),
        )?;
        check(
            "procedures.stitching.image.frame_relative.width",
            is_positive(image.frame_relative.width),
        )?;
        check(
            "procedures.stitching.image.frame_relative.height",
            is_positive(image.frame_relative.height),
        )?;
        check(
            "procedures.stitching.image.width",
            is_in_range(
                image.margin_relative.x + image.frame_relative.width,
                0.0..=1.0,
            ),
        )?;
        check(
            "procedures.stitching.image.height",
            is_in_range(
                image.margin_relative.y + image.frame_relative.height,
                0.0..=1.0,
            ),
        )?;

        let description = &self.procedures.description;
        check(
            "procedures.description.described_capillaries",
            is_positive(description.described_capillaries),
        )?;
        check(
            "procedures.description.frame_width",
            is_positive(description.frame_width),
        )?;
        check(
            "procedures.description.frame_height",
            is_positive(description.frame_height),
        )?;
        check(
            "procedures.description.score_threshold",
            is_in_range(description.score_threshold, 0.0..=100.0),
        )?;
        check(
            "procedures.description.angle_step_degrees",
            is_in_range(description.angle_step_degrees, 1..=90),
        )?;

        let focusing = &self.procedures.focusing;
        check(
            "procedures.focusing.z_pos_file",
            is_valid_file_name(&focusing.z_pos_file),
        )?;
        check(
            "procedures.focusing.wide_prefix",
            is_not_empty(&focusing.wide_prefix),
        )?;
        check(
            "procedures.focusing.line_prefix",
            is_not_empty(&focusing.line_prefix),
        )?;
        check(
            "procedures.focusing.extension",
            is_not_empty(&focusing.extension),
        )?;

        for (field, folder) in [
            ("input.map.folder", &self.input.map.folder),
            ("input.lock.folder", &self.input.lock.folder),
            ("output.map.folder", &self.output.map.folder),
            ("output.lock.folder", &self.output.lock.folder),
        ] {
            if let Some(folder) = folder {
                check(field, is_not_empty(&folder.to_string_lossy()))?;
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        Ok(())
    }
}

/// A loaded configuration file, ready to be resolved against overrides.
#[derive(Debug, Clone)]
pub struct Configuration {
    path: PathBuf,
    base: Figment,
}

impl Configuration {
    /// Load and validate the configuration file at `path`.
    ///
    /// Fails if the file is missing, is not valid TOML, holds a value of the wrong type
    /// for a known setting, or does not pass [`Settings::validate`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::Missing(path.to_path_buf()));
        }

        let base = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("HEMOSCOPE_").split("__"));

        let configuration = Self {
            path: path.to_path_buf(),
            base,
        };
        // Parse errors surface here rather than at the first engine call
        configuration.resolve(&OverrideStore::new())?;
        Ok(configuration)
    }

    /// Path of the loaded file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Extract settings with the overrides applied on top of file and environment.
    ///
    /// Overrides are applied one at a time in the order they were set. Each value is
    /// first converted to the type of its setting. An override that still does not
    /// fit, or that makes the settings invalid, is skipped and recorded in the result;
    /// it only fails the operations that read that setting (see
    /// [`ResolvedSettings::reading`]). Overrides for unknown keys are ignored.
    pub fn resolve(&self, overrides: &OverrideStore) -> Result<ResolvedSettings, ConfigError> {
        let mut settings: Settings = self.base.extract()?;
        settings.validate()?;

        let mut rejected = Vec::new();
        for (key, value) in overrides.iter() {
            let Some(kind) = keys::kind_of(key) else {
                continue;
            };
            let path = keys::key_to_path(key);
            match apply_override(&settings, &path, &value.coerce(kind)) {
                Ok(next) => settings = next,
                Err(err) => {
                    warn!(key, value = %value, error = %err, "Override not applied");
                    rejected.push(RejectedOverride {
                        key: key.to_string(),
                        path,
                        value: value.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        Ok(ResolvedSettings { settings, rejected })
    }
}

fn apply_override(
    settings: &Settings,
    path: &str,
    value: &OverrideValue,
) -> Result<Settings, ConfigError> {
    let next: Settings = Figment::from(Serialized::defaults(settings))
        .merge(Serialized::default(path, value))
        .extract()?;
    next.validate()?;
    Ok(next)
}

/// An override that could not be applied to its setting.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedOverride {
    /// Key as the host set it
    pub key: String,
    /// Dotted settings path the key maps to
    pub path: String,
    /// Value as the host set it
    pub value: OverrideValue,
    /// Why extraction or validation refused it
    pub reason: String,
}

impl RejectedOverride {
    fn to_error(&self) -> ConfigError {
        match &self.value {
            OverrideValue::Str(method) if self.path == keys::key_to_path(keys::FOCUSING_METHOD) => {
                ConfigError::UnknownFocusingMethod(method.clone())
            }
            value => ConfigError::RejectedOverride {
                key: self.key.clone(),
                value: value.to_string(),
                reason: self.reason.clone(),
            },
        }
    }
}

/// Settings of one resolution, plus the overrides that were left out.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSettings {
    settings: Settings,
    rejected: Vec<RejectedOverride>,
}

impl ResolvedSettings {
    /// Every setting. Fails if any override was rejected.
    pub fn all(self) -> Result<Settings, ConfigError> {
        self.reading(&[""])
    }

    /// Settings for an operation that reads the given tables or fields.
    ///
    /// `paths` are dotted settings paths such as `procedures.detection` or
    /// `input.map.folder`; the empty path covers everything. The first rejected
    /// override under one of them is returned as the error.
    pub fn reading(self, paths: &[&str]) -> Result<Settings, ConfigError> {
        match self
            .rejected
            .iter()
            .find(|rejected| paths.iter().any(|read| is_under(&rejected.path, read)))
        {
            Some(rejected) => Err(rejected.to_error()),
            None => Ok(self.settings),
        }
    }

    /// Overrides left out of these settings, in application order.
    pub fn rejected(&self) -> &[RejectedOverride] {
        &self.rejected
    }
}

fn is_under(path: &str, read: &str) -> bool {
    read.is_empty()
        || path
            .strip_prefix(read)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
}
