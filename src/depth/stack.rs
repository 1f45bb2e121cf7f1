//! Z-position list and the wide-field frames that go with it.

use crate::cancel::CancelFlag;
use crate::config::FocusingSettings;
use crate::error::{EngineError, EngineResult};
use crate::imaging::read_gray;
use image::GrayImage;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Frames taken at known Z positions, one frame per position.
#[derive(Debug, Clone, PartialEq)]
pub struct FocusStack {
    /// Z per frame
    pub positions: Vec<f32>,
    /// Wide frames, all the same size
    pub frames: Vec<GrayImage>,
}

impl FocusStack {
    /// Number of frames.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether the stack has no frames.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// `{prefix}{index:04}.{extension}`
pub fn frame_file_name(prefix: &str, index: usize, extension: &str) -> String {
    format!("{prefix}{index:04}.{extension}")
}

/// Path of frame `index` with the given prefix inside `folder`.
pub fn frame_path(folder: &Path, prefix: &str, index: usize, extension: &str) -> PathBuf {
    folder.join(frame_file_name(prefix, index, extension))
}

/// Parse a Z-position list: one float per line, blank lines ignored.
pub fn parse_positions(text: &str, source: &Path) -> EngineResult<Vec<f32>> {
    let mut positions = Vec::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value = line.parse::<f32>().map_err(|_| {
            EngineError::malformed(format!(
                "{}:{}: '{}' is not a Z position",
                source.display(),
                number + 1,
                line
            ))
        })?;
        positions.push(value);
    }
    if positions.is_empty() {
        return Err(EngineError::malformed(format!(
            "{} lists no Z positions",
            source.display()
        )));
    }
    Ok(positions)
}

/// Read the Z list and every wide frame it refers to.
///
/// All frames must share the dimensions of the first one.
pub fn load_positions_z(
    folder: &Path,
    settings: &FocusingSettings,
    cancel: &CancelFlag,
) -> EngineResult<FocusStack> {
    let started = Instant::now();
    let list_path = folder.join(&settings.z_pos_file);
    let text = fs::read_to_string(&list_path).map_err(|e| EngineError::io(&list_path, e))?;
    let positions = parse_positions(&text, &list_path)?;

    let mut frames: Vec<GrayImage> = Vec::with_capacity(positions.len());
    for index in 0..positions.len() {
        cancel.check("load_positions_z")?;
        let path = frame_path(folder, &settings.wide_prefix, index, &settings.extension);
        let frame = read_gray(&path)?;
        if let Some(first) = frames.first() {
            if frame.dimensions() != first.dimensions() {
                return Err(EngineError::malformed(format!(
                    "{} is {}x{}, expected {}x{}",
                    path.display(),
                    frame.width(),
                    frame.height(),
                    first.width(),
                    first.height()
                )));
            }
        }
        debug!(index, path = %path.display(), "Loaded wide frame");
        frames.push(frame);
    }

    info!(
        folder = %folder.display(),
        frames = frames.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Z positions loaded"
    );
    Ok(FocusStack { positions, frames })
}
