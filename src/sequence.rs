//! Wide/line frame pairs along the Z stack.
//!
//! A [`Sequence`] pairs every wide-field frame with the line frame taken at the same Z
//! position. Line frames are binarised on load so that later analysis only ever sees
//! black and white.

use crate::cancel::CancelFlag;
use crate::config::{FocusingSettings, SequenceSettings};
use crate::depth::stack::{frame_path, parse_positions};
use crate::error::{EngineError, EngineResult};
use crate::imaging::{ensure_subfolder, read_gray, write_bmp, BLACK, WHITE};
use image::{GrayImage, Luma};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Columns averaged by the white-count smoothing.
pub const SMOOTHING_ORDER: usize = 100;
const SMOOTHING_DEPTH: f32 = 0.99;

/// One wide/line frame pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// Z of the pair
    pub z: f32,
    /// Wide frame as captured
    pub wide: GrayImage,
    /// Binarised line frame
    pub line: GrayImage,
}

/// Every wide/line pair of the lock input folder.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sequence {
    /// Pairs in frame order
    pub projections: Vec<Projection>,
}

impl Sequence {
    /// Number of pairs.
    pub fn len(&self) -> usize {
        self.projections.len()
    }

    /// Whether there are no pairs.
    pub fn is_empty(&self) -> bool {
        self.projections.is_empty()
    }
}

/// White pixel count per column of a line frame and its weighted running average.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnProfile {
    /// White pixels per column
    pub counts: Vec<u32>,
    /// Exponentially weighted counts
    pub smoothed: Vec<f32>,
}

/// Read the Z list and the wide and line frame of every position in `folder`.
pub fn build_sequence(
    folder: &Path,
    focusing: &FocusingSettings,
    settings: &SequenceSettings,
    cancel: &CancelFlag,
) -> EngineResult<Sequence> {
    let started = Instant::now();
    let list_path = folder.join(&focusing.z_pos_file);
    let text = fs::read_to_string(&list_path).map_err(|e| EngineError::io(&list_path, e))?;
    let positions = parse_positions(&text, &list_path)?;

    let mut projections = Vec::with_capacity(positions.len());
    for (index, &z) in positions.iter().enumerate() {
        cancel.check("build_sequence")?;
        let wide = read_gray(&frame_path(
            folder,
            &focusing.wide_prefix,
            index,
            &focusing.extension,
        ))?;
        let line_path = frame_path(folder, &focusing.line_prefix, index, &focusing.extension);
        let line = binarize(&read_gray(&line_path)?, settings.line_threshold);
        if line.dimensions() != wide.dimensions() {
            return Err(EngineError::malformed(format!(
                "{} does not match the size of its wide frame",
                line_path.display()
            )));
        }
        debug!(index, z, "Loaded projection");
        projections.push(Projection { z, wide, line });
    }

    info!(
        projections = projections.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Sequence built"
    );
    Ok(Sequence { projections })
}

/// Write `Projections/Wide{i}.bmp` and `Projections/Line{i}.bmp`.
pub fn save_projections(
    sequence: &Sequence,
    output_folder: &Path,
    cancel: &CancelFlag,
) -> EngineResult<()> {
    let folder = ensure_subfolder(output_folder, "Projections")?;
    for (index, projection) in sequence.projections.iter().enumerate() {
        cancel.check("save_projections")?;
        write_bmp(&projection.wide, &folder.join(format!("Wide{index}.bmp")))?;
        write_bmp(&projection.line, &folder.join(format!("Line{index}.bmp")))?;
    }
    info!(folder = %folder.display(), projections = sequence.len(), "Projections saved");
    Ok(())
}

/// Write the row gradient and the column white counts of every line frame.
pub fn analyze_lines(
    sequence: &Sequence,
    output_folder: &Path,
    cancel: &CancelFlag,
) -> EngineResult<Vec<ColumnProfile>> {
    let gradients = ensure_subfolder(output_folder, "Gradients")?;
    let statistics = ensure_subfolder(output_folder, "Statistics")?;

    let mut profiles = Vec::with_capacity(sequence.len());
    for (index, projection) in sequence.projections.iter().enumerate() {
        cancel.check("analyze_lines")?;
        let gradient = row_gradient(&projection.line);
        write_bmp(&gradient, &gradients.join(format!("LineGrad{index}.bmp")))?;

        let profile = column_profile(&projection.line);
        write_profile(&statistics.join(format!("WhiteInCols{index}.csv")), &profile)?;
        profiles.push(profile);
    }
    info!(lines = profiles.len(), "Line frames analysed");
    Ok(profiles)
}

/// Gray levels at or below `threshold` become black, the rest white.
pub fn binarize(image: &GrayImage, threshold: u8) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        if image.get_pixel(x, y)[0] <= threshold {
            Luma([BLACK])
        } else {
            Luma([WHITE])
        }
    })
}

/// White where the rows above and below differ. The first and last rows stay black.
pub fn row_gradient(line: &GrayImage) -> GrayImage {
    let (width, height) = line.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        if y == 0 || y + 1 >= height {
            return Luma([BLACK]);
        }
        if line.get_pixel(x, y - 1) == line.get_pixel(x, y + 1) {
            Luma([BLACK])
        } else {
            Luma([WHITE])
        }
    })
}

/// White counts per column of a binarised line frame.
pub fn column_profile(line: &GrayImage) -> ColumnProfile {
    let (width, height) = line.dimensions();
    let counts: Vec<u32> = (0..width)
        .map(|x| {
            let sum: u32 = (0..height).map(|y| u32::from(line.get_pixel(x, y)[0])).sum();
            sum / u32::from(WHITE)
        })
        .collect();

    let weights: Vec<f32> = (0..=SMOOTHING_ORDER)
        .scan(1.0f32, |weight, _| {
            *weight *= SMOOTHING_DEPTH;
            Some(*weight)
        })
        .collect();
    let weight_sum: f32 = weights.iter().sum();

    let smoothed = (0..counts.len())
        .map(|col| {
            if col < SMOOTHING_ORDER {
                return 0.0;
            }
            let total: f32 = weights
                .iter()
                .enumerate()
                .map(|(k, w)| w * counts[col - k] as f32)
                .sum();
            total / weight_sum
        })
        .collect();

    ColumnProfile { counts, smoothed }
}

/// `col,count,smoothed` per column, no header.
fn write_profile(path: &Path, profile: &ColumnProfile) -> EngineResult<()> {
    let file = File::create(path).map_err(|e| EngineError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for (col, (count, smoothed)) in profile.counts.iter().zip(&profile.smoothed).enumerate() {
        writeln!(writer, "{},{},{}", col, count, smoothed).map_err(|e| EngineError::io(path, e))?;
    }
    writer.flush().map_err(|e| EngineError::io(path, e))
}
