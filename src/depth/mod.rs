//! Depth calculation from a Z-position stack.
//!
//! Every wide frame of a [`FocusStack`] is reduced to a single focus marker using the
//! selected [`FocusingMethod`], and a least-squares line maps markers back to Z. The
//! resulting [`DepthReport`] lists the given and calculated Z of every frame.
//!
//! Files written into the output folder:
//!
//! | Method             | Files                                                      |
//! |--------------------|------------------------------------------------------------|
//! | all                | `PositionsZ.csv`, `PositionsZHalf.csv` with half split     |
//! | Mode, Variance     | `Histogram/Statistics.csv`, `Histogram/Histogram{i}.csv`   |
//! | Spectrum           | `SpectrumFFT/Spectrum{i}.bmp`                              |

pub mod markers;
pub mod regression;
pub mod spectrum;
pub mod stack;

pub use markers::HistogramStats;
pub use regression::Regression;
pub use spectrum::SpectrumAnalyzer;
pub use stack::{load_positions_z, FocusStack};

use crate::cancel::CancelFlag;
use crate::error::{ConfigError, EngineError, EngineResult};
use crate::imaging::{ensure_subfolder, write_bmp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;
use std::time::Instant;
use tracing::{debug, info};

/// How a wide frame is reduced to a focus marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FocusingMethod {
    /// Most frequent gray level in the frame centre
    #[serde(alias = "mode")]
    Mode,
    /// Variance of the centre histogram
    #[serde(alias = "variance")]
    Variance,
    /// Corner-versus-centre energy of the 2D spectrum
    #[serde(alias = "spectrum")]
    Spectrum,
}

impl FocusingMethod {
    /// Every method, in report order.
    pub const ALL: [FocusingMethod; 3] = [
        FocusingMethod::Mode,
        FocusingMethod::Variance,
        FocusingMethod::Spectrum,
    ];
}

impl fmt::Display for FocusingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FocusingMethod::Mode => "Mode",
            FocusingMethod::Variance => "Variance",
            FocusingMethod::Spectrum => "Spectrum",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for FocusingMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mode" => Ok(FocusingMethod::Mode),
            "variance" => Ok(FocusingMethod::Variance),
            "spectrum" => Ok(FocusingMethod::Spectrum),
            _ => Err(ConfigError::UnknownFocusingMethod(s.to_string())),
        }
    }
}

/// One row of the depth report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FramePosition {
    /// Frame index
    pub index: usize,
    /// Focus marker of the frame
    pub marker: f32,
    /// Z from the position list
    pub given: f32,
    /// Z from the regression
    pub calculated: f32,
}

/// Result of [`calculate_depth`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthReport {
    /// Marker used
    pub method: FocusingMethod,
    /// Fitted frames; the even ones when split in half
    pub frames: Vec<FramePosition>,
    /// Marker-to-Z line
    pub regression: Regression,
    /// Frame with the greatest marker (first one on ties)
    pub peak_frame: usize,
    /// Odd frames evaluated with a line fitted on the even ones
    pub half: Option<Vec<FramePosition>>,
}

impl DepthReport {
    /// Markers of the fitted frames.
    pub fn markers(&self) -> Vec<f32> {
        self.frames.iter().map(|f| f.marker).collect()
    }

    /// Given Z of the frame with the highest marker.
    pub fn peak_z(&self) -> Option<f32> {
        self.frames.get(self.peak_frame).map(|f| f.given)
    }
}

/// Compute markers for every frame of `stack`, fit Z against them and write the reports.
pub fn calculate_depth(
    stack: &FocusStack,
    method: FocusingMethod,
    half_split: bool,
    output_folder: &Path,
    cancel: &CancelFlag,
) -> EngineResult<DepthReport> {
    if stack.is_empty() {
        return Err(EngineError::malformed("the Z-position stack is empty"));
    }
    let started = Instant::now();
    info!(%method, frames = stack.len(), "Calculating depth");

    let markers = match method {
        FocusingMethod::Mode | FocusingMethod::Variance => {
            histogram_markers(stack, method, output_folder, cancel)?
        }
        FocusingMethod::Spectrum => spectrum_markers(stack, output_folder, cancel)?,
    };

    let regression = Regression::fit(&markers, &stack.positions)?;
    let frames = evaluate(&regression, &markers, &stack.positions, 0..markers.len());
    write_positions(&output_folder.join("PositionsZ.csv"), &frames)?;

    let half = if half_split {
        let half = fit_half(&markers, &stack.positions)?;
        write_positions(&output_folder.join("PositionsZHalf.csv"), &half)?;
        Some(half)
    } else {
        None
    };

    let peak_frame = markers
        .iter()
        .enumerate()
        .fold(0, |best, (i, &m)| if m > markers[best] { i } else { best });

    info!(
        %method,
        slope = regression.slope,
        offset = regression.offset,
        peak_frame,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Depth calculated"
    );
    Ok(DepthReport {
        method,
        frames,
        regression,
        peak_frame,
        half,
    })
}

fn histogram_markers(
    stack: &FocusStack,
    method: FocusingMethod,
    output_folder: &Path,
    cancel: &CancelFlag,
) -> EngineResult<Vec<f32>> {
    let folder = ensure_subfolder(output_folder, "Histogram")?;
    let mut statistics = Vec::with_capacity(stack.len());

    for (index, frame) in stack.frames.iter().enumerate() {
        cancel.check("calculate_depth")?;
        let stats = HistogramStats::of_central_third(frame);
        write_histogram(&folder.join(format!("Histogram{index}.csv")), &stats)?;
        debug!(index, mode = stats.mode_index, variance = stats.variance, "Frame histogram");
        statistics.push(stats);
    }
    write_statistics(&folder.join("Statistics.csv"), &statistics)?;

    Ok(statistics
        .iter()
        .map(|stats| match method {
            FocusingMethod::Variance => stats.variance,
            _ => f32::from(stats.mode_index),
        })
        .collect())
}

fn spectrum_markers(
    stack: &FocusStack,
    output_folder: &Path,
    cancel: &CancelFlag,
) -> EngineResult<Vec<f32>> {
    let folder = ensure_subfolder(output_folder, "SpectrumFFT")?;
    let analyzer = SpectrumAnalyzer::new();
    let mut markers = Vec::with_capacity(stack.len());

    for (index, frame) in stack.frames.iter().enumerate() {
        cancel.check("calculate_depth")?;
        let result = analyzer.analyze(frame);
        write_bmp(&result.spectrum, &folder.join(format!("Spectrum{index}.bmp")))?;
        debug!(index, marker = result.marker, "Frame spectrum");
        markers.push(result.marker);
    }
    Ok(markers)
}

fn fit_half(markers: &[f32], positions: &[f32]) -> EngineResult<Vec<FramePosition>> {
    let (even_markers, even_positions): (Vec<f32>, Vec<f32>) = markers
        .iter()
        .zip(positions)
        .step_by(2)
        .map(|(&m, &z)| (m, z))
        .unzip();
    let regression = Regression::fit(&even_markers, &even_positions)?;
    Ok(evaluate(
        &regression,
        markers,
        positions,
        (1..markers.len()).step_by(2),
    ))
}

fn evaluate(
    regression: &Regression,
    markers: &[f32],
    positions: &[f32],
    indices: impl Iterator<Item = usize>,
) -> Vec<FramePosition> {
    indices
        .map(|index| FramePosition {
            index,
            marker: markers[index],
            given: positions[index],
            calculated: regression.evaluate(markers[index]),
        })
        .collect()
}

fn write_positions(path: &Path, frames: &[FramePosition]) -> EngineResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["Index", "Z given", "Z calculated"])?;
    for frame in frames {
        writer.write_record([
            frame.index.to_string(),
            frame.given.to_string(),
            frame.calculated.to_string(),
        ])?;
    }
    writer.flush().map_err(|e| EngineError::io(path, e))?;
    Ok(())
}

/// `modeIdx,modeCount,variance,std` per frame, no header.
fn write_statistics(path: &Path, statistics: &[HistogramStats]) -> EngineResult<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    for stats in statistics {
        writer.write_record([
            stats.mode_index.to_string(),
            stats.mode_count.to_string(),
            stats.variance.to_string(),
            stats.standard_deviation.to_string(),
        ])?;
    }
    writer.flush().map_err(|e| EngineError::io(path, e))?;
    Ok(())
}

/// One bin count per line.
fn write_histogram(path: &Path, stats: &HistogramStats) -> EngineResult<()> {
    let file = File::create(path).map_err(|e| EngineError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    for count in stats.histogram {
        writeln!(writer, "{}", count).map_err(|e| EngineError::io(path, e))?;
    }
    writer.flush().map_err(|e| EngineError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use std::fs;
    use tempfile::TempDir;

    /// Frame whose centre sits at gray level `level`.
    fn stack_with_levels(levels: &[u8]) -> FocusStack {
        FocusStack {
            positions: levels.iter().map(|&l| f32::from(l) * 0.01).collect(),
            frames: levels
                .iter()
                .map(|&l| GrayImage::from_pixel(30, 30, Luma([l])))
                .collect(),
        }
    }

    #[test]
    fn test_method_from_str() {
        assert_eq!("Mode".parse::<FocusingMethod>().unwrap(), FocusingMethod::Mode);
        assert_eq!(
            "spectrum".parse::<FocusingMethod>().unwrap(),
            FocusingMethod::Spectrum
        );
        assert!(matches!(
            "Focus".parse::<FocusingMethod>(),
            Err(ConfigError::UnknownFocusingMethod(_))
        ));
        for method in FocusingMethod::ALL {
            assert_eq!(method.to_string().parse::<FocusingMethod>().unwrap(), method);
        }
    }

    #[test]
    fn test_mode_method_recovers_linear_positions() {
        let dir = TempDir::new().unwrap();
        let stack = stack_with_levels(&[10, 20, 30, 40]);
        let report = calculate_depth(
            &stack,
            FocusingMethod::Mode,
            false,
            dir.path(),
            &CancelFlag::new(),
        )
        .unwrap();

        assert_eq!(report.markers(), vec![10.0, 20.0, 30.0, 40.0]);
        assert!((report.regression.slope - 0.01).abs() < 1e-5);
        for frame in &report.frames {
            assert!((frame.given - frame.calculated).abs() < 1e-4);
        }
        assert_eq!(report.peak_frame, 3);
        assert!(report.half.is_none());

        let csv = fs::read_to_string(dir.path().join("PositionsZ.csv")).unwrap();
        assert!(csv.starts_with("Index,Z given,Z calculated\n0,"));
        assert_eq!(csv.lines().count(), 5);
        let histogram = fs::read_to_string(dir.path().join("Histogram/Histogram2.csv")).unwrap();
        assert_eq!(histogram.lines().count(), 256);
        assert_eq!(histogram.lines().nth(30), Some("100"));
        let statistics = fs::read_to_string(dir.path().join("Histogram/Statistics.csv")).unwrap();
        assert!(statistics.lines().next().unwrap().starts_with("10,100,99,9.94"));
    }

    #[test]
    fn test_half_split_evaluates_odd_frames() {
        let dir = TempDir::new().unwrap();
        let stack = stack_with_levels(&[10, 20, 30, 40, 50]);
        let report = calculate_depth(
            &stack,
            FocusingMethod::Mode,
            true,
            dir.path(),
            &CancelFlag::new(),
        )
        .unwrap();

        let half = report.half.unwrap();
        assert_eq!(half.iter().map(|f| f.index).collect::<Vec<_>>(), vec![1, 3]);
        let text = fs::read_to_string(dir.path().join("PositionsZHalf.csv")).unwrap();
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn test_spectrum_method_writes_images() {
        let dir = TempDir::new().unwrap();
        let stack = stack_with_levels(&[10, 200]);
        let report = calculate_depth(
            &stack,
            FocusingMethod::Spectrum,
            false,
            dir.path(),
            &CancelFlag::new(),
        )
        .unwrap();
        assert_eq!(report.frames.len(), 2);
        assert!(dir.path().join("SpectrumFFT/Spectrum0.bmp").is_file());
        assert!(dir.path().join("SpectrumFFT/Spectrum1.bmp").is_file());
        assert!(!dir.path().join("Histogram").exists());
    }

    #[test]
    fn test_cancelled_depth() {
        let dir = TempDir::new().unwrap();
        let cancel = CancelFlag::new();
        cancel.trigger("test");
        let err = calculate_depth(
            &stack_with_levels(&[10, 20]),
            FocusingMethod::Variance,
            false,
            dir.path(),
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled("calculate_depth")));
    }
}
