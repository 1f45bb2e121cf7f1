//! Spectral focus marker.
//!
//! A frame is placed in the middle of a 512x512 zero field (frames larger than that are
//! centre-cropped), transformed with a 2D FFT, and the real part of the spectrum over
//! the frame region is scaled into an 8-bit spectrum image. A sharp frame carries more
//! energy in the spectrum corners than in its centre.

use image::{GrayImage, Luma};
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Side of the zero-padded transform.
pub const FFT_SIZE: usize = 512;

/// Side of the square regions compared by the marker.
pub const ENERGY_SIZE: u32 = 25;

const NORMALIZATION: f64 = 15.0;

/// Spectrum image and marker of one frame.
#[derive(Debug, Clone)]
pub struct SpectrumMarker {
    /// Scaled magnitude spectrum, quadrants as computed
    pub spectrum: GrayImage,
    /// Corner energy in excess of the centre
    pub marker: f32,
}

/// Reusable 512-point FFT plan for row and column passes.
#[derive(Clone)]
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer")
            .field("fft_size", &FFT_SIZE)
            .finish()
    }
}

impl Default for SpectrumAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl SpectrumAnalyzer {
    /// Plan the forward transform once.
    pub fn new() -> Self {
        let mut planner = FftPlanner::new();
        Self {
            fft: planner.plan_fft_forward(FFT_SIZE),
        }
    }

    /// Spectrum image and marker of one frame.
    pub fn analyze(&self, image: &GrayImage) -> SpectrumMarker {
        let (width, height) = image.dimensions();
        let rows = (height as usize).min(FFT_SIZE);
        let cols = (width as usize).min(FFT_SIZE);
        let row_begin = (FFT_SIZE - rows) / 2;
        let col_begin = (FFT_SIZE - cols) / 2;
        let src_row_offset = (height as usize - rows) / 2;
        let src_col_offset = (width as usize - cols) / 2;

        let mut field = vec![Complex::new(0.0f64, 0.0); FFT_SIZE * FFT_SIZE];
        for row in 0..rows {
            for col in 0..cols {
                let value = image.get_pixel(
                    (col + src_col_offset) as u32,
                    (row + src_row_offset) as u32,
                )[0];
                field[(row + row_begin) * FFT_SIZE + col + col_begin] =
                    Complex::new(f64::from(value), 0.0);
            }
        }

        self.transform_2d(&mut field);

        let mut spectrum = GrayImage::new(cols as u32, rows as u32);
        let mut energy_corners = 0.0f64;
        let mut energy_central = 0.0f64;
        for row in 0..rows {
            for col in 0..cols {
                let value = field[(row + row_begin) * FFT_SIZE + col + col_begin];
                let normalized = (value.re.abs().round() / NORMALIZATION).min(255.0);
                spectrum.put_pixel(col as u32, row as u32, Luma([normalized as u8]));

                match area_of(row as u32, col as u32, rows as u32, cols as u32) {
                    Area::Corners => energy_corners += normalized,
                    Area::Central => energy_central += normalized,
                    Area::Other => {}
                }
            }
        }

        let square = f64::from(ENERGY_SIZE * ENERGY_SIZE);
        let marker = ((energy_corners - energy_central) / 4.0 / square).max(0.0) as f32;
        SpectrumMarker { spectrum, marker }
    }

    fn transform_2d(&self, field: &mut [Complex<f64>]) {
        for row in field.chunks_exact_mut(FFT_SIZE) {
            self.fft.process(row);
        }
        let mut column = vec![Complex::new(0.0, 0.0); FFT_SIZE];
        for col in 0..FFT_SIZE {
            for (row, slot) in column.iter_mut().enumerate() {
                *slot = field[row * FFT_SIZE + col];
            }
            self.fft.process(&mut column);
            for (row, value) in column.iter().enumerate() {
                field[row * FFT_SIZE + col] = *value;
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Area {
    Corners,
    Central,
    Other,
}

fn area_of(row: u32, col: u32, rows: u32, cols: u32) -> Area {
    let row_in_corner = row < ENERGY_SIZE || row >= rows.saturating_sub(ENERGY_SIZE);
    let col_in_corner = col < ENERGY_SIZE || col >= cols.saturating_sub(ENERGY_SIZE);
    if row_in_corner && col_in_corner {
        return Area::Corners;
    }
    let row_central = (i64::from(row) - i64::from(rows / 2)).abs() < i64::from(ENERGY_SIZE);
    let col_central = (i64::from(col) - i64::from(cols / 2)).abs() < i64::from(ENERGY_SIZE);
    if row_central && col_central {
        Area::Central
    } else {
        Area::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_area_classification() {
        assert_eq!(area_of(0, 0, 100, 100), Area::Corners);
        assert_eq!(area_of(99, 80, 100, 100), Area::Corners);
        assert_eq!(area_of(50, 50, 100, 100), Area::Central);
        assert_eq!(area_of(0, 50, 100, 100), Area::Other);
    }

    #[test]
    fn test_black_frame_has_zero_marker() {
        let analyzer = SpectrumAnalyzer::new();
        let result = analyzer.analyze(&GrayImage::new(120, 80));
        assert_eq!(result.marker, 0.0);
        assert_eq!(result.spectrum.dimensions(), (120, 80));
        assert!(result.spectrum.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn test_large_frame_is_cropped() {
        let analyzer = SpectrumAnalyzer::new();
        let result = analyzer.analyze(&GrayImage::from_pixel(600, 520, Luma([10])));
        assert_eq!(result.spectrum.dimensions(), (512, 512));
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let image = GrayImage::from_fn(100, 100, |x, y| Luma([((x ^ y) * 5 % 256) as u8]));
        let analyzer = SpectrumAnalyzer::new();
        let first = analyzer.analyze(&image);
        let second = analyzer.analyze(&image);
        assert_eq!(first.marker, second.marker);
        assert_eq!(first.spectrum, second.spectrum);
    }
}
