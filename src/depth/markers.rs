//! Histogram markers of a wide-field frame.
//!
//! Only the central third of the frame (in both directions) is counted.

use image::GrayImage;

/// 256-bin histogram of the central region plus derived statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramStats {
    /// Pixel count per gray level
    pub histogram: [u64; 256],
    /// Gray level with the highest count (lowest level on ties)
    pub mode_index: u8,
    /// Pixels at the mode
    pub mode_count: u64,
    /// Variance of the bin counts normalised by the pixel count
    pub variance: f32,
    /// Square root of the variance
    pub standard_deviation: f32,
}

impl HistogramStats {
    /// Statistics of the central third of `image` in both directions.
    pub fn of_central_third(image: &GrayImage) -> Self {
        let (cols, rows) = image.dimensions();
        let (row_begin, row_end) = (rows / 3, 2 * rows / 3);
        let (col_begin, col_end) = (cols / 3, 2 * cols / 3);

        let mut histogram = [0u64; 256];
        for row in row_begin..row_end {
            for col in col_begin..col_end {
                histogram[usize::from(image.get_pixel(col, row)[0])] += 1;
            }
        }
        let pixels = u64::from(row_end - row_begin) * u64::from(col_end - col_begin);

        let mut mode_index = 0u8;
        let mut mode_count = 0u64;
        let mut sum = 0f64;
        let mut sum_sq = 0f64;
        for (level, &count) in histogram.iter().enumerate() {
            if count > mode_count {
                mode_index = level as u8;
                mode_count = count;
            }
            sum += count as f64;
            sum_sq += (count * count) as f64;
        }

        let (variance, standard_deviation) = if pixels == 0 {
            (0.0, 0.0)
        } else {
            let expectation = sum / pixels as f64;
            let expectation_sq = sum_sq / pixels as f64;
            let variance = (expectation_sq - expectation * expectation) as f32;
            (variance, variance.max(0.0).sqrt())
        };

        Self {
            histogram,
            mode_index,
            mode_count,
            variance,
            standard_deviation,
        }
    }
}
