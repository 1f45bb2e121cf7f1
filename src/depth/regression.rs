//! Least-squares line fit of Z positions against focus markers.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// `z = slope * marker + offset`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Regression {
    /// Z per marker unit
    pub slope: f32,
    /// Z at marker 0
    pub offset: f32,
}

impl Regression {
    /// Fit a line through `(markers[i], positions[i])`.
    ///
    /// A degenerate fit (fewer than two points, or all markers equal) yields a flat
    /// line through the mean position.
    pub fn fit(markers: &[f32], positions: &[f32]) -> EngineResult<Self> {
        if markers.len() != positions.len() {
            return Err(EngineError::malformed(format!(
                "{} markers for {} Z positions",
                markers.len(),
                positions.len()
            )));
        }
        if markers.is_empty() {
            return Err(EngineError::malformed("no frames to fit"));
        }

        let n = markers.len() as f64;
        let (mut sum_x, mut sum_x2, mut sum_y, mut sum_xy) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);
        for (&x, &y) in markers.iter().zip(positions) {
            let (x, y) = (f64::from(x), f64::from(y));
            sum_x += x;
            sum_x2 += x * x;
            sum_y += y;
            sum_xy += x * y;
        }

        let denominator = n * sum_x2 - sum_x * sum_x;
        if denominator.abs() < f64::EPSILON * n * sum_x2.max(1.0) {
            return Ok(Self {
                slope: 0.0,
                offset: (sum_y / n) as f32,
            });
        }
        Ok(Self {
            slope: ((n * sum_xy - sum_x * sum_y) / denominator) as f32,
            offset: ((sum_x2 * sum_y - sum_xy * sum_x) / denominator) as f32,
        })
    }

    /// Z predicted for `marker`.
    pub fn evaluate(&self, marker: f32) -> f32 {
        self.slope * marker + self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_line() {
        let markers = [1.0, 2.0, 3.0, 4.0];
        let positions = [3.0, 5.0, 7.0, 9.0];
        let fit = Regression::fit(&markers, &positions).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-5);
        assert!((fit.offset - 1.0).abs() < 1e-5);
        assert!((fit.evaluate(10.0) - 21.0).abs() < 1e-4);
    }

    #[test]
    fn test_constant_markers_give_mean() {
        let fit = Regression::fit(&[5.0, 5.0, 5.0], &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(fit.slope, 0.0);
        assert!((fit.offset - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(Regression::fit(&[1.0], &[1.0, 2.0]).is_err());
        assert!(Regression::fit(&[], &[]).is_err());
    }
}
