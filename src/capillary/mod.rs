//! Capillary detection and description on the stitched layers of a [`Map`].
//!
//! Detection ([`detect`]) finds capillary apexes in every layer with a Sobel corner
//! detector. Description ([`describe`]) grows a region from every apex on an
//! excess-filtered copy of the layer, fits the field-of-view frame inside it and
//! scores the capillary by the share of its pixels covered by the frame.
//!
//! Apex positions are kept in millimetres relative to the map origin; reports add the
//! stage origin back.
//!
//! [`Map`]: crate::map::Map

pub mod describe;
pub mod detect;
pub mod filters;
pub mod frame;
pub mod report;

use serde::{Deserialize, Serialize};

/// A detected capillary apex.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredCorner {
    /// Millimetres right of the map origin
    pub x_mm: f32,
    /// Millimetres below the map origin
    pub y_mm: f32,
    /// Z position of the layer
    pub z: f32,
    /// Mean gradient magnitude around the apex
    pub score: f32,
    /// Raw gray level at the apex
    pub gray_level: u8,
}

/// Extent, energy and fit of one described capillary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapillaryInfo {
    /// Index of the apex this capillary grew from
    pub index: usize,
    /// Apex the region grew from
    pub apex: ScoredCorner,
    /// First row of the region
    pub limit_up: u32,
    /// Last row of the region
    pub limit_down: u32,
    /// First column of the region
    pub limit_left: u32,
    /// Last column of the region
    pub limit_right: u32,
    /// Pixels in the region
    pub pixels_capillary: u64,
    /// Sum of processed gray levels inside the region
    pub energy_capillary: u64,
    /// Pixels in the band around the region
    pub pixels_surroundings: u64,
    /// Sum of processed gray levels around the region
    pub energy_surroundings: u64,
    /// Rotation of the fitted frame in radians
    pub angle: f32,
    /// Percentage of region pixels inside the fitted frame
    pub score: f32,
}

impl CapillaryInfo {
    /// Empty region for apex `index`.
    pub fn new(index: usize, apex: ScoredCorner) -> Self {
        Self {
            index,
            apex,
            limit_up: u32::MAX,
            limit_down: 0,
            limit_left: u32::MAX,
            limit_right: 0,
            pixels_capillary: 0,
            energy_capillary: 0,
            pixels_surroundings: 0,
            energy_surroundings: 0,
            angle: 0.0,
            score: 0.0,
        }
    }

    /// Number of rows spanned by the region.
    pub fn rows(&self) -> u32 {
        if self.pixels_capillary == 0 {
            0
        } else {
            self.limit_down - self.limit_up + 1
        }
    }

    /// Number of columns spanned by the region.
    pub fn cols(&self) -> u32 {
        if self.pixels_capillary == 0 {
            0
        } else {
            self.limit_right - self.limit_left + 1
        }
    }

    /// Average surrounding gray level minus average capillary gray level.
    ///
    /// Negative when the capillary is brighter than its surroundings; 0 when either
    /// area is empty.
    pub fn contrast(&self) -> i32 {
        if self.pixels_capillary == 0 || self.pixels_surroundings == 0 {
            return 0;
        }
        let average = |energy: u64, pixels: u64| (energy as f64 / pixels as f64).round() as i32;
        average(self.energy_surroundings, self.pixels_surroundings)
            - average(self.energy_capillary, self.pixels_capillary)
    }
}

/// Detection and description results of one map layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerInfo {
    /// Zero-based layer index
    pub layer_index: usize,
    /// Z position of the layer
    pub z: f32,
    /// Detected apexes, best score first
    pub apexes: Vec<ScoredCorner>,
    /// Described capillaries, best score first
    pub capillaries: Vec<CapillaryInfo>,
    /// Best apex or capillary score
    pub max_score: f32,
    /// Sum of apex or capillary scores
    pub sum_score: f32,
}

impl LayerInfo {
    /// Layer with detected apexes and apex-based scores.
    pub fn detected(layer_index: usize, z: f32, apexes: Vec<ScoredCorner>) -> Self {
        let max_score = apexes.first().map(|a| a.score).unwrap_or(0.0);
        let sum_score = apexes.iter().map(|a| a.score).sum();
        Self {
            layer_index,
            z,
            apexes,
            capillaries: Vec::new(),
            max_score,
            sum_score,
        }
    }
}

/// Layer with the highest apex-score sum among layers with at least
/// `min_found` apexes.
pub fn best_detected_layer(layers: &[LayerInfo], min_found: usize) -> Option<usize> {
    best_by_sum(
        layers
            .iter()
            .filter(|layer| layer.apexes.len() >= min_found),
    )
}

/// Layer with the highest capillary-score sum after description.
pub fn best_described_layer(layers: &[LayerInfo]) -> Option<usize> {
    best_by_sum(layers.iter())
}

fn best_by_sum<'a>(layers: impl Iterator<Item = &'a LayerInfo>) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for layer in layers {
        let beats = match best {
            Some((_, score)) => layer.sum_score > score,
            None => layer.sum_score > 0.0,
        };
        if beats {
            best = Some((layer.layer_index, layer.sum_score));
        }
    }
    best.map(|(index, _)| index)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corner(score: f32) -> ScoredCorner {
        ScoredCorner {
            x_mm: 0.0,
            y_mm: 0.0,
            z: 0.0,
            score,
            gray_level: 50,
        }
    }

    #[test]
    fn test_detected_layer_scores() {
        let layer = LayerInfo::detected(0, 0.5, vec![corner(9.0), corner(4.0), corner(1.0)]);
        assert_eq!(layer.max_score, 9.0);
        assert_eq!(layer.sum_score, 14.0);
    }

    #[test]
    fn test_best_detected_layer_needs_enough_apexes() {
        let layers = vec![
            LayerInfo::detected(0, 0.0, vec![corner(100.0), corner(100.0)]),
            LayerInfo::detected(1, 0.1, vec![corner(5.0), corner(5.0), corner(5.0)]),
            LayerInfo::detected(2, 0.2, vec![corner(6.0), corner(6.0), corner(6.0)]),
        ];
        assert_eq!(best_detected_layer(&layers, 3), Some(2));
        assert_eq!(best_detected_layer(&layers, 4), None);
        assert_eq!(best_detected_layer(&layers, 1), Some(0));
    }

    #[test]
    fn test_contrast_is_signed_and_guarded() {
        let mut info = CapillaryInfo::new(0, corner(1.0));
        assert_eq!(info.contrast(), 0);

        info.pixels_capillary = 10;
        info.energy_capillary = 600;
        info.pixels_surroundings = 20;
        info.energy_surroundings = 2000;
        assert_eq!(info.contrast(), 40);

        info.energy_surroundings = 400;
        assert_eq!(info.contrast(), -40);
    }
}
