//! Sobel-based detection of capillary apexes.

use super::filters::{neighbourhood_means, sobel, CORNER_DETECTION_KERNEL_SIZE};
use super::report;
use super::{LayerInfo, ScoredCorner};
use crate::cancel::CancelFlag;
use crate::config::{DetectionSettings, GrayWindow};
use crate::error::EngineResult;
use crate::imaging::ensure_subfolder;
use crate::map::{Axis, Map};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

const OPERATION: &str = "detect_capillaries";

/// Apex candidate before suppression, in pixels.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    row: u32,
    col: u32,
    score: f32,
    gray_level: u8,
}

/// Detect apexes in every layer of `map` and write the corner reports to
/// `output_folder/Capillaries`.
pub fn detect_capillaries(
    map: &Map,
    detection: &DetectionSettings,
    window: GrayWindow,
    output_folder: &Path,
    cancel: &CancelFlag,
) -> EngineResult<Vec<LayerInfo>> {
    let started = Instant::now();
    info!(layers = map.layers().len(), "Detection of capillaries started");

    let mut layers = Vec::with_capacity(map.layers().len());
    for index in 0..map.layers().len() {
        cancel.check(OPERATION)?;
        let layer = detect_layer(map, index, detection, window);
        debug!(
            layer = index + 1,
            corners = layer.apexes.len(),
            max_score = layer.max_score,
            sum_score = layer.sum_score,
            "Layer scanned"
        );
        layers.push(layer);
    }

    let folder = ensure_subfolder(output_folder, "Capillaries")?;
    report::write_all_layers(&folder.join("AllLayers.csv"), &layers, |l| l.apexes.len())?;
    for layer in &layers {
        let path = folder.join(format!("Layer{}.csv", layer.layer_index + 1));
        report::write_layer_corners(&path, map, &layer.apexes)?;
    }

    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Detection of capillaries completed"
    );
    Ok(layers)
}

/// Detect the apexes of one layer.
///
/// A pixel is a candidate when both absolute Sobel responses reach the gradient
/// threshold, its raw gray level lies in `window` and it is off the seams. Candidates
/// are scored by the mean gradient magnitude around them and accepted strongest first
/// while they keep `min_distance_pixels` from every accepted apex.
pub fn detect_layer(
    map: &Map,
    layer_index: usize,
    detection: &DetectionSettings,
    window: GrayWindow,
) -> LayerInfo {
    let Some(layer) = map.layer(layer_index) else {
        return LayerInfo::detected(layer_index, 0.0, Vec::new());
    };
    let image = &layer.image;
    let (width, height) = image.dimensions();
    let gradients = sobel(image);
    let scores = neighbourhood_means(&gradients.magnitude, CORNER_DETECTION_KERNEL_SIZE);

    let last_row = if detection.cropped_rows > 0 {
        detection.cropped_rows.min(height)
    } else {
        height
    };

    let mut candidates = Vec::new();
    for row in 1..last_row.saturating_sub(1) {
        if map.is_on_seam(row, Axis::Row) {
            continue;
        }
        for col in 1..width.saturating_sub(1) {
            if gradients.gx.get_pixel(col, row)[0] < detection.gradient_threshold
                || gradients.gy.get_pixel(col, row)[0] < detection.gradient_threshold
            {
                continue;
            }
            let gray_level = image.get_pixel(col, row)[0];
            if !window.contains(gray_level) || map.is_on_seam(col, Axis::Col) {
                continue;
            }
            candidates.push(Candidate {
                row,
                col,
                score: f32::from(scores.get_pixel(col, row)[0]),
                gray_level,
            });
        }
    }

    let accepted = suppress_non_maxima(candidates, detection.min_distance_pixels);
    let apexes = accepted
        .into_iter()
        .map(|c| ScoredCorner {
            x_mm: map.pixels_to_mm(c.col),
            y_mm: map.pixels_to_mm(c.row),
            z: layer.z,
            score: c.score,
            gray_level: c.gray_level,
        })
        .collect();
    LayerInfo::detected(layer_index, layer.z, apexes)
}

fn suppress_non_maxima(mut candidates: Vec<Candidate>, min_distance: u32) -> Vec<Candidate> {
    // Stable sort keeps scan order among equal scores
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

    let min_distance_sq = u64::from(min_distance) * u64::from(min_distance);
    let mut accepted: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        let far_enough = accepted.iter().all(|a| {
            let dr = u64::from(a.row.abs_diff(candidate.row));
            let dc = u64::from(a.col.abs_diff(candidate.col));
            dr * dr + dc * dc >= min_distance_sq
        });
        if far_enough {
            accepted.push(candidate);
        }
    }
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::tests::sample_map;
    use crate::map::{Layer, MapGeometry};
    use image::{GrayImage, Luma};

    /// 200x200 bright layer with dark squares whose corners are apex candidates.
    fn map_with_squares(squares: &[(u32, u32)], seam_cols: Vec<u32>) -> Map {
        let image = GrayImage::from_fn(200, 200, |x, y| {
            let dark = squares
                .iter()
                .any(|&(sx, sy)| x >= sx && x < sx + 20 && y >= sy && y < sy + 20);
            Luma([if dark { 60 } else { 220 }])
        });
        let geometry = MapGeometry {
            pixels_in_mm: 100,
            start_x_mm: 0.0,
            start_y_mm: 0.0,
            step_x_mm: 0.0,
            step_y_mm: 0.0,
            frame_width: 200,
            frame_height: 200,
            rows: 200,
            cols: 200,
            seam_rows: vec![],
            seam_cols,
        };
        Map::from_parts(geometry, vec![Layer { z: 0.25, image }])
    }

    fn settings(min_distance_pixels: u32) -> DetectionSettings {
        DetectionSettings {
            gradient_threshold: 60,
            min_distance_pixels,
            cropped_rows: 0,
            min_found_capillaries: 3,
        }
    }

    const WINDOW: GrayWindow = GrayWindow { min: 30, max: 90 };

    #[test]
    fn test_detects_one_apex_per_square() {
        let map = map_with_squares(&[(40, 40), (140, 130)], vec![]);
        let layer = detect_layer(&map, 0, &settings(50), WINDOW);

        assert_eq!(layer.apexes.len(), 2);
        assert_eq!(layer.z, 0.25);
        for apex in &layer.apexes {
            assert!(apex.score > 0.0);
            assert!(WINDOW.contains(apex.gray_level));
        }
        // best first
        assert!(layer.apexes[0].score >= layer.apexes[1].score);
        assert_eq!(layer.max_score, layer.apexes[0].score);
    }

    #[test]
    fn test_min_distance_merges_corners_of_one_square() {
        let map = map_with_squares(&[(40, 40)], vec![]);
        let near = detect_layer(&map, 0, &settings(5), WINDOW);
        let far = detect_layer(&map, 0, &settings(100), WINDOW);
        assert!(near.apexes.len() > 1);
        assert_eq!(far.apexes.len(), 1);
    }

    #[test]
    fn test_seams_are_skipped() {
        // square corners at col 40 and 59 are within the seam bands
        let map = map_with_squares(&[(40, 40)], vec![40, 59]);
        let layer = detect_layer(&map, 0, &settings(5), WINDOW);
        assert!(layer.apexes.is_empty());
    }

    #[test]
    fn test_cropped_rows_limit_search() {
        let map = map_with_squares(&[(40, 140)], vec![]);
        let mut cropped = settings(50);
        cropped.cropped_rows = 100;
        assert!(detect_layer(&map, 0, &cropped, WINDOW).apexes.is_empty());
    }

    #[test]
    fn test_flat_layer_has_no_apexes() {
        let map = sample_map();
        let layer = detect_layer(&map, 0, &settings(10), WINDOW);
        assert!(layer.apexes.is_empty());
        assert_eq!(layer.sum_score, 0.0);
    }
}
