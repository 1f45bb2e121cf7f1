//! Description of detected capillaries.
//!
//! For every layer the raw image is passed through the excess filter, then a region is
//! grown from each apex over the filtered pixels inside the processed gray window.
//! Grown pixels are painted white in the filtered image, which both marks them as
//! visited and makes them the target of the frame fit. Regions that are too sparse,
//! too small for the field-of-view frame, or that hold the frame with a score below the
//! threshold are dropped.

use super::filters::{excess_filter, DEEP_SMOOTHING_KERNEL_SIZE};
use super::frame::{draw_frame, Bounds, FrameSearch};
use super::{best_described_layer, report, CapillaryInfo, LayerInfo};
use crate::cancel::CancelFlag;
use crate::config::{DescriptionSettings, GrayWindow};
use crate::error::EngineResult;
use crate::imaging::{ensure_subfolder, write_bmp, WHITE};
use crate::map::{Axis, Map};
use image::{GrayImage, Luma};
use std::collections::VecDeque;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

const OPERATION: &str = "describe_capillaries";

/// Described layers and the layer with the highest capillary-score sum.
#[derive(Debug, Clone)]
pub struct DescriptionOutcome {
    /// Every layer, with its described capillaries
    pub layers: Vec<LayerInfo>,
    /// Layer with the highest capillary score sum, if any has capillaries
    pub best_layer: Option<usize>,
}

/// Describe the capillaries of every detected layer.
///
/// Works on a copy of `detected`; the caller's results are untouched if the operation
/// fails or is cancelled. Writes `Layer{n}/Data.csv` per layer with capillaries,
/// `Capillaries/ActualLayersFrames.csv` and `Summary.txt` under `output_folder`.
pub fn describe_capillaries(
    map: &Map,
    detected: &[LayerInfo],
    description: &DescriptionSettings,
    window: GrayWindow,
    output_folder: &Path,
    cancel: &CancelFlag,
) -> EngineResult<DescriptionOutcome> {
    let started = Instant::now();
    info!(layers = detected.len(), "Description of capillaries started");

    let mut layers = detected.to_vec();
    let describer = Describer {
        map,
        description,
        window,
        cancel,
    };
    for layer in &mut layers {
        cancel.check(OPERATION)?;
        describer.describe_layer(layer, output_folder)?;
    }

    let capillaries_folder = ensure_subfolder(output_folder, "Capillaries")?;
    report::write_described_layers(&capillaries_folder.join("ActualLayersFrames.csv"), &layers)?;

    let best_layer = best_described_layer(&layers);
    match best_layer {
        Some(index) => info!(best_layer = index + 1, "Best layer selected"),
        None => warn!("No layer holds a capillary with the field-of-view frame"),
    }
    report::write_summary(&output_folder.join("Summary.txt"), best_layer)?;

    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Description of capillaries completed"
    );
    Ok(DescriptionOutcome { layers, best_layer })
}

struct Describer<'a> {
    map: &'a Map,
    description: &'a DescriptionSettings,
    window: GrayWindow,
    cancel: &'a CancelFlag,
}

impl Describer<'_> {
    fn describe_layer(&self, layer: &mut LayerInfo, output_folder: &Path) -> EngineResult<()> {
        let layer_number = layer.layer_index + 1;
        let Some(map_layer) = self.map.layer(layer.layer_index) else {
            warn!(layer = layer_number, "Layer is missing from the map");
            return Ok(());
        };

        // Scores from here on come from the fitted frames
        layer.max_score = 0.0;
        layer.sum_score = 0.0;
        layer.capillaries.clear();

        let folder = ensure_subfolder(output_folder, &format!("Layer{}", layer_number))?;
        let debug_images = self.description.save_debug_images;

        let original = &map_layer.image;
        let mut processed = excess_filter(original, DEEP_SMOOTHING_KERNEL_SIZE);
        if debug_images {
            write_bmp(original, &folder.join("Original.bmp"))?;
            write_bmp(&processed, &folder.join("Processed.bmp"))?;
        }

        let search = FrameSearch {
            width: self.description.frame_width,
            height: self.description.frame_height,
            angle_step_degrees: self.description.angle_step_degrees,
        };
        let mut framed = debug_images.then(|| original.clone());

        for (index, apex) in layer.apexes.iter().enumerate() {
            self.cancel.check(OPERATION)?;

            let mut info = CapillaryInfo::new(index, *apex);
            let row = self.map.mm_to_pixels(apex.y_mm).min(processed.height() - 1);
            let col = self.map.mm_to_pixels(apex.x_mm).min(processed.width() - 1);
            self.grow_region(&mut processed, original, (row, col), &mut info);

            if info.pixels_capillary < self.description.min_pixels_in_capillary as u64 {
                continue;
            }
            if info.rows() < search.height || info.cols() < search.width {
                debug!(
                    layer = layer_number,
                    capillary = index + 1,
                    pixels = info.pixels_capillary,
                    "Capillary too small for the frame"
                );
                continue;
            }

            let bounds = Bounds {
                up: info.limit_up,
                down: info.limit_down,
                left: info.limit_left,
                right: info.limit_right,
            };
            let fit = match search.fit(&processed, bounds) {
                Some(fit) if fit.score >= self.description.score_threshold => fit,
                _ => {
                    debug!(
                        layer = layer_number,
                        capillary = index + 1,
                        pixels = info.pixels_capillary,
                        "Frame score below threshold"
                    );
                    continue;
                }
            };

            info.angle = fit.angle;
            info.score = fit.score;
            debug!(
                layer = layer_number,
                capillary = index + 1,
                pixels = info.pixels_capillary,
                score = info.score,
                "Capillary described"
            );
            if let Some(framed) = framed.as_mut() {
                draw_frame(framed, &fit.corners);
            }
            layer.capillaries.push(info);
        }

        if debug_images {
            write_bmp(&processed, &folder.join("Marked.bmp"))?;
        }
        if let Some(framed) = framed.as_ref() {
            write_bmp(framed, &folder.join("Framed.bmp"))?;
        }

        if layer.capillaries.is_empty() {
            info!(
                layer = layer_number,
                "No capillaries found to hold the field-of-view frame"
            );
            return Ok(());
        }

        for info in &mut layer.capillaries {
            self.collect_surroundings(&processed, info);
        }
        self.trim_and_score(layer);
        report::write_capillary_data(&folder.join("Data.csv"), self.map, &layer.capillaries)?;

        info!(
            layer = layer_number,
            capillaries = layer.capillaries.len(),
            max_score = layer.max_score,
            sum_score = layer.sum_score,
            "Layer described"
        );
        Ok(())
    }

    /// Breadth-first region growing from `root` (row, col).
    ///
    /// Seam pixels are never marked but do not stop the traversal of pixels already
    /// queued. Neighbours closer than the filter kernel to the border are not queued.
    fn grow_region(
        &self,
        processed: &mut GrayImage,
        original: &GrayImage,
        root: (u32, u32),
        info: &mut CapillaryInfo,
    ) {
        let (cols, rows) = processed.dimensions();
        let margin = DEEP_SMOOTHING_KERNEL_SIZE;
        let valid = |image: &GrayImage, row: u32, col: u32| {
            self.window.contains(image.get_pixel(col, row)[0])
        };

        let mut queue = VecDeque::from([root]);
        while let Some((row, col)) = queue.pop_front() {
            if processed.get_pixel(col, row)[0] == WHITE {
                continue;
            }
            if self.map.is_on_seam(row, Axis::Row) || self.map.is_on_seam(col, Axis::Col) {
                continue;
            }

            info.limit_up = info.limit_up.min(row);
            info.limit_down = info.limit_down.max(row);
            info.limit_left = info.limit_left.min(col);
            info.limit_right = info.limit_right.max(col);
            info.pixels_capillary += 1;
            info.energy_capillary += u64::from(original.get_pixel(col, row)[0]);
            processed.put_pixel(col, row, Luma([WHITE]));

            if row > margin && valid(processed, row - 1, col) {
                queue.push_back((row - 1, col));
            }
            if row + margin < rows && valid(processed, row + 1, col) {
                queue.push_back((row + 1, col));
            }
            if col > margin && valid(processed, row, col - 1) {
                queue.push_back((row, col - 1));
            }
            if col + margin < cols && valid(processed, row, col + 1) {
                queue.push_back((row, col + 1));
            }
        }
    }

    /// Accumulate the four bands of `surrounding_pixels` around the bounding box.
    fn collect_surroundings(&self, processed: &GrayImage, info: &mut CapillaryInfo) {
        let (cols, rows) = processed.dimensions();
        let s = self.description.surrounding_pixels;
        let (up, down, left, right) = (
            info.limit_up,
            info.limit_down,
            info.limit_left,
            info.limit_right,
        );

        let bands = [
            (up.saturating_sub(s), up, left, right),
            (down, (down + s).min(rows), left, right),
            (up, down, left.saturating_sub(s), left),
            (up, down, right, (right + s).min(cols)),
        ];
        for (band_up, band_down, band_left, band_right) in bands {
            info.pixels_surroundings +=
                u64::from(band_down - band_up) * u64::from(band_right - band_left);
            for row in band_up..band_down {
                for col in band_left..band_right {
                    info.energy_surroundings += u64::from(processed.get_pixel(col, row)[0]);
                }
            }
        }
    }

    /// Sort by frame score, keep the best ones and set the layer scores.
    fn trim_and_score(&self, layer: &mut LayerInfo) {
        layer
            .capillaries
            .sort_by(|a, b| b.score.total_cmp(&a.score));
        layer.max_score = layer.capillaries.first().map(|c| c.score).unwrap_or(0.0);
        layer
            .capillaries
            .truncate(self.description.described_capillaries);
        layer.sum_score = layer.capillaries.iter().map(|c| c.score).sum();
    }
}
