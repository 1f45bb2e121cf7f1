//! Saving and reloading stitched maps.
//!
//! A saved map lives in `Stitched/` under the map output folder:
//!
//! - `Layer{n}.tif`: one 8-bit TIFF per layer, `n` counting from 1
//! - `map.json`: geometry and layer Z positions
//! - a copy of the scan-position CSV the map was built from
//! - `Layer{n}Corners.tif`: the layer with detected apexes marked, once detection ran
//!
//! [`Map::load`] reads the TIFF layers and the manifest back into an equal map.

use super::{Layer, Map, MapGeometry};
use crate::capillary::LayerInfo;
use crate::error::{EngineError, EngineResult};
use crate::imaging::{ensure_subfolder, read_gray, write_tiff, WHITE};
use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Subfolder of the map output folder holding saved layers.
pub const STITCHED_FOLDER: &str = "Stitched";
/// Geometry and layer list of a saved map.
pub const MANIFEST_FILE: &str = "map.json";

/// On-disk description of a saved map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapManifest {
    /// Manifest format version
    pub version: u32,
    /// When the map was saved
    pub saved_at: chrono::DateTime<chrono::Utc>,
    /// Geometry of the saved map
    pub geometry: MapGeometry,
    /// Saved layers in increasing Z
    pub layers: Vec<LayerEntry>,
}

/// One saved layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerEntry {
    /// Stage Z
    pub z: f32,
    /// TIFF file name inside the stitched folder
    pub file: String,
}

const MANIFEST_VERSION: u32 = 1;

impl Map {
    /// Write the map into `output_folder/Stitched`.
    ///
    /// `detected` adds a marked copy of every layer with apexes; `scan_positions` is
    /// copied next to the layers when given.
    pub fn save(
        &self,
        output_folder: &Path,
        detected: &[LayerInfo],
        marker_size: u32,
        scan_positions: Option<&Path>,
    ) -> EngineResult<PathBuf> {
        let folder = ensure_subfolder(output_folder, STITCHED_FOLDER)?;

        let mut entries = Vec::with_capacity(self.layers.len());
        for (index, layer) in self.layers.iter().enumerate() {
            let file = format!("Layer{}.tif", index + 1);
            write_tiff(&layer.image, &folder.join(&file))?;
            entries.push(LayerEntry { z: layer.z, file });
        }

        for info in detected.iter().filter(|info| !info.apexes.is_empty()) {
            let Some(layer) = self.layers.get(info.layer_index) else {
                continue;
            };
            let mut marked = layer.image.clone();
            for apex in &info.apexes {
                mark_corner(
                    &mut marked,
                    self.mm_to_pixels(apex.x_mm),
                    self.mm_to_pixels(apex.y_mm),
                    marker_size,
                );
            }
            let file = format!("Layer{}Corners.tif", info.layer_index + 1);
            write_tiff(&marked, &folder.join(file))?;
        }

        let manifest = MapManifest {
            version: MANIFEST_VERSION,
            saved_at: chrono::Utc::now(),
            geometry: self.geometry.clone(),
            layers: entries,
        };
        let manifest_path = folder.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| EngineError::malformed(format!("cannot encode map manifest: {e}")))?;
        fs::write(&manifest_path, json).map_err(|e| EngineError::io(&manifest_path, e))?;

        if let Some(source) = scan_positions {
            if let Some(name) = source.file_name() {
                let target = folder.join(name);
                fs::copy(source, &target).map_err(|e| EngineError::io(source, e))?;
            }
        }

        info!(
            folder = %folder.display(),
            layers = self.layers.len(),
            "Stitched map saved"
        );
        Ok(folder)
    }

    /// Load a map saved by [`Map::save`] from `output_folder/Stitched`.
    pub fn load(output_folder: &Path) -> EngineResult<Map> {
        let folder = output_folder.join(STITCHED_FOLDER);
        let manifest_path = folder.join(MANIFEST_FILE);
        let json = fs::read_to_string(&manifest_path)
            .map_err(|e| EngineError::io(&manifest_path, e))?;
        let manifest: MapManifest = serde_json::from_str(&json).map_err(|e| {
            EngineError::malformed(format!("{}: {e}", manifest_path.display()))
        })?;

        if manifest.version != MANIFEST_VERSION {
            return Err(EngineError::malformed(format!(
                "unsupported map manifest version {}",
                manifest.version
            )));
        }

        let geometry = manifest.geometry;
        let mut layers = Vec::with_capacity(manifest.layers.len());
        for entry in manifest.layers {
            let path = folder.join(&entry.file);
            let image = read_gray(&path)?;
            if image.width() != geometry.cols || image.height() != geometry.rows {
                return Err(EngineError::malformed(format!(
                    "{} is {}x{}, manifest says {}x{}",
                    path.display(),
                    image.width(),
                    image.height(),
                    geometry.cols,
                    geometry.rows
                )));
            }
            layers.push(Layer { z: entry.z, image });
        }

        Ok(Map::from_parts(geometry, layers))
    }
}

/// Draw a white cross of half size `size` centred at (col, row).
fn mark_corner(image: &mut GrayImage, col: u32, row: u32, size: u32) {
    let (width, height) = image.dimensions();
    if col >= width || row >= height {
        return;
    }
    for c in col.saturating_sub(size)..=(col + size).min(width - 1) {
        image.put_pixel(c, row, Luma([WHITE]));
    }
    for r in row.saturating_sub(size)..=(row + size).min(height - 1) {
        image.put_pixel(col, r, Luma([WHITE]));
    }
}
