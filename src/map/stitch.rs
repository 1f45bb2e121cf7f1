//! Build a [`Map`] from a folder of scan tiles.

use super::scan::{list_tile_images, read_scan_positions, AxisIndex, ScanPosition};
use super::{Layer, Map, MapGeometry};
use crate::cancel::CancelFlag;
use crate::config::{Settings, TileImageSettings};
use crate::error::{EngineError, EngineResult};
use crate::imaging::read_gray;
use image::{imageops, GrayImage};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

const OPERATION: &str = "build_map";

/// Region of a tile that is copied into the layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileFrame {
    /// First column kept
    pub x: u32,
    /// First row kept
    pub y: u32,
    /// Columns kept
    pub width: u32,
    /// Rows kept
    pub height: u32,
}

impl TileFrame {
    /// Frame of a `width` x `height` tile under the configured margins and bias.
    pub fn for_tile(width: u32, height: u32, image: &TileImageSettings) -> EngineResult<Self> {
        let out_of_range = || {
            EngineError::malformed(format!(
                "tile frame with bias ({}, {}) does not fit a {}x{} image",
                image.bias_pixels.x, image.bias_pixels.y, width, height
            ))
        };
        let frame = Self {
            x: ((width as f32 * image.margin_relative.x).round() as u32)
                .checked_add(image.bias_pixels.x)
                .ok_or_else(out_of_range)?,
            y: ((height as f32 * image.margin_relative.y).round() as u32)
                .checked_add(image.bias_pixels.y)
                .ok_or_else(out_of_range)?,
            width: (width as f32 * image.frame_relative.width).round() as u32,
            height: (height as f32 * image.frame_relative.height).round() as u32,
        };

        if frame.width == 0 || frame.height == 0 {
            return Err(EngineError::malformed(format!(
                "tile frame of a {}x{} image is empty",
                width, height
            )));
        }
        let right = frame.x.checked_add(frame.width).ok_or_else(out_of_range)?;
        let bottom = frame.y.checked_add(frame.height).ok_or_else(out_of_range)?;
        if right > width || bottom > height {
            return Err(EngineError::malformed(format!(
                "tile frame {}x{} at ({}, {}) does not fit a {}x{} image",
                frame.width, frame.height, frame.x, frame.y, width, height
            )));
        }
        Ok(frame)
    }
}

/// Stitch the tiles of `folder` into one layer per unique Z position.
///
/// The folder must contain the scan-position CSV named in the settings and exactly one
/// image per CSV row. Grid positions missing from the scan leave black gaps.
pub fn build_map(folder: &Path, settings: &Settings, cancel: &CancelFlag) -> EngineResult<Map> {
    let started = Instant::now();
    let stitching = &settings.procedures.stitching;
    info!(folder = %folder.display(), "Stitching of map started");

    if !folder.is_dir() {
        return Err(EngineError::io(
            folder,
            std::io::Error::new(std::io::ErrorKind::NotFound, "map input folder not found"),
        ));
    }

    let csv_path = folder.join(&stitching.scan_pos_file);
    let positions = read_scan_positions(&csv_path)?;
    let tiles = list_tile_images(folder, &csv_path)?;
    if tiles.len() != positions.len() {
        return Err(EngineError::malformed(format!(
            "{} scan positions but {} images in {}",
            positions.len(),
            tiles.len(),
            folder.display()
        )));
    }

    let xs = AxisIndex::new(positions.iter().map(|p| p.x));
    let ys = AxisIndex::new(positions.iter().map(|p| p.y));
    let zs = AxisIndex::new(positions.iter().map(|p| p.z));

    let mut stitcher: Option<Stitcher> = None;
    for (index, (position, tile_path)) in positions.iter().zip(&tiles).enumerate() {
        cancel.check(OPERATION)?;

        let tile = read_gray(tile_path)?;
        if stitcher.is_none() {
            stitcher = Some(Stitcher::new(
                tile.width(),
                tile.height(),
                &stitching.image,
                &xs,
                &ys,
                &zs,
            )?);
        }
        if let Some(stitcher) = stitcher.as_mut() {
            stitcher.place(&tile, position, &xs, &ys, &zs)?;
        }
        debug!(
            tile = index + 1,
            file = %tile_path.display(),
            x = position.x,
            y = position.y,
            z = position.z,
            "Tile stitched"
        );
    }

    let stitcher = stitcher.ok_or_else(|| {
        EngineError::malformed(format!("no tiles found in {}", folder.display()))
    })?;

    let expected = xs.len() * ys.len();
    for (layer_index, placed) in stitcher.placed.iter().enumerate() {
        if *placed < expected {
            warn!(
                layer = layer_index + 1,
                placed,
                expected,
                "Layer has missing tiles; gaps are left black"
            );
        }
    }

    let geometry = MapGeometry {
        pixels_in_mm: settings.general.pixels_in_mm,
        start_x_mm: xs.first(),
        start_y_mm: ys.first(),
        step_x_mm: xs.step(),
        step_y_mm: ys.step(),
        frame_width: stitcher.frame.width,
        frame_height: stitcher.frame.height,
        rows: stitcher.frame.height * ys.len() as u32,
        cols: stitcher.frame.width * xs.len() as u32,
        seam_rows: (1..ys.len() as u32)
            .map(|i| i * stitcher.frame.height)
            .collect(),
        seam_cols: (1..xs.len() as u32)
            .map(|i| i * stitcher.frame.width)
            .collect(),
    };
    let layers = zs
        .values()
        .iter()
        .zip(stitcher.layers)
        .map(|(&z, image)| Layer { z, image })
        .collect::<Vec<_>>();

    info!(
        layers = layers.len(),
        rows = geometry.rows,
        cols = geometry.cols,
        tiles = tiles.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Stitching of map completed"
    );
    Ok(Map::from_parts(geometry, layers))
}

struct Stitcher {
    tile_width: u32,
    tile_height: u32,
    frame: TileFrame,
    layers: Vec<GrayImage>,
    placed: Vec<usize>,
}

impl Stitcher {
    fn new(
        tile_width: u32,
        tile_height: u32,
        image: &TileImageSettings,
        xs: &AxisIndex,
        ys: &AxisIndex,
        zs: &AxisIndex,
    ) -> EngineResult<Self> {
        let frame = TileFrame::for_tile(tile_width, tile_height, image)?;
        let cols = frame.width * xs.len() as u32;
        let rows = frame.height * ys.len() as u32;
        Ok(Self {
            tile_width,
            tile_height,
            frame,
            layers: vec![GrayImage::new(cols, rows); zs.len()],
            placed: vec![0; zs.len()],
        })
    }

    fn place(
        &mut self,
        tile: &GrayImage,
        position: &ScanPosition,
        xs: &AxisIndex,
        ys: &AxisIndex,
        zs: &AxisIndex,
    ) -> EngineResult<()> {
        if tile.width() != self.tile_width || tile.height() != self.tile_height {
            return Err(EngineError::malformed(format!(
                "tile at ({}, {}, {}) is {}x{}, expected {}x{}",
                position.x,
                position.y,
                position.z,
                tile.width(),
                tile.height(),
                self.tile_width,
                self.tile_height
            )));
        }

        // Every position comes from the same CSV the indexes were built from
        let (ix, iy, iz) = match (
            xs.index_of(position.x),
            ys.index_of(position.y),
            zs.index_of(position.z),
        ) {
            (Some(ix), Some(iy), Some(iz)) => (ix as u32, iy as u32, iz),
            _ => {
                return Err(EngineError::malformed(format!(
                    "scan position ({}, {}, {}) is not on the grid",
                    position.x, position.y, position.z
                )))
            }
        };

        let frame = imageops::crop_imm(
            tile,
            self.frame.x,
            self.frame.y,
            self.frame.width,
            self.frame.height,
        )
        .to_image();
        imageops::replace(
            &mut self.layers[iz],
            &frame,
            i64::from(ix * self.frame.width),
            i64::from(iy * self.frame.height),
        );
        self.placed[iz] += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AxisPair, FrameRelative};

    #[test]
    fn test_tile_frame_from_relative_settings() {
        let image = TileImageSettings {
            bias_pixels: AxisPair { x: 2, y: 0 },
            margin_relative: AxisPair { x: 0.1, y: 0.25 },
            frame_relative: FrameRelative {
                width: 0.5,
                height: 0.5,
            },
        };
        let frame = TileFrame::for_tile(100, 40, &image).unwrap();
        assert_eq!(
            frame,
            TileFrame {
                x: 12,
                y: 10,
                width: 50,
                height: 20
            }
        );
    }

    #[test]
    fn test_tile_frame_outside_image_is_rejected() {
        let image = TileImageSettings {
            bias_pixels: AxisPair { x: 10, y: 0 },
            margin_relative: AxisPair { x: 0.0, y: 0.0 },
            frame_relative: FrameRelative {
                width: 1.0,
                height: 1.0,
            },
        };
        assert!(TileFrame::for_tile(100, 40, &image).is_err());
    }

    #[test]
    fn test_huge_bias_is_malformed_not_overflow() {
        let image = TileImageSettings {
            bias_pixels: AxisPair {
                x: u32::MAX,
                y: u32::MAX - 5,
            },
            margin_relative: AxisPair { x: 0.1, y: 0.0 },
            frame_relative: FrameRelative {
                width: 0.5,
                height: 0.5,
            },
        };
        let err = TileFrame::for_tile(100, 40, &image).unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::MalformedInput);

        // fits the bias itself, overflows once the frame height is added
        let image = TileImageSettings {
            bias_pixels: AxisPair { x: 0, y: u32::MAX - 5 },
            ..image
        };
        let err = TileFrame::for_tile(100, 40, &image).unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::MalformedInput);
    }
}
