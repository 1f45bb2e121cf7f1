//! In-memory 3D map of stitched microscope tiles.
//!
//! A [`Map`] holds one stitched grayscale [`Layer`] per unique Z position of the scan,
//! plus the geometry needed to convert between stage millimetres and layer pixels.
//!
//! ```text
//!  col 0        frame_w      2*frame_w
//!   ┌────────────┬────────────┬────────────┐ row 0
//!   │ tile (0,0) │ tile (1,0) │ tile (2,0) │
//!   ├────────────┼────────────┼────────────┤ frame_h   <- seam row
//!   │ tile (0,1) │ tile (1,1) │ tile (2,1) │
//!   └────────────┴────────────┴────────────┘
//!                ^ seam col
//! ```
//!
//! Pixels within [`SEAM_HALF_WIDTH`] of a seam are ignored by detection and
//! description because tile borders produce false edges.

pub mod persist;
pub mod scan;
pub mod stitch;

use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Half width of the band around a seam that is treated as "on the seam".
pub const SEAM_HALF_WIDTH: u32 = 2;

/// One stitched layer at a single Z position.
#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    /// Stage Z of the layer
    pub z: f32,
    /// Stitched pixels
    pub image: GrayImage,
}

/// Direction of a seam line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    /// Horizontal seam
    Row,
    /// Vertical seam
    Col,
}

/// Stage and pixel geometry shared by all layers of a map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapGeometry {
    /// Map scale
    pub pixels_in_mm: u32,
    /// Stage position of pixel (0, 0)
    pub start_x_mm: f32,
    /// Stage Y of pixel row 0
    pub start_y_mm: f32,
    /// Stage distance between neighbouring tiles
    pub step_x_mm: f32,
    /// Stage Y distance between tile rows
    pub step_y_mm: f32,
    /// Size of the part of every tile that lands in the layer
    pub frame_width: u32,
    /// Rows each tile contributes
    pub frame_height: u32,
    /// Layer height in pixels
    pub rows: u32,
    /// Layer width in pixels
    pub cols: u32,
    /// Rows where vertically neighbouring tiles meet
    pub seam_rows: Vec<u32>,
    /// Columns where horizontally neighbouring tiles meet
    pub seam_cols: Vec<u32>,
}

/// Stitched layers sharing one geometry, ordered by Z.
#[derive(Debug, Clone, PartialEq)]
pub struct Map {
    geometry: MapGeometry,
    layers: Vec<Layer>,
}

impl Map {
    pub(crate) fn from_parts(geometry: MapGeometry, layers: Vec<Layer>) -> Self {
        Self { geometry, layers }
    }

    /// Geometry shared by the layers.
    pub fn geometry(&self) -> &MapGeometry {
        &self.geometry
    }

    /// Layers in increasing Z.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Layer at `index`.
    pub fn layer(&self, index: usize) -> Option<&Layer> {
        self.layers.get(index)
    }

    /// Layer height in pixels.
    pub fn rows(&self) -> u32 {
        self.geometry.rows
    }

    /// Layer width in pixels.
    pub fn cols(&self) -> u32 {
        self.geometry.cols
    }

    /// Stage X of the first column.
    pub fn start_x_mm(&self) -> f32 {
        self.geometry.start_x_mm
    }

    /// Stage Y of the first row.
    pub fn start_y_mm(&self) -> f32 {
        self.geometry.start_y_mm
    }

    /// Round a map-relative distance in millimetres to whole pixels.
    pub fn mm_to_pixels(&self, mm: f32) -> u32 {
        (self.geometry.pixels_in_mm as f32 * mm).round().max(0.0) as u32
    }

    /// Pixel count as a map-relative distance in millimetres.
    pub fn pixels_to_mm(&self, pixels: u32) -> f32 {
        pixels as f32 / self.geometry.pixels_in_mm as f32
    }

    /// Whether a row (or column) lies within [`SEAM_HALF_WIDTH`] of a tile seam.
    pub fn is_on_seam(&self, position: u32, axis: Axis) -> bool {
        let seams = match axis {
            Axis::Row => &self.geometry.seam_rows,
            Axis::Col => &self.geometry.seam_cols,
        };
        seams
            .iter()
            .any(|&seam| position.abs_diff(seam) <= SEAM_HALF_WIDTH)
    }

    /// Gray level at a stage position, truncated to the pixel and layer below it.
    ///
    /// Returns `None` outside the map or below the first layer.
    pub fn value_at(&self, x_mm: f32, y_mm: f32, z: f32) -> Option<u8> {
        let (col, row) = self.pixel_coordinates(x_mm, y_mm)?;
        let layer = self.layer_below(z)?;
        let image = &self.layers[layer].image;
        Some(image.get_pixel(col.floor() as u32, row.floor() as u32)[0])
    }

    /// Gray level at a stage position by trilinear interpolation between the
    /// neighbouring pixels of the two layers that bracket `z`.
    ///
    /// Above the last layer the last layer is used alone.
    pub fn interpolated_value_at(&self, x_mm: f32, y_mm: f32, z: f32) -> Option<f32> {
        let (col, row) = self.pixel_coordinates(x_mm, y_mm)?;
        let lower = self.layer_below(z)?;
        let upper = (lower + 1).min(self.layers.len() - 1);

        let tz = if upper == lower {
            0.0
        } else {
            let (z0, z1) = (self.layers[lower].z, self.layers[upper].z);
            (z - z0) / (z1 - z0)
        };

        let bilinear = |image: &GrayImage| {
            let (c0, r0) = (col.floor() as u32, row.floor() as u32);
            let c1 = (c0 + 1).min(self.geometry.cols - 1);
            let r1 = (r0 + 1).min(self.geometry.rows - 1);
            let (tx, ty) = (col - c0 as f32, row - r0 as f32);
            let v = |c: u32, r: u32| image.get_pixel(c, r)[0] as f32;
            let top = v(c0, r0) * (1.0 - tx) + v(c1, r0) * tx;
            let bottom = v(c0, r1) * (1.0 - tx) + v(c1, r1) * tx;
            top * (1.0 - ty) + bottom * ty
        };

        let v0 = bilinear(&self.layers[lower].image);
        let v1 = bilinear(&self.layers[upper].image);
        Some(v0 * (1.0 - tz) + v1 * tz)
    }

    fn pixel_coordinates(&self, x_mm: f32, y_mm: f32) -> Option<(f32, f32)> {
        let scale = self.geometry.pixels_in_mm as f32;
        let col = (x_mm - self.geometry.start_x_mm) * scale;
        let row = (y_mm - self.geometry.start_y_mm) * scale;
        let inside = col >= 0.0
            && row >= 0.0
            && col < self.geometry.cols as f32
            && row < self.geometry.rows as f32;
        inside.then_some((col, row))
    }

    fn layer_below(&self, z: f32) -> Option<usize> {
        self.layers.iter().rposition(|layer| layer.z <= z)
    }
}
