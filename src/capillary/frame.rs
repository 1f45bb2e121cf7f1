//! Fit of the rotated field-of-view frame inside a marked capillary region.
//!
//! The frame is a `width` x `height` rectangle. Every rotation in steps of
//! `angle_step_degrees` over a half turn is tried at every candidate centre inside the
//! region's bounding box; the score of a placement is the percentage of frame pixels
//! that fall on marked (white) pixels. The placement with the highest score wins, the
//! first one found on ties.

use crate::imaging::WHITE;
use image::GrayImage;
use std::f32::consts::PI;

/// Bounding box of a region, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    /// First row
    pub up: u32,
    /// Last row
    pub down: u32,
    /// First column
    pub left: u32,
    /// Last column
    pub right: u32,
}

/// Best placement of the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameFit {
    /// Rotation in radians, in `[0, π)`
    pub angle: f32,
    /// Percentage of frame pixels on marked pixels
    pub score: f32,
    /// Centre as (col, row)
    pub center: (f32, f32),
    /// Corners as (col, row), in drawing order
    pub corners: [(f32, f32); 4],
}

/// Frame dimensions and search resolution.
#[derive(Debug, Clone, Copy)]
pub struct FrameSearch {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Rotation step of the search
    pub angle_step_degrees: u32,
}

impl FrameSearch {
    /// Distance between candidate centres.
    fn center_step(&self) -> u32 {
        (self.width.min(self.height) / 6).max(1)
    }

    /// Find the best-scoring placement of the frame over the marked pixels in `bounds`.
    ///
    /// Returns `None` when no candidate centre inside the bounds is marked.
    pub fn fit(&self, marked: &GrayImage, bounds: Bounds) -> Option<FrameFit> {
        let step = self.center_step() as usize;
        let angle_step = self.angle_step_degrees.max(1) as usize;
        let mut best: Option<FrameFit> = None;

        for degrees in (0..180).step_by(angle_step) {
            let angle = degrees as f32 / 180.0 * PI;
            for row in (bounds.up..=bounds.down).step_by(step) {
                for col in (bounds.left..=bounds.right).step_by(step) {
                    if marked.get_pixel(col, row)[0] != WHITE {
                        continue;
                    }
                    let center = (col as f32, row as f32);
                    let score = self.score(marked, center, angle);
                    if best.as_ref().map_or(true, |b| score > b.score) {
                        best = Some(FrameFit {
                            angle,
                            score,
                            center,
                            corners: self.corners(center, angle),
                        });
                    }
                }
            }
        }
        best
    }

    fn score(&self, marked: &GrayImage, center: (f32, f32), angle: f32) -> f32 {
        let (sin, cos) = angle.sin_cos();
        let (half_w, half_h) = (self.width as f32 / 2.0, self.height as f32 / 2.0);
        let (cols, rows) = marked.dimensions();

        let mut hits = 0u32;
        for v in 0..self.height {
            for u in 0..self.width {
                let (du, dv) = (u as f32 + 0.5 - half_w, v as f32 + 0.5 - half_h);
                let col = (center.0 + du * cos - dv * sin).round();
                let row = (center.1 + du * sin + dv * cos).round();
                if col < 0.0 || row < 0.0 || col >= cols as f32 || row >= rows as f32 {
                    continue;
                }
                if marked.get_pixel(col as u32, row as u32)[0] == WHITE {
                    hits += 1;
                }
            }
        }
        100.0 * hits as f32 / (self.width * self.height) as f32
    }

    fn corners(&self, center: (f32, f32), angle: f32) -> [(f32, f32); 4] {
        let (sin, cos) = angle.sin_cos();
        let (half_w, half_h) = (self.width as f32 / 2.0, self.height as f32 / 2.0);
        [(-half_w, -half_h), (half_w, -half_h), (half_w, half_h), (-half_w, half_h)].map(
            |(du, dv)| (center.0 + du * cos - dv * sin, center.1 + du * sin + dv * cos),
        )
    }
}

/// Draw the outline of `corners` onto `image` in white.
pub fn draw_frame(image: &mut GrayImage, corners: &[(f32, f32); 4]) {
    for i in 0..4 {
        draw_line(image, corners[i], corners[(i + 1) % 4]);
    }
}

fn draw_line(image: &mut GrayImage, from: (f32, f32), to: (f32, f32)) {
    let (width, height) = image.dimensions();
    let steps = (to.0 - from.0).abs().max((to.1 - from.1).abs()).ceil().max(1.0) as u32;
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        let col = (from.0 + (to.0 - from.0) * t).round();
        let row = (from.1 + (to.1 - from.1) * t).round();
        if col >= 0.0 && row >= 0.0 && (col as u32) < width && (row as u32) < height {
            image.put_pixel(col as u32, row as u32, image::Luma([WHITE]));
        }
    }
}
