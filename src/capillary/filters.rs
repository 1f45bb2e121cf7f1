//! Image filters used by capillary detection and description.

use crate::imaging::WHITE;
use image::{GrayImage, Luma};
use imageproc::filter::box_filter;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};

/// Side of the box used by the excess filter. Also the margin that region growing
/// keeps away from the layer border.
pub const DEEP_SMOOTHING_KERNEL_SIZE: u32 = 51;

/// Side of the neighbourhood averaged into an apex score.
pub const CORNER_DETECTION_KERNEL_SIZE: u32 = 3;

/// Absolute Sobel responses of a layer.
#[derive(Debug, Clone)]
pub struct SobelGradients {
    /// `|Gx|` clamped to 255
    pub gx: GrayImage,
    /// `|Gy|` clamped to 255
    pub gy: GrayImage,
    /// `sqrt(gx² + gy²)` clamped to 255
    pub magnitude: GrayImage,
}

/// Apply the 3x3 Sobel kernels. Border pixels see the nearest edge pixel repeated.
pub fn sobel(image: &GrayImage) -> SobelGradients {
    let horizontal = horizontal_sobel(image);
    let vertical = vertical_sobel(image);
    let (width, height) = image.dimensions();

    let mut gx = GrayImage::new(width, height);
    let mut gy = GrayImage::new(width, height);
    let mut magnitude = GrayImage::new(width, height);
    for (x, y, sx) in horizontal.enumerate_pixels() {
        let sx = i32::from(sx[0]);
        let sy = i32::from(vertical.get_pixel(x, y)[0]);
        let m = ((sx * sx + sy * sy) as f32).sqrt();
        gx.put_pixel(x, y, Luma([sx.unsigned_abs().min(255) as u8]));
        gy.put_pixel(x, y, Luma([sy.unsigned_abs().min(255) as u8]));
        magnitude.put_pixel(x, y, Luma([m.min(255.0) as u8]));
    }
    SobelGradients { gx, gy, magnitude }
}

/// Mean of every `kernel` x `kernel` neighbourhood, rounded to a gray level.
pub fn neighbourhood_means(image: &GrayImage, kernel: u32) -> GrayImage {
    let radius = kernel / 2;
    box_filter(image, radius, radius)
}

/// Excess high-pass filter.
///
/// Every pixel is compared with the mean of its `kernel` x `kernel` box:
/// `2 * (v / mean - 0.75)` clamped to `[0, 1]` and scaled to 255. Dark capillaries on a
/// bright background come out near 0. Pixels closer than `kernel / 2` to the border,
/// and pixels whose box mean is 0, are set to 0.
pub fn excess_filter(image: &GrayImage, kernel: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    let mut out = GrayImage::new(width, height);
    let half = kernel / 2;
    if width <= 2 * half || height <= 2 * half {
        return out;
    }

    let means = neighbourhood_means(image, kernel);
    for y in half..height - half {
        for x in half..width - half {
            let mean = f32::from(means.get_pixel(x, y)[0]);
            if mean == 0.0 {
                continue;
            }
            let value = f32::from(image.get_pixel(x, y)[0]);
            let excess = (2.0 * (value / mean - 0.75)).clamp(0.0, 1.0);
            out.put_pixel(x, y, Luma([(f32::from(WHITE) * excess).round() as u8]));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sobel_vertical_edge() {
        // dark left half, bright right half
        let image = GrayImage::from_fn(8, 8, |x, _| Luma([if x < 4 { 0 } else { 100 }]));
        let g = sobel(&image);
        assert_eq!(g.gx.get_pixel(4, 4)[0], 255);
        assert_eq!(g.gy.get_pixel(4, 4)[0], 0);
        assert_eq!(g.magnitude.get_pixel(4, 4)[0], 255);
        // flat regions, the border included, have no response
        assert_eq!(g.gx.get_pixel(1, 4)[0], 0);
        assert_eq!(g.gx.get_pixel(0, 4)[0], 0);
        assert_eq!(g.gx.get_pixel(7, 0)[0], 0);
    }

    #[test]
    fn test_neighbourhood_means() {
        let image = GrayImage::from_fn(4, 4, |x, y| Luma([(x + 4 * y) as u8 * 10]));
        let means = neighbourhood_means(&image, CORNER_DETECTION_KERNEL_SIZE);
        // (0 + 10 + 20 + 40 + 50 + 60 + 80 + 90 + 100) / 9
        assert_eq!(means.get_pixel(1, 1)[0], 50);
        let flat = neighbourhood_means(&GrayImage::from_pixel(5, 5, Luma([7])), 3);
        assert!(flat.pixels().all(|p| p[0] == 7));
    }

    #[test]
    fn test_excess_filter_flat_background() {
        let image = GrayImage::from_pixel(60, 60, Luma([100]));
        let out = excess_filter(&image, 51);
        // v / mean = 1 -> 2 * 0.25 = 0.5 -> 128
        assert_eq!(out.get_pixel(30, 30)[0], 128);
        // margin is zeroed
        assert_eq!(out.get_pixel(10, 30)[0], 0);
    }

    #[test]
    fn test_excess_filter_dark_spot_is_black() {
        let mut image = GrayImage::from_pixel(60, 60, Luma([200]));
        image.put_pixel(30, 30, Luma([20]));
        let out = excess_filter(&image, 51);
        assert_eq!(out.get_pixel(30, 30)[0], 0);
        // the box mean barely moves, so neighbours stay near mid-gray
        assert!((126..=132).contains(&out.get_pixel(31, 30)[0]));
    }
}
