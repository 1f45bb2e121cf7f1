//! Grayscale image I/O shared by the map, depth and sequence pipelines.
//!
//! Every image the engine touches is 8-bit grayscale. Inputs in other pixel formats
//! (RGB tiles, 16-bit frames) are converted to luma on load. Stitched layers are
//! written as TIFF, debug and spectrum images as BMP.

use crate::error::{EngineError, EngineResult};
use image::codecs::bmp::BmpEncoder;
use image::codecs::tiff::TiffEncoder;
use image::{ExtendedColorType, GrayImage, ImageEncoder};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// File extensions recognised as tile images.
pub const IMAGE_EXTENSIONS: &[&str] = &["tif", "tiff", "bmp", "png"];

/// Pure white in 8-bit grayscale.
pub const WHITE: u8 = 255;
/// Gray level of empty and masked pixels.
pub const BLACK: u8 = 0;

/// Read an image file and convert it to 8-bit grayscale.
pub fn read_gray(path: &Path) -> EngineResult<GrayImage> {
    if !path.is_file() {
        return Err(EngineError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "image file not found"),
        ));
    }
    let image = image::open(path).map_err(|e| EngineError::image(path, e))?;
    Ok(image.to_luma8())
}

/// Write an 8-bit grayscale TIFF.
pub fn write_tiff(image: &GrayImage, path: &Path) -> EngineResult<()> {
    let file = File::create(path).map_err(|e| EngineError::io(path, e))?;
    let writer = BufWriter::new(file);

    TiffEncoder::new(writer)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::L8,
        )
        .map_err(|e| EngineError::image(path, e))?;

    tracing::debug!(
        path = ?path,
        dimensions = format!("{}x{}", image.width(), image.height()),
        "Wrote 8-bit TIFF"
    );
    Ok(())
}

/// Write an 8-bit grayscale BMP.
pub fn write_bmp(image: &GrayImage, path: &Path) -> EngineResult<()> {
    let file = File::create(path).map_err(|e| EngineError::io(path, e))?;
    let mut writer = BufWriter::new(file);

    BmpEncoder::new(&mut writer)
        .write_image(
            image.as_raw(),
            image.width(),
            image.height(),
            ExtendedColorType::L8,
        )
        .map_err(|e| EngineError::image(path, e))?;

    tracing::debug!(
        path = ?path,
        dimensions = format!("{}x{}", image.width(), image.height()),
        "Wrote 8-bit BMP"
    );
    Ok(())
}

/// Create `parent/child` (and `parent`) when missing and return the joined path.
pub fn ensure_subfolder(parent: &Path, child: &str) -> EngineResult<PathBuf> {
    let folder = parent.join(child);
    fs::create_dir_all(&folder).map_err(|e| EngineError::io(&folder, e))?;
    Ok(folder)
}

/// Whether the file name carries one of [`IMAGE_EXTENSIONS`] (case-insensitive).
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| known.eq_ignore_ascii_case(e))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use tempfile::TempDir;

    fn gradient(width: u32, height: u32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| Luma([((x + y) % 256) as u8]))
    }

    #[test]
    fn test_tiff_roundtrip_preserves_pixels() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("layer.tif");
        let image = gradient(64, 48);

        write_tiff(&image, &path).unwrap();
        let loaded = read_gray(&path).unwrap();
        assert_eq!(loaded, image);
    }

    #[test]
    fn test_bmp_is_written() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("spectrum.bmp");
        write_bmp(&gradient(32, 32), &path).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 32 * 32);
    }

    #[test]
    fn test_missing_image_is_io_error() {
        let err = read_gray(Path::new("/no/such/tile.tif")).unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Io);
    }

    #[test]
    fn test_image_extensions() {
        assert!(is_image_file(Path::new("a/Tile001.TIF")));
        assert!(is_image_file(Path::new("Tile001.png")));
        assert!(!is_image_file(Path::new("ScanPositions.csv")));
        assert!(!is_image_file(Path::new("README")));
    }
}
