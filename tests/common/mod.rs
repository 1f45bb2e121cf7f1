//! Synthetic capture folders shared by the integration tests.

#![allow(dead_code)]

use hemoscope::imaging::write_tiff;
use hemoscope::Engine;
use image::{GrayImage, Luma};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const TILE_SIZE: u32 = 100;
pub const BACKGROUND: u8 = 220;
pub const CAPILLARY: u8 = 60;

/// Folder layout of one test session.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self, child: &str) -> PathBuf {
        self.dir.path().join(child)
    }

    /// Config pointing at `map_in`, `lock_in`, `map_out` and `lock_out`.
    pub fn write_config(&self, extra: &str) -> PathBuf {
        let path = self.path("hemoscope.toml");
        let contents = format!(
            r#"
[general]
pixels_in_mm = 100

[input.map]
folder = "{map_in}"

[input.lock]
folder = "{lock_in}"

[output.map]
folder = "{map_out}"

[output.lock]
folder = "{lock_out}"

[logging]
level = "debug"
format = "compact"
{extra}
"#,
            map_in = self.path("map_in").display(),
            lock_in = self.path("lock_in").display(),
            map_out = self.path("map_out").display(),
            lock_out = self.path("lock_out").display(),
        );
        fs::write(&path, contents).unwrap();
        path
    }

    /// Engine with the config loaded and general data initialised.
    pub fn engine(&self) -> Engine {
        let config = self.write_config("");
        let mut engine = Engine::new();
        engine.load_config(&config).unwrap();
        engine.init_general_data().unwrap();
        engine
    }
}

/// Tile with a dark 20x20 square at (40, 40), or a flat tile.
pub fn tile(with_square: bool) -> GrayImage {
    GrayImage::from_fn(TILE_SIZE, TILE_SIZE, |x, y| {
        let inside = (40..60).contains(&x) && (40..60).contains(&y);
        Luma([if with_square && inside {
            CAPILLARY
        } else {
            BACKGROUND
        }])
    })
}

/// 2x2 tiles on each of two Z positions (0.0 and 0.1 mm), stage origin (1.0, 2.0) mm.
pub fn write_map_input(folder: &Path, with_squares: bool) {
    fs::create_dir_all(folder).unwrap();
    let mut csv = String::from("X,Y,Z\n");
    let mut index = 0;
    for z in [0.0, 0.1] {
        for y in [2.0, 3.0] {
            for x in [1.0, 2.0] {
                csv.push_str(&format!("{x},{y},{z}\n"));
                let path = folder.join(format!("Tile{index:03}.tif"));
                write_tiff(&tile(with_squares), &path).unwrap();
                index += 1;
            }
        }
    }
    fs::write(folder.join("ScanPositions.csv"), csv).unwrap();
}

/// Z list plus `Bright{i:04}.tif` and `Line{i:04}.tif` frames.
///
/// Frame `i` has its centre at gray level `40 + 20 * i` and a line on row `10 + i`.
pub fn write_lock_input(folder: &Path, frames: usize) {
    fs::create_dir_all(folder).unwrap();
    let positions: Vec<String> = (0..frames).map(|i| format!("{}", 0.05 * i as f32)).collect();
    fs::write(folder.join("PositionsZ.txt"), positions.join("\n") + "\n").unwrap();

    for i in 0..frames {
        let level = 40 + 20 * i as u8;
        let wide = GrayImage::from_fn(60, 60, |x, y| {
            if (20..40).contains(&x) && (20..40).contains(&y) {
                Luma([level])
            } else {
                Luma([((x + y) % 7) as u8 * 30])
            }
        });
        let line_row = 10 + i as u32;
        let line = GrayImage::from_fn(60, 60, |_, y| Luma([if y == line_row { 250 } else { 10 }]));
        write_tiff(&wide, &folder.join(format!("Bright{i:04}.tif"))).unwrap();
        write_tiff(&line, &folder.join(format!("Line{i:04}.tif"))).unwrap();
    }
}

/// Z list plus wide frames of a textured target that is in focus at `sharp`.
///
/// The target is a fixed pattern of dark spots on a bright field. Frame `i` is that
/// pattern averaged over a horizontal window of `2 * |i - sharp| + 1` pixels.
pub fn write_focus_stack(folder: &Path, frames: u32, sharp: u32) {
    const SIZE: u32 = 60;
    fs::create_dir_all(folder).unwrap();
    let positions: Vec<String> = (0..frames).map(|i| format!("{}", 0.01 * i as f32)).collect();
    fs::write(folder.join("PositionsZ.txt"), positions.join("\n") + "\n").unwrap();

    let target = |x: u32, y: u32| -> u32 {
        if (3 * x * x + 5 * y * y + 2 * x * y + x) % 11 < 4 {
            40
        } else {
            200
        }
    };
    for i in 0..frames {
        let defocus = i.abs_diff(sharp);
        let window = 2 * defocus + 1;
        let wide = GrayImage::from_fn(SIZE, SIZE, |x, y| {
            let sum: u32 = (0..window).map(|k| target(x + SIZE - defocus + k, y)).sum();
            Luma([(sum / window) as u8])
        });
        write_tiff(&wide, &folder.join(format!("Bright{i:04}.tif"))).unwrap();
    }
}
