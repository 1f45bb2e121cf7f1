//! Scan-position CSV and tile discovery.
//!
//! The map input folder holds one CSV with a header `X,Y,Z` (millimetres) and one
//! tile image per CSV row. Tiles are paired with rows in file-name order.

use crate::error::{EngineError, EngineResult};
use crate::imaging::is_image_file;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Stage position of one tile, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanPosition {
    /// Stage X
    #[serde(rename = "X")]
    pub x: f32,
    /// Stage Y
    #[serde(rename = "Y")]
    pub y: f32,
    /// Focus position
    #[serde(rename = "Z")]
    pub z: f32,
}

/// Read an `X,Y,Z` scan-position CSV with a header row.
pub fn read_scan_positions(path: &Path) -> EngineResult<Vec<ScanPosition>> {
    if !path.is_file() {
        return Err(EngineError::io(
            path,
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "scan-position file not found",
            ),
        ));
    }

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;

    let mut positions = Vec::new();
    for record in reader.deserialize() {
        let position: ScanPosition = record?;
        positions.push(position);
    }

    if positions.is_empty() {
        return Err(EngineError::malformed(format!(
            "{} contains no scan positions",
            path.display()
        )));
    }
    Ok(positions)
}

/// Image files in `folder`, sorted by file name. `exclude` (the CSV) is skipped.
pub fn list_tile_images(folder: &Path, exclude: &Path) -> EngineResult<Vec<PathBuf>> {
    let entries = fs::read_dir(folder).map_err(|e| EngineError::io(folder, e))?;

    let mut images = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| EngineError::io(folder, e))?.path();
        if path.is_file() && path != exclude && is_image_file(&path) {
            images.push(path);
        }
    }
    images.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(images)
}

/// Unique values in ascending order. The position of a value is its grid index.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisIndex {
    values: Vec<f32>,
}

impl AxisIndex {
    /// Sorted unique values.
    pub fn new(values: impl IntoIterator<Item = f32>) -> Self {
        let mut values: Vec<f32> = values.into_iter().collect();
        values.sort_by(|a, b| a.total_cmp(b));
        values.dedup();
        Self { values }
    }

    /// Grid index of `value`.
    pub fn index_of(&self, value: f32) -> Option<usize> {
        self.values
            .binary_search_by(|z| z.total_cmp(&value))
            .ok()
    }

    /// Number of distinct values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Smallest value, 0 when empty.
    pub fn first(&self) -> f32 {
        self.values.first().copied().unwrap_or_default()
    }

    /// Distance between the first two values, 0 for a single value.
    pub fn step(&self) -> f32 {
        match self.values.as_slice() {
            [a, b, ..] => b - a,
            _ => 0.0,
        }
    }

    /// Values in increasing order.
    pub fn values(&self) -> &[f32] {
        &self.values
    }
}
