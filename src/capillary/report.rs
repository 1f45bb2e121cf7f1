//! CSV and text reports of detection and description.

use super::{CapillaryInfo, LayerInfo, ScoredCorner};
use crate::error::{EngineError, EngineResult};
use crate::map::Map;
use std::fs;
use std::path::Path;

/// `Layer,Corners,Max score,Sum score` per layer. `count` picks the second column.
pub fn write_all_layers(
    path: &Path,
    layers: &[LayerInfo],
    count: impl Fn(&LayerInfo) -> usize,
) -> EngineResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["Layer", "Corners", "Max score", "Sum score"])?;
    for layer in layers {
        writer.write_record([
            (layer.layer_index + 1).to_string(),
            count(layer).to_string(),
            format!("{:.1}", layer.max_score),
            format!("{:.1}", layer.sum_score),
        ])?;
    }
    writer.flush().map_err(|e| EngineError::io(path, e))?;
    Ok(())
}

/// Same as [`write_all_layers`] but headed `Frames` and counting described capillaries.
pub fn write_described_layers(path: &Path, layers: &[LayerInfo]) -> EngineResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["Layer", "Frames", "Max score", "Sum score"])?;
    for layer in layers {
        writer.write_record([
            (layer.layer_index + 1).to_string(),
            layer.capillaries.len().to_string(),
            format!("{:.1}", layer.max_score),
            format!("{:.1}", layer.sum_score),
        ])?;
    }
    writer.flush().map_err(|e| EngineError::io(path, e))?;
    Ok(())
}

/// Detected apexes of one layer, in pixels and map millimetres.
pub fn write_layer_corners(path: &Path, map: &Map, apexes: &[ScoredCorner]) -> EngineResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["Num", "x (col)", "y (row)", "Score", "Gray level"])?;
    for (index, apex) in apexes.iter().enumerate() {
        writer.write_record([
            (index + 1).to_string(),
            position(apex.x_mm, map.start_x_mm(), map.mm_to_pixels(apex.x_mm)),
            position(apex.y_mm, map.start_y_mm(), map.mm_to_pixels(apex.y_mm)),
            format!("{:.1}", apex.score),
            apex.gray_level.to_string(),
        ])?;
    }
    writer.flush().map_err(|e| EngineError::io(path, e))?;
    Ok(())
}

/// `Layer{n}/Data.csv`: the kept capillaries of a described layer.
pub fn write_capillary_data(
    path: &Path,
    map: &Map,
    capillaries: &[CapillaryInfo],
) -> EngineResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "Num",
        "x (col)",
        "y (row)",
        "z",
        "Angle rad",
        "Contrast",
        "Score",
    ])?;
    for capillary in capillaries {
        let apex = &capillary.apex;
        writer.write_record([
            (capillary.index + 1).to_string(),
            position(apex.x_mm, map.start_x_mm(), map.mm_to_pixels(apex.x_mm)),
            position(apex.y_mm, map.start_y_mm(), map.mm_to_pixels(apex.y_mm)),
            format!("{:.4}", apex.z),
            format!("{:.2}", capillary.angle),
            capillary.contrast().to_string(),
            format!("{:.2}", capillary.score),
        ])?;
    }
    writer.flush().map_err(|e| EngineError::io(path, e))?;
    Ok(())
}

/// `Summary.txt` naming the best layer (1-based).
pub fn write_summary(path: &Path, best_layer: Option<usize>) -> EngineResult<()> {
    let line = match best_layer {
        Some(index) => format!("Best layer: {}\n", index + 1),
        None => "Best layer: none\n".to_string(),
    };
    fs::write(path, line).map_err(|e| EngineError::io(path, e))
}

/// Stage position with the pixel it maps to, e.g. `12.3456 (1234)`.
fn position(relative_mm: f32, start_mm: f32, pixels: u32) -> String {
    format!("{:.4} ({})", relative_mm + start_mm, pixels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::tests::sample_map;
    use tempfile::TempDir;

    #[test]
    fn test_all_layers_csv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("AllLayers.csv");
        let apex = ScoredCorner {
            x_mm: 0.5,
            y_mm: 0.5,
            z: 0.0,
            score: 12.3,
            gray_level: 40,
        };
        let layers = vec![LayerInfo::detected(0, 0.0, vec![apex, apex])];
        write_all_layers(&path, &layers, |l| l.apexes.len()).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "Layer,Corners,Max score,Sum score\n1,2,12.3,24.6\n");
    }

    #[test]
    fn test_capillary_data_adds_stage_origin() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Data.csv");
        let map = sample_map();
        let mut info = CapillaryInfo::new(
            2,
            ScoredCorner {
                x_mm: 1.5,
                y_mm: 0.5,
                z: 1.0,
                score: 3.0,
                gray_level: 40,
            },
        );
        info.angle = 1.5708;
        info.score = 87.5;
        write_capillary_data(&path, &map, &[info]).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next(),
            Some("Num,x (col),y (row),z,Angle rad,Contrast,Score")
        );
        assert_eq!(
            lines.next(),
            Some("3,2.5000 (15),2.5000 (5),1.0000,1.57,0,87.50")
        );
    }

    #[test]
    fn test_summary() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Summary.txt");
        write_summary(&path, Some(2)).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "Best layer: 3\n");
    }
}
