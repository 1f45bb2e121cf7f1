//! Override key names and their translation to settings paths.
//!
//! Hosts address settings with dotted PascalCase keys such as
//! `HemoScope.Procedures.Focusing.Method`. The leading `HemoScope.` is optional.
//! Each segment maps onto the snake_case table or field of [`super::Settings`].

/// Folder with the map tiles and the scan-position CSV
pub const INPUT_MAP_FOLDER: &str = "HemoScope.Input.Map.Folder";
/// Folder with the Z list and the wide/line frames
pub const INPUT_LOCK_FOLDER: &str = "HemoScope.Input.Lock.Folder";
/// Folder receiving stitched layers and capillary reports
pub const OUTPUT_MAP_FOLDER: &str = "HemoScope.Output.Map.Folder";
/// Folder receiving depth and sequence results
pub const OUTPUT_LOCK_FOLDER: &str = "HemoScope.Output.Lock.Folder";
/// Scale of the stitched map
pub const PIXELS_IN_MM: &str = "HemoScope.General.PixelsInMm";
/// `Mode`, `Variance` or `Spectrum`
pub const FOCUSING_METHOD: &str = "HemoScope.Procedures.Focusing.Method";
/// Fit on even frames and evaluate on odd ones
pub const FOCUSING_HALF_SPLIT: &str = "HemoScope.Procedures.Focusing.HalfSplit";

/// Type a setting expects from an override.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// `true` or `false`
    Bool,
    /// Whole number, range-checked by the setting's own type
    Integer,
    /// Real number
    Float,
    /// Strings, paths and enum names
    Text,
}

/// Every key that maps onto a single setting, with the type it takes.
///
/// Anything else, including keys naming a whole table such as `HemoScope.General`,
/// is accepted by the override store and ignored.
pub const KNOWN_KEYS: &[(&str, ValueKind)] = &[
    (INPUT_MAP_FOLDER, ValueKind::Text),
    (INPUT_LOCK_FOLDER, ValueKind::Text),
    (OUTPUT_MAP_FOLDER, ValueKind::Text),
    (OUTPUT_LOCK_FOLDER, ValueKind::Text),
    (PIXELS_IN_MM, ValueKind::Integer),
    ("HemoScope.General.GrayLevel.Original.Min", ValueKind::Integer),
    ("HemoScope.General.GrayLevel.Original.Max", ValueKind::Integer),
    ("HemoScope.General.GrayLevel.Processed.Min", ValueKind::Integer),
    ("HemoScope.General.GrayLevel.Processed.Max", ValueKind::Integer),
    ("HemoScope.Procedures.Stitching.ScanPosFile", ValueKind::Text),
    ("HemoScope.Procedures.Stitching.MarkerCornerSize", ValueKind::Integer),
    ("HemoScope.Procedures.Stitching.Image.BiasPixels.X", ValueKind::Integer),
    ("HemoScope.Procedures.Stitching.Image.BiasPixels.Y", ValueKind::Integer),
    ("HemoScope.Procedures.Stitching.Image.MarginRelative.X", ValueKind::Float),
    ("HemoScope.Procedures.Stitching.Image.MarginRelative.Y", ValueKind::Float),
    ("HemoScope.Procedures.Stitching.Image.FrameRelative.Width", ValueKind::Float),
    ("HemoScope.Procedures.Stitching.Image.FrameRelative.Height", ValueKind::Float),
    ("HemoScope.Procedures.Detection.GradientThreshold", ValueKind::Integer),
    ("HemoScope.Procedures.Detection.MinDistancePixels", ValueKind::Integer),
    ("HemoScope.Procedures.Detection.CroppedRows", ValueKind::Integer),
    ("HemoScope.Procedures.Detection.MinFoundCapillaries", ValueKind::Integer),
    ("HemoScope.Procedures.Description.DescribedCapillaries", ValueKind::Integer),
    ("HemoScope.Procedures.Description.MinPixelsInCapillary", ValueKind::Integer),
    ("HemoScope.Procedures.Description.FrameWidth", ValueKind::Integer),
    ("HemoScope.Procedures.Description.FrameHeight", ValueKind::Integer),
    ("HemoScope.Procedures.Description.ScoreThreshold", ValueKind::Float),
    ("HemoScope.Procedures.Description.SurroundingPixels", ValueKind::Integer),
    ("HemoScope.Procedures.Description.AngleStepDegrees", ValueKind::Integer),
    ("HemoScope.Procedures.Description.SaveDebugImages", ValueKind::Bool),
    (FOCUSING_METHOD, ValueKind::Text),
    ("HemoScope.Procedures.Focusing.ZPosFile", ValueKind::Text),
    ("HemoScope.Procedures.Focusing.WidePrefix", ValueKind::Text),
    ("HemoScope.Procedures.Focusing.LinePrefix", ValueKind::Text),
    ("HemoScope.Procedures.Focusing.Extension", ValueKind::Text),
    (FOCUSING_HALF_SPLIT, ValueKind::Bool),
    ("HemoScope.Procedures.Sequence.LineThreshold", ValueKind::Integer),
    ("HemoScope.Logging.Level", ValueKind::Text),
    ("HemoScope.Logging.Format", ValueKind::Text),
];

const ROOT: &str = "HemoScope.";

/// Whether `key` addresses a setting, with or without the `HemoScope.` prefix.
pub fn is_known(key: &str) -> bool {
    kind_of(key).is_some()
}

/// Type expected by the setting `key` addresses, `None` for unknown keys and tables.
pub fn kind_of(key: &str) -> Option<ValueKind> {
    let path = key_to_path(key);
    KNOWN_KEYS
        .iter()
        .find(|(known, _)| key_to_path(known) == path)
        .map(|&(_, kind)| kind)
}

/// Translate an override key to the dotted snake_case path used by the settings tree.
///
/// `HemoScope.Procedures.Focusing.ZPosFile` becomes `procedures.focusing.z_pos_file`.
pub fn key_to_path(key: &str) -> String {
    let key = key.strip_prefix(ROOT).unwrap_or(key);
    key.split('.')
        .map(segment_to_snake_case)
        .collect::<Vec<_>>()
        .join(".")
}

fn segment_to_snake_case(segment: &str) -> String {
    let chars: Vec<char> = segment.chars().collect();
    let mut out = String::with_capacity(segment.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            if prev.is_ascii_lowercase()
                || prev.is_ascii_digit()
                || (prev.is_ascii_uppercase() && next_is_lower)
            {
                out.push('_');
            }
        }
        out.push(c.to_ascii_lowercase());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_pascal_case_segments() {
        assert_eq!(key_to_path(INPUT_MAP_FOLDER), "input.map.folder");
        assert_eq!(
            key_to_path("HemoScope.Procedures.Focusing.ZPosFile"),
            "procedures.focusing.z_pos_file"
        );
        assert_eq!(
            key_to_path("Procedures.Stitching.Image.BiasPixels.X"),
            "procedures.stitching.image.bias_pixels.x"
        );
        assert_eq!(key_to_path(PIXELS_IN_MM), "general.pixels_in_mm");
    }

    #[test]
    fn known_keys_accept_missing_root() {
        assert!(is_known("Procedures.Focusing.Method"));
        assert!(is_known(FOCUSING_METHOD));
        assert!(!is_known("HemoScope.Procedures.Focusing.Speed"));
    }

    #[test]
    fn tables_are_not_settings() {
        assert!(!is_known("HemoScope.General"));
        assert!(!is_known("Procedures.Stitching.Image"));
        assert_eq!(kind_of(PIXELS_IN_MM), Some(ValueKind::Integer));
        assert_eq!(kind_of(OUTPUT_MAP_FOLDER), Some(ValueKind::Text));
        assert_eq!(
            kind_of("Procedures.Description.ScoreThreshold"),
            Some(ValueKind::Float)
        );
    }
}
