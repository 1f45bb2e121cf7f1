//! Small validation helpers used by [`crate::config::Settings::validate`].
use std::ops::RangeInclusive;

/// Validates if a given value is within a specified numeric range.
///
/// # Arguments
///
/// * `value` - The value to validate.
/// * `range` - The inclusive range to validate against.
///
/// # Returns
///
/// * `Ok(())` if the value is within the range.
/// * `Err(&'static str)` if the value is outside the range.
pub fn is_in_range<T: PartialOrd>(value: T, range: RangeInclusive<T>) -> Result<(), &'static str> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err("Value is outside the specified range")
    }
}

/// Validates that a value is strictly greater than zero.
pub fn is_positive<T: PartialOrd + Default>(value: T) -> Result<(), &'static str> {
    if value > T::default() {
        Ok(())
    } else {
        Err("Value must be greater than zero")
    }
}

/// Validates that a `[min, max]` window is ordered.
pub fn is_ordered_window<T: PartialOrd>(min: T, max: T) -> Result<(), &'static str> {
    if min <= max {
        Ok(())
    } else {
        Err("Window minimum must not exceed its maximum")
    }
}

/// Validates if a given string can be used as a plain file name inside a folder.
///
/// # Arguments
///
/// * `name` - The string to validate.
///
/// # Returns
///
/// * `Ok(())` if the name is non-empty, has no path separators and no null bytes.
/// * `Err(&'static str)` otherwise.
pub fn is_valid_file_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("File name cannot be empty");
    }
    if name.contains('\0') {
        return Err("File name cannot contain null bytes");
    }
    if name.contains('/') || name.contains('\\') {
        return Err("File name cannot contain path separators");
    }
    Ok(())
}

/// Validates if a given string is not empty.
pub fn is_not_empty(value: &str) -> Result<(), &'static str> {
    if !value.is_empty() {
        Ok(())
    } else {
        Err("Value cannot be empty")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_is_inclusive() {
        assert!(is_in_range(0.0, 0.0..=1.0).is_ok());
        assert!(is_in_range(1.0, 0.0..=1.0).is_ok());
        assert!(is_in_range(1.01, 0.0..=1.0).is_err());
    }

    #[test]
    fn positive_rejects_zero() {
        assert!(is_positive(1u32).is_ok());
        assert!(is_positive(0u32).is_err());
        assert!(is_positive(-0.5f32).is_err());
    }

    #[test]
    fn window_must_be_ordered() {
        assert!(is_ordered_window(30u8, 90u8).is_ok());
        assert!(is_ordered_window(90u8, 90u8).is_ok());
        assert!(is_ordered_window(91u8, 90u8).is_err());
    }

    #[test]
    fn file_name_rejects_separators() {
        assert!(is_valid_file_name("ScanPositions.csv").is_ok());
        assert!(is_valid_file_name("").is_err());
        assert!(is_valid_file_name("../ScanPositions.csv").is_err());
        assert!(is_valid_file_name("a\\b.csv").is_err());
    }
}
