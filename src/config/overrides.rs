//! Session-scoped configuration overrides.
//!
//! Overrides are typed key/value pairs set by the host between engine operations.
//! They are applied on top of the configuration file in the order they were last set,
//! and live for the lifetime of the engine. There is no removal.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

use super::keys::{self, ValueKind};

/// A single override value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OverrideValue {
    /// Flag value
    Bool(bool),
    /// Whole number
    Int(i64),
    /// Real number
    Float(f64),
    /// Text, paths and method names
    Str(String),
}

impl fmt::Display for OverrideValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideValue::Bool(v) => write!(f, "{}", v),
            OverrideValue::Int(v) => write!(f, "{}", v),
            OverrideValue::Float(v) => write!(f, "{}", v),
            OverrideValue::Str(v) => write!(f, "\"{}\"", v),
        }
    }
}

impl OverrideValue {
    /// Parse a command-line value: `true`/`false`, integer, float, then plain string.
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("true") || raw.eq_ignore_ascii_case("false") {
            OverrideValue::Bool(raw.eq_ignore_ascii_case("true"))
        } else if let Ok(v) = raw.parse::<i64>() {
            OverrideValue::Int(v)
        } else if let Ok(v) = raw.parse::<f64>() {
            OverrideValue::Float(v)
        } else {
            OverrideValue::Str(raw.to_string())
        }
    }

    /// Convert the value to the type its setting expects, where that is lossless.
    ///
    /// Numbers become text for string settings (a folder named `2024`), whole floats
    /// become integers, integers become floats and `"true"`/`"false"` become flags.
    /// Anything else is returned unchanged and fails when the settings are extracted.
    pub fn coerce(&self, kind: ValueKind) -> OverrideValue {
        match (kind, self) {
            (ValueKind::Text, OverrideValue::Bool(v)) => OverrideValue::Str(v.to_string()),
            (ValueKind::Text, OverrideValue::Int(v)) => OverrideValue::Str(v.to_string()),
            (ValueKind::Text, OverrideValue::Float(v)) => OverrideValue::Str(v.to_string()),
            (ValueKind::Integer, OverrideValue::Float(v))
                if v.fract() == 0.0 && v.abs() < i64::MAX as f64 =>
            {
                OverrideValue::Int(*v as i64)
            }
            (ValueKind::Integer, OverrideValue::Str(s)) => match s.trim().parse::<f64>() {
                Ok(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => {
                    OverrideValue::Int(v as i64)
                }
                _ => self.clone(),
            },
            (ValueKind::Float, OverrideValue::Int(v)) => OverrideValue::Float(*v as f64),
            (ValueKind::Float, OverrideValue::Str(s)) => match s.trim().parse::<f64>() {
                Ok(v) => OverrideValue::Float(v),
                Err(_) => self.clone(),
            },
            (ValueKind::Bool, OverrideValue::Str(s)) if s.eq_ignore_ascii_case("true") => {
                OverrideValue::Bool(true)
            }
            (ValueKind::Bool, OverrideValue::Str(s)) if s.eq_ignore_ascii_case("false") => {
                OverrideValue::Bool(false)
            }
            _ => self.clone(),
        }
    }
}

/// Ordered set of overrides, one entry per key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverrideStore {
    entries: Vec<(String, OverrideValue)>,
}

impl OverrideStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`, replacing any earlier value for the same key.
    ///
    /// The entry moves to the end so that it is applied last.
    pub fn set(&mut self, key: impl Into<String>, value: OverrideValue) {
        let key = key.into();
        if !keys::is_known(&key) {
            debug!(key = %key, "Override for unknown key or table is stored but ignored");
        }
        self.entries.retain(|(existing, _)| existing != &key);
        self.entries.push((key, value));
    }

    /// Set a flag.
    pub fn set_bool(&mut self, key: impl Into<String>, value: bool) {
        self.set(key, OverrideValue::Bool(value));
    }

    /// Set a whole number.
    pub fn set_int(&mut self, key: impl Into<String>, value: i64) {
        self.set(key, OverrideValue::Int(value));
    }

    /// Set a real number.
    pub fn set_float(&mut self, key: impl Into<String>, value: f64) {
        self.set(key, OverrideValue::Float(value));
    }

    /// Set a text value.
    pub fn set_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.set(key, OverrideValue::Str(value.into()));
    }

    /// Value last set for `key`, exactly as given.
    pub fn get(&self, key: &str) -> Option<&OverrideValue> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value)
    }

    /// Entries in application order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OverrideValue)> {
        self.entries.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been overridden.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_set_replaces_earlier_and_moves_last() {
        let mut store = OverrideStore::new();
        store.set_int("HemoScope.General.PixelsInMm", 1000);
        store.set_string("HemoScope.Input.Map.Folder", "a");
        store.set_int("HemoScope.General.PixelsInMm", 2000);

        assert_eq!(store.len(), 2);
        assert_eq!(
            store.get("HemoScope.General.PixelsInMm"),
            Some(&OverrideValue::Int(2000))
        );
        let order: Vec<&str> = store.iter().map(|(k, _)| k).collect();
        assert_eq!(
            order,
            vec!["HemoScope.Input.Map.Folder", "HemoScope.General.PixelsInMm"]
        );
    }

    #[test]
    fn unknown_keys_are_kept() {
        let mut store = OverrideStore::new();
        store.set_float("HemoScope.Nothing.Here", 1.5);
        assert_eq!(
            store.get("HemoScope.Nothing.Here"),
            Some(&OverrideValue::Float(1.5))
        );
    }

    #[test]
    fn parse_prefers_integers() {
        assert_eq!(OverrideValue::parse("42"), OverrideValue::Int(42));
        assert_eq!(OverrideValue::parse("True"), OverrideValue::Bool(true));
        assert_eq!(OverrideValue::parse("0.25"), OverrideValue::Float(0.25));
        assert_eq!(
            OverrideValue::parse("Spectrum"),
            OverrideValue::Str("Spectrum".into())
        );
    }

    #[test]
    fn coerce_follows_setting_type() {
        assert_eq!(
            OverrideValue::Int(2024).coerce(ValueKind::Text),
            OverrideValue::Str("2024".into())
        );
        assert_eq!(
            OverrideValue::Float(70.0).coerce(ValueKind::Integer),
            OverrideValue::Int(70)
        );
        assert_eq!(
            OverrideValue::Str("70.000000".into()).coerce(ValueKind::Integer),
            OverrideValue::Int(70)
        );
        assert_eq!(
            OverrideValue::Int(1).coerce(ValueKind::Float),
            OverrideValue::Float(1.0)
        );
        assert_eq!(
            OverrideValue::Str("TRUE".into()).coerce(ValueKind::Bool),
            OverrideValue::Bool(true)
        );
        // lossy conversions are left for extraction to reject
        assert_eq!(
            OverrideValue::Float(70.5).coerce(ValueKind::Integer),
            OverrideValue::Float(70.5)
        );
        assert_eq!(
            OverrideValue::Str("steep".into()).coerce(ValueKind::Integer),
            OverrideValue::Str("steep".into())
        );
    }
}
