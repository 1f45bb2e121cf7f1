//! Custom error types for the engine.
//!
//! This module defines the primary error type, `EngineError`, returned by every engine
//! operation, and `ConfigError` for configuration loading and resolution. Both use the
//! `thiserror` crate so that lower-level errors convert with the `?` operator.
//!
//! ## Error Hierarchy
//!
//! `EngineError` consolidates the failure modes a caller has to tell apart:
//!
//! - **`Precondition`**: an operation was called before its prerequisite (for example,
//!   detecting capillaries before a map has been built). Nothing was changed.
//! - **`Config`**: wraps `ConfigError` (missing file, malformed TOML, invalid values or
//!   an override of the wrong type for its key).
//! - **`Io`**: a folder or file could not be read or written. Carries the offending path.
//! - **`Image`**: an image could not be decoded or encoded. Carries the offending path.
//! - **`Csv`**: a CSV input could not be parsed or a CSV report could not be written.
//! - **`MalformedInput`**: the inputs were readable but inconsistent (image count does not
//!   match the scan positions, frames of different sizes, an unparseable Z position).
//! - **`Cancelled`**: the operation observed the cancellation flag and stopped early.
//!
//! [`EngineError::category`] folds these into the coarse categories a shell shows to
//! the user.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Convenience alias for results using the engine error type.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors raised while loading or resolving configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file does not exist
    #[error("Configuration file not found: {}", .0.display())]
    Missing(PathBuf),

    /// Not valid TOML, or a value of the wrong type
    #[error("Configuration parse error: {0}")]
    Parse(#[from] Box<figment::Error>),

    /// A value outside its allowed range, or an unset folder
    #[error("Configuration validation error: {0}")]
    Invalid(String),

    /// Focusing method name not recognised
    #[error("Unknown focusing method '{0}'. Must be one of: Mode, Variance, Spectrum")]
    UnknownFocusingMethod(String),

    /// An override that could not be applied to its setting
    #[error("Override {key} = {value} was not applied: {reason}")]
    RejectedOverride {
        key: String,
        value: String,
        reason: String,
    },
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Parse(Box::new(err))
    }
}

/// Errors returned by engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Called before its prerequisite; nothing changed
    #[error("{operation} requires {requirement}")]
    Precondition {
        operation: &'static str,
        requirement: &'static str,
    },

    /// Configuration problem
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// File or folder access failed
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Image decoding or encoding failed
    #[error("Image error at {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// CSV reading or writing failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Readable but inconsistent input
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Stopped by the cancel flag
    #[error("{0} was cancelled")]
    Cancelled(&'static str),
}

/// Coarse classification of an [`EngineError`] for user-facing reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Operation called out of order
    Precondition,
    /// Bad configuration or override
    Configuration,
    /// Filesystem failure
    Io,
    /// Unusable input data
    MalformedInput,
    /// Stopped on request
    Cancelled,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorCategory::Precondition => "precondition not met",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Io => "i/o",
            ErrorCategory::MalformedInput => "malformed input",
            ErrorCategory::Cancelled => "cancelled",
        };
        write!(f, "{}", label)
    }
}

impl EngineError {
    /// Missing prerequisite of `operation`.
    pub fn precondition(operation: &'static str, requirement: &'static str) -> Self {
        EngineError::Precondition {
            operation,
            requirement,
        }
    }

    /// I/O failure at `path`.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Image failure at `path`.
    pub fn image(path: impl AsRef<Path>, source: image::ImageError) -> Self {
        EngineError::Image {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Inconsistent input.
    pub fn malformed(message: impl Into<String>) -> Self {
        EngineError::MalformedInput(message.into())
    }

    /// Classify the error for reporting.
    ///
    /// Image decoding failures count as malformed input unless the decoder hit an
    /// I/O error underneath.
    pub fn category(&self) -> ErrorCategory {
        match self {
            EngineError::Precondition { .. } => ErrorCategory::Precondition,
            EngineError::Config(_) => ErrorCategory::Configuration,
            EngineError::Io { .. } => ErrorCategory::Io,
            EngineError::Image { source, .. } => match source {
                image::ImageError::IoError(_) => ErrorCategory::Io,
                _ => ErrorCategory::MalformedInput,
            },
            EngineError::Csv(err) => match err.kind() {
                csv::ErrorKind::Io(_) => ErrorCategory::Io,
                _ => ErrorCategory::MalformedInput,
            },
            EngineError::MalformedInput(_) => ErrorCategory::MalformedInput,
            EngineError::Cancelled(_) => ErrorCategory::Cancelled,
        }
    }
}
