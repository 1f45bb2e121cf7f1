//! # HemoScope Core Library
//!
//! This crate turns microscope captures of nail-fold capillaries into measurements.
//! It stitches scanned tiles into a layered map, finds capillary apexes in every
//! layer, describes the capillaries that fit the field-of-view frame, and estimates
//! depth from a stack of frames taken at known Z positions.
//!
//! ## Crate Structure
//!
//! - **`engine`**: The `Engine` session object. Owns all results and enforces the order
//!   in which operations may be called.
//! - **`config`**: TOML configuration resolved through figment, plus the per-session
//!   override store addressed by keys such as `HemoScope.Input.Map.Folder`.
//! - **`map`**: Scan-position parsing, tile stitching, map sampling and persistence.
//! - **`capillary`**: Apex detection, capillary description and their CSV reports.
//! - **`depth`**: Z-position stacks, focus markers (histogram mode, histogram
//!   variance, spectrum) and the regression that maps markers to Z.
//! - **`sequence`**: Wide/line frame pairs and the line-frame analysis.
//! - **`imaging`**: Grayscale image reading and TIFF/BMP writing.
//! - **`cancel`**: The cooperative cancellation flag polled by long operations.
//! - **`error`**: `EngineError` and `ConfigError`.
//! - **`logging`**: `tracing-subscriber` initialisation.
//! - **`validation`**: Small predicates used by configuration validation.

pub mod cancel;
pub mod capillary;
pub mod config;
pub mod depth;
pub mod engine;
pub mod error;
pub mod imaging;
pub mod logging;
pub mod map;
pub mod sequence;
pub mod validation;

pub use engine::Engine;
pub use error::{ConfigError, EngineError, EngineResult};
