//! Unified error types for the MAS-FRO ecosystem
//!
//! This module provides a common error type [`MasfroError`] that can represent
//! errors from any part of the system. Domain-specific error types can be
//! converted to `MasfroError` for uniform error handling at API boundaries.
//!
//! # Example
//!
//! ```ignore
//! use masfro_core::{MasfroError, MasfroResult};
//!
//! fn prepare(path: &str) -> MasfroResult<()> {
//!     let network = load_road_network(path)?;
//!     build_spatial_index(&network)?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Unified error type for all MAS-FRO operations.
///
/// Routing failures are deliberately NOT represented here: a route that cannot
/// be served safely is still a value-typed result carrying warnings, so the
/// caller's flow is preserved.
#[derive(Error, Debug)]
pub enum MasfroError {
    /// I/O errors (file access, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Data validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Road network structure errors
    #[error("Graph error: {0}")]
    Graph(String),

    /// Unknown simulation mode passed to `start`
    #[error("Invalid simulation mode: {0}; must be light, medium, or heavy")]
    InvalidMode(String),

    /// Lifecycle operation attempted while the simulation is not running
    #[error("Simulation is not running (state: {0})")]
    NotRunning(String),

    /// Raster time step outside the scenario's range
    #[error("Invalid time step {0}; valid range is 1-{1}")]
    InvalidTimeStep(u8, u8),

    /// Coordinates outside plausible WGS84 ranges
    #[error("Invalid coordinates ({lat}, {lon})")]
    InvalidCoordinates { lat: f64, lon: f64 },

    /// A flood raster file is absent from the data directory
    #[error("Raster not found: {0}")]
    RasterMissing(String),

    /// A raster file exists but could not be decoded
    #[error("Raster corrupt: {0}")]
    RasterCorrupt(String),

    /// Evacuation center lookup by an unknown name
    #[error("Unknown evacuation center: {0}")]
    UnknownCenter(String),

    /// Occupancy write would exceed a center's capacity
    #[error("Capacity exceeded for center '{name}': {requested} requested, {available} available")]
    CapacityExceeded {
        name: String,
        requested: u32,
        available: u32,
    },

    /// Generic errors (for wrapping external errors)
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using MasfroError.
pub type MasfroResult<T> = Result<T, MasfroError>;

// Conversion from anyhow::Error
impl From<anyhow::Error> for MasfroError {
    fn from(err: anyhow::Error) -> Self {
        MasfroError::Other(err.to_string())
    }
}

// Conversion from string-like types for convenience
impl From<String> for MasfroError {
    fn from(s: String) -> Self {
        MasfroError::Other(s)
    }
}

impl From<&str> for MasfroError {
    fn from(s: &str) -> Self {
        MasfroError::Other(s.to_string())
    }
}

// JSON parsing errors
impl From<serde_json::Error> for MasfroError {
    fn from(err: serde_json::Error) -> Self {
        MasfroError::Parse(err.to_string())
    }
}
