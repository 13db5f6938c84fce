//! # masfro-geo: Flood Rasters and Terrain
//!
//! Gridded geospatial inputs for hazard fusion:
//!
//! - [`FloodRasterService`] loads pre-computed inundation depth grids keyed by
//!   `(return period, time step)` and answers point depth queries through a
//!   **manual centered bounding box** rather than the grids' embedded
//!   georeferencing (the source rasters ship misaligned metadata; the manual
//!   mapping must match the renderer used by external collaborators).
//! - [`TerrainService`] loads a DEM once, derives slope and relative-elevation
//!   arrays at construction, and answers elevation/slope/line-of-sight queries
//!   plus a batch pass that caches terrain attributes onto road graph nodes.
//!
//! Both services read ESRI ASCII grids (`.asc`); see [`grid`].
//!
//! Point queries never fail for out-of-coverage locations; they return `None`.
//! Missing or undecodable files surface as [`masfro_core::MasfroError`]
//! variants from `load`/`open` only.

pub mod grid;
pub mod raster;
pub mod terrain;

pub use grid::AsciiGrid;
pub use raster::{
    FloodRasterService, FloodStats, RasterMapping, RasterMetadata, ReturnPeriod, TIME_STEPS,
};
pub use terrain::{TerrainCoverage, TerrainService};
