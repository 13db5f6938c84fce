//! # masfro-hazard: Hazard Fusion
//!
//! Produces the authoritative per-edge flood risk each simulation tick by
//! fusing three sources with different resolutions and confidence:
//!
//! 1. **Raster depth**: pre-computed inundation grids sampled at edge
//!    endpoints under the active `(return period, time step)` scenario,
//!    mapped to risk through a calibrated sigmoid.
//! 2. **Scout reports**: validated crowdsourced observations, cached in a
//!    bounded deque with O(1) duplicate rejection, spread onto nearby edges
//!    with Gaussian spatial decay.
//! 3. **Terrain prior**: depressions read from the DEM's relative-elevation
//!    arrays are riskier before any live data arrives.
//!
//! Station-level flood observations (river gauges, rainfall, dam levels) act
//! as a global environmental factor modulating the raster contribution, not
//! as per-edge depths.
//!
//! [`HazardFusion::run`] is the only writer of edge risk; everything else in
//! the workspace reads it.

pub mod fusion;
pub mod reports;

pub use fusion::{FusionConfig, FusionReport, HazardFusion};
pub use reports::{
    FloodObservation, RainfallIntensity, ReportType, ScoutReport,
};
