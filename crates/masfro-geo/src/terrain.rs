//! Terrain service backed by a digital elevation model.
//!
//! The DEM is decoded once at construction and two auxiliary arrays are
//! derived up front:
//!
//! - **slope** (degrees) from central differences scaled by the pixel size;
//! - **relative elevation** (elevation minus neighborhood mean) at a local
//!   (~150 m) and a regional (~2 km) window. Negative values mark depressions
//!   and floodplains, the terrain prior hazard fusion feeds on.
//!
//! Neighborhood means use a separable clamped box filter, so the cost is
//! O(cells) per axis for any window radius.
//!
//! Unlike the flood rasters, the DEM's own georeferencing is trusted: point
//! queries use the grid's corner and cell size directly.

use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use tracing::info;

use crate::grid::AsciiGrid;
use masfro_core::geo::{meters_per_degree_lat, meters_per_degree_lon};
use masfro_core::{MasfroResult, RoadNetwork};

/// Local relative-elevation window radius in pixels (~150 m at ~30 m pixels).
const LOCAL_RADIUS_PX: usize = 5;

/// Default regional window radius in pixels (~2 km at ~30 m pixels).
pub const DEFAULT_REGIONAL_RADIUS_PX: usize = 65;

/// Coverage summary from the batch node-elevation pass.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TerrainCoverage {
    pub total_nodes: usize,
    pub nodes_with_elevation: usize,
}

impl TerrainCoverage {
    pub fn ratio(&self) -> f64 {
        if self.total_nodes == 0 {
            0.0
        } else {
            self.nodes_with_elevation as f64 / self.total_nodes as f64
        }
    }
}

/// DEM query service with pre-computed slope and relative-elevation arrays.
#[derive(Debug)]
pub struct TerrainService {
    dem: AsciiGrid,
    slope_deg: Vec<f32>,
    relative_elevation: Vec<f32>,
    regional_relative_elevation: Vec<f32>,
}

impl TerrainService {
    /// Open a DEM and derive the auxiliary arrays. A missing or undecodable
    /// DEM is a fatal construction error.
    pub fn open(path: &Path) -> MasfroResult<Self> {
        Self::open_with_regional_radius(path, DEFAULT_REGIONAL_RADIUS_PX)
    }

    pub fn open_with_regional_radius(
        path: &Path,
        regional_radius_px: usize,
    ) -> MasfroResult<Self> {
        let dem = AsciiGrid::open(path)
            .with_context(|| format!("opening DEM '{}'", path.display()))?;
        Ok(Self::from_grid(dem, regional_radius_px))
    }

    /// Build from an already-decoded grid. Used by tests with synthetic DEMs.
    pub fn from_grid(dem: AsciiGrid, regional_radius_px: usize) -> Self {
        let slope_deg = compute_slope(&dem);
        let relative_elevation = relative_to_box_mean(&dem, LOCAL_RADIUS_PX);
        let regional_relative_elevation = relative_to_box_mean(&dem, regional_radius_px);

        let (min, max) = elevation_range(&dem);
        info!(
            width = dem.ncols,
            height = dem.nrows,
            min_elevation_m = min,
            max_elevation_m = max,
            regional_radius_px,
            "terrain service ready"
        );

        Self {
            dem,
            slope_deg,
            relative_elevation,
            regional_relative_elevation,
        }
    }

    /// Nearest pixel for a WGS84 point, or `None` outside coverage.
    ///
    /// Rounds to the nearest cell center rather than truncating, so points on
    /// cell boundaries do not develop a systematic southwest bias.
    fn to_pixel(&self, lon: f64, lat: f64) -> Option<(usize, usize)> {
        let max_lat = self.dem.yllcorner + self.dem.nrows as f64 * self.dem.cellsize;
        let col_f = (lon - self.dem.xllcorner) / self.dem.cellsize - 0.5;
        let row_f = (max_lat - lat) / self.dem.cellsize - 0.5;
        let col = col_f.round();
        let row = row_f.round();
        if col < 0.0 || row < 0.0 || col >= self.dem.ncols as f64 || row >= self.dem.nrows as f64 {
            return None;
        }
        Some((row as usize, col as usize))
    }

    fn lookup(&self, array: &[f32], lon: f64, lat: f64) -> Option<f64> {
        let (row, col) = self.to_pixel(lon, lat)?;
        let v = array[row * self.dem.ncols + col];
        if v.is_nan() {
            None
        } else {
            Some(v as f64)
        }
    }

    /// Ground elevation in meters, or `None` outside coverage.
    pub fn elevation(&self, lon: f64, lat: f64) -> Option<f64> {
        let (row, col) = self.to_pixel(lon, lat)?;
        self.dem.value(row, col).map(|v| v as f64)
    }

    /// Terrain slope in degrees.
    pub fn slope(&self, lon: f64, lat: f64) -> Option<f64> {
        self.lookup(&self.slope_deg, lon, lat)
    }

    /// Elevation minus the local-window neighborhood mean (negative =
    /// depression).
    pub fn relative_elevation(&self, lon: f64, lat: f64) -> Option<f64> {
        self.lookup(&self.relative_elevation, lon, lat)
    }

    /// Elevation minus the regional-window mean; catches wide floodplains the
    /// local window sees as flat.
    pub fn regional_relative_elevation(&self, lon: f64, lat: f64) -> Option<f64> {
        self.lookup(&self.regional_relative_elevation, lon, lat)
    }

    /// Whether terrain between two points stays at or below `max_elevation_m`.
    ///
    /// Samples `num_samples` evenly-spaced interior points; any sample above
    /// the limit means a ridge or levee blocks water propagation. Samples
    /// outside DEM coverage are skipped.
    pub fn line_of_sight(
        &self,
        lon1: f64,
        lat1: f64,
        lon2: f64,
        lat2: f64,
        max_elevation_m: f64,
        num_samples: usize,
    ) -> bool {
        for i in 1..=num_samples {
            let t = i as f64 / (num_samples + 1) as f64;
            let lon = lon1 + t * (lon2 - lon1);
            let lat = lat1 + t * (lat2 - lat1);
            match self.elevation(lon, lat) {
                Some(elev) if elev > max_elevation_m => return false,
                _ => {}
            }
        }
        true
    }

    /// Estimated flood depth given a water surface elevation; 0 where the
    /// ground sits above the water surface.
    pub fn estimate_flood_depth(
        &self,
        lon: f64,
        lat: f64,
        water_surface_elevation_m: f64,
    ) -> Option<f64> {
        self.elevation(lon, lat)
            .map(|ground| (water_surface_elevation_m - ground).max(0.0))
    }

    /// Batch pass over every graph node caching the four terrain scalars onto
    /// the node. Invoked during graph load; returns the coverage achieved.
    pub fn precompute_node_elevations(&self, network: &mut RoadNetwork) -> TerrainCoverage {
        let mut coverage = TerrainCoverage::default();
        for idx in network.graph.node_indices().collect::<Vec<_>>() {
            let (lon, lat) = {
                let n = &network.graph[idx];
                (n.lon, n.lat)
            };
            let elevation = self.elevation(lon, lat);
            let node = &mut network.graph[idx];
            node.elevation_m = elevation;
            node.slope_deg = self.slope(lon, lat);
            node.relative_elevation_m = self.relative_elevation(lon, lat);
            node.regional_relative_elevation_m = self.regional_relative_elevation(lon, lat);

            coverage.total_nodes += 1;
            if elevation.is_some() {
                coverage.nodes_with_elevation += 1;
            }
        }
        info!(
            total = coverage.total_nodes,
            covered = coverage.nodes_with_elevation,
            ratio = format!("{:.1}%", coverage.ratio() * 100.0),
            "precomputed node terrain attributes"
        );
        coverage
    }
}

fn elevation_range(dem: &AsciiGrid) -> (f32, f32) {
    let mut min = f32::INFINITY;
    let mut max = f32::NEG_INFINITY;
    for &v in dem.cells() {
        if v.is_nan() {
            continue;
        }
        min = min.min(v);
        max = max.max(v);
    }
    if min > max {
        (0.0, 0.0)
    } else {
        (min, max)
    }
}

/// Slope in degrees from central differences, one-sided at grid edges.
fn compute_slope(dem: &AsciiGrid) -> Vec<f32> {
    let (ncols, nrows) = (dem.ncols, dem.nrows);
    let mid_lat = dem.yllcorner + dem.nrows as f64 * dem.cellsize / 2.0;
    let px = dem.cellsize * meters_per_degree_lon(mid_lat);
    let py = dem.cellsize * meters_per_degree_lat();

    let at = |r: usize, c: usize| dem.raw(r, c) as f64;
    let mut slope = vec![f32::NAN; ncols * nrows];
    for r in 0..nrows {
        for c in 0..ncols {
            if dem.raw(r, c).is_nan() {
                continue;
            }
            let dx = match (c > 0, c + 1 < ncols) {
                (true, true) => (at(r, c + 1) - at(r, c - 1)) / (2.0 * px),
                (false, true) => (at(r, c + 1) - at(r, c)) / px,
                (true, false) => (at(r, c) - at(r, c - 1)) / px,
                (false, false) => 0.0,
            };
            let dy = match (r > 0, r + 1 < nrows) {
                (true, true) => (at(r + 1, c) - at(r - 1, c)) / (2.0 * py),
                (false, true) => (at(r + 1, c) - at(r, c)) / py,
                (true, false) => (at(r, c) - at(r - 1, c)) / py,
                (false, false) => 0.0,
            };
            if dx.is_nan() || dy.is_nan() {
                continue;
            }
            slope[r * ncols + c] = (dx * dx + dy * dy).sqrt().atan().to_degrees() as f32;
        }
    }
    slope
}

/// Elevation minus the clamped-window box mean, NaN-aware.
///
/// Two separable passes keep running window sums of (value, valid count), so
/// the cost does not grow with the window radius.
fn relative_to_box_mean(dem: &AsciiGrid, radius: usize) -> Vec<f32> {
    let (ncols, nrows) = (dem.ncols, dem.nrows);
    let n = ncols * nrows;

    let mut sums = vec![0.0f64; n];
    let mut counts = vec![0.0f64; n];
    for i in 0..n {
        let v = dem.cells()[i];
        if !v.is_nan() {
            sums[i] = v as f64;
            counts[i] = 1.0;
        }
    }

    let sums = box_sum_rows(&sums, ncols, nrows, radius);
    let counts = box_sum_rows(&counts, ncols, nrows, radius);
    let sums = box_sum_cols(&sums, ncols, nrows, radius);
    let counts = box_sum_cols(&counts, ncols, nrows, radius);

    let mut rel = vec![f32::NAN; n];
    for i in 0..n {
        let v = dem.cells()[i];
        if v.is_nan() || counts[i] <= 0.0 {
            continue;
        }
        let mean = sums[i] / counts[i];
        rel[i] = (v as f64 - mean) as f32;
    }
    rel
}

fn box_sum_rows(data: &[f64], ncols: usize, nrows: usize, radius: usize) -> Vec<f64> {
    let mut out = vec![0.0; data.len()];
    let mut prefix = vec![0.0; ncols + 1];
    for r in 0..nrows {
        let row = &data[r * ncols..(r + 1) * ncols];
        for c in 0..ncols {
            prefix[c + 1] = prefix[c] + row[c];
        }
        for c in 0..ncols {
            let lo = c.saturating_sub(radius);
            let hi = (c + radius + 1).min(ncols);
            out[r * ncols + c] = prefix[hi] - prefix[lo];
        }
    }
    out
}

fn box_sum_cols(data: &[f64], ncols: usize, nrows: usize, radius: usize) -> Vec<f64> {
    let mut out = vec![0.0; data.len()];
    let mut prefix = vec![0.0; nrows + 1];
    for c in 0..ncols {
        for r in 0..nrows {
            prefix[r + 1] = prefix[r] + data[r * ncols + c];
        }
        for r in 0..nrows {
            let lo = r.saturating_sub(radius);
            let hi = (r + radius + 1).min(nrows);
            out[r * ncols + c] = prefix[hi] - prefix[lo];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use masfro_core::{NodeId, RoadNode};

    /// 5x5 DEM over a 0.05-degree square: flat at 10 m with a 2 m pit in the
    /// middle cell. Corner at (121.08, 14.62).
    fn pit_dem() -> AsciiGrid {
        let mut data = vec![10.0f32; 25];
        data[12] = 8.0;
        AsciiGrid::from_parts(5, 5, 121.08, 14.62, 0.01, data).unwrap()
    }

    fn center_of(dem: &AsciiGrid, row: usize, col: usize) -> (f64, f64) {
        let max_lat = dem.yllcorner + dem.nrows as f64 * dem.cellsize;
        let lon = dem.xllcorner + (col as f64 + 0.5) * dem.cellsize;
        let lat = max_lat - (row as f64 + 0.5) * dem.cellsize;
        (lon, lat)
    }

    #[test]
    fn test_elevation_query() {
        let dem = pit_dem();
        let (lon, lat) = center_of(&dem, 2, 2);
        let terrain = TerrainService::from_grid(dem, 2);
        assert_eq!(terrain.elevation(lon, lat), Some(8.0));
    }

    #[test]
    fn test_outside_coverage_is_none() {
        let terrain = TerrainService::from_grid(pit_dem(), 2);
        assert_eq!(terrain.elevation(120.0, 10.0), None);
        assert_eq!(terrain.slope(120.0, 10.0), None);
        assert_eq!(terrain.relative_elevation(120.0, 10.0), None);
    }

    #[test]
    fn test_pit_has_negative_relative_elevation() {
        let dem = pit_dem();
        let (pit_lon, pit_lat) = center_of(&dem, 2, 2);
        let (rim_lon, rim_lat) = center_of(&dem, 0, 0);
        let terrain = TerrainService::from_grid(dem, 2);

        let pit = terrain.relative_elevation(pit_lon, pit_lat).unwrap();
        let rim = terrain.relative_elevation(rim_lon, rim_lat).unwrap();
        assert!(pit < 0.0, "pit should sit below its neighborhood, got {}", pit);
        assert!(rim >= 0.0, "rim should not read as a depression, got {}", rim);
    }

    #[test]
    fn test_flat_terrain_zero_slope() {
        let flat = AsciiGrid::from_parts(4, 4, 121.08, 14.62, 0.01, vec![10.0; 16]).unwrap();
        let (lon, lat) = (121.08 + 0.015, 14.62 + 0.015);
        let terrain = TerrainService::from_grid(flat, 2);
        assert_eq!(terrain.slope(lon, lat), Some(0.0));
    }

    #[test]
    fn test_pit_raises_slope_nearby() {
        let dem = pit_dem();
        let (lon, lat) = center_of(&dem, 2, 1);
        let terrain = TerrainService::from_grid(dem, 2);
        assert!(terrain.slope(lon, lat).unwrap() > 0.0);
    }

    #[test]
    fn test_line_of_sight_blocked_by_ridge() {
        // Flat 10 m terrain with a 30 m ridge column in the middle
        let mut data = vec![10.0f32; 25];
        for r in 0..5 {
            data[r * 5 + 2] = 30.0;
        }
        let dem = AsciiGrid::from_parts(5, 5, 121.08, 14.62, 0.01, data).unwrap();
        let (west_lon, lat) = center_of(&dem, 2, 0);
        let (east_lon, _) = center_of(&dem, 2, 4);
        let terrain = TerrainService::from_grid(dem, 2);

        assert!(!terrain.line_of_sight(west_lon, lat, east_lon, lat, 15.0, 5));
        assert!(terrain.line_of_sight(west_lon, lat, east_lon, lat, 35.0, 5));
    }

    #[test]
    fn test_estimate_flood_depth() {
        let terrain = TerrainService::from_grid(pit_dem(), 2);
        let dem = pit_dem();
        let (lon, lat) = center_of(&dem, 2, 2);
        assert_eq!(terrain.estimate_flood_depth(lon, lat, 9.0), Some(1.0));
        assert_eq!(terrain.estimate_flood_depth(lon, lat, 5.0), Some(0.0));
    }

    #[test]
    fn test_precompute_node_elevations() {
        let dem = pit_dem();
        let (lon, lat) = center_of(&dem, 2, 2);
        let terrain = TerrainService::from_grid(dem, 2);

        let mut network = RoadNetwork::new();
        network.add_road_node(RoadNode::new(NodeId::new(1), lon, lat));
        network.add_road_node(RoadNode::new(NodeId::new(2), 120.0, 10.0)); // outside DEM

        let coverage = terrain.precompute_node_elevations(&mut network);
        assert_eq!(coverage.total_nodes, 2);
        assert_eq!(coverage.nodes_with_elevation, 1);
        assert!((coverage.ratio() - 0.5).abs() < 1e-9);

        let n1 = network.node(NodeId::new(1)).unwrap();
        assert_eq!(n1.elevation_m, Some(8.0));
        assert!(n1.relative_elevation_m.unwrap() < 0.0);
        let n2 = network.node(NodeId::new(2)).unwrap();
        assert_eq!(n2.elevation_m, None);
    }
}
