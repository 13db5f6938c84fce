//! Flood depth raster service.
//!
//! Serves depth grids for four return periods x 18 hourly time steps from a
//! directory laid out as `<root>/<rp>/<rp>-<t>.asc`. Grids are immutable once
//! decoded and cached for the process lifetime (72 grids at the source
//! resolution fit comfortably in memory).
//!
//! Geographic lookup deliberately ignores each grid's embedded georeferencing:
//! the source rasters carry metadata that does not match the area they cover.
//! Instead a manual centered bounding box (center + base coverage, stretched
//! by the grid's aspect ratio) maps lon/lat onto pixels. The parameters MUST
//! stay in lockstep with the renderer used by external collaborators or depth
//! values are silently mis-located.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::grid::AsciiGrid;
use masfro_core::{MasfroError, MasfroResult};

/// Number of hourly time steps per return-period series.
pub const TIME_STEPS: u8 = 18;

/// Statistical recurrence interval selecting a raster series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnPeriod {
    /// 2-year flood
    Rr01,
    /// 5-year flood
    Rr02,
    /// 10-year flood
    Rr03,
    /// 25-year flood
    Rr04,
}

impl ReturnPeriod {
    pub const ALL: [ReturnPeriod; 4] = [
        ReturnPeriod::Rr01,
        ReturnPeriod::Rr02,
        ReturnPeriod::Rr03,
        ReturnPeriod::Rr04,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnPeriod::Rr01 => "rr01",
            ReturnPeriod::Rr02 => "rr02",
            ReturnPeriod::Rr03 => "rr03",
            ReturnPeriod::Rr04 => "rr04",
        }
    }

    pub fn parse(tag: &str) -> MasfroResult<Self> {
        match tag {
            "rr01" => Ok(ReturnPeriod::Rr01),
            "rr02" => Ok(ReturnPeriod::Rr02),
            "rr03" => Ok(ReturnPeriod::Rr03),
            "rr04" => Ok(ReturnPeriod::Rr04),
            other => Err(MasfroError::Config(format!(
                "invalid return period '{}'; valid tags: rr01, rr02, rr03, rr04",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ReturnPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Manual geographic mapping for flood grids.
///
/// `base_coverage` is in degrees (~6.6 km at the default). All three values
/// must match the external renderer's configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RasterMapping {
    pub center_lat: f64,
    pub center_lon: f64,
    pub base_coverage: f64,
}

impl Default for RasterMapping {
    fn default() -> Self {
        Self {
            center_lat: 14.6456,
            center_lon: 121.10305,
            base_coverage: 0.06,
        }
    }
}

/// Geographic bounds derived from a mapping and a grid's aspect ratio.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GeoBounds {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl GeoBounds {
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        (self.min_lon..=self.max_lon).contains(&lon) && (self.min_lat..=self.max_lat).contains(&lat)
    }
}

impl RasterMapping {
    /// Bounds for a grid of the given pixel dimensions.
    ///
    /// Wide grids get the base coverage horizontally and a shrunken vertical
    /// extent; tall grids get 1.5x the base coverage vertically. This mirrors
    /// the renderer's aspect-ratio rule exactly.
    pub fn bounds(&self, width: usize, height: usize) -> GeoBounds {
        let aspect = width as f64 / height as f64;
        let (coverage_width, coverage_height) = if aspect > 1.0 {
            (self.base_coverage, self.base_coverage / aspect)
        } else {
            let h = self.base_coverage * 1.5;
            (h * aspect, h)
        };
        GeoBounds {
            min_lon: self.center_lon - coverage_width / 2.0,
            max_lon: self.center_lon + coverage_width / 2.0,
            min_lat: self.center_lat - coverage_height / 2.0,
            max_lat: self.center_lat + coverage_height / 2.0,
        }
    }

    /// Nearest-pixel (row, col) for a lon/lat, or `None` outside the bounds.
    ///
    /// Row 0 is the northern edge, so y is inverted before scaling.
    pub fn to_pixel(
        &self,
        lon: f64,
        lat: f64,
        width: usize,
        height: usize,
    ) -> Option<(usize, usize)> {
        let bounds = self.bounds(width, height);
        if !bounds.contains(lon, lat) {
            return None;
        }
        let norm_x = (lon - bounds.min_lon) / (bounds.max_lon - bounds.min_lon);
        let norm_y = (lat - bounds.min_lat) / (bounds.max_lat - bounds.min_lat);
        let col = ((norm_x * width as f64) as usize).min(width - 1);
        let row = (((1.0 - norm_y) * height as f64) as usize).min(height - 1);
        Some((row, col))
    }
}

/// Aggregate depth statistics for one grid (cells above the 1 cm threshold).
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct FloodStats {
    pub total_cells: usize,
    pub valid_cells: usize,
    pub flooded_cells: usize,
    pub min_depth_m: f32,
    pub max_depth_m: f32,
    pub mean_depth_m: f32,
}

/// Shape, bounds, nodata sentinel, and depth statistics for one grid.
#[derive(Debug, Clone, Serialize)]
pub struct RasterMetadata {
    pub return_period: ReturnPeriod,
    pub time_step: u8,
    pub width: usize,
    pub height: usize,
    pub bounds: GeoBounds,
    pub nodata: Option<f64>,
    pub stats: FloodStats,
}

#[derive(Debug)]
struct FloodRaster {
    grid: AsciiGrid,
    metadata: RasterMetadata,
}

/// Loader and point-query service for flood depth grids.
///
/// `load` is idempotent; decoded grids are cached by
/// `(return_period, time_step)`. Cloning the service shares the cache.
#[derive(Debug, Clone)]
pub struct FloodRasterService {
    root: PathBuf,
    mapping: RasterMapping,
    cache: Arc<Mutex<HashMap<(ReturnPeriod, u8), Arc<FloodRaster>>>>,
}

impl FloodRasterService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_mapping(root, RasterMapping::default())
    }

    pub fn with_mapping(root: impl Into<PathBuf>, mapping: RasterMapping) -> Self {
        Self {
            root: root.into(),
            mapping,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn mapping(&self) -> RasterMapping {
        self.mapping
    }

    fn file_path(&self, rp: ReturnPeriod, time_step: u8) -> PathBuf {
        self.root
            .join(rp.as_str())
            .join(format!("{}-{}.asc", rp.as_str(), time_step))
    }

    fn validate_time_step(time_step: u8) -> MasfroResult<()> {
        if (1..=TIME_STEPS).contains(&time_step) {
            Ok(())
        } else {
            Err(MasfroError::InvalidTimeStep(time_step, TIME_STEPS))
        }
    }

    /// Load (or fetch from cache) the grid for one scenario slice.
    fn load_raster(&self, rp: ReturnPeriod, time_step: u8) -> MasfroResult<Arc<FloodRaster>> {
        Self::validate_time_step(time_step)?;
        if let Some(raster) = self.cache.lock().get(&(rp, time_step)) {
            return Ok(Arc::clone(raster));
        }

        let path = self.file_path(rp, time_step);
        if !path.exists() {
            return Err(MasfroError::RasterMissing(path.display().to_string()));
        }
        let grid = AsciiGrid::open(&path)
            .map_err(|e| MasfroError::RasterCorrupt(format!("{}: {:#}", path.display(), e)))?;

        let metadata = Self::describe(&grid, &self.mapping, rp, time_step);
        debug!(
            rp = rp.as_str(),
            time_step,
            flooded_cells = metadata.stats.flooded_cells,
            "loaded flood raster"
        );
        let raster = Arc::new(FloodRaster { grid, metadata });
        self.cache
            .lock()
            .insert((rp, time_step), Arc::clone(&raster));
        Ok(raster)
    }

    fn describe(
        grid: &AsciiGrid,
        mapping: &RasterMapping,
        rp: ReturnPeriod,
        time_step: u8,
    ) -> RasterMetadata {
        let mut stats = FloodStats {
            total_cells: grid.ncols * grid.nrows,
            min_depth_m: f32::INFINITY,
            ..FloodStats::default()
        };
        let mut sum = 0.0f64;
        for &v in grid.cells() {
            if v.is_nan() {
                continue;
            }
            stats.valid_cells += 1;
            // Depths below 1 cm are treated as dry
            if v > 0.01 {
                stats.flooded_cells += 1;
                stats.min_depth_m = stats.min_depth_m.min(v);
                stats.max_depth_m = stats.max_depth_m.max(v);
                sum += v as f64;
            }
        }
        if stats.flooded_cells > 0 {
            stats.mean_depth_m = (sum / stats.flooded_cells as f64) as f32;
        } else {
            stats.min_depth_m = 0.0;
        }
        RasterMetadata {
            return_period: rp,
            time_step,
            width: grid.ncols,
            height: grid.nrows,
            bounds: mapping.bounds(grid.ncols, grid.nrows),
            nodata: grid.nodata,
            stats,
        }
    }

    /// Decode (or fetch cached) metadata for one scenario slice.
    pub fn metadata(&self, rp: ReturnPeriod, time_step: u8) -> MasfroResult<RasterMetadata> {
        Ok(self.load_raster(rp, time_step)?.metadata.clone())
    }

    /// Force-load a slice, surfacing `RasterMissing`/`RasterCorrupt`.
    pub fn load(&self, rp: ReturnPeriod, time_step: u8) -> MasfroResult<()> {
        self.load_raster(rp, time_step).map(|_| ())
    }

    /// Flood depth in meters at a WGS84 point under the given scenario.
    ///
    /// `Ok(None)` when the point lies outside the mapped bounds or on a nodata
    /// cell; `Ok(Some(0.0))` for an inside-but-dry cell. File problems surface
    /// as errors for the caller to downgrade as it sees fit.
    pub fn depth_at(
        &self,
        lon: f64,
        lat: f64,
        rp: ReturnPeriod,
        time_step: u8,
    ) -> MasfroResult<Option<f32>> {
        let raster = self.load_raster(rp, time_step)?;
        let grid = &raster.grid;
        let Some((row, col)) = self.mapping.to_pixel(lon, lat, grid.ncols, grid.nrows) else {
            return Ok(None);
        };
        Ok(grid.value(row, col))
    }

    /// Every scenario slice present on disk.
    pub fn available(&self) -> Vec<(ReturnPeriod, u8)> {
        let mut found = Vec::new();
        for rp in ReturnPeriod::ALL {
            for t in 1..=TIME_STEPS {
                if self.file_path(rp, t).exists() {
                    found.push((rp, t));
                }
            }
        }
        found
    }
}
