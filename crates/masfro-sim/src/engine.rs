//! The engine: every domain service the orchestrator sequences, owned in one
//! place and constructor-injected (no process-wide singletons).

use serde::Serialize;
use tracing::info;

use masfro_core::{NetworkStats, RoadNetwork, SpatialIndex};
use masfro_geo::{FloodRasterService, TerrainService};
use masfro_hazard::HazardFusion;
use masfro_routing::{
    EvacuationDirectory, RoutePreferences, RouteResult, Router,
};

/// Snapshot read interface for routing callers.
///
/// Implemented by [`Engine`] directly (and re-exposed through the
/// orchestrator's coarse lock), so embedders that never start a simulation
/// loop can still issue queries.
pub trait Query {
    fn route(&self, start: (f64, f64), end: (f64, f64), prefs: &RoutePreferences) -> RouteResult;

    fn route_to_nearest_center(
        &self,
        start: (f64, f64),
    ) -> Option<(masfro_core::EvacuationCenter, RouteResult)>;

    fn k_alternatives(
        &self,
        start: (f64, f64),
        end: (f64, f64),
        k: usize,
        prefs: &RoutePreferences,
    ) -> Vec<RouteResult>;
}

/// All domain services bundled for the orchestrator.
pub struct Engine {
    pub network: RoadNetwork,
    pub index: SpatialIndex,
    pub rasters: FloodRasterService,
    pub terrain: Option<TerrainService>,
    pub fusion: HazardFusion,
    pub router: Router,
    pub directory: EvacuationDirectory,
}

impl Engine {
    /// Assemble an engine. Builds the spatial index and, when a terrain
    /// service is supplied, caches terrain attributes onto every graph node.
    pub fn new(
        mut network: RoadNetwork,
        rasters: FloodRasterService,
        terrain: Option<TerrainService>,
        fusion: HazardFusion,
        router: Router,
        directory: EvacuationDirectory,
    ) -> Self {
        if let Some(terrain) = &terrain {
            let coverage = terrain.precompute_node_elevations(&mut network);
            info!(
                coverage = format!("{:.1}%", coverage.ratio() * 100.0),
                "terrain attributes cached onto graph nodes"
            );
        }
        let index = SpatialIndex::build(&network);
        info!(
            nodes = network.node_count(),
            edges = network.edge_count(),
            cells = index.cell_count(),
            centers = directory.len(),
            "engine assembled"
        );
        Self {
            network,
            index,
            rasters,
            terrain,
            fusion,
            router,
            directory,
        }
    }

    pub fn network_stats(&self) -> NetworkStats {
        self.network.stats()
    }
}

impl Query for Engine {
    fn route(&self, start: (f64, f64), end: (f64, f64), prefs: &RoutePreferences) -> RouteResult {
        self.router.route(&self.network, &self.index, start, end, prefs)
    }

    fn route_to_nearest_center(
        &self,
        start: (f64, f64),
    ) -> Option<(masfro_core::EvacuationCenter, RouteResult)> {
        self.router
            .route_to_nearest_center(&self.network, &self.index, &self.directory, start)
    }

    fn k_alternatives(
        &self,
        start: (f64, f64),
        end: (f64, f64),
        k: usize,
        prefs: &RoutePreferences,
    ) -> Vec<RouteResult> {
        self.router
            .k_alternatives(&self.network, &self.index, start, end, k, prefs)
    }
}

/// One answered route request, kept in the bounded history for status
/// reporting.
#[derive(Debug, Clone, Serialize)]
pub struct RouteRecord {
    pub start: (f64, f64),
    pub end: (f64, f64),
    pub distance_m: f64,
    pub risk_level: f64,
    pub routable: bool,
}
