//! Route query facade: endpoint snapping, mode resolution, warning
//! generation, and evacuation-center routing.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::astar::{
    k_shortest_paths, path_coordinates, path_metrics, risk_aware_astar, CostWeights, FoundPath,
};
use crate::evacuation::EvacuationDirectory;
use masfro_core::{haversine_m, EvacuationCenter, RoadNetwork, SpatialIndex};

/// Explicit routing mode; wins over the boolean preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteType {
    Safest,
    Balanced,
    Fastest,
    Baseline,
}

impl RouteType {
    pub fn weights(&self) -> CostWeights {
        match self {
            RouteType::Safest => CostWeights::SAFEST,
            RouteType::Balanced => CostWeights::BALANCED,
            RouteType::Fastest => CostWeights::FASTEST,
            RouteType::Baseline => CostWeights::BASELINE,
        }
    }
}

/// Closed routing preference record. An unknown preference is a type error
/// here rather than a silently ignored dictionary key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RoutePreferences {
    /// Increase the risk blend (the evacuation default)
    pub avoid_floods: bool,
    /// Bias toward distance instead
    pub fastest: bool,
    /// Explicit mode selector; wins over the booleans
    #[serde(default)]
    pub route_type: Option<RouteType>,
}

impl Default for RoutePreferences {
    fn default() -> Self {
        Self {
            avoid_floods: true,
            fastest: false,
            route_type: None,
        }
    }
}

impl RoutePreferences {
    /// Resolve to a concrete mode: explicit type, then `fastest`, then the
    /// `avoid_floods` default.
    pub fn resolve(&self) -> RouteType {
        if let Some(t) = self.route_type {
            return t;
        }
        if self.fastest {
            RouteType::Fastest
        } else if self.avoid_floods {
            RouteType::Safest
        } else {
            RouteType::Balanced
        }
    }
}

/// Router tunables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Endpoint snap cap in meters
    pub max_snap_m: f64,
    /// Assumed travel speed for time estimates (slow urban driving)
    pub travel_speed_mps: f64,
    /// Epsilon in the risk penalty denominator
    pub penalty_epsilon: f64,
    /// How many nearest centers to try in evacuation routing
    pub center_candidates: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_snap_m: 500.0,
            travel_speed_mps: 3.3,
            penalty_epsilon: 1e-3,
            center_candidates: 5,
        }
    }
}

/// Value-typed routing outcome. A request that cannot be served safely still
/// returns a result: empty path, `risk_level = 1.0`, explanatory warnings.
#[derive(Debug, Clone, Serialize)]
pub struct RouteResult {
    /// Ordered (lat, lon) coordinates along the path; empty when unroutable
    pub path: Vec<(f64, f64)>,
    pub distance_m: f64,
    pub estimated_time_s: f64,
    /// Length-weighted average edge risk
    pub risk_level: f64,
    pub max_risk: f64,
    pub num_segments: usize,
    pub warnings: Vec<String>,
}

impl RouteResult {
    /// The no-route fallback shape shared by snap and search failures.
    fn unroutable(reason: &str) -> Self {
        Self {
            path: Vec::new(),
            distance_m: 0.0,
            estimated_time_s: 0.0,
            risk_level: 1.0,
            max_risk: 1.0,
            num_segments: 0,
            warnings: vec![format!("No safe route found: {}", reason)],
        }
    }

    pub fn is_routable(&self) -> bool {
        !self.path.is_empty()
    }
}

/// Risk-aware route query engine. Stateless apart from its configuration; the
/// graph and index are borrowed per call so routing can never outlive a tick's
/// risk snapshot.
#[derive(Debug, Clone, Default)]
pub struct Router {
    config: RouterConfig,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    fn snap(&self, index: &SpatialIndex, lat: f64, lon: f64) -> Option<petgraph::graph::NodeIndex> {
        index.nearest_node(lat, lon, self.config.max_snap_m)
    }

    /// Risk-aware route between two WGS84 points.
    pub fn route(
        &self,
        network: &RoadNetwork,
        index: &SpatialIndex,
        start: (f64, f64),
        end: (f64, f64),
        prefs: &RoutePreferences,
    ) -> RouteResult {
        let weights = prefs.resolve().weights();
        self.route_with_weights(network, index, start, end, weights)
    }

    /// Distance-only route, for validation and comparison against the
    /// risk-aware modes.
    pub fn baseline_route(
        &self,
        network: &RoadNetwork,
        index: &SpatialIndex,
        start: (f64, f64),
        end: (f64, f64),
    ) -> RouteResult {
        self.route_with_weights(network, index, start, end, CostWeights::BASELINE)
    }

    fn route_with_weights(
        &self,
        network: &RoadNetwork,
        index: &SpatialIndex,
        start: (f64, f64),
        end: (f64, f64),
        weights: CostWeights,
    ) -> RouteResult {
        let Some(start_node) = self.snap(index, start.0, start.1) else {
            return RouteResult::unroutable(&format!(
                "no road node within {:.0} m of start ({:.4}, {:.4})",
                self.config.max_snap_m, start.0, start.1
            ));
        };
        let Some(end_node) = self.snap(index, end.0, end.1) else {
            return RouteResult::unroutable(&format!(
                "no road node within {:.0} m of destination ({:.4}, {:.4})",
                self.config.max_snap_m, end.0, end.1
            ));
        };

        let found = risk_aware_astar(
            network,
            start_node,
            end_node,
            weights,
            self.config.penalty_epsilon,
            &HashSet::new(),
            &HashSet::new(),
        );
        match found {
            Some(path) => self.into_result(network, &path),
            None => RouteResult::unroutable("destination unreachable on the road network"),
        }
    }

    /// Up to `k` alternatives, each differing from the previous by at least
    /// one edge, best first.
    pub fn k_alternatives(
        &self,
        network: &RoadNetwork,
        index: &SpatialIndex,
        start: (f64, f64),
        end: (f64, f64),
        k: usize,
        prefs: &RoutePreferences,
    ) -> Vec<RouteResult> {
        let (Some(start_node), Some(end_node)) = (
            self.snap(index, start.0, start.1),
            self.snap(index, end.0, end.1),
        ) else {
            return Vec::new();
        };
        let weights = prefs.resolve().weights();
        k_shortest_paths(
            network,
            start_node,
            end_node,
            k,
            weights,
            self.config.penalty_epsilon,
        )
        .iter()
        .map(|p| self.into_result(network, p))
        .collect()
    }

    /// Route to the best reachable evacuation center: try the configured
    /// number of nearest available centers and keep the cheapest route.
    pub fn route_to_nearest_center(
        &self,
        network: &RoadNetwork,
        index: &SpatialIndex,
        directory: &EvacuationDirectory,
        start: (f64, f64),
    ) -> Option<(EvacuationCenter, RouteResult)> {
        let mut candidates: Vec<&EvacuationCenter> = directory.list_available();
        candidates.sort_by(|a, b| {
            let da = haversine_m(start.0, start.1, a.lat, a.lon);
            let db = haversine_m(start.0, start.1, b.lat, b.lon);
            da.partial_cmp(&db)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });

        let prefs = RoutePreferences::default();
        let mut best: Option<(EvacuationCenter, RouteResult)> = None;
        for center in candidates.into_iter().take(self.config.center_candidates) {
            let result = self.route(network, index, start, (center.lat, center.lon), &prefs);
            if !result.is_routable() {
                continue;
            }
            let better = match &best {
                None => true,
                Some((_, current)) => result.distance_m < current.distance_m,
            };
            if better {
                best = Some((center.clone(), result));
            }
        }
        debug!(
            found = best.is_some(),
            "nearest evacuation center routing complete"
        );
        best
    }

    fn into_result(&self, network: &RoadNetwork, path: &FoundPath) -> RouteResult {
        let metrics = path_metrics(network, path, self.config.travel_speed_mps);
        let warnings = generate_warnings(metrics.average_risk, metrics.max_risk, metrics.distance_m);
        RouteResult {
            path: path_coordinates(network, path),
            distance_m: metrics.distance_m,
            estimated_time_s: metrics.estimated_time_s,
            risk_level: metrics.average_risk,
            max_risk: metrics.max_risk,
            num_segments: metrics.num_segments,
            warnings,
        }
    }
}

/// Threshold-derived route warnings.
fn generate_warnings(average_risk: f64, max_risk: f64, distance_m: f64) -> Vec<String> {
    let mut warnings = Vec::new();
    if max_risk >= 0.9 {
        warnings.push("CRITICAL risk: route passes through severely flooded areas".to_string());
    } else if max_risk >= 0.7 {
        warnings.push("WARNING: route passes near flooded areas".to_string());
    }
    if average_risk >= 0.5 {
        warnings.push("CAUTION: elevated flood risk along most of this route".to_string());
    }
    if distance_m > 10_000.0 {
        warnings.push("Long route: over 10 km; consider sheltering in place".to_string());
    }
    warnings
}
