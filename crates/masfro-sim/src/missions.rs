//! Typed mission boundary for the external orchestrator.
//!
//! Four fixed mission shapes; no natural-language interpretation happens
//! here. Each mission executes synchronously against the current snapshot and
//! returns a discriminated result.

use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::Query;
use crate::orchestrator::Orchestrator;
use masfro_core::EvacuationCenter;
use masfro_hazard::FusionReport;
use masfro_routing::{RoutePreferences, RouteResult};

/// Radius for point risk assessment, meters.
const ASSESS_RADIUS_M: f64 = 500.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MissionId(Uuid);

impl MissionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MissionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A typed mission request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mission", rename_all = "snake_case")]
pub enum Mission {
    /// How dangerous is the area around a point right now?
    AssessRisk { location: (f64, f64) },
    /// Compute a route with explicit preferences.
    RouteCalculation {
        start: (f64, f64),
        end: (f64, f64),
        prefs: RoutePreferences,
    },
    /// Guide a person to the best reachable evacuation center.
    CoordinatedEvacuation {
        user_location: (f64, f64),
        severity: f64,
    },
    /// Force a fusion pass over the currently cached data.
    CascadeRiskUpdate {},
}

/// Discriminated mission outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MissionOutcome {
    RiskAssessment {
        location: (f64, f64),
        edges_considered: usize,
        mean_risk: f64,
        max_risk: f64,
    },
    Route(RouteResult),
    Evacuation {
        center: Option<EvacuationCenter>,
        route: Option<RouteResult>,
        /// Set when no center can be reached safely; consumers decide whether
        /// to present a shelter-in-place recommendation
        advisory: Option<String>,
    },
    RiskUpdate(FusionReport),
}

#[derive(Debug, Clone, Serialize)]
pub struct MissionResult {
    #[serde(skip)]
    pub id: MissionId,
    pub outcome: MissionOutcome,
}

impl Orchestrator {
    /// Execute a typed mission against the current snapshot.
    pub fn execute_mission(&self, mission: Mission) -> MissionResult {
        let id = MissionId::new();
        let outcome = match mission {
            Mission::AssessRisk { location } => self.assess_risk(location),
            Mission::RouteCalculation { start, end, prefs } => {
                MissionOutcome::Route(self.route(start, end, &prefs))
            }
            Mission::CoordinatedEvacuation { user_location, .. } => {
                self.coordinated_evacuation(user_location)
            }
            Mission::CascadeRiskUpdate {} => self.cascade_risk_update(),
        };
        MissionResult { id, outcome }
    }

    fn assess_risk(&self, location: (f64, f64)) -> MissionOutcome {
        self.with_inner(|inner| {
            let engine = &inner.engine;
            let nearby = engine
                .index
                .nodes_within_radius(location.0, location.1, ASSESS_RADIUS_M);
            let mut seen = std::collections::HashSet::new();
            let mut sum = 0.0;
            let mut max: f64 = 0.0;
            for (node, _) in nearby {
                for edge in engine
                    .network
                    .graph
                    .edges_directed(node, petgraph::Direction::Outgoing)
                    .chain(
                        engine
                            .network
                            .graph
                            .edges_directed(node, petgraph::Direction::Incoming),
                    )
                {
                    if seen.insert(edge.id()) {
                        sum += edge.weight().risk_score;
                        max = max.max(edge.weight().risk_score);
                    }
                }
            }
            let edges_considered = seen.len();
            MissionOutcome::RiskAssessment {
                location,
                edges_considered,
                mean_risk: if edges_considered > 0 {
                    sum / edges_considered as f64
                } else {
                    0.0
                },
                max_risk: max,
            }
        })
    }

    fn coordinated_evacuation(&self, user_location: (f64, f64)) -> MissionOutcome {
        match self.route_to_nearest_center(user_location) {
            Some((center, route)) if route.max_risk < 0.9 => MissionOutcome::Evacuation {
                center: Some(center),
                route: Some(route),
                advisory: None,
            },
            Some((center, route)) => MissionOutcome::Evacuation {
                center: Some(center),
                route: Some(route),
                advisory: Some(
                    "best available route crosses critically flooded segments".to_string(),
                ),
            },
            None => MissionOutcome::Evacuation {
                center: None,
                route: None,
                advisory: Some(
                    "no evacuation center reachable; shelter in place may be safer".to_string(),
                ),
            },
        }
    }

    /// Re-fuse from the currently cached scout/flood data without waiting for
    /// the next tick (empty bus batches, same scenario).
    fn cascade_risk_update(&self) -> MissionOutcome {
        let epoch = self.sim_epoch();
        self.with_inner(|inner| {
            let now = inner.simulated_now(epoch);
            let engine = &mut inner.engine;
            let report = engine.fusion.run(
                &mut engine.network,
                &engine.index,
                &engine.rasters,
                engine.terrain.as_ref(),
                &[],
                &[],
                now,
            );
            MissionOutcome::RiskUpdate(report)
        })
    }
}
