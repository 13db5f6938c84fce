//! # masfro-routing: Risk-Aware Routing and Evacuation Directory
//!
//! A* shortest paths over the risk-weighted road multigraph, plus the
//! in-memory evacuation center directory.
//!
//! The router blends distance against fused flood risk with a mode-dependent
//! `(alpha, beta)` pair:
//!
//! ```text
//! cost(edge) = alpha * length + beta * length * penalty(risk)
//! penalty(r) = r / (1 - r + eps)
//! ```
//!
//! The penalty diverges as risk approaches 1, so a severely flooded edge
//! prices itself out of every route without a hard block. The A* heuristic is
//! the Haversine distance scaled by `alpha`, which keeps it admissible for
//! every mode.
//!
//! Routing failures are value-typed: an unroutable request returns a
//! [`RouteResult`] with an empty path, `risk_level = 1.0` and a human-readable
//! warning, never an error.

pub mod astar;
pub mod evacuation;
pub mod router;

pub use astar::{risk_penalty, CostWeights, PathMetrics};
pub use evacuation::{EvacuationDirectory, EvacueeUpdate};
pub use router::{RoutePreferences, RouteResult, RouteType, Router, RouterConfig};
