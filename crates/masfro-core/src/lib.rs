//! # masfro-core: Road Network Modeling Core
//!
//! Provides the fundamental data structures and graph-based road network model
//! for flood-aware evacuation routing.
//!
//! ## Design Philosophy
//!
//! Road networks are modeled as **directed multigraphs** where:
//! - **Nodes**: road intersections with WGS84 coordinates and cached terrain attributes
//! - **Edges**: directed road segments with a length, static metadata, and a
//!   mutable flood risk score
//!
//! This graph-based approach enables:
//! - Fast topological queries (connectivity, incident edges)
//! - Parallel edges between the same node pair (separate carriageways), told
//!   apart by an explicit `key` discriminator
//! - Type-safe node access with newtype IDs
//! - A single authoritative per-edge `risk_score` that risk-aware routing reads
//!
//! ## Quick Start
//!
//! ```rust
//! use masfro_core::{NodeId, RoadNetwork, RoadNode, RoadEdge};
//!
//! let mut network = RoadNetwork::new();
//!
//! let a = network.add_road_node(RoadNode::new(NodeId::new(1), 121.1029, 14.6507));
//! let b = network.add_road_node(RoadNode::new(NodeId::new(2), 121.1084, 14.6303));
//!
//! network.add_road_edge(RoadEdge::new(NodeId::new(1), NodeId::new(2), 0, 250.0));
//!
//! // Risk is written only by hazard fusion; weight follows automatically.
//! network.update_edge_risk(NodeId::new(1), NodeId::new(2), 0, 0.4).unwrap();
//! assert_eq!(network.node_count(), 2);
//! # let _ = (a, b);
//! ```
//!
//! ## Core Data Structures
//!
//! - [`RoadNetwork`] - The main network container (petgraph `DiGraph<RoadNode, RoadEdge>`)
//! - [`RoadNode`] / [`RoadEdge`] - Graph element payloads
//! - [`NodeId`] - Stable external node identifier (OSM-style)
//! - [`EvacuationCenter`] - Physical refuge with capacity/occupancy tracking
//!
//! ## Modules
//!
//! - [`diagnostics`] - Import/validation issue reporting
//! - [`geo`] - Haversine distance and related geodesy helpers
//! - [`spatial`] - Uniform grid index for nearest-node and radius queries
//!
//! ## Integration with masfro-io
//!
//! The masfro-io crate provides CSV importers that construct [`RoadNetwork`]
//! graphs and evacuation center tables from on-disk data.

use petgraph::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod diagnostics;
pub mod error;
pub mod geo;
pub mod spatial;

pub use diagnostics::{DiagnosticIssue, Diagnostics, ImportDiagnostics, ImportStats, Severity};
pub use error::{MasfroError, MasfroResult};
pub use geo::haversine_m;
pub use petgraph::graph::{EdgeIndex, NodeIndex};
pub use spatial::SpatialIndex;

/// Stable external identifier for a road graph node.
///
/// Wraps the upstream map id (OSM-style, potentially large) so node ids are
/// never confused with petgraph indices, which are dense and internal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(i64);

impl NodeId {
    #[inline]
    pub fn new(value: i64) -> Self {
        NodeId(value)
    }
    #[inline]
    pub fn value(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A road graph vertex: WGS84 position plus cached terrain attributes.
///
/// Terrain attributes are `None` until the terrain service's batch
/// precomputation pass fills them during graph load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoadNode {
    pub id: NodeId,
    /// Longitude in degrees (WGS84)
    pub lon: f64,
    /// Latitude in degrees (WGS84)
    pub lat: f64,
    /// Ground elevation in meters, cached from the DEM
    pub elevation_m: Option<f64>,
    /// Terrain slope in degrees, cached from the DEM
    pub slope_deg: Option<f64>,
    /// Elevation minus local-window neighborhood mean (negative = depression)
    pub relative_elevation_m: Option<f64>,
    /// Elevation minus regional-window neighborhood mean (catches floodplains)
    pub regional_relative_elevation_m: Option<f64>,
}

impl RoadNode {
    pub fn new(id: NodeId, lon: f64, lat: f64) -> Self {
        Self {
            id,
            lon,
            lat,
            elevation_m: None,
            slope_deg: None,
            relative_elevation_m: None,
            regional_relative_elevation_m: None,
        }
    }
}

/// A directed road segment between two nodes.
///
/// `key` disambiguates parallel edges between the same ordered node pair.
/// `risk_score` is mutable and written only by hazard fusion; `weight` is
/// derived from it and always satisfies `weight >= length_m`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoadEdge {
    pub from: NodeId,
    pub to: NodeId,
    /// Discriminator for parallel edges between the same (from, to) pair
    pub key: u32,
    /// Segment length in meters, > 0
    pub length_m: f64,
    /// Road name, when the source data has one
    pub name: Option<String>,
    /// Highway classification tag (residential, primary, ...)
    pub highway: Option<String>,
    /// Fused flood risk in [0, 1]; 0 = dry baseline
    pub risk_score: f64,
    /// Routing weight: `length_m * (1 + risk_penalty * risk_score)`
    pub weight: f64,
}

impl RoadEdge {
    pub fn new(from: NodeId, to: NodeId, key: u32, length_m: f64) -> Self {
        Self {
            from,
            to,
            key,
            length_m,
            name: None,
            highway: None,
            risk_score: 0.0,
            weight: length_m,
        }
    }

    /// Attach road metadata.
    pub fn with_metadata(mut self, name: Option<String>, highway: Option<String>) -> Self {
        self.name = name;
        self.highway = highway;
        self
    }
}

/// Operational status of an evacuation center, derived from occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CenterStatus {
    Available,
    Limited,
    Full,
}

impl CenterStatus {
    /// Status is a pure function of occupancy vs capacity: full at >= 100%,
    /// limited at >= 70%, available below.
    pub fn from_occupancy(occupancy: u32, capacity: u32) -> Self {
        if capacity == 0 || occupancy >= capacity {
            CenterStatus::Full
        } else if occupancy as f64 / capacity as f64 >= 0.7 {
            CenterStatus::Limited
        } else {
            CenterStatus::Available
        }
    }
}

impl std::fmt::Display for CenterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CenterStatus::Available => "available",
            CenterStatus::Limited => "limited",
            CenterStatus::Full => "full",
        };
        write!(f, "{}", s)
    }
}

/// A physical refuge with tracked capacity and occupancy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvacuationCenter {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub capacity: u32,
    pub current_occupancy: u32,
    /// Facility type from the source table (school, gym, covered court, ...)
    pub center_type: Option<String>,
    pub status: CenterStatus,
}

impl EvacuationCenter {
    pub fn new(name: impl Into<String>, lat: f64, lon: f64, capacity: u32) -> Self {
        Self {
            name: name.into(),
            lat,
            lon,
            capacity,
            current_occupancy: 0,
            center_type: None,
            status: CenterStatus::from_occupancy(0, capacity),
        }
    }
}

/// The dynamic road network graph.
///
/// Connectivity is immutable at runtime; only per-edge `risk_score` (and the
/// derived `weight`) changes between graph reloads.
#[derive(Debug)]
pub struct RoadNetwork {
    pub graph: DiGraph<RoadNode, RoadEdge>,
    /// External id -> internal petgraph index
    node_index: HashMap<NodeId, NodeIndex>,
    /// How aggressively the derived weight penalizes risk (rho in
    /// `weight = length * (1 + rho * risk)`)
    risk_penalty: f64,
}

impl Default for RoadNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl RoadNetwork {
    pub fn new() -> Self {
        Self::with_risk_penalty(1.0)
    }

    pub fn with_risk_penalty(risk_penalty: f64) -> Self {
        Self {
            graph: DiGraph::new(),
            node_index: HashMap::new(),
            risk_penalty,
        }
    }

    pub fn risk_penalty(&self) -> f64 {
        self.risk_penalty
    }

    /// Add a node, returning its internal index. A duplicate external id
    /// returns the existing index unchanged.
    pub fn add_road_node(&mut self, node: RoadNode) -> NodeIndex {
        if let Some(&idx) = self.node_index.get(&node.id) {
            return idx;
        }
        let id = node.id;
        let idx = self.graph.add_node(node);
        self.node_index.insert(id, idx);
        idx
    }

    /// Add a directed edge. Endpoints must already exist.
    pub fn add_road_edge(&mut self, edge: RoadEdge) -> MasfroResult<EdgeIndex> {
        let from = self.index_of(edge.from).ok_or_else(|| {
            MasfroError::Graph(format!("edge references unknown node {}", edge.from))
        })?;
        let to = self.index_of(edge.to).ok_or_else(|| {
            MasfroError::Graph(format!("edge references unknown node {}", edge.to))
        })?;
        if edge.length_m <= 0.0 {
            return Err(MasfroError::Validation(format!(
                "edge {} -> {} has non-positive length {}",
                edge.from, edge.to, edge.length_m
            )));
        }
        Ok(self.graph.add_edge(from, to, edge))
    }

    /// Internal index for an external node id.
    pub fn index_of(&self, id: NodeId) -> Option<NodeIndex> {
        self.node_index.get(&id).copied()
    }

    pub fn node(&self, id: NodeId) -> Option<&RoadNode> {
        self.index_of(id).map(|idx| &self.graph[idx])
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Locate the parallel edge (from, to, key).
    pub fn find_edge(&self, from: NodeId, to: NodeId, key: u32) -> Option<EdgeIndex> {
        let (from, to) = (self.index_of(from)?, self.index_of(to)?);
        self.graph
            .edges_connecting(from, to)
            .find(|e| e.weight().key == key)
            .map(|e| e.id())
    }

    /// Write a new risk score onto one edge, clamping into [0, 1] and
    /// recomputing the derived routing weight.
    ///
    /// Hazard fusion is the only authorized caller; any other writer is a bug.
    pub fn update_edge_risk(
        &mut self,
        from: NodeId,
        to: NodeId,
        key: u32,
        risk: f64,
    ) -> MasfroResult<()> {
        let edge_idx = self.find_edge(from, to, key).ok_or_else(|| {
            MasfroError::Graph(format!("no edge {} -> {} (key {})", from, to, key))
        })?;
        self.set_risk_at(edge_idx, risk);
        Ok(())
    }

    /// Same write path as [`update_edge_risk`](Self::update_edge_risk), keyed
    /// by internal edge index. Used by fusion's bulk write-back.
    pub fn set_risk_at(&mut self, edge: EdgeIndex, risk: f64) {
        let rho = self.risk_penalty;
        let e = &mut self.graph[edge];
        e.risk_score = risk.clamp(0.0, 1.0);
        e.weight = e.length_m * (1.0 + rho * e.risk_score);
    }

    /// Bulk-zero risk on every edge. Used by orchestrator reset.
    pub fn reset_risk(&mut self) {
        for e in self.graph.edge_weights_mut() {
            e.risk_score = 0.0;
            e.weight = e.length_m;
        }
    }

    /// Compute network-level statistics including the risk distribution.
    pub fn stats(&self) -> NetworkStats {
        let mut stats = NetworkStats {
            num_nodes: self.graph.node_count(),
            num_edges: self.graph.edge_count(),
            min_risk: if self.graph.edge_count() > 0 { 1.0 } else { 0.0 },
            ..NetworkStats::default()
        };
        let mut risk_sum = 0.0;
        for e in self.graph.edge_weights() {
            stats.total_length_m += e.length_m;
            risk_sum += e.risk_score;
            stats.min_risk = stats.min_risk.min(e.risk_score);
            stats.max_risk = stats.max_risk.max(e.risk_score);
            if e.risk_score >= 0.7 {
                stats.high_risk_edges += 1;
            }
        }
        if stats.num_edges > 0 {
            stats.mean_risk = risk_sum / stats.num_edges as f64;
        }
        stats
    }

    /// Validate the network for common issues that break routing.
    ///
    /// Populates the provided `Diagnostics` with any warnings/errors found.
    pub fn validate_into(&self, diag: &mut Diagnostics) {
        if self.graph.node_count() == 0 {
            diag.add_error("structure", "Road network has no nodes");
            return;
        }
        if self.graph.edge_count() == 0 && self.graph.node_count() > 1 {
            diag.add_error("structure", "Road network has multiple nodes but no edges");
        }
        let isolated = self
            .graph
            .node_indices()
            .filter(|&n| self.graph.neighbors_undirected(n).next().is_none())
            .count();
        if isolated > 0 {
            diag.add_warning(
                "structure",
                &format!("{} isolated nodes are unreachable by routing", isolated),
            );
        }
        for e in self.graph.edge_weights() {
            if e.weight < e.length_m {
                diag.add_error_with_entity(
                    "risk",
                    "edge weight fell below its length",
                    &format!("{} -> {} (key {})", e.from, e.to, e.key),
                );
            }
        }
    }
}

/// Statistics about a network's size and current risk distribution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NetworkStats {
    pub num_nodes: usize,
    pub num_edges: usize,
    pub total_length_m: f64,
    pub min_risk: f64,
    pub mean_risk: f64,
    pub max_risk: f64,
    /// Edges with risk >= 0.7
    pub high_risk_edges: usize,
}

impl std::fmt::Display for NetworkStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} nodes, {} edges ({:.1} km), risk mean {:.3} max {:.3}, {} high-risk",
            self.num_nodes,
            self.num_edges,
            self.total_length_m / 1000.0,
            self.mean_risk,
            self.max_risk,
            self.high_risk_edges
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_node_network() -> RoadNetwork {
        let mut network = RoadNetwork::new();
        network.add_road_node(RoadNode::new(NodeId::new(1), 121.1029, 14.6507));
        network.add_road_node(RoadNode::new(NodeId::new(2), 121.1084, 14.6303));
        network
            .add_road_edge(RoadEdge::new(NodeId::new(1), NodeId::new(2), 0, 250.0))
            .unwrap();
        network
    }

    #[test]
    fn test_network_creation() {
        let network = two_node_network();
        assert_eq!(network.node_count(), 2);
        assert_eq!(network.edge_count(), 1);
        assert_eq!(network.node(NodeId::new(1)).unwrap().lat, 14.6507);
    }

    #[test]
    fn test_parallel_edges_by_key() {
        let mut network = two_node_network();
        network
            .add_road_edge(RoadEdge::new(NodeId::new(1), NodeId::new(2), 1, 260.0))
            .unwrap();

        assert_eq!(network.edge_count(), 2);
        let e0 = network.find_edge(NodeId::new(1), NodeId::new(2), 0).unwrap();
        let e1 = network.find_edge(NodeId::new(1), NodeId::new(2), 1).unwrap();
        assert_ne!(e0, e1);
        assert_eq!(network.graph[e1].length_m, 260.0);
    }

    #[test]
    fn test_update_edge_risk_clamps_and_reweights() {
        let mut network = two_node_network();
        network
            .update_edge_risk(NodeId::new(1), NodeId::new(2), 0, 1.7)
            .unwrap();

        let e = network.find_edge(NodeId::new(1), NodeId::new(2), 0).unwrap();
        assert_eq!(network.graph[e].risk_score, 1.0);
        assert_eq!(network.graph[e].weight, 500.0); // 250 * (1 + 1.0 * 1.0)

        network
            .update_edge_risk(NodeId::new(1), NodeId::new(2), 0, -0.3)
            .unwrap();
        let e = network.find_edge(NodeId::new(1), NodeId::new(2), 0).unwrap();
        assert_eq!(network.graph[e].risk_score, 0.0);
        assert_eq!(network.graph[e].weight, 250.0);
    }

    #[test]
    fn test_weight_monotone_in_risk() {
        let mut network = two_node_network();
        for risk in [0.0, 0.1, 0.5, 0.9, 1.0] {
            network
                .update_edge_risk(NodeId::new(1), NodeId::new(2), 0, risk)
                .unwrap();
            let e = network.find_edge(NodeId::new(1), NodeId::new(2), 0).unwrap();
            assert!(network.graph[e].weight >= network.graph[e].length_m);
        }
    }

    #[test]
    fn test_update_unknown_edge_fails() {
        let mut network = two_node_network();
        let err = network
            .update_edge_risk(NodeId::new(2), NodeId::new(1), 0, 0.5)
            .unwrap_err();
        assert!(matches!(err, MasfroError::Graph(_)));
    }

    #[test]
    fn test_reset_risk() {
        let mut network = two_node_network();
        network
            .update_edge_risk(NodeId::new(1), NodeId::new(2), 0, 0.8)
            .unwrap();
        network.reset_risk();
        let e = network.find_edge(NodeId::new(1), NodeId::new(2), 0).unwrap();
        assert_eq!(network.graph[e].risk_score, 0.0);
        assert_eq!(network.graph[e].weight, 250.0);
    }

    #[test]
    fn test_non_positive_length_rejected() {
        let mut network = two_node_network();
        let err = network
            .add_road_edge(RoadEdge::new(NodeId::new(1), NodeId::new(2), 2, 0.0))
            .unwrap_err();
        assert!(matches!(err, MasfroError::Validation(_)));
    }

    #[test]
    fn test_stats_risk_distribution() {
        let mut network = two_node_network();
        network.add_road_node(RoadNode::new(NodeId::new(3), 121.1100, 14.6400));
        network
            .add_road_edge(RoadEdge::new(NodeId::new(2), NodeId::new(3), 0, 100.0))
            .unwrap();
        network
            .update_edge_risk(NodeId::new(1), NodeId::new(2), 0, 0.9)
            .unwrap();

        let stats = network.stats();
        assert_eq!(stats.num_nodes, 3);
        assert_eq!(stats.num_edges, 2);
        assert_eq!(stats.high_risk_edges, 1);
        assert!((stats.mean_risk - 0.45).abs() < 1e-9);
        assert_eq!(stats.max_risk, 0.9);
    }

    #[test]
    fn test_validation_empty_network() {
        let network = RoadNetwork::new();
        let mut diag = Diagnostics::new();
        network.validate_into(&mut diag);
        assert!(diag.has_errors());
        assert!(diag.errors().any(|i| i.message.contains("no nodes")));
    }

    #[test]
    fn test_center_status_thresholds() {
        assert_eq!(CenterStatus::from_occupancy(0, 100), CenterStatus::Available);
        assert_eq!(CenterStatus::from_occupancy(69, 100), CenterStatus::Available);
        assert_eq!(CenterStatus::from_occupancy(70, 100), CenterStatus::Limited);
        assert_eq!(CenterStatus::from_occupancy(100, 100), CenterStatus::Full);
        assert_eq!(CenterStatus::from_occupancy(150, 100), CenterStatus::Full);
        assert_eq!(CenterStatus::from_occupancy(0, 0), CenterStatus::Full);
    }
}
