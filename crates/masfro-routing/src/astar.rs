//! Risk-weighted A* and k-shortest-paths over the road multigraph.
//!
//! Determinism contract: ties in the open set break on the smaller external
//! node id, so repeated searches over identical graph state return identical
//! paths.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use petgraph::prelude::*;
use petgraph::visit::EdgeRef;
use serde::Serialize;

use masfro_core::{haversine_m, NodeId, RoadNetwork};

/// Mode-dependent blend of distance (`alpha`) and risk penalty (`beta`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostWeights {
    pub alpha: f64,
    pub beta: f64,
}

impl CostWeights {
    pub const SAFEST: CostWeights = CostWeights { alpha: 0.2, beta: 0.8 };
    pub const BALANCED: CostWeights = CostWeights { alpha: 0.5, beta: 0.5 };
    pub const FASTEST: CostWeights = CostWeights { alpha: 0.8, beta: 0.2 };
    pub const BASELINE: CostWeights = CostWeights { alpha: 1.0, beta: 0.0 };
}

/// Monotone risk penalty that diverges as risk approaches 1.
///
/// An edge at risk ~0.9 already costs ten times its length in the risk term,
/// so the router treats it as effectively impassable without a hard block.
pub fn risk_penalty(risk: f64, epsilon: f64) -> f64 {
    let r = risk.clamp(0.0, 1.0);
    r / (1.0 - r + epsilon)
}

fn edge_cost(edge: &masfro_core::RoadEdge, weights: CostWeights, epsilon: f64) -> f64 {
    weights.alpha * edge.length_m + weights.beta * edge.length_m * risk_penalty(edge.risk_score, epsilon)
}

/// A found path with its node/edge sequence and total search cost.
#[derive(Debug, Clone)]
pub struct FoundPath {
    pub nodes: Vec<NodeIndex>,
    pub edges: Vec<EdgeIndex>,
    pub cost: f64,
}

/// Heap entry ordered for a min-heap on (f_cost, node id).
struct OpenEntry {
    f_cost: f64,
    node: NodeIndex,
    id: NodeId,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.f_cost == other.f_cost && self.id == other.id
    }
}
impl Eq for OpenEntry {}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the lowest f pops first, then
        // break ties on the smaller external node id for determinism.
        other
            .f_cost
            .partial_cmp(&self.f_cost)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.id.cmp(&self.id))
    }
}
impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Risk-aware A* from `start` to `goal` with optional banned nodes/edges
/// (used by the k-alternatives deviation search).
pub fn risk_aware_astar(
    network: &RoadNetwork,
    start: NodeIndex,
    goal: NodeIndex,
    weights: CostWeights,
    epsilon: f64,
    banned_nodes: &HashSet<NodeIndex>,
    banned_edges: &HashSet<EdgeIndex>,
) -> Option<FoundPath> {
    if banned_nodes.contains(&start) || banned_nodes.contains(&goal) {
        return None;
    }
    let goal_node = &network.graph[goal];
    let h = |idx: NodeIndex| -> f64 {
        let n = &network.graph[idx];
        weights.alpha * haversine_m(n.lat, n.lon, goal_node.lat, goal_node.lon)
    };

    let mut open = BinaryHeap::new();
    let mut g_score: HashMap<NodeIndex, f64> = HashMap::new();
    let mut came_from: HashMap<NodeIndex, (NodeIndex, EdgeIndex)> = HashMap::new();

    g_score.insert(start, 0.0);
    open.push(OpenEntry {
        f_cost: h(start),
        node: start,
        id: network.graph[start].id,
    });

    while let Some(OpenEntry { f_cost, node, .. }) = open.pop() {
        let g = g_score[&node];
        // Stale entry from a later improvement
        if f_cost > g + h(node) + 1e-9 {
            continue;
        }
        if node == goal {
            return Some(reconstruct(&came_from, start, goal, g));
        }
        for edge in network.graph.edges_directed(node, Outgoing) {
            if banned_edges.contains(&edge.id()) || banned_nodes.contains(&edge.target()) {
                continue;
            }
            let next = edge.target();
            let tentative = g + edge_cost(edge.weight(), weights, epsilon);
            let improved = match g_score.get(&next) {
                Some(&known) => tentative < known - 1e-12,
                None => true,
            };
            if improved {
                g_score.insert(next, tentative);
                came_from.insert(next, (node, edge.id()));
                open.push(OpenEntry {
                    f_cost: tentative + h(next),
                    node: next,
                    id: network.graph[next].id,
                });
            }
        }
    }
    None
}

fn reconstruct(
    came_from: &HashMap<NodeIndex, (NodeIndex, EdgeIndex)>,
    start: NodeIndex,
    goal: NodeIndex,
    cost: f64,
) -> FoundPath {
    let mut nodes = vec![goal];
    let mut edges = Vec::new();
    let mut current = goal;
    while current != start {
        let (prev, edge) = came_from[&current];
        nodes.push(prev);
        edges.push(edge);
        current = prev;
    }
    nodes.reverse();
    edges.reverse();
    FoundPath { nodes, edges, cost }
}

/// Yen-style k-shortest paths with risk-weighted costs.
///
/// Each returned alternative differs from every earlier one by at least one
/// edge; full edge-disjointness is not required.
pub fn k_shortest_paths(
    network: &RoadNetwork,
    start: NodeIndex,
    goal: NodeIndex,
    k: usize,
    weights: CostWeights,
    epsilon: f64,
) -> Vec<FoundPath> {
    let no_nodes = HashSet::new();
    let no_edges = HashSet::new();
    let Some(first) = risk_aware_astar(network, start, goal, weights, epsilon, &no_nodes, &no_edges)
    else {
        return Vec::new();
    };

    let mut found: Vec<FoundPath> = vec![first];
    let mut candidates: Vec<FoundPath> = Vec::new();

    while found.len() < k {
        let prev = found.last().expect("at least one found path").clone();
        for i in 0..prev.nodes.len() - 1 {
            let spur_node = prev.nodes[i];
            let root_nodes = &prev.nodes[..=i];
            let root_edges = &prev.edges[..i];

            // Ban the next edge of every found path sharing this root, so the
            // spur search must deviate here.
            let mut banned_edges = HashSet::new();
            for path in &found {
                if path.nodes.len() > i && path.nodes[..=i] == *root_nodes {
                    if let Some(&edge) = path.edges.get(i) {
                        banned_edges.insert(edge);
                    }
                }
            }
            // Keep the spur from looping back through the root
            let banned_nodes: HashSet<NodeIndex> =
                root_nodes[..i].iter().copied().collect();

            let Some(spur) = risk_aware_astar(
                network, spur_node, goal, weights, epsilon, &banned_nodes, &banned_edges,
            ) else {
                continue;
            };

            let root_cost: f64 = root_edges
                .iter()
                .map(|&e| edge_cost(&network.graph[e], weights, epsilon))
                .sum();
            let mut nodes = root_nodes[..i].to_vec();
            nodes.extend(spur.nodes.iter().copied());
            let mut edges = root_edges.to_vec();
            edges.extend(spur.edges.iter().copied());
            let candidate = FoundPath {
                nodes,
                edges,
                cost: root_cost + spur.cost,
            };

            let duplicate = found.iter().chain(candidates.iter()).any(|p| p.edges == candidate.edges);
            if !duplicate {
                candidates.push(candidate);
            }
        }

        if candidates.is_empty() {
            break;
        }
        // Lowest-cost candidate next; ties break on the edge sequence for
        // reproducibility.
        candidates.sort_by(|a, b| {
            a.cost
                .partial_cmp(&b.cost)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.edges.cmp(&b.edges))
        });
        found.push(candidates.remove(0));
    }

    found
}

/// Distance/risk/timing summary of a path.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PathMetrics {
    pub distance_m: f64,
    pub estimated_time_s: f64,
    /// Length-weighted average of edge risks
    pub average_risk: f64,
    pub max_risk: f64,
    pub num_segments: usize,
}

/// Compute metrics over a path's edges with an assumed travel speed.
pub fn path_metrics(network: &RoadNetwork, path: &FoundPath, travel_speed_mps: f64) -> PathMetrics {
    let mut metrics = PathMetrics {
        num_segments: path.edges.len(),
        ..PathMetrics::default()
    };
    let mut risk_length = 0.0;
    for &edge_idx in &path.edges {
        let edge = &network.graph[edge_idx];
        metrics.distance_m += edge.length_m;
        risk_length += edge.risk_score * edge.length_m;
        metrics.max_risk = metrics.max_risk.max(edge.risk_score);
    }
    if metrics.distance_m > 0.0 {
        metrics.average_risk = risk_length / metrics.distance_m;
    }
    if travel_speed_mps > 0.0 {
        metrics.estimated_time_s = metrics.distance_m / travel_speed_mps;
    }
    metrics
}

/// Path as (lat, lon) coordinates for the caller.
pub fn path_coordinates(network: &RoadNetwork, path: &FoundPath) -> Vec<(f64, f64)> {
    path.nodes
        .iter()
        .map(|&idx| {
            let n = &network.graph[idx];
            (n.lat, n.lon)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use masfro_core::{RoadEdge, RoadNode};

    /// Diamond: 1 -> 2 -> 4 (short, via north) and 1 -> 3 -> 4 (longer, via
    /// south). Coordinates roughly consistent with the lengths.
    fn diamond() -> (RoadNetwork, NodeIndex, NodeIndex) {
        let mut network = RoadNetwork::new();
        let a = network.add_road_node(RoadNode::new(NodeId::new(1), 121.100, 14.650));
        network.add_road_node(RoadNode::new(NodeId::new(2), 121.105, 14.652));
        network.add_road_node(RoadNode::new(NodeId::new(3), 121.105, 14.648));
        let d = network.add_road_node(RoadNode::new(NodeId::new(4), 121.110, 14.650));
        for (f, t, len) in [(1, 2, 600.0), (2, 4, 600.0), (1, 3, 700.0), (3, 4, 700.0)] {
            network
                .add_road_edge(RoadEdge::new(NodeId::new(f), NodeId::new(t), 0, len))
                .unwrap();
        }
        (network, a, d)
    }

    fn ids(network: &RoadNetwork, path: &FoundPath) -> Vec<i64> {
        path.nodes.iter().map(|&n| network.graph[n].id.value()).collect()
    }

    #[test]
    fn test_astar_prefers_short_path_when_dry() {
        let (network, start, goal) = diamond();
        let path = risk_aware_astar(
            &network,
            start,
            goal,
            CostWeights::SAFEST,
            1e-3,
            &HashSet::new(),
            &HashSet::new(),
        )
        .unwrap();
        assert_eq!(ids(&network, &path), vec![1, 2, 4]);
    }

    #[test]
    fn test_astar_detours_around_risk() {
        let (mut network, start, goal) = diamond();
        network
            .update_edge_risk(NodeId::new(1), NodeId::new(2), 0, 0.95)
            .unwrap();
        let path = risk_aware_astar(
            &network,
            start,
            goal,
            CostWeights::SAFEST,
            1e-3,
            &HashSet::new(),
            &HashSet::new(),
        )
        .unwrap();
        assert_eq!(ids(&network, &path), vec![1, 3, 4]);
    }

    #[test]
    fn test_baseline_ignores_risk() {
        let (mut network, start, goal) = diamond();
        network
            .update_edge_risk(NodeId::new(1), NodeId::new(2), 0, 0.95)
            .unwrap();
        let path = risk_aware_astar(
            &network,
            start,
            goal,
            CostWeights::BASELINE,
            1e-3,
            &HashSet::new(),
            &HashSet::new(),
        )
        .unwrap();
        assert_eq!(ids(&network, &path), vec![1, 2, 4]);
    }

    #[test]
    fn test_astar_no_path() {
        let mut network = RoadNetwork::new();
        let a = network.add_road_node(RoadNode::new(NodeId::new(1), 121.100, 14.650));
        let b = network.add_road_node(RoadNode::new(NodeId::new(2), 121.110, 14.650));
        assert!(risk_aware_astar(
            &network,
            a,
            b,
            CostWeights::BALANCED,
            1e-3,
            &HashSet::new(),
            &HashSet::new(),
        )
        .is_none());
    }

    #[test]
    fn test_astar_deterministic_over_equal_cost_ties() {
        // Two parallel edges with identical cost; the run must be repeatable.
        let mut network = RoadNetwork::new();
        let a = network.add_road_node(RoadNode::new(NodeId::new(1), 121.100, 14.650));
        let b = network.add_road_node(RoadNode::new(NodeId::new(2), 121.105, 14.650));
        network
            .add_road_edge(RoadEdge::new(NodeId::new(1), NodeId::new(2), 0, 500.0))
            .unwrap();
        network
            .add_road_edge(RoadEdge::new(NodeId::new(1), NodeId::new(2), 1, 500.0))
            .unwrap();

        let run = || {
            risk_aware_astar(
                &network,
                a,
                b,
                CostWeights::BALANCED,
                1e-3,
                &HashSet::new(),
                &HashSet::new(),
            )
            .unwrap()
            .edges
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_risk_penalty_shape() {
        assert_eq!(risk_penalty(0.0, 1e-3), 0.0);
        assert!(risk_penalty(0.5, 1e-3) < risk_penalty(0.9, 1e-3));
        // Near-impassable edges cost orders of magnitude more than their length
        assert!(risk_penalty(0.95, 1e-3) > 10.0);
        assert!(risk_penalty(1.0, 1e-3) >= 999.0);
        // Out-of-range input clamps instead of going negative
        assert_eq!(risk_penalty(-0.5, 1e-3), 0.0);
    }

    #[test]
    fn test_k_shortest_paths_distinct() {
        let (network, start, goal) = diamond();
        let paths = k_shortest_paths(&network, start, goal, 3, CostWeights::BALANCED, 1e-3);
        assert_eq!(paths.len(), 2); // only two simple routes exist
        assert_eq!(ids(&network, &paths[0]), vec![1, 2, 4]);
        assert_eq!(ids(&network, &paths[1]), vec![1, 3, 4]);
        assert_ne!(paths[0].edges, paths[1].edges);
        assert!(paths[0].cost <= paths[1].cost);
    }

    #[test]
    fn test_k_shortest_uses_parallel_edge() {
        let (mut network, start, goal) = diamond();
        // A second carriageway on 1 -> 2, slightly longer
        network
            .add_road_edge(RoadEdge::new(NodeId::new(1), NodeId::new(2), 1, 650.0))
            .unwrap();
        let paths = k_shortest_paths(&network, start, goal, 3, CostWeights::BASELINE, 1e-3);
        assert_eq!(paths.len(), 3);
        // Same node sequence is allowed when the edge set differs
        assert_eq!(ids(&network, &paths[0]), vec![1, 2, 4]);
        assert_eq!(ids(&network, &paths[1]), vec![1, 2, 4]);
        assert_ne!(paths[0].edges, paths[1].edges);
    }

    #[test]
    fn test_path_metrics() {
        let (mut network, start, goal) = diamond();
        network
            .update_edge_risk(NodeId::new(1), NodeId::new(2), 0, 0.4)
            .unwrap();
        let path = risk_aware_astar(
            &network,
            start,
            goal,
            CostWeights::BASELINE,
            1e-3,
            &HashSet::new(),
            &HashSet::new(),
        )
        .unwrap();
        let metrics = path_metrics(&network, &path, 3.0);

        assert_eq!(metrics.num_segments, 2);
        assert_eq!(metrics.distance_m, 1200.0);
        assert_eq!(metrics.estimated_time_s, 400.0);
        assert_eq!(metrics.max_risk, 0.4);
        // Length-weighted: (0.4 * 600 + 0 * 600) / 1200
        assert!((metrics.average_risk - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_path_coordinates_order() {
        let (network, start, goal) = diamond();
        let path = risk_aware_astar(
            &network,
            start,
            goal,
            CostWeights::BASELINE,
            1e-3,
            &HashSet::new(),
            &HashSet::new(),
        )
        .unwrap();
        let coords = path_coordinates(&network, &path);
        assert_eq!(coords.first(), Some(&(14.650, 121.100)));
        assert_eq!(coords.last(), Some(&(14.650, 121.110)));
    }
}
