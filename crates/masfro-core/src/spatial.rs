//! Uniform grid index over road network nodes.
//!
//! Buckets nodes into fixed-size lat/lon cells so nearest-node and radius
//! queries touch only a handful of cells instead of scanning the whole graph.
//! The default cell size of 0.01 degrees is roughly a kilometer at tropical
//! latitudes, which keeps typical queries to a single ring of cells.

use std::collections::HashMap;

use crate::geo::haversine_m;
use crate::{NodeId, RoadNetwork};
use petgraph::graph::NodeIndex;

/// Default cell size in degrees (~1.1 km of latitude).
pub const DEFAULT_CELL_SIZE_DEG: f64 = 0.01;

/// Default snap cap for nearest-node queries, in meters.
pub const DEFAULT_MAX_SNAP_M: f64 = 500.0;

#[derive(Debug, Clone, Copy)]
struct IndexedNode {
    id: NodeId,
    idx: NodeIndex,
    lat: f64,
    lon: f64,
}

/// Grid index over graph nodes for nearest-node and radius queries.
///
/// Built once after graph load; the graph's connectivity (and therefore its
/// node set) is immutable at runtime, so the index never needs refreshing.
#[derive(Debug)]
pub struct SpatialIndex {
    cell_size_deg: f64,
    cells: HashMap<(i32, i32), Vec<IndexedNode>>,
}

impl SpatialIndex {
    /// Build an index over every node in the network with the default cell size.
    pub fn build(network: &RoadNetwork) -> Self {
        Self::build_with_cell_size(network, DEFAULT_CELL_SIZE_DEG)
    }

    pub fn build_with_cell_size(network: &RoadNetwork, cell_size_deg: f64) -> Self {
        let mut cells: HashMap<(i32, i32), Vec<IndexedNode>> = HashMap::new();
        for idx in network.graph.node_indices() {
            let node = &network.graph[idx];
            let entry = IndexedNode {
                id: node.id,
                idx,
                lat: node.lat,
                lon: node.lon,
            };
            cells
                .entry(Self::cell_key(node.lat, node.lon, cell_size_deg))
                .or_default()
                .push(entry);
        }
        // Deterministic in-cell order regardless of graph insertion order
        for bucket in cells.values_mut() {
            bucket.sort_by_key(|n| n.id);
        }
        Self {
            cell_size_deg,
            cells,
        }
    }

    fn cell_key(lat: f64, lon: f64, cell_size_deg: f64) -> (i32, i32) {
        (
            (lat / cell_size_deg).floor() as i32,
            (lon / cell_size_deg).floor() as i32,
        )
    }

    /// Nearest node within `max_distance_m` of the query point, or `None`.
    ///
    /// Searches the containing cell and expanding rings of neighbor cells
    /// until a candidate inside the cap is confirmed or the rings exhaust the
    /// cap's reach. Ties on distance break toward the smaller node id so
    /// repeated queries are stable.
    pub fn nearest_node(&self, lat: f64, lon: f64, max_distance_m: f64) -> Option<NodeIndex> {
        let (row, col) = Self::cell_key(lat, lon, self.cell_size_deg);
        // A ring at offset r is at least (r-1) whole cells away; stop once
        // that exceeds the cap. The narrower (longitude) cell extent is the
        // safe bound for both the ring cutoff and the early exit below.
        let cell_m = self.cell_size_deg * crate::geo::meters_per_degree_lon(lat);
        let max_ring = ((max_distance_m / cell_m).ceil() as i32 + 1).max(1);

        let mut best: Option<(f64, NodeId, NodeIndex)> = None;
        for ring in 0..=max_ring {
            for (r, c) in ring_cells(row, col, ring) {
                let Some(bucket) = self.cells.get(&(r, c)) else {
                    continue;
                };
                for n in bucket {
                    let d = haversine_m(lat, lon, n.lat, n.lon);
                    if d > max_distance_m {
                        continue;
                    }
                    let better = match &best {
                        None => true,
                        Some((bd, bid, _)) => d < *bd || (d == *bd && n.id < *bid),
                    };
                    if better {
                        best = Some((d, n.id, n.idx));
                    }
                }
            }
            // Ring k+1's nodes are at least k whole cells away, so a best hit
            // closer than that cannot be beaten by any later ring.
            if let Some((d, _, idx)) = best {
                if d <= (ring as f64) * cell_m || ring == max_ring {
                    return Some(idx);
                }
            }
        }
        best.map(|(_, _, idx)| idx)
    }

    /// Every node within `radius_m` of the query point, with its distance,
    /// sorted by node id for deterministic downstream accumulation.
    pub fn nodes_within_radius(&self, lat: f64, lon: f64, radius_m: f64) -> Vec<(NodeIndex, f64)> {
        let (row, col) = Self::cell_key(lat, lon, self.cell_size_deg);
        let cell_m = self.cell_size_deg * crate::geo::meters_per_degree_lon(lat);
        let reach = (radius_m / cell_m).ceil() as i32 + 1;

        let mut hits: Vec<(NodeId, NodeIndex, f64)> = Vec::new();
        for r in (row - reach)..=(row + reach) {
            for c in (col - reach)..=(col + reach) {
                let Some(bucket) = self.cells.get(&(r, c)) else {
                    continue;
                };
                for n in bucket {
                    let d = haversine_m(lat, lon, n.lat, n.lon);
                    if d <= radius_m {
                        hits.push((n.id, n.idx, d));
                    }
                }
            }
        }
        hits.sort_by_key(|(id, _, _)| *id);
        hits.into_iter().map(|(_, idx, d)| (idx, d)).collect()
    }

    /// Number of occupied cells (for diagnostics/logging).
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}

/// Cells forming the square ring at Chebyshev distance `ring` around (row, col).
fn ring_cells(row: i32, col: i32, ring: i32) -> Vec<(i32, i32)> {
    if ring == 0 {
        return vec![(row, col)];
    }
    let mut cells = Vec::with_capacity((8 * ring) as usize);
    for c in (col - ring)..=(col + ring) {
        cells.push((row - ring, c));
        cells.push((row + ring, c));
    }
    for r in (row - ring + 1)..(row + ring) {
        cells.push((r, col - ring));
        cells.push((r, col + ring));
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RoadEdge, RoadNode};

    fn sample_network() -> RoadNetwork {
        let mut network = RoadNetwork::new();
        // Small cluster around Nangka, Marikina
        network.add_road_node(RoadNode::new(NodeId::new(1), 121.1029, 14.6507));
        network.add_road_node(RoadNode::new(NodeId::new(2), 121.1040, 14.6510));
        network.add_road_node(RoadNode::new(NodeId::new(3), 121.1084, 14.6303));
        // Far-away node that must never win a capped query
        network.add_road_node(RoadNode::new(NodeId::new(4), 121.3000, 14.9000));
        network
            .add_road_edge(RoadEdge::new(NodeId::new(1), NodeId::new(2), 0, 120.0))
            .unwrap();
        network
    }

    #[test]
    fn test_nearest_node_exact_hit() {
        let network = sample_network();
        let index = SpatialIndex::build(&network);
        let idx = index.nearest_node(14.6507, 121.1029, 500.0).unwrap();
        assert_eq!(network.graph[idx].id, NodeId::new(1));
    }

    #[test]
    fn test_nearest_node_picks_closer_of_two() {
        let network = sample_network();
        let index = SpatialIndex::build(&network);
        // Slightly east of node 2
        let idx = index.nearest_node(14.6510, 121.1042, 500.0).unwrap();
        assert_eq!(network.graph[idx].id, NodeId::new(2));
    }

    #[test]
    fn test_nearest_node_respects_cap() {
        let network = sample_network();
        let index = SpatialIndex::build(&network);
        // Point ~2 km from the cluster, 500 m cap
        assert!(index.nearest_node(14.6700, 121.1200, 500.0).is_none());
    }

    #[test]
    fn test_nearest_node_crosses_cell_boundary() {
        let network = sample_network();
        // Tiny cells force the ring search to expand
        let index = SpatialIndex::build_with_cell_size(&network, 0.001);
        let idx = index.nearest_node(14.6490, 121.1010, 500.0).unwrap();
        assert_eq!(network.graph[idx].id, NodeId::new(1));
    }

    #[test]
    fn test_nodes_within_radius() {
        let network = sample_network();
        let index = SpatialIndex::build(&network);
        let hits = index.nodes_within_radius(14.6507, 121.1029, 200.0);
        let ids: Vec<NodeId> = hits.iter().map(|(idx, _)| network.graph[*idx].id).collect();
        assert_eq!(ids, vec![NodeId::new(1), NodeId::new(2)]);
        assert!(hits[0].1 < 1.0); // node 1 is at the query point
    }

    #[test]
    fn test_nodes_within_radius_empty() {
        let network = sample_network();
        let index = SpatialIndex::build(&network);
        assert!(index.nodes_within_radius(14.5000, 121.0000, 300.0).is_empty());
    }

    #[test]
    fn test_radius_results_sorted_by_id() {
        let network = sample_network();
        let index = SpatialIndex::build(&network);
        let hits = index.nodes_within_radius(14.6508, 121.1035, 5_000.0);
        let ids: Vec<i64> = hits
            .iter()
            .map(|(idx, _)| network.graph[*idx].id.value())
            .collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }
}
