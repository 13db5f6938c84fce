//! Per-tick hazard fusion.
//!
//! One [`HazardFusion::run`] call re-scores every edge of the road network
//! from the active raster scenario, the cached scout reports, and the terrain
//! prior. The pipeline per invocation:
//!
//! 1. ingest the tick's scout/flood batches (validate, deduplicate, evict);
//! 2. fold station observations and label-keyed scout intensities into a
//!    global environmental factor;
//! 3. sample raster depth at edge endpoints and map depth to a base risk via
//!    a calibrated sigmoid;
//! 4. spread coordinate-bearing scout reports onto nearby edges with Gaussian
//!    spatial decay, combining overlapping reports as a weighted average
//!    (never a sum: accumulation is how risk used to run past 1.0);
//! 5. blend the three sources with configured weights and write edges whose
//!    risk moved more than epsilon back into the graph.
//!
//! Fusion never aborts a tick: invalid records are logged and dropped, raster
//! trouble degrades to "dry".

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use petgraph::prelude::*;
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::reports::{FloodObservation, ScoutKey, ScoutReport};
use masfro_core::{MasfroResult, RoadNetwork, SpatialIndex};
use masfro_geo::{FloodRasterService, ReturnPeriod, TerrainService, TIME_STEPS};

/// Tunables for hazard fusion. Defaults reproduce the calibrated production
/// behavior; the weights must sum to 1.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Weight of the raster-derived depth risk
    pub w_flood: f64,
    /// Weight of the crowdsourced scout risk
    pub w_scout: f64,
    /// Weight of the terrain prior
    pub w_historical: f64,
    /// Spatial reach of a scout report in meters; decay sigma is a third of it
    pub scout_radius_m: f64,
    /// Bounded scout cache capacity; oldest entries evict on overflow
    pub scout_cache_capacity: usize,
    /// Half-life for label intensity time decay, seconds
    pub scout_half_life_s: f64,
    /// Station observations and scout reports older than this are purged
    pub max_observation_age_s: f64,
    /// Depth->risk sigmoid steepness
    pub sigmoid_k: f64,
    /// Depth->risk sigmoid midpoint in meters (the impassable threshold)
    pub sigmoid_x0: f64,
    /// How strongly the environmental factor can lift the raster risk
    pub env_uplift: f64,
    /// Meters of depression mapping to a full terrain prior
    pub terrain_prior_scale_m: f64,
    /// Minimum risk change that triggers a graph write
    pub write_epsilon: f64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            w_flood: 0.5,
            w_scout: 0.3,
            w_historical: 0.2,
            scout_radius_m: 800.0,
            scout_cache_capacity: 5000,
            scout_half_life_s: 1800.0,
            max_observation_age_s: 3600.0,
            sigmoid_k: 8.0,
            sigmoid_x0: 0.3,
            env_uplift: 0.5,
            terrain_prior_scale_m: 5.0,
            write_epsilon: 1e-3,
        }
    }
}

/// Outcome of one fusion invocation, recorded into the tick report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FusionReport {
    pub return_period: Option<ReturnPeriod>,
    pub time_step: u8,
    pub scouts_accepted: usize,
    pub scouts_rejected: usize,
    pub duplicates_dropped: usize,
    pub floods_accepted: usize,
    pub floods_rejected: usize,
    pub environmental_factor: f64,
    pub edges_updated: usize,
    pub mean_risk: f64,
}

/// The hazard fusion engine. Owns the scout and flood caches; borrows the
/// graph mutably only for the duration of the write-back step.
#[derive(Debug)]
pub struct HazardFusion {
    config: FusionConfig,
    return_period: ReturnPeriod,
    time_step: u8,
    scout_cache: VecDeque<ScoutReport>,
    scout_seen: HashSet<ScoutKey>,
    flood_cache: HashMap<String, FloodObservation>,
}

impl HazardFusion {
    pub fn new(config: FusionConfig) -> Self {
        Self {
            config,
            return_period: ReturnPeriod::Rr01,
            time_step: 1,
            scout_cache: VecDeque::new(),
            scout_seen: HashSet::new(),
            flood_cache: HashMap::new(),
        }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Select the active raster scenario for subsequent runs.
    pub fn set_scenario(&mut self, return_period: ReturnPeriod, time_step: u8) -> MasfroResult<()> {
        if !(1..=TIME_STEPS).contains(&time_step) {
            return Err(masfro_core::MasfroError::InvalidTimeStep(
                time_step, TIME_STEPS,
            ));
        }
        self.return_period = return_period;
        self.time_step = time_step;
        Ok(())
    }

    pub fn scenario(&self) -> (ReturnPeriod, u8) {
        (self.return_period, self.time_step)
    }

    pub fn scout_cache_len(&self) -> usize {
        self.scout_cache.len()
    }

    /// Drop all accumulated scout and flood data. Used by orchestrator reset.
    pub fn clear_caches(&mut self) {
        self.scout_cache.clear();
        self.scout_seen.clear();
        self.flood_cache.clear();
    }

    /// Purge cached observations older than the configured max age.
    pub fn clear_old_data(&mut self, now: DateTime<Utc>) {
        let max_age = self.config.max_observation_age_s;
        self.flood_cache
            .retain(|_, obs| age_s(obs.timestamp(), now) <= max_age);
        while let Some(front) = self.scout_cache.front() {
            if age_s(front.timestamp, now) > max_age {
                let evicted = self.scout_cache.pop_front().unwrap();
                self.scout_seen.remove(&evicted.dedup_key());
            } else {
                break;
            }
        }
    }

    /// Ingest one scout report: validate, reject duplicates, push into the
    /// bounded deque (evicting the oldest entry and its dedup key on
    /// overflow). Returns whether the report was accepted.
    fn ingest_scout(&mut self, report: &ScoutReport, stats: &mut FusionReport) -> bool {
        if let Err(reason) = report.validate() {
            warn!(label = %report.location_label, %reason, "dropping invalid scout report");
            stats.scouts_rejected += 1;
            return false;
        }
        let key = report.dedup_key();
        if self.scout_seen.contains(&key) {
            stats.duplicates_dropped += 1;
            return false;
        }
        if self.scout_cache.len() == self.config.scout_cache_capacity {
            if let Some(evicted) = self.scout_cache.pop_front() {
                self.scout_seen.remove(&evicted.dedup_key());
            }
        }
        self.scout_seen.insert(key);
        self.scout_cache.push_back(report.clone());
        stats.scouts_accepted += 1;
        true
    }

    fn ingest_flood(&mut self, obs: &FloodObservation, stats: &mut FusionReport) {
        if let Err(reason) = obs.validate() {
            warn!(label = %obs.label(), %reason, "dropping invalid flood observation");
            stats.floods_rejected += 1;
            return;
        }
        self.flood_cache.insert(obs.label().to_string(), obs.clone());
        stats.floods_accepted += 1;
    }

    /// Label-keyed scout intensity: per label, the confidence- and
    /// time-decay-weighted average of severities. A weighted average, never a
    /// sum, so N identical reports read the same as one.
    pub fn label_intensities(&self, now: DateTime<Utc>) -> BTreeMap<String, f64> {
        let mut acc: BTreeMap<String, (f64, f64)> = BTreeMap::new();
        for report in &self.scout_cache {
            let decay = half_life_decay(age_s(report.timestamp, now), self.config.scout_half_life_s);
            let w = report.confidence * decay;
            if w <= 0.0 {
                continue;
            }
            let entry = acc.entry(report.location_label.clone()).or_insert((0.0, 0.0));
            entry.0 += report.severity * w;
            entry.1 += w;
        }
        acc.into_iter()
            .map(|(label, (num, den))| (label, num / den))
            .collect()
    }

    /// Global environmental factor: mean of station observation severities and
    /// label intensities of coordinate-less scout reports. Station data is
    /// too coarse for per-edge depth, but it tells us how bad the basin is.
    fn environmental_factor(&self, now: DateTime<Utc>) -> f64 {
        let mut values: Vec<f64> = self
            .flood_cache
            .values()
            .map(|obs| obs.severity())
            .collect();

        let mut acc: BTreeMap<&str, (f64, f64)> = BTreeMap::new();
        for report in &self.scout_cache {
            if report.coordinates.is_some() {
                continue;
            }
            let decay = half_life_decay(age_s(report.timestamp, now), self.config.scout_half_life_s);
            let w = report.confidence * decay;
            if w <= 0.0 {
                continue;
            }
            let entry = acc.entry(report.location_label.as_str()).or_insert((0.0, 0.0));
            entry.0 += report.severity * w;
            entry.1 += w;
        }
        values.extend(acc.values().map(|(num, den)| num / den));

        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }

    /// Effective fusion weights. Without a terrain service the historical
    /// weight is redistributed proportionally onto flood and scout so the
    /// weights keep summing to 1.
    fn effective_weights(&self, terrain_available: bool) -> (f64, f64, f64) {
        let c = &self.config;
        if terrain_available {
            (c.w_flood, c.w_scout, c.w_historical)
        } else {
            let base = c.w_flood + c.w_scout;
            if base <= 0.0 {
                (0.5, 0.5, 0.0)
            } else {
                (c.w_flood / base, c.w_scout / base, 0.0)
            }
        }
    }

    /// Run one fusion pass over the whole graph, writing updated risks back.
    #[allow(clippy::too_many_arguments)]
    pub fn run(
        &mut self,
        network: &mut RoadNetwork,
        index: &SpatialIndex,
        rasters: &FloodRasterService,
        terrain: Option<&TerrainService>,
        floods: &[FloodObservation],
        scouts: &[ScoutReport],
        now: DateTime<Utc>,
    ) -> FusionReport {
        let mut report = FusionReport {
            return_period: Some(self.return_period),
            time_step: self.time_step,
            ..FusionReport::default()
        };

        // Step A: ingest this tick's batches, then age out stale data.
        for obs in floods {
            self.ingest_flood(obs, &mut report);
        }
        for scout in scouts {
            self.ingest_scout(scout, &mut report);
        }
        self.clear_old_data(now);

        // Step B folds into the global factor that modulates raster risk.
        let env_factor = self.environmental_factor(now);
        report.environmental_factor = env_factor;

        // Step C: depth per node under the active scenario. A raster that
        // cannot be read degrades every sample to dry rather than failing the
        // tick.
        let (rp, ts) = (self.return_period, self.time_step);
        let mut raster_failed = false;
        let mut node_depth: HashMap<NodeIndex, Option<f32>> = HashMap::new();
        for idx in network.graph.node_indices() {
            let node = &network.graph[idx];
            let depth = if raster_failed {
                None
            } else {
                match rasters.depth_at(node.lon, node.lat, rp, ts) {
                    Ok(d) => d,
                    Err(e) => {
                        warn!(error = %e, rp = %rp, time_step = ts, "raster sampling failed; treating scenario as dry");
                        raster_failed = true;
                        None
                    }
                }
            };
            node_depth.insert(idx, depth);
        }

        // Step E: Gaussian spread of coordinate-bearing scouts onto incident
        // edges. Overlapping contributions combine as a weighted average.
        let sigma = self.config.scout_radius_m / 3.0;
        let mut scout_acc: HashMap<EdgeIndex, (f64, f64)> = HashMap::new();
        for scout in &self.scout_cache {
            let Some((lat, lon)) = scout.coordinates else {
                continue;
            };
            for (node_idx, dist_m) in index.nodes_within_radius(lat, lon, self.config.scout_radius_m)
            {
                let g = gaussian_decay(dist_m, sigma);
                let contribution = scout.severity * scout.confidence * g;
                let weight = scout.confidence * g;
                if weight <= 0.0 {
                    continue;
                }
                for edge in network
                    .graph
                    .edges_directed(node_idx, Outgoing)
                    .chain(network.graph.edges_directed(node_idx, Incoming))
                {
                    let entry = scout_acc.entry(edge.id()).or_insert((0.0, 0.0));
                    entry.0 += contribution * weight;
                    entry.1 += weight;
                }
            }
        }

        // Steps C (edge depth), D, F: blend per edge in stable edge order.
        let (w_flood, w_scout, w_hist) = self.effective_weights(terrain.is_some());
        let mut targets: Vec<(EdgeIndex, f64)> = Vec::new();
        let mut risk_sum = 0.0;
        for edge_idx in network.graph.edge_indices() {
            let (from, to) = network.graph.edge_endpoints(edge_idx).expect("edge endpoints");

            let depth = match (node_depth[&from], node_depth[&to]) {
                (Some(a), Some(b)) => f64::from(a + b) / 2.0,
                (Some(a), None) | (None, Some(a)) => f64::from(a),
                (None, None) => 0.0,
            };

            // Step D with the environmental uplift; the final clamp keeps the
            // blend in range even at full uplift.
            let base = sigmoid_risk(depth, self.config.sigmoid_k, self.config.sigmoid_x0);
            let r_flood = (base * (1.0 + self.config.env_uplift * env_factor)).clamp(0.0, 1.0);

            let r_scout = scout_acc
                .get(&edge_idx)
                .map(|(num, den)| num / den)
                .unwrap_or(0.0);

            let prior = if terrain.is_some() {
                edge_terrain_prior(network, from, to, self.config.terrain_prior_scale_m)
            } else {
                0.0
            };

            let risk = (w_flood * r_flood + w_scout * r_scout + w_hist * prior).clamp(0.0, 1.0);
            risk_sum += risk;

            if (risk - network.graph[edge_idx].risk_score).abs() > self.config.write_epsilon {
                targets.push((edge_idx, risk));
            }
        }

        // Step G: the single authorized write path into the graph.
        for (edge_idx, risk) in targets {
            network.set_risk_at(edge_idx, risk);
            report.edges_updated += 1;
        }
        if network.edge_count() > 0 {
            report.mean_risk = risk_sum / network.edge_count() as f64;
        }

        debug!(
            edges_updated = report.edges_updated,
            scouts = self.scout_cache.len(),
            env_factor = report.environmental_factor,
            "fusion pass complete"
        );
        report
    }
}

/// Calibrated depth -> risk sigmoid: `1 / (1 + exp(-k (d - x0)))`.
///
/// With the default `k = 8`, `x0 = 0.3` this puts ~0.08 at 0 m, 0.5 at the
/// 0.3 m impassable threshold, ~0.92 at 0.6 m and ~1 at a meter of water.
pub fn sigmoid_risk(depth_m: f64, k: f64, x0: f64) -> f64 {
    1.0 / (1.0 + (-k * (depth_m - x0)).exp())
}

/// Gaussian spatial decay `exp(-(d/sigma)^2)`: 1 at the report location,
/// 1/e at sigma, negligible beyond 3 sigma.
pub fn gaussian_decay(dist_m: f64, sigma_m: f64) -> f64 {
    (-(dist_m / sigma_m).powi(2)).exp()
}

fn half_life_decay(age_s: f64, half_life_s: f64) -> f64 {
    if half_life_s <= 0.0 {
        return 1.0;
    }
    0.5f64.powf(age_s.max(0.0) / half_life_s)
}

fn age_s(t: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - t).num_milliseconds() as f64 / 1000.0
}

/// Terrain prior for an edge: mean of its endpoints' depression depth mapped
/// into [0, 1]. Nodes without cached relative elevation contribute nothing.
fn edge_terrain_prior(
    network: &RoadNetwork,
    from: NodeIndex,
    to: NodeIndex,
    scale_m: f64,
) -> f64 {
    let prior_of = |idx: NodeIndex| -> Option<f64> {
        network.graph[idx]
            .relative_elevation_m
            .map(|rel| (-rel / scale_m).clamp(0.0, 1.0))
    };
    match (prior_of(from), prior_of(to)) {
        (Some(a), Some(b)) => (a + b) / 2.0,
        (Some(a), None) | (None, Some(a)) => a,
        (None, None) => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use masfro_core::{NodeId, RoadEdge, RoadNode};
    use masfro_geo::RasterMapping;
    use std::fs;
    use std::path::Path;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 8, 6, 0, 0).unwrap()
    }

    /// Two-edge chain near the Nangka area, inside the default raster mapping.
    fn small_network() -> RoadNetwork {
        let mut network = RoadNetwork::new();
        network.add_road_node(RoadNode::new(NodeId::new(1), 121.1029, 14.6507));
        network.add_road_node(RoadNode::new(NodeId::new(2), 121.1040, 14.6510));
        network.add_road_node(RoadNode::new(NodeId::new(3), 121.1084, 14.6303));
        network
            .add_road_edge(RoadEdge::new(NodeId::new(1), NodeId::new(2), 0, 130.0))
            .unwrap();
        network
            .add_road_edge(RoadEdge::new(NodeId::new(2), NodeId::new(3), 0, 2300.0))
            .unwrap();
        network
    }

    /// Raster service over a tempdir with no files: every sample misses, so
    /// the scenario reads as dry everywhere (depth handling degrades).
    fn dry_rasters(dir: &Path) -> FloodRasterService {
        FloodRasterService::new(dir)
    }

    fn scout_at_node1(severity: f64, confidence: f64) -> ScoutReport {
        ScoutReport::new("Nangka", severity, ts())
            .with_coordinates(14.6507, 121.1029)
            .with_confidence(confidence)
    }

    #[test]
    fn test_sigmoid_waypoints() {
        let r = |d| sigmoid_risk(d, 8.0, 0.3);
        assert!(r(0.0) < 0.15, "r(0) = {}", r(0.0));
        assert!((r(0.3) - 0.5).abs() <= 0.05, "r(0.3) = {}", r(0.3));
        assert!(r(0.6) >= 0.90, "r(0.6) = {}", r(0.6));
        assert!(r(1.0) >= 0.99, "r(1.0) = {}", r(1.0));
        // Reference waypoints within 0.02
        assert!((r(0.0) - 0.08).abs() <= 0.02);
        assert!((r(0.6) - 0.92).abs() <= 0.02);
    }

    #[test]
    fn test_gaussian_decay_waypoints() {
        let sigma = 800.0 / 3.0;
        assert_eq!(gaussian_decay(0.0, sigma), 1.0);
        assert!((gaussian_decay(sigma, sigma) - (-1.0f64).exp()).abs() <= 0.01);
        assert!(gaussian_decay(3.0 * sigma, sigma) < 0.01);
    }

    #[test]
    fn test_scout_risk_propagates_to_incident_edges() {
        let dir = tempfile::tempdir().unwrap();
        let mut network = small_network();
        let index = SpatialIndex::build(&network);
        let rasters = dry_rasters(dir.path());
        let mut fusion = HazardFusion::new(FusionConfig::default());

        let report = fusion.run(
            &mut network,
            &index,
            &rasters,
            None,
            &[],
            &[scout_at_node1(0.8, 0.9)],
            ts(),
        );
        assert_eq!(report.scouts_accepted, 1);

        let e = network.find_edge(NodeId::new(1), NodeId::new(2), 0).unwrap();
        let risk = network.graph[e].risk_score;
        // Scout sits on node 1; g ~= 1 there, so the scout term is close to
        // its ceiling. With no terrain the scout weight is 0.3/0.8.
        let w_scout = 0.3 / 0.8;
        assert!(risk > 0.2, "risk = {}", risk);
        assert!(risk <= w_scout * 0.8 * 0.9 + 0.06, "risk = {}", risk);

        // The far edge end (node 3, ~2.3 km away) is beyond the 800 m radius;
        // only edges incident to nodes within reach pick up scout risk.
        let far = network.find_edge(NodeId::new(2), NodeId::new(3), 0).unwrap();
        assert!(network.graph[far].risk_score > 0.0); // via node 2 (~120 m)
        assert!(network.graph[far].risk_score < risk);
    }

    #[test]
    fn test_anti_accumulation() {
        let dir = tempfile::tempdir().unwrap();
        let rasters = dry_rasters(dir.path());

        let run_with = |n_copies: usize| -> f64 {
            let mut network = small_network();
            let index = SpatialIndex::build(&network);
            let mut fusion = HazardFusion::new(FusionConfig::default());
            // Identical reports must dedup to one; vary nothing.
            let batch: Vec<ScoutReport> = (0..n_copies).map(|_| scout_at_node1(0.8, 0.9)).collect();
            fusion.run(&mut network, &index, &rasters, None, &[], &batch, ts());
            let e = network.find_edge(NodeId::new(1), NodeId::new(2), 0).unwrap();
            network.graph[e].risk_score
        };

        let one = run_with(1);
        let ten = run_with(10);
        assert!((one - ten).abs() <= 0.02, "1 report: {}, 10 reports: {}", one, ten);
    }

    #[test]
    fn test_distinct_reports_average_not_sum() {
        let dir = tempfile::tempdir().unwrap();
        let rasters = dry_rasters(dir.path());
        let mut network = small_network();
        let index = SpatialIndex::build(&network);
        let mut fusion = HazardFusion::new(FusionConfig::default());

        // Ten distinct same-location reports (timestamps differ) with equal
        // severity; the average must stay at that severity's level.
        let batch: Vec<ScoutReport> = (0..10)
            .map(|i| {
                ScoutReport::new("Nangka", 0.8, ts() + chrono::Duration::seconds(i))
                    .with_coordinates(14.6507, 121.1029)
                    .with_confidence(0.9)
            })
            .collect();
        let report = fusion.run(&mut network, &index, &rasters, None, &[], &batch, ts());
        assert_eq!(report.scouts_accepted, 10);

        let e = network.find_edge(NodeId::new(1), NodeId::new(2), 0).unwrap();
        let risk = network.graph[e].risk_score;
        assert!(risk <= (0.3 / 0.8) * 0.8 * 0.9 + 0.06, "risk = {}", risk);
    }

    #[test]
    fn test_fusion_idempotent_on_same_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let rasters = dry_rasters(dir.path());
        let mut network = small_network();
        let index = SpatialIndex::build(&network);
        let mut fusion = HazardFusion::new(FusionConfig::default());

        let batch = vec![scout_at_node1(0.8, 0.9)];
        fusion.run(&mut network, &index, &rasters, None, &[], &batch, ts());
        let snapshot: Vec<f64> = network.graph.edge_weights().map(|e| e.risk_score).collect();

        // Same bus snapshot again: duplicates drop, risks stay fixed.
        let report = fusion.run(&mut network, &index, &rasters, None, &[], &batch, ts());
        assert_eq!(report.duplicates_dropped, 1);
        let after: Vec<f64> = network.graph.edge_weights().map(|e| e.risk_score).collect();
        assert_eq!(snapshot, after);
    }

    #[test]
    fn test_invalid_scouts_rejected_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let rasters = dry_rasters(dir.path());
        let mut network = small_network();
        let index = SpatialIndex::build(&network);
        let mut fusion = HazardFusion::new(FusionConfig::default());

        let bad = ScoutReport::new("Nangka", 1.5, ts());
        let report = fusion.run(&mut network, &index, &rasters, None, &[], &[bad], ts());
        assert_eq!(report.scouts_rejected, 1);
        assert_eq!(report.scouts_accepted, 0);
    }

    #[test]
    fn test_cache_eviction_keeps_dedup_set_in_sync() {
        let mut config = FusionConfig::default();
        config.scout_cache_capacity = 3;
        let mut fusion = HazardFusion::new(config);
        let mut stats = FusionReport::default();

        for i in 0..5 {
            let r = ScoutReport::new(format!("L{}", i), 0.5, ts());
            assert!(fusion.ingest_scout(&r, &mut stats));
        }
        assert_eq!(fusion.scout_cache_len(), 3);
        assert_eq!(fusion.scout_seen.len(), 3);

        // The evicted oldest report is ingestable again.
        let again = ScoutReport::new("L0", 0.5, ts());
        assert!(fusion.ingest_scout(&again, &mut stats));
    }

    #[test]
    fn test_label_intensity_weighted_average() {
        let mut fusion = HazardFusion::new(FusionConfig::default());
        let mut stats = FusionReport::default();
        // Two reporters disagree; higher confidence pulls the intensity.
        let a = ScoutReport::new("Tumana", 1.0, ts()).with_confidence(0.9);
        let b = ScoutReport::new("Tumana", 0.0, ts() + chrono::Duration::seconds(1))
            .with_confidence(0.1);
        fusion.ingest_scout(&a, &mut stats);
        fusion.ingest_scout(&b, &mut stats);

        let intensities = fusion.label_intensities(ts() + chrono::Duration::seconds(1));
        let got = intensities["Tumana"];
        assert!((got - 0.9).abs() < 0.01, "got {}", got);
    }

    #[test]
    fn test_label_intensity_time_decay() {
        let mut fusion = HazardFusion::new(FusionConfig::default());
        let mut stats = FusionReport::default();
        let old = ScoutReport::new("Tumana", 1.0, ts());
        fusion.ingest_scout(&old, &mut stats);

        // One half-life later a fresh zero-severity report carries double the
        // effective weight of the decayed one.
        let later = ts() + chrono::Duration::seconds(1800);
        let fresh = ScoutReport::new("Tumana", 0.0, later);
        fusion.ingest_scout(&fresh, &mut stats);

        let got = fusion.label_intensities(later)["Tumana"];
        assert!((got - 1.0 / 3.0).abs() < 0.01, "got {}", got);
    }

    #[test]
    fn test_environmental_factor_lifts_raster_risk() {
        let dir = tempfile::tempdir().unwrap();
        // One flooded cell covering the whole mapped area
        let body = "ncols 1\nnrows 1\ncellsize 0.06\nxllcorner 0\nyllcorner 0\n0.3\n";
        fs::create_dir_all(dir.path().join("rr01")).unwrap();
        fs::write(dir.path().join("rr01/rr01-1.asc"), body).unwrap();
        let rasters = FloodRasterService::new(dir.path());
        assert_eq!(
            rasters.mapping().center_lat,
            RasterMapping::default().center_lat
        );

        let run_with = |floods: &[FloodObservation]| -> f64 {
            let mut network = small_network();
            let index = SpatialIndex::build(&network);
            let mut fusion = HazardFusion::new(FusionConfig::default());
            fusion.run(&mut network, &index, &rasters, None, floods, &[], ts());
            let e = network.find_edge(NodeId::new(1), NodeId::new(2), 0).unwrap();
            network.graph[e].risk_score
        };

        let calm = run_with(&[]);
        let critical = FloodObservation::RiverLevel {
            station_name: "Sto Nino".into(),
            water_level_m: 17.5,
            alert_level_m: 15.0,
            alarm_level_m: 16.0,
            critical_level_m: 17.0,
            timestamp: ts(),
        };
        let stressed = run_with(&[critical]);
        assert!(stressed > calm, "stressed {} vs calm {}", stressed, calm);
        assert!(stressed <= 1.0);
    }

    #[test]
    fn test_pure_raster_risk_matches_sigmoid() {
        let dir = tempfile::tempdir().unwrap();
        let body = "ncols 1\nnrows 1\ncellsize 0.06\nxllcorner 0\nyllcorner 0\n0.55\n";
        fs::create_dir_all(dir.path().join("rr04")).unwrap();
        fs::write(dir.path().join("rr04/rr04-18.asc"), body).unwrap();
        let rasters = FloodRasterService::new(dir.path());

        let mut network = small_network();
        let index = SpatialIndex::build(&network);
        let mut fusion = HazardFusion::new(FusionConfig::default());
        fusion.set_scenario(ReturnPeriod::Rr04, 18).unwrap();
        fusion.run(&mut network, &index, &rasters, None, &[], &[], ts());

        // Empty bus, no terrain: risk is exactly the effective flood weight
        // times the sigmoid of the sampled depth.
        let expected = (0.5 / 0.8) * sigmoid_risk(0.55, 8.0, 0.3);
        for e in network.graph.edge_weights() {
            assert!((e.risk_score - expected).abs() <= 0.02, "risk {}", e.risk_score);
        }
    }

    #[test]
    fn test_risk_always_in_unit_interval() {
        let dir = tempfile::tempdir().unwrap();
        let body = "ncols 1\nnrows 1\ncellsize 0.06\nxllcorner 0\nyllcorner 0\n3.0\n";
        fs::create_dir_all(dir.path().join("rr01")).unwrap();
        fs::write(dir.path().join("rr01/rr01-1.asc"), body).unwrap();
        let rasters = FloodRasterService::new(dir.path());

        let mut network = small_network();
        let index = SpatialIndex::build(&network);
        let mut fusion = HazardFusion::new(FusionConfig::default());
        let critical = FloodObservation::RiverLevel {
            station_name: "Sto Nino".into(),
            water_level_m: 20.0,
            alert_level_m: 15.0,
            alarm_level_m: 16.0,
            critical_level_m: 17.0,
            timestamp: ts(),
        };
        let scouts: Vec<ScoutReport> = (0..4)
            .map(|i| {
                ScoutReport::new(format!("S{}", i), 1.0, ts() + chrono::Duration::seconds(i))
                    .with_coordinates(14.6507, 121.1029)
            })
            .collect();
        fusion.run(&mut network, &index, &rasters, None, &[critical], &scouts, ts());

        for e in network.graph.edge_weights() {
            assert!((0.0..=1.0).contains(&e.risk_score));
            assert!(e.weight >= e.length_m);
        }
    }

    #[test]
    fn test_set_scenario_validates_time_step() {
        let mut fusion = HazardFusion::new(FusionConfig::default());
        assert!(fusion.set_scenario(ReturnPeriod::Rr02, 18).is_ok());
        assert!(fusion.set_scenario(ReturnPeriod::Rr02, 0).is_err());
        assert!(fusion.set_scenario(ReturnPeriod::Rr02, 19).is_err());
    }

    #[test]
    fn test_clear_caches() {
        let mut fusion = HazardFusion::new(FusionConfig::default());
        let mut stats = FusionReport::default();
        fusion.ingest_scout(&scout_at_node1(0.8, 0.9), &mut stats);
        assert_eq!(fusion.scout_cache_len(), 1);
        fusion.clear_caches();
        assert_eq!(fusion.scout_cache_len(), 0);
        assert!(fusion.scout_seen.is_empty());
    }

    #[test]
    fn test_clear_old_data_ages_out_scouts() {
        let mut fusion = HazardFusion::new(FusionConfig::default());
        let mut stats = FusionReport::default();
        fusion.ingest_scout(&scout_at_node1(0.8, 0.9), &mut stats);

        let much_later = ts() + chrono::Duration::seconds(7200);
        fusion.clear_old_data(much_later);
        assert_eq!(fusion.scout_cache_len(), 0);
        // Aged-out key released for re-ingestion
        assert!(fusion.ingest_scout(&scout_at_node1(0.8, 0.9), &mut stats));
    }
}
