//! CSV importers for road networks and evacuation centers.
//!
//! Expected layouts:
//!
//! - `nodes.csv`: `id,lon,lat`
//! - `edges.csv`: `from,to,key,length_m,name,highway` (`name`/`highway` may be
//!   empty)
//! - `centers.csv`: `name,latitude,longitude,capacity,type`
//!
//! Bad records are skipped with a diagnostic; only unreadable files or
//! missing headers fail the import as a whole.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

use masfro_core::geo::valid_coordinates;
use masfro_core::{
    EvacuationCenter, ImportDiagnostics, NodeId, RoadEdge, RoadNetwork, RoadNode,
};

#[derive(Debug, Deserialize)]
struct NodeRecord {
    id: i64,
    lon: f64,
    lat: f64,
}

#[derive(Debug, Deserialize)]
struct EdgeRecord {
    from: i64,
    to: i64,
    #[serde(default)]
    key: u32,
    length_m: f64,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    highway: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CenterRecord {
    name: String,
    latitude: f64,
    longitude: f64,
    capacity: u32,
    #[serde(rename = "type", default)]
    center_type: Option<String>,
}

/// Load a road network from a node table and an edge table.
pub fn load_road_network(
    nodes_path: &Path,
    edges_path: &Path,
) -> Result<(RoadNetwork, ImportDiagnostics)> {
    let mut diag = ImportDiagnostics::new();
    let mut network = RoadNetwork::new();

    let mut reader = csv::Reader::from_path(nodes_path)
        .with_context(|| format!("opening node table '{}'", nodes_path.display()))?;
    for (i, record) in reader.deserialize::<NodeRecord>().enumerate() {
        let line = i + 2; // header is line 1
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                diag.add_error_at_line("parse", &format!("unparseable node record: {}", e), line);
                continue;
            }
        };
        if !valid_coordinates(record.lat, record.lon) {
            diag.add_error_at_line(
                "validation",
                &format!(
                    "node {} has implausible coordinates ({}, {})",
                    record.id, record.lat, record.lon
                ),
                line,
            );
            continue;
        }
        let id = NodeId::new(record.id);
        if network.index_of(id).is_some() {
            diag.add_warning_at_line(
                "reference",
                &format!("duplicate node id {}; first occurrence kept", record.id),
                line,
            );
            continue;
        }
        network.add_road_node(RoadNode::new(id, record.lon, record.lat));
        diag.stats.nodes += 1;
    }

    let mut reader = csv::Reader::from_path(edges_path)
        .with_context(|| format!("opening edge table '{}'", edges_path.display()))?;
    for (i, record) in reader.deserialize::<EdgeRecord>().enumerate() {
        let line = i + 2;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                diag.add_error_at_line("parse", &format!("unparseable edge record: {}", e), line);
                continue;
            }
        };
        let name = record.name.filter(|s| !s.is_empty());
        let highway = record.highway.filter(|s| !s.is_empty());
        let edge = RoadEdge::new(
            NodeId::new(record.from),
            NodeId::new(record.to),
            record.key,
            record.length_m,
        )
        .with_metadata(name, highway);
        match network.add_road_edge(edge) {
            Ok(_) => diag.stats.edges += 1,
            Err(e) => diag.add_error_at_line("reference", &e.to_string(), line),
        }
    }

    if diag.has_errors() {
        warn!(
            skipped = diag.stats.skipped_records,
            "road network import dropped records"
        );
    }
    info!(
        nodes = diag.stats.nodes,
        edges = diag.stats.edges,
        "road network imported"
    );
    Ok((network, diag))
}

/// Load the evacuation center table.
pub fn load_evacuation_centers(
    path: &Path,
) -> Result<(Vec<EvacuationCenter>, ImportDiagnostics)> {
    let mut diag = ImportDiagnostics::new();
    let mut centers: Vec<EvacuationCenter> = Vec::new();

    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening center table '{}'", path.display()))?;
    for (i, record) in reader.deserialize::<CenterRecord>().enumerate() {
        let line = i + 2;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                diag.add_error_at_line("parse", &format!("unparseable center record: {}", e), line);
                continue;
            }
        };
        if !valid_coordinates(record.latitude, record.longitude) {
            diag.add_error_at_line(
                "validation",
                &format!("center '{}' has implausible coordinates", record.name),
                line,
            );
            continue;
        }
        if centers.iter().any(|c| c.name == record.name) {
            diag.add_warning_at_line(
                "reference",
                &format!("duplicate center '{}'; first occurrence kept", record.name),
                line,
            );
            continue;
        }
        let mut center = EvacuationCenter::new(
            record.name,
            record.latitude,
            record.longitude,
            record.capacity,
        );
        center.center_type = record.center_type.filter(|s| !s.is_empty());
        centers.push(center);
        diag.stats.centers += 1;
    }

    info!(centers = diag.stats.centers, "evacuation centers imported");
    Ok((centers, diag))
}
