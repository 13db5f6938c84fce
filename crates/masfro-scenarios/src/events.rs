//! Scripted scenario event timelines.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::mode::SimulationMode;
use masfro_core::Diagnostics;
use masfro_hazard::{FloodObservation, ScoutReport};

/// What a scenario event injects onto the bus when its offset is reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "agent", content = "payload", rename_all = "snake_case")]
pub enum EventPayload {
    /// A batch of station observations
    FloodAgent(Vec<FloodObservation>),
    /// One crowdsourced report
    ScoutAgent(ScoutReport),
}

/// One scripted event, fired when the simulation clock passes its offset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioEvent {
    pub time_offset_s: f64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// A named scenario with its mode and inline events (YAML/JSON form).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioSpec {
    pub name: Option<String>,
    pub mode: SimulationMode,
    #[serde(default)]
    pub events: Vec<ScenarioEvent>,
}

/// Load a scenario spec from YAML or JSON, keyed on the file extension with a
/// YAML-then-JSON fallback for unknown extensions. Events come back sorted by
/// offset.
pub fn load_spec_from_path(path: &Path) -> Result<ScenarioSpec> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading scenario spec '{}'", path.display()))?;
    let mut spec: ScenarioSpec = match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
            serde_yaml::from_str(&data).context("parsing scenario spec yaml")?
        }
        Some(ext) if ext.eq_ignore_ascii_case("json") => {
            serde_json::from_str(&data).context("parsing scenario spec json")?
        }
        _ => serde_yaml::from_str(&data)
            .or_else(|_| serde_json::from_str(&data))
            .context("parsing scenario spec")?,
    };
    sort_events(&mut spec.events);
    Ok(spec)
}

/// Load a flat CSV event timeline (`time_offset_s,agent,payload_json`).
///
/// Rows with an unknown agent or an undecodable payload are dropped and
/// reported; the remaining events come back sorted by offset.
pub fn load_events_csv(path: &Path) -> Result<(Vec<ScenarioEvent>, Diagnostics)> {
    #[derive(Debug, Deserialize)]
    struct Row {
        time_offset_s: f64,
        agent: String,
        payload_json: String,
    }

    let mut diag = Diagnostics::new();
    let mut events = Vec::new();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening scenario timeline '{}'", path.display()))?;
    for (i, row) in reader.deserialize::<Row>().enumerate() {
        let line = i + 2;
        let row = match row {
            Ok(r) => r,
            Err(e) => {
                diag.add(
                    masfro_core::DiagnosticIssue::new(
                        masfro_core::Severity::Error,
                        "parse",
                        format!("unparseable event row: {}", e),
                    )
                    .with_line(line),
                );
                continue;
            }
        };
        let payload = match row.agent.as_str() {
            "flood_agent" => decode_flood_payload(&row.payload_json).map(EventPayload::FloodAgent),
            "scout_agent" => serde_json::from_str::<ScoutReport>(&row.payload_json)
                .map(EventPayload::ScoutAgent)
                .map_err(|e| e.to_string()),
            other => Err(format!("unknown agent '{}'", other)),
        };
        match payload {
            Ok(payload) => events.push(ScenarioEvent {
                time_offset_s: row.time_offset_s,
                payload,
            }),
            Err(reason) => {
                diag.add(
                    masfro_core::DiagnosticIssue::new(
                        masfro_core::Severity::Error,
                        "payload",
                        reason,
                    )
                    .with_line(line),
                );
            }
        }
    }

    sort_events(&mut events);
    info!(
        events = events.len(),
        dropped = diag.error_count(),
        "scenario timeline loaded"
    );
    Ok((events, diag))
}

/// Flood payloads appear both as single observations and as batches.
fn decode_flood_payload(json: &str) -> std::result::Result<Vec<FloodObservation>, String> {
    serde_json::from_str::<Vec<FloodObservation>>(json)
        .or_else(|_| serde_json::from_str::<FloodObservation>(json).map(|obs| vec![obs]))
        .map_err(|e| e.to_string())
}

fn sort_events(events: &mut [ScenarioEvent]) {
    events.sort_by(|a, b| {
        a.time_offset_s
            .partial_cmp(&b.time_offset_s)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
