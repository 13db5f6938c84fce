//! # masfro-scenarios: Scripted Simulation Scenarios
//!
//! Maps simulation modes onto raster return periods and loads scripted event
//! timelines that feed the orchestrator's event queue. Two formats:
//!
//! - flat CSV (`time_offset_s,agent,payload_json`) sorted by offset, the
//!   format the production scenario exports use;
//! - YAML/JSON scenario specs with inline typed events, convenient for tests.
//!
//! Malformed event rows are dropped with a diagnostic; only an unreadable
//! file fails the load.

pub mod events;
pub mod mode;

pub use events::{
    load_events_csv, load_spec_from_path, EventPayload, ScenarioEvent, ScenarioSpec,
};
pub use mode::SimulationMode;
