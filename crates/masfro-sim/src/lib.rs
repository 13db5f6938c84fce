//! # masfro-sim: Simulation Orchestrator
//!
//! Binds the graph environment, hazard fusion, routing, and the evacuation
//! directory into a tick-driven simulation with a deterministic five-phase
//! pipeline:
//!
//! 1. **Collection**: drain due scripted events and externally produced
//!    observations onto the shared data bus;
//! 2. **Fusion**: hazard fusion rewrites per-edge risk under the active
//!    raster scenario;
//! 3. **Routing**: pending route requests resolve against the now-coherent
//!    graph;
//! 4. **Evacuation update**: centers fill at a mode- and time-dependent rate;
//! 5. **Advancement**: tick counter and raster time step move forward.
//!
//! The ordering is the correctness contract: routing always observes the risk
//! snapshot produced in the same tick. Execution is single-threaded
//! cooperative; one coarse lock serializes producers, queries, and the tick
//! loop, and no phase ever runs concurrently with another.
//!
//! Capability seams:
//! - [`PhaseRunner`]: what the orchestrator calls once per phase;
//! - [`Producer`]: what ingestion adapters call to publish observations;
//! - [`Query`]: what routing callers use for snapshot reads.

pub mod bus;
pub mod engine;
pub mod missions;
pub mod orchestrator;
pub mod phases;

pub use bus::{PendingRoute, RequestId, SharedDataBus};
pub use engine::{Engine, Query};
pub use missions::{Mission, MissionId, MissionOutcome, MissionResult};
pub use orchestrator::{
    Orchestrator, OrchestratorConfig, Producer, ResetReport, SimulationState, StartReport, Status,
    StopReport, TickReport,
};
pub use phases::{PhaseOutcome, PhaseRunner, TickContext};
