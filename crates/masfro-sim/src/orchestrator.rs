//! The tick-driven simulation orchestrator.
//!
//! Owns the state machine, the simulation clock, the scenario event queue,
//! and the shared data bus. It does not own domain data: the engine's
//! services are constructor-injected and the orchestrator only sequences
//! them.
//!
//! Concurrency model: single-threaded cooperative. A spawned loop task
//! alternates `run_tick` and a fixed delay; every public entry point (and the
//! loop itself) serializes through one coarse `parking_lot` lock, so no phase
//! ever observes a half-written bus. `run_tick` never suspends once entered.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bus::{PendingRoute, RequestId, SharedDataBus};
use crate::engine::{Engine, Query, RouteRecord};
use crate::phases::{EvacuationPhase, FusionPhase, PhaseOutcome, PhaseRunner, RoutingPhase, TickContext};
use masfro_core::{EvacuationCenter, MasfroError, MasfroResult};
use masfro_geo::{ReturnPeriod, TIME_STEPS};
use masfro_hazard::{FloodObservation, FusionReport, ScoutReport};
use masfro_routing::{EvacueeUpdate, RoutePreferences, RouteResult};
use masfro_scenarios::{load_events_csv, EventPayload, ScenarioEvent, SimulationMode};

/// In-process data ingress for external producers (gauge pollers, weather
/// clients, crowdsource pipelines).
pub trait Producer {
    fn submit_flood_observation(&self, obs: FloodObservation);
    fn submit_scout_report(&self, report: ScoutReport);
}

/// Simulation lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulationState {
    Stopped,
    Running,
    Paused,
}

impl SimulationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SimulationState::Stopped => "stopped",
            SimulationState::Running => "running",
            SimulationState::Paused => "paused",
        }
    }
}

impl std::fmt::Display for SimulationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Orchestrator tunables.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Simulated seconds per tick; also the loop delay
    pub tick_interval_s: f64,
    /// Base evacuation arrivals per center per tick
    pub base_arrival_rate: u32,
    /// Directory holding `<mode>_scenario.csv` timelines, if any
    pub scenario_dir: Option<PathBuf>,
    /// Fixed epoch the simulation clock counts from, so time-decay math is
    /// reproducible across replays
    pub sim_epoch: DateTime<Utc>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_interval_s: 1.0,
            base_arrival_rate: 5,
            scenario_dir: None,
            sim_epoch: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }
}

/// Returned by `start`.
#[derive(Debug, Clone, Serialize)]
pub struct StartReport {
    pub mode: SimulationMode,
    pub return_period: ReturnPeriod,
    pub time_step: u8,
    /// Whether this resumed a paused run (tick count preserved)
    pub resumed: bool,
    pub scenario: Option<String>,
    pub events_loaded: usize,
}

/// Returned by `stop`.
#[derive(Debug, Clone, Serialize)]
pub struct StopReport {
    pub tick_count: u64,
    pub time_step: u8,
    pub simulation_clock_s: f64,
}

/// Returned by `reset`.
#[derive(Debug, Clone, Serialize)]
pub struct ResetReport {
    pub previous_state: SimulationState,
    pub previous_mode: SimulationMode,
    pub previous_ticks: u64,
}

/// Live status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub state: SimulationState,
    pub mode: SimulationMode,
    pub tick_count: u64,
    pub time_step: u8,
    pub simulation_clock_s: f64,
    pub pending_routes: usize,
    pub return_period: ReturnPeriod,
    pub events_in_queue: usize,
    pub scenario: Option<String>,
}

/// Per-tick execution report; phase errors are recorded, never thrown.
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub time_step: u8,
    pub mode: SimulationMode,
    pub events_processed: usize,
    pub flood_batches: usize,
    pub scout_reports: usize,
    pub fusion: Option<FusionReport>,
    pub routing: PhaseOutcome,
    pub evacuation: PhaseOutcome,
    pub errors: Vec<String>,
}

pub(crate) struct Inner {
    pub(crate) state: SimulationState,
    pub(crate) mode: SimulationMode,
    pub(crate) tick_count: u64,
    pub(crate) time_step: u8,
    pub(crate) simulation_clock_s: f64,
    pub(crate) scenario_name: Option<String>,
    pub(crate) event_queue: VecDeque<ScenarioEvent>,
    pub(crate) bus: SharedDataBus,
    pub(crate) engine: Engine,
    pub(crate) route_history: VecDeque<RouteRecord>,
    pub(crate) fusion_phase: FusionPhase,
    pub(crate) routing_phase: RoutingPhase,
    pub(crate) evacuation_phase: EvacuationPhase,
}

/// The simulation orchestrator. Cheap to clone-share via `Arc`; all methods
/// take `&self`.
pub struct Orchestrator {
    inner: Arc<Mutex<Inner>>,
    config: OrchestratorConfig,
    loop_task: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(engine: Engine, config: OrchestratorConfig) -> Self {
        let inner = Inner {
            state: SimulationState::Stopped,
            mode: SimulationMode::Light,
            tick_count: 0,
            time_step: 1,
            simulation_clock_s: 0.0,
            scenario_name: None,
            event_queue: VecDeque::new(),
            bus: SharedDataBus::new(),
            engine,
            route_history: VecDeque::new(),
            fusion_phase: FusionPhase::default(),
            routing_phase: RoutingPhase,
            evacuation_phase: EvacuationPhase {
                base_arrival_rate: config.base_arrival_rate,
            },
        };
        Self {
            inner: Arc::new(Mutex::new(inner)),
            config,
            loop_task: Mutex::new(None),
        }
    }

    /// Start (or resume) the simulation and spawn the tick loop task.
    pub async fn start(&self, mode: SimulationMode) -> MasfroResult<StartReport> {
        let report = {
            let mut inner = self.inner.lock();
            if inner.state == SimulationState::Running {
                return Err(MasfroError::Validation(
                    "simulation is already running".into(),
                ));
            }
            let resumed = inner.state == SimulationState::Paused;
            inner.mode = mode;
            if !resumed {
                inner.tick_count = 0;
                inner.time_step = 1;
                inner.simulation_clock_s = 0.0;
                inner.bus = SharedDataBus::new();
            }

            let (scenario_name, events) = self.load_scenario(mode);
            inner.scenario_name = scenario_name;
            inner.event_queue = events.into();

            let time_step = inner.time_step;
            inner
                .engine
                .fusion
                .set_scenario(mode.return_period(), time_step)?;
            inner.state = SimulationState::Running;

            info!(
                mode = %mode,
                resumed,
                events = inner.event_queue.len(),
                "simulation started"
            );
            StartReport {
                mode,
                return_period: mode.return_period(),
                time_step: inner.time_step,
                resumed,
                scenario: inner.scenario_name.clone(),
                events_loaded: inner.event_queue.len(),
            }
        };

        let inner = Arc::clone(&self.inner);
        let config = self.config.clone();
        let handle = tokio::spawn(async move {
            let delay = Duration::from_secs_f64(config.tick_interval_s.max(0.01));
            loop {
                tokio::time::sleep(delay).await;
                let mut guard = inner.lock();
                if guard.state != SimulationState::Running {
                    break;
                }
                run_tick_inner(&mut guard, &config, None);
            }
        });
        *self.loop_task.lock() = Some(handle);

        Ok(report)
    }

    /// Pause the simulation: cancels the loop task and awaits its exit within
    /// a grace period. A tick already inside `run_tick` completes first.
    pub async fn stop(&self) -> MasfroResult<StopReport> {
        let report = {
            let mut inner = self.inner.lock();
            if inner.state != SimulationState::Running {
                return Err(MasfroError::NotRunning(inner.state.to_string()));
            }
            inner.state = SimulationState::Paused;
            StopReport {
                tick_count: inner.tick_count,
                time_step: inner.time_step,
                simulation_clock_s: inner.simulation_clock_s,
            }
        };
        self.join_loop_task().await;
        info!(ticks = report.tick_count, "simulation stopped (paused)");
        Ok(report)
    }

    /// Reset to Stopped from any state: zeros the clock and counters, resets
    /// edge risk, evacuation occupancy, and the fusion caches.
    pub async fn reset(&self) -> ResetReport {
        let previous_state = {
            let mut inner = self.inner.lock();
            let previous = inner.state;
            inner.state = SimulationState::Stopped;
            previous
        };
        self.join_loop_task().await;

        let mut inner = self.inner.lock();
        let report = ResetReport {
            previous_state,
            previous_mode: inner.mode,
            previous_ticks: inner.tick_count,
        };
        inner.state = SimulationState::Stopped;
        inner.mode = SimulationMode::Light;
        inner.tick_count = 0;
        inner.time_step = 1;
        inner.simulation_clock_s = 0.0;
        inner.scenario_name = None;
        inner.event_queue.clear();
        inner.bus = SharedDataBus::new();
        inner.route_history.clear();
        inner.engine.network.reset_risk();
        inner.engine.fusion.clear_caches();
        inner.engine.directory.reset_all();
        info!("simulation reset to initial state");
        report
    }

    /// Cancel the loop task and await its termination. Abort can only land on
    /// the inter-tick sleep (ticks run synchronously under the lock), so a
    /// tick already in flight completes before the task dies.
    async fn join_loop_task(&self) {
        let handle = self.loop_task.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            match tokio::time::timeout(Duration::from_secs(5), handle).await {
                Ok(_) => {}
                Err(_) => warn!("tick loop did not exit within grace period"),
            }
        }
    }

    /// Execute one tick synchronously. `time_step` overrides the scenario
    /// cursor for this tick and suppresses advancement (test hook).
    pub fn run_tick(&self, time_step: Option<u8>) -> MasfroResult<TickReport> {
        if let Some(ts) = time_step {
            if !(1..=TIME_STEPS).contains(&ts) {
                return Err(MasfroError::InvalidTimeStep(ts, TIME_STEPS));
            }
        }
        let mut inner = self.inner.lock();
        if inner.state != SimulationState::Running {
            return Err(MasfroError::NotRunning(inner.state.to_string()));
        }
        Ok(run_tick_inner(&mut inner, &self.config, time_step))
    }

    pub fn get_status(&self) -> Status {
        let inner = self.inner.lock();
        Status {
            state: inner.state,
            mode: inner.mode,
            tick_count: inner.tick_count,
            time_step: inner.time_step,
            simulation_clock_s: inner.simulation_clock_s,
            pending_routes: inner.bus.pending_routes.len(),
            return_period: inner.mode.return_period(),
            events_in_queue: inner.event_queue.len(),
            scenario: inner.scenario_name.clone(),
        }
    }

    /// Queue a route request for the next tick's routing phase.
    pub fn add_route_request(
        &self,
        start: (f64, f64),
        end: (f64, f64),
        prefs: RoutePreferences,
    ) -> RequestId {
        let (id, _rx) = self.add_route_request_with_reply(start, end, prefs);
        id
    }

    /// Queue a route request and keep the reply channel.
    pub fn add_route_request_with_reply(
        &self,
        start: (f64, f64),
        end: (f64, f64),
        prefs: RoutePreferences,
    ) -> (RequestId, oneshot::Receiver<RouteResult>) {
        let id = RequestId::new();
        let (tx, rx) = oneshot::channel();
        self.inner.lock().bus.pending_routes.push_back(PendingRoute {
            id,
            start,
            end,
            prefs,
            reply: Some(tx),
        });
        (id, rx)
    }

    /// Bounded history of answered route requests.
    pub fn route_history(&self) -> Vec<RouteRecord> {
        self.inner.lock().route_history.iter().cloned().collect()
    }

    pub fn list_evacuation_centers(&self, available_only: bool) -> Vec<EvacuationCenter> {
        let inner = self.inner.lock();
        if available_only {
            inner
                .engine
                .directory
                .list_available()
                .into_iter()
                .cloned()
                .collect()
        } else {
            inner.engine.directory.list_all().to_vec()
        }
    }

    pub fn add_evacuees(&self, name: &str, delta: i64) -> MasfroResult<EvacueeUpdate> {
        self.inner.lock().engine.directory.add_evacuees(name, delta)
    }

    /// Road network statistics for the status surface.
    pub fn network_stats(&self) -> masfro_core::NetworkStats {
        self.inner.lock().engine.network_stats()
    }

    /// Serialized per-edge risk snapshot `(from, to, key, risk)`, in stable
    /// edge order. Used by determinism checks and the CLI.
    pub fn risk_snapshot(&self) -> Vec<(i64, i64, u32, f64)> {
        let inner = self.inner.lock();
        inner
            .engine
            .network
            .graph
            .edge_weights()
            .map(|e| (e.from.value(), e.to.value(), e.key, e.risk_score))
            .collect()
    }

    fn load_scenario(&self, mode: SimulationMode) -> (Option<String>, Vec<ScenarioEvent>) {
        let Some(dir) = &self.config.scenario_dir else {
            return (None, Vec::new());
        };
        let path = dir.join(format!("{}_scenario.csv", mode.as_str()));
        if !path.exists() {
            warn!(path = %path.display(), "scenario timeline not found; starting with empty queue");
            return (None, Vec::new());
        }
        match load_events_csv(&path) {
            Ok((events, diag)) => {
                if diag.has_errors() {
                    warn!(dropped = diag.error_count(), "scenario rows dropped");
                }
                (
                    Some(format!("{} flood scenario", mode)),
                    events,
                )
            }
            Err(e) => {
                warn!(error = %e, "failed to load scenario timeline");
                (None, Vec::new())
            }
        }
    }

    pub(crate) fn with_inner<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        f(&mut self.inner.lock())
    }

    pub(crate) fn sim_epoch(&self) -> DateTime<Utc> {
        self.config.sim_epoch
    }
}

impl Producer for Orchestrator {
    fn submit_flood_observation(&self, obs: FloodObservation) {
        self.inner.lock().bus.inbox_flood.push(obs);
    }

    fn submit_scout_report(&self, report: ScoutReport) {
        self.inner.lock().bus.inbox_scout.push(report);
    }
}

impl Query for Orchestrator {
    /// Snapshot read against the current graph (the embedder default);
    /// `add_route_request` is the queued alternative.
    fn route(&self, start: (f64, f64), end: (f64, f64), prefs: &RoutePreferences) -> RouteResult {
        self.inner.lock().engine.route(start, end, prefs)
    }

    fn route_to_nearest_center(
        &self,
        start: (f64, f64),
    ) -> Option<(EvacuationCenter, RouteResult)> {
        self.inner.lock().engine.route_to_nearest_center(start)
    }

    fn k_alternatives(
        &self,
        start: (f64, f64),
        end: (f64, f64),
        k: usize,
        prefs: &RoutePreferences,
    ) -> Vec<RouteResult> {
        self.inner.lock().engine.k_alternatives(start, end, k, prefs)
    }
}

impl Inner {
    pub(crate) fn simulated_now(&self, epoch: DateTime<Utc>) -> DateTime<Utc> {
        epoch + chrono::Duration::milliseconds((self.simulation_clock_s * 1000.0) as i64)
    }
}

/// The five-phase pipeline. Runs to completion under the coarse lock; phase
/// failures are recorded in the report and never unwind.
fn run_tick_inner(
    inner: &mut Inner,
    config: &OrchestratorConfig,
    time_step_override: Option<u8>,
) -> TickReport {
    inner.simulation_clock_s += config.tick_interval_s;
    if let Some(ts) = time_step_override {
        inner.time_step = ts;
    }
    let tick = inner.tick_count + 1;
    let (mode, time_step) = (inner.mode, inner.time_step);
    let now = inner.simulated_now(config.sim_epoch);
    let mut errors = Vec::new();

    // Phase 1 - Collection: clear slots, promote producer inboxes, drain due
    // scripted events. No graph writes here.
    inner.bus.begin_collection();
    let mut events_processed = 0;
    while let Some(front) = inner.event_queue.front() {
        if front.time_offset_s > inner.simulation_clock_s {
            break;
        }
        let event = inner.event_queue.pop_front().expect("front checked");
        match event.payload {
            EventPayload::FloodAgent(batch) => inner.bus.flood_data.extend(batch),
            EventPayload::ScoutAgent(report) => inner.bus.scout_data.push(report),
        }
        events_processed += 1;
    }
    let (flood_batches, scout_reports) = (inner.bus.flood_data.len(), inner.bus.scout_data.len());

    // Phases 2-4 share one context; the mutable graph borrow lives inside the
    // fusion phase only.
    let mut ctx = TickContext {
        engine: &mut inner.engine,
        bus: &mut inner.bus,
        mode,
        time_step,
        now,
        route_history: &mut inner.route_history,
    };

    let fusion_outcome = inner.fusion_phase.run_phase(&mut ctx);
    errors.extend(fusion_outcome.errors.iter().cloned());
    let fusion = inner.fusion_phase.last_report.clone();

    let routing = inner.routing_phase.run_phase(&mut ctx);
    errors.extend(routing.errors.iter().cloned());

    let evacuation = inner.evacuation_phase.run_phase(&mut ctx);
    errors.extend(evacuation.errors.iter().cloned());

    // Phase 5 - Advancement. The explicit override pins the raster cursor for
    // this tick, so it does not advance.
    inner.tick_count = tick;
    if time_step_override.is_none() {
        inner.time_step = (inner.time_step % TIME_STEPS) + 1;
    }

    TickReport {
        tick,
        time_step,
        mode,
        events_processed,
        flood_batches,
        scout_reports,
        fusion,
        routing,
        evacuation,
        errors,
    }
}
