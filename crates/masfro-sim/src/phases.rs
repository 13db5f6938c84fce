//! Phase runners: the orchestrator-facing capability each per-tick stage
//! implements.
//!
//! Fusion, routing, and the evacuation update are [`PhaseRunner`]s over a
//! shared [`TickContext`]. Collection and advancement stay inside the
//! orchestrator because they own the event queue and the clock. A phase that
//! fails reports its errors through [`PhaseOutcome`]; the tick always closes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::bus::SharedDataBus;
use crate::engine::{Engine, RouteRecord};
use masfro_geo::ReturnPeriod;
use masfro_hazard::FusionReport;
use masfro_scenarios::SimulationMode;

/// Everything a phase may touch during one tick.
pub struct TickContext<'a> {
    pub engine: &'a mut Engine,
    pub bus: &'a mut SharedDataBus,
    pub mode: SimulationMode,
    pub time_step: u8,
    /// Simulated wall-clock for this tick (epoch + simulation clock), so
    /// time-decay math is deterministic across replays
    pub now: DateTime<Utc>,
    pub route_history: &'a mut std::collections::VecDeque<RouteRecord>,
}

/// Per-phase outcome folded into the tick report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhaseOutcome {
    pub processed: usize,
    pub errors: Vec<String>,
}

/// What the orchestrator calls once per phase, in fixed order.
pub trait PhaseRunner {
    fn name(&self) -> &'static str;
    fn run_phase(&mut self, ctx: &mut TickContext<'_>) -> PhaseOutcome;
}

/// Phase 2: hazard fusion over the bus batches.
#[derive(Debug, Default)]
pub struct FusionPhase {
    pub last_report: Option<FusionReport>,
}

impl FusionPhase {
    fn active_return_period(mode: SimulationMode) -> ReturnPeriod {
        mode.return_period()
    }
}

impl PhaseRunner for FusionPhase {
    fn name(&self) -> &'static str {
        "fusion"
    }

    fn run_phase(&mut self, ctx: &mut TickContext<'_>) -> PhaseOutcome {
        let mut outcome = PhaseOutcome::default();
        let rp = Self::active_return_period(ctx.mode);
        if let Err(e) = ctx.engine.fusion.set_scenario(rp, ctx.time_step) {
            outcome.errors.push(e.to_string());
            return outcome;
        }

        let report = ctx.engine.fusion.run(
            &mut ctx.engine.network,
            &ctx.engine.index,
            &ctx.engine.rasters,
            ctx.engine.terrain.as_ref(),
            &ctx.bus.flood_data,
            &ctx.bus.scout_data,
            ctx.now,
        );
        outcome.processed = report.edges_updated;
        debug!(
            edges_updated = report.edges_updated,
            mean_risk = report.mean_risk,
            "fusion phase complete"
        );
        self.last_report = Some(report);
        ctx.bus.graph_updated = true;
        outcome
    }
}

/// Phase 3: drain pending route requests against the updated graph.
#[derive(Debug, Default)]
pub struct RoutingPhase;

impl PhaseRunner for RoutingPhase {
    fn name(&self) -> &'static str {
        "routing"
    }

    fn run_phase(&mut self, ctx: &mut TickContext<'_>) -> PhaseOutcome {
        let mut outcome = PhaseOutcome::default();
        while let Some(request) = ctx.bus.pending_routes.pop_front() {
            let result = ctx.engine.router.route(
                &ctx.engine.network,
                &ctx.engine.index,
                request.start,
                request.end,
                &request.prefs,
            );
            if !result.is_routable() {
                warn!(id = %request.id, "route request resolved without a safe route");
            }
            push_history(
                ctx.route_history,
                RouteRecord {
                    start: request.start,
                    end: request.end,
                    distance_m: result.distance_m,
                    risk_level: result.risk_level,
                    routable: result.is_routable(),
                },
            );
            if let Some(reply) = request.reply {
                // A dropped receiver only means nobody is waiting anymore.
                let _ = reply.send(result);
            }
            outcome.processed += 1;
        }
        outcome
    }
}

/// Route history cap, matching the source system's bounded in-memory log.
const ROUTE_HISTORY_CAP: usize = 1000;

fn push_history(
    history: &mut std::collections::VecDeque<RouteRecord>,
    record: RouteRecord,
) {
    if history.len() == ROUTE_HISTORY_CAP {
        history.pop_front();
    }
    history.push_back(record);
}

/// Phase 4: evacuation centers fill at
/// `base_rate * mode_multiplier * time_multiplier`.
#[derive(Debug)]
pub struct EvacuationPhase {
    pub base_arrival_rate: u32,
}

impl EvacuationPhase {
    /// Arrivals per not-full center this tick.
    pub fn arrival_rate(&self, mode: SimulationMode, time_step: u8) -> u32 {
        let time_multiplier = 1.0 + (time_step as f64 / masfro_geo::TIME_STEPS as f64) * 1.5;
        (self.base_arrival_rate as f64 * mode.arrival_multiplier() * time_multiplier) as u32
    }
}

impl PhaseRunner for EvacuationPhase {
    fn name(&self) -> &'static str {
        "evacuation"
    }

    fn run_phase(&mut self, ctx: &mut TickContext<'_>) -> PhaseOutcome {
        let mut outcome = PhaseOutcome::default();
        let rate = self.arrival_rate(ctx.mode, ctx.time_step);
        let names: Vec<String> = ctx
            .engine
            .directory
            .list_available()
            .iter()
            .map(|c| c.name.clone())
            .collect();
        for name in names {
            match ctx.engine.directory.add_evacuees(&name, rate as i64) {
                Ok(update) => {
                    if update.accepted > 0 {
                        outcome.processed += 1;
                    }
                }
                Err(e) => outcome.errors.push(e.to_string()),
            }
        }
        debug!(rate, centers = outcome.processed, "evacuation update complete");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arrival_rate_scaling() {
        let phase = EvacuationPhase {
            base_arrival_rate: 5,
        };
        // Light at step 1: 5 * 1.0 * (1 + 1/18 * 1.5) = 5.41 -> 5
        assert_eq!(phase.arrival_rate(SimulationMode::Light, 1), 5);
        // Heavy at step 18: 5 * 3.5 * 2.5 = 43.75 -> 43
        assert_eq!(phase.arrival_rate(SimulationMode::Heavy, 18), 43);
        // Medium grows with the time step
        assert!(
            phase.arrival_rate(SimulationMode::Medium, 18)
                > phase.arrival_rate(SimulationMode::Medium, 1)
        );
    }
}
