//! The shared data bus: the typed in-process mailbox between external
//! producers, the scripted event queue, and the per-tick phases.

use std::collections::VecDeque;

use tokio::sync::oneshot;
use uuid::Uuid;

use masfro_hazard::{FloodObservation, ScoutReport};
use masfro_routing::{RoutePreferences, RouteResult};

/// Identifier handed back when a route request is queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A queued route request, resolved during the next tick's routing phase.
///
/// The optional reply channel delivers the result to whoever queued the
/// request; a dropped receiver is fine, the result still lands in the route
/// history.
#[derive(Debug)]
pub struct PendingRoute {
    pub id: RequestId,
    pub start: (f64, f64),
    pub end: (f64, f64),
    pub prefs: RoutePreferences,
    pub reply: Option<oneshot::Sender<RouteResult>>,
}

/// Bus slots, cleared and refilled each tick by the collection phase.
///
/// External producers deposit into the inbox staging buffers between ticks;
/// the collection phase moves staged items into the per-tick slots after
/// clearing them, so anything published before tick k's collection is
/// guaranteed visible to tick k's fusion.
#[derive(Debug, Default)]
pub struct SharedDataBus {
    /// Station observations for the current tick
    pub flood_data: Vec<FloodObservation>,
    /// Scout reports for the current tick
    pub scout_data: Vec<ScoutReport>,
    /// Set by the fusion phase once the graph holds this tick's risk snapshot
    pub graph_updated: bool,
    /// Route requests awaiting the routing phase; uncapped, drained each tick
    pub pending_routes: VecDeque<PendingRoute>,
    /// Producer staging: observations deposited since the previous tick
    pub inbox_flood: Vec<FloodObservation>,
    /// Producer staging: scout reports deposited since the previous tick
    pub inbox_scout: Vec<ScoutReport>,
}

impl SharedDataBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a tick's collection: clear the per-tick observation slots, then
    /// promote everything producers staged since the previous tick. Pending
    /// routes survive until the routing phase drains them.
    pub fn begin_collection(&mut self) {
        self.flood_data.clear();
        self.scout_data.clear();
        self.graph_updated = false;
        self.flood_data.append(&mut self.inbox_flood);
        self.scout_data.append(&mut self.inbox_scout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{TimeZone, Utc};

    #[test]
    fn test_begin_collection_keeps_pending_routes() {
        let mut bus = SharedDataBus::new();
        bus.graph_updated = true;
        bus.pending_routes.push_back(PendingRoute {
            id: RequestId::new(),
            start: (14.65, 121.10),
            end: (14.63, 121.11),
            prefs: RoutePreferences::default(),
            reply: None,
        });

        bus.begin_collection();
        assert!(!bus.graph_updated);
        assert!(bus.flood_data.is_empty());
        assert_eq!(bus.pending_routes.len(), 1);
    }

    #[test]
    fn test_begin_collection_promotes_staged_items() {
        let mut bus = SharedDataBus::new();
        let ts = Utc.with_ymd_and_hms(2026, 2, 8, 6, 0, 0).unwrap();
        bus.inbox_scout.push(ScoutReport::new("Nangka", 0.5, ts));
        // Leftovers from the previous tick get dropped, staged items promoted
        bus.scout_data.push(ScoutReport::new("Stale", 0.1, ts));

        bus.begin_collection();
        assert_eq!(bus.scout_data.len(), 1);
        assert_eq!(bus.scout_data[0].location_label, "Nangka");
        assert!(bus.inbox_scout.is_empty());
    }

    #[test]
    fn test_request_ids_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }
}
