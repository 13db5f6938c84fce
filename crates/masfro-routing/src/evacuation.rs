//! In-memory evacuation center directory.
//!
//! Append-only table keyed by center name. Status recomputes on every
//! occupancy write: full at 100% of capacity, limited at 70%, available below.

use serde::Serialize;
use tracing::info;

use masfro_core::{CenterStatus, EvacuationCenter, MasfroError, MasfroResult};

/// Result of an `add_evacuees` call. `accepted + rejected` equals the
/// requested count when adding; removals clamp at zero occupancy.
#[derive(Debug, Clone, Serialize)]
pub struct EvacueeUpdate {
    pub accepted: u32,
    pub rejected: u32,
    pub center: EvacuationCenter,
}

/// Directory of evacuation centers with occupancy tracking.
#[derive(Debug, Clone, Default)]
pub struct EvacuationDirectory {
    centers: Vec<EvacuationCenter>,
}

impl EvacuationDirectory {
    pub fn new(centers: Vec<EvacuationCenter>) -> Self {
        Self { centers }
    }

    pub fn len(&self) -> usize {
        self.centers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.centers.is_empty()
    }

    pub fn list_all(&self) -> &[EvacuationCenter] {
        &self.centers
    }

    /// Centers that can still take evacuees (available or limited).
    pub fn list_available(&self) -> Vec<&EvacuationCenter> {
        self.centers
            .iter()
            .filter(|c| c.status != CenterStatus::Full)
            .collect()
    }

    pub fn lookup(&self, name: &str) -> Option<&EvacuationCenter> {
        self.centers.iter().find(|c| c.name == name)
    }

    fn lookup_mut(&mut self, name: &str) -> MasfroResult<&mut EvacuationCenter> {
        self.centers
            .iter_mut()
            .find(|c| c.name == name)
            .ok_or_else(|| MasfroError::UnknownCenter(name.to_string()))
    }

    /// Set absolute occupancy and recompute status. An occupancy beyond the
    /// center's capacity is refused outright (use `add_evacuees` for
    /// partial-accept semantics).
    pub fn set_occupancy(&mut self, name: &str, occupancy: u32) -> MasfroResult<&EvacuationCenter> {
        let center = self.lookup_mut(name)?;
        if occupancy > center.capacity {
            return Err(MasfroError::CapacityExceeded {
                name: center.name.clone(),
                requested: occupancy,
                available: center.capacity,
            });
        }
        center.current_occupancy = occupancy;
        center.status = CenterStatus::from_occupancy(center.current_occupancy, center.capacity);
        Ok(&*center)
    }

    /// Add (or with a negative delta, remove) evacuees. Never exceeds
    /// capacity; the overflow is reported back as `rejected`. Removals clamp
    /// at zero.
    pub fn add_evacuees(&mut self, name: &str, delta: i64) -> MasfroResult<EvacueeUpdate> {
        let center = self.lookup_mut(name)?;
        let (accepted, rejected) = if delta >= 0 {
            let requested = delta as u32;
            let space = center.capacity - center.current_occupancy;
            let accepted = requested.min(space);
            center.current_occupancy += accepted;
            (accepted, requested - accepted)
        } else {
            let requested = delta.unsigned_abs() as u32;
            let removed = requested.min(center.current_occupancy);
            center.current_occupancy -= removed;
            (removed, requested - removed)
        };
        center.status = CenterStatus::from_occupancy(center.current_occupancy, center.capacity);
        Ok(EvacueeUpdate {
            accepted,
            rejected,
            center: center.clone(),
        })
    }

    /// Zero every center's occupancy. Used by orchestrator reset.
    pub fn reset_all(&mut self) {
        for center in &mut self.centers {
            center.current_occupancy = 0;
            center.status = CenterStatus::from_occupancy(0, center.capacity);
        }
        info!(centers = self.centers.len(), "evacuation occupancy reset");
    }

    /// Total occupancy across all centers.
    pub fn total_occupancy(&self) -> u64 {
        self.centers.iter().map(|c| c.current_occupancy as u64).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> EvacuationDirectory {
        EvacuationDirectory::new(vec![
            EvacuationCenter::new("Nangka Elementary", 14.6735, 121.1082, 100),
            EvacuationCenter::new("Marikina Sports Center", 14.6358, 121.0987, 2000),
        ])
    }

    #[test]
    fn test_lookup() {
        let dir = directory();
        assert!(dir.lookup("Nangka Elementary").is_some());
        assert!(dir.lookup("Unknown Hall").is_none());
    }

    #[test]
    fn test_unknown_center_error() {
        let mut dir = directory();
        let err = dir.add_evacuees("Unknown Hall", 10).unwrap_err();
        assert!(matches!(err, MasfroError::UnknownCenter(_)));
    }

    #[test]
    fn test_add_evacuees_and_status_progression() {
        let mut dir = directory();
        let update = dir.add_evacuees("Nangka Elementary", 50).unwrap();
        assert_eq!(update.accepted, 50);
        assert_eq!(update.rejected, 0);
        assert_eq!(update.center.status, CenterStatus::Available);

        let update = dir.add_evacuees("Nangka Elementary", 25).unwrap();
        assert_eq!(update.center.current_occupancy, 75);
        assert_eq!(update.center.status, CenterStatus::Limited);

        let update = dir.add_evacuees("Nangka Elementary", 40).unwrap();
        assert_eq!(update.accepted, 25);
        assert_eq!(update.rejected, 15);
        assert_eq!(update.center.current_occupancy, 100);
        assert_eq!(update.center.status, CenterStatus::Full);
    }

    #[test]
    fn test_add_then_remove_round_trips() {
        let mut dir = directory();
        dir.add_evacuees("Nangka Elementary", 30).unwrap();
        let before = dir.lookup("Nangka Elementary").unwrap().current_occupancy;

        dir.add_evacuees("Nangka Elementary", 20).unwrap();
        dir.add_evacuees("Nangka Elementary", -20).unwrap();
        assert_eq!(
            dir.lookup("Nangka Elementary").unwrap().current_occupancy,
            before
        );

        // Removing more than present clamps at zero
        let update = dir.add_evacuees("Nangka Elementary", -500).unwrap();
        assert_eq!(update.accepted, 30);
        assert_eq!(update.rejected, 470);
        assert_eq!(update.center.current_occupancy, 0);
    }

    #[test]
    fn test_set_occupancy_refuses_over_capacity() {
        let mut dir = directory();
        let err = dir.set_occupancy("Nangka Elementary", 500).unwrap_err();
        assert!(matches!(err, MasfroError::CapacityExceeded { .. }));

        let center = dir.set_occupancy("Nangka Elementary", 100).unwrap();
        assert_eq!(center.current_occupancy, 100);
        assert_eq!(center.status, CenterStatus::Full);
    }

    #[test]
    fn test_list_available_excludes_full() {
        let mut dir = directory();
        dir.set_occupancy("Nangka Elementary", 100).unwrap();
        let available = dir.list_available();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].name, "Marikina Sports Center");
    }

    #[test]
    fn test_reset_all() {
        let mut dir = directory();
        dir.add_evacuees("Nangka Elementary", 80).unwrap();
        dir.add_evacuees("Marikina Sports Center", 300).unwrap();
        dir.reset_all();
        assert_eq!(dir.total_occupancy(), 0);
        assert!(dir
            .list_all()
            .iter()
            .all(|c| c.status == CenterStatus::Available));
    }
}
