// =============================================================================
// fleet.rs — THE FLEET SITUATION ROOM
// =============================================================================
//
// Every bus the city owns, where it was last seen, and every GPS fix it has
// ever reported. This module is the ONLY write path for bus positions: a
// driver's device calls record_location, and nothing else in the engine is
// allowed to touch the position fields. The ETA engine reads, the report
// workflow reads, the gateway reads. One writer, many readers, zero drama.
//
// Each bus lives in its own RwLock'd cell holding both the current position
// and the append-only sample history. The position update and the history
// append happen under one write lock, as one atomic unit — a reader can
// never observe a current position that disagrees with the last history
// entry. Concurrent updates for DIFFERENT buses don't contend at all.
// =============================================================================

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::geo;
use crate::models::{new_id, Bus, BusStatus, LocationSample, LocationSnapshot};

/// Everything we know about one bus, guarded by one lock.
/// Invariant: `bus.current_latitude/longitude/last_updated` always mirror
/// the final entry of `history` (or are None when history is empty).
struct BusCell {
    bus: Bus,
    history: Vec<LocationSample>,
}

/// The fleet registry. Buses check in here; everyone else just asks.
pub struct FleetRegistry {
    /// Bus id -> its cell. The outer lock only guards map membership;
    /// position traffic takes the per-bus inner lock.
    buses: RwLock<HashMap<String, Arc<RwLock<BusCell>>>>,
    /// Painted-on bus number -> bus id, for uniqueness and lookups.
    numbers: RwLock<HashMap<String, String>>,
}

impl FleetRegistry {
    pub fn new() -> Self {
        Self {
            buses: RwLock::new(HashMap::new()),
            numbers: RwLock::new(HashMap::new()),
        }
    }

    /// Add a bus to the fleet. Duplicate bus numbers are a Conflict.
    /// The new bus has no position — it hasn't said anything yet.
    pub fn register(
        &self,
        bus_number: impl Into<String>,
        model: Option<String>,
        capacity: Option<u32>,
        route_id: Option<String>,
    ) -> EngineResult<Bus> {
        let bus_number = bus_number.into();
        if bus_number.trim().is_empty() {
            return Err(EngineError::Validation("bus number is required".into()));
        }

        let bus = Bus {
            id: new_id(),
            bus_number: bus_number.clone(),
            model,
            capacity,
            status: BusStatus::Active,
            route_id,
            current_latitude: None,
            current_longitude: None,
            last_updated: None,
        };

        // Claim the number first; the two locks are never held together.
        {
            let mut numbers = self.numbers.write();
            if numbers.contains_key(&bus_number) {
                return Err(EngineError::Conflict(format!(
                    "bus number {} already exists",
                    bus_number
                )));
            }
            numbers.insert(bus_number, bus.id.clone());
        }
        self.buses.write().insert(
            bus.id.clone(),
            Arc::new(RwLock::new(BusCell {
                bus: bus.clone(),
                history: Vec::new(),
            })),
        );

        info!(bus_id = %bus.id, bus = %bus, "Bus registered");
        Ok(bus)
    }

    /// Record a GPS fix. THE single write path for positions.
    ///
    /// Under one per-bus write lock: update the current-position fields,
    /// stamp last_updated, and append the immutable sample to history.
    /// Returns the sample that was appended.
    pub fn record_location(
        &self,
        bus_id: &str,
        latitude: f64,
        longitude: f64,
        speed: Option<f64>,
        heading: Option<f64>,
        timestamp: DateTime<Utc>,
    ) -> EngineResult<LocationSample> {
        if !geo::valid_coordinates(latitude, longitude) {
            return Err(EngineError::Validation(format!(
                "coordinates out of range: ({}, {})",
                latitude, longitude
            )));
        }
        if let Some(h) = heading {
            if !(0.0..=360.0).contains(&h) {
                return Err(EngineError::Validation(format!(
                    "heading out of range: {}",
                    h
                )));
            }
        }

        let cell = self.cell(bus_id)?;
        let sample = LocationSample {
            bus_id: bus_id.to_string(),
            latitude,
            longitude,
            speed,
            heading,
            timestamp,
        };

        {
            let mut cell = cell.write();
            cell.bus.current_latitude = Some(latitude);
            cell.bus.current_longitude = Some(longitude);
            cell.bus.last_updated = Some(timestamp);
            cell.history.push(sample.clone());
        }

        debug!(
            bus_id = bus_id,
            lat = latitude,
            lon = longitude,
            "Location recorded"
        );
        Ok(sample)
    }

    /// Latest known position. A bus that exists but has never reported
    /// comes back with None coordinates — that is an answer, not an error.
    pub fn current_location(&self, bus_id: &str) -> EngineResult<LocationSnapshot> {
        let cell = self.cell(bus_id)?;
        let cell = cell.read();
        let last = cell.history.last();
        Ok(LocationSnapshot {
            bus_id: cell.bus.id.clone(),
            bus_number: cell.bus.bus_number.clone(),
            latitude: cell.bus.current_latitude,
            longitude: cell.bus.current_longitude,
            speed: last.and_then(|s| s.speed),
            heading: last.and_then(|s| s.heading),
            last_updated: cell.bus.last_updated,
        })
    }

    /// Samples between `start` and `end`, inclusive on both ends,
    /// chronological. No smoothing, no interpolation — raw fixes only.
    pub fn history_between(
        &self,
        bus_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<Vec<LocationSample>> {
        let cell = self.cell(bus_id)?;
        let cell = cell.read();
        let mut samples: Vec<LocationSample> = cell
            .history
            .iter()
            .filter(|s| s.timestamp >= start && s.timestamp <= end)
            .cloned()
            .collect();
        samples.sort_by_key(|s| s.timestamp);
        Ok(samples)
    }

    /// Assign (or clear) the route a bus runs. The caller vouches that the
    /// route id actually exists; the engine facade checks before calling.
    pub fn assign_route(&self, bus_id: &str, route_id: Option<String>) -> EngineResult<Bus> {
        let cell = self.cell(bus_id)?;
        let mut cell = cell.write();
        cell.bus.route_id = route_id;
        Ok(cell.bus.clone())
    }

    /// Administrative status change: ACTIVE, INACTIVE, MAINTENANCE.
    pub fn set_status(&self, bus_id: &str, status: BusStatus) -> EngineResult<Bus> {
        let cell = self.cell(bus_id)?;
        let mut cell = cell.write();
        cell.bus.status = status;
        info!(bus_id = bus_id, status = %status, "Bus status changed");
        Ok(cell.bus.clone())
    }

    /// A snapshot of one bus.
    pub fn get(&self, bus_id: &str) -> EngineResult<Bus> {
        let cell = self.cell(bus_id)?;
        let cell = cell.read();
        Ok(cell.bus.clone())
    }

    /// Does this bus exist? The report workflow asks before accepting
    /// a complaint about it.
    pub fn exists(&self, bus_id: &str) -> bool {
        self.buses.read().contains_key(bus_id)
    }

    /// Every bus in the fleet.
    pub fn list(&self) -> Vec<Bus> {
        let cells: Vec<_> = self.buses.read().values().cloned().collect();
        cells.iter().map(|c| c.read().bus.clone()).collect()
    }

    /// Only the buses currently earning their keep.
    pub fn active(&self) -> Vec<Bus> {
        self.list()
            .into_iter()
            .filter(|b| b.status == BusStatus::Active)
            .collect()
    }

    fn cell(&self, bus_id: &str) -> EngineResult<Arc<RwLock<BusCell>>> {
        self.buses
            .read()
            .get(bus_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("bus", bus_id))
    }
}

impl Default for FleetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_record_then_read_back_exactly() {
        let fleet = FleetRegistry::new();
        let bus = fleet.register("42", None, None, None).unwrap();
        let t = ts(0);

        fleet
            .record_location(&bus.id, 40.7128, -74.0060, Some(28.0), Some(90.0), t)
            .unwrap();

        let snap = fleet.current_location(&bus.id).unwrap();
        assert_eq!(snap.latitude, Some(40.7128));
        assert_eq!(snap.longitude, Some(-74.0060));
        assert_eq!(snap.last_updated, Some(t));

        // Inclusive point query returns exactly the one sample.
        let history = fleet.history_between(&bus.id, t, t).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].latitude, 40.7128);
        assert_eq!(history[0].speed, Some(28.0));
    }

    #[test]
    fn test_silent_bus_is_not_an_error() {
        let fleet = FleetRegistry::new();
        let bus = fleet.register("99", None, None, None).unwrap();

        let snap = fleet.current_location(&bus.id).unwrap();
        assert_eq!(snap.latitude, None);
        assert_eq!(snap.longitude, None);
        assert_eq!(snap.last_updated, None);
    }

    #[test]
    fn test_unknown_bus_is_not_found() {
        let fleet = FleetRegistry::new();
        assert!(matches!(
            fleet.current_location("ghost-bus"),
            Err(EngineError::NotFound { .. })
        ));
        assert!(matches!(
            fleet.record_location("ghost-bus", 0.0, 0.0, None, None, ts(0)),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_bus_number_is_conflict() {
        let fleet = FleetRegistry::new();
        fleet.register("42", None, None, None).unwrap();
        assert!(matches!(
            fleet.register("42", None, None, None),
            Err(EngineError::Conflict(_))
        ));
    }

    #[test]
    fn test_bad_coordinates_are_rejected() {
        let fleet = FleetRegistry::new();
        let bus = fleet.register("42", None, None, None).unwrap();
        assert!(matches!(
            fleet.record_location(&bus.id, 91.0, 0.0, None, None, ts(0)),
            Err(EngineError::Validation(_))
        ));
        assert!(matches!(
            fleet.record_location(&bus.id, 0.0, 0.0, None, Some(400.0), ts(0)),
            Err(EngineError::Validation(_))
        ));
        // Nothing got through.
        assert!(fleet.history_between(&bus.id, ts(-10), ts(10)).unwrap().is_empty());
    }

    #[test]
    fn test_history_bounds_are_inclusive_and_ordered() {
        let fleet = FleetRegistry::new();
        let bus = fleet.register("42", None, None, None).unwrap();
        for i in 0..5 {
            fleet
                .record_location(&bus.id, 40.0 + i as f64 * 0.001, -74.0, None, None, ts(i * 60))
                .unwrap();
        }

        let slice = fleet.history_between(&bus.id, ts(60), ts(180)).unwrap();
        assert_eq!(slice.len(), 3);
        assert!(slice.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(slice[0].timestamp, ts(60));
        assert_eq!(slice[2].timestamp, ts(180));
    }

    #[test]
    fn test_concurrent_updates_keep_position_and_history_in_step() {
        let fleet = Arc::new(FleetRegistry::new());
        let bus = fleet.register("42", None, None, None).unwrap();

        let mut handles = vec![];
        for t in 0..8 {
            let fleet = Arc::clone(&fleet);
            let id = bus.id.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    fleet
                        .record_location(
                            &id,
                            40.0 + t as f64,
                            -74.0 - i as f64 * 0.0001,
                            None,
                            None,
                            ts(t * 1000 + i),
                        )
                        .unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        // No lost appends.
        let all = fleet.history_between(&bus.id, ts(0), ts(100_000)).unwrap();
        assert_eq!(all.len(), 8 * 50);

        // Current position always agrees with the most recently appended
        // sample — the two are written under one lock.
        let cell = fleet.cell(&bus.id).unwrap();
        let cell = cell.read();
        let last = cell.history.last().unwrap();
        assert_eq!(cell.bus.current_latitude, Some(last.latitude));
        assert_eq!(cell.bus.current_longitude, Some(last.longitude));
        assert_eq!(cell.bus.last_updated, Some(last.timestamp));
    }
}
