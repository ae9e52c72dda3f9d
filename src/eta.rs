// =============================================================================
// eta.rs — THE ARRIVAL PROPHECY DIVISION
// =============================================================================
//
// Given a bus with a position and a route with stops, produce the one thing
// riders actually open the app for: "when does it get HERE".
//
// Strictly read-only. This module takes consistent snapshots of a bus and
// its route's stops, does the great-circle math, and walks away. It holds
// no locks across computation, caches nothing (an ETA is stale the moment
// it's computed — why preserve it), and mutates nothing.
//
// Results come back in STOP SEQUENCE ORDER, not distance order. A route is
// a story with a beginning, middle, and end; riders read it top to bottom.
// A bus 0.4 km from stop 7 is still not arriving at stop 7 before stop 3
// on anyone's phone screen.
//
// The per-stop math is farmed out to Rayon. Is parallelizing forty
// Haversine computations overkill? Deeply. Do the other cores have
// something better to do? They do not.
// =============================================================================

use chrono::{Duration, Local};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::fleet::FleetRegistry;
use crate::geo;
use crate::models::{EtaEntry, RouteStop};
use crate::routes::RouteRegistry;

/// The ETA engine. Reads the fleet, reads the map room, answers questions.
pub struct EtaEngine {
    fleet: Arc<FleetRegistry>,
    routes: Arc<RouteRegistry>,
    /// Assumed speed for the distance→time conversion. Live per-bus speed
    /// is deliberately NOT used: a bus doing 0 km/h at a red light would
    /// otherwise promise every rider an infinite wait.
    average_speed_kmh: f64,
}

impl EtaEngine {
    pub fn new(fleet: Arc<FleetRegistry>, routes: Arc<RouteRegistry>, average_speed_kmh: f64) -> Self {
        Self {
            fleet,
            routes,
            average_speed_kmh,
        }
    }

    /// ETA from a bus to every stop on its route, in stop-sequence order.
    ///
    /// Needs both halves of the equation: a bus that has reported a
    /// position AND an assigned route. Missing either is a Precondition
    /// failure — the bus exists, it just can't prophesy yet.
    pub fn eta_all_stops(&self, bus_id: &str) -> EngineResult<Vec<EtaEntry>> {
        let bus = self.fleet.get(bus_id)?;

        let (lat, lon) = match (bus.current_latitude, bus.current_longitude) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                return Err(EngineError::Precondition(format!(
                    "bus {} has not reported a location yet",
                    bus_id
                )))
            }
        };

        let route_id = bus.route_id.as_deref().ok_or_else(|| {
            EngineError::Precondition(format!("bus {} has no assigned route", bus_id))
        })?;

        let stops = self.routes.stops(route_id)?;

        // Stops arrive already in sequence order and par_iter preserves
        // index order on collect, so the output stays route-ordered.
        let entries: Vec<EtaEntry> = stops
            .par_iter()
            .map(|stop| self.entry_for(lat, lon, stop))
            .collect();

        debug!(
            bus_id = bus_id,
            route_id = route_id,
            stops = entries.len(),
            "ETA computed for full route"
        );
        Ok(entries)
    }

    /// ETA from a bus to one specific stop.
    ///
    /// The stop is resolved across ALL routes, not just the bus's own —
    /// riders ask "when does the 42 reach the stop near my office" even
    /// when the 42 doesn't serve it, and the great-circle answer is still
    /// well-defined. Whether that's wise is an open question; the engine
    /// answers it anyway and leaves the judgment to the caller.
    pub fn eta_for_stop(&self, bus_id: &str, stop_id: &str) -> EngineResult<EtaEntry> {
        let bus = self.fleet.get(bus_id)?;
        let (_owning_route, stop) = self.routes.find_stop(stop_id)?;

        let (lat, lon) = match (bus.current_latitude, bus.current_longitude) {
            (Some(lat), Some(lon)) => (lat, lon),
            _ => {
                return Err(EngineError::Precondition(format!(
                    "bus {} has not reported a location yet",
                    bus_id
                )))
            }
        };

        Ok(self.entry_for(lat, lon, &stop))
    }

    /// Is the bus within `radius_km` of the stop right now?
    /// A bus with no position is simply not near anything — that's a
    /// `false`, not an error. Absence of evidence, in this one case, is
    /// evidence of absence.
    pub fn is_near(&self, bus_id: &str, stop_id: &str, radius_km: f64) -> EngineResult<bool> {
        let bus = self.fleet.get(bus_id)?;
        let (_owning_route, stop) = self.routes.find_stop(stop_id)?;

        match (bus.current_latitude, bus.current_longitude) {
            (Some(lat), Some(lon)) => Ok(geo::within_radius(
                lat,
                lon,
                stop.latitude,
                stop.longitude,
                radius_km,
            )),
            _ => Ok(false),
        }
    }

    /// Do the math for one stop: distance, minutes, wall-clock arrival.
    fn entry_for(&self, bus_lat: f64, bus_lon: f64, stop: &RouteStop) -> EtaEntry {
        let distance_km = geo::distance_km(bus_lat, bus_lon, stop.latitude, stop.longitude);
        let eta_minutes = geo::eta_minutes(distance_km, self.average_speed_kmh);
        EtaEntry {
            stop_id: stop.id.clone(),
            stop_name: stop.stop_name.clone(),
            distance_km,
            eta_minutes,
            estimated_arrival: arrival_clock(eta_minutes),
        }
    }
}

/// Current local wall-clock plus `minutes`, formatted "HH:MM".
/// Recomputed on every call. An arrival time is milk, not wine.
fn arrival_clock(minutes: u32) -> String {
    (Local::now() + Duration::minutes(i64::from(minutes)))
        .format("%H:%M")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    /// A fleet with one bus parked at the depot coordinates, and a route
    /// whose stops are DELIBERATELY not in geographic order: stop 2 is
    /// farther from the bus than stop 3.
    fn rig() -> (Arc<FleetRegistry>, Arc<RouteRegistry>, EtaEngine, String, Vec<String>) {
        let fleet = Arc::new(FleetRegistry::new());
        let routes = Arc::new(RouteRegistry::new());
        let engine = EtaEngine::new(Arc::clone(&fleet), Arc::clone(&routes), 30.0);

        let route = routes.create("42", "Crosstown", None, None).unwrap();
        // Bus will sit at (40.000, -74.000). Distances from there:
        //   stop 1 ~ 1.1 km, stop 2 ~ 5.6 km, stop 3 ~ 2.2 km
        let s1 = routes.add_stop(&route.id, "Near", 40.01, -74.0, 1, None).unwrap();
        let s2 = routes.add_stop(&route.id, "Far", 40.05, -74.0, 2, None).unwrap();
        let s3 = routes.add_stop(&route.id, "Middle", 40.02, -74.0, 3, None).unwrap();

        let bus = fleet
            .register("42-A", None, None, Some(route.id.clone()))
            .unwrap();
        fleet
            .record_location(&bus.id, 40.0, -74.0, None, None, Utc::now())
            .unwrap();

        (fleet, routes, engine, bus.id, vec![s1.id, s2.id, s3.id])
    }

    #[test]
    fn test_results_follow_stop_sequence_not_distance() {
        let (_fleet, _routes, engine, bus_id, stop_ids) = rig();
        let entries = engine.eta_all_stops(&bus_id).unwrap();

        // Same order as the route, even though stop 2 is the farthest.
        let ids: Vec<&str> = entries.iter().map(|e| e.stop_id.as_str()).collect();
        assert_eq!(ids, stop_ids.iter().map(String::as_str).collect::<Vec<_>>());

        // And the distances confirm the route really is geographically
        // out of order.
        assert!(entries[1].distance_km > entries[2].distance_km);
    }

    #[test]
    fn test_eta_math_flows_through() {
        let (_fleet, _routes, engine, bus_id, stop_ids) = rig();
        let entry = engine.eta_for_stop(&bus_id, &stop_ids[0]).unwrap();

        // ~1.11 km at 30 km/h is just over 2 minutes; ceil says 3.
        assert!((entry.distance_km - 1.11).abs() < 0.05);
        assert_eq!(entry.eta_minutes, 3);
        // "HH:MM"
        assert_eq!(entry.estimated_arrival.len(), 5);
        assert_eq!(&entry.estimated_arrival[2..3], ":");
    }

    #[test]
    fn test_silent_bus_cannot_prophesy() {
        let (fleet, _routes, engine, _bus_id, stop_ids) = rig();
        let mute = fleet.register("42-B", None, None, None).unwrap();

        assert!(matches!(
            engine.eta_all_stops(&mute.id),
            Err(EngineError::Precondition(_))
        ));
        assert!(matches!(
            engine.eta_for_stop(&mute.id, &stop_ids[0]),
            Err(EngineError::Precondition(_))
        ));
    }

    #[test]
    fn test_routeless_bus_cannot_prophesy_either() {
        let (fleet, _routes, engine, _bus_id, _stop_ids) = rig();
        let wanderer = fleet.register("42-C", None, None, None).unwrap();
        fleet
            .record_location(&wanderer.id, 40.0, -74.0, None, None, Utc::now())
            .unwrap();

        assert!(matches!(
            engine.eta_all_stops(&wanderer.id),
            Err(EngineError::Precondition(_))
        ));
    }

    #[test]
    fn test_eta_for_stop_is_permissive_about_route_membership() {
        let (_fleet, routes, engine, bus_id, _stop_ids) = rig();
        // A stop on a completely different route.
        let other = routes.create("7X", "Hill Climber", None, None).unwrap();
        let foreign_stop = routes
            .add_stop(&other.id, "Elsewhere", 40.03, -74.0, 1, None)
            .unwrap();

        // Still answered: any stop id against any bus's position.
        let entry = engine.eta_for_stop(&bus_id, &foreign_stop.id).unwrap();
        assert!(entry.distance_km > 0.0);
    }

    #[test]
    fn test_unknown_ids_are_not_found() {
        let (_fleet, _routes, engine, bus_id, stop_ids) = rig();
        assert!(matches!(
            engine.eta_all_stops("ghost"),
            Err(EngineError::NotFound { .. })
        ));
        assert!(matches!(
            engine.eta_for_stop(&bus_id, "no-such-stop"),
            Err(EngineError::NotFound { .. })
        ));
        assert!(matches!(
            engine.eta_for_stop("ghost", &stop_ids[0]),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[test]
    fn test_is_near_is_false_not_error_for_silent_bus() {
        let (fleet, _routes, engine, bus_id, stop_ids) = rig();
        let mute = fleet.register("42-D", None, None, None).unwrap();

        assert!(!engine.is_near(&mute.id, &stop_ids[0], 5.0).unwrap());
        // The reporting bus IS near its first stop at 2 km.
        assert!(engine.is_near(&bus_id, &stop_ids[0], 2.0).unwrap());
        assert!(!engine.is_near(&bus_id, &stop_ids[1], 2.0).unwrap());
    }
}
