// =============================================================================
// routes.rs — THE MAP ROOM
// =============================================================================
//
// Routes and their stops. A route owns its stop sequence outright: stops are
// value objects living inside the route, in order, with no free-floating
// stop table and no ORM-style cascade theatrics. Deleting a route removes
// its stops because they are literally inside it. Ownership as the borrow
// checker intended.
//
// Stop sequences are 1-based, contiguous, strictly increasing. The registry
// enforces this at insertion: the next stop is stop len+1 or it is a
// Validation error. Out-of-order route data is how riders end up at the
// wrong end of town, and we take a hard line on it.
// =============================================================================

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::geo;
use crate::models::{new_id, Route, RouteStop};

/// The route registry. All route/stop reads and writes go through here.
pub struct RouteRegistry {
    /// Route id -> route. The route carries its stops.
    routes: RwLock<HashMap<String, Route>>,
    /// Public route number -> route id, for uniqueness checks and lookups.
    numbers: RwLock<HashMap<String, String>>,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            numbers: RwLock::new(HashMap::new()),
        }
    }

    /// Create a route with no stops yet. Duplicate route numbers are a
    /// Conflict — the city only gets one route 42.
    pub fn create(
        &self,
        route_number: impl Into<String>,
        name: impl Into<String>,
        start_location: Option<String>,
        end_location: Option<String>,
    ) -> EngineResult<Route> {
        let route_number = route_number.into();
        if route_number.trim().is_empty() {
            return Err(EngineError::Validation("route number is required".into()));
        }

        let route = Route {
            id: new_id(),
            route_number: route_number.clone(),
            name: name.into(),
            start_location,
            end_location,
            stops: Vec::new(),
        };

        // Claim the number first, then insert; the two locks are never
        // held at the same time, here or in delete().
        {
            let mut numbers = self.numbers.write();
            if numbers.contains_key(&route_number) {
                return Err(EngineError::Conflict(format!(
                    "route number {} already exists",
                    route_number
                )));
            }
            numbers.insert(route_number, route.id.clone());
        }
        self.routes.write().insert(route.id.clone(), route.clone());

        info!(route_id = %route.id, route = %route, "Route created");
        Ok(route)
    }

    /// Append a stop to a route. The sequence number must be exactly
    /// one past the current last stop — contiguous, strictly increasing,
    /// no gaps, no do-overs.
    pub fn add_stop(
        &self,
        route_id: &str,
        stop_name: impl Into<String>,
        latitude: f64,
        longitude: f64,
        sequence: u32,
        scheduled_arrival: Option<String>,
    ) -> EngineResult<RouteStop> {
        if !geo::valid_coordinates(latitude, longitude) {
            return Err(EngineError::Validation(format!(
                "stop coordinates out of range: ({}, {})",
                latitude, longitude
            )));
        }

        let mut routes = self.routes.write();
        let route = routes
            .get_mut(route_id)
            .ok_or_else(|| EngineError::not_found("route", route_id))?;

        let expected = route.stops.len() as u32 + 1;
        if sequence != expected {
            return Err(EngineError::Validation(format!(
                "stop sequence must be contiguous and ascending: expected {}, got {}",
                expected, sequence
            )));
        }

        let stop = RouteStop {
            id: new_id(),
            stop_name: stop_name.into(),
            latitude,
            longitude,
            sequence,
            scheduled_arrival,
        };

        route.stops.push(stop.clone());
        debug!(
            route_id = route_id,
            stop_id = %stop.id,
            sequence = sequence,
            "Stop appended to route"
        );
        Ok(stop)
    }

    /// Fetch a route (with its stops, already in sequence order).
    pub fn get(&self, route_id: &str) -> EngineResult<Route> {
        self.routes
            .read()
            .get(route_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("route", route_id))
    }

    /// The stops of a route, in sequence order.
    pub fn stops(&self, route_id: &str) -> EngineResult<Vec<RouteStop>> {
        self.get(route_id).map(|r| r.stops)
    }

    /// Find a stop by id across ALL routes. Returns the owning route's id
    /// alongside the stop. Linear in the number of routes, which for a
    /// city fleet is a rounding error.
    pub fn find_stop(&self, stop_id: &str) -> EngineResult<(String, RouteStop)> {
        let routes = self.routes.read();
        for route in routes.values() {
            if let Some(stop) = route.stops.iter().find(|s| s.id == stop_id) {
                return Ok((route.id.clone(), stop.clone()));
            }
        }
        Err(EngineError::not_found("stop", stop_id))
    }

    /// Does this route exist? Bus registration asks before assigning.
    pub fn exists(&self, route_id: &str) -> bool {
        self.routes.read().contains_key(route_id)
    }

    /// Delete a route and, with it, every stop it owns. One explicit
    /// operation — the stops go because the route was their arena, not
    /// because anything cascaded.
    pub fn delete(&self, route_id: &str) -> EngineResult<Route> {
        let route = {
            let mut routes = self.routes.write();
            routes
                .remove(route_id)
                .ok_or_else(|| EngineError::not_found("route", route_id))?
        };
        self.numbers.write().remove(&route.route_number);
        info!(
            route_id = route_id,
            stops_removed = route.stops.len(),
            "Route deleted along with its stops"
        );
        Ok(route)
    }

    /// All routes, creation order not guaranteed.
    pub fn list(&self) -> Vec<Route> {
        self.routes.read().values().cloned().collect()
    }
}

impl Default for RouteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_route() -> (RouteRegistry, Route) {
        let registry = RouteRegistry::new();
        let route = registry
            .create("42", "Crosstown Express", Some("Depot".into()), Some("Harbor".into()))
            .unwrap();
        (registry, route)
    }

    #[test]
    fn test_duplicate_route_number_is_conflict() {
        let (registry, _) = registry_with_route();
        assert!(matches!(
            registry.create("42", "Imposter Line", None, None),
            Err(EngineError::Conflict(_))
        ));
    }

    #[test]
    fn test_stops_must_be_appended_in_sequence() {
        let (registry, route) = registry_with_route();
        registry.add_stop(&route.id, "First", 40.0, -74.0, 1, None).unwrap();
        registry.add_stop(&route.id, "Second", 40.01, -74.0, 2, None).unwrap();

        // Skipping ahead is rejected.
        assert!(matches!(
            registry.add_stop(&route.id, "Fifth", 40.02, -74.0, 5, None),
            Err(EngineError::Validation(_))
        ));
        // So is repeating a sequence number.
        assert!(matches!(
            registry.add_stop(&route.id, "Second Again", 40.02, -74.0, 2, None),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_stops_come_back_in_sequence_order() {
        let (registry, route) = registry_with_route();
        for (i, name) in ["A", "B", "C"].iter().enumerate() {
            registry
                .add_stop(&route.id, *name, 40.0 + i as f64 * 0.01, -74.0, i as u32 + 1, None)
                .unwrap();
        }
        let stops = registry.stops(&route.id).unwrap();
        let sequences: Vec<u32> = stops.iter().map(|s| s.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[test]
    fn test_bad_stop_coordinates_are_validation_errors() {
        let (registry, route) = registry_with_route();
        assert!(matches!(
            registry.add_stop(&route.id, "Nowhere", 123.0, -74.0, 1, None),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_find_stop_searches_all_routes() {
        let (registry, route_a) = registry_with_route();
        let route_b = registry.create("7X", "Hill Climber", None, None).unwrap();
        registry.add_stop(&route_a.id, "A1", 40.0, -74.0, 1, None).unwrap();
        let b1 = registry.add_stop(&route_b.id, "B1", 41.0, -73.0, 1, None).unwrap();

        let (owner, found) = registry.find_stop(&b1.id).unwrap();
        assert_eq!(owner, route_b.id);
        assert_eq!(found.stop_name, "B1");
    }

    #[test]
    fn test_delete_takes_the_stops_with_it() {
        let (registry, route) = registry_with_route();
        let stop = registry.add_stop(&route.id, "Gone Soon", 40.0, -74.0, 1, None).unwrap();

        registry.delete(&route.id).unwrap();

        assert!(matches!(registry.get(&route.id), Err(EngineError::NotFound { .. })));
        assert!(matches!(registry.find_stop(&stop.id), Err(EngineError::NotFound { .. })));
        // And the number is free again.
        assert!(registry.create("42", "Reborn", None, None).is_ok());
    }
}
