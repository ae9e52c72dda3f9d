// =============================================================================
// engine.rs — THE CENTRAL NERVOUS SYSTEM
// =============================================================================
//
// The one front door. Every logical operation the outside world can ask of
// this system — driver position updates, rider ETA queries, the whole
// report lifecycle, trust administration — is a method here. The gateway
// deserializes requests and calls these methods; nothing outside this
// module reaches around it to poke a registry directly.
//
// This is also the error boundary. Domain failures come back as
// EngineResult and get recovered into a structured (kind, message) payload
// for the wire. Internal failures are logged in full and surfaced as a
// generic apology — callers get honesty, not stack traces. Nothing here
// retries anything; if the caller wants retry policy, the caller can
// bring their own.
//
// Identity is explicit everywhere: every workflow call that acts on
// someone's behalf takes their id as a parameter. There is no ambient
// "current user" lurking in a thread-local. We tried that once,
// civilizationally, and look where it got us.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

use crate::config::Config;
use crate::dedup::SubmissionGuard;
use crate::error::{EngineError, EngineResult};
use crate::eta::EtaEngine;
use crate::events::{EventBus, TransitEvent};
use crate::fleet::FleetRegistry;
use crate::metrics::MetricsCollector;
use crate::models::{
    Bus, BusStatus, EtaEntry, LocationSample, LocationSnapshot, Report, ReportStatus,
    ReportSubmission, RiderProfile, Route, RouteStop,
};
use crate::reports::{ReportWorkflow, WorkflowPolicy};
use crate::routes::RouteRegistry;
use crate::trust::TrustLedger;

/// The structured failure payload, as it crosses the wire.
/// `kind` is the stable taxonomy string; `message` is caller-safe.
#[derive(Debug, Clone, Serialize)]
pub struct FailurePayload {
    pub kind: &'static str,
    pub message: String,
}

/// The engine. One of these per process, shared behind an Arc.
pub struct Engine {
    fleet: Arc<FleetRegistry>,
    routes: Arc<RouteRegistry>,
    trust: Arc<TrustLedger>,
    eta: EtaEngine,
    workflow: ReportWorkflow,
    events: EventBus,
    metrics: Arc<MetricsCollector>,
}

impl Engine {
    /// Assemble the whole machine from configuration.
    pub fn new(config: &Config, events: EventBus, metrics: Arc<MetricsCollector>) -> Self {
        let fleet = Arc::new(FleetRegistry::new());
        let routes = Arc::new(RouteRegistry::new());
        let trust = Arc::new(TrustLedger::new(config.initial_trust_score));
        let guard = Arc::new(SubmissionGuard::new(
            config.bloom_expected_items,
            config.bloom_false_positive_rate,
            config.lru_cache_size,
            config.bloom_rotation_interval.as_secs(),
        ));

        let eta = EtaEngine::new(
            Arc::clone(&fleet),
            Arc::clone(&routes),
            config.average_speed_kmh,
        );
        let workflow = ReportWorkflow::new(
            WorkflowPolicy {
                verification_threshold: config.verification_threshold,
                default_award_points: config.default_award_points,
                high_severity_threshold: config.high_severity_threshold,
            },
            Arc::clone(&fleet),
            Arc::clone(&trust),
            guard,
            events.clone(),
        );

        Self {
            fleet,
            routes,
            trust,
            eta,
            workflow,
            events,
            metrics,
        }
    }

    // =========================================================================
    // ERROR RECOVERY
    // =========================================================================

    /// Recover a domain error into its wire payload, tallying it on the
    /// way. Internal errors get logged in full here — this is the last
    /// place the details exist before redaction.
    pub fn recover(&self, err: &EngineError) -> FailurePayload {
        self.metrics.increment_error_kind(err.kind());
        if let EngineError::Internal(detail) = err {
            error!(detail = %detail, "Internal engine failure");
        }
        FailurePayload {
            kind: err.kind(),
            message: err.public_message(),
        }
    }

    // =========================================================================
    // RIDERS & TRUST
    // =========================================================================

    pub fn register_rider(
        &self,
        name: &str,
        email: Option<String>,
    ) -> EngineResult<RiderProfile> {
        if name.trim().is_empty() {
            return Err(EngineError::Validation("rider name is required".into()));
        }
        Ok(self.trust.register(name, email))
    }

    pub fn rider_profile(&self, rider_id: &str) -> EngineResult<RiderProfile> {
        self.trust.profile(rider_id)
    }

    pub fn trust_score(&self, rider_id: &str) -> EngineResult<i64> {
        self.trust.score(rider_id)
    }

    /// Administrative override, outside the report workflow entirely.
    pub fn set_trust_score(&self, rider_id: &str, score: i64) -> EngineResult<i64> {
        let new_score = self.trust.set(rider_id, score)?;
        self.events.emit(TransitEvent::TrustOverridden {
            rider_id: rider_id.to_string(),
            new_score,
        });
        Ok(new_score)
    }

    // =========================================================================
    // ROUTES
    // =========================================================================

    pub fn create_route(
        &self,
        route_number: &str,
        name: &str,
        start_location: Option<String>,
        end_location: Option<String>,
    ) -> EngineResult<Route> {
        self.routes
            .create(route_number, name, start_location, end_location)
    }

    pub fn add_stop(
        &self,
        route_id: &str,
        stop_name: &str,
        latitude: f64,
        longitude: f64,
        sequence: u32,
        scheduled_arrival: Option<String>,
    ) -> EngineResult<RouteStop> {
        self.routes
            .add_stop(route_id, stop_name, latitude, longitude, sequence, scheduled_arrival)
    }

    pub fn route_stops(&self, route_id: &str) -> EngineResult<Vec<RouteStop>> {
        self.routes.stops(route_id)
    }

    pub fn get_route(&self, route_id: &str) -> EngineResult<Route> {
        self.routes.get(route_id)
    }

    pub fn list_routes(&self) -> Vec<Route> {
        self.routes.list()
    }

    /// Delete a route and its stops in one explicit operation. Buses
    /// assigned to it keep their dangling assignment cleared.
    pub fn delete_route(&self, route_id: &str) -> EngineResult<Route> {
        let route = self.routes.delete(route_id)?;
        for bus in self.fleet.list() {
            if bus.route_id.as_deref() == Some(route_id) {
                let _ = self.fleet.assign_route(&bus.id, None);
            }
        }
        Ok(route)
    }

    // =========================================================================
    // FLEET & LOCATION
    // =========================================================================

    pub fn register_bus(
        &self,
        bus_number: &str,
        model: Option<String>,
        capacity: Option<u32>,
        route_id: Option<String>,
    ) -> EngineResult<Bus> {
        if let Some(rid) = route_id.as_deref() {
            if !self.routes.exists(rid) {
                return Err(EngineError::not_found("route", rid));
            }
        }
        self.fleet.register(bus_number, model, capacity, route_id)
    }

    pub fn assign_route(&self, bus_id: &str, route_id: Option<String>) -> EngineResult<Bus> {
        if let Some(rid) = route_id.as_deref() {
            if !self.routes.exists(rid) {
                return Err(EngineError::not_found("route", rid));
            }
        }
        self.fleet.assign_route(bus_id, route_id)
    }

    pub fn set_bus_status(&self, bus_id: &str, status: BusStatus) -> EngineResult<Bus> {
        self.fleet.set_status(bus_id, status)
    }

    pub fn get_bus(&self, bus_id: &str) -> EngineResult<Bus> {
        self.fleet.get(bus_id)
    }

    pub fn list_buses(&self) -> Vec<Bus> {
        self.fleet.list()
    }

    pub fn active_buses(&self) -> Vec<Bus> {
        self.fleet.active()
    }

    /// A driver's device phoning in. The steady heartbeat of the system.
    pub fn update_location(
        &self,
        bus_id: &str,
        latitude: f64,
        longitude: f64,
        speed: Option<f64>,
        heading: Option<f64>,
    ) -> EngineResult<LocationSnapshot> {
        let sample =
            self.fleet
                .record_location(bus_id, latitude, longitude, speed, heading, Utc::now())?;
        self.metrics.increment_location_updates();

        let bus = self.fleet.get(bus_id)?;
        self.events.emit(TransitEvent::LocationRecorded {
            bus_number: bus.bus_number.clone(),
            sample: sample.clone(),
        });
        self.metrics.record_events_dropped(self.events.dropped());

        Ok(LocationSnapshot {
            bus_id: sample.bus_id,
            bus_number: bus.bus_number,
            latitude: Some(sample.latitude),
            longitude: Some(sample.longitude),
            speed: sample.speed,
            heading: sample.heading,
            last_updated: Some(sample.timestamp),
        })
    }

    pub fn current_location(&self, bus_id: &str) -> EngineResult<LocationSnapshot> {
        self.fleet.current_location(bus_id)
    }

    pub fn location_history(
        &self,
        bus_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<Vec<LocationSample>> {
        self.fleet.history_between(bus_id, start, end)
    }

    // =========================================================================
    // ETA
    // =========================================================================

    pub fn eta_all_stops(&self, bus_id: &str) -> EngineResult<Vec<EtaEntry>> {
        self.metrics.increment_eta_route_requests();
        self.eta.eta_all_stops(bus_id)
    }

    pub fn eta_for_stop(&self, bus_id: &str, stop_id: &str) -> EngineResult<EtaEntry> {
        self.metrics.increment_eta_stop_requests();
        self.eta.eta_for_stop(bus_id, stop_id)
    }

    pub fn is_near(&self, bus_id: &str, stop_id: &str, radius_km: f64) -> EngineResult<bool> {
        self.metrics.increment_proximity_checks();
        self.eta.is_near(bus_id, stop_id, radius_km)
    }

    // =========================================================================
    // REPORTS
    // =========================================================================

    pub fn submit_report(&self, submission: ReportSubmission) -> EngineResult<Report> {
        match self.workflow.submit(submission) {
            Ok(report) => {
                self.metrics.increment_reports_submitted();
                self.metrics.record_events_dropped(self.events.dropped());
                Ok(report)
            }
            Err(err) => {
                // The guard's verdict shows up as a Conflict; count it
                // separately so the dashboard can see spam pressure.
                if matches!(err, EngineError::Conflict(_)) {
                    self.metrics.increment_duplicates_blocked();
                }
                Err(err)
            }
        }
    }

    pub fn verify_report(&self, report_id: &str) -> EngineResult<Report> {
        let report = self.workflow.peer_verify(report_id)?;
        self.metrics.increment_peer_verifications();
        if report.status == ReportStatus::Verified {
            // Terminal reports reject further verifies, so VERIFIED here
            // means this exact call tipped the threshold.
            self.metrics.increment_auto_verified();
        }
        Ok(report)
    }

    pub fn validate_report(
        &self,
        report_id: &str,
        admin_id: &str,
        approved: bool,
        points: Option<u32>,
    ) -> EngineResult<Report> {
        let report = self
            .workflow
            .admin_validate(report_id, admin_id, approved, points)?;
        if approved {
            self.metrics.increment_approved();
            self.metrics.add_trust_points(u64::from(report.points_awarded));
        } else {
            self.metrics.increment_rejected();
        }
        Ok(report)
    }

    pub fn get_report(&self, report_id: &str) -> EngineResult<Report> {
        self.workflow.get(report_id)
    }

    pub fn reports_by_bus(&self, bus_id: &str) -> Vec<Report> {
        self.workflow.by_bus(bus_id)
    }

    pub fn reports_by_rider(&self, rider_id: &str) -> Vec<Report> {
        self.workflow.by_rider(rider_id)
    }

    pub fn reports_by_status(&self, status: ReportStatus) -> Vec<Report> {
        self.workflow.by_status(status)
    }

    pub fn pending_by_severity(&self) -> Vec<Report> {
        self.workflow.pending_by_severity()
    }
}
