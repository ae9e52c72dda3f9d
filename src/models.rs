// =============================================================================
// models.rs — THE SACRED DATA STRUCTURES OF URBAN TRANSIT
// =============================================================================
//
// These structs represent the fundamental building blocks of our bus tracking
// and crowd-report system. Each field has been carefully chosen to capture
// every conceivable piece of information about a city bus's journey from
// depot to depot, and about the riders who complain about it along the way.
//
// Is it overkill to keep a severity score on a "the bus smells weird" report?
// Yes. Do we care? Absolutely not.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Operational status of a bus.
/// A bus is either earning its keep, parked, or in the shop.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusStatus {
    /// On the road, reporting positions, accumulating complaints.
    Active,
    /// Parked at the depot. No positions expected, no ETAs promised.
    Inactive,
    /// In the shop. Somewhere a mechanic is shaking their head slowly.
    Maintenance,
}

impl fmt::Display for BusStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusStatus::Active => write!(f, "ACTIVE"),
            BusStatus::Inactive => write!(f, "INACTIVE"),
            BusStatus::Maintenance => write!(f, "MAINTENANCE"),
        }
    }
}

/// What a rider is complaining (or occasionally raving) about.
/// Compiled from several years of transit complaints. The categories are
/// exhaustive in the way only public transit grievances can be.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportType {
    /// The bus is late. The classic. The evergreen. The default.
    Delay,
    /// Sardine-tin conditions. Standing room only, and the standing room
    /// is also full.
    Overcrowding,
    /// The bus has stopped being a bus and started being scenery.
    Breakdown,
    /// Somebody's lunch from last Tuesday is still on seat 14.
    Cleanliness,
    /// The bus went somewhere the route map firmly disagrees with.
    RouteDeviation,
    /// Driving that made the rider grip the pole with both hands.
    SafetyIssue,
    /// Everything else riders come up with. They're creative.
    Other,
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportType::Delay => write!(f, "DELAY"),
            ReportType::Overcrowding => write!(f, "OVERCROWDING"),
            ReportType::Breakdown => write!(f, "BREAKDOWN"),
            ReportType::Cleanliness => write!(f, "CLEANLINESS"),
            ReportType::RouteDeviation => write!(f, "ROUTE_DEVIATION"),
            ReportType::SafetyIssue => write!(f, "SAFETY_ISSUE"),
            ReportType::Other => write!(f, "OTHER"),
        }
    }
}

/// Lifecycle state of a crowd report.
/// PENDING is the only state that can change. VERIFIED and REJECTED are
/// terminal — once the verdict is in, the verdict stays in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportStatus {
    /// Awaiting peer verification or an admin ruling.
    Pending,
    /// Confirmed — either by enough peers or by an admin. Terminal.
    Verified,
    /// An admin looked at it and said no. Terminal.
    Rejected,
}

impl ReportStatus {
    /// True once the state machine has nowhere left to go.
    pub fn is_terminal(self) -> bool {
        matches!(self, ReportStatus::Verified | ReportStatus::Rejected)
    }
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportStatus::Pending => write!(f, "PENDING"),
            ReportStatus::Verified => write!(f, "VERIFIED"),
            ReportStatus::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// A bus. The star of the show.
///
/// Position fields are None until the driver's device sends its first fix —
/// a registered-but-silent bus is a real state, distinct from "no such bus",
/// and half the ETA error handling exists because of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bus {
    /// UUID v4, assigned at registration.
    pub id: String,
    /// The number painted on the front. Unique across the fleet, because
    /// two buses both claiming to be the 42 is how riots start.
    pub bus_number: String,
    /// Manufacturer/model, if anyone bothered to record it.
    pub model: Option<String>,
    /// Seats plus generously-counted standing room.
    pub capacity: Option<u32>,
    /// Current operational status.
    pub status: BusStatus,
    /// The route this bus is assigned to, if any. A bus without a route
    /// still gets tracked — it just can't promise anyone an arrival time.
    pub route_id: Option<String>,
    /// Latest known latitude. None until the first location update.
    pub current_latitude: Option<f64>,
    /// Latest known longitude. None until the first location update.
    pub current_longitude: Option<f64>,
    /// When we last heard from this bus.
    pub last_updated: Option<DateTime<Utc>>,
}

impl fmt::Display for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bus {} [{}] ({})", self.bus_number, self.id, self.status)
    }
}

/// One GPS fix from one bus at one moment. Immutable, append-only.
/// The raw material of the whole tracking operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSample {
    pub bus_id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// km/h, if the driver's device reports it.
    pub speed: Option<f64>,
    /// Degrees clockwise from north (0–360), if reported.
    pub heading: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// A stop on a route. Owned by its route, value-object style — there is no
/// free-floating stop table, just routes carrying their stops in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteStop {
    /// UUID v4. Stops get ids so riders can ask "when does the 42 reach
    /// THIS stop", but resolution always walks the owning route.
    pub id: String,
    pub stop_name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// 1-based position along the route. Contiguous and strictly
    /// increasing — the registry enforces it at insertion.
    pub sequence: u32,
    /// Timetable arrival in "HH:MM", for routes that have one. Advisory at
    /// best; the ETA engine does not read it.
    pub scheduled_arrival: Option<String>,
}

/// A route: an identity plus an ordered sequence of stops.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Route {
    /// UUID v4, assigned at creation.
    pub id: String,
    /// The public route number ("42", "7X"). Unique, for the same
    /// riot-prevention reasons as bus numbers.
    pub route_number: String,
    pub name: String,
    pub start_location: Option<String>,
    pub end_location: Option<String>,
    /// The stops, always kept in sequence order. The route owns these
    /// outright; deleting the route takes them with it.
    pub stops: Vec<RouteStop>,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "route {} \"{}\" ({} stops)",
            self.route_number,
            self.name,
            self.stops.len()
        )
    }
}

/// A crowd-sourced condition report. Created by a rider, judged by peers
/// and admins, and — if it survives — worth trust points to its author.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// UUID v4, assigned at submission.
    pub id: String,
    /// The rider who filed it.
    pub rider_id: String,
    /// The bus it's about.
    pub bus_id: String,
    pub report_type: ReportType,
    pub status: ReportStatus,
    /// Where the rider was when they filed it.
    pub latitude: f64,
    pub longitude: f64,
    /// Free-text place name ("corner of 5th and Main"), if given.
    pub location_name: Option<String>,
    /// The rider's own words. Fed to the triage scanner, which is why
    /// "THE BUS IS ON FIRE" gets looked at before "slightly bumpy ride".
    pub description: Option<String>,
    /// Reference to an uploaded photo, if any. Storage is someone else's
    /// problem; we just carry the pointer.
    pub photo_ref: Option<String>,
    /// How many independent riders have vouched for this report.
    pub verification_count: u32,
    /// Trust points granted to the author. Non-zero only on reports an
    /// admin explicitly approved — peer auto-verification pays nothing.
    pub points_awarded: u32,
    /// The admin who issued the final verdict, if one did.
    pub validated_by: Option<String>,
    /// Triage severity, 0.0–1.0, computed from the description at
    /// submission time. Used to order the admin review queue.
    pub severity: f64,
    pub created_at: DateTime<Utc>,
}

impl Report {
    /// Deduplication key for the submission spam guard. One rider filing
    /// "DELAY on bus 42" five times in a row is enthusiasm, not five
    /// independent data points.
    pub fn dedup_key(rider_id: &str, bus_id: &str, report_type: ReportType) -> String {
        format!("{}:{}:{}", rider_id, bus_id, report_type)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} on bus {} — {} (verifications: {}, severity: {:.0}%)",
            self.id,
            self.report_type,
            self.bus_id,
            self.status,
            self.verification_count,
            self.severity * 100.0
        )
    }
}

/// Everything a rider hands over when filing a report. Deserialized
/// straight off the gateway, validated by the workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSubmission {
    pub rider_id: String,
    pub bus_id: String,
    pub report_type: ReportType,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub location_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub photo_ref: Option<String>,
}

/// A rider, as far as this engine cares: an identity and a reputation.
/// Authentication, sessions, and profile photos live elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiderProfile {
    /// UUID v4, assigned at registration.
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What riders actually want: "how far away is my bus and when does it
/// get HERE". One entry per stop, ordered by the route's stop sequence —
/// NOT by distance, because riders read routes top to bottom.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtaEntry {
    pub stop_id: String,
    pub stop_name: String,
    /// Great-circle distance from the bus's current position, in km.
    pub distance_km: f64,
    /// Minutes until arrival, rounded up. Buses do not arrive early here.
    pub eta_minutes: u32,
    /// Wall-clock arrival as "HH:MM". Recomputed fresh on every call;
    /// nothing this perishable is worth caching.
    pub estimated_arrival: String,
}

/// Snapshot of a bus's latest position, as returned by location queries.
/// Coordinates are None for a bus that exists but has never phoned home.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationSnapshot {
    pub bus_id: String,
    pub bus_number: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub speed: Option<f64>,
    pub heading: Option<f64>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Generate a fresh UUID v4 string. Every entity in the system gets one,
/// because even a bus stop deserves to feel unique and special.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!ReportStatus::Pending.is_terminal());
        assert!(ReportStatus::Verified.is_terminal());
        assert!(ReportStatus::Rejected.is_terminal());
    }

    #[test]
    fn test_dedup_key_shape() {
        let key = Report::dedup_key("rider-1", "bus-9", ReportType::Delay);
        assert_eq!(key, "rider-1:bus-9:DELAY");
    }

    #[test]
    fn test_status_display_matches_wire_format() {
        assert_eq!(BusStatus::Maintenance.to_string(), "MAINTENANCE");
        assert_eq!(ReportType::Overcrowding.to_string(), "OVERCROWDING");
        assert_eq!(ReportStatus::Pending.to_string(), "PENDING");
    }
}
