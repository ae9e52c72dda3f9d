// ═══════════════════════════════════════════════════════════════
// METRICS COLLECTOR - Because if you can't measure it, it didn't happen
// ═══════════════════════════════════════════════════════════════
//
// Atomic counters for everything. Lock-free because we're THAT paranoid
// about contention. Exposes a tiny HTTP server so the web backend can
// check engine health without asking anyone's permission.
//
// This is massive overkill for a metrics system. We have:
// - Atomic counters (no locks, no mutexes, PURE ATOMICS)
// - Per-error-kind breakdowns
// - Throughput calculations
// - A full HTTP server just for metrics
// - JSON serialization of every metric

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{error, info};

/// The metrics snapshot - what gets serialized to JSON
#[derive(Debug, Serialize, Clone)]
pub struct MetricsSnapshot {
    pub location_updates: u64,
    pub eta_stop_requests: u64,
    pub eta_route_requests: u64,
    pub proximity_checks: u64,
    pub reports_submitted: u64,
    pub duplicate_reports_blocked: u64,
    pub peer_verifications: u64,
    pub reports_auto_verified: u64,
    pub reports_approved: u64,
    pub reports_rejected: u64,
    pub trust_points_awarded: u64,
    pub not_found_errors: u64,
    pub precondition_errors: u64,
    pub conflict_errors: u64,
    pub validation_errors: u64,
    pub internal_errors: u64,
    pub events_dropped: u64,
    pub redis_publish_failures: u64,
    pub uptime_seconds: u64,
    pub updates_per_minute: f64,
    pub status: String,
}

/// Thread-safe atomic metrics collector
/// Every counter is atomic because mutexes are for the weak
pub struct MetricsCollector {
    location_updates: AtomicU64,
    eta_stop_requests: AtomicU64,
    eta_route_requests: AtomicU64,
    proximity_checks: AtomicU64,
    reports_submitted: AtomicU64,
    duplicate_reports_blocked: AtomicU64,
    peer_verifications: AtomicU64,
    reports_auto_verified: AtomicU64,
    reports_approved: AtomicU64,
    reports_rejected: AtomicU64,
    trust_points_awarded: AtomicU64,
    not_found_errors: AtomicU64,
    precondition_errors: AtomicU64,
    conflict_errors: AtomicU64,
    validation_errors: AtomicU64,
    internal_errors: AtomicU64,
    events_dropped: AtomicU64,
    redis_publish_failures: AtomicU64,
    start_time: Instant,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            location_updates: AtomicU64::new(0),
            eta_stop_requests: AtomicU64::new(0),
            eta_route_requests: AtomicU64::new(0),
            proximity_checks: AtomicU64::new(0),
            reports_submitted: AtomicU64::new(0),
            duplicate_reports_blocked: AtomicU64::new(0),
            peer_verifications: AtomicU64::new(0),
            reports_auto_verified: AtomicU64::new(0),
            reports_approved: AtomicU64::new(0),
            reports_rejected: AtomicU64::new(0),
            trust_points_awarded: AtomicU64::new(0),
            not_found_errors: AtomicU64::new(0),
            precondition_errors: AtomicU64::new(0),
            conflict_errors: AtomicU64::new(0),
            validation_errors: AtomicU64::new(0),
            internal_errors: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            redis_publish_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn increment_location_updates(&self) {
        self.location_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_eta_stop_requests(&self) {
        self.eta_stop_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_eta_route_requests(&self) {
        self.eta_route_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_proximity_checks(&self) {
        self.proximity_checks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_reports_submitted(&self) {
        self.reports_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_duplicates_blocked(&self) {
        self.duplicate_reports_blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_peer_verifications(&self) {
        self.peer_verifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_auto_verified(&self) {
        self.reports_auto_verified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_approved(&self) {
        self.reports_approved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rejected(&self) {
        self.reports_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_trust_points(&self, points: u64) {
        self.trust_points_awarded.fetch_add(points, Ordering::Relaxed);
    }

    /// Tally a domain failure by its wire kind.
    pub fn increment_error_kind(&self, kind: &str) {
        match kind {
            "not_found" => { self.not_found_errors.fetch_add(1, Ordering::Relaxed); }
            "precondition_failed" => { self.precondition_errors.fetch_add(1, Ordering::Relaxed); }
            "conflict" => { self.conflict_errors.fetch_add(1, Ordering::Relaxed); }
            "validation_error" => { self.validation_errors.fetch_add(1, Ordering::Relaxed); }
            "internal_error" => { self.internal_errors.fetch_add(1, Ordering::Relaxed); }
            _ => {}
        }
    }

    pub fn record_events_dropped(&self, total: u64) {
        self.events_dropped.store(total, Ordering::Relaxed);
    }

    pub fn increment_redis_failures(&self) {
        self.redis_publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of all metrics (lock-free reads)
    pub fn snapshot(&self) -> MetricsSnapshot {
        let uptime = self.start_time.elapsed().as_secs();
        let location_updates = self.location_updates.load(Ordering::Relaxed);
        let updates_per_minute = if uptime > 0 {
            (location_updates as f64 / uptime as f64) * 60.0
        } else {
            0.0
        };

        MetricsSnapshot {
            location_updates,
            eta_stop_requests: self.eta_stop_requests.load(Ordering::Relaxed),
            eta_route_requests: self.eta_route_requests.load(Ordering::Relaxed),
            proximity_checks: self.proximity_checks.load(Ordering::Relaxed),
            reports_submitted: self.reports_submitted.load(Ordering::Relaxed),
            duplicate_reports_blocked: self.duplicate_reports_blocked.load(Ordering::Relaxed),
            peer_verifications: self.peer_verifications.load(Ordering::Relaxed),
            reports_auto_verified: self.reports_auto_verified.load(Ordering::Relaxed),
            reports_approved: self.reports_approved.load(Ordering::Relaxed),
            reports_rejected: self.reports_rejected.load(Ordering::Relaxed),
            trust_points_awarded: self.trust_points_awarded.load(Ordering::Relaxed),
            not_found_errors: self.not_found_errors.load(Ordering::Relaxed),
            precondition_errors: self.precondition_errors.load(Ordering::Relaxed),
            conflict_errors: self.conflict_errors.load(Ordering::Relaxed),
            validation_errors: self.validation_errors.load(Ordering::Relaxed),
            internal_errors: self.internal_errors.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            redis_publish_failures: self.redis_publish_failures.load(Ordering::Relaxed),
            uptime_seconds: uptime,
            updates_per_minute,
            status: "operational".to_string(),
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a tiny HTTP server that serves metrics as JSON
/// This is the Rust equivalent of mounting a departures board on a shed
pub async fn run_metrics_server(
    metrics: Arc<MetricsCollector>,
    port: u16,
    shutdown: &mut watch::Receiver<bool>,
) {
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    let listener = match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind metrics server on :{}: {}", port, e);
            return;
        }
    };

    info!("📊 Metrics server listening on http://0.0.0.0:{}", port);

    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((mut stream, _addr)) => {
                        let snapshot = metrics.snapshot();
                        let json = serde_json::to_string_pretty(&snapshot)
                            .unwrap_or_else(|_| "{}".to_string());

                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nAccess-Control-Allow-Origin: *\r\nContent-Length: {}\r\n\r\n{}",
                            json.len(),
                            json,
                        );

                        let _ = stream.write_all(response.as_bytes()).await;
                    }
                    Err(e) => {
                        error!("Metrics server accept error: {}", e);
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("Metrics server: shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_land_in_the_snapshot() {
        let metrics = MetricsCollector::new();
        metrics.increment_location_updates();
        metrics.increment_location_updates();
        metrics.increment_reports_submitted();
        metrics.add_trust_points(10);
        metrics.increment_error_kind("conflict");
        metrics.increment_error_kind("not_found");
        metrics.increment_error_kind("not_a_real_kind");

        let snap = metrics.snapshot();
        assert_eq!(snap.location_updates, 2);
        assert_eq!(snap.reports_submitted, 1);
        assert_eq!(snap.trust_points_awarded, 10);
        assert_eq!(snap.conflict_errors, 1);
        assert_eq!(snap.not_found_errors, 1);
        assert_eq!(snap.status, "operational");
    }
}
