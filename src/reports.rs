// =============================================================================
// reports.rs — THE CROWD-REPORT TRIBUNAL
// =============================================================================
//
// The state machine at the center of the crowd-sourcing operation:
//
//                    peer_verify x3
//        PENDING ───────────────────────▶ VERIFIED (0 points)
//           │
//           │  admin_validate(approved=true)
//           ├───────────────────────────▶ VERIFIED (points paid)
//           │
//           │  admin_validate(approved=false)
//           └───────────────────────────▶ REJECTED
//
// VERIFIED and REJECTED are terminal. Full stop. Any further peer_verify
// or admin_validate against a terminal report is a Conflict — an earlier
// incarnation of this system let admins re-validate VERIFIED reports and
// pay the author again each time, which riders discovered approximately
// immediately. The tribunal does not re-try closed cases.
//
// Trust points move in exactly one place: the approved branch of
// admin_validate, under the report's own write lock. Peer auto-promotion
// pays nothing — three strangers agreeing the bus was crowded is
// confirmation, not payroll.
//
// Every report gets its own RwLock slot, so two admins fighting over the
// same report serialize cleanly while the rest of the queue stays hot.
// =============================================================================

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::dedup::SubmissionGuard;
use crate::error::{EngineError, EngineResult};
use crate::events::{EventBus, TransitEvent};
use crate::fleet::FleetRegistry;
use crate::geo;
use crate::models::{new_id, Report, ReportStatus, ReportSubmission};
use crate::triage;
use crate::trust::TrustLedger;

/// Tunables for the tribunal, lifted out of Config so the workflow can be
/// built in tests without dragging the whole configuration cathedral in.
#[derive(Debug, Clone)]
pub struct WorkflowPolicy {
    /// Peer verifications that auto-promote PENDING to VERIFIED.
    pub verification_threshold: u32,
    /// Points paid when an admin approves without naming a figure.
    pub default_award_points: u32,
    /// Severity at which a fresh submission earns a WARN in the logs.
    pub high_severity_threshold: f64,
}

/// The report workflow. Owns every report in the system and the only
/// code path allowed to move one between states.
pub struct ReportWorkflow {
    /// Report id -> its slot. Per-report lock = per-report linearizability.
    reports: RwLock<HashMap<String, Arc<RwLock<Report>>>>,
    /// Submission order, for stable creation-ordered queries.
    order: RwLock<Vec<String>>,
    policy: WorkflowPolicy,
    fleet: Arc<FleetRegistry>,
    trust: Arc<TrustLedger>,
    guard: Arc<SubmissionGuard>,
    events: EventBus,
}

impl ReportWorkflow {
    pub fn new(
        policy: WorkflowPolicy,
        fleet: Arc<FleetRegistry>,
        trust: Arc<TrustLedger>,
        guard: Arc<SubmissionGuard>,
        events: EventBus,
    ) -> Self {
        info!(
            verification_threshold = policy.verification_threshold,
            default_award_points = policy.default_award_points,
            "Report tribunal in session"
        );
        Self {
            reports: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            policy,
            fleet,
            trust,
            guard,
            events,
        }
    }

    /// File a new report. Born PENDING, zero verifications, zero points,
    /// severity courtesy of the triage scanner.
    pub fn submit(&self, submission: ReportSubmission) -> EngineResult<Report> {
        if !self.trust.exists(&submission.rider_id) {
            return Err(EngineError::not_found("rider", submission.rider_id.as_str()));
        }
        if !self.fleet.exists(&submission.bus_id) {
            return Err(EngineError::not_found("bus", submission.bus_id.as_str()));
        }
        if !geo::valid_coordinates(submission.latitude, submission.longitude) {
            return Err(EngineError::Validation(format!(
                "report coordinates out of range: ({}, {})",
                submission.latitude, submission.longitude
            )));
        }

        // The spam guard. Same rider + same bus + same grievance inside
        // the window is one report, not several.
        let key = Report::dedup_key(
            &submission.rider_id,
            &submission.bus_id,
            submission.report_type,
        );
        if !self.guard.check_and_insert(&key) {
            return Err(EngineError::Conflict(format!(
                "duplicate report: {} already filed for this bus in the current window",
                submission.report_type
            )));
        }

        let scan = submission
            .description
            .as_deref()
            .map(triage::scan_description);
        let severity = scan.as_ref().map(|s| s.severity).unwrap_or(0.0);

        // When the vocabulary disagrees with the rider's own category,
        // leave a trail for the reviewing admin. Riders file "OTHER" for
        // everything from crowding to small fires.
        if let Some(suggested) = scan.as_ref().and_then(|s| s.suggested_type) {
            if suggested != submission.report_type {
                info!(
                    filed_as = %submission.report_type,
                    reads_like = %suggested,
                    "Triage suggests a different category than the rider picked"
                );
            }
        }

        let report = Report {
            id: new_id(),
            rider_id: submission.rider_id,
            bus_id: submission.bus_id,
            report_type: submission.report_type,
            status: ReportStatus::Pending,
            latitude: submission.latitude,
            longitude: submission.longitude,
            location_name: submission.location_name,
            description: submission.description,
            photo_ref: submission.photo_ref,
            verification_count: 0,
            points_awarded: 0,
            validated_by: None,
            severity,
            created_at: Utc::now(),
        };

        self.reports
            .write()
            .insert(report.id.clone(), Arc::new(RwLock::new(report.clone())));
        self.order.write().push(report.id.clone());

        if severity >= self.policy.high_severity_threshold {
            warn!(
                report_id = %report.id,
                bus_id = %report.bus_id,
                severity = format!("{:.2}", severity),
                "High-severity report filed — this one goes to the top of the pile"
            );
        } else {
            info!(report_id = %report.id, report = %report, "Report filed");
        }

        self.events.emit(TransitEvent::ReportSubmitted {
            report: report.clone(),
        });
        Ok(report)
    }

    /// One rider vouching for someone else's report. Increments the
    /// verification count; at the threshold the report auto-promotes to
    /// VERIFIED with no points changing hands.
    ///
    /// Terminal reports reject the mutation outright — an extra "me too"
    /// on a closed case is a Conflict, not a shrug.
    pub fn peer_verify(&self, report_id: &str) -> EngineResult<Report> {
        let slot = self.slot(report_id)?;
        let mut report = slot.write();

        if report.status.is_terminal() {
            return Err(EngineError::Conflict(format!(
                "report {} is already {}",
                report_id, report.status
            )));
        }

        report.verification_count += 1;

        if report.verification_count >= self.policy.verification_threshold {
            // The crowd has spoken. Promotion, but no payout — points
            // come only from an admin's explicit approval.
            report.status = ReportStatus::Verified;
            info!(
                report_id = report_id,
                verifications = report.verification_count,
                "Report auto-verified by peer consensus"
            );
            self.events.emit(TransitEvent::ReportAutoVerified {
                report: report.clone(),
            });
        }

        Ok(report.clone())
    }

    /// The admin's gavel. Approve: VERIFIED, points set, author paid —
    /// one award, under this report's lock, exactly once. Reject:
    /// REJECTED, nothing moves.
    ///
    /// Terminal reports are closed cases: Conflict.
    pub fn admin_validate(
        &self,
        report_id: &str,
        admin_id: &str,
        approved: bool,
        points: Option<u32>,
    ) -> EngineResult<Report> {
        if admin_id.trim().is_empty() {
            return Err(EngineError::Validation("validating admin id is required".into()));
        }

        let slot = self.slot(report_id)?;
        let mut report = slot.write();

        if report.status.is_terminal() {
            return Err(EngineError::Conflict(format!(
                "report {} is already {}",
                report_id, report.status
            )));
        }

        if approved {
            let points = points.unwrap_or(self.policy.default_award_points);
            report.status = ReportStatus::Verified;
            report.points_awarded = points;
            report.validated_by = Some(admin_id.to_string());

            // The one and only place trust points are earned. Still under
            // the report's write lock, so a racing second admin sees a
            // terminal report, not a second payday.
            let new_score = self
                .trust
                .award(&report.rider_id, i64::from(points))
                .map_err(|e| EngineError::Internal(format!("trust award failed: {}", e)))?;

            info!(
                report_id = report_id,
                admin_id = admin_id,
                points = points,
                new_score = new_score,
                "Report approved — author paid"
            );
            self.events.emit(TransitEvent::ReportApproved {
                report: report.clone(),
                new_trust_score: new_score,
            });
        } else {
            report.status = ReportStatus::Rejected;
            report.validated_by = Some(admin_id.to_string());
            info!(report_id = report_id, admin_id = admin_id, "Report rejected");
            self.events.emit(TransitEvent::ReportRejected {
                report: report.clone(),
            });
        }

        Ok(report.clone())
    }

    /// One report, by id.
    pub fn get(&self, report_id: &str) -> EngineResult<Report> {
        let slot = self.slot(report_id)?;
        let report = slot.read();
        Ok(report.clone())
    }

    /// All reports about a bus, in creation order.
    pub fn by_bus(&self, bus_id: &str) -> Vec<Report> {
        self.filtered(|r| r.bus_id == bus_id)
    }

    /// All reports filed by a rider, in creation order.
    pub fn by_rider(&self, rider_id: &str) -> Vec<Report> {
        self.filtered(|r| r.rider_id == rider_id)
    }

    /// All reports in a given state, in creation order.
    pub fn by_status(&self, status: ReportStatus) -> Vec<Report> {
        self.filtered(|r| r.status == status)
    }

    /// The admin review queue: PENDING reports, most severe first.
    ///
    /// Severity is stored at submission time, but the triage vocabulary
    /// evolves — so the queue re-scans every pending description in
    /// parallel and ranks on the fresh numbers. Old reports get the
    /// benefit of new keywords. Is re-triaging on every queue fetch
    /// wasteful? The other CPU cores weren't doing anything anyway.
    pub fn pending_by_severity(&self) -> Vec<Report> {
        let mut pending = self.by_status(ReportStatus::Pending);

        let descriptions: Vec<&str> = pending
            .iter()
            .map(|r| r.description.as_deref().unwrap_or(""))
            .collect();
        let scans = triage::batch_scan(&descriptions);

        for (report, scan) in pending.iter_mut().zip(scans.iter()) {
            report.severity = scan.severity;
        }
        pending.sort_by(|a, b| {
            b.severity
                .partial_cmp(&a.severity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        pending
    }

    fn filtered(&self, pred: impl Fn(&Report) -> bool) -> Vec<Report> {
        let order = self.order.read();
        let reports = self.reports.read();
        order
            .iter()
            .filter_map(|id| reports.get(id))
            .map(|slot| slot.read().clone())
            .filter(|r| pred(r))
            .collect()
    }

    fn slot(&self, report_id: &str) -> EngineResult<Arc<RwLock<Report>>> {
        self.reports
            .read()
            .get(report_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("report", report_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ReportType;

    struct Rig {
        workflow: Arc<ReportWorkflow>,
        trust: Arc<TrustLedger>,
        rider_id: String,
        bus_id: String,
    }

    fn rig() -> Rig {
        let fleet = Arc::new(FleetRegistry::new());
        let trust = Arc::new(TrustLedger::new(100));
        let guard = Arc::new(SubmissionGuard::new(1000, 0.01, 100, 3600));
        let (events, _rx) = EventBus::channel(256);

        let bus = fleet.register("42-A", None, None, None).unwrap();
        let rider = trust.register("Ada", None);

        let workflow = Arc::new(ReportWorkflow::new(
            WorkflowPolicy {
                verification_threshold: 3,
                default_award_points: 10,
                high_severity_threshold: 0.6,
            },
            fleet,
            Arc::clone(&trust),
            guard,
            events,
        ));

        Rig {
            workflow,
            trust,
            rider_id: rider.id,
            bus_id: bus.id,
        }
    }

    fn submission(rig: &Rig, report_type: ReportType) -> ReportSubmission {
        ReportSubmission {
            rider_id: rig.rider_id.clone(),
            bus_id: rig.bus_id.clone(),
            report_type,
            latitude: 40.0,
            longitude: -74.0,
            location_name: None,
            description: Some("bus is very late and stuck in traffic".into()),
            photo_ref: None,
        }
    }

    #[test]
    fn test_fresh_reports_are_pending_with_zeroes() {
        let rig = rig();
        let report = rig.workflow.submit(submission(&rig, ReportType::Delay)).unwrap();
        assert_eq!(report.status, ReportStatus::Pending);
        assert_eq!(report.verification_count, 0);
        assert_eq!(report.points_awarded, 0);
        assert!(report.validated_by.is_none());
        assert!(report.severity > 0.0);
    }

    #[test]
    fn test_unknown_rider_or_bus_is_not_found() {
        let rig = rig();
        let mut s = submission(&rig, ReportType::Delay);
        s.rider_id = "ghost".into();
        assert!(matches!(rig.workflow.submit(s), Err(EngineError::NotFound { .. })));

        let mut s = submission(&rig, ReportType::Delay);
        s.bus_id = "ghost".into();
        assert!(matches!(rig.workflow.submit(s), Err(EngineError::NotFound { .. })));
    }

    #[test]
    fn test_duplicate_submission_is_conflict() {
        let rig = rig();
        rig.workflow.submit(submission(&rig, ReportType::Delay)).unwrap();
        assert!(matches!(
            rig.workflow.submit(submission(&rig, ReportType::Delay)),
            Err(EngineError::Conflict(_))
        ));
        // A different grievance about the same bus still goes through.
        assert!(rig.workflow.submit(submission(&rig, ReportType::Overcrowding)).is_ok());
    }

    #[test]
    fn test_third_verification_auto_promotes_without_pay() {
        let rig = rig();
        let report = rig.workflow.submit(submission(&rig, ReportType::Delay)).unwrap();

        let r = rig.workflow.peer_verify(&report.id).unwrap();
        assert_eq!((r.verification_count, r.status), (1, ReportStatus::Pending));
        let r = rig.workflow.peer_verify(&report.id).unwrap();
        assert_eq!((r.verification_count, r.status), (2, ReportStatus::Pending));
        let r = rig.workflow.peer_verify(&report.id).unwrap();
        assert_eq!((r.verification_count, r.status), (3, ReportStatus::Verified));

        // Auto-promotion pays nothing.
        assert_eq!(r.points_awarded, 0);
        assert_eq!(rig.trust.score(&rig.rider_id).unwrap(), 100);
    }

    #[test]
    fn test_terminal_reports_refuse_further_verification() {
        let rig = rig();
        let report = rig.workflow.submit(submission(&rig, ReportType::Delay)).unwrap();
        for _ in 0..3 {
            rig.workflow.peer_verify(&report.id).unwrap();
        }
        assert!(matches!(
            rig.workflow.peer_verify(&report.id),
            Err(EngineError::Conflict(_))
        ));
        // And the count did not move.
        assert_eq!(rig.workflow.get(&report.id).unwrap().verification_count, 3);
    }

    #[test]
    fn test_admin_approval_pays_default_points() {
        let rig = rig();
        let report = rig.workflow.submit(submission(&rig, ReportType::Breakdown)).unwrap();

        let r = rig
            .workflow
            .admin_validate(&report.id, "admin-1", true, None)
            .unwrap();
        assert_eq!(r.status, ReportStatus::Verified);
        assert_eq!(r.points_awarded, 10);
        assert_eq!(r.validated_by.as_deref(), Some("admin-1"));
        assert_eq!(rig.trust.score(&rig.rider_id).unwrap(), 110);
    }

    #[test]
    fn test_admin_approval_honors_explicit_points() {
        let rig = rig();
        let report = rig.workflow.submit(submission(&rig, ReportType::Breakdown)).unwrap();
        let r = rig
            .workflow
            .admin_validate(&report.id, "admin-1", true, Some(25))
            .unwrap();
        assert_eq!(r.points_awarded, 25);
        assert_eq!(rig.trust.score(&rig.rider_id).unwrap(), 125);
    }

    #[test]
    fn test_rejection_pays_nothing() {
        let rig = rig();
        let report = rig.workflow.submit(submission(&rig, ReportType::Cleanliness)).unwrap();
        let r = rig
            .workflow
            .admin_validate(&report.id, "admin-1", false, None)
            .unwrap();
        assert_eq!(r.status, ReportStatus::Rejected);
        assert_eq!(r.points_awarded, 0);
        assert_eq!(rig.trust.score(&rig.rider_id).unwrap(), 100);
    }

    #[test]
    fn test_terminal_reports_cannot_be_revalidated() {
        let rig = rig();
        let report = rig.workflow.submit(submission(&rig, ReportType::Delay)).unwrap();
        rig.workflow
            .admin_validate(&report.id, "admin-1", true, None)
            .unwrap();

        // A second approval would be a second payday. Conflict.
        assert!(matches!(
            rig.workflow.admin_validate(&report.id, "admin-2", true, None),
            Err(EngineError::Conflict(_))
        ));
        assert_eq!(rig.trust.score(&rig.rider_id).unwrap(), 110);

        // Same for peer-verified reports.
        let report2 = rig.workflow.submit(submission(&rig, ReportType::Overcrowding)).unwrap();
        for _ in 0..3 {
            rig.workflow.peer_verify(&report2.id).unwrap();
        }
        assert!(matches!(
            rig.workflow.admin_validate(&report2.id, "admin-1", true, None),
            Err(EngineError::Conflict(_))
        ));
    }

    #[test]
    fn test_concurrent_verifications_lose_nothing() {
        let rig = rig();
        let report = rig.workflow.submit(submission(&rig, ReportType::Delay)).unwrap();

        // Exactly threshold-many concurrent verifications: every one must
        // land, the report must end VERIFIED with the exact count.
        let mut handles = vec![];
        for _ in 0..3 {
            let workflow = Arc::clone(&rig.workflow);
            let id = report.id.clone();
            handles.push(std::thread::spawn(move || workflow.peer_verify(&id)));
        }
        for h in handles {
            h.join().unwrap().unwrap();
        }

        let r = rig.workflow.get(&report.id).unwrap();
        assert_eq!(r.verification_count, 3);
        assert_eq!(r.status, ReportStatus::Verified);
        assert_eq!(r.points_awarded, 0);
    }

    #[test]
    fn test_queries_preserve_creation_order() {
        let rig = rig();
        let r1 = rig.workflow.submit(submission(&rig, ReportType::Delay)).unwrap();
        let r2 = rig.workflow.submit(submission(&rig, ReportType::Overcrowding)).unwrap();
        let r3 = rig.workflow.submit(submission(&rig, ReportType::Cleanliness)).unwrap();

        let by_bus = rig.workflow.by_bus(&rig.bus_id);
        let ids: Vec<&str> = by_bus.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec![r1.id.as_str(), r2.id.as_str(), r3.id.as_str()]);

        assert_eq!(rig.workflow.by_rider(&rig.rider_id).len(), 3);
        assert_eq!(rig.workflow.by_status(ReportStatus::Pending).len(), 3);
    }

    #[test]
    fn test_pending_queue_ranks_by_severity() {
        let rig = rig();
        let mut calm = submission(&rig, ReportType::Cleanliness);
        calm.description = Some("seat fabric slightly faded".into());
        let calm = rig.workflow.submit(calm).unwrap();

        let mut dire = submission(&rig, ReportType::Breakdown);
        dire.description =
            Some("bus broke down, engine smoking, passengers stranded, police called".into());
        let dire = rig.workflow.submit(dire).unwrap();

        let queue = rig.workflow.pending_by_severity();
        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].id, dire.id);
        assert_eq!(queue[1].id, calm.id);
    }
}
