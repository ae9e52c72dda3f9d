// =============================================================================
// trust.rs — THE REPUTATION BANK
// =============================================================================
//
// Every rider has exactly one number that says how much we believe them.
// It starts at 100, goes up when admins approve their reports, and moves
// in no other way — no decay, no floor, no ceiling. A sufficiently
// dedicated liar can absolutely drive their score negative, and a
// sufficiently dedicated saint can bank points forever. Both are legal.
//
// Scores are portable_atomic::AtomicI64s living inside a parking_lot
// RwLock'd map. Awards are a single fetch_add: two admins approving two
// reports from the same rider at the same instant both land, in full,
// every time. Lost updates are for systems that didn't read the manual.
// =============================================================================

use chrono::Utc;
use parking_lot::RwLock;
use portable_atomic::{AtomicI64, Ordering};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::models::{new_id, RiderProfile};

/// One rider's ledger slot: immutable identity plus a very mutable score.
struct LedgerEntry {
    profile: RiderProfile,
    score: AtomicI64,
}

/// The trust-score ledger. Cheap to clone the handle, safe to hammer from
/// every request handler at once.
pub struct TrustLedger {
    entries: RwLock<HashMap<String, Arc<LedgerEntry>>>,
    /// Score assigned to every new rider.
    initial_score: i64,
}

impl TrustLedger {
    pub fn new(initial_score: i64) -> Self {
        info!(
            initial_score = initial_score,
            "Trust ledger open for business — everyone starts as a moderately trusted stranger"
        );
        Self {
            entries: RwLock::new(HashMap::new()),
            initial_score,
        }
    }

    /// Register a rider and hand them their starting score.
    pub fn register(&self, name: impl Into<String>, email: Option<String>) -> RiderProfile {
        let profile = RiderProfile {
            id: new_id(),
            name: name.into(),
            email,
            created_at: Utc::now(),
        };

        let entry = Arc::new(LedgerEntry {
            profile: profile.clone(),
            score: AtomicI64::new(self.initial_score),
        });

        self.entries.write().insert(profile.id.clone(), entry);
        debug!(rider_id = %profile.id, "Rider registered in trust ledger");
        profile
    }

    /// Does this rider exist? The report workflow asks before accepting
    /// a submission.
    pub fn exists(&self, rider_id: &str) -> bool {
        self.entries.read().contains_key(rider_id)
    }

    /// Fetch a rider's profile.
    pub fn profile(&self, rider_id: &str) -> EngineResult<RiderProfile> {
        self.entry(rider_id).map(|e| e.profile.clone())
    }

    /// Current score. A read, nothing more.
    pub fn score(&self, rider_id: &str) -> EngineResult<i64> {
        self.entry(rider_id).map(|e| e.score.load(Ordering::Relaxed))
    }

    /// Add `delta` to a rider's score and return the new value.
    /// One atomic fetch_add — concurrent awards cannot trample each other.
    /// Only the report workflow's admin-approval path calls this.
    pub fn award(&self, rider_id: &str, delta: i64) -> EngineResult<i64> {
        let entry = self.entry(rider_id)?;
        let new_score = entry.score.fetch_add(delta, Ordering::Relaxed) + delta;
        info!(
            rider_id = rider_id,
            delta = delta,
            new_score = new_score,
            "Trust score adjusted"
        );
        Ok(new_score)
    }

    /// Administrative override: set the score to an absolute value,
    /// ignoring whatever was there. The nuclear option for both
    /// rehabilitation and punishment.
    pub fn set(&self, rider_id: &str, score: i64) -> EngineResult<i64> {
        let entry = self.entry(rider_id)?;
        entry.score.store(score, Ordering::Relaxed);
        info!(rider_id = rider_id, score = score, "Trust score overridden");
        Ok(score)
    }

    fn entry(&self, rider_id: &str) -> EngineResult<Arc<LedgerEntry>> {
        self.entries
            .read()
            .get(rider_id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("rider", rider_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_riders_start_at_initial_score() {
        let ledger = TrustLedger::new(100);
        let rider = ledger.register("Ada", None);
        assert_eq!(ledger.score(&rider.id).unwrap(), 100);
    }

    #[test]
    fn test_award_adds_delta() {
        let ledger = TrustLedger::new(100);
        let rider = ledger.register("Ada", None);
        assert_eq!(ledger.award(&rider.id, 10).unwrap(), 110);
        assert_eq!(ledger.score(&rider.id).unwrap(), 110);
    }

    #[test]
    fn test_negative_scores_are_legal() {
        let ledger = TrustLedger::new(100);
        let rider = ledger.register("Grump", None);
        assert_eq!(ledger.award(&rider.id, -250).unwrap(), -150);
    }

    #[test]
    fn test_set_overrides_whatever_was_there() {
        let ledger = TrustLedger::new(100);
        let rider = ledger.register("Ada", None);
        ledger.award(&rider.id, 40).unwrap();
        assert_eq!(ledger.set(&rider.id, 7).unwrap(), 7);
        assert_eq!(ledger.score(&rider.id).unwrap(), 7);
    }

    #[test]
    fn test_unknown_rider_is_not_found() {
        let ledger = TrustLedger::new(100);
        assert!(matches!(
            ledger.score("nobody"),
            Err(EngineError::NotFound { .. })
        ));
        assert!(matches!(
            ledger.award("nobody", 10),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[test]
    fn test_concurrent_awards_lose_nothing() {
        let ledger = Arc::new(TrustLedger::new(0));
        let rider = ledger.register("Popular", None);

        let mut handles = vec![];
        for _ in 0..8 {
            let ledger = Arc::clone(&ledger);
            let id = rider.id.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..100 {
                    ledger.award(&id, 1).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(ledger.score(&rider.id).unwrap(), 800);
    }
}
