// =============================================================================
// dedup.rs — THE COMPLAINT DEDUPLICATION FORTRESS
// =============================================================================
//
// This module implements a hybrid Bloom Filter + LRU Cache guard against
// duplicate crowd reports. One rider filing "bus 42 is crowded" five times
// in ten minutes is not five independent observations — it's one observation
// with enthusiasm, and it would let a single rider peer-verify themselves
// into free trust points.
//
// The architecture is intentionally overkill:
//
// 1. First, we check the Bloom filter (O(k) hash functions, basically O(1)).
//    If the Bloom filter says "never seen it", we KNOW the complaint is new.
//    Bloom filters never have false negatives.
//
// 2. If the Bloom filter says "maybe seen it" (false positives are the
//    price of admission), we check the LRU cache for a definitive answer.
//
// 3. The Bloom filter auto-rotates on an interval, which doubles as the
//    spam window: after rotation, a still-broken bus can be re-reported.
//    A saturated Bloom filter says "yes" to everything, which is about
//    as useful as a chocolate teapot.
//
// 4. Everything is thread-safe with parking_lot RwLock, because report
//    submissions arrive from many request handlers at once, and data races
//    are not a feature we're looking to implement.
//
// Is this overkill for a few hundred complaints a day? YES.
// Could we just use a HashSet with timestamps? YES.
// Are we going to? ABSOLUTELY NOT.
// =============================================================================

use bloomfilter::Bloom;
use lru::LruCache;
use parking_lot::RwLock;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// The submission guard. Decides whether a report dedup key has been seen
/// within the current spam window.
pub struct SubmissionGuard {
    /// The Bloom filter — first line of defense against repeat complaints.
    bloom: Arc<RwLock<Bloom<String>>>,

    /// The LRU cache — second line of defense.
    /// When the Bloom filter says "maybe", the LRU cache says "definitely."
    /// Bounded in size so we don't eat all the RAM.
    lru_cache: Arc<RwLock<LruCache<String, bool>>>,

    /// When the Bloom filter was last rotated.
    last_rotation: Arc<RwLock<Instant>>,

    /// Rotation interval in seconds — the effective spam window.
    rotation_interval_secs: u64,

    /// Parameters for creating fresh Bloom filters on rotation.
    bloom_expected_items: u64,
    bloom_fp_rate: f64,

    /// Counters for metrics. Because if we can't measure the spam,
    /// did we even block it?
    pub stats: Arc<GuardStats>,
}

/// Statistics about the submission guard.
/// All counters are atomic because we're allergic to mutexes.
pub struct GuardStats {
    /// How many submissions were checked against the guard
    pub checks: portable_atomic::AtomicU64,
    /// How many were fresh (allowed through)
    pub fresh: portable_atomic::AtomicU64,
    /// How many were repeats (blocked)
    pub repeats: portable_atomic::AtomicU64,
    /// How many times the Bloom filter was rotated
    pub rotations: portable_atomic::AtomicU64,
    /// How many times the Bloom filter said "maybe" and the LRU had to
    /// settle it (the "false positive rescue" counter)
    pub bloom_maybe_hits: portable_atomic::AtomicU64,
}

impl GuardStats {
    fn new() -> Self {
        Self {
            checks: portable_atomic::AtomicU64::new(0),
            fresh: portable_atomic::AtomicU64::new(0),
            repeats: portable_atomic::AtomicU64::new(0),
            rotations: portable_atomic::AtomicU64::new(0),
            bloom_maybe_hits: portable_atomic::AtomicU64::new(0),
        }
    }
}

impl SubmissionGuard {
    /// Create a new SubmissionGuard.
    ///
    /// # Arguments
    /// * `expected_items` - Dedup keys expected before rotation
    /// * `fp_rate` - Target false positive rate (0.01 = 1%)
    /// * `lru_capacity` - Maximum keys in the LRU cache
    /// * `rotation_interval_secs` - Seconds between rotations (= spam window)
    pub fn new(
        expected_items: u64,
        fp_rate: f64,
        lru_capacity: usize,
        rotation_interval_secs: u64,
    ) -> Self {
        info!(
            expected_items = expected_items,
            fp_rate = fp_rate,
            lru_capacity = lru_capacity,
            window_secs = rotation_interval_secs,
            "Submission guard initialized — repeat complaints will be politely declined"
        );

        let bloom = Bloom::new_for_fp_rate(expected_items as usize, fp_rate);
        let lru_size = NonZeroUsize::new(lru_capacity).unwrap_or(NonZeroUsize::new(1000).unwrap());
        let lru_cache = LruCache::new(lru_size);

        Self {
            bloom: Arc::new(RwLock::new(bloom)),
            lru_cache: Arc::new(RwLock::new(lru_cache)),
            last_rotation: Arc::new(RwLock::new(Instant::now())),
            rotation_interval_secs,
            bloom_expected_items: expected_items,
            bloom_fp_rate: fp_rate,
            stats: Arc::new(GuardStats::new()),
        }
    }

    /// Check whether a dedup key is fresh, and if so, mark it as seen.
    ///
    /// Returns `true` if the submission is NEW (allowed through).
    /// Returns `false` if the same complaint was already filed this window.
    ///
    /// The logic flow:
    /// 1. Rotate the Bloom filter if the window has elapsed
    /// 2. Check the Bloom filter for a fast "definitely new" answer
    /// 3. If Bloom says "maybe seen", let the LRU cache break the tie
    /// 4. If truly new, record the key in both structures
    pub fn check_and_insert(&self, key: &str) -> bool {
        use portable_atomic::Ordering;

        self.stats.checks.fetch_add(1, Ordering::Relaxed);

        // Step 0: maybe rotate — the spam window may have closed.
        self.maybe_rotate();

        // Step 1: the Bloom filter.
        // Read lock only — concurrent submissions can check simultaneously.
        let bloom_says_maybe_seen = {
            let bloom = self.bloom.read();
            bloom.check(&key.to_string())
        };

        if bloom_says_maybe_seen {
            // The Bloom filter thinks it has seen this complaint before.
            // But Bloom filters lie (false positives). Ask the LRU.
            self.stats.bloom_maybe_hits.fetch_add(1, Ordering::Relaxed);

            let mut lru = self.lru_cache.write();
            if lru.get(&key.to_string()).is_some() {
                // LRU confirms: genuine repeat. Same rider, same bus,
                // same grievance. Blocked.
                self.stats.repeats.fetch_add(1, Ordering::Relaxed);
                debug!(key = key, "Repeat submission blocked — Bloom + LRU agree");
                return false;
            }

            // Bloom said "maybe" but LRU said "nope" — a Bloom false
            // positive. The complaint is actually new. Let it through.
            debug!(
                key = key,
                "Bloom false positive rescued by LRU — submission is actually new"
            );
        }

        // Step 2: genuinely new. Record it everywhere.
        {
            let mut bloom = self.bloom.write();
            bloom.set(&key.to_string());
        }
        {
            let mut lru = self.lru_cache.write();
            lru.put(key.to_string(), true);
        }

        self.stats.fresh.fetch_add(1, Ordering::Relaxed);
        debug!(key = key, "Fresh submission accepted by the guard");
        true
    }

    /// Rotate the Bloom filter if the spam window has elapsed.
    ///
    /// Rotation swaps in a brand new, empty filter and discards the old
    /// one, both to reopen the window for legitimate re-reports and to
    /// keep the filter from saturating.
    ///
    /// The LRU cache is NOT rotated — it self-evicts old entries naturally.
    fn maybe_rotate(&self) {
        let should_rotate = {
            let last = self.last_rotation.read();
            last.elapsed().as_secs() >= self.rotation_interval_secs
        };

        if should_rotate {
            let mut bloom = self.bloom.write();
            let mut last = self.last_rotation.write();

            // Double-check after acquiring the write lock (another thread
            // might have rotated while we waited)
            if last.elapsed().as_secs() >= self.rotation_interval_secs {
                *bloom = Bloom::new_for_fp_rate(
                    self.bloom_expected_items as usize,
                    self.bloom_fp_rate,
                );
                // A rotation also has to forget the LRU side, or the tie-
                // breaker would keep blocking re-reports past the window.
                self.lru_cache.write().clear();
                *last = Instant::now();

                self.stats.rotations.fetch_add(1, portable_atomic::Ordering::Relaxed);
                info!("Submission guard rotated — spam window reopened, old grudges forgotten");
            }
        }
    }

    /// Get a snapshot of the current guard statistics.
    /// Useful for the metrics endpoint.
    pub fn snapshot(&self) -> GuardSnapshot {
        use portable_atomic::Ordering;
        GuardSnapshot {
            total_checks: self.stats.checks.load(Ordering::Relaxed),
            fresh_submissions: self.stats.fresh.load(Ordering::Relaxed),
            repeats_blocked: self.stats.repeats.load(Ordering::Relaxed),
            bloom_rotations: self.stats.rotations.load(Ordering::Relaxed),
            bloom_false_positive_rescues: self.stats.bloom_maybe_hits.load(Ordering::Relaxed),
            lru_cache_size: self.lru_cache.read().len(),
        }
    }
}

/// A snapshot of submission-guard statistics at a point in time.
/// Serializable for the metrics endpoint.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GuardSnapshot {
    pub total_checks: u64,
    pub fresh_submissions: u64,
    pub repeats_blocked: u64,
    pub bloom_rotations: u64,
    pub bloom_false_positive_rescues: u64,
    pub lru_cache_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_submissions_are_accepted() {
        let guard = SubmissionGuard::new(1000, 0.01, 100, 3600);
        assert!(guard.check_and_insert("rider-1:bus-42:DELAY"));
    }

    #[test]
    fn test_repeat_submissions_are_blocked() {
        let guard = SubmissionGuard::new(1000, 0.01, 100, 3600);
        assert!(guard.check_and_insert("rider-1:bus-42:DELAY"));
        assert!(!guard.check_and_insert("rider-1:bus-42:DELAY"));
    }

    #[test]
    fn test_different_complaints_are_accepted() {
        let guard = SubmissionGuard::new(1000, 0.01, 100, 3600);
        assert!(guard.check_and_insert("rider-1:bus-42:DELAY"));
        // Same rider, same bus, different grievance: allowed.
        assert!(guard.check_and_insert("rider-1:bus-42:OVERCROWDING"));
        // Different rider, same grievance: also allowed.
        assert!(guard.check_and_insert("rider-2:bus-42:DELAY"));
    }

    #[test]
    fn test_stats_count_both_outcomes() {
        let guard = SubmissionGuard::new(1000, 0.01, 100, 3600);
        guard.check_and_insert("k1");
        guard.check_and_insert("k1");
        guard.check_and_insert("k2");
        let snap = guard.snapshot();
        assert_eq!(snap.total_checks, 3);
        assert_eq!(snap.fresh_submissions, 2);
        assert_eq!(snap.repeats_blocked, 1);
    }
}
