// =============================================================================
// events.rs — THE TOWN CRIER'S DISPATCH DESK
// =============================================================================
//
// Everything interesting that happens inside the engine — a bus phoning
// home, a report surviving peer review, an admin handing out trust points —
// becomes a TransitEvent and goes into a bounded lock-free crossbeam
// channel. The Redis publisher drains the other end and broadcasts to the
// rider-facing app.
//
// The channel is BOUNDED and emission NEVER BLOCKS. A location update must
// not wait on a slow Redis connection; if the pipeline backs up, we drop
// the event, count the drop, and move on. The fleet keeps rolling whether
// or not anyone is listening.
// =============================================================================

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use portable_atomic::{AtomicU64, Ordering};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::models::{new_id, LocationSample, Report};

/// Everything the engine announces to the outside world.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransitEvent {
    /// A bus reported a fresh GPS fix.
    LocationRecorded {
        bus_number: String,
        sample: LocationSample,
    },
    /// A rider filed a new report.
    ReportSubmitted { report: Report },
    /// Enough peers agreed; the report auto-promoted to VERIFIED.
    ReportAutoVerified { report: Report },
    /// An admin approved a report and the author got paid.
    ReportApproved {
        report: Report,
        new_trust_score: i64,
    },
    /// An admin turned a report down.
    ReportRejected { report: Report },
    /// A trust score moved outside the report workflow (admin override).
    TrustOverridden { rider_id: String, new_score: i64 },
}

/// An event plus the bookkeeping the publisher needs: identity and a
/// timestamp to score the Redis sorted set with.
#[derive(Debug, Clone, Serialize)]
pub struct EventEnvelope {
    pub id: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: TransitEvent,
}

/// The emitting half of the pipeline. Clone-cheap; every workflow holds one.
#[derive(Clone)]
pub struct EventBus {
    tx: Sender<EventEnvelope>,
    stats: Arc<BusStats>,
}

/// Counters for the pipeline. Atomic, naturally.
pub struct BusStats {
    pub emitted: AtomicU64,
    pub dropped: AtomicU64,
}

impl EventBus {
    /// Create the pipeline: a bus for the engine, a receiver for the
    /// publisher.
    pub fn channel(capacity: usize) -> (EventBus, Receiver<EventEnvelope>) {
        let (tx, rx) = bounded(capacity);
        (
            EventBus {
                tx,
                stats: Arc::new(BusStats {
                    emitted: AtomicU64::new(0),
                    dropped: AtomicU64::new(0),
                }),
            },
            rx,
        )
    }

    /// Fire-and-forget emission. Stamps the envelope and try_sends it.
    /// A full channel means the event is dropped and counted — nobody
    /// upstream ever waits on this.
    pub fn emit(&self, event: TransitEvent) {
        let envelope = EventEnvelope {
            id: new_id(),
            occurred_at: Utc::now(),
            event,
        };

        match self.tx.try_send(envelope) {
            Ok(()) => {
                self.stats.emitted.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(envelope)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event_id = %envelope.id,
                    "Event channel full — event dropped, the show goes on"
                );
            }
            Err(TrySendError::Disconnected(envelope)) => {
                // Publisher is gone (shutdown, probably). Not our problem.
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(event_id = %envelope.id, "Event channel disconnected — event discarded");
            }
        }
    }

    /// How many events made it into the channel.
    pub fn emitted(&self) -> u64 {
        self.stats.emitted.load(Ordering::Relaxed)
    }

    /// How many events were dropped on the floor.
    pub fn dropped(&self) -> u64 {
        self.stats.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emitted_events_arrive_with_envelope() {
        let (bus, rx) = EventBus::channel(16);
        bus.emit(TransitEvent::TrustOverridden {
            rider_id: "rider-1".into(),
            new_score: 50,
        });

        let envelope = rx.try_recv().unwrap();
        assert!(!envelope.id.is_empty());
        assert!(matches!(
            envelope.event,
            TransitEvent::TrustOverridden { new_score: 50, .. }
        ));
        assert_eq!(bus.emitted(), 1);
        assert_eq!(bus.dropped(), 0);
    }

    #[test]
    fn test_full_channel_drops_instead_of_blocking() {
        let (bus, _rx) = EventBus::channel(1);
        bus.emit(TransitEvent::TrustOverridden {
            rider_id: "a".into(),
            new_score: 1,
        });
        bus.emit(TransitEvent::TrustOverridden {
            rider_id: "b".into(),
            new_score: 2,
        });

        assert_eq!(bus.emitted(), 1);
        assert_eq!(bus.dropped(), 1);
    }

    #[test]
    fn test_event_serializes_with_kind_tag() {
        let (bus, rx) = EventBus::channel(4);
        bus.emit(TransitEvent::TrustOverridden {
            rider_id: "rider-1".into(),
            new_score: 7,
        });
        let json = serde_json::to_string(&rx.try_recv().unwrap()).unwrap();
        assert!(json.contains("\"kind\":\"trust_overridden\""));
        assert!(json.contains("\"occurred_at\""));
    }
}
