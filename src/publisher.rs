// =============================================================================
// publisher.rs — THE REDIS TOWN CRIER
// =============================================================================
//
// This module takes transit events from the crossbeam channel and shouts
// them into Redis via pub/sub. The rider-facing web app listens on the
// other end, repainting little bus icons on a map in something resembling
// real time.
//
// Architecture:
// 1. Consumer loop reads from the lock-free crossbeam channel
// 2. Events are serialized to JSON (serde does the heavy lifting)
// 3. Events are published to a Redis pub/sub channel
// 4. Events are ALSO stored in a Redis sorted set (scored by timestamp)
//    for persistence, because pub/sub is fire-and-forget
// 5. Batch publishing to minimize Redis round trips
//
// The Redis sorted set acts as a durable event log. Even if the web app
// is down when bus 42 finally shows up, the moment will be preserved for
// posterity. Somebody waited 40 minutes for that.
// =============================================================================

use anyhow::Result;
use crossbeam_channel::Receiver;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::events::EventEnvelope;
use crate::metrics::MetricsCollector;

/// The feed publisher. Consumes events from the crossbeam channel and
/// publishes them to Redis with the urgency of a dispatcher radioing
/// a replacement bus.
pub struct FeedPublisher {
    config: Arc<Config>,
    receiver: Receiver<EventEnvelope>,
    shutdown: watch::Receiver<bool>,
    metrics: Arc<MetricsCollector>,
    stats: Arc<PublisherStats>,
}

/// Publisher statistics for metrics.
pub struct PublisherStats {
    pub events_published: portable_atomic::AtomicU64,
    pub events_persisted: portable_atomic::AtomicU64,
    pub publish_errors: portable_atomic::AtomicU64,
    pub batches_sent: portable_atomic::AtomicU64,
}

impl PublisherStats {
    pub fn new() -> Self {
        Self {
            events_published: portable_atomic::AtomicU64::new(0),
            events_persisted: portable_atomic::AtomicU64::new(0),
            publish_errors: portable_atomic::AtomicU64::new(0),
            batches_sent: portable_atomic::AtomicU64::new(0),
        }
    }
}

/// A serializable snapshot of publisher stats.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PublisherSnapshot {
    pub events_published: u64,
    pub events_persisted: u64,
    pub publish_errors: u64,
    pub batches_sent: u64,
}

impl FeedPublisher {
    /// Create a new FeedPublisher.
    ///
    /// # Arguments
    /// * `config` - The global configuration
    /// * `receiver` - The receiving end of the crossbeam channel
    /// * `shutdown` - Watch channel for graceful shutdown signaling
    /// * `metrics` - Global collector, for the publish-failure counter
    pub fn new(
        config: Arc<Config>,
        receiver: Receiver<EventEnvelope>,
        shutdown: watch::Receiver<bool>,
        metrics: Arc<MetricsCollector>,
    ) -> (Self, Arc<PublisherStats>) {
        let stats = Arc::new(PublisherStats::new());
        let stats_clone = Arc::clone(&stats);
        (
            Self {
                config,
                receiver,
                shutdown,
                metrics,
                stats,
            },
            stats_clone,
        )
    }

    /// Run the publisher loop. This is an async function that runs
    /// until the shutdown signal is received.
    ///
    /// The loop:
    /// 1. Drains up to BATCH_SIZE events from the channel
    /// 2. Publishes them all to Redis pub/sub
    /// 3. Stores them in the sorted set
    /// 4. Sleeps briefly if no events were available
    /// 5. Repeats until shutdown
    ///
    /// We use batch publishing to minimize Redis round-trips. Publishing
    /// fifty position updates in one go is much faster than fifty
    /// individual PUBLISH commands, and the fleet generates position
    /// updates the way buses generate delays.
    pub async fn run(self) -> Result<()> {
        info!(
            channel = %self.config.redis_channel,
            sorted_set = %self.config.redis_sorted_set,
            "Feed publisher starting — ready to broadcast the state of the fleet"
        );

        // Connect to Redis with retry logic
        let client = redis::Client::open(self.config.redis_url.as_str())?;
        let mut con = loop {
            match client.get_multiplexed_async_connection().await {
                Ok(con) => {
                    info!("Redis connection established — the map is listening");
                    break con;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to connect to Redis — retrying in 5 seconds");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    if *self.shutdown.borrow() {
                        info!("Shutdown received during Redis connection retry — exiting");
                        return Ok(());
                    }
                }
            }
        };

        const BATCH_SIZE: usize = 50;
        let mut batch: Vec<EventEnvelope> = Vec::with_capacity(BATCH_SIZE);

        loop {
            // Check for shutdown signal
            if *self.shutdown.borrow() {
                // Drain remaining events before shutting down
                info!("Shutdown signal received — draining remaining events");
                while let Ok(envelope) = self.receiver.try_recv() {
                    batch.push(envelope);
                }
                if !batch.is_empty() {
                    if let Err(e) = self.publish_batch(&mut con, &batch).await {
                        error!(error = %e, "Failed to publish final batch during shutdown");
                    }
                }
                info!("Feed publisher shutting down — the fleet goes dark");
                return Ok(());
            }

            // Drain events from the channel into a batch
            batch.clear();
            while batch.len() < BATCH_SIZE {
                match self.receiver.try_recv() {
                    Ok(envelope) => batch.push(envelope),
                    Err(crossbeam_channel::TryRecvError::Empty) => break,
                    Err(crossbeam_channel::TryRecvError::Disconnected) => {
                        info!("Channel disconnected — publisher shutting down");
                        return Ok(());
                    }
                }
            }

            if batch.is_empty() {
                // No events. Sleep briefly and check again.
                tokio::time::sleep(Duration::from_millis(100)).await;
                continue;
            }

            // Publish the batch!
            if let Err(e) = self.publish_batch(&mut con, &batch).await {
                error!(
                    error = %e,
                    batch_size = batch.len(),
                    "Failed to publish batch to Redis — events may be lost!"
                );
                self.stats
                    .publish_errors
                    .fetch_add(batch.len() as u64, portable_atomic::Ordering::Relaxed);
                self.metrics.increment_redis_failures();
            }
        }
    }

    /// Publish a batch of events to Redis.
    ///
    /// For each event:
    /// 1. PUBLISH to the pub/sub channel (for real-time consumers)
    /// 2. ZADD to the sorted set (for persistence/catch-up)
    async fn publish_batch(
        &self,
        con: &mut redis::aio::MultiplexedConnection,
        batch: &[EventEnvelope],
    ) -> Result<()> {
        use portable_atomic::Ordering;

        for envelope in batch {
            let json = serde_json::to_string(envelope)?;

            // Publish to pub/sub channel for real-time consumers
            let _: () = con
                .publish(&self.config.redis_channel, &json)
                .await
                .map_err(|e| {
                    error!(
                        error = %e,
                        event_id = %envelope.id,
                        "Failed to PUBLISH event"
                    );
                    self.metrics.increment_redis_failures();
                    e
                })?;

            self.stats.events_published.fetch_add(1, Ordering::Relaxed);

            // Store in sorted set for persistence
            // Score is the Unix timestamp so events are ordered chronologically
            let score = envelope.occurred_at.timestamp() as f64;
            let _: () = con
                .zadd(&self.config.redis_sorted_set, &json, score)
                .await
                .map_err(|e| {
                    error!(
                        error = %e,
                        event_id = %envelope.id,
                        "Failed to ZADD event to sorted set"
                    );
                    self.metrics.increment_redis_failures();
                    e
                })?;

            self.stats.events_persisted.fetch_add(1, Ordering::Relaxed);
        }

        self.stats.batches_sent.fetch_add(1, Ordering::Relaxed);

        debug!(
            batch_size = batch.len(),
            total_published = self.stats.events_published.load(Ordering::Relaxed),
            "Batch published successfully"
        );

        Ok(())
    }

    /// Get a snapshot of publisher statistics.
    pub fn snapshot(stats: &PublisherStats) -> PublisherSnapshot {
        use portable_atomic::Ordering;
        PublisherSnapshot {
            events_published: stats.events_published.load(Ordering::Relaxed),
            events_persisted: stats.events_persisted.load(Ordering::Relaxed),
            publish_errors: stats.publish_errors.load(Ordering::Relaxed),
            batches_sent: stats.batches_sent.load(Ordering::Relaxed),
        }
    }
}
