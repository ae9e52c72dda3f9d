// =============================================================================
// config.rs — THE GRAND CONFIGURATION CATHEDRAL
// =============================================================================
//
// Every system needs configuration, but not every system needs THIS MUCH
// configuration. We have knobs for knobs. Thresholds for thresholds.
//
// All values can be overridden via environment variables, because hardcoding
// the peer-verification threshold is how you end up grepping for the literal
// `3` across the codebase at midnight. The magic numbers of the report
// workflow — three verifications to auto-promote, ten points for an approved
// report, a hundred points of starting trust — all live HERE, named, and
// nowhere else.
//
// Default values have been carefully chosen through a rigorous process of
// "that seems about right" and "that's what the pilot city ran with."
// =============================================================================

use std::env;
use std::time::Duration;

/// The Grand Configuration Struct. Every tunable parameter in the entire
/// engine lives here. Think of it as the driver's dashboard, except instead
/// of a speedometer you get to decide how many strangers must agree that
/// the bus is crowded before we believe them.
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // REDIS CONFIGURATION
    // =========================================================================
    /// Redis connection URL. This is where we stream position updates and
    /// report verdicts. The rider-facing web app listens on the other end.
    /// Default: redis://127.0.0.1:6379
    pub redis_url: String,

    /// The Redis channel we publish live transit events to.
    pub redis_channel: String,

    /// The Redis sorted set where events are persisted with timestamps.
    /// Because pub/sub is fire-and-forget, and we don't want to forget.
    pub redis_sorted_set: String,

    // =========================================================================
    // LISTENERS
    // =========================================================================
    /// Port for the line-delimited JSON gateway that drivers' devices and
    /// the web backend talk to.
    pub gateway_port: u16,

    /// Port for the metrics HTTP server.
    /// Default: 9090, because Prometheus conventions are conventions.
    pub metrics_port: u16,

    // =========================================================================
    // ETA PARAMETERS
    // =========================================================================
    /// Assumed average bus speed for ETA math when no live speed is
    /// available. Default: 30 km/h. Raising this number does not make the
    /// buses faster. We checked.
    pub average_speed_kmh: f64,

    // =========================================================================
    // REPORT WORKFLOW PARAMETERS
    // The constants that govern the crowd-verification state machine.
    // =========================================================================
    /// Independent peer verifications required to auto-promote a report
    /// from PENDING to VERIFIED. Default: 3 — one rider is an anecdote,
    /// three riders are data.
    pub verification_threshold: u32,

    /// Trust points awarded when an admin approves a report without
    /// naming a figure. Default: 10.
    pub default_award_points: u32,

    /// Trust score every rider starts with. Default: 100. Everyone begins
    /// life as a moderately trusted stranger.
    pub initial_trust_score: i64,

    /// Severity (0.0–1.0) above which a fresh report gets an immediate
    /// spot in the logs at WARN. Default: 0.6 — roughly "breakdown with
    /// corroborating vocabulary".
    pub high_severity_threshold: f64,

    // =========================================================================
    // SUBMISSION GUARD PARAMETERS
    // For when "probably not the same complaint again" is good enough.
    // =========================================================================
    /// Expected number of dedup keys in the bloom filter before rotation.
    pub bloom_expected_items: u64,

    /// Target false positive rate for the bloom filter.
    /// 0.01 = 1% chance of having to ask the LRU cache for a second opinion.
    pub bloom_false_positive_rate: f64,

    /// How often to rotate the bloom filter. Rotation doubles as the spam
    /// window: after this long, the same rider may file the same complaint
    /// about the same bus again. Default: 1800 (30 minutes) — long enough
    /// to stop spam, short enough that a genuinely still-broken bus can be
    /// re-reported.
    pub bloom_rotation_interval: Duration,

    /// Maximum number of dedup keys in the LRU cache backup.
    pub lru_cache_size: usize,

    // =========================================================================
    // EVENT PIPELINE
    // =========================================================================
    /// Capacity of the bounded event channel between the engine and the
    /// Redis publisher. When it fills, events are dropped and counted
    /// rather than blocking a location update.
    pub event_channel_capacity: usize,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    /// "Sensible" here meaning "will run out of the box without any env vars
    /// but will also respect your wishes if you set them."
    ///
    /// Every parameter can be overridden via environment variables prefixed
    /// with TRANSIT_PULSE_. Because namespacing your env vars is what
    /// separates the professionals from the amateurs.
    pub fn from_env() -> Self {
        // Try to load .env if it exists. Fail silently if it doesn't,
        // because not everyone has their life together enough to create
        // a .env file.
        let _ = dotenvy::dotenv();

        Config {
            // Redis
            redis_url: env_or_default("TRANSIT_PULSE_REDIS_URL", "redis://127.0.0.1:6379"),
            redis_channel: env_or_default("TRANSIT_PULSE_REDIS_CHANNEL", "transit:events"),
            redis_sorted_set: env_or_default(
                "TRANSIT_PULSE_REDIS_SORTED_SET",
                "transit:events:history",
            ),

            // Listeners
            gateway_port: env_or_default("TRANSIT_PULSE_GATEWAY_PORT", "7450")
                .parse().unwrap_or(7450),
            metrics_port: env_or_default("TRANSIT_PULSE_METRICS_PORT", "9090")
                .parse().unwrap_or(9090),

            // ETA
            average_speed_kmh: env_or_default("TRANSIT_PULSE_AVG_SPEED_KMH", "30.0")
                .parse().unwrap_or(30.0),

            // Report workflow
            verification_threshold: env_or_default("TRANSIT_PULSE_VERIFY_THRESHOLD", "3")
                .parse().unwrap_or(3),
            default_award_points: env_or_default("TRANSIT_PULSE_DEFAULT_AWARD_POINTS", "10")
                .parse().unwrap_or(10),
            initial_trust_score: env_or_default("TRANSIT_PULSE_INITIAL_TRUST", "100")
                .parse().unwrap_or(100),
            high_severity_threshold: env_or_default("TRANSIT_PULSE_HIGH_SEVERITY", "0.6")
                .parse().unwrap_or(0.6),

            // Submission guard
            bloom_expected_items: env_or_default("TRANSIT_PULSE_BLOOM_ITEMS", "100000")
                .parse().unwrap_or(100_000),
            bloom_false_positive_rate: env_or_default("TRANSIT_PULSE_BLOOM_FP_RATE", "0.01")
                .parse().unwrap_or(0.01),
            bloom_rotation_interval: Duration::from_secs(
                env_or_default("TRANSIT_PULSE_BLOOM_ROTATION_SECS", "1800").parse().unwrap_or(1800)
            ),
            lru_cache_size: env_or_default("TRANSIT_PULSE_LRU_CACHE_SIZE", "10000")
                .parse().unwrap_or(10_000),

            // Event pipeline
            event_channel_capacity: env_or_default("TRANSIT_PULSE_EVENT_CAPACITY", "10000")
                .parse().unwrap_or(10_000),
        }
    }
}

/// Helper function to read an environment variable with a default fallback.
/// Because unwrap_or on env::var is ugly and we have standards.
fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
