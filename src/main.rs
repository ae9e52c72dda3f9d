// ████████╗██████╗  █████╗ ███╗   ██╗███████╗██╗████████╗
// ╚══██╔══╝██╔══██╗██╔══██╗████╗  ██║██╔════╝██║╚══██╔══╝
//    ██║   ██████╔╝███████║██╔██╗ ██║███████╗██║   ██║
//    ██║   ██╔══██╗██╔══██║██║╚██╗██║╚════██║██║   ██║
//    ██║   ██║  ██║██║  ██║██║ ╚████║███████║██║   ██║
//    ╚═╝   ╚═╝  ╚═╝╚═╝  ╚═╝╚═╝  ╚═══╝╚══════╝╚═╝   ╚═╝
//
// ██████╗ ██╗   ██╗██╗     ███████╗███████╗
// ██╔══██╗██║   ██║██║     ██╔════╝██╔════╝
// ██████╔╝██║   ██║██║     ███████╗█████╗
// ██╔═══╝ ██║   ██║██║     ╚════██║██╔══╝
// ██║     ╚██████╔╝███████╗███████║███████╗
// ╚═╝      ╚═════╝ ╚══════╝╚══════╝╚══════╝
//
// E N G I N E
//
// The most overkill city-bus tracking engine ever conceived.
// Rust + Tokio + Crossbeam + Bloom Filters + SIMD + Atomic Trust Scores
// All to tell a rider the 42 is eleven minutes away.

mod config;
mod dedup;
mod engine;
mod error;
mod eta;
mod events;
mod fleet;
mod gateway;
mod geo;
mod metrics;
mod models;
mod publisher;
mod reports;
mod routes;
mod triage;
mod trust;

use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{self, fmt, EnvFilter};

use crate::config::Config;
use crate::engine::Engine;
use crate::events::EventBus;
use crate::metrics::MetricsCollector;
use crate::publisher::FeedPublisher;

fn print_banner() {
    let banner = r#"

    ╔══════════════════════════════════════════════════════════════════╗
    ║                                                                  ║
    ║   ████████╗██████╗  █████╗ ███╗   ██╗███████╗██╗████████╗        ║
    ║   ╚══██╔══╝██╔══██╗██╔══██╗████╗  ██║██╔════╝██║╚══██╔══╝        ║
    ║      ██║   ██████╔╝███████║██╔██╗ ██║███████╗██║   ██║           ║
    ║      ██║   ██╔══██╗██╔══██║██║╚██╗██║╚════██║██║   ██║           ║
    ║      ██║   ██║  ██║██║  ██║██║ ╚████║███████║██║   ██║           ║
    ║      ╚═╝   ╚═╝  ╚═╝╚═╝  ╚═╝╚═╝  ╚═══╝╚══════╝╚═╝   ╚═╝           ║
    ║                                                                  ║
    ║        ██████╗ ██╗   ██╗██╗     ███████╗███████╗                 ║
    ║        ██╔══██╗██║   ██║██║     ██╔════╝██╔════╝                 ║
    ║        ██████╔╝██║   ██║██║     ███████╗█████╗                   ║
    ║        ██╔═══╝ ██║   ██║██║     ╚════██║██╔══╝                   ║
    ║        ██║     ╚██████╔╝███████╗███████║███████╗                 ║
    ║        ╚═╝      ╚═════╝ ╚══════╝╚══════╝╚══════╝                 ║
    ║                                                                  ║
    ║          🚌 CITY BUS TRACKING & CROWD-REPORT ENGINE 🚌           ║
    ║                                                                  ║
    ║   Tracking:  live positions | per-stop ETAs | proximity          ║
    ║   Reports:   peer verification | admin validation | trust        ║
    ║   Dedup:     Bloom Filter + LRU Cache Hybrid                     ║
    ║   Triage:    SIMD-Accelerated Aho-Corasick Complaint Scanning    ║
    ║   Channels:  Lock-Free Crossbeam                                 ║
    ║                                                                  ║
    ║   "The bus is coming. We can prove it."                          ║
    ║                                                                  ║
    ╚══════════════════════════════════════════════════════════════════╝

    "#;
    println!("{}", banner);
}

#[tokio::main(flavor = "multi_thread", worker_threads = 8)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(true)
        .init();

    print_banner();

    info!("🚌 TRANSIT PULSE ENGINE initializing...");

    // Load configuration
    let config = Arc::new(Config::from_env());
    info!("✅ Configuration loaded: redis_url={}", config.redis_url);

    // Lock-free crossbeam event pipeline
    let (events, event_rx) = EventBus::channel(config.event_channel_capacity);
    info!(
        "✅ Lock-free event channel created (capacity: {})",
        config.event_channel_capacity
    );

    // Metrics collector
    let metrics_collector = Arc::new(MetricsCollector::new());
    info!("✅ Metrics collector initialized");

    // The engine itself: fleet, routes, trust ledger, report tribunal,
    // ETA prophecy division, submission guard. Some assembly required,
    // batteries included.
    let engine = Arc::new(Engine::new(
        &config,
        events.clone(),
        Arc::clone(&metrics_collector),
    ));
    info!("✅ Engine assembled — fleet registry, report tribunal and trust ledger online");

    // Shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ═══════════════════════════════════════════
    // SPAWN THE GATEWAY
    // ═══════════════════════════════════════════
    let gateway_engine = Arc::clone(&engine);
    let gateway_port = config.gateway_port;
    let mut gateway_shutdown = shutdown_rx.clone();
    let gateway_handle = tokio::spawn(async move {
        info!("🚪 Gateway: ONLINE");
        gateway::run_gateway(gateway_engine, gateway_port, &mut gateway_shutdown).await;
        info!("🚪 Gateway: OFFLINE");
    });

    // ═══════════════════════════════════════════
    // SPAWN THE REDIS FEED PUBLISHER
    // ═══════════════════════════════════════════
    let pub_config = Arc::clone(&config);
    let pub_shutdown = shutdown_rx.clone();
    let (feed_publisher, _pub_stats) = FeedPublisher::new(
        pub_config,
        event_rx,
        pub_shutdown,
        Arc::clone(&metrics_collector),
    );
    let publisher_handle = tokio::spawn(async move {
        info!("📤 Feed Publisher: ONLINE");
        if let Err(e) = feed_publisher.run().await {
            error!("📤 Feed Publisher error: {}", e);
        }
        info!("📤 Feed Publisher: OFFLINE");
    });

    // ═══════════════════════════════════════════
    // SPAWN THE METRICS HTTP SERVER
    // ═══════════════════════════════════════════
    let metrics_for_server = Arc::clone(&metrics_collector);
    let metrics_port = config.metrics_port;
    let mut metrics_shutdown = shutdown_rx.clone();
    let metrics_handle = tokio::spawn(async move {
        info!("📊 Metrics server starting on port {}...", metrics_port);
        metrics::run_metrics_server(metrics_for_server, metrics_port, &mut metrics_shutdown).await;
        info!("📊 Metrics server: OFFLINE");
    });

    info!("═══════════════════════════════════════════════════════");
    info!("  🟢 ALL SYSTEMS ONLINE - TRANSIT PULSE ENGINE ACTIVE");
    info!("  🚪 Gateway on 0.0.0.0:{}", config.gateway_port);
    info!("  📤 Publishing to Redis at {}", config.redis_url);
    info!("  📊 Metrics at http://0.0.0.0:{}", config.metrics_port);
    info!("  ⚡ Press Ctrl+C for graceful shutdown");
    info!("═══════════════════════════════════════════════════════");

    // Wait for shutdown signal
    match signal::ctrl_c().await {
        Ok(()) => {
            warn!("🛑 Shutdown signal received!");
            let _ = shutdown_tx.send(true);
        }
        Err(err) => {
            error!("❌ Signal listener error: {}", err);
            let _ = shutdown_tx.send(true);
        }
    }

    info!("⏳ Waiting for tasks to complete (timeout: 10s)...");
    let _ = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        async {
            let _ = tokio::join!(
                gateway_handle,
                publisher_handle,
                metrics_handle,
            );
        }
    ).await;

    info!("💤 TRANSIT PULSE ENGINE: OFFLINE");
    Ok(())
}
