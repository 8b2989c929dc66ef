//! StatusTrail - Availability Probing & Uptime Aggregation Engine
//!
//! Periodically probes monitored platforms, apps, and components, drives
//! their operational status and system incidents, and aggregates daily
//! uptime statistics.

mod config;
mod db;
mod probe;
mod registry;
mod scheduler;
mod settings;
mod web;

use config::ServerConfig;
use db::Store;
use scheduler::{Scheduler, UptimeJob};
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("statustrail=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting StatusTrail on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    let entities = store.get_entities()?;
    tracing::info!("Database initialized, {} entities registered", entities.len());

    // Start the probe scheduler
    let scheduler = Arc::new(Scheduler::new(store.clone()));
    scheduler.start();

    // Start the daily uptime aggregation job
    let uptime_job = UptimeJob::new(store.clone(), cfg.degraded_weight);
    uptime_job.start();

    // Start web server
    let server = Server::new(cfg, store, scheduler);
    server.start().await?;

    Ok(())
}
