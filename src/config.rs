//! Configuration module for StatusTrail.
//!
//! Loads process configuration from environment variables with sensible
//! defaults. Runtime-adjustable scheduler settings live in the database
//! instead (see `settings`).

use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the operator API (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "statustrail.db")
    pub db_path: String,
    /// Weight of a degraded minute in the uptime percentage, 0.0 (full
    /// credit) to 1.0 (full downtime). Default: 0.5
    pub degraded_weight: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "statustrail.db".to_string(),
            degraded_weight: 0.5,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `STATUSTRAIL_HTTP_PORT`: HTTP port (default: 8080)
    /// - `STATUSTRAIL_DB_PATH`: Database file path (default: "statustrail.db")
    /// - `STATUSTRAIL_DEGRADED_WEIGHT`: degraded-minute weight (default: 0.5)
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(port_str) = env::var("STATUSTRAIL_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.http_port = port;
            }
        }

        if let Ok(db_path) = env::var("STATUSTRAIL_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Ok(weight_str) = env::var("STATUSTRAIL_DEGRADED_WEIGHT") {
            if let Ok(weight) = weight_str.parse::<f64>() {
                cfg.degraded_weight = weight.clamp(0.0, 1.0);
            }
        }

        cfg
    }
}
