//! Runtime-adjustable scheduler settings.
//!
//! Settings live in the store's key-value table and are re-read at the start
//! of every scheduler tick, so operator changes take effect from the next
//! tick without a restart.

use crate::db::{DbError, Store};

pub const KEY_ENABLED: &str = "enabled";
pub const KEY_SCHEDULER_INTERVAL_MS: &str = "schedulerIntervalMs";
pub const KEY_THREAD_POOL_SIZE: &str = "threadPoolSize";
pub const KEY_DEFAULT_INTERVAL_SECONDS: &str = "defaultIntervalSeconds";
pub const KEY_DEFAULT_TIMEOUT_SECONDS: &str = "defaultTimeoutSeconds";

/// Keys the settings API accepts.
pub const RECOGNIZED_KEYS: [&str; 5] = [
    KEY_ENABLED,
    KEY_SCHEDULER_INTERVAL_MS,
    KEY_THREAD_POOL_SIZE,
    KEY_DEFAULT_INTERVAL_SECONDS,
    KEY_DEFAULT_TIMEOUT_SECONDS,
];

pub fn is_recognized_key(key: &str) -> bool {
    RECOGNIZED_KEYS.contains(&key)
}

/// A point-in-time view of the scheduler settings, taken once per tick and
/// passed by value into that tick's collection and dispatch phases.
#[derive(Debug, Clone)]
pub struct SettingsSnapshot {
    pub enabled: bool,
    pub scheduler_interval_ms: u64,
    pub thread_pool_size: usize,
    pub default_interval_seconds: i64,
    pub default_timeout_seconds: i64,
}

impl Default for SettingsSnapshot {
    fn default() -> Self {
        Self {
            enabled: true,
            scheduler_interval_ms: 10_000,
            thread_pool_size: 10,
            default_interval_seconds: 60,
            default_timeout_seconds: 10,
        }
    }
}

impl SettingsSnapshot {
    /// Load a snapshot from the store. Missing or unparseable values fall
    /// back to the defaults.
    pub fn load(store: &Store) -> Result<Self, DbError> {
        let defaults = Self::default();

        let enabled = value_of(store, KEY_ENABLED)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.enabled);
        let scheduler_interval_ms = value_of(store, KEY_SCHEDULER_INTERVAL_MS)?
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults.scheduler_interval_ms)
            .max(1000);
        let thread_pool_size = value_of(store, KEY_THREAD_POOL_SIZE)?
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults.thread_pool_size)
            .max(1);
        let default_interval_seconds = value_of(store, KEY_DEFAULT_INTERVAL_SECONDS)?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(defaults.default_interval_seconds)
            .max(1);
        let default_timeout_seconds = value_of(store, KEY_DEFAULT_TIMEOUT_SECONDS)?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(defaults.default_timeout_seconds)
            .max(1);

        Ok(Self {
            enabled,
            scheduler_interval_ms,
            thread_pool_size,
            default_interval_seconds,
            default_timeout_seconds,
        })
    }
}

fn value_of(store: &Store, key: &str) -> Result<Option<String>, DbError> {
    Ok(store.get_setting(key)?.map(|s| s.value))
}
