//! Scheduler module: the periodic tick loop that dispatches probes through a
//! bounded worker pool, plus the status transition engine and the uptime
//! aggregation batch job.

mod transition;
mod uptime;

pub use transition::*;
pub use uptime::*;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::db::{DbError, Store};
use crate::probe::run_probe;
use crate::registry::{self, Candidate};
use crate::settings::SettingsSnapshot;

/// Result of a manual trigger for a single entity.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerResult {
    pub entity_id: i64,
    pub success: bool,
    pub message: String,
    pub elapsed_ms: u64,
    /// True when the entity was already mid-probe and no second probe ran;
    /// the result then reflects the most recent recorded check.
    pub coalesced: bool,
}

/// Summary of a trigger-all run.
#[derive(Debug, Clone, Serialize)]
pub struct TriggerSummary {
    pub checked: usize,
    pub elapsed_ms: u64,
}

/// The scheduler that drives all periodic probing.
pub struct Scheduler {
    store: Arc<Store>,
    in_flight: Arc<Mutex<HashSet<i64>>>,
    stop: Arc<Mutex<Option<tokio::sync::broadcast::Sender<()>>>>,
}

impl Scheduler {
    /// Create a new scheduler with the given store.
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the periodic tick loop.
    pub fn start(&self) {
        let store = self.store.clone();
        let in_flight = self.in_flight.clone();
        let stop = self.stop.clone();

        tokio::spawn(async move {
            let (tx, _) = tokio::sync::broadcast::channel(1);
            {
                let mut stop_guard = stop.lock().await;
                *stop_guard = Some(tx.clone());
            }

            let mut rx = tx.subscribe();
            let mut interval_ms = SettingsSnapshot::default().scheduler_interval_ms;
            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = tokio::time::sleep(Duration::from_millis(interval_ms)) => {
                        // A fresh snapshot at the start of every tick; changes
                        // take effect from the next tick, never retroactively.
                        let snapshot = match SettingsSnapshot::load(&store) {
                            Ok(s) => s,
                            Err(e) => {
                                error!(error = %e, "Failed to load settings, using defaults");
                                SettingsSnapshot::default()
                            }
                        };
                        interval_ms = snapshot.scheduler_interval_ms;
                        if !snapshot.enabled {
                            debug!("Health checking disabled, skipping tick");
                            continue;
                        }
                        run_tick(&store, &in_flight, &snapshot).await;
                    }
                }
            }
        });
    }

    /// Stop issuing new ticks. In-flight probes drain on their own.
    pub async fn stop(&self) {
        let stop = self.stop.lock().await;
        if let Some(tx) = stop.as_ref() {
            let _ = tx.send(());
        }
    }

    /// Probe every enabled entity immediately, bypassing the due check.
    pub async fn trigger_all(&self) -> Result<TriggerSummary, DbError> {
        let snapshot = SettingsSnapshot::load(&self.store)?;
        let candidates = registry::list_all_candidates(&self.store, &snapshot)?;

        let start = Instant::now();
        let checked =
            dispatch_candidates(&self.store, &self.in_flight, &snapshot, candidates).await;
        Ok(TriggerSummary {
            checked,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Probe one entity immediately, bypassing the due check.
    ///
    /// Returns None when the id does not resolve to an entity with checks
    /// enabled. A trigger racing an in-flight probe coalesces instead of
    /// running a second concurrent probe for the same entity.
    pub async fn trigger_entity(&self, entity_id: i64) -> Result<Option<TriggerResult>, DbError> {
        let start = Instant::now();

        {
            let mut guard = self.in_flight.lock().await;
            if guard.contains(&entity_id) {
                let entity = self.store.get_entity(entity_id)?;
                return Ok(Some(TriggerResult {
                    entity_id,
                    success: entity.last_check_success.unwrap_or(false),
                    message: entity.last_check_message,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                    coalesced: true,
                }));
            }
            guard.insert(entity_id);
        }

        let result = self.probe_one(entity_id).await;
        self.in_flight.lock().await.remove(&entity_id);

        let outcome = match result? {
            Some(outcome) => outcome,
            None => return Ok(None),
        };
        Ok(Some(TriggerResult {
            entity_id,
            success: outcome.success,
            message: outcome.message,
            elapsed_ms: start.elapsed().as_millis() as u64,
            coalesced: false,
        }))
    }

    async fn probe_one(&self, entity_id: i64) -> Result<Option<crate::probe::Outcome>, DbError> {
        let snapshot = SettingsSnapshot::load(&self.store)?;
        let candidate = match registry::resolve_candidate(&self.store, &snapshot, entity_id)? {
            Some(c) => c,
            None => return Ok(None),
        };

        let outcome = run_probe(&candidate.probe_request()).await;
        transition::apply_outcome(&self.store, &candidate, &outcome, Utc::now())?;
        Ok(Some(outcome))
    }
}

/// One tick: collect due candidates, dispatch into the bounded pool, drain.
async fn run_tick(
    store: &Arc<Store>,
    in_flight: &Arc<Mutex<HashSet<i64>>>,
    snapshot: &SettingsSnapshot,
) {
    let now = Utc::now();
    let due = match registry::list_due_candidates(store, snapshot, now) {
        Ok(d) => d,
        Err(e) => {
            error!(error = %e, "Failed to collect due entities");
            return;
        }
    };
    if due.is_empty() {
        return;
    }

    debug!(count = due.len(), "Tick dispatching due entities");
    let checked = dispatch_candidates(store, in_flight, snapshot, due).await;
    debug!(checked, "Tick drained");
}

/// Dispatch candidates into the bounded worker pool and await them all.
///
/// At most `thread_pool_size` probes run concurrently; the rest wait on a
/// semaphore permit within the same tick. Entities already mid-probe are
/// coalesced, and one entity's persistence failure never aborts the others.
/// Returns the number of entities actually dispatched.
async fn dispatch_candidates(
    store: &Arc<Store>,
    in_flight: &Arc<Mutex<HashSet<i64>>>,
    snapshot: &SettingsSnapshot,
    candidates: Vec<Candidate>,
) -> usize {
    let semaphore = Arc::new(Semaphore::new(snapshot.thread_pool_size));
    let mut tasks: JoinSet<()> = JoinSet::new();
    let mut dispatched = 0;

    for candidate in candidates {
        let entity_id = candidate.entity.id;
        {
            let mut guard = in_flight.lock().await;
            if !guard.insert(entity_id) {
                warn!(entity_id, "Probe already in flight, coalescing");
                continue;
            }
        }
        dispatched += 1;

        let store = store.clone();
        let in_flight = in_flight.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return,
            };

            // Re-read runtime state under the in-flight guard: the counters
            // may have moved since collection if a manual trigger ran.
            let candidate = match store.get_entity(entity_id) {
                Ok(entity) => Candidate {
                    entity,
                    effective: candidate.effective,
                },
                Err(e) => {
                    error!(entity_id, error = %e, "Entity vanished before probe");
                    in_flight.lock().await.remove(&entity_id);
                    return;
                }
            };

            let outcome = run_probe(&candidate.probe_request()).await;
            if let Err(e) = transition::apply_outcome(&store, &candidate, &outcome, Utc::now()) {
                error!(entity_id, error = %e, "Failed to persist check result");
            }
            in_flight.lock().await.remove(&entity_id);
        });
    }

    // Drain phase: the tick is complete only once every dispatched probe has
    // returned or been abandoned at its timeout.
    while tasks.join_next().await.is_some() {}
    dispatched
}
