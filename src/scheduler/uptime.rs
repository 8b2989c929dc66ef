//! Uptime aggregator.
//!
//! Reconstructs a minute-resolution daily timeline for an entity from its
//! incidents and maintenance windows, classifies each minute once, and
//! upserts the daily summary record.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::db::{
    DbError, EntityStatus, Incident, MaintenanceWindow, Store, UptimeRecord,
};

pub const MINUTES_PER_DAY: i64 = 1440;

/// Maximum number of days a backfill request may cover.
pub const MAX_BACKFILL_DAYS: i64 = 365;

/// Aggregation request errors.
#[derive(Error, Debug)]
pub enum UptimeError {
    #[error("date must be a fully elapsed day")]
    DateNotElapsed,
    #[error("days must be between 1 and {MAX_BACKFILL_DAYS}")]
    InvalidBackfillRange,
    #[error(transparent)]
    Db(#[from] DbError),
}

/// Classification of a single minute, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MinuteClass {
    Outage,
    Degraded,
    Maintenance,
    Operational,
}

/// Compute and persist the uptime record for one entity and one date.
///
/// Only fully elapsed days have a well-defined timeline; today and future
/// dates are rejected before any data is touched. The upsert is idempotent:
/// unchanged inputs produce an identical record.
pub fn calculate_uptime_for_date(
    store: &Store,
    degraded_weight: f64,
    entity_id: i64,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<UptimeRecord, UptimeError> {
    if date >= now.date_naive() {
        return Err(UptimeError::DateNotElapsed);
    }

    let day_start = date.and_time(chrono::NaiveTime::MIN).and_utc();
    let day_end = day_start + ChronoDuration::days(1);

    let incidents = store.get_incidents_in_range(entity_id, day_start, day_end)?;
    let windows = store.get_maintenance_in_range(entity_id, day_start, day_end)?;

    let mut operational = 0i64;
    let mut degraded = 0i64;
    let mut outage = 0i64;
    let mut maintenance = 0i64;

    // Each minute is classified exactly once by the highest-precedence
    // condition active at that instant, so the counts sum to a full day.
    for minute in 0..MINUTES_PER_DAY {
        let instant = day_start + ChronoDuration::minutes(minute);
        match classify_minute(instant, &incidents, &windows, now) {
            MinuteClass::Outage => outage += 1,
            MinuteClass::Degraded => degraded += 1,
            MinuteClass::Maintenance => maintenance += 1,
            MinuteClass::Operational => operational += 1,
        }
    }

    let total = MINUTES_PER_DAY as f64;
    let uptime_percentage =
        round3(100.0 * (total - outage as f64 - degraded_weight * degraded as f64) / total);

    let status = if outage > 0 {
        EntityStatus::MajorOutage
    } else if degraded > 0 {
        EntityStatus::Degraded
    } else {
        EntityStatus::Operational
    };

    let record = UptimeRecord {
        id: 0,
        entity_id,
        record_date: date,
        status,
        uptime_percentage,
        total_minutes: MINUTES_PER_DAY,
        operational_minutes: operational,
        degraded_minutes: degraded,
        outage_minutes: outage,
        maintenance_minutes: maintenance,
        incident_count: incidents.len() as i64,
        maintenance_count: windows.len() as i64,
    };
    store.upsert_uptime_record(&record)?;

    let persisted = store
        .get_uptime_record(entity_id, date)?
        .ok_or(DbError::NotFound)?;
    Ok(persisted)
}

/// Compute the record for every entity for one date. A failure for one
/// entity is logged and does not stop the others.
pub fn calculate_for_all_entities(
    store: &Store,
    degraded_weight: f64,
    date: NaiveDate,
    now: DateTime<Utc>,
) -> Result<usize, UptimeError> {
    if date >= now.date_naive() {
        return Err(UptimeError::DateNotElapsed);
    }

    let entities = store.get_entities()?;
    let mut computed = 0;
    for entity in &entities {
        match calculate_uptime_for_date(store, degraded_weight, entity.id, date, now) {
            Ok(_) => computed += 1,
            Err(e) => {
                error!(entity_id = entity.id, date = %date, error = %e, "Uptime computation failed");
            }
        }
    }
    Ok(computed)
}

/// Recompute the last `days` days for every entity, oldest first, so an
/// interrupted run can resume safely. Returns the number of days processed.
pub fn backfill_uptime_history(
    store: &Store,
    degraded_weight: f64,
    days: i64,
    now: DateTime<Utc>,
) -> Result<i64, UptimeError> {
    if !(1..=MAX_BACKFILL_DAYS).contains(&days) {
        return Err(UptimeError::InvalidBackfillRange);
    }

    let today = now.date_naive();
    let mut processed = 0;
    for offset in (1..=days).rev() {
        let date = today - ChronoDuration::days(offset);
        calculate_for_all_entities(store, degraded_weight, date, now)?;
        processed += 1;
    }
    info!(days = processed, "Uptime backfill complete");
    Ok(processed)
}

/// The computation the daily batch job performs: yesterday, all entities.
pub fn run_daily(
    store: &Store,
    degraded_weight: f64,
    now: DateTime<Utc>,
) -> Result<usize, UptimeError> {
    let yesterday = now.date_naive() - ChronoDuration::days(1);
    calculate_for_all_entities(store, degraded_weight, yesterday, now)
}

fn classify_minute(
    instant: DateTime<Utc>,
    incidents: &[Incident],
    windows: &[MaintenanceWindow],
    now: DateTime<Utc>,
) -> MinuteClass {
    let mut any_degraded = false;
    for incident in incidents {
        if !incident_active_at(incident, instant, now) {
            continue;
        }
        if incident.severity.is_outage() {
            return MinuteClass::Outage;
        }
        any_degraded = true;
    }
    if any_degraded {
        return MinuteClass::Degraded;
    }
    if windows
        .iter()
        .any(|w| w.starts_at <= instant && instant < w.ends_at)
    {
        return MinuteClass::Maintenance;
    }
    MinuteClass::Operational
}

/// An open incident contributes through `now` only; it never projects into
/// the future.
fn incident_active_at(incident: &Incident, instant: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let end = incident.resolved_at.unwrap_or(now);
    incident.started_at <= instant && instant < end
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Background job that computes yesterday's records once per UTC day.
pub struct UptimeJob {
    store: Arc<Store>,
    degraded_weight: f64,
    stop: Arc<Mutex<Option<tokio::sync::broadcast::Sender<()>>>>,
}

impl UptimeJob {
    pub fn new(store: Arc<Store>, degraded_weight: f64) -> Self {
        Self {
            store,
            degraded_weight,
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Start the daily aggregation background task.
    pub fn start(&self) {
        let store = self.store.clone();
        let degraded_weight = self.degraded_weight;
        let stop = self.stop.clone();

        tokio::spawn(async move {
            let (tx, _) = tokio::sync::broadcast::channel(1);
            {
                let mut stop_guard = stop.lock().await;
                *stop_guard = Some(tx.clone());
            }

            let mut rx = tx.subscribe();
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
            let mut last_run: Option<NaiveDate> = None;

            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        let now = Utc::now();
                        let today = now.date_naive();
                        if last_run == Some(today) {
                            continue;
                        }
                        match run_daily(&store, degraded_weight, now) {
                            Ok(computed) => {
                                info!(computed, "Daily uptime aggregation complete");
                                last_run = Some(today);
                            }
                            Err(e) => error!(error = %e, "Daily uptime aggregation failed"),
                        }
                    }
                }
            }
        });
    }

    /// Stop the daily aggregation task.
    pub async fn stop(&self) {
        let stop = self.stop.lock().await;
        if let Some(tx) = stop.as_ref() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{
        Entity, IncidentSeverity, IncidentStatus, MaintenanceStatus, SYSTEM_CREATED_BY,
    };
    use chrono::TimeZone;
    use tempfile::NamedTempFile;

    fn test_store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn add_app(store: &Store) -> i64 {
        let mut app = Entity::default();
        store.add_entity(&mut app).unwrap()
    }

    fn add_incident(
        store: &Store,
        entity_id: i64,
        severity: IncidentSeverity,
        started_at: DateTime<Utc>,
        resolved_at: Option<DateTime<Utc>>,
    ) -> i64 {
        let mut incident = Incident {
            id: 0,
            entity_id,
            status: IncidentStatus::Investigating,
            severity,
            created_by: SYSTEM_CREATED_BY.to_string(),
            started_at,
            resolved_at,
        };
        store.create_incident(&mut incident).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_clean_day_is_fully_operational() {
        let (_tmp, store) = test_store();
        let id = add_app(&store);
        let now = Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap();

        let record = calculate_uptime_for_date(&store, 0.5, id, day(2024, 3, 1), now).unwrap();
        assert_eq!(record.operational_minutes, 1440);
        assert_eq!(record.uptime_percentage, 100.0);
        assert_eq!(record.status, EntityStatus::Operational);
        assert_eq!(record.incident_count, 0);
    }

    #[test]
    fn test_four_hour_outage() {
        let (_tmp, store) = test_store();
        let id = add_app(&store);
        let started = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        add_incident(
            &store,
            id,
            IncidentSeverity::Critical,
            started,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap()),
        );

        let now = Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap();
        let record = calculate_uptime_for_date(&store, 0.5, id, day(2024, 3, 1), now).unwrap();
        assert_eq!(record.outage_minutes, 240);
        assert_eq!(record.operational_minutes, 1200);
        assert_eq!(record.uptime_percentage, 83.333);
        assert_eq!(record.status, EntityStatus::MajorOutage);
        assert_eq!(record.incident_count, 1);
        assert_eq!(
            record.operational_minutes
                + record.degraded_minutes
                + record.outage_minutes
                + record.maintenance_minutes,
            record.total_minutes
        );
    }

    #[test]
    fn test_open_incident_contributes_through_now_only() {
        let (_tmp, store) = test_store();
        let id = add_app(&store);
        // Started at 10:00 yesterday, still unresolved.
        let started = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        add_incident(&store, id, IncidentSeverity::Critical, started, None);

        let now = Utc.with_ymd_and_hms(2024, 3, 2, 1, 0, 0).unwrap();
        let record = calculate_uptime_for_date(&store, 0.5, id, day(2024, 3, 1), now).unwrap();
        // 10:00 through midnight of the record day.
        assert_eq!(record.outage_minutes, 840);
        assert_eq!(record.operational_minutes, 600);
    }

    #[test]
    fn test_maintenance_is_neutral() {
        let (_tmp, store) = test_store();
        let id = add_app(&store);
        let mut window = MaintenanceWindow {
            id: 0,
            entity_id: id,
            status: MaintenanceStatus::Completed,
            starts_at: Utc.with_ymd_and_hms(2024, 3, 1, 2, 0, 0).unwrap(),
            ends_at: Utc.with_ymd_and_hms(2024, 3, 1, 4, 0, 0).unwrap(),
        };
        store.add_maintenance_window(&mut window).unwrap();

        let now = Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap();
        let record = calculate_uptime_for_date(&store, 0.5, id, day(2024, 3, 1), now).unwrap();
        assert_eq!(record.maintenance_minutes, 120);
        assert_eq!(record.operational_minutes, 1320);
        assert_eq!(record.uptime_percentage, 100.0);
        assert_eq!(record.status, EntityStatus::Operational);
        assert_eq!(record.maintenance_count, 1);
    }

    #[test]
    fn test_degraded_partial_credit() {
        let (_tmp, store) = test_store();
        let id = add_app(&store);
        add_incident(
            &store,
            id,
            IncidentSeverity::Minor,
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
        );

        let now = Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap();
        let record = calculate_uptime_for_date(&store, 0.5, id, day(2024, 3, 1), now).unwrap();
        assert_eq!(record.degraded_minutes, 720);
        assert_eq!(record.uptime_percentage, 75.0);
        assert_eq!(record.status, EntityStatus::Degraded);

        // Full-credit policy counts degraded minutes as up.
        let full = calculate_uptime_for_date(&store, 0.0, id, day(2024, 3, 1), now).unwrap();
        assert_eq!(full.uptime_percentage, 100.0);
    }

    #[test]
    fn test_outage_precedes_maintenance_no_double_count() {
        let (_tmp, store) = test_store();
        let id = add_app(&store);
        // Maintenance 01:00-05:00 overlapping an outage 02:00-03:00.
        let mut window = MaintenanceWindow {
            id: 0,
            entity_id: id,
            status: MaintenanceStatus::Completed,
            starts_at: Utc.with_ymd_and_hms(2024, 3, 1, 1, 0, 0).unwrap(),
            ends_at: Utc.with_ymd_and_hms(2024, 3, 1, 5, 0, 0).unwrap(),
        };
        store.add_maintenance_window(&mut window).unwrap();
        add_incident(
            &store,
            id,
            IncidentSeverity::Critical,
            Utc.with_ymd_and_hms(2024, 3, 1, 2, 0, 0).unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 3, 0, 0).unwrap()),
        );

        let now = Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap();
        let record = calculate_uptime_for_date(&store, 0.5, id, day(2024, 3, 1), now).unwrap();
        assert_eq!(record.outage_minutes, 60);
        assert_eq!(record.maintenance_minutes, 180);
        assert_eq!(record.operational_minutes, 1200);
        assert_eq!(
            record.operational_minutes
                + record.degraded_minutes
                + record.outage_minutes
                + record.maintenance_minutes,
            1440
        );
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let (_tmp, store) = test_store();
        let id = add_app(&store);
        add_incident(
            &store,
            id,
            IncidentSeverity::Critical,
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 14, 0, 0).unwrap()),
        );

        let now = Utc.with_ymd_and_hms(2024, 3, 2, 8, 0, 0).unwrap();
        let first = calculate_uptime_for_date(&store, 0.5, id, day(2024, 3, 1), now).unwrap();
        let second = calculate_uptime_for_date(&store, 0.5, id, day(2024, 3, 1), now).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_today_and_future_rejected_without_writing() {
        let (_tmp, store) = test_store();
        let id = add_app(&store);
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();

        for date in [day(2024, 3, 1), day(2024, 3, 2)] {
            let result = calculate_uptime_for_date(&store, 0.5, id, date, now);
            assert!(matches!(result, Err(UptimeError::DateNotElapsed)));
            assert!(store.get_uptime_record(id, date).unwrap().is_none());
        }
    }

    #[test]
    fn test_backfill_bounds() {
        let (_tmp, store) = test_store();
        add_app(&store);
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap();

        for days in [0, 366, -1] {
            let result = backfill_uptime_history(&store, 0.5, days, now);
            assert!(matches!(result, Err(UptimeError::InvalidBackfillRange)));
        }
    }

    #[test]
    fn test_backfill_processes_each_day_once() {
        let (_tmp, store) = test_store();
        let id = add_app(&store);
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap();

        let processed = backfill_uptime_history(&store, 0.5, 5, now).unwrap();
        assert_eq!(processed, 5);
        for offset in 1..=5 {
            let date = now.date_naive() - ChronoDuration::days(offset);
            assert!(store.get_uptime_record(id, date).unwrap().is_some());
        }
        // Nothing written for today.
        assert!(store.get_uptime_record(id, now.date_naive()).unwrap().is_none());
    }

    #[test]
    fn test_run_daily_targets_yesterday() {
        let (_tmp, store) = test_store();
        let id = add_app(&store);
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 0, 30, 0).unwrap();

        let computed = run_daily(&store, 0.5, now).unwrap();
        assert_eq!(computed, 1);
        assert!(store
            .get_uptime_record(id, day(2024, 3, 9))
            .unwrap()
            .is_some());
    }
}
