//! SQLite database store implementation.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    // --- Entities ---

    /// Add a new entity and return its ID. Used by seeding and tests; entity
    /// CRUD proper lives outside this engine.
    pub fn add_entity(&self, entity: &mut Entity) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO entities (kind, parent_id, name, status, check_enabled, check_type,
                check_target, check_interval_seconds, check_timeout_seconds, expected_status,
                failure_threshold, inherit_check_from_parent, last_check_at, last_check_success,
                last_check_message, consecutive_failures)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                entity.kind.as_str(),
                entity.parent_id,
                entity.name,
                entity.status.as_str(),
                entity.check.enabled,
                entity.check.check_type.as_str(),
                entity.check.target,
                entity.check.interval_seconds,
                entity.check.timeout_seconds,
                entity.check.expected_status as i64,
                entity.check.failure_threshold,
                entity.check.inherit_from_parent,
                entity.last_check_at.map(format_time),
                entity.last_check_success,
                entity.last_check_message,
                entity.consecutive_failures,
            ],
        )?;
        let id = conn.last_insert_rowid();
        entity.id = id;
        Ok(id)
    }

    /// Get all entities.
    pub fn get_entities(&self) -> Result<Vec<Entity>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("{} ORDER BY id ASC", ENTITY_SELECT))?;
        let entities = stmt
            .query_map([], entity_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(entities)
    }

    /// Get an entity by ID.
    pub fn get_entity(&self, id: i64) -> Result<Entity, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("{} WHERE id = ?1", ENTITY_SELECT),
            params![id],
            entity_from_row,
        )
        .optional()?
        .ok_or(DbError::NotFound)
    }

    /// Get the components belonging to an app.
    pub fn get_components_of(&self, app_id: i64) -> Result<Vec<Entity>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE parent_id = ?1 AND kind = 'component' ORDER BY id ASC",
            ENTITY_SELECT
        ))?;
        let entities = stmt
            .query_map(params![app_id], entity_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(entities)
    }

    /// Record a probe outcome on an entity's runtime fields.
    pub fn record_check_result(
        &self,
        entity_id: i64,
        checked_at: DateTime<Utc>,
        success: bool,
        message: &str,
        consecutive_failures: i64,
    ) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE entities SET last_check_at = ?1, last_check_success = ?2,
                last_check_message = ?3, consecutive_failures = ?4 WHERE id = ?5",
            params![
                format_time(checked_at),
                success,
                message,
                consecutive_failures,
                entity_id
            ],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Set an entity's operational status.
    pub fn set_entity_status(&self, entity_id: i64, status: EntityStatus) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE entities SET status = ?1 WHERE id = ?2",
            params![status.as_str(), entity_id],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    // --- Incidents ---

    /// Open a new incident and return its ID.
    pub fn create_incident(&self, incident: &mut Incident) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO incidents (entity_id, status, severity, created_by, started_at, resolved_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                incident.entity_id,
                incident.status.as_str(),
                incident.severity.as_str(),
                incident.created_by,
                format_time(incident.started_at),
                incident.resolved_at.map(format_time),
            ],
        )?;
        let id = conn.last_insert_rowid();
        incident.id = id;
        Ok(id)
    }

    /// Record the status of a component affected by an incident.
    pub fn link_incident_component(
        &self,
        incident_id: i64,
        component_id: i64,
        component_status: EntityStatus,
    ) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO incident_components (incident_id, component_id, component_status)
             VALUES (?1, ?2, ?3)",
            params![incident_id, component_id, component_status.as_str()],
        )?;
        Ok(())
    }

    /// Resolve an incident.
    pub fn resolve_incident(&self, incident_id: i64, resolved_at: DateTime<Utc>) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE incidents SET status = 'RESOLVED', resolved_at = ?1 WHERE id = ?2",
            params![format_time(resolved_at), incident_id],
        )?;
        if updated == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Find the open system-created incident for an entity, if any.
    pub fn find_open_system_incident(&self, entity_id: i64) -> Result<Option<Incident>, DbError> {
        let conn = self.conn.lock().unwrap();
        let incident = conn
            .query_row(
                &format!(
                    "{} WHERE entity_id = ?1 AND created_by = ?2 AND resolved_at IS NULL
                     ORDER BY started_at DESC LIMIT 1",
                    INCIDENT_SELECT
                ),
                params![entity_id, SYSTEM_CREATED_BY],
                incident_from_row,
            )
            .optional()?;
        Ok(incident)
    }

    /// Get the incidents affecting an entity (directly or through a component
    /// link) whose active interval intersects `[start, end)`.
    pub fn get_incidents_in_range(
        &self,
        entity_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Incident>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT i.id, i.entity_id, i.status, i.severity, i.created_by,
                    i.started_at, i.resolved_at
             FROM incidents i
             LEFT JOIN incident_components ic ON ic.incident_id = i.id
             WHERE (i.entity_id = ?1 OR ic.component_id = ?1)
               AND i.started_at < ?3
               AND (i.resolved_at IS NULL OR i.resolved_at > ?2)
             ORDER BY i.started_at ASC",
        )?;
        let incidents = stmt
            .query_map(
                params![entity_id, format_time(start), format_time(end)],
                incident_from_row,
            )?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(incidents)
    }

    // --- Maintenance windows ---

    /// Add a maintenance window and return its ID. Used by seeding and tests.
    pub fn add_maintenance_window(&self, window: &mut MaintenanceWindow) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO maintenance_windows (entity_id, status, starts_at, ends_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                window.entity_id,
                window.status.as_str(),
                format_time(window.starts_at),
                format_time(window.ends_at),
            ],
        )?;
        let id = conn.last_insert_rowid();
        window.id = id;
        Ok(id)
    }

    /// Mark a component as affected by a maintenance window.
    pub fn link_maintenance_component(
        &self,
        maintenance_id: i64,
        component_id: i64,
    ) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO maintenance_components (maintenance_id, component_id)
             VALUES (?1, ?2)",
            params![maintenance_id, component_id],
        )?;
        Ok(())
    }

    /// Get the non-cancelled maintenance windows affecting an entity whose
    /// `[starts_at, ends_at)` interval intersects `[start, end)`.
    pub fn get_maintenance_in_range(
        &self,
        entity_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MaintenanceWindow>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT m.id, m.entity_id, m.status, m.starts_at, m.ends_at
             FROM maintenance_windows m
             LEFT JOIN maintenance_components mc ON mc.maintenance_id = m.id
             WHERE (m.entity_id = ?1 OR mc.component_id = ?1)
               AND m.status != 'CANCELLED'
               AND m.starts_at < ?3
               AND m.ends_at > ?2
             ORDER BY m.starts_at ASC",
        )?;
        let windows = stmt
            .query_map(
                params![entity_id, format_time(start), format_time(end)],
                maintenance_from_row,
            )?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(windows)
    }

    // --- Uptime records ---

    /// Insert or overwrite the uptime record for (entity, date).
    pub fn upsert_uptime_record(&self, record: &UptimeRecord) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO uptime_records (entity_id, record_date, status, uptime_percentage,
                total_minutes, operational_minutes, degraded_minutes, outage_minutes,
                maintenance_minutes, incident_count, maintenance_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(entity_id, record_date) DO UPDATE SET
                status=excluded.status,
                uptime_percentage=excluded.uptime_percentage,
                total_minutes=excluded.total_minutes,
                operational_minutes=excluded.operational_minutes,
                degraded_minutes=excluded.degraded_minutes,
                outage_minutes=excluded.outage_minutes,
                maintenance_minutes=excluded.maintenance_minutes,
                incident_count=excluded.incident_count,
                maintenance_count=excluded.maintenance_count",
            params![
                record.entity_id,
                record.record_date.format(DATE_FORMAT).to_string(),
                record.status.as_str(),
                record.uptime_percentage,
                record.total_minutes,
                record.operational_minutes,
                record.degraded_minutes,
                record.outage_minutes,
                record.maintenance_minutes,
                record.incident_count,
                record.maintenance_count,
            ],
        )?;
        Ok(())
    }

    /// Get the uptime record for (entity, date), if one exists.
    pub fn get_uptime_record(
        &self,
        entity_id: i64,
        date: NaiveDate,
    ) -> Result<Option<UptimeRecord>, DbError> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT id, entity_id, record_date, status, uptime_percentage, total_minutes,
                        operational_minutes, degraded_minutes, outage_minutes, maintenance_minutes,
                        incident_count, maintenance_count
                 FROM uptime_records WHERE entity_id = ?1 AND record_date = ?2",
                params![entity_id, date.format(DATE_FORMAT).to_string()],
                uptime_from_row,
            )
            .optional()?;
        Ok(record)
    }

    // --- Settings ---

    /// Get a setting by key.
    pub fn get_setting(&self, key: &str) -> Result<Option<Setting>, DbError> {
        let conn = self.conn.lock().unwrap();
        let setting = conn
            .query_row(
                "SELECT key, value, updated_at FROM settings WHERE key = ?1",
                params![key],
                setting_from_row,
            )
            .optional()?;
        Ok(setting)
    }

    /// Create or update a setting.
    pub fn set_setting(&self, key: &str, value: &str) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value, updated_at=excluded.updated_at",
            params![key, value, format_time(Utc::now())],
        )?;
        Ok(())
    }

    /// Get all settings.
    pub fn get_settings(&self) -> Result<Vec<Setting>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT key, value, updated_at FROM settings ORDER BY key ASC")?;
        let settings = stmt
            .query_map([], setting_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(settings)
    }
}

const ENTITY_SELECT: &str = "SELECT id, kind, parent_id, name, status, check_enabled, check_type,
    check_target, check_interval_seconds, check_timeout_seconds, expected_status,
    failure_threshold, inherit_check_from_parent, last_check_at, last_check_success,
    last_check_message, consecutive_failures FROM entities";

const INCIDENT_SELECT: &str =
    "SELECT id, entity_id, status, severity, created_by, started_at, resolved_at FROM incidents";

fn entity_from_row(row: &Row<'_>) -> SqlResult<Entity> {
    let kind: String = row.get(1)?;
    let status: String = row.get(4)?;
    let check_type: String = row.get(6)?;
    let expected_status: i64 = row.get(10)?;
    let last_check_at: Option<String> = row.get(13)?;
    Ok(Entity {
        id: row.get(0)?,
        kind: EntityKind::parse(&kind).unwrap_or(EntityKind::App),
        parent_id: row.get(2)?,
        name: row.get(3)?,
        status: EntityStatus::parse(&status).unwrap_or(EntityStatus::Operational),
        check: CheckConfig {
            enabled: row.get(5)?,
            check_type: CheckType::parse(&check_type).unwrap_or(CheckType::None),
            target: row.get(7)?,
            interval_seconds: row.get(8)?,
            timeout_seconds: row.get(9)?,
            expected_status: expected_status as u16,
            failure_threshold: row.get(11)?,
            inherit_from_parent: row.get(12)?,
        },
        last_check_at: last_check_at.as_deref().and_then(parse_db_time),
        last_check_success: row.get(14)?,
        last_check_message: row.get(15)?,
        consecutive_failures: row.get(16)?,
    })
}

fn incident_from_row(row: &Row<'_>) -> SqlResult<Incident> {
    let status: String = row.get(2)?;
    let severity: String = row.get(3)?;
    let started_at: String = row.get(5)?;
    let resolved_at: Option<String> = row.get(6)?;
    Ok(Incident {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        status: IncidentStatus::parse(&status).unwrap_or(IncidentStatus::Investigating),
        severity: IncidentSeverity::parse(&severity).unwrap_or(IncidentSeverity::Critical),
        created_by: row.get(4)?,
        started_at: parse_db_time(&started_at).unwrap_or_else(Utc::now),
        resolved_at: resolved_at.as_deref().and_then(parse_db_time),
    })
}

fn maintenance_from_row(row: &Row<'_>) -> SqlResult<MaintenanceWindow> {
    let status: String = row.get(2)?;
    let starts_at: String = row.get(3)?;
    let ends_at: String = row.get(4)?;
    Ok(MaintenanceWindow {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        status: MaintenanceStatus::parse(&status).unwrap_or(MaintenanceStatus::Scheduled),
        starts_at: parse_db_time(&starts_at).unwrap_or_else(Utc::now),
        ends_at: parse_db_time(&ends_at).unwrap_or_else(Utc::now),
    })
}

fn uptime_from_row(row: &Row<'_>) -> SqlResult<UptimeRecord> {
    let record_date: String = row.get(2)?;
    let status: String = row.get(3)?;
    Ok(UptimeRecord {
        id: row.get(0)?,
        entity_id: row.get(1)?,
        record_date: NaiveDate::parse_from_str(&record_date, DATE_FORMAT)
            .unwrap_or_else(|_| Utc::now().date_naive()),
        status: EntityStatus::parse(&status).unwrap_or(EntityStatus::Operational),
        uptime_percentage: row.get(4)?,
        total_minutes: row.get(5)?,
        operational_minutes: row.get(6)?,
        degraded_minutes: row.get(7)?,
        outage_minutes: row.get(8)?,
        maintenance_minutes: row.get(9)?,
        incident_count: row.get(10)?,
        maintenance_count: row.get(11)?,
    })
}

fn setting_from_row(row: &Row<'_>) -> SqlResult<Setting> {
    let updated_at: String = row.get(2)?;
    Ok(Setting {
        key: row.get(0)?,
        value: row.get(1)?,
        updated_at: parse_db_time(&updated_at).unwrap_or_else(Utc::now),
    })
}

/// Format a datetime for storage.
fn format_time(dt: DateTime<Utc>) -> String {
    dt.format(TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [TIME_FORMAT, "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}
