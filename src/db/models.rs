//! Domain model types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Marker used in `created_by` for incidents opened by the engine itself.
pub const SYSTEM_CREATED_BY: &str = "system";

/// Kind of monitored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Platform,
    App,
    Component,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Platform => "platform",
            EntityKind::App => "app",
            EntityKind::Component => "component",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "platform" => Some(EntityKind::Platform),
            "app" => Some(EntityKind::App),
            "component" => Some(EntityKind::Component),
            _ => None,
        }
    }
}

/// Operational status of a monitored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityStatus {
    Operational,
    Degraded,
    PartialOutage,
    MajorOutage,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Operational => "OPERATIONAL",
            EntityStatus::Degraded => "DEGRADED",
            EntityStatus::PartialOutage => "PARTIAL_OUTAGE",
            EntityStatus::MajorOutage => "MAJOR_OUTAGE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPERATIONAL" => Some(EntityStatus::Operational),
            "DEGRADED" => Some(EntityStatus::Degraded),
            "PARTIAL_OUTAGE" => Some(EntityStatus::PartialOutage),
            "MAJOR_OUTAGE" => Some(EntityStatus::MajorOutage),
            _ => None,
        }
    }
}

/// Probe protocol for an entity's check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckType {
    None,
    Ping,
    HttpGet,
    TcpPort,
    ServiceHealth,
}

impl CheckType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckType::None => "NONE",
            CheckType::Ping => "PING",
            CheckType::HttpGet => "HTTP_GET",
            CheckType::TcpPort => "TCP_PORT",
            CheckType::ServiceHealth => "SERVICE_HEALTH",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NONE" => Some(CheckType::None),
            "PING" => Some(CheckType::Ping),
            "HTTP_GET" => Some(CheckType::HttpGet),
            "TCP_PORT" => Some(CheckType::TcpPort),
            "SERVICE_HEALTH" => Some(CheckType::ServiceHealth),
            _ => None,
        }
    }
}

/// Check configuration embedded in an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConfig {
    pub enabled: bool,
    pub check_type: CheckType,
    pub target: String,
    pub interval_seconds: i64,
    pub timeout_seconds: i64,
    pub expected_status: u16,
    pub failure_threshold: i64,
    /// Components only: resolve the effective config from the parent app.
    pub inherit_from_parent: bool,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_type: CheckType::None,
            target: String::new(),
            interval_seconds: 0,
            timeout_seconds: 0,
            expected_status: 200,
            failure_threshold: 3,
            inherit_from_parent: false,
        }
    }
}

/// A monitored entity: platform, app, or component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub kind: EntityKind,
    pub parent_id: Option<i64>,
    pub name: String,
    pub status: EntityStatus,
    pub check: CheckConfig,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_check_success: Option<bool>,
    pub last_check_message: String,
    pub consecutive_failures: i64,
}

impl Default for Entity {
    fn default() -> Self {
        Self {
            id: 0,
            kind: EntityKind::App,
            parent_id: None,
            name: String::new(),
            status: EntityStatus::Operational,
            check: CheckConfig::default(),
            last_check_at: None,
            last_check_success: None,
            last_check_message: String::new(),
            consecutive_failures: 0,
        }
    }
}

/// Incident lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStatus {
    Investigating,
    Identified,
    Monitoring,
    Resolved,
}

impl IncidentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Investigating => "INVESTIGATING",
            IncidentStatus::Identified => "IDENTIFIED",
            IncidentStatus::Monitoring => "MONITORING",
            IncidentStatus::Resolved => "RESOLVED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INVESTIGATING" => Some(IncidentStatus::Investigating),
            "IDENTIFIED" => Some(IncidentStatus::Identified),
            "MONITORING" => Some(IncidentStatus::Monitoring),
            "RESOLVED" => Some(IncidentStatus::Resolved),
            _ => None,
        }
    }
}

/// Incident severity. CRITICAL and MAJOR count as outage time in uptime
/// aggregation; MINOR counts as degraded time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentSeverity {
    Critical,
    Major,
    Minor,
}

impl IncidentSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentSeverity::Critical => "CRITICAL",
            IncidentSeverity::Major => "MAJOR",
            IncidentSeverity::Minor => "MINOR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "CRITICAL" => Some(IncidentSeverity::Critical),
            "MAJOR" => Some(IncidentSeverity::Major),
            "MINOR" => Some(IncidentSeverity::Minor),
            _ => None,
        }
    }

    pub fn is_outage(&self) -> bool {
        matches!(self, IncidentSeverity::Critical | IncidentSeverity::Major)
    }
}

/// An incident affecting a monitored entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: i64,
    pub entity_id: i64,
    pub status: IncidentStatus,
    pub severity: IncidentSeverity,
    pub created_by: String,
    pub started_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Incident {
    /// True for unresolved incidents opened by the engine.
    pub fn is_open_system_incident(&self) -> bool {
        self.created_by == SYSTEM_CREATED_BY && self.resolved_at.is_none()
    }
}

/// Scheduled maintenance lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaintenanceStatus {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl MaintenanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaintenanceStatus::Scheduled => "SCHEDULED",
            MaintenanceStatus::InProgress => "IN_PROGRESS",
            MaintenanceStatus::Completed => "COMPLETED",
            MaintenanceStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SCHEDULED" => Some(MaintenanceStatus::Scheduled),
            "IN_PROGRESS" => Some(MaintenanceStatus::InProgress),
            "COMPLETED" => Some(MaintenanceStatus::Completed),
            "CANCELLED" => Some(MaintenanceStatus::Cancelled),
            _ => None,
        }
    }
}

/// A maintenance window on an app.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub id: i64,
    pub entity_id: i64,
    pub status: MaintenanceStatus,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

/// Daily uptime summary for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UptimeRecord {
    pub id: i64,
    pub entity_id: i64,
    pub record_date: NaiveDate,
    pub status: EntityStatus,
    pub uptime_percentage: f64,
    pub total_minutes: i64,
    pub operational_minutes: i64,
    pub degraded_minutes: i64,
    pub outage_minutes: i64,
    pub maintenance_minutes: i64,
    pub incident_count: i64,
    pub maintenance_count: i64,
}

/// A runtime-adjustable configuration entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}
