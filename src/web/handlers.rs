//! HTTP request handlers for the operator API.

use super::AppState;
use crate::db::{Entity, EntityKind, EntityStatus};
use crate::scheduler::{self, UptimeError};
use crate::settings;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// API: Manual triggers
// ============================================================================

pub async fn handle_trigger_all(State(state): State<AppState>) -> impl IntoResponse {
    match state.scheduler.trigger_all().await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_trigger_entity(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.scheduler.trigger_entity(id).await {
        Ok(Some(result)) => Json(result).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            "Entity not found or has no enabled check",
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// API: Consolidated check status
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    pub platform_id: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct CheckStatusItem {
    pub id: i64,
    pub kind: EntityKind,
    pub parent_id: Option<i64>,
    pub name: String,
    pub status: EntityStatus,
    pub check_enabled: bool,
    pub check_type: String,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_check_success: Option<bool>,
    pub last_check_message: String,
    pub consecutive_failures: i64,
}

pub async fn handle_check_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> impl IntoResponse {
    let status_filter = match query.status.as_deref() {
        Some(s) => match EntityStatus::parse(s) {
            Some(parsed) => Some(parsed),
            None => return (StatusCode::BAD_REQUEST, "Invalid status filter").into_response(),
        },
        None => None,
    };

    let entities = match state.store.get_entities() {
        Ok(e) => e,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    let parents: HashMap<i64, Option<i64>> =
        entities.iter().map(|e| (e.id, e.parent_id)).collect();

    let items: Vec<CheckStatusItem> = entities
        .iter()
        .filter(|e| matches!(e.kind, EntityKind::App | EntityKind::Component))
        .filter(|e| match query.platform_id {
            Some(platform_id) => platform_of(e, &parents) == Some(platform_id),
            None => true,
        })
        .filter(|e| status_filter.map_or(true, |s| e.status == s))
        .filter(|e| query.enabled.map_or(true, |flag| e.check.enabled == flag))
        .map(|e| CheckStatusItem {
            id: e.id,
            kind: e.kind,
            parent_id: e.parent_id,
            name: e.name.clone(),
            status: e.status,
            check_enabled: e.check.enabled,
            check_type: e.check.check_type.as_str().to_string(),
            last_check_at: e.last_check_at,
            last_check_success: e.last_check_success,
            last_check_message: e.last_check_message.clone(),
            consecutive_failures: e.consecutive_failures,
        })
        .collect();

    Json(items).into_response()
}

/// Walk up to the platform an app or component hangs off.
fn platform_of(entity: &Entity, parents: &HashMap<i64, Option<i64>>) -> Option<i64> {
    match entity.kind {
        EntityKind::Platform => Some(entity.id),
        EntityKind::App => entity.parent_id,
        EntityKind::Component => entity
            .parent_id
            .and_then(|app_id| parents.get(&app_id).copied().flatten()),
    }
}

// ============================================================================
// API: Uptime aggregation
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct BackfillRequest {
    pub days: i64,
}

#[derive(Debug, Serialize)]
pub struct BackfillResponse {
    pub days_processed: i64,
}

pub async fn handle_backfill(
    State(state): State<AppState>,
    Json(req): Json<BackfillRequest>,
) -> impl IntoResponse {
    match scheduler::backfill_uptime_history(
        &state.store,
        state.config.degraded_weight,
        req.days,
        Utc::now(),
    ) {
        Ok(days_processed) => Json(BackfillResponse { days_processed }).into_response(),
        Err(e) => uptime_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct RecomputeRequest {
    pub date: NaiveDate,
    #[serde(default)]
    pub entity_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct RecomputeResponse {
    pub date: NaiveDate,
    pub entities_computed: usize,
}

pub async fn handle_recompute(
    State(state): State<AppState>,
    Json(req): Json<RecomputeRequest>,
) -> impl IntoResponse {
    let now = Utc::now();
    match req.entity_id {
        Some(entity_id) => match scheduler::calculate_uptime_for_date(
            &state.store,
            state.config.degraded_weight,
            entity_id,
            req.date,
            now,
        ) {
            Ok(record) => Json(record).into_response(),
            Err(e) => uptime_error_response(e),
        },
        None => match scheduler::calculate_for_all_entities(
            &state.store,
            state.config.degraded_weight,
            req.date,
            now,
        ) {
            Ok(entities_computed) => Json(RecomputeResponse {
                date: req.date,
                entities_computed,
            })
            .into_response(),
            Err(e) => uptime_error_response(e),
        },
    }
}

pub async fn handle_daily(State(state): State<AppState>) -> impl IntoResponse {
    let now = Utc::now();
    match scheduler::run_daily(&state.store, state.config.degraded_weight, now) {
        Ok(entities_computed) => Json(RecomputeResponse {
            date: now.date_naive() - chrono::Duration::days(1),
            entities_computed,
        })
        .into_response(),
        Err(e) => uptime_error_response(e),
    }
}

fn uptime_error_response(e: UptimeError) -> axum::response::Response {
    match e {
        UptimeError::DateNotElapsed | UptimeError::InvalidBackfillRange => {
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        UptimeError::Db(db) => (StatusCode::INTERNAL_SERVER_ERROR, db.to_string()).into_response(),
    }
}

// ============================================================================
// API: Settings
// ============================================================================

pub async fn handle_get_settings(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_settings() {
        Ok(settings) => Json(settings).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_update_settings(
    State(state): State<AppState>,
    Json(updates): Json<HashMap<String, serde_json::Value>>,
) -> impl IntoResponse {
    for key in updates.keys() {
        if !settings::is_recognized_key(key) {
            return (
                StatusCode::BAD_REQUEST,
                format!("Unrecognized setting key: {}", key),
            )
                .into_response();
        }
    }

    for (key, value) in &updates {
        let value = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if let Err(e) = state.store.set_setting(key, &value) {
            return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
        }
    }

    match state.store.get_settings() {
        Ok(settings) => Json(settings).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
