//! Status transition engine.
//!
//! Consumes probe outcomes, maintains consecutive-failure counters, and
//! opens or resolves system incidents at the failure threshold.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::db::{
    DbError, EntityKind, EntityStatus, Incident, IncidentSeverity, IncidentStatus, Store,
    SYSTEM_CREATED_BY,
};
use crate::probe::Outcome;
use crate::registry::Candidate;

/// Apply one probe outcome to an entity's persisted state.
///
/// Callers serialize invocations per entity: each entity is dispatched at
/// most once per tick, and manual triggers coalesce with in-flight probes.
pub fn apply_outcome(
    store: &Store,
    candidate: &Candidate,
    outcome: &Outcome,
    now: DateTime<Utc>,
) -> Result<(), DbError> {
    if outcome.success {
        apply_success(store, candidate, outcome, now)
    } else {
        apply_failure(store, candidate, outcome, now)
    }
}

fn apply_success(
    store: &Store,
    candidate: &Candidate,
    outcome: &Outcome,
    now: DateTime<Utc>,
) -> Result<(), DbError> {
    let entity = &candidate.entity;
    store.record_check_result(entity.id, now, true, &outcome.message, 0)?;

    // Recovery applies only when the counter just reset from a nonzero value
    // and the outage was opened by us.
    if entity.consecutive_failures > 0 {
        if let Some(incident) = store.find_open_system_incident(entity.id)? {
            store.resolve_incident(incident.id, now)?;
            store.set_entity_status(entity.id, EntityStatus::Operational)?;
            info!(
                entity_id = entity.id,
                incident_id = incident.id,
                "Entity recovered, resolved system incident"
            );
        }
    }
    Ok(())
}

fn apply_failure(
    store: &Store,
    candidate: &Candidate,
    outcome: &Outcome,
    now: DateTime<Utc>,
) -> Result<(), DbError> {
    let entity = &candidate.entity;
    let failures = entity.consecutive_failures + 1;
    store.record_check_result(entity.id, now, false, &outcome.message, failures)?;

    // Edge-triggered: only the probe that reaches the threshold opens an
    // incident, and never a second one while ours is still open.
    if failures == candidate.effective.failure_threshold
        && store.find_open_system_incident(entity.id)?.is_none()
    {
        store.set_entity_status(entity.id, EntityStatus::MajorOutage)?;

        let mut incident = Incident {
            id: 0,
            entity_id: entity.id,
            status: IncidentStatus::Investigating,
            severity: IncidentSeverity::Critical,
            created_by: SYSTEM_CREATED_BY.to_string(),
            started_at: now,
            resolved_at: None,
        };
        let incident_id = store.create_incident(&mut incident)?;

        if entity.kind == EntityKind::App {
            for component in store.get_components_of(entity.id)? {
                store.link_incident_component(incident_id, component.id, EntityStatus::MajorOutage)?;
            }
        }

        info!(
            entity_id = entity.id,
            incident_id = incident_id,
            failures = failures,
            "Failure threshold reached, opened system incident"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CheckConfig, CheckType, Entity};
    use crate::registry::resolve_candidate;
    use crate::settings::SettingsSnapshot;
    use chrono::TimeZone;
    use tempfile::NamedTempFile;

    fn test_store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    fn checked_app(threshold: i64) -> Entity {
        Entity {
            kind: EntityKind::App,
            name: "API".to_string(),
            check: CheckConfig {
                enabled: true,
                check_type: CheckType::HttpGet,
                target: "https://api.example.com".to_string(),
                interval_seconds: 30,
                timeout_seconds: 5,
                failure_threshold: threshold,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn apply(store: &Store, id: i64, outcome: &Outcome, now: DateTime<Utc>) {
        let settings = SettingsSnapshot::default();
        let candidate = resolve_candidate(store, &settings, id).unwrap().unwrap();
        apply_outcome(store, &candidate, outcome, now).unwrap();
    }

    #[test]
    fn test_threshold_opens_exactly_one_incident() {
        let (_tmp, store) = test_store();
        let mut app = checked_app(3);
        let id = store.add_entity(&mut app).unwrap();
        let mut now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let down = Outcome::down("HTTP 500, expected 200");

        // Failures 1 and 2: counter moves, status untouched, no incident.
        for expected in 1..=2 {
            apply(&store, id, &down, now);
            now += chrono::Duration::seconds(30);
            let entity = store.get_entity(id).unwrap();
            assert_eq!(entity.consecutive_failures, expected);
            assert_eq!(entity.status, EntityStatus::Operational);
            assert!(store.find_open_system_incident(id).unwrap().is_none());
        }

        // Failure 3 hits the threshold.
        apply(&store, id, &down, now);
        let entity = store.get_entity(id).unwrap();
        assert_eq!(entity.consecutive_failures, 3);
        assert_eq!(entity.status, EntityStatus::MajorOutage);
        let incident = store.find_open_system_incident(id).unwrap().unwrap();
        assert_eq!(incident.created_by, SYSTEM_CREATED_BY);
        assert_eq!(incident.severity, IncidentSeverity::Critical);
        assert_eq!(incident.status, IncidentStatus::Investigating);
        assert!(incident.resolved_at.is_none());

        // Failure 4: idempotent, still the same single incident.
        now += chrono::Duration::seconds(30);
        apply(&store, id, &down, now);
        let still_open = store.find_open_system_incident(id).unwrap().unwrap();
        assert_eq!(still_open.id, incident.id);
        let day_start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let day_end = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        assert_eq!(
            store.get_incidents_in_range(id, day_start, day_end).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_recovery_resolves_incident() {
        let (_tmp, store) = test_store();
        let mut app = checked_app(2);
        let id = store.add_entity(&mut app).unwrap();
        let mut now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let down = Outcome::down("Error: connection timed out");

        apply(&store, id, &down, now);
        now += chrono::Duration::seconds(30);
        apply(&store, id, &down, now);
        assert_eq!(store.get_entity(id).unwrap().status, EntityStatus::MajorOutage);

        now += chrono::Duration::seconds(30);
        apply(&store, id, &Outcome::up("HTTP 200", 12), now);

        let entity = store.get_entity(id).unwrap();
        assert_eq!(entity.consecutive_failures, 0);
        assert_eq!(entity.status, EntityStatus::Operational);
        assert_eq!(entity.last_check_success, Some(true));
        assert!(store.find_open_system_incident(id).unwrap().is_none());
    }

    #[test]
    fn test_success_without_incident_is_plain_update() {
        let (_tmp, store) = test_store();
        let mut app = checked_app(3);
        let id = store.add_entity(&mut app).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        apply(&store, id, &Outcome::up("HTTP 200", 8), now);

        let entity = store.get_entity(id).unwrap();
        assert_eq!(entity.status, EntityStatus::Operational);
        assert_eq!(entity.last_check_message, "HTTP 200");
        assert_eq!(entity.last_check_at, Some(now));
    }

    #[test]
    fn test_app_incident_links_components() {
        let (_tmp, store) = test_store();
        let mut app = checked_app(1);
        let app_id = store.add_entity(&mut app).unwrap();
        let mut component = Entity {
            kind: EntityKind::Component,
            parent_id: Some(app_id),
            name: "worker".to_string(),
            ..Default::default()
        };
        let component_id = store.add_entity(&mut component).unwrap();

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        apply(&store, app_id, &Outcome::down("HTTP 502, expected 200"), now);

        // The component sees the incident through its link.
        let day_start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let day_end = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let linked = store
            .get_incidents_in_range(component_id, day_start, day_end)
            .unwrap();
        assert_eq!(linked.len(), 1);
    }

    #[test]
    fn test_human_incident_not_resolved_by_recovery() {
        let (_tmp, store) = test_store();
        let mut app = checked_app(2);
        let id = store.add_entity(&mut app).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        let mut human = Incident {
            id: 0,
            entity_id: id,
            status: IncidentStatus::Identified,
            severity: IncidentSeverity::Minor,
            created_by: "alice".to_string(),
            started_at: now,
            resolved_at: None,
        };
        store.create_incident(&mut human).unwrap();

        apply(&store, id, &Outcome::down("HTTP 500, expected 200"), now);
        apply(&store, id, &Outcome::up("HTTP 200", 5), now + chrono::Duration::seconds(30));

        // The operator's incident stays open; only system incidents resolve.
        let day_start = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let day_end = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let incidents = store.get_incidents_in_range(id, day_start, day_end).unwrap();
        assert_eq!(incidents.len(), 1);
        assert!(incidents[0].resolved_at.is_none());
    }
}
