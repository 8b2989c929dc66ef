//! Entity check registry.
//!
//! Enumerates checkable entities and resolves the effective check
//! configuration, including component inheritance from the parent app.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

use crate::db::{CheckConfig, CheckType, DbError, Entity, EntityKind, Store};
use crate::probe::ProbeRequest;
use crate::settings::SettingsSnapshot;

/// An entity paired with the check configuration that actually governs it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub entity: Entity,
    pub effective: CheckConfig,
}

impl Candidate {
    pub fn probe_request(&self) -> ProbeRequest {
        ProbeRequest {
            check_type: self.effective.check_type,
            target: self.effective.target.clone(),
            timeout: Duration::from_secs(self.effective.timeout_seconds.max(1) as u64),
            expected_status: self.effective.expected_status,
        }
    }
}

/// Resolve the config governing an entity.
///
/// An inheriting component uses its parent app's config wholesale; its own
/// check fields are ignored. Returns None when the governing check is
/// disabled or has no type.
fn effective_config(
    entity: &Entity,
    parent: Option<&Entity>,
    settings: &SettingsSnapshot,
) -> Option<CheckConfig> {
    let source = if entity.kind == EntityKind::Component && entity.check.inherit_from_parent {
        &parent?.check
    } else {
        &entity.check
    };

    if !source.enabled || source.check_type == CheckType::None {
        return None;
    }

    let mut effective = source.clone();
    if effective.interval_seconds <= 0 {
        effective.interval_seconds = settings.default_interval_seconds;
    }
    if effective.timeout_seconds <= 0 {
        effective.timeout_seconds = settings.default_timeout_seconds;
    }
    Some(effective)
}

/// List every checkable entity with its resolved config.
pub fn list_all_candidates(
    store: &Store,
    settings: &SettingsSnapshot,
) -> Result<Vec<Candidate>, DbError> {
    let entities = store.get_entities()?;
    let by_id: HashMap<i64, &Entity> = entities.iter().map(|e| (e.id, e)).collect();

    let candidates = entities
        .iter()
        .filter_map(|entity| {
            let parent = entity.parent_id.and_then(|id| by_id.get(&id).copied());
            effective_config(entity, parent, settings).map(|effective| Candidate {
                entity: entity.clone(),
                effective,
            })
        })
        .collect();
    Ok(candidates)
}

/// List the candidates due for a probe at `now`.
///
/// Due test: never checked before, or the configured interval has elapsed
/// since the last check.
pub fn list_due_candidates(
    store: &Store,
    settings: &SettingsSnapshot,
    now: DateTime<Utc>,
) -> Result<Vec<Candidate>, DbError> {
    Ok(list_all_candidates(store, settings)?
        .into_iter()
        .filter(|c| is_due(c, now))
        .collect())
}

/// Resolve a single entity into a candidate, for manual triggers.
///
/// Returns None when the entity does not exist or has no effective check.
pub fn resolve_candidate(
    store: &Store,
    settings: &SettingsSnapshot,
    entity_id: i64,
) -> Result<Option<Candidate>, DbError> {
    let entity = match store.get_entity(entity_id) {
        Ok(e) => e,
        Err(DbError::NotFound) => return Ok(None),
        Err(e) => return Err(e),
    };

    let parent = match entity.parent_id {
        Some(parent_id) => match store.get_entity(parent_id) {
            Ok(p) => Some(p),
            Err(DbError::NotFound) => None,
            Err(e) => return Err(e),
        },
        None => None,
    };

    Ok(
        effective_config(&entity, parent.as_ref(), settings).map(|effective| Candidate {
            entity,
            effective,
        }),
    )
}

fn is_due(candidate: &Candidate, now: DateTime<Utc>) -> bool {
    match candidate.entity.last_check_at {
        None => true,
        Some(last) => now - last >= ChronoDuration::seconds(candidate.effective.interval_seconds),
    }
}
