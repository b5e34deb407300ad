//! Entity enrollments: which services an entity subscribes to, and where.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use comply_core::{EntityId, JurisdictionCode, ServiceKey, Timestamp};

/// An entity's service subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub entity_id: EntityId,
    pub jurisdiction: JurisdictionCode,
    pub services: BTreeSet<ServiceKey>,
    /// Inactive entities are skipped by the tick.
    pub active: bool,
    pub updated_at: Timestamp,
}

/// Enrollments keyed by entity.
#[derive(Debug, Clone, Default)]
pub struct EnrollmentRegistry {
    inner: Arc<RwLock<BTreeMap<EntityId, Enrollment>>>,
}

impl EnrollmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the enrollment of `enrollment.entity_id`.
    pub fn upsert(&self, enrollment: Enrollment) -> Enrollment {
        self.inner
            .write()
            .insert(enrollment.entity_id.clone(), enrollment.clone());
        enrollment
    }

    pub fn get(&self, entity_id: &EntityId) -> Option<Enrollment> {
        self.inner.read().get(entity_id).cloned()
    }

    /// All enrollments, ordered by entity id.
    pub fn list(&self) -> Vec<Enrollment> {
        self.inner.read().values().cloned().collect()
    }

    pub fn active(&self) -> Vec<Enrollment> {
        self.inner
            .read()
            .values()
            .filter(|e| e.active)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enrollment(entity: &str, active: bool) -> Enrollment {
        Enrollment {
            entity_id: EntityId::new(entity).unwrap(),
            jurisdiction: JurisdictionCode::new("IN").unwrap(),
            services: [ServiceKey::new("gst-monthly").unwrap()].into_iter().collect(),
            active,
            updated_at: Timestamp::now(),
        }
    }

    #[test]
    fn upsert_replaces_and_active_filters() {
        let reg = EnrollmentRegistry::new();
        reg.upsert(enrollment("acme", true));
        reg.upsert(enrollment("globex", true));
        reg.upsert(enrollment("globex", false));
        assert_eq!(reg.list().len(), 2);
        let active: Vec<_> = reg.active().into_iter().map(|e| e.entity_id).collect();
        assert_eq!(active, vec![EntityId::new("acme").unwrap()]);
    }
}
