//! # Rule Store
//!
//! Owns service definitions, doc types and due-date rules.
//!
//! Rules form a series per (service, jurisdiction). Within a series,
//! `effective_from` is strictly increasing; the rule governing a date is
//! the active rule with the greatest `effective_from` not after it. The
//! ordering check and the insert happen under one write lock, so two
//! concurrent `add_rule` calls cannot both slip in with the same date.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use comply_core::{EngineError, JurisdictionCode, RuleId, ServiceKey, Timestamp, ValidationError};

use crate::catalog::{DocType, ServiceDefinition, ServiceUpdate};
use crate::payload::RulePayload;

/// A due-date rule in a (service, jurisdiction) series.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueDateRule {
    pub id: RuleId,
    pub service_key: ServiceKey,
    pub jurisdiction: JurisdictionCode,
    /// First date this rule governs.
    pub effective_from: NaiveDate,
    pub payload: RulePayload,
    /// Inactive rules are skipped during resolution.
    pub active: bool,
    pub created_at: Timestamp,
}

type SeriesKey = (ServiceKey, JurisdictionCode);

#[derive(Debug, Default)]
struct Inner {
    services: BTreeMap<ServiceKey, ServiceDefinition>,
    doc_types: BTreeMap<ServiceKey, Vec<DocType>>,
    rules: HashMap<RuleId, DueDateRule>,
    /// Rule ids per series, ordered by `effective_from`.
    series: HashMap<SeriesKey, Vec<RuleId>>,
}

/// Thread-safe, cloneable rule store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct RuleStore {
    inner: Arc<RwLock<Inner>>,
}

impl RuleStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Services ────────────────────────────────────────────────────

    /// Register a new service. Keys are unique forever.
    pub fn register_service(
        &self,
        def: ServiceDefinition,
    ) -> Result<ServiceDefinition, ValidationError> {
        let mut inner = self.inner.write();
        if inner.services.contains_key(&def.service_key) {
            return Err(ValidationError::Duplicate {
                kind: "service",
                key: def.service_key.to_string(),
            });
        }
        inner.services.insert(def.service_key.clone(), def.clone());
        Ok(def)
    }

    /// Update a service's mutable metadata.
    pub fn update_service(
        &self,
        key: &ServiceKey,
        update: ServiceUpdate,
    ) -> Result<ServiceDefinition, EngineError> {
        let mut inner = self.inner.write();
        let def = inner
            .services
            .get_mut(key)
            .ok_or_else(|| EngineError::not_found("service", key))?;
        update.apply(def)?;
        Ok(def.clone())
    }

    /// Deactivate a service. Services are never deleted.
    pub fn deactivate_service(&self, key: &ServiceKey) -> Result<ServiceDefinition, EngineError> {
        self.update_service(
            key,
            ServiceUpdate {
                active: Some(false),
                ..Default::default()
            },
        )
    }

    /// Undo a registration that could not be stored.
    ///
    /// Refused (returns `false`) once doc types or rules hang off the
    /// service.
    pub fn withdraw_service(&self, key: &ServiceKey) -> bool {
        let mut inner = self.inner.write();
        let in_use = inner.doc_types.get(key).map_or(false, |d| !d.is_empty())
            || inner.series.keys().any(|(service, _)| service == key);
        if in_use {
            return false;
        }
        inner.doc_types.remove(key);
        inner.services.remove(key).is_some()
    }

    pub fn service(&self, key: &ServiceKey) -> Option<ServiceDefinition> {
        self.inner.read().services.get(key).cloned()
    }

    /// All services ordered by key.
    pub fn services(&self) -> Vec<ServiceDefinition> {
        self.inner.read().services.values().cloned().collect()
    }

    // ── Doc types ───────────────────────────────────────────────────

    /// Add a doc type to a registered service.
    pub fn add_doc_type(&self, doc: DocType) -> Result<DocType, ValidationError> {
        let mut inner = self.inner.write();
        if !inner.services.contains_key(&doc.service_key) {
            return Err(ValidationError::UnknownService(doc.service_key.to_string()));
        }
        let docs = inner.doc_types.entry(doc.service_key.clone()).or_default();
        if docs.iter().any(|d| d.doc_code == doc.doc_code) {
            return Err(ValidationError::Duplicate {
                kind: "doc type",
                key: format!("{}/{}", doc.service_key, doc.doc_code),
            });
        }
        docs.push(doc.clone());
        Ok(doc)
    }

    /// Undo a doc type declaration that could not be stored.
    pub fn withdraw_doc_type(&self, key: &ServiceKey, doc_code: &str) -> bool {
        let mut inner = self.inner.write();
        let Some(docs) = inner.doc_types.get_mut(key) else {
            return false;
        };
        let before = docs.len();
        docs.retain(|d| d.doc_code != doc_code);
        docs.len() != before
    }

    /// Doc types of a service in insertion order.
    pub fn doc_types_for(&self, key: &ServiceKey) -> Vec<DocType> {
        self.inner
            .read()
            .doc_types
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn doc_type(&self, key: &ServiceKey, doc_code: &str) -> Option<DocType> {
        self.inner
            .read()
            .doc_types
            .get(key)
            .and_then(|docs| docs.iter().find(|d| d.doc_code == doc_code).cloned())
    }

    // ── Rules ───────────────────────────────────────────────────────

    /// Append a rule to the (service, jurisdiction) series.
    ///
    /// Fails with a validation error when the service is unknown or when
    /// `effective_from` is not strictly after the latest rule in the series.
    /// Payload ranges were already validated when `payload` was built.
    pub fn add_rule(
        &self,
        service_key: ServiceKey,
        jurisdiction: JurisdictionCode,
        payload: RulePayload,
        effective_from: NaiveDate,
    ) -> Result<DueDateRule, ValidationError> {
        let rule = DueDateRule {
            id: RuleId::new(),
            service_key,
            jurisdiction,
            effective_from,
            payload,
            active: true,
            created_at: Timestamp::now(),
        };

        let mut inner = self.inner.write();
        if !inner.services.contains_key(&rule.service_key) {
            return Err(ValidationError::UnknownService(rule.service_key.to_string()));
        }
        let key = (rule.service_key.clone(), rule.jurisdiction.clone());
        if let Some(previous) = inner
            .series
            .get(&key)
            .and_then(|ids| ids.last())
            .and_then(|id| inner.rules.get(id))
        {
            if rule.effective_from <= previous.effective_from {
                return Err(ValidationError::EffectiveFromNotIncreasing {
                    previous: previous.effective_from,
                    given: rule.effective_from,
                });
            }
        }
        inner.series.entry(key).or_default().push(rule.id);
        inner.rules.insert(rule.id, rule.clone());
        Ok(rule)
    }

    /// Re-insert a previously persisted rule, keeping its id and flags.
    ///
    /// Used when hydrating from storage; rules may arrive in any order but
    /// their series must still have distinct `effective_from` dates.
    pub fn restore_rule(&self, rule: DueDateRule) -> Result<(), ValidationError> {
        let mut inner = self.inner.write();
        let key = (rule.service_key.clone(), rule.jurisdiction.clone());
        let ids = inner.series.get(&key).cloned().unwrap_or_default();
        let dates: Vec<NaiveDate> = ids
            .iter()
            .filter_map(|id| inner.rules.get(id).map(|r| r.effective_from))
            .collect();
        let pos = match dates.binary_search(&rule.effective_from) {
            Ok(_) => {
                return Err(ValidationError::Duplicate {
                    kind: "rule effective date",
                    key: format!("{}/{}/{}", rule.service_key, rule.jurisdiction, rule.effective_from),
                })
            }
            Err(pos) => pos,
        };
        let mut ids = ids;
        ids.insert(pos, rule.id);
        inner.series.insert(key, ids);
        inner.rules.insert(rule.id, rule);
        Ok(())
    }

    /// Undo an `add_rule` that could not be stored. The remaining series
    /// stays strictly increasing.
    pub fn withdraw_rule(&self, id: &RuleId) -> bool {
        let mut inner = self.inner.write();
        let Some(rule) = inner.rules.remove(id) else {
            return false;
        };
        let key = (rule.service_key, rule.jurisdiction);
        if let Some(ids) = inner.series.get_mut(&key) {
            ids.retain(|other| other != id);
            if ids.is_empty() {
                inner.series.remove(&key);
            }
        }
        true
    }

    /// Deactivate a rule; the previous rule in its series governs again.
    pub fn deactivate_rule(&self, id: &RuleId) -> Result<DueDateRule, EngineError> {
        let mut inner = self.inner.write();
        let rule = inner
            .rules
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found("rule", id))?;
        rule.active = false;
        Ok(rule.clone())
    }

    pub fn rule(&self, id: &RuleId) -> Option<DueDateRule> {
        self.inner.read().rules.get(id).cloned()
    }

    /// The full series for (service, jurisdiction), oldest first.
    pub fn rules_for(&self, service_key: &ServiceKey, jurisdiction: &JurisdictionCode) -> Vec<DueDateRule> {
        let inner = self.inner.read();
        inner
            .series
            .get(&(service_key.clone(), jurisdiction.clone()))
            .map(|ids| ids.iter().filter_map(|id| inner.rules.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Every rule, ordered by service, jurisdiction and effective date.
    pub fn all_rules(&self) -> Vec<DueDateRule> {
        let mut rules: Vec<DueDateRule> = self.inner.read().rules.values().cloned().collect();
        rules.sort_by(|a, b| {
            (&a.service_key, &a.jurisdiction, a.effective_from)
                .cmp(&(&b.service_key, &b.jurisdiction, b.effective_from))
        });
        rules
    }

    /// The active rule with the greatest `effective_from` not after `as_of`.
    ///
    /// `NoRuleFound` means "not yet schedulable": either no series exists or
    /// every rule in it starts later than `as_of`.
    pub fn resolve_active_rule(
        &self,
        service_key: &ServiceKey,
        jurisdiction: &JurisdictionCode,
        as_of: NaiveDate,
    ) -> Result<DueDateRule, EngineError> {
        let inner = self.inner.read();
        inner
            .series
            .get(&(service_key.clone(), jurisdiction.clone()))
            .and_then(|ids| {
                ids.iter()
                    .rev()
                    .filter_map(|id| inner.rules.get(id))
                    .find(|rule| rule.active && rule.effective_from <= as_of)
                    .cloned()
            })
            .ok_or_else(|| EngineError::NoRuleFound {
                service_key: service_key.to_string(),
                jurisdiction: jurisdiction.to_string(),
                as_of,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DocTypeFlags;
    use crate::payload::{Nudges, RuleSchedule};
    use comply_core::Periodicity;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn key() -> ServiceKey {
        ServiceKey::new("gst-monthly").unwrap()
    }

    fn jur() -> JurisdictionCode {
        JurisdictionCode::new("IN-KA").unwrap()
    }

    fn monthly(due_day: u32) -> RulePayload {
        RulePayload {
            schedule: RuleSchedule::Monthly { due_day },
            nudges: Nudges::default(),
        }
    }

    fn store() -> RuleStore {
        let store = RuleStore::new();
        store
            .register_service(
                ServiceDefinition::new(key(), "GST Return", Periodicity::Monthly, "tax").unwrap(),
            )
            .unwrap();
        store
    }

    #[test]
    fn duplicate_service_rejected() {
        let store = store();
        let err = store
            .register_service(
                ServiceDefinition::new(key(), "Again", Periodicity::Monthly, "tax").unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, ValidationError::Duplicate { kind: "service", .. }));
    }

    #[test]
    fn deactivate_service_keeps_record() {
        let store = store();
        let def = store.deactivate_service(&key()).unwrap();
        assert!(!def.active);
        assert_eq!(store.services().len(), 1);
    }

    #[test]
    fn add_rule_requires_known_service() {
        let store = RuleStore::new();
        let err = store
            .add_rule(key(), jur(), monthly(20), date(2025, 1, 1))
            .unwrap_err();
        assert_eq!(err, ValidationError::UnknownService("gst-monthly".into()));
    }

    #[test]
    fn effective_from_must_strictly_increase() {
        let store = store();
        store.add_rule(key(), jur(), monthly(20), date(2025, 1, 1)).unwrap();
        let same = store
            .add_rule(key(), jur(), monthly(21), date(2025, 1, 1))
            .unwrap_err();
        assert!(matches!(same, ValidationError::EffectiveFromNotIncreasing { .. }));
        let earlier = store
            .add_rule(key(), jur(), monthly(21), date(2024, 6, 1))
            .unwrap_err();
        assert!(matches!(earlier, ValidationError::EffectiveFromNotIncreasing { .. }));
        store.add_rule(key(), jur(), monthly(22), date(2025, 7, 1)).unwrap();
        assert_eq!(store.rules_for(&key(), &jur()).len(), 2);
    }

    #[test]
    fn series_are_independent_per_jurisdiction() {
        let store = store();
        let other = JurisdictionCode::new("IN-MH").unwrap();
        store.add_rule(key(), jur(), monthly(20), date(2025, 1, 1)).unwrap();
        store.add_rule(key(), other.clone(), monthly(11), date(2024, 1, 1)).unwrap();
        let rule = store.resolve_active_rule(&key(), &other, date(2025, 3, 1)).unwrap();
        assert_eq!(rule.payload.schedule.due_day(), 11);
    }

    #[test]
    fn resolve_picks_latest_effective_not_after_date() {
        let store = store();
        store.add_rule(key(), jur(), monthly(20), date(2025, 1, 1)).unwrap();
        store.add_rule(key(), jur(), monthly(25), date(2025, 4, 1)).unwrap();

        let march = store.resolve_active_rule(&key(), &jur(), date(2025, 3, 31)).unwrap();
        assert_eq!(march.payload.schedule.due_day(), 20);
        let april = store.resolve_active_rule(&key(), &jur(), date(2025, 4, 1)).unwrap();
        assert_eq!(april.payload.schedule.due_day(), 25);

        let before = store
            .resolve_active_rule(&key(), &jur(), date(2024, 12, 31))
            .unwrap_err();
        assert!(matches!(before, EngineError::NoRuleFound { .. }));
        assert!(before.is_configuration_gap());
    }

    #[test]
    fn deactivated_rule_falls_back_to_previous() {
        let store = store();
        store.add_rule(key(), jur(), monthly(20), date(2025, 1, 1)).unwrap();
        let newer = store.add_rule(key(), jur(), monthly(25), date(2025, 4, 1)).unwrap();
        store.deactivate_rule(&newer.id).unwrap();
        let rule = store.resolve_active_rule(&key(), &jur(), date(2025, 5, 1)).unwrap();
        assert_eq!(rule.payload.schedule.due_day(), 20);
    }

    #[test]
    fn restore_rule_keeps_series_sorted() {
        let source = store();
        let a = source.add_rule(key(), jur(), monthly(20), date(2025, 1, 1)).unwrap();
        let b = source.add_rule(key(), jur(), monthly(25), date(2025, 4, 1)).unwrap();

        let restored = store();
        restored.restore_rule(b.clone()).unwrap();
        restored.restore_rule(a.clone()).unwrap();
        let series = restored.rules_for(&key(), &jur());
        assert_eq!(series, vec![a.clone(), b]);
        assert!(restored.restore_rule(a).is_err());
    }

    #[test]
    fn doc_types_unique_per_service() {
        let store = store();
        let doc = DocType::new(key(), "pan", "PAN card", DocTypeFlags::default(), None).unwrap();
        store.add_doc_type(doc.clone()).unwrap();
        assert!(store.add_doc_type(doc).is_err());
        assert!(store.doc_type(&key(), "pan").is_some());
        assert_eq!(store.doc_types_for(&key()).len(), 1);
    }

    #[test]
    fn withdrawn_rule_frees_its_effective_date() {
        let store = store();
        store.add_rule(key(), jur(), monthly(20), date(2025, 1, 1)).unwrap();
        let second = store.add_rule(key(), jur(), monthly(11), date(2026, 1, 1)).unwrap();

        assert!(store.withdraw_rule(&second.id));
        assert!(!store.withdraw_rule(&second.id));
        assert_eq!(store.rules_for(&key(), &jur()).len(), 1);
        assert_eq!(
            store.resolve_active_rule(&key(), &jur(), date(2026, 6, 1)).unwrap().payload,
            monthly(20)
        );
        // The same request can be replayed.
        store.add_rule(key(), jur(), monthly(11), date(2026, 1, 1)).unwrap();
    }

    #[test]
    fn withdrawn_registrations_can_be_replayed() {
        let store = store();
        let doc = DocType::new(key(), "pan", "PAN card", DocTypeFlags::default(), None).unwrap();
        store.add_doc_type(doc.clone()).unwrap();
        assert!(store.withdraw_doc_type(&key(), "pan"));
        store.add_doc_type(doc).unwrap();

        // A service with doc types attached stays.
        assert!(!store.withdraw_service(&key()));
        assert!(store.withdraw_doc_type(&key(), "pan"));
        assert!(store.withdraw_service(&key()));
        assert!(store.service(&key()).is_none());
        store
            .register_service(
                ServiceDefinition::new(key(), "GST Return", Periodicity::Monthly, "tax").unwrap(),
            )
            .unwrap();
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn resolution_returns_latest_effective_not_after(
                offsets in proptest::collection::btree_set(0i64..2000, 1..8),
                as_of_day in -100i64..2200,
            ) {
                let store = store();
                let base = date(2020, 1, 1);
                let dates: Vec<NaiveDate> = offsets
                    .iter()
                    .map(|o| base + chrono::Duration::days(*o))
                    .collect();
                for (i, d) in dates.iter().enumerate() {
                    store.add_rule(key(), jur(), monthly((i as u32 % 28) + 1), *d).unwrap();
                }

                let as_of = base + chrono::Duration::days(as_of_day);
                let expected = dates.iter().filter(|d| **d <= as_of).max();
                match (store.resolve_active_rule(&key(), &jur(), as_of), expected) {
                    (Ok(rule), Some(d)) => prop_assert_eq!(rule.effective_from, *d),
                    (Err(EngineError::NoRuleFound { .. }), None) => {}
                    (other, exp) => prop_assert!(false, "got {:?}, expected {:?}", other, exp),
                }
            }
        }
    }
}
