//! # Instance Tracker Storage
//!
//! Arena of obligation instances and reviews keyed by id. Each record sits
//! behind its own `parking_lot::Mutex`, so operations on different instances
//! never contend. The (service, entity, period) index has its own lock and
//! is held for the whole get-or-create, which makes materialization
//! idempotent under concurrency.
//!
//! Updates run on a clone of the record and are committed only when the
//! closure succeeds; a rejected guard leaves the stored record untouched.
//! Every commit bumps the record's `revision`, which storage uses to drop
//! writes that arrive out of order.
//!
//! Lock order: index, then review, then instance, then the open-review map,
//! then the review arena. `open_review` holds an instance lock while it
//! inserts into the last two; `submit_review` takes a review lock before
//! its instance lock and releases both before touching the open-review map.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use comply_core::{EngineError, EntityId, InstanceId, Period, ReviewId, ServiceKey};
use comply_review::QualityReview;
use comply_state::ObligationInstance;

/// Upsert key of an obligation instance.
pub type InstanceKey = (ServiceKey, EntityId, Period);

type Shared<T> = Arc<Mutex<T>>;

#[derive(Debug, Default)]
pub struct ObligationTracker {
    instances: RwLock<HashMap<InstanceId, Shared<ObligationInstance>>>,
    index: Mutex<HashMap<InstanceKey, InstanceId>>,
    reviews: RwLock<HashMap<ReviewId, Shared<QualityReview>>>,
    /// At most one undecided review per instance.
    open_reviews: Mutex<HashMap<InstanceId, ReviewId>>,
}

impl ObligationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the instance for `key`, creating it with `create` if absent.
    ///
    /// The boolean is `true` when a new instance was created.
    pub fn get_or_create(
        &self,
        key: InstanceKey,
        create: impl FnOnce() -> Result<ObligationInstance, EngineError>,
    ) -> Result<(ObligationInstance, bool), EngineError> {
        let mut index = self.index.lock();
        if let Some(existing) = index.get(&key).and_then(|id| self.get(id)) {
            return Ok((existing, false));
        }
        let instance = create()?;
        index.insert(key, instance.id);
        self.instances
            .write()
            .insert(instance.id, Arc::new(Mutex::new(instance.clone())));
        Ok((instance, true))
    }

    /// Put back a persisted instance.
    pub fn restore(&self, instance: ObligationInstance) {
        let key = (
            instance.service_key.clone(),
            instance.entity_id.clone(),
            instance.period,
        );
        self.index.lock().insert(key, instance.id);
        self.instances
            .write()
            .insert(instance.id, Arc::new(Mutex::new(instance)));
    }

    pub fn get(&self, id: &InstanceId) -> Option<ObligationInstance> {
        let handle = self.instances.read().get(id).cloned()?;
        let instance = handle.lock().clone();
        Some(instance)
    }

    pub fn find(&self, key: &InstanceKey) -> Option<ObligationInstance> {
        let id = *self.index.lock().get(key)?;
        self.get(&id)
    }

    /// Snapshot of every instance, ordered by due date then id.
    pub fn list(&self) -> Vec<ObligationInstance> {
        let handles: Vec<Shared<ObligationInstance>> =
            self.instances.read().values().cloned().collect();
        let mut all: Vec<ObligationInstance> = handles.iter().map(|h| h.lock().clone()).collect();
        all.sort_by(|a, b| (a.due_date, a.id).cmp(&(b.due_date, b.id)));
        all
    }

    pub fn len(&self) -> usize {
        self.instances.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `f` to a clone of the instance and commit it on success.
    pub fn update<R>(
        &self,
        id: &InstanceId,
        f: impl FnOnce(&mut ObligationInstance) -> Result<R, EngineError>,
    ) -> Result<(R, ObligationInstance), EngineError> {
        let handle = self.instance_handle(id)?;
        let mut guard = handle.lock();
        let mut draft = guard.clone();
        let out = f(&mut draft)?;
        draft.revision = guard.revision + 1;
        *guard = draft.clone();
        Ok((out, draft))
    }

    pub(crate) fn instance_handle(&self, id: &InstanceId) -> Result<Shared<ObligationInstance>, EngineError> {
        self.instances
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("obligation", id))
    }

    // ── Reviews ─────────────────────────────────────────────────────

    /// Store a newly opened review, refusing a second open review for the
    /// same instance.
    pub fn insert_review(&self, review: QualityReview) -> Result<(), EngineError> {
        let mut open = self.open_reviews.lock();
        if let Some(existing) = open.get(&review.instance_id) {
            return Err(EngineError::Conflict(format!(
                "obligation {} already has open review {existing}",
                review.instance_id
            )));
        }
        open.insert(review.instance_id, review.id);
        self.reviews
            .write()
            .insert(review.id, Arc::new(Mutex::new(review)));
        Ok(())
    }

    /// Put back a persisted review.
    pub fn restore_review(&self, review: QualityReview) {
        if review.is_open() {
            self.open_reviews.lock().insert(review.instance_id, review.id);
        }
        self.reviews
            .write()
            .insert(review.id, Arc::new(Mutex::new(review)));
    }

    pub fn open_review_for(&self, instance_id: &InstanceId) -> Option<ReviewId> {
        self.open_reviews.lock().get(instance_id).copied()
    }

    pub(crate) fn release_open_review(&self, instance_id: &InstanceId, review_id: &ReviewId) {
        let mut open = self.open_reviews.lock();
        if open.get(instance_id) == Some(review_id) {
            open.remove(instance_id);
        }
    }

    pub fn review(&self, id: &ReviewId) -> Option<QualityReview> {
        let handle = self.reviews.read().get(id).cloned()?;
        let review = handle.lock().clone();
        Some(review)
    }

    /// Reviews of one instance, oldest first.
    pub fn reviews_for(&self, instance_id: &InstanceId) -> Vec<QualityReview> {
        let handles: Vec<Shared<QualityReview>> = self.reviews.read().values().cloned().collect();
        let mut reviews: Vec<QualityReview> = handles
            .iter()
            .map(|h| h.lock().clone())
            .filter(|r| r.instance_id == *instance_id)
            .collect();
        reviews.sort_by_key(|r| r.opened_at);
        reviews
    }

    pub(crate) fn review_handle(&self, id: &ReviewId) -> Result<Shared<QualityReview>, EngineError> {
        self.reviews
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("review", id))
    }
}
