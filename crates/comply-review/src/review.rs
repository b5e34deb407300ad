//! # Quality Review
//!
//! A review is opened by a reviewer against an instance that is waiting
//! for review. Items move between pending, passed and failed until the
//! reviewer submits a disposition; after that the review is immutable.

use serde::{Deserialize, Serialize};

use comply_core::{EngineError, InstanceId, ReviewId, Timestamp, ValidationError};
use comply_state::{Disposition, ReviewOutcome};

use crate::checklist::{decide, score, ChecklistItem, ItemStatus};

/// A quality review bound to one obligation instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityReview {
    pub id: ReviewId,
    pub instance_id: InstanceId,
    pub reviewer_id: String,
    pub items: Vec<ChecklistItem>,
    /// Set when the review is submitted.
    pub score: Option<u8>,
    pub disposition: Option<Disposition>,
    pub instructions: Option<String>,
    pub opened_at: Timestamp,
    pub updated_at: Timestamp,
    pub decided_at: Option<Timestamp>,
    /// Bumped on every committed change; storage keeps the highest.
    #[serde(default)]
    pub revision: u64,
}

impl QualityReview {
    /// Open a review with the given checklist.
    pub fn open(
        instance_id: InstanceId,
        reviewer_id: impl Into<String>,
        items: Vec<ChecklistItem>,
    ) -> Result<Self, ValidationError> {
        if let Some(bad) = items.iter().find(|i| i.item.trim().is_empty()) {
            return Err(ValidationError::InvalidChecklist(format!(
                "item in category {:?} has no label",
                bad.category
            )));
        }
        let now = Timestamp::now();
        Ok(Self {
            id: ReviewId::new(),
            instance_id,
            reviewer_id: reviewer_id.into(),
            items,
            score: None,
            disposition: None,
            instructions: None,
            opened_at: now,
            updated_at: now,
            decided_at: None,
            revision: 1,
        })
    }

    pub fn is_open(&self) -> bool {
        self.disposition.is_none()
    }

    /// Running score over the current item statuses.
    pub fn current_score(&self) -> u8 {
        score(&self.items)
    }

    /// Update one item's status.
    pub fn set_item_status(&mut self, index: usize, status: ItemStatus) -> Result<&ChecklistItem, EngineError> {
        self.require_open()?;
        let item = self
            .items
            .get_mut(index)
            .ok_or_else(|| EngineError::not_found("checklist item", index))?;
        item.status = status;
        self.updated_at = Timestamp::now();
        Ok(item)
    }

    /// Decide the review. On success the review is closed and the returned
    /// outcome is ready for the obligation instance.
    pub fn submit(
        &mut self,
        requested: Disposition,
        instructions: Option<String>,
    ) -> Result<ReviewOutcome, EngineError> {
        self.require_open()?;
        let disposition = decide(&self.items, requested)?;
        let score = score(&self.items);
        let instructions = instructions.filter(|text| !text.trim().is_empty());
        let now = Timestamp::now();

        self.score = Some(score);
        self.disposition = Some(disposition);
        self.instructions = instructions.clone();
        self.decided_at = Some(now);
        self.updated_at = now;

        Ok(ReviewOutcome {
            review_id: self.id,
            disposition,
            score,
            instructions,
        })
    }

    fn require_open(&self) -> Result<(), EngineError> {
        match self.disposition {
            None => Ok(()),
            Some(d) => Err(EngineError::Conflict(format!(
                "review {} already decided as {d}",
                self.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comply_workflow::ChecklistSeed;

    fn items() -> Vec<ChecklistItem> {
        [("Totals reconcile", true, 6), ("Cover note", false, 4)]
            .iter()
            .map(|(label, mandatory, weight)| {
                ChecklistItem::from_seed(&ChecklistSeed {
                    category: "accuracy".into(),
                    item: label.to_string(),
                    is_mandatory: *mandatory,
                    weight: *weight,
                })
            })
            .collect()
    }

    fn review() -> QualityReview {
        QualityReview::open(InstanceId::new(), "rev-1", items()).unwrap()
    }

    #[test]
    fn open_rejects_unlabelled_items() {
        let mut bad = items();
        bad[0].item = " ".into();
        assert!(QualityReview::open(InstanceId::new(), "rev-1", bad).is_err());
    }

    #[test]
    fn seeded_items_start_pending() {
        let r = review();
        assert!(r.items.iter().all(|i| i.status == ItemStatus::Pending));
        assert_eq!(r.current_score(), 0);
        assert!(r.is_open());
    }

    #[test]
    fn approval_blocked_then_allowed() {
        let mut r = review();
        r.set_item_status(0, ItemStatus::Failed).unwrap();
        r.set_item_status(1, ItemStatus::Passed).unwrap();
        let err = r.submit(Disposition::Approved, None).unwrap_err();
        assert!(matches!(err, EngineError::ApprovalBlocked { .. }));
        assert!(r.is_open());

        r.set_item_status(0, ItemStatus::Passed).unwrap();
        let outcome = r.submit(Disposition::Approved, None).unwrap();
        assert_eq!(outcome.score, 100);
        assert_eq!(outcome.review_id, r.id);
        assert!(!r.is_open());
    }

    #[test]
    fn rework_carries_instructions() {
        let mut r = review();
        r.set_item_status(0, ItemStatus::Failed).unwrap();
        let outcome = r
            .submit(Disposition::ReworkRequired, Some("Reconcile GSTR-2B".into()))
            .unwrap();
        assert_eq!(outcome.disposition, Disposition::ReworkRequired);
        assert_eq!(outcome.instructions.as_deref(), Some("Reconcile GSTR-2B"));
        assert_eq!(outcome.score, 0);
    }

    #[test]
    fn decided_review_is_immutable() {
        let mut r = review();
        r.submit(Disposition::Rejected, None).unwrap();
        assert!(matches!(
            r.set_item_status(0, ItemStatus::Passed),
            Err(EngineError::Conflict(_))
        ));
        assert!(matches!(
            r.submit(Disposition::Approved, None),
            Err(EngineError::Conflict(_))
        ));
    }

    #[test]
    fn item_index_out_of_range() {
        let mut r = review();
        assert!(matches!(
            r.set_item_status(9, ItemStatus::Passed),
            Err(EngineError::NotFound { .. })
        ));
    }
}
