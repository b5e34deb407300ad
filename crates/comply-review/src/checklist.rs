//! Checklist items, scoring and the approval decision.

use serde::{Deserialize, Serialize};

use comply_core::EngineError;
use comply_state::Disposition;
use comply_workflow::ChecklistSeed;

/// Evaluation state of one checklist item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Pending,
    Passed,
    Failed,
}

/// One line of a quality checklist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub category: String,
    pub item: String,
    #[serde(default)]
    pub status: ItemStatus,
    #[serde(default)]
    pub is_mandatory: bool,
    pub weight: u32,
}

impl ChecklistItem {
    /// A pending item seeded from a template checklist entry.
    pub fn from_seed(seed: &ChecklistSeed) -> Self {
        Self {
            category: seed.category.clone(),
            item: seed.item.clone(),
            status: ItemStatus::Pending,
            is_mandatory: seed.is_mandatory,
            weight: seed.weight,
        }
    }

    fn blocks_approval(&self) -> bool {
        self.is_mandatory && self.status == ItemStatus::Failed
    }
}

/// Share of weight carried by passed items, as a percentage rounded half up.
///
/// An empty checklist, or one whose weights sum to zero, scores 0.
pub fn score(items: &[ChecklistItem]) -> u8 {
    let total: u64 = items.iter().map(|i| u64::from(i.weight)).sum();
    if total == 0 {
        return 0;
    }
    let passed: u64 = items
        .iter()
        .filter(|i| i.status == ItemStatus::Passed)
        .map(|i| u64::from(i.weight))
        .sum();
    // round(passed / total * 100) with halves rounding up
    let pct = (passed * 200 + total) / (total * 2);
    u8::try_from(pct.min(100)).unwrap_or(100)
}

/// Validate the requested disposition against the checklist.
///
/// `approved` is refused while any mandatory item has failed; the error
/// names the failed items. `rejected` and `rework_required` always pass.
pub fn decide(items: &[ChecklistItem], requested: Disposition) -> Result<Disposition, EngineError> {
    if requested == Disposition::Approved {
        let failed: Vec<String> = items
            .iter()
            .filter(|i| i.blocks_approval())
            .map(|i| i.item.clone())
            .collect();
        if !failed.is_empty() {
            return Err(EngineError::ApprovalBlocked { failed });
        }
    }
    Ok(requested)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(weight: u32, status: ItemStatus, mandatory: bool) -> ChecklistItem {
        ChecklistItem {
            category: "accuracy".into(),
            item: format!("item-{weight}-{status:?}"),
            status,
            is_mandatory: mandatory,
            weight,
        }
    }

    #[test]
    fn empty_checklist_scores_zero() {
        assert_eq!(score(&[]), 0);
        assert_eq!(score(&[item(0, ItemStatus::Passed, false)]), 0);
    }

    #[test]
    fn weighted_scores() {
        assert_eq!(score(&[item(10, ItemStatus::Passed, false)]), 100);
        assert_eq!(
            score(&[item(10, ItemStatus::Passed, false), item(10, ItemStatus::Failed, false)]),
            50
        );
        assert_eq!(
            score(&[item(1, ItemStatus::Passed, false), item(2, ItemStatus::Pending, false)]),
            33
        );
        assert_eq!(
            score(&[item(2, ItemStatus::Passed, false), item(1, ItemStatus::Failed, false)]),
            67
        );
    }

    #[test]
    fn halves_round_up() {
        // 1/8 = 12.5%
        let items = vec![
            item(1, ItemStatus::Passed, false),
            item(7, ItemStatus::Failed, false),
        ];
        assert_eq!(score(&items), 13);
    }

    #[test]
    fn failed_mandatory_blocks_approval_only() {
        let mut items = vec![
            item(5, ItemStatus::Passed, true),
            item(5, ItemStatus::Failed, true),
            item(5, ItemStatus::Failed, false),
        ];
        items[1].item = "Totals reconcile".into();
        let err = decide(&items, Disposition::Approved).unwrap_err();
        assert_eq!(
            err,
            EngineError::ApprovalBlocked {
                failed: vec!["Totals reconcile".into()]
            }
        );
        assert_eq!(decide(&items, Disposition::Rejected).unwrap(), Disposition::Rejected);
        assert_eq!(
            decide(&items, Disposition::ReworkRequired).unwrap(),
            Disposition::ReworkRequired
        );
    }

    #[test]
    fn pending_mandatory_does_not_block() {
        let items = vec![item(5, ItemStatus::Pending, true)];
        assert_eq!(decide(&items, Disposition::Approved).unwrap(), Disposition::Approved);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn any_item() -> impl Strategy<Value = ChecklistItem> {
            (
                0u32..100,
                prop_oneof![
                    Just(ItemStatus::Pending),
                    Just(ItemStatus::Passed),
                    Just(ItemStatus::Failed)
                ],
                any::<bool>(),
            )
                .prop_map(|(w, s, m)| item(w, s, m))
        }

        proptest! {
            #[test]
            fn score_is_a_percentage(items in proptest::collection::vec(any_item(), 0..20)) {
                prop_assert!(score(&items) <= 100);
            }

            #[test]
            fn never_approves_with_failed_mandatory(
                items in proptest::collection::vec(any_item(), 0..20),
            ) {
                let blocked = items
                    .iter()
                    .any(|i| i.is_mandatory && i.status == ItemStatus::Failed);
                let decision = decide(&items, Disposition::Approved);
                prop_assert_eq!(decision.is_err(), blocked);
            }
        }
    }
}
