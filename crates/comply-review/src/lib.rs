//! # comply-review — Quality Review Engine
//!
//! - **Checklist** (`checklist.rs`): checklist items, the weighted
//!   [`score`] and the [`decide`] approval gate. Both are pure.
//! - **Review** (`review.rs`): [`QualityReview`], one per submission of an
//!   obligation instance, from opening through the final disposition.
//!
//! ## Approval Gate
//!
//! A review can never end `approved` while a mandatory item is `failed`.
//! `decide` is the single place that rule lives; `QualityReview::submit`
//! goes through it.

pub mod checklist;
pub mod review;

pub use checklist::{decide, score, ChecklistItem, ItemStatus};
pub use review::QualityReview;
