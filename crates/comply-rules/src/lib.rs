//! # comply-rules — Rule Store and Obligation Scheduler
//!
//! Holds the timing authority of the engine.
//!
//! - **Payload** (`payload.rs`): the wire shape of a due-date rule and the
//!   tagged [`RuleSchedule`] it is validated into at ingestion. Nothing
//!   downstream ever sees an unvalidated payload.
//!
//! - **Catalog** (`catalog.rs`): service definitions and doc types.
//!
//! - **Store** (`store.rs`): the versioned rule series per
//!   (service, jurisdiction) with strictly increasing `effective_from`, and
//!   resolution of the governing rule at a date.
//!
//! - **Schedule** (`schedule.rs`): due-date and reminder computation for a
//!   concrete period. Pure functions over a resolved rule.
//!
//! ## Timing Authority
//!
//! The rule, not the service definition, decides periodicity. A service
//! that moves from monthly to quarterly filing does so by adding a new rule
//! with a later `effective_from`; instances already scheduled keep the rule
//! they were created under.

pub mod catalog;
pub mod payload;
pub mod schedule;
pub mod store;

pub use catalog::{DocType, DocTypeFlags, ServiceDefinition, ServiceUpdate};
pub use payload::{Nudges, RulePayload, RulePayloadWire, RuleSchedule};
pub use schedule::{
    compute_due_date, compute_reminders, current_period, plan_obligation, SchedulePlan,
};
pub use store::{DueDateRule, RuleStore};
