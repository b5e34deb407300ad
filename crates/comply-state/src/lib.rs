//! # comply-state — Obligation Lifecycle State Machine
//!
//! ## States
//!
//! ```text
//! Scheduled ──▶ InProgress ──▶ SubmittedForReview ──▶ Approved ──▶ Closed
//!                  ▲                   │
//!                  │                   ├──▶ Rejected ───────┐
//!                  │                   └──▶ ReworkRequired ─┤
//!                  └──────────── reopen ────────────────────┤
//!                                                           ▼
//!                               (rework limit reached)  Escalated ──▶ InProgress | Closed
//! ```
//!
//! Transitions are methods on [`ObligationInstance`]; each checks the current
//! status and appends a [`TransitionRecord`]. Guards that need collaborators
//! (document presence, checklist evaluation) are evaluated by the caller and
//! passed in, so this crate stays free of I/O.

pub mod obligation;

pub use obligation::{
    Disposition, EscalationAction, ObligationInstance, ObligationStatus, ReopenOutcome,
    ReviewOutcome, TransitionRecord,
};
