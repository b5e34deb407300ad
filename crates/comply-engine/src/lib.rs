//! # comply-engine — Obligation Instance Tracker
//!
//! Ties the rule store, the template registry, the lifecycle machine and
//! the review engine into one [`ComplianceEngine`].
//!
//! ## Data Flow
//!
//! ```text
//! RuleStore ──▶ plan_obligation ──▶ ObligationTracker ──▶ QualityReview ──▶ NotificationTrigger
//!                                        ▲
//!                       TemplateRegistry ┘
//! ```
//!
//! - **Tracker** (`tracker.rs`): arena of instances and reviews, one mutex
//!   per record, idempotent get-or-create keyed by (service, entity, period).
//! - **Collaborators** (`collaborators.rs`): the document store and the
//!   notification dispatcher the engine depends on, with in-memory and
//!   log-only implementations.
//! - **Notify** (`notify.rs`): reminder de-duplication and retry.
//! - **Enrollment** (`enrollment.rs`): the entities the periodic tick scans.
//! - **Stats** (`stats.rs`): dashboard aggregates.
//! - **Catalog** (`catalog.rs`): the YAML bootstrap document of services,
//!   rules, templates and enrollments.
//!
//! ## Crate Policy
//!
//! - No async and no I/O. Persistence and scheduling of the tick belong to
//!   the caller.
//! - Snapshots out, never references: every query returns owned clones so no
//!   caller ever holds an instance lock.

pub mod catalog;
pub mod collaborators;
pub mod config;
pub mod engine;
pub mod enrollment;
pub mod notify;
pub mod stats;
pub mod tracker;

pub use catalog::{CatalogConfig, CatalogError, CatalogSummary};
pub use collaborators::{
    DispatchError, DocumentMeta, DocumentStore, InMemoryDocumentStore, LogDispatcher,
    NotificationDispatcher, RecordingDispatcher,
};
pub use config::EngineConfig;
pub use engine::{
    ComplianceEngine, InstanceFilter, ReviewDecision, ScheduleRequest, Scheduled, TickReport,
    TickSummary, SYSTEM_ACTOR,
};
pub use enrollment::{Enrollment, EnrollmentRegistry};
pub use notify::{DispatchReport, NotificationTrigger, Reminder, ReminderChannel};
pub use stats::DashboardStats;
pub use tracker::ObligationTracker;
