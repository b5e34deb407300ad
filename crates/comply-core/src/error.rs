//! # Error Types — Engine Error Taxonomy
//!
//! Every failure the obligation engine surfaces is a variant of
//! [`EngineError`]. The variants fall into four classes:
//!
//! - **Malformed input** — [`EngineError::Validation`], rejected before
//!   anything is stored.
//! - **Configuration gaps** — [`EngineError::NoRuleFound`] and
//!   [`EngineError::NoPublishedTemplate`]. These mean "not yet schedulable"
//!   and must be rendered to administrators as an actionable gap, never
//!   retried as if they were transient.
//! - **Workflow guards** — incomplete documents, blocked approvals,
//!   invalid transitions and escalations.
//! - **Transient persistence failures** — [`EngineError::TransientStore`],
//!   produced only after the retry budget is exhausted.

use chrono::NaiveDate;
use thiserror::Error;

use crate::identity::InstanceId;
use crate::period::Periodicity;

/// Top-level error type for the obligation engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Malformed rule, template, catalog or request input.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// No active due-date rule governs the (service, jurisdiction) at the date.
    #[error("no due-date rule for service {service_key} in {jurisdiction} as of {as_of}")]
    NoRuleFound {
        /// Service the rule was looked up for.
        service_key: String,
        /// Jurisdiction code the rule was looked up for.
        jurisdiction: String,
        /// Evaluation date.
        as_of: NaiveDate,
    },

    /// The service has no published workflow template.
    #[error("no published workflow template for service {service_key}")]
    NoPublishedTemplate {
        /// Service without an authoritative template.
        service_key: String,
    },

    /// Mandatory documents are missing for a review submission.
    #[error("missing mandatory documents: {}", missing.join(", "))]
    IncompleteDocuments {
        /// Doc codes without an uploaded document, sorted.
        missing: Vec<String>,
    },

    /// Persistence failed after exhausting the retry budget.
    #[error("transient store error after {attempts} attempts: {message}")]
    TransientStore {
        /// Number of attempts made.
        attempts: u32,
        /// Last underlying error message.
        message: String,
    },

    /// Rework limit exceeded; the instance has been escalated.
    #[error("obligation {instance_id} escalated after {rework_count} rework cycles")]
    EscalationRequired {
        /// The escalated instance.
        instance_id: InstanceId,
        /// Rework cycles consumed before escalation.
        rework_count: u32,
    },

    /// A referenced record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Record kind (e.g. "obligation", "workflow version").
        kind: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// State machine transition rejected.
    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        /// Current state name.
        from: String,
        /// Attempted target state name.
        to: String,
        /// Why the transition was rejected.
        reason: String,
    },

    /// Approval requested while mandatory checklist items are failed.
    #[error("approval blocked by failed mandatory items: {}", failed.join(", "))]
    ApprovalBlocked {
        /// Labels of the failed mandatory items.
        failed: Vec<String>,
    },

    /// Conflict with current state (e.g. a lost compare-and-set).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl EngineError {
    /// Whether the error reflects missing administrator configuration.
    pub fn is_configuration_gap(&self) -> bool {
        matches!(
            self,
            Self::NoRuleFound { .. } | Self::NoPublishedTemplate { .. }
        )
    }

    /// Whether the caller may reasonably retry the same request.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientStore { .. })
    }

    /// Shorthand for a [`EngineError::NotFound`].
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Input validation failures, raised at ingestion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Service key is empty, too long, or contains illegal characters.
    #[error("invalid service key: \"{0}\" (expected 1-64 chars of [A-Za-z0-9_-])")]
    InvalidServiceKey(String),

    /// Jurisdiction code is empty or malformed.
    #[error("invalid jurisdiction code: \"{0}\" (expected 2-16 chars of [A-Z0-9-])")]
    InvalidJurisdiction(String),

    /// Entity identifier is empty or too long.
    #[error("invalid entity id: \"{0}\"")]
    InvalidEntityId(String),

    /// Period identifier could not be parsed.
    #[error("invalid period \"{value}\": {reason}")]
    InvalidPeriod {
        /// The rejected input.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// `dueDayOfMonth` outside 1–28.
    #[error("dueDayOfMonth must be within 1-28, got {0}")]
    DueDayOutOfRange(i64),

    /// A nudge offset is negative.
    #[error("{kind} offsets must be non-negative, got {value}")]
    NegativeNudge {
        /// `tMinus` or `fixedDays`.
        kind: &'static str,
        /// The offending value.
        value: i64,
    },

    /// A `fixedDays` entry is not a calendar day.
    #[error("fixedDays entries must be within 1-31, got {0}")]
    FixedDayOutOfRange(i64),

    /// `effectiveFrom` does not strictly follow the previous rule in the series.
    #[error("effectiveFrom {given} must be strictly after previous rule's {previous}")]
    EffectiveFromNotIncreasing {
        /// Latest existing `effectiveFrom` in the series.
        previous: NaiveDate,
        /// The rejected date.
        given: NaiveDate,
    },

    /// Period kind does not match the governing rule's periodicity.
    #[error("period {period} does not match rule periodicity {periodicity}")]
    PeriodMismatch {
        /// The requested period.
        period: String,
        /// Periodicity declared by the governing rule.
        periodicity: Periodicity,
    },

    /// Service key is not registered.
    #[error("unknown service: {0}")]
    UnknownService(String),

    /// Service is registered but deactivated.
    #[error("service {0} is inactive")]
    InactiveService(String),

    /// A unique key is already taken.
    #[error("duplicate {kind}: {key}")]
    Duplicate {
        /// What kind of key collided.
        kind: &'static str,
        /// The colliding key.
        key: String,
    },

    /// Doc code is not defined for the service.
    #[error("unknown doc type {doc_code} for service {service_key}")]
    UnknownDocType {
        /// Service the doc code was looked up for.
        service_key: String,
        /// The unknown doc code.
        doc_code: String,
    },

    /// Workflow template payload is malformed.
    #[error("invalid workflow template: {0}")]
    InvalidTemplate(String),

    /// Checklist is malformed.
    #[error("invalid checklist: {0}")]
    InvalidChecklist(String),

    /// Generic field-level failure.
    #[error("{field}: {message}")]
    Field {
        /// Offending field.
        field: &'static str,
        /// Description of the problem.
        message: String,
    },
}
