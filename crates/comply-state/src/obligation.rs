//! # Obligation Instance
//!
//! A materialized (service, entity, period) obligation. The instance keeps
//! a snapshot of the rule and template version it was created under; later
//! rule or template changes never reach it.

use std::str::FromStr;

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use comply_core::{
    EngineError, EntityId, InstanceId, JurisdictionCode, Period, ReviewId, ServiceKey, Timestamp,
    ValidationError,
};
use comply_rules::{DocType, DueDateRule, SchedulePlan};
use comply_workflow::WorkflowTemplate;

// ─── Status ──────────────────────────────────────────────────────────

/// Lifecycle status of an obligation instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObligationStatus {
    Scheduled,
    InProgress,
    SubmittedForReview,
    Approved,
    Rejected,
    ReworkRequired,
    /// Rework limit reached; waits for an administrator.
    Escalated,
    /// Terminal. The instance is archived.
    Closed,
}

impl ObligationStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [ObligationStatus; 8] = [
        Self::Scheduled,
        Self::InProgress,
        Self::SubmittedForReview,
        Self::Approved,
        Self::Rejected,
        Self::ReworkRequired,
        Self::Escalated,
        Self::Closed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::InProgress => "in_progress",
            Self::SubmittedForReview => "submitted_for_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::ReworkRequired => "rework_required",
            Self::Escalated => "escalated",
            Self::Closed => "closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Statuses for which an SLA breach can no longer accrue.
    pub fn is_sla_settled(&self) -> bool {
        matches!(self, Self::Approved | Self::Closed)
    }
}

impl std::fmt::Display for ObligationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObligationStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError::Field {
                field: "status",
                message: format!("unknown status {s:?}"),
            })
    }
}

// ─── Review outcomes ─────────────────────────────────────────────────

/// Final disposition of a quality review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Approved,
    Rejected,
    ReworkRequired,
}

impl Disposition {
    fn target(self) -> ObligationStatus {
        match self {
            Self::Approved => ObligationStatus::Approved,
            Self::Rejected => ObligationStatus::Rejected,
            Self::ReworkRequired => ObligationStatus::ReworkRequired,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.target().as_str()
    }
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a decided review hands to the instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewOutcome {
    pub review_id: ReviewId,
    pub disposition: Disposition,
    /// Quality score, 0-100.
    pub score: u8,
    /// Free-form rework instructions from the reviewer.
    pub instructions: Option<String>,
}

/// Result of [`ObligationInstance::reopen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReopenOutcome {
    /// Back in progress; carries the incremented rework count.
    Reopened { rework_count: u32 },
    /// Rework limit was already reached; the instance is now escalated.
    Escalated { rework_count: u32 },
}

/// Administrator decision on an escalated instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationAction {
    /// Back to in_progress with the rework count reset.
    Resume,
    /// Close without approval.
    Close,
}

// ─── Transition log ──────────────────────────────────────────────────

/// Record of a status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: ObligationStatus,
    pub to: ObligationStatus,
    pub timestamp: Timestamp,
    pub actor: String,
    pub reason: String,
}

// ─── Instance ────────────────────────────────────────────────────────

/// One obligation of one entity for one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObligationInstance {
    pub id: InstanceId,
    pub service_key: ServiceKey,
    pub entity_id: EntityId,
    pub jurisdiction: JurisdictionCode,
    pub period: Period,
    pub due_date: NaiveDate,
    pub reminders: Vec<Timestamp>,
    /// Rule in force at creation.
    pub rule: DueDateRule,
    /// Template version in force at creation.
    pub template: WorkflowTemplate,
    pub status: ObligationStatus,
    pub current_step: Option<String>,
    pub passed_steps: Vec<String>,
    pub sla_deadline: Timestamp,
    pub quality_score: Option<u8>,
    pub review_id: Option<ReviewId>,
    pub rework_count: u32,
    pub rework_instructions: Option<String>,
    pub archived: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub submitted_at: Option<Timestamp>,
    pub decided_at: Option<Timestamp>,
    pub approved_at: Option<Timestamp>,
    pub closed_at: Option<Timestamp>,
    pub transitions: Vec<TransitionRecord>,
    /// Bumped on every committed change; storage keeps the highest.
    #[serde(default)]
    pub revision: u64,
}

impl ObligationInstance {
    /// Create a scheduled instance from a plan and the published template.
    ///
    /// The SLA deadline is the last second (UTC) of `due_date - sla_buffer_days`.
    pub fn materialize(
        entity_id: EntityId,
        plan: SchedulePlan,
        template: WorkflowTemplate,
        sla_buffer_days: u32,
    ) -> Self {
        let now = Timestamp::now();
        let sla_day = plan
            .due_date
            .checked_sub_days(Days::new(u64::from(sla_buffer_days)))
            .unwrap_or(plan.due_date);
        Self {
            id: InstanceId::new(),
            service_key: plan.rule.service_key.clone(),
            entity_id,
            jurisdiction: plan.rule.jurisdiction.clone(),
            period: plan.period,
            due_date: plan.due_date,
            reminders: plan.reminders,
            rule: plan.rule,
            template,
            status: ObligationStatus::Scheduled,
            current_step: None,
            passed_steps: Vec::new(),
            sla_deadline: Timestamp::end_of_day(sla_day),
            quality_score: None,
            review_id: None,
            rework_count: 0,
            rework_instructions: None,
            archived: false,
            created_at: now,
            updated_at: now,
            submitted_at: None,
            decided_at: None,
            approved_at: None,
            closed_at: None,
            transitions: Vec::new(),
            revision: 1,
        }
    }

    /// Begin work (SCHEDULED → IN_PROGRESS), positioned on the first step.
    pub fn start(&mut self, actor: &str) -> Result<(), EngineError> {
        self.require_state(&[ObligationStatus::Scheduled], ObligationStatus::InProgress)?;
        self.current_step = self.template.payload.first_step().map(String::from);
        self.do_transition(ObligationStatus::InProgress, actor, "work started");
        Ok(())
    }

    /// Mark the current step passed and advance to the next one.
    ///
    /// Returns the new current step, `None` once every step has passed.
    pub fn complete_step(&mut self) -> Result<Option<String>, EngineError> {
        self.require_state(&[ObligationStatus::InProgress], ObligationStatus::InProgress)?;
        let step = self.current_step.take().ok_or_else(|| EngineError::InvalidTransition {
            from: self.status.to_string(),
            to: self.status.to_string(),
            reason: "all workflow steps already completed".into(),
        })?;
        self.current_step = self.template.payload.step_after(&step).map(String::from);
        if !self.passed_steps.contains(&step) {
            self.passed_steps.push(step);
        }
        self.touch();
        Ok(self.current_step.clone())
    }

    /// Doc codes that must have a document before review submission, sorted.
    pub fn missing_for_submission(
        &self,
        doc_types: &[DocType],
        has_document: impl Fn(&str) -> bool,
    ) -> Vec<String> {
        let mut missing: Vec<String> = doc_types
            .iter()
            .filter(|d| d.required_for_submission(&self.passed_steps))
            .filter(|d| !has_document(&d.doc_code))
            .map(|d| d.doc_code.clone())
            .collect();
        missing.sort();
        missing
    }

    /// Mandatory deliverables not yet delivered, sorted.
    pub fn missing_deliverables(
        &self,
        doc_types: &[DocType],
        has_document: impl Fn(&str) -> bool,
    ) -> Vec<String> {
        let mut missing: Vec<String> = doc_types
            .iter()
            .filter(|d| d.required_for_close())
            .filter(|d| !has_document(&d.doc_code))
            .map(|d| d.doc_code.clone())
            .collect();
        missing.sort();
        missing
    }

    /// Submit for review (IN_PROGRESS → SUBMITTED_FOR_REVIEW).
    ///
    /// `missing` is the result of [`Self::missing_for_submission`]; any
    /// entry blocks the transition.
    pub fn submit_for_review(&mut self, actor: &str, missing: Vec<String>) -> Result<(), EngineError> {
        self.require_state(
            &[ObligationStatus::InProgress],
            ObligationStatus::SubmittedForReview,
        )?;
        if !missing.is_empty() {
            return Err(EngineError::IncompleteDocuments { missing });
        }
        self.submitted_at = Some(Timestamp::now());
        self.do_transition(ObligationStatus::SubmittedForReview, actor, "submitted for review");
        Ok(())
    }

    /// Apply a decided review (SUBMITTED_FOR_REVIEW → APPROVED | REJECTED | REWORK_REQUIRED).
    pub fn apply_review_outcome(&mut self, actor: &str, outcome: ReviewOutcome) -> Result<(), EngineError> {
        let target = outcome.disposition.target();
        self.require_state(&[ObligationStatus::SubmittedForReview], target)?;
        let now = Timestamp::now();
        self.quality_score = Some(outcome.score);
        self.review_id = Some(outcome.review_id);
        self.rework_instructions = outcome.instructions;
        self.decided_at = Some(now);
        if target == ObligationStatus::Approved {
            self.approved_at = Some(now);
        }
        let reason = format!("review {} decided {}", outcome.review_id, outcome.disposition);
        self.do_transition(target, actor, &reason);
        Ok(())
    }

    /// Return rejected or rework-required work to IN_PROGRESS.
    ///
    /// When `rework_count` has already reached `max_rework` the instance
    /// moves to ESCALATED instead.
    pub fn reopen(&mut self, actor: &str, max_rework: u32) -> Result<ReopenOutcome, EngineError> {
        self.require_state(
            &[ObligationStatus::Rejected, ObligationStatus::ReworkRequired],
            ObligationStatus::InProgress,
        )?;
        if self.rework_count >= max_rework {
            let reason = format!("rework limit of {max_rework} reached");
            self.do_transition(ObligationStatus::Escalated, actor, &reason);
            return Ok(ReopenOutcome::Escalated {
                rework_count: self.rework_count,
            });
        }
        self.rework_count += 1;
        let reason = format!("rework cycle {}", self.rework_count);
        self.do_transition(ObligationStatus::InProgress, actor, &reason);
        Ok(ReopenOutcome::Reopened {
            rework_count: self.rework_count,
        })
    }

    /// Administrator decision on an ESCALATED instance.
    pub fn resolve_escalation(
        &mut self,
        actor: &str,
        action: EscalationAction,
        reason: &str,
    ) -> Result<(), EngineError> {
        let target = match action {
            EscalationAction::Resume => ObligationStatus::InProgress,
            EscalationAction::Close => ObligationStatus::Closed,
        };
        self.require_state(&[ObligationStatus::Escalated], target)?;
        match action {
            EscalationAction::Resume => {
                self.rework_count = 0;
                self.do_transition(target, actor, reason);
            }
            EscalationAction::Close => self.archive(actor, reason),
        }
        Ok(())
    }

    /// Close an approved instance (APPROVED → CLOSED) and archive it.
    pub fn close(&mut self, actor: &str, reason: &str) -> Result<(), EngineError> {
        self.require_state(&[ObligationStatus::Approved], ObligationStatus::Closed)?;
        self.archive(actor, reason);
        Ok(())
    }

    /// Whether the SLA deadline has passed without approval.
    pub fn sla_breached(&self, now: Timestamp) -> bool {
        now > self.sla_deadline && !self.status.is_sla_settled()
    }

    /// Whether approval landed on or before the SLA deadline.
    /// `None` while the instance has never been approved.
    pub fn approved_within_sla(&self) -> Option<bool> {
        self.approved_at.map(|at| at <= self.sla_deadline)
    }

    /// Seconds between the latest submission and its review decision.
    pub fn review_seconds(&self) -> Option<i64> {
        match (self.submitted_at, self.decided_at) {
            (Some(submitted), Some(decided)) if decided >= submitted => {
                Some(decided.seconds_since(submitted))
            }
            _ => None,
        }
    }

    fn archive(&mut self, actor: &str, reason: &str) {
        self.archived = true;
        self.closed_at = Some(Timestamp::now());
        self.do_transition(ObligationStatus::Closed, actor, reason);
    }

    fn require_state(
        &self,
        allowed: &[ObligationStatus],
        target: ObligationStatus,
    ) -> Result<(), EngineError> {
        if allowed.contains(&self.status) {
            return Ok(());
        }
        let expected: Vec<&str> = allowed.iter().map(ObligationStatus::as_str).collect();
        Err(EngineError::InvalidTransition {
            from: self.status.to_string(),
            to: target.to_string(),
            reason: format!("requires status {}", expected.join(" or ")),
        })
    }

    fn do_transition(&mut self, to: ObligationStatus, actor: &str, reason: &str) {
        let now = Timestamp::now();
        self.transitions.push(TransitionRecord {
            from: self.status,
            to,
            timestamp: now,
            actor: actor.to_string(),
            reason: reason.to_string(),
        });
        self.status = to;
        self.updated_at = now;
    }

    fn touch(&mut self) {
        self.updated_at = Timestamp::now();
    }
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use comply_core::{Periodicity, RuleId};
    use comply_rules::{DocTypeFlags, Nudges, RulePayload, RuleSchedule};
    use comply_workflow::{StepDefinition, StepPayload};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn key() -> ServiceKey {
        ServiceKey::new("gst-monthly").unwrap()
    }

    fn plan() -> SchedulePlan {
        SchedulePlan {
            rule: DueDateRule {
                id: RuleId::new(),
                service_key: key(),
                jurisdiction: JurisdictionCode::new("IN").unwrap(),
                effective_from: date(2025, 1, 1),
                payload: RulePayload {
                    schedule: RuleSchedule::Monthly { due_day: 20 },
                    nudges: Nudges::default(),
                },
                active: true,
                created_at: Timestamp::now(),
            },
            period: Period::parse("2025-02").unwrap(),
            due_date: date(2025, 2, 20),
            reminders: vec![],
        }
    }

    fn template() -> WorkflowTemplate {
        WorkflowTemplate {
            service_key: key(),
            version: 1,
            payload: StepPayload {
                steps: ["collect", "prepare", "file"]
                    .iter()
                    .map(|k| StepDefinition {
                        key: k.to_string(),
                        name: k.to_string(),
                        sla_hours: None,
                    })
                    .collect(),
                checklist: vec![],
            },
            is_published: true,
            author: "admin".into(),
            created_at: Timestamp::now(),
        }
    }

    fn instance(buffer: u32) -> ObligationInstance {
        ObligationInstance::materialize(EntityId::new("acme").unwrap(), plan(), template(), buffer)
    }

    fn outcome(disposition: Disposition) -> ReviewOutcome {
        ReviewOutcome {
            review_id: ReviewId::new(),
            disposition,
            score: 80,
            instructions: Some("fix totals".into()),
        }
    }

    fn submitted() -> ObligationInstance {
        let mut inst = instance(0);
        inst.start("ops-1").unwrap();
        inst.submit_for_review("ops-1", vec![]).unwrap();
        inst
    }

    fn doc(code: &str, mandatory: bool, deliverable: bool, step: Option<&str>) -> DocType {
        DocType::new(
            key(),
            code,
            code,
            DocTypeFlags {
                client_uploads: true,
                is_deliverable: deliverable,
                mandatory,
            },
            step.map(String::from),
        )
        .unwrap()
    }

    #[test]
    fn materialize_sets_sla_from_buffer() {
        assert_eq!(instance(0).sla_deadline.to_iso8601(), "2025-02-20T23:59:59Z");
        assert_eq!(instance(3).sla_deadline.to_iso8601(), "2025-02-17T23:59:59Z");
        assert_eq!(instance(0).status, ObligationStatus::Scheduled);
        assert_eq!(instance(0).rule.payload.periodicity(), Periodicity::Monthly);
    }

    #[test]
    fn start_positions_on_first_step() {
        let mut inst = instance(0);
        inst.start("ops-1").unwrap();
        assert_eq!(inst.status, ObligationStatus::InProgress);
        assert_eq!(inst.current_step.as_deref(), Some("collect"));
        assert_eq!(inst.transitions.len(), 1);
        assert_eq!(inst.transitions[0].actor, "ops-1");
        assert!(inst.start("ops-1").is_err());
    }

    #[test]
    fn complete_step_walks_template() {
        let mut inst = instance(0);
        inst.start("ops").unwrap();
        assert_eq!(inst.complete_step().unwrap().as_deref(), Some("prepare"));
        assert_eq!(inst.complete_step().unwrap().as_deref(), Some("file"));
        assert_eq!(inst.complete_step().unwrap(), None);
        assert!(inst.complete_step().is_err());
        assert_eq!(inst.passed_steps, vec!["collect", "prepare", "file"]);
    }

    #[test]
    fn submission_lists_missing_mandatory_docs() {
        let mut inst = instance(0);
        inst.start("ops").unwrap();
        let docs = vec![
            doc("doc1", true, false, None),
            doc("doc2", true, false, None),
            doc("later", true, false, Some("file")),
            doc("optional", false, false, None),
            doc("receipt", true, true, None),
        ];
        let missing = inst.missing_for_submission(&docs, |code| code == "doc1");
        assert_eq!(missing, vec!["doc2"]);

        let err = inst.submit_for_review("ops", missing).unwrap_err();
        assert_eq!(
            err,
            EngineError::IncompleteDocuments {
                missing: vec!["doc2".into()]
            }
        );
        assert_eq!(inst.status, ObligationStatus::InProgress);
    }

    #[test]
    fn step_bound_docs_required_once_step_passed() {
        let mut inst = instance(0);
        inst.start("ops").unwrap();
        let docs = vec![doc("bank", true, false, Some("collect"))];
        assert!(inst.missing_for_submission(&docs, |_| false).is_empty());
        inst.complete_step().unwrap();
        assert_eq!(inst.missing_for_submission(&docs, |_| false), vec!["bank"]);
    }

    #[test]
    fn approval_records_score_and_close_archives() {
        let mut inst = submitted();
        inst.apply_review_outcome("rev-1", outcome(Disposition::Approved)).unwrap();
        assert_eq!(inst.status, ObligationStatus::Approved);
        assert_eq!(inst.quality_score, Some(80));
        assert!(inst.approved_at.is_some());
        assert!(inst.review_seconds().is_some());

        inst.close("system", "deliverables complete").unwrap();
        assert_eq!(inst.status, ObligationStatus::Closed);
        assert!(inst.archived);
        assert!(inst.close("system", "again").is_err());
    }

    #[test]
    fn outcome_requires_submitted_state() {
        let mut inst = instance(0);
        let err = inst
            .apply_review_outcome("rev", outcome(Disposition::Approved))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[test]
    fn reopen_escalates_after_limit() {
        let mut inst = submitted();
        for cycle in 1..=3 {
            inst.apply_review_outcome("rev", outcome(Disposition::ReworkRequired))
                .unwrap();
            assert_eq!(inst.rework_instructions.as_deref(), Some("fix totals"));
            assert_eq!(
                inst.reopen("ops", 3).unwrap(),
                ReopenOutcome::Reopened { rework_count: cycle }
            );
            inst.submit_for_review("ops", vec![]).unwrap();
        }
        inst.apply_review_outcome("rev", outcome(Disposition::Rejected)).unwrap();
        assert_eq!(
            inst.reopen("ops", 3).unwrap(),
            ReopenOutcome::Escalated { rework_count: 3 }
        );
        assert_eq!(inst.status, ObligationStatus::Escalated);

        inst.resolve_escalation("admin", EscalationAction::Resume, "one more try")
            .unwrap();
        assert_eq!(inst.status, ObligationStatus::InProgress);
        assert_eq!(inst.rework_count, 0);
    }

    #[test]
    fn escalation_close_archives() {
        let mut inst = submitted();
        inst.apply_review_outcome("rev", outcome(Disposition::Rejected)).unwrap();
        assert!(matches!(inst.reopen("ops", 0).unwrap(), ReopenOutcome::Escalated { .. }));
        inst.resolve_escalation("admin", EscalationAction::Close, "abandoned")
            .unwrap();
        assert_eq!(inst.status, ObligationStatus::Closed);
        assert!(inst.archived);
        assert_eq!(inst.approved_within_sla(), None);
    }

    #[test]
    fn sla_breach_is_derived() {
        let mut inst = instance(0);
        let before = Timestamp::parse("2025-02-20T23:59:59Z").unwrap();
        let after = Timestamp::parse("2025-02-21T00:00:00Z").unwrap();
        assert!(!inst.sla_breached(before));
        assert!(inst.sla_breached(after));
        inst.status = ObligationStatus::Approved;
        assert!(!inst.sla_breached(after));
    }

    #[test]
    fn every_transition_is_logged() {
        let mut inst = submitted();
        inst.apply_review_outcome("rev", outcome(Disposition::Approved)).unwrap();
        inst.close("system", "done").unwrap();
        let path: Vec<_> = inst.transitions.iter().map(|t| (t.from, t.to)).collect();
        assert_eq!(
            path,
            vec![
                (ObligationStatus::Scheduled, ObligationStatus::InProgress),
                (ObligationStatus::InProgress, ObligationStatus::SubmittedForReview),
                (ObligationStatus::SubmittedForReview, ObligationStatus::Approved),
                (ObligationStatus::Approved, ObligationStatus::Closed),
            ]
        );
    }

    #[test]
    fn status_wire_names() {
        assert_eq!(
            serde_json::to_string(&ObligationStatus::SubmittedForReview).unwrap(),
            "\"submitted_for_review\""
        );
        assert_eq!(
            "rework_required".parse::<ObligationStatus>().unwrap(),
            ObligationStatus::ReworkRequired
        );
        assert!("done".parse::<ObligationStatus>().is_err());
    }
}
