//! # Compliance Engine
//!
//! Facade over the rule store, template registry, enrollments and the
//! instance tracker. Every operation here is synchronous and in-memory;
//! persistence is layered on top by the caller.

use std::sync::Arc;

use serde::Serialize;

use comply_core::{
    EngineError, EntityId, InstanceId, JurisdictionCode, Period, ReviewId, ServiceKey, Timestamp,
    ValidationError,
};
use comply_review::{ChecklistItem, ItemStatus, QualityReview};
use comply_rules::{current_period, plan_obligation, RuleStore};
use comply_state::{
    Disposition, EscalationAction, ObligationInstance, ObligationStatus, ReopenOutcome,
};
use comply_workflow::TemplateRegistry;

use crate::collaborators::{
    DocumentMeta, DocumentStore, InMemoryDocumentStore, LogDispatcher, NotificationDispatcher,
};
use crate::config::EngineConfig;
use crate::enrollment::{Enrollment, EnrollmentRegistry};
use crate::notify::{DispatchReport, NotificationTrigger};
use crate::stats::DashboardStats;
use crate::tracker::ObligationTracker;

/// Actor name recorded for transitions the engine performs on its own.
pub const SYSTEM_ACTOR: &str = "system";

/// Target of a scheduling request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleRequest {
    pub service_key: ServiceKey,
    pub entity_id: EntityId,
    pub jurisdiction: JurisdictionCode,
    pub period: Period,
}

/// Result of [`ComplianceEngine::schedule`].
#[derive(Debug, Clone)]
pub struct Scheduled {
    pub instance: ObligationInstance,
    /// `false` when the instance already existed and was returned unchanged.
    pub created: bool,
}

/// Listing filter for instances. Archived instances are hidden unless asked for.
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    pub status: Option<ObligationStatus>,
    pub service_key: Option<ServiceKey>,
    pub entity_id: Option<EntityId>,
    pub include_archived: bool,
}

impl InstanceFilter {
    fn matches(&self, inst: &ObligationInstance) -> bool {
        self.status.map_or(true, |s| inst.status == s)
            && self.service_key.as_ref().map_or(true, |k| &inst.service_key == k)
            && self.entity_id.as_ref().map_or(true, |e| &inst.entity_id == e)
            && (self.include_archived || !inst.archived)
    }
}

/// A decided review and the instance it moved.
#[derive(Debug, Clone)]
pub struct ReviewDecision {
    pub review: QualityReview,
    pub instance: ObligationInstance,
}

/// Outcome of one periodic tick.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Instances created by this tick.
    pub created: Vec<ObligationInstance>,
    /// Already-existing instances seen by this tick.
    pub existing: usize,
    /// (service, entity) pairs skipped for lack of a rule or template.
    pub not_configured: usize,
    /// Pairs waiting out a mid-period periodicity change.
    pub deferred: usize,
    /// Pairs that failed for any other reason.
    pub failed: usize,
    pub reminders: DispatchReport,
}

/// Summary of a tick without the created instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub created: usize,
    pub existing: usize,
    pub not_configured: usize,
    pub deferred: usize,
    pub failed: usize,
    pub reminders_dispatched: usize,
    pub reminders_failed: usize,
}

impl TickReport {
    pub fn summary(&self) -> TickSummary {
        TickSummary {
            created: self.created.len(),
            existing: self.existing,
            not_configured: self.not_configured,
            deferred: self.deferred,
            failed: self.failed,
            reminders_dispatched: self.reminders.dispatched,
            reminders_failed: self.reminders.failed,
        }
    }
}

/// The obligation and review engine.
#[derive(Clone)]
pub struct ComplianceEngine {
    rules: RuleStore,
    templates: TemplateRegistry,
    enrollments: EnrollmentRegistry,
    tracker: Arc<ObligationTracker>,
    documents: Arc<dyn DocumentStore>,
    trigger: NotificationTrigger,
    config: EngineConfig,
}

impl std::fmt::Debug for ComplianceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComplianceEngine")
            .field("config", &self.config)
            .field("instances", &self.tracker.len())
            .finish()
    }
}

impl ComplianceEngine {
    pub fn new(
        config: EngineConfig,
        documents: Arc<dyn DocumentStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        let trigger = NotificationTrigger::new(dispatcher, config.reminder_channel);
        Self {
            rules: RuleStore::new(),
            templates: TemplateRegistry::new(),
            enrollments: EnrollmentRegistry::new(),
            tracker: Arc::new(ObligationTracker::new()),
            documents,
            trigger,
            config,
        }
    }

    /// Engine with in-memory documents and log-only reminders.
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(LogDispatcher),
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    pub fn enrollments(&self) -> &EnrollmentRegistry {
        &self.enrollments
    }

    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    pub fn trigger(&self) -> &NotificationTrigger {
        &self.trigger
    }

    // ── Enrollment ──────────────────────────────────────────────────

    /// Declare the services an entity subscribes to. Replaces any previous
    /// enrollment of the entity.
    pub fn enroll(
        &self,
        entity_id: EntityId,
        jurisdiction: JurisdictionCode,
        services: Vec<ServiceKey>,
    ) -> Result<Enrollment, EngineError> {
        for key in &services {
            if self.rules.service(key).is_none() {
                return Err(ValidationError::UnknownService(key.to_string()).into());
            }
        }
        let enrollment = self.enrollments.upsert(Enrollment {
            entity_id,
            jurisdiction,
            services: services.into_iter().collect(),
            active: true,
            updated_at: Timestamp::now(),
        });
        tracing::info!(
            entity_id = %enrollment.entity_id,
            jurisdiction = %enrollment.jurisdiction,
            services = enrollment.services.len(),
            "entity enrolled"
        );
        Ok(enrollment)
    }

    // ── Scheduling ──────────────────────────────────────────────────

    /// Materialize the obligation for (service, entity, period), or return
    /// the existing one unchanged.
    pub fn schedule(&self, request: ScheduleRequest) -> Result<Scheduled, EngineError> {
        self.schedule_at(request, Timestamp::now())
    }

    /// [`Self::schedule`] with an explicit planning instant.
    pub fn schedule_at(&self, request: ScheduleRequest, now: Timestamp) -> Result<Scheduled, EngineError> {
        let key = (
            request.service_key.clone(),
            request.entity_id.clone(),
            request.period,
        );
        let (instance, created) = self.tracker.get_or_create(key, || {
            let service = self
                .rules
                .service(&request.service_key)
                .ok_or_else(|| ValidationError::UnknownService(request.service_key.to_string()))?;
            if !service.active {
                return Err(ValidationError::InactiveService(service.service_key.to_string()).into());
            }
            let plan = plan_obligation(
                &self.rules,
                &request.service_key,
                &request.jurisdiction,
                request.period,
                now,
                self.config.reminder_hour,
            )?;
            let template = self.templates.resolve_published(&request.service_key)?;
            Ok(ObligationInstance::materialize(
                request.entity_id.clone(),
                plan,
                template,
                self.config.sla_buffer_days,
            ))
        })?;

        if created {
            metrics::counter!("comply_obligations_materialized_total").increment(1);
            tracing::info!(
                instance_id = %instance.id,
                service_key = %instance.service_key,
                entity_id = %instance.entity_id,
                period = %instance.period,
                due_date = %instance.due_date,
                "obligation materialized"
            );
        }
        Ok(Scheduled { instance, created })
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn instance(&self, id: &InstanceId) -> Result<ObligationInstance, EngineError> {
        self.tracker
            .get(id)
            .ok_or_else(|| EngineError::not_found("obligation", id))
    }

    pub fn instances(&self, filter: &InstanceFilter) -> Vec<ObligationInstance> {
        self.tracker
            .list()
            .into_iter()
            .filter(|i| filter.matches(i))
            .collect()
    }

    /// The escalation queue: escalated instances, oldest due first.
    pub fn escalations(&self) -> Vec<ObligationInstance> {
        self.instances(&InstanceFilter {
            status: Some(ObligationStatus::Escalated),
            ..Default::default()
        })
    }

    pub fn review(&self, id: &ReviewId) -> Result<QualityReview, EngineError> {
        self.tracker
            .review(id)
            .ok_or_else(|| EngineError::not_found("review", id))
    }

    pub fn reviews_for(&self, instance_id: &InstanceId) -> Vec<QualityReview> {
        self.tracker.reviews_for(instance_id)
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    pub fn start(&self, id: &InstanceId, actor: &str) -> Result<ObligationInstance, EngineError> {
        let ((), inst) = self.tracker.update(id, |inst| inst.start(actor))?;
        tracing::info!(instance_id = %id, actor, "obligation started");
        Ok(inst)
    }

    pub fn complete_step(&self, id: &InstanceId, actor: &str) -> Result<ObligationInstance, EngineError> {
        let (next, inst) = self.tracker.update(id, |inst| inst.complete_step())?;
        tracing::info!(
            instance_id = %id,
            actor,
            next_step = next.as_deref().unwrap_or("-"),
            "workflow step completed"
        );
        Ok(inst)
    }

    /// Submit for review once every required document is present.
    pub fn submit_for_review(&self, id: &InstanceId, actor: &str) -> Result<ObligationInstance, EngineError> {
        let ((), inst) = self.tracker.update(id, |inst| {
            let doc_types = self.rules.doc_types_for(&inst.service_key);
            let missing =
                inst.missing_for_submission(&doc_types, |code| self.documents.has_document(&inst.id, code));
            inst.submit_for_review(actor, missing)
        })?;
        tracing::info!(instance_id = %id, actor, "obligation submitted for review");
        Ok(inst)
    }

    /// Return rejected or rework-required work to progress.
    ///
    /// When the rework limit is exhausted the escalation is committed and
    /// `EscalationRequired` is returned.
    pub fn reopen(&self, id: &InstanceId, actor: &str) -> Result<ObligationInstance, EngineError> {
        let max = self.config.max_rework;
        let (outcome, inst) = self.tracker.update(id, |inst| inst.reopen(actor, max))?;
        match outcome {
            ReopenOutcome::Reopened { rework_count } => {
                tracing::info!(instance_id = %id, actor, rework_count, "obligation reopened");
                Ok(inst)
            }
            ReopenOutcome::Escalated { rework_count } => {
                tracing::warn!(instance_id = %id, actor, rework_count, "rework limit reached, obligation escalated");
                Err(EngineError::EscalationRequired {
                    instance_id: *id,
                    rework_count,
                })
            }
        }
    }

    pub fn resolve_escalation(
        &self,
        id: &InstanceId,
        actor: &str,
        action: EscalationAction,
        reason: &str,
    ) -> Result<ObligationInstance, EngineError> {
        let ((), inst) = self
            .tracker
            .update(id, |inst| inst.resolve_escalation(actor, action, reason))?;
        tracing::info!(instance_id = %id, actor, action = ?action, "escalation resolved");
        Ok(inst)
    }

    /// Register a document for the instance. Recording the last mandatory
    /// deliverable of an approved instance closes it.
    pub fn record_document(
        &self,
        id: &InstanceId,
        doc_code: &str,
        verified: bool,
        actor: &str,
    ) -> Result<ObligationInstance, EngineError> {
        let (closed, inst) = self.tracker.update(id, |inst| {
            if inst.status.is_terminal() {
                return Err(EngineError::Conflict(format!(
                    "obligation {} is closed",
                    inst.id
                )));
            }
            if self.rules.doc_type(&inst.service_key, doc_code).is_none() {
                return Err(ValidationError::UnknownDocType {
                    service_key: inst.service_key.to_string(),
                    doc_code: doc_code.to_string(),
                }
                .into());
            }
            self.documents.record(
                &inst.id,
                doc_code,
                DocumentMeta {
                    uploaded_at: Timestamp::now(),
                    verified,
                },
            );
            self.close_if_delivered(inst)
        })?;
        tracing::info!(instance_id = %id, doc_code, verified, actor, "document recorded");
        if closed {
            tracing::info!(instance_id = %id, "all deliverables recorded, obligation closed");
        }
        Ok(inst)
    }

    fn close_if_delivered(&self, inst: &mut ObligationInstance) -> Result<bool, EngineError> {
        if inst.status != ObligationStatus::Approved {
            return Ok(false);
        }
        let doc_types = self.rules.doc_types_for(&inst.service_key);
        let missing =
            inst.missing_deliverables(&doc_types, |code| self.documents.has_document(&inst.id, code));
        if !missing.is_empty() {
            return Ok(false);
        }
        inst.close(SYSTEM_ACTOR, "all mandatory deliverables recorded")?;
        Ok(true)
    }

    // ── Reviews ─────────────────────────────────────────────────────

    /// Open a review on an instance awaiting review. Without explicit items
    /// the checklist of the instance's template version is used.
    pub fn open_review(
        &self,
        instance_id: &InstanceId,
        reviewer_id: &str,
        items: Option<Vec<ChecklistItem>>,
    ) -> Result<QualityReview, EngineError> {
        let handle = self.tracker.instance_handle(instance_id)?;
        let inst = handle.lock();
        if inst.status != ObligationStatus::SubmittedForReview {
            return Err(EngineError::Conflict(format!(
                "obligation {} is {}, not awaiting review",
                inst.id, inst.status
            )));
        }
        let items = items.unwrap_or_else(|| {
            inst.template
                .payload
                .checklist
                .iter()
                .map(ChecklistItem::from_seed)
                .collect()
        });
        let review = QualityReview::open(inst.id, reviewer_id, items)?;
        self.tracker.insert_review(review.clone())?;
        tracing::info!(
            review_id = %review.id,
            instance_id = %inst.id,
            reviewer_id,
            items = review.items.len(),
            "review opened"
        );
        Ok(review)
    }

    pub fn set_review_item(
        &self,
        review_id: &ReviewId,
        index: usize,
        status: ItemStatus,
    ) -> Result<QualityReview, EngineError> {
        let handle = self.tracker.review_handle(review_id)?;
        let mut guard = handle.lock();
        let mut draft = guard.clone();
        draft.set_item_status(index, status)?;
        draft.revision = guard.revision + 1;
        *guard = draft.clone();
        Ok(draft)
    }

    /// Decide a review and apply the outcome to its instance.
    ///
    /// Both records are updated on clones and committed together; a blocked
    /// approval or a stale instance leaves both untouched.
    pub fn submit_review(
        &self,
        review_id: &ReviewId,
        disposition: Disposition,
        instructions: Option<String>,
        actor: &str,
    ) -> Result<ReviewDecision, EngineError> {
        let review_handle = self.tracker.review_handle(review_id)?;
        let mut review_guard = review_handle.lock();
        let instance_handle = self.tracker.instance_handle(&review_guard.instance_id)?;
        let mut instance_guard = instance_handle.lock();

        let mut review = review_guard.clone();
        let mut inst = instance_guard.clone();
        let outcome = review.submit(disposition, instructions)?;
        inst.apply_review_outcome(actor, outcome)?;
        self.close_if_delivered(&mut inst)?;
        review.revision = review_guard.revision + 1;
        inst.revision = instance_guard.revision + 1;

        *review_guard = review.clone();
        *instance_guard = inst.clone();
        drop(instance_guard);
        drop(review_guard);
        self.tracker.release_open_review(&inst.id, &review.id);

        metrics::counter!("comply_reviews_decided_total", "disposition" => disposition.as_str())
            .increment(1);
        tracing::info!(
            review_id = %review.id,
            instance_id = %inst.id,
            disposition = %disposition,
            score = review.score.unwrap_or(0),
            status = %inst.status,
            "review decided"
        );
        Ok(ReviewDecision {
            review,
            instance: inst,
        })
    }

    // ── Periodic tick ───────────────────────────────────────────────

    /// Materialize the current period of every enrolled service and fire
    /// due reminders.
    ///
    /// The period is chosen by [`current_period`]. A series whose new rule
    /// changed periodicity mid-period is deferred until the new rule's first
    /// full period begins. Configuration gaps are counted and logged, never
    /// fatal.
    pub fn tick(&self, now: Timestamp) -> TickReport {
        let mut report = TickReport::default();
        let today = now.date();

        for enrollment in self.enrollments.active() {
            for service_key in &enrollment.services {
                let active = self.rules.service(service_key).map_or(false, |s| s.active);
                if !active {
                    continue;
                }
                let result = current_period(&self.rules, service_key, &enrollment.jurisdiction, today)
                    .and_then(|period| {
                        period
                            .map(|period| {
                                self.schedule_at(
                                    ScheduleRequest {
                                        service_key: service_key.clone(),
                                        entity_id: enrollment.entity_id.clone(),
                                        jurisdiction: enrollment.jurisdiction.clone(),
                                        period,
                                    },
                                    now,
                                )
                            })
                            .transpose()
                    });
                match result {
                    Ok(Some(Scheduled { instance, created: true })) => report.created.push(instance),
                    Ok(Some(Scheduled { created: false, .. })) => report.existing += 1,
                    Ok(None) => {
                        report.deferred += 1;
                        tracing::info!(
                            service_key = %service_key,
                            entity_id = %enrollment.entity_id,
                            jurisdiction = %enrollment.jurisdiction,
                            "periodicity changed mid-period, waiting for the new rule's first period"
                        );
                    }
                    Err(e) if e.is_configuration_gap() => {
                        report.not_configured += 1;
                        tracing::warn!(
                            service_key = %service_key,
                            entity_id = %enrollment.entity_id,
                            error = %e,
                            "service not yet schedulable, administrator action required"
                        );
                    }
                    Err(e) => {
                        report.failed += 1;
                        tracing::error!(
                            service_key = %service_key,
                            entity_id = %enrollment.entity_id,
                            error = %e,
                            "scheduling failed during tick"
                        );
                    }
                }
            }
        }

        for inst in self.tracker.list() {
            if inst.archived || inst.status.is_sla_settled() {
                self.trigger.forget(&inst.id);
                continue;
            }
            let fired = self.trigger.fire_due(inst.id, &inst.reminders, now);
            report.reminders.merge(fired);
        }

        tracing::info!(
            created = report.created.len(),
            existing = report.existing,
            not_configured = report.not_configured,
            deferred = report.deferred,
            failed = report.failed,
            reminders = report.reminders.dispatched,
            "scheduler tick complete"
        );
        report
    }

    // ── Dashboard ───────────────────────────────────────────────────

    pub fn dashboard(&self, now: Timestamp) -> DashboardStats {
        DashboardStats::compute(&self.tracker.list(), now)
    }

    // ── Hydration ───────────────────────────────────────────────────

    pub fn restore_instance(&self, instance: ObligationInstance) {
        self.tracker.restore(instance);
    }

    pub fn restore_review(&self, review: QualityReview) {
        self.tracker.restore_review(review);
    }
}
