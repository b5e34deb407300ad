//! End-to-end engine scenarios: scheduling, document gates, reviews,
//! escalation, the periodic tick and dashboard statistics.

use std::sync::Arc;

use chrono::NaiveDate;

use comply_core::{
    EngineError, EntityId, JurisdictionCode, Period, Periodicity, ServiceKey, Timestamp,
    ValidationError,
};
use comply_engine::{
    ComplianceEngine, EngineConfig, InMemoryDocumentStore, InstanceFilter, RecordingDispatcher,
    ScheduleRequest,
};
use comply_review::{ChecklistItem, ItemStatus};
use comply_rules::{DocType, DocTypeFlags, Nudges, RulePayload, RuleSchedule, ServiceDefinition};
use comply_state::{Disposition, EscalationAction, ObligationInstance, ObligationStatus};
use comply_workflow::{ChecklistSeed, StepDefinition, StepPayload};

// ── Fixtures ─────────────────────────────────────────────────────────

const GST: &str = "gst-monthly";
const ROC: &str = "roc-annual";

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn ts(s: &str) -> Timestamp {
    Timestamp::parse(s).unwrap()
}

fn key(k: &str) -> ServiceKey {
    ServiceKey::new(k).unwrap()
}

fn jur() -> JurisdictionCode {
    JurisdictionCode::new("IN-KA").unwrap()
}

fn entity(e: &str) -> EntityId {
    EntityId::new(e).unwrap()
}

fn doc(service: &str, code: &str, deliverable: bool) -> DocType {
    DocType::new(
        key(service),
        code,
        code.to_uppercase(),
        DocTypeFlags {
            client_uploads: !deliverable,
            is_deliverable: deliverable,
            mandatory: true,
        },
        None,
    )
    .unwrap()
}

fn template() -> StepPayload {
    StepPayload {
        steps: vec![
            StepDefinition {
                key: "collect".into(),
                name: "Collect documents".into(),
                sla_hours: Some(72),
            },
            StepDefinition {
                key: "file".into(),
                name: "File return".into(),
                sla_hours: None,
            },
        ],
        checklist: vec![
            ChecklistSeed {
                category: "accuracy".into(),
                item: "Totals reconcile".into(),
                is_mandatory: true,
                weight: 6,
            },
            ChecklistSeed {
                category: "presentation".into(),
                item: "Cover note attached".into(),
                is_mandatory: false,
                weight: 4,
            },
        ],
    }
}

fn configure(engine: &ComplianceEngine, service: &str, schedule: RuleSchedule, docs: Vec<DocType>) {
    let periodicity = RulePayload {
        schedule,
        nudges: Nudges::default(),
    }
    .periodicity();
    engine
        .rules()
        .register_service(ServiceDefinition::new(key(service), service, periodicity, "tax").unwrap())
        .unwrap();
    for d in docs {
        engine.rules().add_doc_type(d).unwrap();
    }
    engine
        .rules()
        .add_rule(
            key(service),
            jur(),
            RulePayload {
                schedule,
                nudges: Nudges {
                    t_minus: vec![7, 3, 1],
                    fixed_days: vec![1, 2],
                },
            },
            date(2025, 1, 1),
        )
        .unwrap();
    let v = engine
        .templates()
        .create_version(key(service), template(), "admin-1")
        .unwrap();
    engine.templates().publish(&key(service), v.version).unwrap();
}

/// GST: two mandatory uploads and one mandatory deliverable.
/// ROC: no doc types at all.
fn setup_with(dispatcher: RecordingDispatcher) -> ComplianceEngine {
    let engine = ComplianceEngine::new(
        EngineConfig::default(),
        Arc::new(InMemoryDocumentStore::new()),
        Arc::new(dispatcher),
    );
    configure(
        &engine,
        GST,
        RuleSchedule::Monthly { due_day: 20 },
        vec![doc(GST, "doc1", false), doc(GST, "doc2", false), doc(GST, "ack", true)],
    );
    configure(&engine, ROC, RuleSchedule::Annual { due_day: 28 }, vec![]);
    engine
}

fn setup() -> ComplianceEngine {
    setup_with(RecordingDispatcher::new())
}

fn request(service: &str, who: &str, period: &str) -> ScheduleRequest {
    ScheduleRequest {
        service_key: key(service),
        entity_id: entity(who),
        jurisdiction: jur(),
        period: Period::parse(period).unwrap(),
    }
}

/// A GST instance in a far-future period, submitted for review.
fn submitted_gst(engine: &ComplianceEngine, who: &str) -> ObligationInstance {
    let inst = engine.schedule(request(GST, who, "2099-02")).unwrap().instance;
    engine.start(&inst.id, "ops-1").unwrap();
    engine.record_document(&inst.id, "doc1", true, "client-1").unwrap();
    engine.record_document(&inst.id, "doc2", true, "client-1").unwrap();
    engine.submit_for_review(&inst.id, "ops-1").unwrap()
}

fn submitted_roc(engine: &ComplianceEngine, who: &str) -> ObligationInstance {
    let inst = engine.schedule(request(ROC, who, "2099")).unwrap().instance;
    engine.start(&inst.id, "ops-1").unwrap();
    engine.submit_for_review(&inst.id, "ops-1").unwrap()
}

// ── Scheduling ───────────────────────────────────────────────────────

#[test]
fn schedules_monthly_obligation_with_reminders() {
    let engine = setup();
    let scheduled = engine
        .schedule_at(request(GST, "acme", "2025-02"), ts("2025-01-01T00:00:00Z"))
        .unwrap();
    assert!(scheduled.created);
    let inst = scheduled.instance;
    assert_eq!(inst.due_date, date(2025, 2, 20));
    assert_eq!(inst.status, ObligationStatus::Scheduled);
    let reminders: Vec<NaiveDate> = inst.reminders.iter().map(|r| r.date()).collect();
    assert_eq!(
        reminders,
        vec![
            date(2025, 2, 1),
            date(2025, 2, 2),
            date(2025, 2, 13),
            date(2025, 2, 17),
            date(2025, 2, 19),
        ]
    );
    assert_eq!(inst.template.version, 1);
    assert_eq!(inst.sla_deadline, ts("2025-02-20T23:59:59Z"));
}

#[test]
fn scheduling_is_idempotent() {
    let engine = setup();
    let first = engine.schedule(request(GST, "acme", "2099-03")).unwrap();
    let second = engine.schedule(request(GST, "acme", "2099-03")).unwrap();
    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.instance.id, second.instance.id);
    assert_eq!(engine.instances(&InstanceFilter::default()).len(), 1);
}

#[test]
fn concurrent_scheduling_creates_one_instance() {
    let engine = setup();
    let handles: Vec<_> = (0..16)
        .map(|_| {
            let engine = engine.clone();
            std::thread::spawn(move || engine.schedule(request(GST, "acme", "2099-04")).unwrap())
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|s| s.created).count(), 1);
    let first = results[0].instance.id;
    assert!(results.iter().all(|s| s.instance.id == first));
    assert_eq!(engine.instances(&InstanceFilter::default()).len(), 1);
}

#[test]
fn missing_template_blocks_creation() {
    let engine = setup();
    engine
        .rules()
        .register_service(
            ServiceDefinition::new(key("tds-quarterly"), "TDS", Periodicity::Quarterly, "tax").unwrap(),
        )
        .unwrap();
    engine
        .rules()
        .add_rule(
            key("tds-quarterly"),
            jur(),
            RulePayload {
                schedule: RuleSchedule::Quarterly { due_day: 15 },
                nudges: Nudges::default(),
            },
            date(2025, 1, 1),
        )
        .unwrap();
    let err = engine
        .schedule(request("tds-quarterly", "acme", "2099-Q1"))
        .unwrap_err();
    assert!(matches!(err, EngineError::NoPublishedTemplate { .. }));
    assert!(engine.instances(&InstanceFilter::default()).is_empty());
}

#[test]
fn period_shape_follows_rule() {
    let engine = setup();
    let err = engine.schedule(request(GST, "acme", "2099-Q1")).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::PeriodMismatch { .. })
    ));
}

#[test]
fn inactive_service_not_schedulable() {
    let engine = setup();
    engine.rules().deactivate_service(&key(GST)).unwrap();
    let err = engine.schedule(request(GST, "acme", "2099-02")).unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::InactiveService(_))
    ));
}

// ── Document gates ───────────────────────────────────────────────────

#[test]
fn submission_reports_missing_documents() {
    let engine = setup();
    let inst = engine.schedule(request(GST, "acme", "2099-02")).unwrap().instance;
    engine.start(&inst.id, "ops-1").unwrap();
    engine.record_document(&inst.id, "doc1", false, "client-1").unwrap();

    let err = engine.submit_for_review(&inst.id, "ops-1").unwrap_err();
    assert_eq!(
        err,
        EngineError::IncompleteDocuments {
            missing: vec!["doc2".into()]
        }
    );
    assert_eq!(engine.instance(&inst.id).unwrap().status, ObligationStatus::InProgress);
}

#[test]
fn unknown_doc_code_rejected() {
    let engine = setup();
    let inst = engine.schedule(request(GST, "acme", "2099-02")).unwrap().instance;
    let err = engine
        .record_document(&inst.id, "passport", true, "client-1")
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::UnknownDocType { .. })
    ));
}

// ── Reviews ──────────────────────────────────────────────────────────

#[test]
fn review_seeds_checklist_from_template() {
    let engine = setup();
    let inst = submitted_gst(&engine, "acme");
    let review = engine.open_review(&inst.id, "rev-1", None).unwrap();
    assert_eq!(review.items.len(), 2);
    assert!(review.items.iter().all(|i| i.status == ItemStatus::Pending));

    let second = engine.open_review(&inst.id, "rev-2", None).unwrap_err();
    assert!(matches!(second, EngineError::Conflict(_)));
}

#[test]
fn review_requires_submitted_instance() {
    let engine = setup();
    let inst = engine.schedule(request(GST, "acme", "2099-02")).unwrap().instance;
    assert!(matches!(
        engine.open_review(&inst.id, "rev-1", None),
        Err(EngineError::Conflict(_))
    ));
}

#[test]
fn blocked_approval_leaves_everything_unchanged() {
    let engine = setup();
    let inst = submitted_gst(&engine, "acme");
    let review = engine.open_review(&inst.id, "rev-1", None).unwrap();
    engine.set_review_item(&review.id, 0, ItemStatus::Failed).unwrap();

    let err = engine
        .submit_review(&review.id, Disposition::Approved, None, "rev-1")
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::ApprovalBlocked {
            failed: vec!["Totals reconcile".into()]
        }
    );
    assert!(engine.review(&review.id).unwrap().is_open());
    assert_eq!(
        engine.instance(&inst.id).unwrap().status,
        ObligationStatus::SubmittedForReview
    );
}

#[test]
fn approval_waits_for_deliverable_then_closes() {
    let engine = setup();
    let inst = submitted_gst(&engine, "acme");
    let review = engine.open_review(&inst.id, "rev-1", None).unwrap();
    engine.set_review_item(&review.id, 0, ItemStatus::Passed).unwrap();
    engine.set_review_item(&review.id, 1, ItemStatus::Failed).unwrap();

    let decision = engine
        .submit_review(&review.id, Disposition::Approved, None, "rev-1")
        .unwrap();
    assert_eq!(decision.review.score, Some(60));
    assert_eq!(decision.instance.status, ObligationStatus::Approved);
    assert_eq!(decision.instance.quality_score, Some(60));

    let closed = engine.record_document(&inst.id, "ack", true, "ops-1").unwrap();
    assert_eq!(closed.status, ObligationStatus::Closed);
    assert!(closed.archived);
    assert!(engine.instances(&InstanceFilter::default()).is_empty());
    let all = engine.instances(&InstanceFilter {
        include_archived: true,
        ..Default::default()
    });
    assert_eq!(all.len(), 1);
}

#[test]
fn approval_without_deliverables_closes_immediately() {
    let engine = setup();
    let inst = submitted_roc(&engine, "acme");
    let review = engine
        .open_review(
            &inst.id,
            "rev-1",
            Some(vec![ChecklistItem {
                category: "filing".into(),
                item: "Form filed".into(),
                status: ItemStatus::Passed,
                is_mandatory: true,
                weight: 10,
            }]),
        )
        .unwrap();
    let decision = engine
        .submit_review(&review.id, Disposition::Approved, None, "rev-1")
        .unwrap();
    assert_eq!(decision.instance.status, ObligationStatus::Closed);
    assert_eq!(decision.review.score, Some(100));
}

#[test]
fn rework_cycles_escalate_at_limit() {
    let engine = setup();
    let inst = submitted_roc(&engine, "acme");

    for cycle in 1..=3u32 {
        let review = engine.open_review(&inst.id, "rev-1", None).unwrap();
        let decision = engine
            .submit_review(
                &review.id,
                Disposition::ReworkRequired,
                Some(format!("cycle {cycle}")),
                "rev-1",
            )
            .unwrap();
        assert_eq!(
            decision.instance.rework_instructions.as_deref(),
            Some(format!("cycle {cycle}").as_str())
        );
        let reopened = engine.reopen(&inst.id, "ops-1").unwrap();
        assert_eq!(reopened.rework_count, cycle);
        engine.submit_for_review(&inst.id, "ops-1").unwrap();
    }

    let review = engine.open_review(&inst.id, "rev-1", None).unwrap();
    engine
        .submit_review(&review.id, Disposition::Rejected, None, "rev-1")
        .unwrap();
    let err = engine.reopen(&inst.id, "ops-1").unwrap_err();
    assert_eq!(
        err,
        EngineError::EscalationRequired {
            instance_id: inst.id,
            rework_count: 3
        }
    );
    assert_eq!(engine.instance(&inst.id).unwrap().status, ObligationStatus::Escalated);
    assert_eq!(engine.escalations().len(), 1);

    let resumed = engine
        .resolve_escalation(&inst.id, "admin-1", EscalationAction::Resume, "granted extra cycle")
        .unwrap();
    assert_eq!(resumed.status, ObligationStatus::InProgress);
    assert_eq!(resumed.rework_count, 0);
    assert!(engine.escalations().is_empty());
}

// ── Tick ─────────────────────────────────────────────────────────────

#[test]
fn tick_materializes_enrolled_services_and_fires_reminders() {
    let recorder = RecordingDispatcher::new();
    let engine = setup_with(recorder.clone());
    engine.enroll(entity("acme"), jur(), vec![key(GST)]).unwrap();

    let first = engine.tick(ts("2025-02-15T10:00:00Z"));
    assert_eq!(first.created.len(), 1);
    assert_eq!(first.created[0].period, Period::parse("2025-02").unwrap());
    assert_eq!(first.reminders.dispatched, 0);

    let second = engine.tick(ts("2025-02-18T00:00:00Z"));
    assert!(second.created.is_empty());
    assert_eq!(second.existing, 1);
    assert_eq!(second.reminders.dispatched, 1);

    let third = engine.tick(ts("2025-02-18T00:05:00Z"));
    assert_eq!(third.reminders.dispatched, 0);
    assert_eq!(recorder.sent().len(), 1);
    assert_eq!(recorder.sent()[0].fires_at, ts("2025-02-17T09:00:00Z"));
}

#[test]
fn tick_retries_failed_reminders() {
    let recorder = RecordingDispatcher::new();
    let engine = setup_with(recorder.clone());
    engine.enroll(entity("acme"), jur(), vec![key(GST)]).unwrap();
    engine.tick(ts("2025-02-15T10:00:00Z"));

    recorder.set_failing(true);
    let failed = engine.tick(ts("2025-02-18T00:00:00Z"));
    assert_eq!(failed.reminders.failed, 1);

    recorder.set_failing(false);
    let retried = engine.tick(ts("2025-02-18T00:05:00Z"));
    assert_eq!(retried.reminders.dispatched, 1);
}

#[test]
fn tick_counts_configuration_gaps() {
    let engine = setup();
    engine.enroll(entity("acme"), jur(), vec![key(GST)]).unwrap();
    // No rule is in force before 2025-01-01.
    let report = engine.tick(ts("2024-06-01T12:00:00Z"));
    assert_eq!(report.not_configured, 1);
    assert!(report.created.is_empty());
}

#[test]
fn tick_waits_out_mid_period_periodicity_change() {
    let engine = setup();
    engine
        .rules()
        .add_rule(
            key(GST),
            jur(),
            RulePayload {
                schedule: RuleSchedule::Quarterly { due_day: 15 },
                nudges: Nudges::default(),
            },
            date(2025, 2, 10),
        )
        .unwrap();
    engine.enroll(entity("acme"), jur(), vec![key(GST)]).unwrap();

    // February began under the monthly rule and is still filed monthly.
    let feb = engine.tick(ts("2025-02-20T10:00:00Z"));
    assert_eq!(feb.failed, 0);
    assert_eq!(feb.created.len(), 1);
    assert_eq!(feb.created[0].period, Period::parse("2025-02").unwrap());

    let march = engine.tick(ts("2025-03-05T10:00:00Z"));
    assert_eq!(march.failed, 0);
    assert_eq!(march.deferred, 1);
    assert!(march.created.is_empty());

    let april = engine.tick(ts("2025-04-02T10:00:00Z"));
    assert_eq!(april.failed, 0);
    assert_eq!(april.created.len(), 1);
    assert_eq!(april.created[0].period, Period::parse("2025-Q2").unwrap());
    assert_eq!(april.created[0].due_date, date(2025, 6, 15));
}

#[test]
fn tick_forgets_reminders_of_settled_instances() {
    let recorder = RecordingDispatcher::new();
    let engine = setup_with(recorder.clone());
    engine.enroll(entity("acme"), jur(), vec![key(GST)]).unwrap();
    let inst = engine.tick(ts("2025-02-15T10:00:00Z")).created[0].clone();

    let fired = engine.tick(ts("2025-02-18T00:00:00Z"));
    assert_eq!(fired.reminders.delivered, vec![(inst.id, ts("2025-02-17T09:00:00Z"))]);
    assert_eq!(engine.trigger().tracked_instances(), 1);

    engine.start(&inst.id, "ops-1").unwrap();
    engine.record_document(&inst.id, "doc1", true, "client-1").unwrap();
    engine.record_document(&inst.id, "doc2", true, "client-1").unwrap();
    engine.submit_for_review(&inst.id, "ops-1").unwrap();
    let review = engine.open_review(&inst.id, "rev-1", None).unwrap();
    engine.set_review_item(&review.id, 0, ItemStatus::Passed).unwrap();
    engine
        .submit_review(&review.id, Disposition::Approved, None, "rev-1")
        .unwrap();

    let after = engine.tick(ts("2025-02-19T10:00:00Z"));
    assert_eq!(after.reminders.dispatched, 0);
    assert_eq!(engine.trigger().tracked_instances(), 0);
    assert_eq!(recorder.sent().len(), 1);
}

#[test]
fn enroll_requires_known_services() {
    let engine = setup();
    let err = engine
        .enroll(entity("acme"), jur(), vec![key("unknown-svc")])
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Validation(ValidationError::UnknownService(_))
    ));
}

#[test]
fn revisions_increase_with_every_commit() {
    let engine = setup();
    let inst = engine.schedule(request(GST, "acme", "2099-05")).unwrap().instance;
    assert_eq!(inst.revision, 1);
    assert_eq!(engine.start(&inst.id, "ops-1").unwrap().revision, 2);
    // A rejected guard commits nothing.
    assert!(engine.start(&inst.id, "ops-1").is_err());
    assert_eq!(engine.instance(&inst.id).unwrap().revision, 2);

    let submitted = submitted_roc(&engine, "acme");
    let review = engine.open_review(&submitted.id, "rev-1", None).unwrap();
    assert_eq!(review.revision, 1);
    let decision = engine
        .submit_review(&review.id, Disposition::Rejected, None, "rev-1")
        .unwrap();
    assert_eq!(decision.review.revision, 2);
    assert_eq!(decision.instance.revision, submitted.revision + 1);
}

#[test]
fn concurrent_reviews_across_instances_complete() {
    let engine = setup();
    let instances: Vec<ObligationInstance> = (0..8)
        .map(|i| submitted_roc(&engine, &format!("entity-{i}")))
        .collect();
    let handles: Vec<_> = instances
        .iter()
        .map(|inst| {
            let engine = engine.clone();
            let id = inst.id;
            std::thread::spawn(move || {
                let review = engine
                    .open_review(
                        &id,
                        "rev-1",
                        Some(vec![ChecklistItem {
                            category: "filing".into(),
                            item: "Form filed".into(),
                            status: ItemStatus::Passed,
                            is_mandatory: true,
                            weight: 10,
                        }]),
                    )
                    .unwrap();
                let _ = engine.reviews_for(&id);
                engine
                    .submit_review(&review.id, Disposition::Approved, None, "rev-1")
                    .unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap().instance.status, ObligationStatus::Closed);
    }
    for inst in &instances {
        assert!(engine.reviews_for(&inst.id).iter().all(|r| !r.is_open()));
    }
}

// ── Dashboard ────────────────────────────────────────────────────────

#[test]
fn dashboard_aggregates() {
    let engine = setup();
    let approved = submitted_roc(&engine, "acme");
    let review = engine.open_review(&approved.id, "rev-1", None).unwrap();
    engine
        .submit_review(&review.id, Disposition::Approved, None, "rev-1")
        .unwrap();
    // Past due and untouched.
    engine.schedule(request(GST, "globex", "2025-03")).unwrap();

    let stats = engine.dashboard(Timestamp::now());
    assert_eq!(stats.total, 2);
    assert_eq!(stats.by_status["closed"], 1);
    assert_eq!(stats.by_status["scheduled"], 1);
    assert_eq!(stats.by_status["escalated"], 0);
    assert_eq!(stats.sla_breaches, 1);
    assert_eq!(stats.sla_compliance_percent, Some(100.0));
    assert!(stats.average_review_seconds.is_some());
}
