//! # Obligation API
//!
//! Scheduling, listing and the lifecycle of obligation instances:
//!
//! ```text
//! scheduled → in_progress → submitted_for_review → approved → closed
//!                 ↑                 │
//!                 └── reopen ── rejected / rework_required ──(limit)──→ escalated
//! ```
//!
//! Operations staff drive the lifecycle. Clients may read and upload
//! documents for their own entity only, and never mark a document verified.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use comply_core::{EngineError, EntityId, JurisdictionCode, Period};
use comply_engine::{InstanceFilter, ScheduleRequest};
use comply_state::{EscalationAction, ObligationInstance, ObligationStatus, TransitionRecord};

use super::{ensure_entity_access, instance_id, iso, iso_opt, service_key};
use crate::auth::{require_role, CallerIdentity, Role};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_non_blank, Validate};
use crate::state::AppState;

// ── DTOs ────────────────────────────────────────────────────────────────────

/// Request to materialize the obligation of one period.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ScheduleObligationRequest {
    pub service_key: String,
    pub entity_id: String,
    pub jurisdiction: String,
    /// `2025`, `2025-Q1` or `2025-02`, matching the service periodicity.
    pub period: String,
}

impl Validate for ScheduleObligationRequest {
    fn validate(&self) -> Result<(), String> {
        require_non_blank("service_key", &self.service_key)?;
        require_non_blank("entity_id", &self.entity_id)?;
        require_non_blank("jurisdiction", &self.jurisdiction)?;
        require_non_blank("period", &self.period)
    }
}

/// Request to register an uploaded document.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RecordDocumentRequest {
    pub doc_code: String,
    /// Only operations staff may mark a document verified.
    #[serde(default)]
    pub verified: bool,
}

impl Validate for RecordDocumentRequest {
    fn validate(&self) -> Result<(), String> {
        require_non_blank("doc_code", &self.doc_code)
    }
}

/// Administrator decision on an escalated obligation.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ResolveEscalationRequest {
    /// `resume` (back to in_progress, rework count reset) or `close`.
    pub action: String,
    pub reason: String,
}

impl Validate for ResolveEscalationRequest {
    fn validate(&self) -> Result<(), String> {
        parse_action(&self.action)?;
        require_non_blank("reason", &self.reason)
    }
}

fn parse_action(raw: &str) -> Result<EscalationAction, String> {
    match raw {
        "resume" => Ok(EscalationAction::Resume),
        "close" => Ok(EscalationAction::Close),
        other => Err(format!("unknown escalation action {other:?}, expected 'resume' or 'close'")),
    }
}

/// Listing filter. Archived obligations are hidden unless requested.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ObligationQuery {
    pub status: Option<String>,
    pub service_key: Option<String>,
    pub entity_id: Option<String>,
    #[serde(default)]
    pub include_archived: bool,
}

/// One status transition.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TransitionView {
    pub from: String,
    pub to: String,
    pub timestamp: String,
    pub actor: String,
    pub reason: String,
}

impl From<&TransitionRecord> for TransitionView {
    fn from(t: &TransitionRecord) -> Self {
        Self {
            from: t.from.to_string(),
            to: t.to.to_string(),
            timestamp: iso(&t.timestamp),
            actor: t.actor.clone(),
            reason: t.reason.clone(),
        }
    }
}

/// Metadata of a recorded document.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DocumentView {
    pub doc_code: String,
    pub uploaded_at: String,
    pub verified: bool,
}

/// An obligation instance.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ObligationView {
    pub id: Uuid,
    pub service_key: String,
    pub entity_id: String,
    pub jurisdiction: String,
    pub period: String,
    pub due_date: NaiveDate,
    /// Reminder instants, ascending.
    pub reminders: Vec<String>,
    pub rule_id: Uuid,
    pub template_version: u32,
    pub status: String,
    pub current_step: Option<String>,
    pub passed_steps: Vec<String>,
    pub sla_deadline: String,
    pub sla_breached: bool,
    pub quality_score: Option<u8>,
    pub review_id: Option<Uuid>,
    pub rework_count: u32,
    pub rework_instructions: Option<String>,
    pub archived: bool,
    pub created_at: String,
    pub updated_at: String,
    pub submitted_at: Option<String>,
    pub approved_at: Option<String>,
    pub closed_at: Option<String>,
    pub transitions: Vec<TransitionView>,
    pub documents: Vec<DocumentView>,
}

impl ObligationView {
    pub(crate) fn build(state: &AppState, inst: &ObligationInstance) -> Self {
        let documents = state
            .engine
            .documents()
            .documents_for(&inst.id)
            .into_iter()
            .map(|(doc_code, meta)| DocumentView {
                doc_code,
                uploaded_at: iso(&meta.uploaded_at),
                verified: meta.verified,
            })
            .collect();
        Self {
            id: inst.id.0,
            service_key: inst.service_key.to_string(),
            entity_id: inst.entity_id.to_string(),
            jurisdiction: inst.jurisdiction.to_string(),
            period: inst.period.to_string(),
            due_date: inst.due_date,
            reminders: inst.reminders.iter().map(iso).collect(),
            rule_id: inst.rule.id.0,
            template_version: inst.template.version,
            status: inst.status.to_string(),
            current_step: inst.current_step.clone(),
            passed_steps: inst.passed_steps.clone(),
            sla_deadline: iso(&inst.sla_deadline),
            sla_breached: inst.sla_breached(comply_core::Timestamp::now()),
            quality_score: inst.quality_score,
            review_id: inst.review_id.map(|r| r.0),
            rework_count: inst.rework_count,
            rework_instructions: inst.rework_instructions.clone(),
            archived: inst.archived,
            created_at: iso(&inst.created_at),
            updated_at: iso(&inst.updated_at),
            submitted_at: iso_opt(&inst.submitted_at),
            approved_at: iso_opt(&inst.approved_at),
            closed_at: iso_opt(&inst.closed_at),
            transitions: inst.transitions.iter().map(TransitionView::from).collect(),
            documents,
        }
    }
}

// ── Router ──────────────────────────────────────────────────────────────────

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/obligations/schedule", post(schedule_obligation))
        .route("/v1/obligations", get(list_obligations))
        .route("/v1/obligations/{id}", get(get_obligation))
        .route("/v1/obligations/{id}/start", post(start_obligation))
        .route("/v1/obligations/{id}/complete-step", post(complete_step))
        .route("/v1/obligations/{id}/submit", post(submit_obligation))
        .route("/v1/obligations/{id}/reopen", post(reopen_obligation))
        .route("/v1/obligations/{id}/documents", post(record_document))
        .route("/v1/obligations/{id}/escalation", post(resolve_escalation))
        .route("/v1/escalations", get(list_escalations))
}

// ── Handlers ────────────────────────────────────────────────────────────────

/// POST /v1/obligations/schedule — Materialize (or fetch) an obligation.
///
/// Idempotent per (service, entity, period): 201 when created, 200 with
/// the existing instance otherwise.
#[utoipa::path(
    post,
    path = "/v1/obligations/schedule",
    request_body = ScheduleObligationRequest,
    responses(
        (status = 201, description = "Obligation materialized", body = ObligationView),
        (status = 200, description = "Obligation already existed", body = ObligationView),
        (status = 409, description = "No rule or published template (NOT_CONFIGURED)", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid period or inactive service", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "obligations"
)]
pub async fn schedule_obligation(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<ScheduleObligationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ObligationView>), AppError> {
    require_role(&caller, Role::Operations)?;
    let req = extract_validated_json(body)?;
    let scheduled = state.engine.schedule(ScheduleRequest {
        service_key: service_key(&req.service_key)?,
        entity_id: EntityId::new(req.entity_id)?,
        jurisdiction: JurisdictionCode::new(req.jurisdiction)?,
        period: Period::parse(&req.period)?,
    })?;
    // An existing instance is written again: its first write may have failed.
    state.persist_instance(&scheduled.instance).await?;
    let status = if scheduled.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(ObligationView::build(&state, &scheduled.instance))))
}

/// GET /v1/obligations — List obligations.
#[utoipa::path(
    get,
    path = "/v1/obligations",
    params(ObligationQuery),
    responses((status = 200, description = "Obligations ordered by due date", body = Vec<ObligationView>)),
    security(("bearer_auth" = [])),
    tag = "obligations"
)]
pub async fn list_obligations(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(query): Query<ObligationQuery>,
) -> Result<Json<Vec<ObligationView>>, AppError> {
    let mut entity_id = query.entity_id.map(EntityId::new).transpose()?;
    if caller.role == Role::Client {
        match &entity_id {
            Some(id) => ensure_entity_access(&caller, id)?,
            None => entity_id = Some(EntityId::new(caller.actor_id.clone())?),
        }
    }
    let filter = InstanceFilter {
        status: query
            .status
            .as_deref()
            .map(str::parse::<ObligationStatus>)
            .transpose()?,
        service_key: query.service_key.as_deref().map(service_key).transpose()?,
        entity_id,
        include_archived: query.include_archived,
    };
    Ok(Json(
        state
            .engine
            .instances(&filter)
            .iter()
            .map(|inst| ObligationView::build(&state, inst))
            .collect(),
    ))
}

/// GET /v1/obligations/{id} — Fetch one obligation.
#[utoipa::path(
    get,
    path = "/v1/obligations/{id}",
    params(("id" = Uuid, Path, description = "Obligation ID")),
    responses(
        (status = 200, description = "Obligation found", body = ObligationView),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "obligations"
)]
pub async fn get_obligation(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<ObligationView>, AppError> {
    let inst = state.engine.instance(&instance_id(id))?;
    ensure_entity_access(&caller, &inst.entity_id)?;
    Ok(Json(ObligationView::build(&state, &inst)))
}

/// POST /v1/obligations/{id}/start — Begin work on a scheduled obligation.
#[utoipa::path(
    post,
    path = "/v1/obligations/{id}/start",
    params(("id" = Uuid, Path, description = "Obligation ID")),
    responses(
        (status = 200, description = "Obligation in progress", body = ObligationView),
        (status = 409, description = "Invalid transition", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "obligations"
)]
pub async fn start_obligation(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<ObligationView>, AppError> {
    require_role(&caller, Role::Operations)?;
    let inst = state.engine.start(&instance_id(id), &caller.actor_id)?;
    persisted(&state, inst).await
}

/// POST /v1/obligations/{id}/complete-step — Advance to the next step.
#[utoipa::path(
    post,
    path = "/v1/obligations/{id}/complete-step",
    params(("id" = Uuid, Path, description = "Obligation ID")),
    responses(
        (status = 200, description = "Step completed", body = ObligationView),
        (status = 409, description = "Not in progress or no step left", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "obligations"
)]
pub async fn complete_step(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<ObligationView>, AppError> {
    require_role(&caller, Role::Operations)?;
    let inst = state.engine.complete_step(&instance_id(id), &caller.actor_id)?;
    persisted(&state, inst).await
}

/// POST /v1/obligations/{id}/submit — Submit for quality review.
#[utoipa::path(
    post,
    path = "/v1/obligations/{id}/submit",
    params(("id" = Uuid, Path, description = "Obligation ID")),
    responses(
        (status = 200, description = "Submitted for review", body = ObligationView),
        (status = 409, description = "Invalid transition", body = crate::error::ErrorBody),
        (status = 422, description = "Mandatory documents missing (INCOMPLETE_DOCUMENTS)", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "obligations"
)]
pub async fn submit_obligation(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<ObligationView>, AppError> {
    require_role(&caller, Role::Operations)?;
    let inst = state.engine.submit_for_review(&instance_id(id), &caller.actor_id)?;
    persisted(&state, inst).await
}

/// POST /v1/obligations/{id}/reopen — Return rejected or rework work to progress.
///
/// When the rework limit is reached the obligation is escalated and
/// persisted, and the response is `ESCALATION_REQUIRED`.
#[utoipa::path(
    post,
    path = "/v1/obligations/{id}/reopen",
    params(("id" = Uuid, Path, description = "Obligation ID")),
    responses(
        (status = 200, description = "Obligation back in progress", body = ObligationView),
        (status = 409, description = "Invalid transition, or escalated (ESCALATION_REQUIRED)", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "obligations"
)]
pub async fn reopen_obligation(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<ObligationView>, AppError> {
    require_role(&caller, Role::Operations)?;
    let id = instance_id(id);
    match state.engine.reopen(&id, &caller.actor_id) {
        Ok(inst) => persisted(&state, inst).await,
        Err(err @ EngineError::EscalationRequired { .. }) => {
            let inst = state.engine.instance(&id)?;
            state.persist_instance(&inst).await?;
            Err(err.into())
        }
        Err(err) => Err(err.into()),
    }
}

/// POST /v1/obligations/{id}/documents — Register an uploaded document.
///
/// Recording the last mandatory deliverable of an approved obligation
/// closes it.
#[utoipa::path(
    post,
    path = "/v1/obligations/{id}/documents",
    params(("id" = Uuid, Path, description = "Obligation ID")),
    request_body = RecordDocumentRequest,
    responses(
        (status = 200, description = "Document recorded", body = ObligationView),
        (status = 403, description = "Client may not record this document", body = crate::error::ErrorBody),
        (status = 409, description = "Obligation closed", body = crate::error::ErrorBody),
        (status = 422, description = "Unknown doc type", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "obligations"
)]
pub async fn record_document(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<RecordDocumentRequest>, JsonRejection>,
) -> Result<Json<ObligationView>, AppError> {
    let id = instance_id(id);
    let req = extract_validated_json(body)?;
    let current = state.engine.instance(&id)?;
    ensure_entity_access(&caller, &current.entity_id)?;
    if !caller.has_role(Role::Operations) {
        authorize_client_upload(&state, &current, &req)?;
    }
    let inst = state
        .engine
        .record_document(&id, &req.doc_code, req.verified, &caller.actor_id)?;
    let document = state.persist_document(&id, &req.doc_code).await;
    let view = persisted(&state, inst).await?;
    document?;
    Ok(view)
}

fn authorize_client_upload(
    state: &AppState,
    inst: &ObligationInstance,
    req: &RecordDocumentRequest,
) -> Result<(), AppError> {
    if req.verified {
        return Err(AppError::Forbidden("clients may not mark documents verified".into()));
    }
    let client_uploads = state
        .engine
        .rules()
        .doc_type(&inst.service_key, &req.doc_code)
        .map_or(true, |doc| doc.flags.client_uploads);
    if !client_uploads {
        return Err(AppError::Forbidden(format!(
            "doc type {} is not uploaded by clients",
            req.doc_code
        )));
    }
    Ok(())
}

/// POST /v1/obligations/{id}/escalation — Resolve an escalated obligation.
#[utoipa::path(
    post,
    path = "/v1/obligations/{id}/escalation",
    params(("id" = Uuid, Path, description = "Obligation ID")),
    request_body = ResolveEscalationRequest,
    responses(
        (status = 200, description = "Escalation resolved", body = ObligationView),
        (status = 403, description = "Admin role required", body = crate::error::ErrorBody),
        (status = 409, description = "Obligation not escalated", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "obligations"
)]
pub async fn resolve_escalation(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<ResolveEscalationRequest>, JsonRejection>,
) -> Result<Json<ObligationView>, AppError> {
    require_role(&caller, Role::Admin)?;
    let req = extract_validated_json(body)?;
    let action = parse_action(&req.action).map_err(AppError::Validation)?;
    let inst = state
        .engine
        .resolve_escalation(&instance_id(id), &caller.actor_id, action, &req.reason)?;
    persisted(&state, inst).await
}

/// GET /v1/escalations — The escalation queue.
#[utoipa::path(
    get,
    path = "/v1/escalations",
    responses((status = 200, description = "Escalated obligations", body = Vec<ObligationView>)),
    security(("bearer_auth" = [])),
    tag = "obligations"
)]
pub async fn list_escalations(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<Vec<ObligationView>>, AppError> {
    require_role(&caller, Role::Operations)?;
    Ok(Json(
        state
            .engine
            .escalations()
            .iter()
            .map(|inst| ObligationView::build(&state, inst))
            .collect(),
    ))
}

async fn persisted(state: &AppState, inst: ObligationInstance) -> Result<Json<ObligationView>, AppError> {
    state.persist_instance(&inst).await?;
    Ok(Json(ObligationView::build(state, &inst)))
}
