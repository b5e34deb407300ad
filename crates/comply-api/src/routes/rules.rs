//! # Due-Date Rule API
//!
//! Rules form an append-only series per (service, jurisdiction): each new
//! rule must start after the latest one, and rules are deactivated rather
//! than edited. `GET /v1/rules/resolve` answers "which rule governs this
//! date".

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use comply_core::{JurisdictionCode, RuleId, Timestamp};
use comply_rules::{DueDateRule, RulePayload, RulePayloadWire};

use super::{iso, service_key};
use crate::auth::{require_role, CallerIdentity, Role};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_non_blank, Validate};
use crate::state::AppState;

// ── DTOs ────────────────────────────────────────────────────────────────────

/// Request to append a rule to a series.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateRuleRequest {
    pub service_key: String,
    pub jurisdiction: String,
    /// Must be later than every existing rule of the series.
    pub effective_from: NaiveDate,
    /// `{ periodicity, dueDayOfMonth, nudges: { tMinus, fixedDays } }`
    #[schema(value_type = Object)]
    pub payload: serde_json::Value,
}

impl Validate for CreateRuleRequest {
    fn validate(&self) -> Result<(), String> {
        require_non_blank("service_key", &self.service_key)?;
        require_non_blank("jurisdiction", &self.jurisdiction)?;
        if !self.payload.is_object() {
            return Err("payload must be an object".into());
        }
        Ok(())
    }
}

/// A due-date rule.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RuleView {
    pub id: Uuid,
    pub service_key: String,
    pub jurisdiction: String,
    pub effective_from: NaiveDate,
    #[schema(value_type = Object)]
    pub payload: RulePayloadWire,
    pub active: bool,
    pub created_at: String,
}

impl From<&DueDateRule> for RuleView {
    fn from(rule: &DueDateRule) -> Self {
        Self {
            id: rule.id.0,
            service_key: rule.service_key.to_string(),
            jurisdiction: rule.jurisdiction.to_string(),
            effective_from: rule.effective_from,
            payload: RulePayloadWire::from(rule.payload.clone()),
            active: rule.active,
            created_at: iso(&rule.created_at),
        }
    }
}

/// Rule listing filter.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct RuleFilter {
    pub service_key: Option<String>,
    pub jurisdiction: Option<String>,
}

/// Rule resolution query.
#[derive(Debug, Deserialize, IntoParams)]
pub struct ResolveQuery {
    pub service_key: String,
    pub jurisdiction: String,
    /// Defaults to today (UTC).
    pub as_of: Option<NaiveDate>,
}

// ── Router ──────────────────────────────────────────────────────────────────

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/rules", get(list_rules).post(create_rule))
        .route("/v1/rules/resolve", get(resolve_rule))
        .route("/v1/rules/{id}/deactivate", post(deactivate_rule))
}

// ── Handlers ────────────────────────────────────────────────────────────────

/// POST /v1/rules — Append a rule to its series.
#[utoipa::path(
    post,
    path = "/v1/rules",
    request_body = CreateRuleRequest,
    responses(
        (status = 201, description = "Rule stored", body = RuleView),
        (status = 403, description = "Admin role required", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid payload, unknown service or non-increasing effective date", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "rules"
)]
pub async fn create_rule(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateRuleRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<RuleView>), AppError> {
    require_role(&caller, Role::Admin)?;
    let req = extract_validated_json(body)?;
    let wire: RulePayloadWire = serde_json::from_value(req.payload)
        .map_err(|e| AppError::Validation(format!("invalid rule payload: {e}")))?;
    let payload = RulePayload::try_from(wire)?;
    let rule = state.engine.rules().add_rule(
        service_key(&req.service_key)?,
        JurisdictionCode::new(req.jurisdiction)?,
        payload,
        req.effective_from,
    )?;
    if let Err(e) = state.persist_rule(&rule).await {
        state.engine.rules().withdraw_rule(&rule.id);
        return Err(e);
    }
    tracing::info!(
        rule_id = %rule.id,
        service_key = %rule.service_key,
        jurisdiction = %rule.jurisdiction,
        effective_from = %rule.effective_from,
        actor = %caller.actor_id,
        "due-date rule stored"
    );
    Ok((StatusCode::CREATED, Json(RuleView::from(&rule))))
}

/// GET /v1/rules — List rules, optionally narrowed to one series.
#[utoipa::path(
    get,
    path = "/v1/rules",
    params(RuleFilter),
    responses((status = 200, description = "Rules", body = Vec<RuleView>)),
    security(("bearer_auth" = [])),
    tag = "rules"
)]
pub async fn list_rules(
    State(state): State<AppState>,
    Query(filter): Query<RuleFilter>,
) -> Result<Json<Vec<RuleView>>, AppError> {
    let service = filter.service_key.as_deref().map(service_key).transpose()?;
    let jurisdiction = filter
        .jurisdiction
        .map(JurisdictionCode::new)
        .transpose()?;
    let rules = state
        .engine
        .rules()
        .all_rules()
        .into_iter()
        .filter(|r| service.as_ref().map_or(true, |k| &r.service_key == k))
        .filter(|r| jurisdiction.as_ref().map_or(true, |j| &r.jurisdiction == j))
        .map(|r| RuleView::from(&r))
        .collect();
    Ok(Json(rules))
}

/// GET /v1/rules/resolve — The rule governing a date.
#[utoipa::path(
    get,
    path = "/v1/rules/resolve",
    params(ResolveQuery),
    responses(
        (status = 200, description = "Governing rule", body = RuleView),
        (status = 409, description = "No rule in effect (NOT_CONFIGURED)", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "rules"
)]
pub async fn resolve_rule(
    State(state): State<AppState>,
    Query(query): Query<ResolveQuery>,
) -> Result<Json<RuleView>, AppError> {
    let key = service_key(&query.service_key)?;
    let jurisdiction = JurisdictionCode::new(query.jurisdiction)?;
    let as_of = query.as_of.unwrap_or_else(|| Timestamp::now().date());
    let rule = state
        .engine
        .rules()
        .resolve_active_rule(&key, &jurisdiction, as_of)?;
    Ok(Json(RuleView::from(&rule)))
}

/// POST /v1/rules/{id}/deactivate — Stop a rule from governing any date.
#[utoipa::path(
    post,
    path = "/v1/rules/{id}/deactivate",
    params(("id" = Uuid, Path, description = "Rule ID")),
    responses(
        (status = 200, description = "Rule deactivated", body = RuleView),
        (status = 404, description = "Unknown rule", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "rules"
)]
pub async fn deactivate_rule(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<RuleView>, AppError> {
    require_role(&caller, Role::Admin)?;
    let rule = state.engine.rules().deactivate_rule(&RuleId(id))?;
    state.persist_rule(&rule).await?;
    tracing::info!(rule_id = %rule.id, actor = %caller.actor_id, "due-date rule deactivated");
    Ok(Json(RuleView::from(&rule)))
}
