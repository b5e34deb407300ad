//! # Workflow Template API
//!
//! Versioned step definitions per service. New versions start unpublished;
//! publishing makes exactly one version authoritative for new obligations.
//! Instances already materialized keep the version they were created with.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Deserializer, Serialize};
use utoipa::ToSchema;

use comply_workflow::{StepPayload, WorkflowTemplate};

use super::{iso, service_key};
use crate::auth::{require_role, CallerIdentity, Role};
use crate::error::AppError;
use crate::extractors::{extract_json, extract_validated_json, Validate};
use crate::state::AppState;

// ── DTOs ────────────────────────────────────────────────────────────────────

/// Request to store a new template version.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateVersionRequest {
    /// `{ steps: [{key, name, sla_hours?}], checklist: [{category, item, is_mandatory, weight}] }`
    #[schema(value_type = Object)]
    pub payload: StepPayload,
}

/// Request to publish a version.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PublishRequest {
    pub version: u32,
    /// Compare-and-set guard. When present, publishing only happens if the
    /// currently published version equals this value (`null` meaning none
    /// is published yet).
    #[serde(default, deserialize_with = "present")]
    #[schema(value_type = Option<u32>)]
    pub expected_current: Option<Option<u32>>,
}

impl Validate for PublishRequest {
    fn validate(&self) -> Result<(), String> {
        if self.version == 0 {
            return Err("version must be positive".into());
        }
        Ok(())
    }
}

/// Distinguish an explicit `null` from an absent field.
fn present<'de, D>(deserializer: D) -> Result<Option<Option<u32>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<u32>::deserialize(deserializer).map(Some)
}

/// A template version.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TemplateView {
    pub service_key: String,
    pub version: u32,
    pub is_published: bool,
    pub author: String,
    #[schema(value_type = Object)]
    pub payload: StepPayload,
    pub created_at: String,
}

impl From<&WorkflowTemplate> for TemplateView {
    fn from(t: &WorkflowTemplate) -> Self {
        Self {
            service_key: t.service_key.to_string(),
            version: t.version,
            is_published: t.is_published,
            author: t.author.clone(),
            payload: t.payload.clone(),
            created_at: iso(&t.created_at),
        }
    }
}

// ── Router ──────────────────────────────────────────────────────────────────

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/workflows/{service}/versions",
            get(list_versions).post(create_version),
        )
        .route("/v1/workflows/{service}/publish", post(publish_version))
        .route("/v1/workflows/{service}/published", get(get_published))
}

// ── Handlers ────────────────────────────────────────────────────────────────

/// POST /v1/workflows/{service}/versions — Store a new unpublished version.
#[utoipa::path(
    post,
    path = "/v1/workflows/{service}/versions",
    params(("service" = String, Path, description = "Service key")),
    request_body = CreateVersionRequest,
    responses(
        (status = 201, description = "Version stored", body = TemplateView),
        (status = 403, description = "Admin role required", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid step payload or unknown service", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "workflows"
)]
pub async fn create_version(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(service): Path<String>,
    body: Result<Json<CreateVersionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TemplateView>), AppError> {
    require_role(&caller, Role::Admin)?;
    let key = service_key(&service)?;
    let req = extract_json(body)?;
    if state.engine.rules().service(&key).is_none() {
        return Err(AppError::Validation(format!("unknown service {key}")));
    }
    let template = state
        .engine
        .templates()
        .create_version(key.clone(), req.payload, caller.actor_id.clone())?;
    if let Err(e) = state.persist_templates(&key).await {
        state.engine.templates().withdraw_version(&key, template.version);
        return Err(e);
    }
    Ok((StatusCode::CREATED, Json(TemplateView::from(&template))))
}

/// GET /v1/workflows/{service}/versions — All versions, oldest first.
#[utoipa::path(
    get,
    path = "/v1/workflows/{service}/versions",
    params(("service" = String, Path, description = "Service key")),
    responses((status = 200, description = "Versions", body = Vec<TemplateView>)),
    security(("bearer_auth" = [])),
    tag = "workflows"
)]
pub async fn list_versions(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<Vec<TemplateView>>, AppError> {
    let key = service_key(&service)?;
    Ok(Json(
        state
            .engine
            .templates()
            .versions(&key)
            .iter()
            .map(TemplateView::from)
            .collect(),
    ))
}

/// POST /v1/workflows/{service}/publish — Make a version authoritative.
///
/// Publishing the version that is already published succeeds, so a
/// request that failed to persist can be repeated as is.
#[utoipa::path(
    post,
    path = "/v1/workflows/{service}/publish",
    params(("service" = String, Path, description = "Service key")),
    request_body = PublishRequest,
    responses(
        (status = 200, description = "Version published", body = TemplateView),
        (status = 404, description = "Unknown version", body = crate::error::ErrorBody),
        (status = 409, description = "Published version changed concurrently", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "workflows"
)]
pub async fn publish_version(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(service): Path<String>,
    body: Result<Json<PublishRequest>, JsonRejection>,
) -> Result<Json<TemplateView>, AppError> {
    require_role(&caller, Role::Admin)?;
    let key = service_key(&service)?;
    let req = extract_validated_json(body)?;
    let templates = state.engine.templates();
    let template = match req.expected_current {
        Some(expected) => templates.publish_if(&key, req.version, expected)?,
        None => templates.publish(&key, req.version)?,
    };
    state.persist_templates(&key).await?;
    tracing::info!(
        service_key = %key,
        version = template.version,
        actor = %caller.actor_id,
        "workflow version published"
    );
    Ok(Json(TemplateView::from(&template)))
}

/// GET /v1/workflows/{service}/published — The authoritative version.
#[utoipa::path(
    get,
    path = "/v1/workflows/{service}/published",
    params(("service" = String, Path, description = "Service key")),
    responses(
        (status = 200, description = "Published version", body = TemplateView),
        (status = 409, description = "Nothing published (NOT_CONFIGURED)", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "workflows"
)]
pub async fn get_published(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Result<Json<TemplateView>, AppError> {
    let key = service_key(&service)?;
    let template = state.engine.templates().resolve_published(&key)?;
    Ok(Json(TemplateView::from(&template)))
}
