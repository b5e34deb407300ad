//! # Enrollment API
//!
//! Declares which services an entity subscribes to. The periodic tick
//! materializes the current period of every enrolled service.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use comply_core::{EntityId, JurisdictionCode};
use comply_engine::Enrollment;

use super::{ensure_entity_access, iso, service_key};
use crate::auth::{require_role, CallerIdentity, Role};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_non_blank, Validate};
use crate::state::AppState;

/// Request to enroll an entity. Replaces any previous enrollment.
#[derive(Debug, Deserialize, ToSchema)]
pub struct EnrollRequest {
    pub entity_id: String,
    pub jurisdiction: String,
    /// Service keys the entity subscribes to.
    pub services: Vec<String>,
}

impl Validate for EnrollRequest {
    fn validate(&self) -> Result<(), String> {
        require_non_blank("entity_id", &self.entity_id)?;
        require_non_blank("jurisdiction", &self.jurisdiction)?;
        if self.services.is_empty() {
            return Err("services must not be empty".into());
        }
        Ok(())
    }
}

/// An entity's enrollment.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EnrollmentView {
    pub entity_id: String,
    pub jurisdiction: String,
    pub services: Vec<String>,
    pub active: bool,
    pub updated_at: String,
}

impl From<&Enrollment> for EnrollmentView {
    fn from(e: &Enrollment) -> Self {
        Self {
            entity_id: e.entity_id.to_string(),
            jurisdiction: e.jurisdiction.to_string(),
            services: e.services.iter().map(ToString::to_string).collect(),
            active: e.active,
            updated_at: iso(&e.updated_at),
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/enrollments", post(enroll))
        .route("/v1/enrollments/{entity_id}", get(get_enrollment))
}

/// POST /v1/enrollments — Enroll an entity in services.
#[utoipa::path(
    post,
    path = "/v1/enrollments",
    request_body = EnrollRequest,
    responses(
        (status = 200, description = "Enrollment stored", body = EnrollmentView),
        (status = 403, description = "Operations role required", body = crate::error::ErrorBody),
        (status = 422, description = "Unknown service or invalid identifiers", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "enrollments"
)]
pub async fn enroll(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<EnrollRequest>, JsonRejection>,
) -> Result<Json<EnrollmentView>, AppError> {
    require_role(&caller, Role::Operations)?;
    let req = extract_validated_json(body)?;
    let services = req
        .services
        .iter()
        .map(|s| service_key(s))
        .collect::<Result<Vec<_>, _>>()?;
    let enrollment = state.engine.enroll(
        EntityId::new(req.entity_id)?,
        JurisdictionCode::new(req.jurisdiction)?,
        services,
    )?;
    state.persist_enrollment(&enrollment).await?;
    Ok(Json(EnrollmentView::from(&enrollment)))
}

/// GET /v1/enrollments/{entity_id} — An entity's enrollment.
#[utoipa::path(
    get,
    path = "/v1/enrollments/{entity_id}",
    params(("entity_id" = String, Path, description = "Entity ID")),
    responses(
        (status = 200, description = "Enrollment", body = EnrollmentView),
        (status = 404, description = "Entity not enrolled", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "enrollments"
)]
pub async fn get_enrollment(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(entity_id): Path<String>,
) -> Result<Json<EnrollmentView>, AppError> {
    let entity_id = EntityId::new(entity_id)?;
    ensure_entity_access(&caller, &entity_id)?;
    state
        .engine
        .enrollments()
        .get(&entity_id)
        .map(|e| Json(EnrollmentView::from(&e)))
        .ok_or_else(|| AppError::NotFound(format!("entity {entity_id} is not enrolled")))
}
