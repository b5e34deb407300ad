//! # Service Catalog API
//!
//! Service definitions and the doc types each service collects or
//! delivers. Reads are open to every role; changes require `admin`.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use comply_core::Periodicity;
use comply_rules::{DocType, DocTypeFlags, ServiceDefinition, ServiceUpdate};

use super::{iso, service_key};
use crate::auth::{require_role, CallerIdentity, Role};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_non_blank, Validate};
use crate::state::AppState;

// ── DTOs ────────────────────────────────────────────────────────────────────

/// Request to register a service.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateServiceRequest {
    /// Immutable key, e.g. `gst-monthly`.
    pub service_key: String,
    pub display_name: String,
    /// `ONE_TIME`, `MONTHLY`, `QUARTERLY` or `ANNUAL`.
    pub periodicity: String,
    pub category: String,
}

impl Validate for CreateServiceRequest {
    fn validate(&self) -> Result<(), String> {
        require_non_blank("service_key", &self.service_key)?;
        require_non_blank("display_name", &self.display_name)?;
        require_non_blank("category", &self.category)
    }
}

/// Partial update of a service. Absent fields are left unchanged.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateServiceRequest {
    pub display_name: Option<String>,
    pub periodicity: Option<String>,
    pub category: Option<String>,
    pub active: Option<bool>,
}

impl Validate for UpdateServiceRequest {
    fn validate(&self) -> Result<(), String> {
        if self.display_name.is_none()
            && self.periodicity.is_none()
            && self.category.is_none()
            && self.active.is_none()
        {
            return Err("at least one field must be provided".into());
        }
        Ok(())
    }
}

/// A service definition.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ServiceView {
    pub service_key: String,
    pub display_name: String,
    pub periodicity: String,
    pub category: String,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&ServiceDefinition> for ServiceView {
    fn from(def: &ServiceDefinition) -> Self {
        Self {
            service_key: def.service_key.to_string(),
            display_name: def.display_name.clone(),
            periodicity: def.periodicity.to_string(),
            category: def.category.clone(),
            active: def.active,
            created_at: iso(&def.created_at),
            updated_at: iso(&def.updated_at),
        }
    }
}

/// Request to declare a doc type for a service.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateDocTypeRequest {
    /// Unique per service.
    pub doc_code: String,
    pub label: String,
    #[serde(default)]
    pub client_uploads: bool,
    #[serde(default)]
    pub is_deliverable: bool,
    #[serde(default)]
    pub mandatory: bool,
    /// Workflow step whose completion makes the document due.
    pub step_key: Option<String>,
}

impl Validate for CreateDocTypeRequest {
    fn validate(&self) -> Result<(), String> {
        require_non_blank("doc_code", &self.doc_code)?;
        require_non_blank("label", &self.label)?;
        if let Some(step) = &self.step_key {
            require_non_blank("step_key", step)?;
        }
        Ok(())
    }
}

/// A doc type.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DocTypeView {
    pub service_key: String,
    pub doc_code: String,
    pub label: String,
    pub client_uploads: bool,
    pub is_deliverable: bool,
    pub mandatory: bool,
    pub step_key: Option<String>,
}

impl From<&DocType> for DocTypeView {
    fn from(doc: &DocType) -> Self {
        Self {
            service_key: doc.service_key.to_string(),
            doc_code: doc.doc_code.clone(),
            label: doc.label.clone(),
            client_uploads: doc.flags.client_uploads,
            is_deliverable: doc.flags.is_deliverable,
            mandatory: doc.flags.mandatory,
            step_key: doc.step_key.clone(),
        }
    }
}

// ── Router ──────────────────────────────────────────────────────────────────

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/services", get(list_services).post(create_service))
        .route("/v1/services/{key}", get(get_service).patch(update_service))
        .route(
            "/v1/services/{key}/doc-types",
            get(list_doc_types).post(create_doc_type),
        )
}

// ── Handlers ────────────────────────────────────────────────────────────────

/// POST /v1/services — Register a service.
#[utoipa::path(
    post,
    path = "/v1/services",
    request_body = CreateServiceRequest,
    responses(
        (status = 201, description = "Service registered", body = ServiceView),
        (status = 403, description = "Admin role required", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid or duplicate service", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "services"
)]
pub async fn create_service(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<CreateServiceRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ServiceView>), AppError> {
    require_role(&caller, Role::Admin)?;
    let req = extract_validated_json(body)?;
    let periodicity: Periodicity = req.periodicity.parse()?;
    let def = ServiceDefinition::new(
        service_key(&req.service_key)?,
        req.display_name,
        periodicity,
        req.category,
    )?;
    let def = state.engine.rules().register_service(def)?;
    if let Err(e) = state.persist_service(&def).await {
        state.engine.rules().withdraw_service(&def.service_key);
        return Err(e);
    }
    tracing::info!(service_key = %def.service_key, actor = %caller.actor_id, "service registered");
    Ok((StatusCode::CREATED, Json(ServiceView::from(&def))))
}

/// GET /v1/services — List services.
#[utoipa::path(
    get,
    path = "/v1/services",
    responses((status = 200, description = "All services", body = Vec<ServiceView>)),
    security(("bearer_auth" = [])),
    tag = "services"
)]
pub async fn list_services(State(state): State<AppState>) -> Json<Vec<ServiceView>> {
    Json(state.engine.rules().services().iter().map(ServiceView::from).collect())
}

/// GET /v1/services/{key} — Fetch one service.
#[utoipa::path(
    get,
    path = "/v1/services/{key}",
    params(("key" = String, Path, description = "Service key")),
    responses(
        (status = 200, description = "Service found", body = ServiceView),
        (status = 404, description = "Unknown service", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "services"
)]
pub async fn get_service(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ServiceView>, AppError> {
    let key = service_key(&key)?;
    state
        .engine
        .rules()
        .service(&key)
        .map(|def| Json(ServiceView::from(&def)))
        .ok_or_else(|| AppError::NotFound(format!("service {key} not found")))
}

/// PATCH /v1/services/{key} — Update mutable metadata or deactivate.
#[utoipa::path(
    patch,
    path = "/v1/services/{key}",
    params(("key" = String, Path, description = "Service key")),
    request_body = UpdateServiceRequest,
    responses(
        (status = 200, description = "Service updated", body = ServiceView),
        (status = 404, description = "Unknown service", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid update", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "services"
)]
pub async fn update_service(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(key): Path<String>,
    body: Result<Json<UpdateServiceRequest>, JsonRejection>,
) -> Result<Json<ServiceView>, AppError> {
    require_role(&caller, Role::Admin)?;
    let key = service_key(&key)?;
    let req = extract_validated_json(body)?;
    let periodicity = req
        .periodicity
        .as_deref()
        .map(str::parse::<Periodicity>)
        .transpose()?;
    let update = ServiceUpdate {
        display_name: req.display_name,
        periodicity,
        category: req.category,
        active: req.active,
    };
    let def = state.engine.rules().update_service(&key, update)?;
    state.persist_service(&def).await?;
    tracing::info!(service_key = %def.service_key, active = def.active, actor = %caller.actor_id, "service updated");
    Ok(Json(ServiceView::from(&def)))
}

/// POST /v1/services/{key}/doc-types — Declare a doc type.
#[utoipa::path(
    post,
    path = "/v1/services/{key}/doc-types",
    params(("key" = String, Path, description = "Service key")),
    request_body = CreateDocTypeRequest,
    responses(
        (status = 201, description = "Doc type declared", body = DocTypeView),
        (status = 422, description = "Invalid, duplicate or unknown service", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "services"
)]
pub async fn create_doc_type(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(key): Path<String>,
    body: Result<Json<CreateDocTypeRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<DocTypeView>), AppError> {
    require_role(&caller, Role::Admin)?;
    let key = service_key(&key)?;
    let req = extract_validated_json(body)?;
    let doc = DocType::new(
        key,
        req.doc_code,
        req.label,
        DocTypeFlags {
            client_uploads: req.client_uploads,
            is_deliverable: req.is_deliverable,
            mandatory: req.mandatory,
        },
        req.step_key,
    )?;
    let doc = state.engine.rules().add_doc_type(doc)?;
    if let Err(e) = state.persist_doc_type(&doc).await {
        state.engine.rules().withdraw_doc_type(&doc.service_key, &doc.doc_code);
        return Err(e);
    }
    tracing::info!(service_key = %doc.service_key, doc_code = %doc.doc_code, "doc type declared");
    Ok((StatusCode::CREATED, Json(DocTypeView::from(&doc))))
}

/// GET /v1/services/{key}/doc-types — Doc types of a service.
#[utoipa::path(
    get,
    path = "/v1/services/{key}/doc-types",
    params(("key" = String, Path, description = "Service key")),
    responses(
        (status = 200, description = "Doc types", body = Vec<DocTypeView>),
        (status = 404, description = "Unknown service", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "services"
)]
pub async fn list_doc_types(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Vec<DocTypeView>>, AppError> {
    let key = service_key(&key)?;
    if state.engine.rules().service(&key).is_none() {
        return Err(AppError::NotFound(format!("service {key} not found")));
    }
    Ok(Json(
        state
            .engine
            .rules()
            .doc_types_for(&key)
            .iter()
            .map(DocTypeView::from)
            .collect(),
    ))
}
