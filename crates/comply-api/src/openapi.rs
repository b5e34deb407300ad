//! # OpenAPI Specification Assembly
//!
//! Assembles all utoipa-documented routes into a single OpenAPI 3.1 spec,
//! served at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::state::AppState;

/// Adds the bearer token security scheme.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .description(Some(
                            "`{role}:{actor_id}:{secret}` where role is admin, operations, reviewer or client. Secret set via AUTH_TOKEN.",
                        ))
                        .build(),
                ),
            );
        }
    }
}

/// Assembled OpenAPI spec for the entire API surface.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Compliance Obligation & Review Engine",
        version = "0.1.0",
        description = "Recurring statutory obligations per entity and jurisdiction: due-date rules, versioned workflow templates, obligation lifecycle with document gating, weighted quality reviews, escalation, reminders and dashboard statistics.\n\nAll `/v1/*` endpoints require `Authorization: Bearer <token>`. Health probes and `/metrics` are unauthenticated.",
        license(name = "AGPL-3.0-or-later")
    ),
    modifiers(&SecurityAddon),
    paths(
        // Services
        crate::routes::services::create_service,
        crate::routes::services::list_services,
        crate::routes::services::get_service,
        crate::routes::services::update_service,
        crate::routes::services::create_doc_type,
        crate::routes::services::list_doc_types,
        // Rules
        crate::routes::rules::create_rule,
        crate::routes::rules::list_rules,
        crate::routes::rules::resolve_rule,
        crate::routes::rules::deactivate_rule,
        // Workflows
        crate::routes::workflows::create_version,
        crate::routes::workflows::list_versions,
        crate::routes::workflows::publish_version,
        crate::routes::workflows::get_published,
        // Enrollments
        crate::routes::enrollments::enroll,
        crate::routes::enrollments::get_enrollment,
        // Obligations
        crate::routes::obligations::schedule_obligation,
        crate::routes::obligations::list_obligations,
        crate::routes::obligations::get_obligation,
        crate::routes::obligations::start_obligation,
        crate::routes::obligations::complete_step,
        crate::routes::obligations::submit_obligation,
        crate::routes::obligations::reopen_obligation,
        crate::routes::obligations::record_document,
        crate::routes::obligations::resolve_escalation,
        crate::routes::obligations::list_escalations,
        // Reviews
        crate::routes::reviews::open_review,
        crate::routes::reviews::get_review,
        crate::routes::reviews::set_review_item,
        crate::routes::reviews::submit_review,
        // Dashboard & scheduler
        crate::routes::dashboard::dashboard_stats,
        crate::routes::scheduler::tick,
    ),
    components(schemas(
        // Error types
        crate::error::ErrorBody,
        crate::error::ErrorDetail,
        // Service DTOs
        crate::routes::services::CreateServiceRequest,
        crate::routes::services::UpdateServiceRequest,
        crate::routes::services::ServiceView,
        crate::routes::services::CreateDocTypeRequest,
        crate::routes::services::DocTypeView,
        // Rule DTOs
        crate::routes::rules::CreateRuleRequest,
        crate::routes::rules::RuleView,
        // Workflow DTOs
        crate::routes::workflows::CreateVersionRequest,
        crate::routes::workflows::PublishRequest,
        crate::routes::workflows::TemplateView,
        // Enrollment DTOs
        crate::routes::enrollments::EnrollRequest,
        crate::routes::enrollments::EnrollmentView,
        // Obligation DTOs
        crate::routes::obligations::ScheduleObligationRequest,
        crate::routes::obligations::RecordDocumentRequest,
        crate::routes::obligations::ResolveEscalationRequest,
        crate::routes::obligations::TransitionView,
        crate::routes::obligations::DocumentView,
        crate::routes::obligations::ObligationView,
        // Review DTOs
        crate::routes::reviews::ChecklistItemInput,
        crate::routes::reviews::OpenReviewRequest,
        crate::routes::reviews::SetItemRequest,
        crate::routes::reviews::SubmitReviewRequest,
        crate::routes::reviews::ChecklistItemView,
        crate::routes::reviews::ReviewView,
        crate::routes::reviews::ReviewDecisionView,
        // Dashboard & scheduler DTOs
        crate::routes::dashboard::DashboardView,
        crate::routes::scheduler::TickView,
    )),
    tags(
        (name = "services", description = "Service catalog and document types"),
        (name = "rules", description = "Effective-dated due-date rules"),
        (name = "workflows", description = "Versioned workflow templates"),
        (name = "enrollments", description = "Entity service subscriptions"),
        (name = "obligations", description = "Obligation lifecycle, documents and escalation"),
        (name = "reviews", description = "Weighted quality reviews"),
        (name = "dashboard", description = "Aggregate statistics"),
        (name = "scheduler", description = "Periodic materialization and reminders"),
    )
)]
pub struct ApiDoc;

/// Serves the OpenAPI JSON spec at `/openapi.json`.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

/// GET /openapi.json — Return the generated OpenAPI specification.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
