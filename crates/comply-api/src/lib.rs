//! # comply-api — Axum API for the Compliance Engine
//!
//! HTTP surface over [`comply_engine::ComplianceEngine`]: catalog and rule
//! administration, obligation lifecycle, quality reviews, escalation and
//! dashboard statistics. A background tick materializes recurring
//! obligations and fires reminders.
//!
//! ## API Surface
//!
//! | Prefix                | Module                      | Domain                 |
//! |-----------------------|-----------------------------|------------------------|
//! | `/v1/services/*`      | [`routes::services`]        | Service catalog        |
//! | `/v1/rules/*`         | [`routes::rules`]           | Due-date rules         |
//! | `/v1/workflows/*`     | [`routes::workflows`]       | Workflow templates     |
//! | `/v1/enrollments/*`   | [`routes::enrollments`]     | Entity subscriptions   |
//! | `/v1/obligations/*`   | [`routes::obligations`]     | Obligation lifecycle   |
//! | `/v1/escalations`     | [`routes::obligations`]     | Escalation queue       |
//! | `/v1/reviews/*`       | [`routes::reviews`]         | Quality reviews        |
//! | `/v1/dashboard/*`     | [`routes::dashboard`]       | Statistics             |
//! | `/v1/scheduler/*`     | [`routes::scheduler`]       | Manual tick            |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → MetricsMiddleware → AuthMiddleware → Handler
//! ```
//!
//! ## Persistence
//!
//! With `DATABASE_URL` set, every mutation is written through to Postgres
//! and the in-memory stores are hydrated on startup. Without it the
//! service runs in memory only.

pub mod auth;
pub mod bootstrap;
pub mod db;
pub mod error;
pub mod extractors;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod scheduler;
pub mod state;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::middleware::from_fn;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use crate::auth::AuthConfig;
use crate::state::AppState;

/// Assemble the full application router with all routes and middleware.
///
/// Health probes and `/metrics` are mounted outside the auth middleware
/// so they remain accessible without credentials.
pub fn app(state: AppState) -> Router {
    let auth_config = AuthConfig {
        token: state.config.auth_token.clone(),
    };

    let api = Router::new()
        .merge(routes::services::router())
        .merge(routes::rules::router())
        .merge(routes::workflows::router())
        .merge(routes::enrollments::router())
        .merge(routes::obligations::router())
        .merge(routes::reviews::router())
        .merge(routes::dashboard::router())
        .merge(routes::scheduler::router())
        .merge(openapi::router())
        .layer(from_fn(auth::auth_middleware))
        .layer(from_fn(middleware::metrics::metrics_middleware))
        .layer(middleware::tracing_layer::layer())
        .layer(axum::Extension(auth_config))
        .layer(axum::Extension(state.metrics.clone()))
        .with_state(state.clone());

    let unauthenticated = Router::new()
        .route("/health/liveness", get(liveness))
        .route("/health/readiness", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state);

    Router::new().merge(unauthenticated).merge(api)
}

/// Liveness probe: 200 while the process runs.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe: 503 when a configured database is unreachable.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(pool) = &state.db_pool {
        if let Err(e) = sqlx::query("SELECT 1").execute(pool).await {
            tracing::warn!("database health check failed: {e}");
            return (StatusCode::SERVICE_UNAVAILABLE, "database unreachable").into_response();
        }
    }
    (StatusCode::OK, "ready").into_response()
}

/// GET /metrics — Prometheus text exposition.
async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(state.prometheus.as_ref()),
    )
}
