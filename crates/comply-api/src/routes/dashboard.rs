//! # Dashboard API
//!
//! Aggregate counts for the operations dashboard, computed over a snapshot
//! of every instance.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use comply_core::Timestamp;
use comply_engine::DashboardStats;

use crate::auth::{require_role, CallerIdentity, Role};
use crate::error::AppError;
use crate::state::AppState;

/// Dashboard statistics.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DashboardView {
    pub total: usize,
    /// Count per status; every status is present.
    pub by_status: BTreeMap<String, usize>,
    /// Mean seconds from submission to review decision.
    pub average_review_seconds: Option<f64>,
    /// Share of approved or closed obligations approved on or before
    /// their SLA deadline, in percent.
    pub sla_compliance_percent: Option<f64>,
    /// Obligations past their SLA deadline and not yet approved.
    pub sla_breaches: usize,
    pub escalated: usize,
}

impl From<DashboardStats> for DashboardView {
    fn from(s: DashboardStats) -> Self {
        Self {
            total: s.total,
            by_status: s.by_status,
            average_review_seconds: s.average_review_seconds,
            sla_compliance_percent: s.sla_compliance_percent,
            sla_breaches: s.sla_breaches,
            escalated: s.escalated,
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/dashboard/stats", get(dashboard_stats))
}

/// GET /v1/dashboard/stats — Current dashboard statistics.
#[utoipa::path(
    get,
    path = "/v1/dashboard/stats",
    responses(
        (status = 200, description = "Dashboard statistics", body = DashboardView),
        (status = 403, description = "Operations role required", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "dashboard"
)]
pub async fn dashboard_stats(
    State(state): State<AppState>,
    caller: CallerIdentity,
) -> Result<Json<DashboardView>, AppError> {
    require_role(&caller, Role::Operations)?;
    Ok(Json(state.engine.dashboard(Timestamp::now()).into()))
}
