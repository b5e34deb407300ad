//! # Scheduler API
//!
//! Manual trigger of the periodic tick, for operators and tests. The
//! background loop in [`crate::scheduler`] runs the same code.

use axum::extract::{Query, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use comply_core::Timestamp;

use crate::auth::{require_role, CallerIdentity, Role};
use crate::error::AppError;
use crate::scheduler::{run_tick, TickOutcome};
use crate::state::AppState;

/// Tick parameters.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct TickQuery {
    /// Instant to tick at (UTC, `Z` suffix). Defaults to now.
    pub now: Option<String>,
}

/// Counts from one tick.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TickView {
    pub created: usize,
    pub existing: usize,
    /// Enrolled services without a rule in effect or a published template.
    pub not_configured: usize,
    /// Enrolled services waiting out a mid-period periodicity change.
    pub deferred: usize,
    pub failed: usize,
    pub reminders_dispatched: usize,
    pub reminders_failed: usize,
    pub persist_failed: usize,
    /// Records still waiting for a successful store write.
    pub pending_writes: usize,
}

impl From<TickOutcome> for TickView {
    fn from(o: TickOutcome) -> Self {
        Self {
            created: o.summary.created,
            existing: o.summary.existing,
            not_configured: o.summary.not_configured,
            deferred: o.summary.deferred,
            failed: o.summary.failed,
            reminders_dispatched: o.summary.reminders_dispatched,
            reminders_failed: o.summary.reminders_failed,
            persist_failed: o.persist_failed,
            pending_writes: o.pending_writes,
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/v1/scheduler/tick", post(tick))
}

/// POST /v1/scheduler/tick — Run one scheduler tick now.
#[utoipa::path(
    post,
    path = "/v1/scheduler/tick",
    params(TickQuery),
    responses(
        (status = 200, description = "Tick complete", body = TickView),
        (status = 403, description = "Admin role required", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid timestamp", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "scheduler"
)]
pub async fn tick(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Query(query): Query<TickQuery>,
) -> Result<Json<TickView>, AppError> {
    require_role(&caller, Role::Admin)?;
    let now = match query.now.as_deref() {
        Some(raw) => Timestamp::parse(raw)?,
        None => Timestamp::now(),
    };
    let outcome = run_tick(&state, now).await;
    Ok(Json(TickView::from(outcome)))
}
