//! # Quality Review API
//!
//! A review is opened on an obligation awaiting review, its checklist
//! items are marked passed or failed, and the reviewer submits a
//! disposition. Approval is refused while a mandatory item has failed.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use comply_review::{ChecklistItem, ItemStatus, QualityReview};
use comply_state::Disposition;

use super::obligations::ObligationView;
use super::{instance_id, iso, iso_opt, review_id};
use crate::auth::{require_role, CallerIdentity, Role};
use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_non_blank, Validate};
use crate::state::AppState;

// ── DTOs ────────────────────────────────────────────────────────────────────

/// Explicit checklist item for a review.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ChecklistItemInput {
    pub category: String,
    pub item: String,
    #[serde(default)]
    pub is_mandatory: bool,
    pub weight: u32,
}

/// Request to open a review.
#[derive(Debug, Deserialize, ToSchema)]
pub struct OpenReviewRequest {
    pub instance_id: Uuid,
    /// Defaults to the checklist of the obligation's template version.
    pub items: Option<Vec<ChecklistItemInput>>,
}

impl Validate for OpenReviewRequest {
    fn validate(&self) -> Result<(), String> {
        for item in self.items.iter().flatten() {
            require_non_blank("item", &item.item)?;
            require_non_blank("category", &item.category)?;
        }
        Ok(())
    }
}

/// Request to mark one checklist item.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SetItemRequest {
    /// `pending`, `passed` or `failed`.
    pub status: String,
}

impl Validate for SetItemRequest {
    fn validate(&self) -> Result<(), String> {
        parse_item_status(&self.status).map(|_| ())
    }
}

/// Request to decide a review.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitReviewRequest {
    /// `approved`, `rejected` or `rework_required`.
    pub disposition: String,
    /// Rework instructions for the preparer.
    pub instructions: Option<String>,
}

impl Validate for SubmitReviewRequest {
    fn validate(&self) -> Result<(), String> {
        parse_disposition(&self.disposition).map(|_| ())
    }
}

fn parse_item_status(raw: &str) -> Result<ItemStatus, String> {
    match raw {
        "pending" => Ok(ItemStatus::Pending),
        "passed" => Ok(ItemStatus::Passed),
        "failed" => Ok(ItemStatus::Failed),
        other => Err(format!("unknown item status {other:?}")),
    }
}

fn parse_disposition(raw: &str) -> Result<Disposition, String> {
    match raw {
        "approved" => Ok(Disposition::Approved),
        "rejected" => Ok(Disposition::Rejected),
        "rework_required" => Ok(Disposition::ReworkRequired),
        other => Err(format!("unknown disposition {other:?}")),
    }
}

/// One checklist line of a review.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChecklistItemView {
    pub index: usize,
    pub category: String,
    pub item: String,
    pub status: String,
    pub is_mandatory: bool,
    pub weight: u32,
}

/// A quality review.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReviewView {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub reviewer_id: String,
    pub items: Vec<ChecklistItemView>,
    /// Running score over the current item statuses.
    pub current_score: u8,
    /// Final score, set when decided.
    pub score: Option<u8>,
    pub disposition: Option<String>,
    pub instructions: Option<String>,
    pub opened_at: String,
    pub decided_at: Option<String>,
}

impl From<&QualityReview> for ReviewView {
    fn from(r: &QualityReview) -> Self {
        Self {
            id: r.id.0,
            instance_id: r.instance_id.0,
            reviewer_id: r.reviewer_id.clone(),
            items: r
                .items
                .iter()
                .enumerate()
                .map(|(index, i)| ChecklistItemView {
                    index,
                    category: i.category.clone(),
                    item: i.item.clone(),
                    status: item_status_str(i.status).to_string(),
                    is_mandatory: i.is_mandatory,
                    weight: i.weight,
                })
                .collect(),
            current_score: r.current_score(),
            score: r.score,
            disposition: r.disposition.map(|d| d.as_str().to_string()),
            instructions: r.instructions.clone(),
            opened_at: iso(&r.opened_at),
            decided_at: iso_opt(&r.decided_at),
        }
    }
}

fn item_status_str(status: ItemStatus) -> &'static str {
    match status {
        ItemStatus::Pending => "pending",
        ItemStatus::Passed => "passed",
        ItemStatus::Failed => "failed",
    }
}

/// A decided review together with the obligation it moved.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReviewDecisionView {
    pub review: ReviewView,
    pub obligation: ObligationView,
}

// ── Router ──────────────────────────────────────────────────────────────────

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/reviews", post(open_review))
        .route("/v1/reviews/{id}", get(get_review))
        .route("/v1/reviews/{id}/items/{index}", put(set_review_item))
        .route("/v1/reviews/{id}/submit", post(submit_review))
}

// ── Handlers ────────────────────────────────────────────────────────────────

/// POST /v1/reviews — Open a review on an obligation awaiting review.
#[utoipa::path(
    post,
    path = "/v1/reviews",
    request_body = OpenReviewRequest,
    responses(
        (status = 201, description = "Review opened", body = ReviewView),
        (status = 403, description = "Reviewer role required", body = crate::error::ErrorBody),
        (status = 404, description = "Unknown obligation", body = crate::error::ErrorBody),
        (status = 409, description = "Not awaiting review, or a review is already open", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "reviews"
)]
pub async fn open_review(
    State(state): State<AppState>,
    caller: CallerIdentity,
    body: Result<Json<OpenReviewRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ReviewView>), AppError> {
    require_role(&caller, Role::Reviewer)?;
    let req = extract_validated_json(body)?;
    let items = req.items.map(|items| {
        items
            .into_iter()
            .map(|i| ChecklistItem {
                category: i.category,
                item: i.item,
                status: ItemStatus::Pending,
                is_mandatory: i.is_mandatory,
                weight: i.weight,
            })
            .collect()
    });
    let review = state
        .engine
        .open_review(&instance_id(req.instance_id), &caller.actor_id, items)?;
    state.persist_review(&review).await?;
    Ok((StatusCode::CREATED, Json(ReviewView::from(&review))))
}

/// GET /v1/reviews/{id} — Fetch a review.
#[utoipa::path(
    get,
    path = "/v1/reviews/{id}",
    params(("id" = Uuid, Path, description = "Review ID")),
    responses(
        (status = 200, description = "Review found", body = ReviewView),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "reviews"
)]
pub async fn get_review(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
) -> Result<Json<ReviewView>, AppError> {
    require_role(&caller, Role::Operations)?;
    let review = state.engine.review(&review_id(id))?;
    Ok(Json(ReviewView::from(&review)))
}

/// PUT /v1/reviews/{id}/items/{index} — Mark a checklist item.
#[utoipa::path(
    put,
    path = "/v1/reviews/{id}/items/{index}",
    params(
        ("id" = Uuid, Path, description = "Review ID"),
        ("index" = usize, Path, description = "Zero-based checklist index"),
    ),
    request_body = SetItemRequest,
    responses(
        (status = 200, description = "Item updated", body = ReviewView),
        (status = 404, description = "Unknown review or item", body = crate::error::ErrorBody),
        (status = 409, description = "Review already decided", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "reviews"
)]
pub async fn set_review_item(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path((id, index)): Path<(Uuid, usize)>,
    body: Result<Json<SetItemRequest>, JsonRejection>,
) -> Result<Json<ReviewView>, AppError> {
    require_role(&caller, Role::Reviewer)?;
    let req = extract_validated_json(body)?;
    let status = parse_item_status(&req.status).map_err(AppError::Validation)?;
    let review = state.engine.set_review_item(&review_id(id), index, status)?;
    state.persist_review(&review).await?;
    Ok(Json(ReviewView::from(&review)))
}

/// POST /v1/reviews/{id}/submit — Decide a review.
///
/// Approval moves the obligation to `approved` (and straight to `closed`
/// when every mandatory deliverable is already recorded); rejection and
/// rework send it back for `reopen`.
#[utoipa::path(
    post,
    path = "/v1/reviews/{id}/submit",
    params(("id" = Uuid, Path, description = "Review ID")),
    request_body = SubmitReviewRequest,
    responses(
        (status = 200, description = "Review decided", body = ReviewDecisionView),
        (status = 409, description = "Review already decided", body = crate::error::ErrorBody),
        (status = 422, description = "Approval blocked by failed mandatory items (APPROVAL_BLOCKED)", body = crate::error::ErrorBody),
    ),
    security(("bearer_auth" = [])),
    tag = "reviews"
)]
pub async fn submit_review(
    State(state): State<AppState>,
    caller: CallerIdentity,
    Path(id): Path<Uuid>,
    body: Result<Json<SubmitReviewRequest>, JsonRejection>,
) -> Result<Json<ReviewDecisionView>, AppError> {
    require_role(&caller, Role::Reviewer)?;
    let req = extract_validated_json(body)?;
    let disposition = parse_disposition(&req.disposition).map_err(AppError::Validation)?;
    let decision = state.engine.submit_review(
        &review_id(id),
        disposition,
        req.instructions,
        &caller.actor_id,
    )?;
    let review = state.persist_review(&decision.review).await;
    state.persist_instance(&decision.instance).await?;
    review?;
    Ok(Json(ReviewDecisionView {
        review: ReviewView::from(&decision.review),
        obligation: ObligationView::build(&state, &decision.instance),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_dispositions() {
        assert_eq!(parse_disposition("approved"), Ok(Disposition::Approved));
        assert_eq!(parse_disposition("rework_required"), Ok(Disposition::ReworkRequired));
        assert!(parse_disposition("maybe").is_err());
    }

    #[test]
    fn item_status_names_round_trip() {
        for status in [ItemStatus::Pending, ItemStatus::Passed, ItemStatus::Failed] {
            assert_eq!(parse_item_status(item_status_str(status)), Ok(status));
        }
    }
}
