//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps [`EngineError`] variants to HTTP status codes and a JSON body of the
//! form `{ "error": { code, message, details } }`. Internal error messages
//! are logged, never returned.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use comply_core::{EngineError, ValidationError};

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "INCOMPLETE_DOCUMENTS").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Structured context, present only for errors that carry some.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Request validation failed (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// Request body could not be parsed (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Missing or invalid credentials (401).
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Insufficient role (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Conflict with current resource state (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Administrator configuration is missing (409).
    #[error("not configured: {message}")]
    NotConfigured { kind: &'static str, message: String },

    /// Mandatory documents are missing (422).
    #[error("missing mandatory documents: {}", missing.join(", "))]
    IncompleteDocuments { missing: Vec<String> },

    /// Approval refused by failed mandatory checklist items (422).
    #[error("approval blocked by failed mandatory items: {}", failed.join(", "))]
    ApprovalBlocked { failed: Vec<String> },

    /// Rework limit reached; the obligation was escalated (409).
    #[error("{0}")]
    EscalationRequired(String),

    /// The store did not answer in time (503). Safe to retry.
    #[error("store unavailable: {0}")]
    TransientStore(String),

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Return the HTTP status code and machine-readable error code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::NotConfigured { .. } => (StatusCode::CONFLICT, "NOT_CONFIGURED"),
            Self::IncompleteDocuments { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INCOMPLETE_DOCUMENTS")
            }
            Self::ApprovalBlocked { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "APPROVAL_BLOCKED"),
            Self::EscalationRequired(_) => (StatusCode::CONFLICT, "ESCALATION_REQUIRED"),
            Self::TransientStore(_) => (StatusCode::SERVICE_UNAVAILABLE, "TRANSIENT_STORE_ERROR"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::NotConfigured { kind, .. } => Some(serde_json::json!({ "kind": kind })),
            Self::IncompleteDocuments { missing } => {
                Some(serde_json::json!({ "missing": missing }))
            }
            Self::ApprovalBlocked { failed } => {
                Some(serde_json::json!({ "failed_items": failed }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        match &self {
            Self::Internal(_) => tracing::error!(error = %self, "internal server error"),
            Self::TransientStore(_) => tracing::warn!(error = %self, "store unavailable"),
            _ => {}
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details: self.details(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(e) => Self::Validation(e.to_string()),
            EngineError::NoRuleFound { .. } => Self::NotConfigured {
                kind: "NO_RULE_FOUND",
                message: err.to_string(),
            },
            EngineError::NoPublishedTemplate { .. } => Self::NotConfigured {
                kind: "NO_PUBLISHED_TEMPLATE",
                message: err.to_string(),
            },
            EngineError::IncompleteDocuments { missing } => Self::IncompleteDocuments { missing },
            EngineError::ApprovalBlocked { failed } => Self::ApprovalBlocked { failed },
            EngineError::EscalationRequired { .. } => Self::EscalationRequired(err.to_string()),
            EngineError::TransientStore { .. } => Self::TransientStore(err.to_string()),
            EngineError::NotFound { .. } => Self::NotFound(err.to_string()),
            EngineError::InvalidTransition { .. } | EngineError::Conflict(_) => {
                Self::Conflict(err.to_string())
            }
        }
    }
}
