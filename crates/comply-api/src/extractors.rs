//! # Request Body Extraction & Validation
//!
//! Request DTOs implement [`Validate`] for checks serde cannot express
//! (blank strings, identifier syntax, ranges). Handlers take the raw
//! `Result<Json<T>, JsonRejection>` and pass it through
//! [`extract_validated_json`], so malformed JSON is a 400 and a
//! well-formed but invalid body is a 422.

use axum::extract::rejection::JsonRejection;
use axum::Json;

use crate::error::AppError;

/// Business-rule validation of a request body.
pub trait Validate {
    fn validate(&self) -> Result<(), String>;
}

/// Unwrap a JSON body, mapping rejections to [`AppError::BadRequest`].
pub fn extract_json<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    result
        .map(|Json(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Unwrap a JSON body and run its [`Validate`] checks.
pub fn extract_validated_json<T: Validate>(
    result: Result<Json<T>, JsonRejection>,
) -> Result<T, AppError> {
    let value = extract_json(result)?;
    value.validate().map_err(AppError::Validation)?;
    Ok(value)
}

/// Reject a blank string field.
pub(crate) fn require_non_blank(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        Err(format!("{field} must not be empty"))
    } else {
        Ok(())
    }
}
