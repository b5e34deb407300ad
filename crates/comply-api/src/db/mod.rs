//! # Database Persistence Layer
//!
//! Optional Postgres persistence via SQLx.
//!
//! The engine keeps its state in memory; when `DATABASE_URL` is set every
//! mutation is written through to Postgres and the in-memory stores are
//! hydrated from it on startup. Without a database the API runs in
//! in-memory-only mode, which is what the tests use.
//!
//! Records are stored as JSONB documents next to the columns needed for
//! uniqueness and lookup. Every write goes through [`with_retry`].

pub mod catalog;
pub mod obligations;
pub mod pending;

use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;

use crate::auth::SecretToken;

/// Attempts per write before giving up.
pub const MAX_ATTEMPTS: u32 = 3;

/// Backoff before the second attempt; doubles after each failure.
const BASE_DELAY_MS: u64 = 200;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Every attempt failed or timed out. Safe to retry later.
    #[error("store unavailable after {attempts} attempts: {message}")]
    Unavailable { attempts: u32, message: String },

    /// Non-retryable database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored document could not be encoded or decoded.
    #[error("stored document malformed: {0}")]
    Document(#[from] serde_json::Error),

    /// A stored record was rejected on hydration.
    #[error("stored record rejected: {0}")]
    Rejected(String),
}

/// Connect to Postgres and run embedded migrations.
///
/// Returns `None` without a URL (in-memory-only mode).
pub async fn init_pool(url: Option<&SecretToken>) -> Result<Option<PgPool>, sqlx::Error> {
    let Some(url) = url else {
        tracing::warn!(
            "DATABASE_URL not set, running in-memory only. State will not survive restarts."
        );
        return Ok(None);
    };

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .connect(url.expose())
        .await?;
    tracing::info!("connected to PostgreSQL");

    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("database migrations applied");

    Ok(Some(pool))
}

/// Whether an error is worth another attempt.
fn is_retryable(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Protocol(_)
            | sqlx::Error::WorkerCrashed
    )
}

/// Run `op` with a per-attempt timeout, retrying transport failures and
/// timeouts with exponential backoff (200ms, 400ms).
///
/// Returns [`StoreError::Unavailable`] once [`MAX_ATTEMPTS`] are spent.
/// Other database errors are returned immediately.
pub async fn with_retry<T, F, Fut>(what: &'static str, timeout: Duration, mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, sqlx::Error>>,
{
    let mut last = String::new();
    for attempt in 1..=MAX_ATTEMPTS {
        match tokio::time::timeout(timeout, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) if !is_retryable(&e) => return Err(StoreError::Database(e)),
            Ok(Err(e)) => last = e.to_string(),
            Err(_) => last = format!("timed out after {timeout:?}"),
        }
        if attempt < MAX_ATTEMPTS {
            let delay = Duration::from_millis(BASE_DELAY_MS * 2u64.pow(attempt - 1));
            tracing::warn!(
                what,
                attempt,
                max_attempts = MAX_ATTEMPTS,
                error = %last,
                "store write failed, retrying in {delay:?}"
            );
            tokio::time::sleep(delay).await;
        }
    }
    tracing::error!(what, attempts = MAX_ATTEMPTS, error = %last, "store write failed, giving up");
    Err(StoreError::Unavailable {
        attempts: MAX_ATTEMPTS,
        message: last,
    })
}

pub(crate) fn to_document<T: Serialize>(value: &T) -> Result<serde_json::Value, sqlx::Error> {
    serde_json::to_value(value).map_err(|e| {
        tracing::error!(error = %e, "failed to encode record for persistence");
        sqlx::Error::Encode(Box::new(e))
    })
}

pub(crate) fn from_documents<T: DeserializeOwned>(
    rows: Vec<(serde_json::Value,)>,
) -> Result<Vec<T>, StoreError> {
    rows.into_iter()
        .map(|(body,)| serde_json::from_value(body).map_err(StoreError::from))
        .collect()
}
