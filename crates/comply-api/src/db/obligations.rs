//! Obligation instance, quality review and document metadata persistence.
//!
//! Instances and reviews are stored whole as JSONB; `status` and
//! `due_date` are copied into columns for operational queries only and
//! are never read back.
//!
//! Upserts only replace a row with a strictly higher `revision`, so a
//! slow write of an older snapshot cannot overwrite a newer one.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use comply_core::{InstanceId, Timestamp};
use comply_engine::DocumentMeta;
use comply_review::QualityReview;
use comply_state::ObligationInstance;

use super::{from_documents, to_document, StoreError};

/// Insert an obligation instance, or replace an older revision of it.
pub async fn upsert_instance(pool: &PgPool, inst: &ObligationInstance) -> Result<(), sqlx::Error> {
    let body = to_document(inst)?;
    sqlx::query(
        "INSERT INTO obligation_instances
             (id, service_key, entity_id, period, status, due_date, body, updated_at, revision)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
         ON CONFLICT (id)
         DO UPDATE SET status = EXCLUDED.status, body = EXCLUDED.body,
                       updated_at = EXCLUDED.updated_at, revision = EXCLUDED.revision
         WHERE obligation_instances.revision < EXCLUDED.revision",
    )
    .bind(inst.id.0)
    .bind(inst.service_key.as_str())
    .bind(inst.entity_id.as_str())
    .bind(inst.period.to_string())
    .bind(inst.status.as_str())
    .bind(inst.due_date)
    .bind(&body)
    .bind(*inst.updated_at.as_datetime())
    .bind(revision_column(inst.revision))
    .execute(pool)
    .await?;
    Ok(())
}

pub(crate) fn revision_column(revision: u64) -> i64 {
    i64::try_from(revision).unwrap_or(i64::MAX)
}

pub async fn load_instances(pool: &PgPool) -> Result<Vec<ObligationInstance>, StoreError> {
    let rows = sqlx::query_as::<_, (serde_json::Value,)>(
        "SELECT body FROM obligation_instances ORDER BY due_date, id",
    )
    .fetch_all(pool)
    .await?;
    from_documents(rows)
}

/// Insert a quality review, or replace an older revision of it.
pub async fn upsert_review(pool: &PgPool, review: &QualityReview) -> Result<(), sqlx::Error> {
    let body = to_document(review)?;
    sqlx::query(
        "INSERT INTO quality_reviews (id, instance_id, body, updated_at, revision)
         VALUES ($1, $2, $3, $4, $5)
         ON CONFLICT (id)
         DO UPDATE SET body = EXCLUDED.body, updated_at = EXCLUDED.updated_at,
                       revision = EXCLUDED.revision
         WHERE quality_reviews.revision < EXCLUDED.revision",
    )
    .bind(review.id.0)
    .bind(review.instance_id.0)
    .bind(&body)
    .bind(*review.updated_at.as_datetime())
    .bind(revision_column(review.revision))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_reviews(pool: &PgPool) -> Result<Vec<QualityReview>, StoreError> {
    let rows = sqlx::query_as::<_, (serde_json::Value,)>(
        "SELECT body FROM quality_reviews ORDER BY updated_at, id",
    )
    .fetch_all(pool)
    .await?;
    from_documents(rows)
}

/// Record (or replace) the metadata of one uploaded document.
pub async fn upsert_document(
    pool: &PgPool,
    instance_id: &InstanceId,
    doc_code: &str,
    meta: &DocumentMeta,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO obligation_documents (instance_id, doc_code, verified, uploaded_at)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (instance_id, doc_code)
         DO UPDATE SET verified = EXCLUDED.verified, uploaded_at = EXCLUDED.uploaded_at",
    )
    .bind(instance_id.0)
    .bind(doc_code)
    .bind(meta.verified)
    .bind(*meta.uploaded_at.as_datetime())
    .execute(pool)
    .await?;
    Ok(())
}

/// A persisted document row.
#[derive(Debug, sqlx::FromRow)]
struct DocumentRow {
    instance_id: Uuid,
    doc_code: String,
    verified: bool,
    uploaded_at: DateTime<Utc>,
}

pub async fn load_documents(
    pool: &PgPool,
) -> Result<Vec<(InstanceId, String, DocumentMeta)>, StoreError> {
    let rows = sqlx::query_as::<_, DocumentRow>(
        "SELECT instance_id, doc_code, verified, uploaded_at
         FROM obligation_documents ORDER BY instance_id, doc_code",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            (
                InstanceId(row.instance_id),
                row.doc_code,
                DocumentMeta {
                    uploaded_at: Timestamp::from_utc(row.uploaded_at),
                    verified: row.verified,
                },
            )
        })
        .collect())
}

// ── Reminder deliveries ─────────────────────────────────────────────────────

/// Remember reminders the dispatcher accepted. Already known pairs are
/// skipped.
pub async fn insert_deliveries(
    pool: &PgPool,
    delivered: &[(InstanceId, Timestamp)],
) -> Result<(), sqlx::Error> {
    if delivered.is_empty() {
        return Ok(());
    }
    let ids: Vec<Uuid> = delivered.iter().map(|(id, _)| id.0).collect();
    let fired: Vec<DateTime<Utc>> = delivered.iter().map(|(_, at)| *at.as_datetime()).collect();
    sqlx::query(
        "INSERT INTO reminder_deliveries (instance_id, fires_at)
         SELECT * FROM UNNEST($1::uuid[], $2::timestamptz[])
         ON CONFLICT DO NOTHING",
    )
    .bind(&ids)
    .bind(&fired)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_deliveries(pool: &PgPool) -> Result<Vec<(InstanceId, Timestamp)>, StoreError> {
    let rows = sqlx::query_as::<_, (Uuid, DateTime<Utc>)>(
        "SELECT instance_id, fires_at FROM reminder_deliveries ORDER BY instance_id, fires_at",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(id, at)| (InstanceId(id), Timestamp::from_utc(at)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_column_saturates() {
        assert_eq!(revision_column(0), 0);
        assert_eq!(revision_column(42), 42);
        assert_eq!(revision_column(u64::MAX), i64::MAX);
    }
}
