//! Catalog persistence: services, doc types, due-date rules, workflow
//! template versions and enrollments.
//!
//! Writes are upserts keyed by the natural identity of each record, so a
//! retried write is harmless. Loaders return records in the order the
//! in-memory stores expect to be rebuilt in.

use sqlx::PgPool;

use comply_core::ServiceKey;
use comply_engine::Enrollment;
use comply_rules::{DocType, DueDateRule, ServiceDefinition};
use comply_workflow::WorkflowTemplate;

use super::obligations::revision_column;
use super::{from_documents, to_document, StoreError};

// ── Services ────────────────────────────────────────────────────────────────

/// Insert or replace a service definition.
pub async fn upsert_service(pool: &PgPool, service: &ServiceDefinition) -> Result<(), sqlx::Error> {
    let body = to_document(service)?;
    sqlx::query(
        "INSERT INTO services (service_key, active, body, updated_at)
         VALUES ($1, $2, $3, $4)
         ON CONFLICT (service_key)
         DO UPDATE SET active = EXCLUDED.active, body = EXCLUDED.body, updated_at = EXCLUDED.updated_at",
    )
    .bind(service.service_key.as_str())
    .bind(service.active)
    .bind(&body)
    .bind(*service.updated_at.as_datetime())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_services(pool: &PgPool) -> Result<Vec<ServiceDefinition>, StoreError> {
    let rows = sqlx::query_as::<_, (serde_json::Value,)>(
        "SELECT body FROM services ORDER BY service_key",
    )
    .fetch_all(pool)
    .await?;
    from_documents(rows)
}

// ── Doc types ───────────────────────────────────────────────────────────────

pub async fn upsert_doc_type(pool: &PgPool, doc: &DocType) -> Result<(), sqlx::Error> {
    let body = to_document(doc)?;
    sqlx::query(
        "INSERT INTO doc_types (service_key, doc_code, body)
         VALUES ($1, $2, $3)
         ON CONFLICT (service_key, doc_code) DO UPDATE SET body = EXCLUDED.body",
    )
    .bind(doc.service_key.as_str())
    .bind(&doc.doc_code)
    .bind(&body)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_doc_types(pool: &PgPool) -> Result<Vec<DocType>, StoreError> {
    let rows = sqlx::query_as::<_, (serde_json::Value,)>(
        "SELECT body FROM doc_types ORDER BY service_key, doc_code",
    )
    .fetch_all(pool)
    .await?;
    from_documents(rows)
}

// ── Due-date rules ──────────────────────────────────────────────────────────

/// Insert a rule, or update its active flag and body if it already exists.
pub async fn upsert_rule(pool: &PgPool, rule: &DueDateRule) -> Result<(), sqlx::Error> {
    let body = to_document(rule)?;
    sqlx::query(
        "INSERT INTO due_date_rules (id, service_key, jurisdiction, effective_from, active, body)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (id) DO UPDATE SET active = EXCLUDED.active, body = EXCLUDED.body",
    )
    .bind(rule.id.0)
    .bind(rule.service_key.as_str())
    .bind(rule.jurisdiction.as_str())
    .bind(rule.effective_from)
    .bind(rule.active)
    .bind(&body)
    .execute(pool)
    .await?;
    Ok(())
}

/// All rules, ordered by series and `effective_from`.
pub async fn load_rules(pool: &PgPool) -> Result<Vec<DueDateRule>, StoreError> {
    let rows = sqlx::query_as::<_, (serde_json::Value,)>(
        "SELECT body FROM due_date_rules ORDER BY service_key, jurisdiction, effective_from",
    )
    .fetch_all(pool)
    .await?;
    from_documents(rows)
}

// ── Workflow templates ──────────────────────────────────────────────────────

/// Replace the stored versions of one service with a registry snapshot,
/// in a single transaction.
///
/// The service's revision row is moved forward first; when the stored
/// revision is already at or past `revision` the snapshot is stale and
/// nothing is written. Versions absent from the snapshot are deleted and
/// the published flag is cleared for the whole service before the upserts
/// so the partial unique index never sees two published rows mid-write.
pub async fn save_templates(
    pool: &PgPool,
    service_key: &ServiceKey,
    revision: u64,
    versions: &[WorkflowTemplate],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;

    let advanced = sqlx::query(
        "INSERT INTO workflow_template_revisions (service_key, revision)
         VALUES ($1, $2)
         ON CONFLICT (service_key) DO UPDATE SET revision = EXCLUDED.revision
         WHERE workflow_template_revisions.revision < EXCLUDED.revision",
    )
    .bind(service_key.as_str())
    .bind(revision_column(revision))
    .execute(&mut *tx)
    .await?
    .rows_affected();
    if advanced == 0 {
        tx.rollback().await?;
        tracing::debug!(service_key = %service_key, revision, "stale template snapshot skipped");
        return Ok(());
    }

    let kept: Vec<i64> = versions.iter().map(|t| i64::from(t.version)).collect();
    sqlx::query("DELETE FROM workflow_templates WHERE service_key = $1 AND NOT (version = ANY($2))")
        .bind(service_key.as_str())
        .bind(&kept)
        .execute(&mut *tx)
        .await?;

    sqlx::query("UPDATE workflow_templates SET is_published = FALSE WHERE service_key = $1")
        .bind(service_key.as_str())
        .execute(&mut *tx)
        .await?;

    for template in versions {
        let body = to_document(template)?;
        sqlx::query(
            "INSERT INTO workflow_templates (service_key, version, is_published, body, created_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (service_key, version)
             DO UPDATE SET is_published = EXCLUDED.is_published, body = EXCLUDED.body",
        )
        .bind(template.service_key.as_str())
        .bind(i64::from(template.version))
        .bind(template.is_published)
        .bind(&body)
        .bind(*template.created_at.as_datetime())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Stored registry revision per service.
pub async fn load_template_revisions(pool: &PgPool) -> Result<Vec<(ServiceKey, u64)>, StoreError> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT service_key, revision FROM workflow_template_revisions ORDER BY service_key",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|(key, revision)| {
            let key = ServiceKey::new(key).map_err(|e| StoreError::Rejected(e.to_string()))?;
            Ok((key, u64::try_from(revision).unwrap_or(0)))
        })
        .collect()
}

pub async fn load_templates(pool: &PgPool) -> Result<Vec<WorkflowTemplate>, StoreError> {
    let rows = sqlx::query_as::<_, (serde_json::Value,)>(
        "SELECT body FROM workflow_templates ORDER BY service_key, version",
    )
    .fetch_all(pool)
    .await?;
    from_documents(rows)
}

// ── Enrollments ─────────────────────────────────────────────────────────────

pub async fn upsert_enrollment(pool: &PgPool, enrollment: &Enrollment) -> Result<(), sqlx::Error> {
    let body = to_document(enrollment)?;
    sqlx::query(
        "INSERT INTO enrollments (entity_id, body, updated_at)
         VALUES ($1, $2, $3)
         ON CONFLICT (entity_id) DO UPDATE SET body = EXCLUDED.body, updated_at = EXCLUDED.updated_at",
    )
    .bind(enrollment.entity_id.as_str())
    .bind(&body)
    .bind(*enrollment.updated_at.as_datetime())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn load_enrollments(pool: &PgPool) -> Result<Vec<Enrollment>, StoreError> {
    let rows = sqlx::query_as::<_, (serde_json::Value,)>(
        "SELECT body FROM enrollments ORDER BY entity_id",
    )
    .fetch_all(pool)
    .await?;
    from_documents(rows)
}
