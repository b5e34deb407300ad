//! # Application State
//!
//! Shared state for the Axum application, passed to all route handlers
//! via the `State` extractor.
//!
//! The [`ComplianceEngine`] owns every in-memory store. When a database
//! pool is configured, handlers call the `persist_*` helpers after each
//! successful mutation; they are no-ops in in-memory-only mode.
//!
//! Lifecycle records that fail to persist are tracked in
//! [`PendingWrites`] and rewritten by [`AppState::flush_pending`]. Catalog
//! creates that fail to persist are withdrawn from memory by their
//! handlers instead, so a retry repeats the whole create.

use std::path::PathBuf;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use thiserror::Error;

use comply_core::{InstanceId, ServiceKey, Timestamp};
use comply_engine::{ComplianceEngine, EngineConfig, Enrollment};
use comply_review::QualityReview;
use comply_rules::{DocType, DueDateRule, ServiceDefinition};
use comply_state::ObligationInstance;

use crate::auth::SecretToken;
use crate::db::pending::{PendingRecord, PendingWrites};
use crate::db::{self, StoreError};
use crate::error::AppError;
use crate::middleware::metrics::ApiMetrics;

// ── Configuration ───────────────────────────────────────────────────────────

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Invalid environment configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Application configuration.
///
/// Custom `Debug` redacts the auth token and database URL to prevent
/// credential leakage in logs.
#[derive(Clone)]
pub struct AppConfig {
    /// Port to bind the HTTP server to.
    pub port: u16,
    /// Shared bearer secret. If `None`, authentication is disabled.
    pub auth_token: Option<SecretToken>,
    /// Postgres URL. If `None`, state lives in memory only.
    pub database_url: Option<SecretToken>,
    /// YAML catalog applied on first start.
    pub catalog_path: Option<PathBuf>,
    pub engine: EngineConfig,
    /// Per-attempt timeout of store writes.
    pub store_timeout: Duration,
    pub log_format: LogFormat,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("database_url", &self.database_url.as_ref().map(|_| "[REDACTED]"))
            .field("catalog_path", &self.catalog_path)
            .field("engine", &self.engine)
            .field("store_timeout", &self.store_timeout)
            .field("log_format", &self.log_format)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            auth_token: None,
            database_url: None,
            catalog_path: None,
            engine: EngineConfig::default(),
            store_timeout: Duration::from_millis(2000),
            log_format: LogFormat::Text,
        }
    }
}

impl AppConfig {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable lookup.
    ///
    /// Unset or empty variables take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        let mut engine = defaults.engine.clone();

        let port = parse_var(&get, "PORT", defaults.port)?;
        engine.sla_buffer_days = parse_var(&get, "SLA_BUFFER_DAYS", engine.sla_buffer_days)?;
        engine.max_rework = parse_var(&get, "MAX_REWORK_COUNT", engine.max_rework)?;
        engine.reminder_hour = parse_var(&get, "REMINDER_HOUR_UTC", engine.reminder_hour)?;
        if engine.reminder_hour > 23 {
            return Err(invalid("REMINDER_HOUR_UTC", engine.reminder_hour, "must be 0-23"));
        }
        let tick_secs: u64 = parse_var(&get, "SCHEDULER_TICK_SECS", engine.tick_interval.as_secs())?;
        if tick_secs == 0 {
            return Err(invalid("SCHEDULER_TICK_SECS", tick_secs, "must be positive"));
        }
        engine.tick_interval = Duration::from_secs(tick_secs);
        let timeout_ms: u64 = parse_var(&get, "STORE_TIMEOUT_MS", 2000)?;
        if timeout_ms == 0 {
            return Err(invalid("STORE_TIMEOUT_MS", timeout_ms, "must be positive"));
        }

        let log_format = match get("LOG_FORMAT").as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => return Err(invalid("LOG_FORMAT", other, "expected 'text' or 'json'")),
        };

        Ok(Self {
            port,
            auth_token: get("AUTH_TOKEN").map(SecretToken::new),
            database_url: get("DATABASE_URL").map(SecretToken::new),
            catalog_path: get("CATALOG_CONFIG").map(PathBuf::from),
            engine,
            store_timeout: Duration::from_millis(timeout_ms),
            log_format,
        })
    }
}

fn parse_var<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| invalid(var, &raw, e)),
    }
}

fn invalid(var: &'static str, value: impl ToString, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

// ── State ───────────────────────────────────────────────────────────────────

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: ComplianceEngine,
    /// `None` in in-memory-only mode.
    pub db_pool: Option<PgPool>,
    /// HTTP request and error counters.
    pub metrics: ApiMetrics,
    /// Renders the domain counters recorded through the `metrics` facade.
    /// Only the binary installs a recorder.
    pub prometheus: Option<PrometheusHandle>,
    /// Lifecycle records the store is behind on.
    pub pending: PendingWrites,
    pub config: AppConfig,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("engine", &self.engine)
            .field("db_pool", &self.db_pool.is_some())
            .field("metrics", &self.metrics)
            .field("prometheus", &self.prometheus.is_some())
            .field("pending_writes", &self.pending.len())
            .field("config", &self.config)
            .finish()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    /// In-memory state with default configuration.
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    /// In-memory state with the given configuration.
    pub fn with_config(config: AppConfig) -> Self {
        let engine = ComplianceEngine::in_memory(config.engine.clone());
        Self::with_engine(engine, config)
    }

    /// State around an existing engine (custom collaborators).
    pub fn with_engine(engine: ComplianceEngine, config: AppConfig) -> Self {
        Self {
            engine,
            db_pool: None,
            metrics: ApiMetrics::new(),
            prometheus: None,
            pending: PendingWrites::new(),
            config,
        }
    }

    pub fn with_pool(mut self, pool: Option<PgPool>) -> Self {
        self.db_pool = pool;
        self
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }

    // ── Write-through persistence ───────────────────────────────────

    pub async fn persist_instance(&self, inst: &ObligationInstance) -> Result<(), AppError> {
        let Some(pool) = &self.db_pool else {
            return Ok(());
        };
        let record = PendingRecord::Instance(inst.id);
        let written = db::with_retry("obligation instance", self.config.store_timeout, || {
            db::obligations::upsert_instance(pool, inst)
        })
        .await;
        self.track(record, inst.revision, written)
    }

    pub async fn persist_review(&self, review: &QualityReview) -> Result<(), AppError> {
        let Some(pool) = &self.db_pool else {
            return Ok(());
        };
        let record = PendingRecord::Review(review.id);
        let written = db::with_retry("quality review", self.config.store_timeout, || {
            db::obligations::upsert_review(pool, review)
        })
        .await;
        self.track(record, review.revision, written)
    }

    /// Persist the current metadata of one document of an instance.
    pub async fn persist_document(&self, instance_id: &InstanceId, doc_code: &str) -> Result<(), AppError> {
        let Some(pool) = &self.db_pool else {
            return Ok(());
        };
        let record = PendingRecord::Document(*instance_id, doc_code.to_string());
        let Some(meta) = self.engine.documents().document_metadata(instance_id, doc_code) else {
            self.pending.discard(&record);
            return Ok(());
        };
        let written = db::with_retry("document metadata", self.config.store_timeout, || {
            db::obligations::upsert_document(pool, instance_id, doc_code, &meta)
        })
        .await;
        self.track(record, 0, written)
    }

    fn track(&self, record: PendingRecord, revision: u64, written: Result<(), StoreError>) -> Result<(), AppError> {
        match written {
            Ok(()) => {
                self.pending.settle(&record, revision);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(record = %record, revision, error = %e, "write-through failed, record left pending");
                self.pending.mark(record, revision);
                Err(e.into())
            }
        }
    }

    /// Rewrite the current state of every pending record.
    ///
    /// Returns how many are still pending afterwards.
    pub async fn flush_pending(&self) -> usize {
        for record in self.pending.records() {
            let result = match &record {
                PendingRecord::Instance(id) => match self.engine.instance(id) {
                    Ok(inst) => self.persist_instance(&inst).await,
                    Err(_) => {
                        self.pending.discard(&record);
                        continue;
                    }
                },
                PendingRecord::Review(id) => match self.engine.review(id) {
                    Ok(review) => self.persist_review(&review).await,
                    Err(_) => {
                        self.pending.discard(&record);
                        continue;
                    }
                },
                PendingRecord::Document(id, code) => self.persist_document(id, code).await,
            };
            if result.is_err() {
                // The store is still down; the rest would fail the same way.
                break;
            }
            tracing::info!(record = %record, "pending write flushed");
        }
        self.pending.len()
    }

    /// Record reminders the dispatcher accepted so a restart does not
    /// deliver them again.
    pub async fn persist_deliveries(&self, delivered: &[(InstanceId, Timestamp)]) -> Result<(), AppError> {
        let Some(pool) = &self.db_pool else {
            return Ok(());
        };
        if delivered.is_empty() {
            return Ok(());
        }
        db::with_retry("reminder deliveries", self.config.store_timeout, || {
            db::obligations::insert_deliveries(pool, delivered)
        })
        .await?;
        Ok(())
    }

    pub async fn persist_service(&self, service: &ServiceDefinition) -> Result<(), AppError> {
        let Some(pool) = &self.db_pool else {
            return Ok(());
        };
        db::with_retry("service", self.config.store_timeout, || {
            db::catalog::upsert_service(pool, service)
        })
        .await?;
        Ok(())
    }

    pub async fn persist_doc_type(&self, doc: &DocType) -> Result<(), AppError> {
        let Some(pool) = &self.db_pool else {
            return Ok(());
        };
        db::with_retry("doc type", self.config.store_timeout, || {
            db::catalog::upsert_doc_type(pool, doc)
        })
        .await?;
        Ok(())
    }

    pub async fn persist_rule(&self, rule: &DueDateRule) -> Result<(), AppError> {
        let Some(pool) = &self.db_pool else {
            return Ok(());
        };
        db::with_retry("due-date rule", self.config.store_timeout, || {
            db::catalog::upsert_rule(pool, rule)
        })
        .await?;
        Ok(())
    }

    /// Persist every template version of a service, published flags
    /// included. A snapshot older than the stored one is skipped.
    pub async fn persist_templates(&self, service_key: &ServiceKey) -> Result<(), AppError> {
        let Some(pool) = &self.db_pool else {
            return Ok(());
        };
        let (revision, versions) = self.engine.templates().snapshot(service_key);
        db::with_retry("workflow templates", self.config.store_timeout, || {
            db::catalog::save_templates(pool, service_key, revision, &versions)
        })
        .await?;
        Ok(())
    }

    pub async fn persist_enrollment(&self, enrollment: &Enrollment) -> Result<(), AppError> {
        let Some(pool) = &self.db_pool else {
            return Ok(());
        };
        db::with_retry("enrollment", self.config.store_timeout, || {
            db::catalog::upsert_enrollment(pool, enrollment)
        })
        .await?;
        Ok(())
    }

    // ── Hydration ───────────────────────────────────────────────────

    /// Rebuild the engine's in-memory stores from the database.
    ///
    /// Called once on startup when a pool is available. Records are
    /// restored in dependency order: services before their doc types,
    /// rules and templates; instances before their reviews and documents.
    pub async fn hydrate_from_db(&self) -> Result<(), StoreError> {
        let Some(pool) = &self.db_pool else {
            return Ok(());
        };
        let rejected = |what: &str, e: &dyn std::fmt::Display| StoreError::Rejected(format!("{what}: {e}"));

        let services = db::catalog::load_services(pool).await?;
        let service_count = services.len();
        for service in services {
            let key = service.service_key.to_string();
            self.engine
                .rules()
                .register_service(service)
                .map_err(|e| rejected(&format!("service {key}"), &e))?;
        }

        for doc in db::catalog::load_doc_types(pool).await? {
            let key = format!("doc type {}/{}", doc.service_key, doc.doc_code);
            self.engine
                .rules()
                .add_doc_type(doc)
                .map_err(|e| rejected(&key, &e))?;
        }

        let rules = db::catalog::load_rules(pool).await?;
        let rule_count = rules.len();
        for rule in rules {
            let key = format!("rule {}", rule.id);
            self.engine
                .rules()
                .restore_rule(rule)
                .map_err(|e| rejected(&key, &e))?;
        }

        let templates = db::catalog::load_templates(pool).await?;
        let template_count = templates.len();
        for template in templates {
            let key = format!("template {} v{}", template.service_key, template.version);
            self.engine
                .templates()
                .restore(template)
                .map_err(|e| rejected(&key, &e))?;
        }

        for (service_key, revision) in db::catalog::load_template_revisions(pool).await? {
            self.engine.templates().restore_revision(&service_key, revision);
        }

        let enrollments = db::catalog::load_enrollments(pool).await?;
        let enrollment_count = enrollments.len();
        for enrollment in enrollments {
            self.engine.enrollments().upsert(enrollment);
        }

        let instances = db::obligations::load_instances(pool).await?;
        let instance_count = instances.len();
        for inst in instances {
            self.engine.restore_instance(inst);
        }

        let reviews = db::obligations::load_reviews(pool).await?;
        let review_count = reviews.len();
        for review in reviews {
            self.engine.restore_review(review);
        }

        let documents = db::obligations::load_documents(pool).await?;
        let document_count = documents.len();
        for (instance_id, doc_code, meta) in documents {
            self.engine.documents().record(&instance_id, &doc_code, meta);
        }

        let mut delivery_count = 0;
        for (instance_id, fires_at) in db::obligations::load_deliveries(pool).await? {
            let live = self
                .engine
                .instance(&instance_id)
                .is_ok_and(|inst| !inst.archived && !inst.status.is_sla_settled());
            if live {
                self.engine.trigger().mark_delivered(instance_id, fires_at);
                delivery_count += 1;
            }
        }

        tracing::info!(
            services = service_count,
            rules = rule_count,
            templates = template_count,
            enrollments = enrollment_count,
            instances = instance_count,
            reviews = review_count,
            documents = document_count,
            deliveries = delivery_count,
            "hydrated in-memory stores from database"
        );
        Ok(())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { .. } => Self::TransientStore(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}
