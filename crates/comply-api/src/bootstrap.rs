//! # Catalog Bootstrap
//!
//! On first start, seeds the engine from the YAML catalog named by
//! `CATALOG_CONFIG` and writes what it registered through to the database.
//! A store that already holds services is never re-seeded, so edits made
//! through the API survive restarts.

use std::path::{Path, PathBuf};

use thiserror::Error;

use comply_engine::{CatalogConfig, CatalogError, CatalogSummary};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("cannot read catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("failed to persist catalog: {0}")]
    Store(#[from] AppError),
}

/// Read and parse a catalog file.
pub fn load_catalog(path: &Path) -> Result<CatalogConfig, BootstrapError> {
    let source = std::fs::read_to_string(path).map_err(|source| BootstrapError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(CatalogConfig::from_yaml(&source)?)
}

/// Apply the configured catalog if the engine holds no services yet.
///
/// Returns `None` when no catalog is configured or the engine is already
/// seeded.
pub async fn apply_catalog(state: &AppState) -> Result<Option<CatalogSummary>, BootstrapError> {
    let Some(path) = state.config.catalog_path.as_deref() else {
        return Ok(None);
    };
    if !state.engine.rules().services().is_empty() {
        tracing::info!(path = %path.display(), "services already present, catalog not applied");
        return Ok(None);
    }

    let catalog = load_catalog(path)?;
    let summary = catalog.apply(&state.engine)?;
    persist_seeded(state).await?;
    Ok(Some(summary))
}

async fn persist_seeded(state: &AppState) -> Result<(), AppError> {
    let rules = state.engine.rules();
    for service in rules.services() {
        state.persist_service(&service).await?;
        for doc in rules.doc_types_for(&service.service_key) {
            state.persist_doc_type(&doc).await?;
        }
        state.persist_templates(&service.service_key).await?;
    }
    for rule in rules.all_rules() {
        state.persist_rule(&rule).await?;
    }
    for enrollment in state.engine.enrollments().list() {
        state.persist_enrollment(&enrollment).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::state::AppConfig;

    const CATALOG: &str = r#"
services:
  - service_key: gst-monthly
    display_name: GST monthly return
    periodicity: MONTHLY
    category: tax
rules:
  - service_key: gst-monthly
    jurisdiction: IN-KA
    effective_from: 2024-01-01
    payload:
      periodicity: MONTHLY
      dueDayOfMonth: 20
templates:
  - service_key: gst-monthly
    author: seed
    publish: true
    payload:
      steps:
        - key: collect
          name: Collect invoices
      checklist: []
enrollments:
  - entity_id: acme
    jurisdiction: IN-KA
    services: [gst-monthly]
"#;

    fn catalog_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn state_for(path: &Path) -> AppState {
        AppState::with_config(AppConfig {
            catalog_path: Some(path.to_path_buf()),
            ..AppConfig::default()
        })
    }

    #[tokio::test]
    async fn seeds_empty_engine() {
        let file = catalog_file(CATALOG);
        let state = state_for(file.path());

        let summary = apply_catalog(&state).await.unwrap().unwrap();
        assert_eq!(summary.services, 1);
        assert_eq!(summary.rules, 1);
        assert_eq!(summary.published, 1);
        assert_eq!(summary.enrollments, 1);
        assert_eq!(state.engine.enrollments().list().len(), 1);
    }

    #[tokio::test]
    async fn skips_when_already_seeded() {
        let file = catalog_file(CATALOG);
        let state = state_for(file.path());
        apply_catalog(&state).await.unwrap();

        assert!(apply_catalog(&state).await.unwrap().is_none());
        assert_eq!(state.engine.rules().all_rules().len(), 1);
    }

    #[tokio::test]
    async fn no_path_means_nothing_to_do() {
        let state = AppState::new();
        assert!(apply_catalog(&state).await.unwrap().is_none());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_catalog(Path::new("/nonexistent/catalog.yaml")).unwrap_err();
        assert!(matches!(err, BootstrapError::Io { .. }));
    }

    #[test]
    fn malformed_yaml_is_catalog_error() {
        let file = catalog_file("services: [unterminated");
        let err = load_catalog(file.path()).unwrap_err();
        assert!(matches!(err, BootstrapError::Catalog(_)));
    }
}
