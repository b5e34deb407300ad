//! # Template Registry
//!
//! Versions per service, with `published_version` as the single source of
//! truth for which one is authoritative. The `is_published` flag on each
//! stored version is rewritten under the same write lock.
//!
//! Each service also carries a revision, bumped by every change, so a
//! snapshot written to storage can be ordered against a concurrent one.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use comply_core::{EngineError, ServiceKey, Timestamp, ValidationError};

use crate::template::{StepPayload, WorkflowTemplate};

#[derive(Debug, Default)]
struct ServiceTemplates {
    /// Ordered by version; index `i` holds version `i + 1` unless restored
    /// from storage with gaps.
    versions: Vec<WorkflowTemplate>,
    published_version: Option<u32>,
    revision: u64,
}

impl ServiceTemplates {
    fn find(&self, version: u32) -> Option<&WorkflowTemplate> {
        self.versions.iter().find(|t| t.version == version)
    }

    fn set_published(&mut self, version: u32) {
        for t in &mut self.versions {
            t.is_published = t.version == version;
        }
        self.published_version = Some(version);
        self.revision += 1;
    }
}

/// Thread-safe registry of workflow template versions.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    inner: Arc<RwLock<HashMap<ServiceKey, ServiceTemplates>>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new unpublished version numbered `max(existing) + 1`.
    pub fn create_version(
        &self,
        service_key: ServiceKey,
        payload: StepPayload,
        author: impl Into<String>,
    ) -> Result<WorkflowTemplate, ValidationError> {
        payload.validate()?;
        let mut inner = self.inner.write();
        let entry = inner.entry(service_key.clone()).or_default();
        let version = entry.versions.iter().map(|t| t.version).max().unwrap_or(0) + 1;
        let template = WorkflowTemplate {
            service_key,
            version,
            payload,
            is_published: false,
            author: author.into(),
            created_at: Timestamp::now(),
        };
        entry.versions.push(template.clone());
        entry.revision += 1;
        tracing::info!(
            service_key = %template.service_key,
            version,
            "workflow template version created"
        );
        Ok(template)
    }

    /// Make `version` the authoritative template of the service.
    pub fn publish(&self, service_key: &ServiceKey, version: u32) -> Result<WorkflowTemplate, EngineError> {
        let mut inner = self.inner.write();
        let entry = inner
            .get_mut(service_key)
            .filter(|e| e.find(version).is_some())
            .ok_or_else(|| EngineError::not_found("workflow version", format!("{service_key} v{version}")))?;
        entry.set_published(version);
        tracing::info!(service_key = %service_key, version, "workflow template published");
        entry
            .find(version)
            .cloned()
            .ok_or_else(|| EngineError::not_found("workflow version", format!("{service_key} v{version}")))
    }

    /// Publish only if the currently published version is `expected_current`.
    ///
    /// `None` means "nothing is published yet". A mismatch is a `Conflict`
    /// and leaves the registry untouched, unless `version` is already the
    /// published one: a replayed publish returns it without a change.
    pub fn publish_if(
        &self,
        service_key: &ServiceKey,
        version: u32,
        expected_current: Option<u32>,
    ) -> Result<WorkflowTemplate, EngineError> {
        let mut inner = self.inner.write();
        let entry = inner
            .get_mut(service_key)
            .filter(|e| e.find(version).is_some())
            .ok_or_else(|| EngineError::not_found("workflow version", format!("{service_key} v{version}")))?;
        if entry.published_version == Some(version) {
            return entry
                .find(version)
                .cloned()
                .ok_or_else(|| EngineError::not_found("workflow version", format!("{service_key} v{version}")));
        }
        if entry.published_version != expected_current {
            return Err(EngineError::Conflict(format!(
                "published version of {service_key} is {}, expected {}",
                describe(entry.published_version),
                describe(expected_current),
            )));
        }
        entry.set_published(version);
        tracing::info!(service_key = %service_key, version, "workflow template published (cas)");
        entry
            .find(version)
            .cloned()
            .ok_or_else(|| EngineError::not_found("workflow version", format!("{service_key} v{version}")))
    }

    /// The authoritative template of a service.
    pub fn resolve_published(&self, service_key: &ServiceKey) -> Result<WorkflowTemplate, EngineError> {
        let inner = self.inner.read();
        inner
            .get(service_key)
            .and_then(|e| e.published_version.and_then(|v| e.find(v)))
            .cloned()
            .ok_or_else(|| EngineError::NoPublishedTemplate {
                service_key: service_key.to_string(),
            })
    }

    pub fn published_version(&self, service_key: &ServiceKey) -> Option<u32> {
        self.inner.read().get(service_key).and_then(|e| e.published_version)
    }

    /// All versions of a service, oldest first.
    pub fn versions(&self, service_key: &ServiceKey) -> Vec<WorkflowTemplate> {
        self.inner
            .read()
            .get(service_key)
            .map(|e| e.versions.clone())
            .unwrap_or_default()
    }

    pub fn version(&self, service_key: &ServiceKey, version: u32) -> Option<WorkflowTemplate> {
        self.inner
            .read()
            .get(service_key)
            .and_then(|e| e.find(version))
            .cloned()
    }

    /// Undo a `create_version` that could not be stored. Published
    /// versions are never withdrawn.
    pub fn withdraw_version(&self, service_key: &ServiceKey, version: u32) -> bool {
        let mut inner = self.inner.write();
        let Some(entry) = inner.get_mut(service_key) else {
            return false;
        };
        if entry.published_version == Some(version) {
            return false;
        }
        let before = entry.versions.len();
        entry.versions.retain(|t| t.version != version);
        if entry.versions.len() == before {
            return false;
        }
        entry.revision += 1;
        true
    }

    /// Every version of a service with the revision they were read at.
    pub fn snapshot(&self, service_key: &ServiceKey) -> (u64, Vec<WorkflowTemplate>) {
        self.inner
            .read()
            .get(service_key)
            .map(|e| (e.revision, e.versions.clone()))
            .unwrap_or_default()
    }

    pub fn revision(&self, service_key: &ServiceKey) -> u64 {
        self.inner.read().get(service_key).map_or(0, |e| e.revision)
    }

    /// Raise a service's revision to at least `revision` (hydration).
    pub fn restore_revision(&self, service_key: &ServiceKey, revision: u64) {
        let mut inner = self.inner.write();
        let entry = inner.entry(service_key.clone()).or_default();
        entry.revision = entry.revision.max(revision);
    }

    /// Re-insert a persisted version, keeping its number and published flag.
    pub fn restore(&self, template: WorkflowTemplate) -> Result<(), ValidationError> {
        template.payload.validate()?;
        let mut inner = self.inner.write();
        let entry = inner.entry(template.service_key.clone()).or_default();
        if entry.find(template.version).is_some() {
            return Err(ValidationError::Duplicate {
                kind: "workflow version",
                key: format!("{} v{}", template.service_key, template.version),
            });
        }
        let published = template.is_published.then_some(template.version);
        let pos = entry
            .versions
            .partition_point(|t| t.version < template.version);
        entry.versions.insert(pos, template);
        if let Some(version) = published {
            entry.set_published(version);
        }
        Ok(())
    }
}

fn describe(version: Option<u32>) -> String {
    version.map_or_else(|| "none".to_string(), |v| format!("v{v}"))
}
