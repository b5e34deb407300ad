//! # Catalog Bootstrap Document
//!
//! A YAML document describing services, doc types, due-date rules, workflow
//! templates and enrollments, loaded at startup (`CATALOG_CONFIG`) and
//! checked offline by `comply rules validate`.
//!
//! ```yaml
//! services:
//!   - service_key: gst-monthly
//!     display_name: GST monthly return
//!     periodicity: MONTHLY
//!     category: tax
//!     doc_types:
//!       - { doc_code: sales-register, label: Sales register, client_uploads: true, mandatory: true }
//! rules:
//!   - service_key: gst-monthly
//!     jurisdiction: IN-KA
//!     effective_from: 2025-01-01
//!     payload: { periodicity: MONTHLY, dueDayOfMonth: 20, nudges: { tMinus: [7, 3, 1] } }
//! templates:
//!   - service_key: gst-monthly
//!     publish: true
//!     payload: { steps: [{ key: collect, name: Collect documents }] }
//! enrollments:
//!   - { entity_id: acme, jurisdiction: IN-KA, services: [gst-monthly] }
//! ```
//!
//! Parsing validates every payload; [`CatalogConfig::apply`] then registers
//! entries in document order and names the offending entry on failure.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use comply_core::{EngineError, EntityId, JurisdictionCode, Periodicity, ServiceKey};
use comply_rules::{DocType, DocTypeFlags, RulePayload, ServiceDefinition};
use comply_workflow::StepPayload;

use crate::engine::ComplianceEngine;

/// Errors loading or applying a catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The document is not valid YAML or does not match the catalog shape.
    #[error("catalog parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// An entry was rejected by the engine.
    #[error("catalog entry {entry}: {source}")]
    Entry {
        entry: String,
        #[source]
        source: EngineError,
    },
}

/// Root of the catalog document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CatalogConfig {
    #[serde(default)]
    pub services: Vec<ServiceEntry>,
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
    #[serde(default)]
    pub templates: Vec<TemplateEntry>,
    #[serde(default)]
    pub enrollments: Vec<EnrollmentEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub service_key: ServiceKey,
    pub display_name: String,
    pub periodicity: Periodicity,
    pub category: String,
    #[serde(default)]
    pub doc_types: Vec<DocTypeEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocTypeEntry {
    pub doc_code: String,
    pub label: String,
    #[serde(flatten)]
    pub flags: DocTypeFlags,
    #[serde(default)]
    pub step_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEntry {
    pub service_key: ServiceKey,
    pub jurisdiction: JurisdictionCode,
    pub effective_from: NaiveDate,
    pub payload: RulePayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateEntry {
    pub service_key: ServiceKey,
    #[serde(default = "default_author")]
    pub author: String,
    /// Publish the version right after creating it.
    #[serde(default)]
    pub publish: bool,
    pub payload: StepPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentEntry {
    pub entity_id: EntityId,
    pub jurisdiction: JurisdictionCode,
    pub services: Vec<ServiceKey>,
}

fn default_author() -> String {
    "catalog".to_string()
}

/// Counts of what [`CatalogConfig::apply`] registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatalogSummary {
    pub services: usize,
    pub doc_types: usize,
    pub rules: usize,
    pub templates: usize,
    pub published: usize,
    pub enrollments: usize,
}

impl CatalogConfig {
    pub fn from_yaml(source: &str) -> Result<Self, CatalogError> {
        Ok(serde_yaml::from_str(source)?)
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
            && self.rules.is_empty()
            && self.templates.is_empty()
            && self.enrollments.is_empty()
    }

    /// Register every entry with `engine`. Stops at the first rejected entry;
    /// entries before it stay registered.
    pub fn apply(&self, engine: &ComplianceEngine) -> Result<CatalogSummary, CatalogError> {
        let mut summary = CatalogSummary::default();

        for svc in &self.services {
            let entry = || format!("service {}", svc.service_key);
            let def = ServiceDefinition::new(
                svc.service_key.clone(),
                svc.display_name.clone(),
                svc.periodicity,
                svc.category.clone(),
            )
            .map_err(|e| entry_error(entry(), e.into()))?;
            engine
                .rules()
                .register_service(def)
                .map_err(|e| entry_error(entry(), e.into()))?;
            summary.services += 1;

            for dt in &svc.doc_types {
                let entry = || format!("doc type {}/{}", svc.service_key, dt.doc_code);
                let doc_type = DocType::new(
                    svc.service_key.clone(),
                    dt.doc_code.clone(),
                    dt.label.clone(),
                    dt.flags,
                    dt.step_key.clone(),
                )
                .map_err(|e| entry_error(entry(), e.into()))?;
                engine
                    .rules()
                    .add_doc_type(doc_type)
                    .map_err(|e| entry_error(entry(), e.into()))?;
                summary.doc_types += 1;
            }
        }

        for rule in &self.rules {
            engine
                .rules()
                .add_rule(
                    rule.service_key.clone(),
                    rule.jurisdiction.clone(),
                    rule.payload.clone(),
                    rule.effective_from,
                )
                .map_err(|e| {
                    entry_error(
                        format!(
                            "rule {}/{}@{}",
                            rule.service_key, rule.jurisdiction, rule.effective_from
                        ),
                        e.into(),
                    )
                })?;
            summary.rules += 1;
        }

        for tpl in &self.templates {
            let entry = || format!("template {}", tpl.service_key);
            if engine.rules().service(&tpl.service_key).is_none() {
                return Err(entry_error(
                    entry(),
                    comply_core::ValidationError::UnknownService(tpl.service_key.to_string()).into(),
                ));
            }
            let created = engine
                .templates()
                .create_version(tpl.service_key.clone(), tpl.payload.clone(), tpl.author.clone())
                .map_err(|e| entry_error(entry(), e.into()))?;
            summary.templates += 1;
            if tpl.publish {
                engine
                    .templates()
                    .publish(&tpl.service_key, created.version)
                    .map_err(|e| entry_error(entry(), e))?;
                summary.published += 1;
            }
        }

        for enr in &self.enrollments {
            engine
                .enroll(enr.entity_id.clone(), enr.jurisdiction.clone(), enr.services.clone())
                .map_err(|e| entry_error(format!("enrollment {}", enr.entity_id), e))?;
            summary.enrollments += 1;
        }

        tracing::info!(
            services = summary.services,
            doc_types = summary.doc_types,
            rules = summary.rules,
            templates = summary.templates,
            published = summary.published,
            enrollments = summary.enrollments,
            "catalog applied"
        );
        Ok(summary)
    }
}

fn entry_error(entry: String, source: EngineError) -> CatalogError {
    CatalogError::Entry { entry, source }
}
