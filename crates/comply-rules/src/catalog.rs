//! # Service and Doc-Type Catalog
//!
//! Service definitions are created by administrators and never deleted,
//! only deactivated. Doc types describe which documents an obligation for
//! a service needs, and when.

use serde::{Deserialize, Serialize};

use comply_core::{Periodicity, ServiceKey, Timestamp, ValidationError};

/// A filing service offered to entities (e.g. monthly GST return).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Immutable identity.
    pub service_key: ServiceKey,
    /// Human-readable name.
    pub display_name: String,
    /// Nominal cadence. Rules override this for timing.
    pub periodicity: Periodicity,
    /// Grouping for dashboards (e.g. "tax", "corporate").
    pub category: String,
    /// Inactive services are skipped by the scheduler tick.
    pub active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl ServiceDefinition {
    /// Create an active service definition.
    pub fn new(
        service_key: ServiceKey,
        display_name: impl Into<String>,
        periodicity: Periodicity,
        category: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let display_name = non_empty("display_name", display_name.into())?;
        let category = non_empty("category", category.into())?;
        let now = Timestamp::now();
        Ok(Self {
            service_key,
            display_name,
            periodicity,
            category,
            active: true,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Partial update of a service's mutable metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceUpdate {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub periodicity: Option<Periodicity>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

impl ServiceUpdate {
    /// Apply to a definition, validating every provided field first.
    pub fn apply(self, def: &mut ServiceDefinition) -> Result<(), ValidationError> {
        let display_name = self
            .display_name
            .map(|n| non_empty("display_name", n))
            .transpose()?;
        let category = self.category.map(|c| non_empty("category", c)).transpose()?;

        if let Some(name) = display_name {
            def.display_name = name;
        }
        if let Some(category) = category {
            def.category = category;
        }
        if let Some(periodicity) = self.periodicity {
            def.periodicity = periodicity;
        }
        if let Some(active) = self.active {
            def.active = active;
        }
        def.updated_at = Timestamp::now();
        Ok(())
    }
}

/// Behavioral flags of a doc type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocTypeFlags {
    /// Uploaded by the client rather than operations staff.
    #[serde(default)]
    pub client_uploads: bool,
    /// Produced for the client after approval.
    #[serde(default)]
    pub is_deliverable: bool,
    /// Required before the relevant gate opens.
    #[serde(default)]
    pub mandatory: bool,
}

/// A document kind an obligation for a service collects or delivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocType {
    pub service_key: ServiceKey,
    /// Unique per service.
    pub doc_code: String,
    pub label: String,
    #[serde(flatten)]
    pub flags: DocTypeFlags,
    /// Workflow step whose completion makes this document due.
    #[serde(default)]
    pub step_key: Option<String>,
}

impl DocType {
    /// Create a validated doc type.
    pub fn new(
        service_key: ServiceKey,
        doc_code: impl Into<String>,
        label: impl Into<String>,
        flags: DocTypeFlags,
        step_key: Option<String>,
    ) -> Result<Self, ValidationError> {
        let doc_code = doc_code.into();
        let valid_code = !doc_code.is_empty()
            && doc_code.len() <= 64
            && doc_code
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid_code {
            return Err(ValidationError::Field {
                field: "doc_code",
                message: format!("invalid doc code {doc_code:?}"),
            });
        }
        Ok(Self {
            service_key,
            doc_code,
            label: non_empty("label", label.into())?,
            flags,
            step_key,
        })
    }

    /// Whether a document of this type must exist before review submission.
    ///
    /// Mandatory, non-deliverable doc types gate submission when they are
    /// unbound or bound to a step that has already passed.
    pub fn required_for_submission(&self, passed_steps: &[String]) -> bool {
        self.flags.mandatory
            && !self.flags.is_deliverable
            && self
                .step_key
                .as_ref()
                .map_or(true, |step| passed_steps.contains(step))
    }

    /// Whether delivery of this document is required before closing.
    pub fn required_for_close(&self) -> bool {
        self.flags.mandatory && self.flags.is_deliverable
    }
}

fn non_empty(field: &'static str, value: String) -> Result<String, ValidationError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Field {
            field,
            message: "must not be empty".to_string(),
        });
    }
    Ok(trimmed.to_string())
}
