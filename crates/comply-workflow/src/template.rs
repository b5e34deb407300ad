//! Step payloads and template versions.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use comply_core::{ServiceKey, Timestamp, ValidationError};

/// One step of a service workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Stable key, unique within the template. Doc types bind to it.
    pub key: String,
    pub name: String,
    /// Optional per-step target, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla_hours: Option<u32>,
}

/// A checklist item every review of an instance starts with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistSeed {
    pub category: String,
    pub item: String,
    #[serde(default)]
    pub is_mandatory: bool,
    pub weight: u32,
}

/// Step definition payload of a template version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepPayload {
    pub steps: Vec<StepDefinition>,
    #[serde(default)]
    pub checklist: Vec<ChecklistSeed>,
}

impl StepPayload {
    /// Reject empty step lists, blank or repeated step keys, and
    /// zero-weight checklist items.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.steps.is_empty() {
            return Err(ValidationError::InvalidTemplate(
                "at least one step is required".into(),
            ));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.key.trim().is_empty() {
                return Err(ValidationError::InvalidTemplate("step key must not be empty".into()));
            }
            if !seen.insert(step.key.as_str()) {
                return Err(ValidationError::InvalidTemplate(format!(
                    "duplicate step key {:?}",
                    step.key
                )));
            }
        }
        for seed in &self.checklist {
            if seed.item.trim().is_empty() {
                return Err(ValidationError::InvalidChecklist("item must not be empty".into()));
            }
            if seed.weight == 0 {
                return Err(ValidationError::InvalidChecklist(format!(
                    "item {:?} has zero weight",
                    seed.item
                )));
            }
        }
        Ok(())
    }

    /// Key of the first step.
    pub fn first_step(&self) -> Option<&str> {
        self.steps.first().map(|s| s.key.as_str())
    }

    /// Key of the step after `key`, or `None` when `key` is last or unknown.
    pub fn step_after(&self, key: &str) -> Option<&str> {
        let pos = self.steps.iter().position(|s| s.key == key)?;
        self.steps.get(pos + 1).map(|s| s.key.as_str())
    }

    pub fn has_step(&self, key: &str) -> bool {
        self.steps.iter().any(|s| s.key == key)
    }
}

/// One version of a service's workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub service_key: ServiceKey,
    /// Per-service, starting at 1.
    pub version: u32,
    pub payload: StepPayload,
    pub is_published: bool,
    pub author: String,
    pub created_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(key: &str) -> StepDefinition {
        StepDefinition {
            key: key.into(),
            name: key.to_uppercase(),
            sla_hours: None,
        }
    }

    fn payload(keys: &[&str]) -> StepPayload {
        StepPayload {
            steps: keys.iter().map(|k| step(k)).collect(),
            checklist: vec![],
        }
    }

    #[test]
    fn empty_and_duplicate_steps_rejected() {
        assert!(payload(&[]).validate().is_err());
        assert!(payload(&["collect", "collect"]).validate().is_err());
        assert!(payload(&["collect", " "]).validate().is_err());
        assert!(payload(&["collect", "file"]).validate().is_ok());
    }

    #[test]
    fn zero_weight_checklist_rejected() {
        let mut p = payload(&["collect"]);
        p.checklist.push(ChecklistSeed {
            category: "accuracy".into(),
            item: "Totals reconcile".into(),
            is_mandatory: true,
            weight: 0,
        });
        assert!(matches!(p.validate(), Err(ValidationError::InvalidChecklist(_))));
    }

    #[test]
    fn step_navigation() {
        let p = payload(&["collect", "prepare", "file"]);
        assert_eq!(p.first_step(), Some("collect"));
        assert_eq!(p.step_after("collect"), Some("prepare"));
        assert_eq!(p.step_after("file"), None);
        assert_eq!(p.step_after("missing"), None);
    }

    #[test]
    fn payload_deserializes_with_defaults() {
        let p: StepPayload = serde_json::from_value(serde_json::json!({
            "steps": [{ "key": "collect", "name": "Collect documents" }]
        }))
        .unwrap();
        assert!(p.checklist.is_empty());
        assert_eq!(p.steps[0].sla_hours, None);
    }
}
