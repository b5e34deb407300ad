//! # comply-cli — Operator CLI for the Compliance Engine
//!
//! Offline tooling over the same crates the API runs on. Nothing here
//! talks to a running server.
//!
//! ## Subcommands
//!
//! - `comply rules validate <file>` — Parse a YAML catalog and apply it to a
//!   scratch engine, reporting the first rejected entry.
//! - `comply schedule preview` — Due date and reminders of one period.
//! - `comply score <checklist.json>` — Weighted score and approval verdict.
//!
//! Exit codes: 0 on success, 1 when the input is rejected, 2 on
//! operational errors (unreadable file).

pub mod rules;
pub mod schedule;
pub mod score;

use std::path::Path;

use anyhow::{Context, Result};

use comply_engine::{CatalogConfig, ComplianceEngine, EngineConfig};

/// Read a file to a string, naming it in the error.
pub fn read_input(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))
}

/// Parse `path` as a catalog and apply it to a fresh in-memory engine.
pub fn load_engine(path: &Path) -> Result<(ComplianceEngine, comply_engine::CatalogSummary)> {
    let source = read_input(path)?;
    let catalog = CatalogConfig::from_yaml(&source)
        .with_context(|| format!("{} is not a valid catalog", path.display()))?;
    let engine = ComplianceEngine::in_memory(EngineConfig::default());
    let summary = catalog
        .apply(&engine)
        .with_context(|| format!("{} was rejected", path.display()))?;
    tracing::debug!(
        path = %path.display(),
        services = summary.services,
        rules = summary.rules,
        templates = summary.templates,
        "catalog loaded"
    );
    Ok((engine, summary))
}
