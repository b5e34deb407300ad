//! # comply-workflow — Workflow Template Registry
//!
//! Each service owns an append-only list of template versions. Versions
//! number from 1 and never reuse a number. At most one version per service
//! is published; the published version is the one new obligation instances
//! are created from.
//!
//! - **Template** (`template.rs`): the step payload (ordered steps plus the
//!   review checklist seed), validated at ingestion.
//! - **Registry** (`registry.rs`): version creation, atomic publish and
//!   compare-and-set publish, published-version resolution.
//!
//! ## Publish Atomicity
//!
//! Publishing flips the flag on the chosen version and clears it on every
//! other version of the service while holding the registry's write lock.
//! Readers take the read lock, so no reader observes a service with zero
//! or two published versions mid-publish.

pub mod registry;
pub mod template;

pub use registry::TemplateRegistry;
pub use template::{ChecklistSeed, StepDefinition, StepPayload, WorkflowTemplate};
