//! # comply-core — Foundational Types for the Obligation Engine
//!
//! Leaf crate of the workspace. Defines the primitives every other crate
//! shares: identifier newtypes, the periodicity/period calendar model,
//! UTC timestamps, and the engine-wide error taxonomy.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** `ServiceKey`, `EntityId`,
//!    `JurisdictionCode`, `InstanceId`, `RuleId`, `ReviewId` are distinct
//!    types with validated constructors. No bare strings cross crate
//!    boundaries as identifiers.
//!
//! 2. **Periods are values, not strings.** `Period` parses `2025-03`,
//!    `2025-Q1` and `2025` once at the edge; everything downstream works
//!    with calendar arithmetic on `chrono::NaiveDate`.
//!
//! 3. **One error taxonomy.** [`EngineError`] carries every failure class
//!    the engine surfaces. Configuration gaps (`NoRuleFound`,
//!    `NoPublishedTemplate`) are distinguishable from transient failures.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `comply-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod error;
pub mod identity;
pub mod period;
pub mod temporal;

pub use error::{EngineError, ValidationError};
pub use identity::{EntityId, InstanceId, JurisdictionCode, ReviewId, RuleId, ServiceKey};
pub use period::{Period, Periodicity};
pub use temporal::Timestamp;
