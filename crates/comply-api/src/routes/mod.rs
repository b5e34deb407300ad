//! # API Route Modules
//!
//! One module per resource. Handlers parse and authorize the request,
//! delegate to the [`ComplianceEngine`](comply_engine::ComplianceEngine),
//! persist what changed and map the result to a response view. No business
//! rules live here.

pub mod dashboard;
pub mod enrollments;
pub mod obligations;
pub mod reviews;
pub mod rules;
pub mod scheduler;
pub mod services;
pub mod workflows;

use comply_core::{EntityId, InstanceId, ReviewId, ServiceKey, Timestamp};
use uuid::Uuid;

use crate::auth::{CallerIdentity, Role};
use crate::error::AppError;

pub(crate) fn service_key(raw: &str) -> Result<ServiceKey, AppError> {
    Ok(ServiceKey::new(raw)?)
}

pub(crate) fn instance_id(raw: Uuid) -> InstanceId {
    InstanceId(raw)
}

pub(crate) fn review_id(raw: Uuid) -> ReviewId {
    ReviewId(raw)
}

pub(crate) fn iso(ts: &Timestamp) -> String {
    ts.to_iso8601()
}

pub(crate) fn iso_opt(ts: &Option<Timestamp>) -> Option<String> {
    ts.as_ref().map(Timestamp::to_iso8601)
}

/// Clients may only touch obligations of the entity they act for; the
/// entity id is their actor id. Other roles see every entity.
pub(crate) fn ensure_entity_access(caller: &CallerIdentity, entity_id: &EntityId) -> Result<(), AppError> {
    if caller.role == Role::Client && caller.actor_id != entity_id.as_str() {
        return Err(AppError::Forbidden(format!(
            "client '{}' may not access entity '{}'",
            caller.actor_id, entity_id
        )));
    }
    Ok(())
}
