//! # External Collaborators
//!
//! The engine never stores document bytes and never delivers notifications
//! itself. It talks to both through these traits. Implementations must be
//! cheap to call from under an instance lock: no blocking I/O.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use comply_core::{InstanceId, Timestamp};

use crate::notify::Reminder;

/// What the engine knows about an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub uploaded_at: Timestamp,
    pub verified: bool,
}

/// Metadata view of the document blob store.
pub trait DocumentStore: Send + Sync {
    fn has_document(&self, instance_id: &InstanceId, doc_code: &str) -> bool {
        self.document_metadata(instance_id, doc_code).is_some()
    }

    fn document_metadata(&self, instance_id: &InstanceId, doc_code: &str) -> Option<DocumentMeta>;

    /// Register (or replace) the document for `doc_code`.
    fn record(&self, instance_id: &InstanceId, doc_code: &str, meta: DocumentMeta);

    /// Every document recorded for an instance, sorted by doc code.
    fn documents_for(&self, instance_id: &InstanceId) -> Vec<(String, DocumentMeta)>;
}

/// Process-local document metadata.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDocumentStore {
    docs: Arc<RwLock<HashMap<InstanceId, HashMap<String, DocumentMeta>>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn document_metadata(&self, instance_id: &InstanceId, doc_code: &str) -> Option<DocumentMeta> {
        self.docs
            .read()
            .get(instance_id)
            .and_then(|docs| docs.get(doc_code))
            .copied()
    }

    fn record(&self, instance_id: &InstanceId, doc_code: &str, meta: DocumentMeta) {
        self.docs
            .write()
            .entry(*instance_id)
            .or_default()
            .insert(doc_code.to_string(), meta);
    }

    fn documents_for(&self, instance_id: &InstanceId) -> Vec<(String, DocumentMeta)> {
        let mut docs: Vec<(String, DocumentMeta)> = self
            .docs
            .read()
            .get(instance_id)
            .map(|docs| docs.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default();
        docs.sort_by(|a, b| a.0.cmp(&b.0));
        docs
    }
}

/// Reminder could not be handed to the delivery system.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("reminder dispatch failed: {0}")]
pub struct DispatchError(pub String);

/// Delivery side of reminders. Delivery is at-least-once: the trigger may
/// hand over the same reminder again after a failure.
pub trait NotificationDispatcher: Send + Sync {
    fn enqueue(&self, reminder: &Reminder) -> Result<(), DispatchError>;
}

/// Writes reminders to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDispatcher;

impl NotificationDispatcher for LogDispatcher {
    fn enqueue(&self, reminder: &Reminder) -> Result<(), DispatchError> {
        tracing::info!(
            instance_id = %reminder.instance_id,
            fires_at = %reminder.fires_at,
            channel = ?reminder.channel,
            "reminder enqueued"
        );
        Ok(())
    }
}

/// Keeps every enqueued reminder in memory. Can be switched to fail.
#[derive(Debug, Clone, Default)]
pub struct RecordingDispatcher {
    sent: Arc<Mutex<Vec<Reminder>>>,
    failing: Arc<Mutex<bool>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }

    pub fn sent(&self) -> Vec<Reminder> {
        self.sent.lock().clone()
    }
}

impl NotificationDispatcher for RecordingDispatcher {
    fn enqueue(&self, reminder: &Reminder) -> Result<(), DispatchError> {
        if *self.failing.lock() {
            return Err(DispatchError("dispatcher unavailable".into()));
        }
        self.sent.lock().push(reminder.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::ReminderChannel;

    #[test]
    fn in_memory_store_records_and_replaces() {
        let store = InMemoryDocumentStore::new();
        let id = InstanceId::new();
        assert!(!store.has_document(&id, "pan"));

        let first = DocumentMeta {
            uploaded_at: Timestamp::now(),
            verified: false,
        };
        store.record(&id, "pan", first);
        store.record(&id, "gstin", first);
        store.record(
            &id,
            "pan",
            DocumentMeta {
                verified: true,
                ..first
            },
        );
        assert!(store.has_document(&id, "pan"));
        assert!(store.document_metadata(&id, "pan").unwrap().verified);
        let codes: Vec<String> = store.documents_for(&id).into_iter().map(|(c, _)| c).collect();
        assert_eq!(codes, vec!["gstin", "pan"]);
        assert!(!store.has_document(&InstanceId::new(), "pan"));
    }

    #[test]
    fn recording_dispatcher_can_fail() {
        let d = RecordingDispatcher::new();
        let reminder = Reminder {
            instance_id: InstanceId::new(),
            fires_at: Timestamp::now(),
            channel: ReminderChannel::Email,
        };
        d.set_failing(true);
        assert!(d.enqueue(&reminder).is_err());
        d.set_failing(false);
        d.enqueue(&reminder).unwrap();
        assert_eq!(d.sent(), vec![reminder]);
    }
}
