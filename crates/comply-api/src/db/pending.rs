//! Records committed in memory whose write-through failed.
//!
//! A failed `persist_*` call marks its record here together with the
//! revision it tried to write. The next successful write of an equal or
//! higher revision clears the mark, and the scheduler tick re-persists
//! whatever is still marked before doing anything else.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use comply_core::{InstanceId, ReviewId};

/// One record the store is behind on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PendingRecord {
    Instance(InstanceId),
    Review(ReviewId),
    /// Document metadata carries no revision; any later write settles it.
    Document(InstanceId, String),
}

impl fmt::Display for PendingRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance(id) => write!(f, "{id}"),
            Self::Review(id) => write!(f, "{id}"),
            Self::Document(id, code) => write!(f, "{id}/{code}"),
        }
    }
}

/// Shared set of pending records, keyed to the highest failed revision.
#[derive(Debug, Clone, Default)]
pub struct PendingWrites {
    inner: Arc<Mutex<BTreeMap<PendingRecord, u64>>>,
}

impl PendingWrites {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember that writing `revision` of `record` failed.
    pub fn mark(&self, record: PendingRecord, revision: u64) {
        let mut pending = self.inner.lock();
        let entry = pending.entry(record).or_insert(revision);
        *entry = (*entry).max(revision);
    }

    /// A write of `revision` succeeded. Clears the mark unless a newer
    /// revision failed in the meantime.
    pub fn settle(&self, record: &PendingRecord, revision: u64) {
        let mut pending = self.inner.lock();
        if pending.get(record).is_some_and(|failed| *failed <= revision) {
            pending.remove(record);
        }
    }

    /// Drop a mark whose record no longer exists in memory.
    pub fn discard(&self, record: &PendingRecord) {
        self.inner.lock().remove(record);
    }

    pub fn contains(&self, record: &PendingRecord) -> bool {
        self.inner.lock().contains_key(record)
    }

    /// Every pending record, in a stable order.
    pub fn records(&self) -> Vec<PendingRecord> {
        self.inner.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_success_settles_older_failure() {
        let pending = PendingWrites::new();
        let record = PendingRecord::Instance(InstanceId::new());
        pending.mark(record.clone(), 3);
        pending.settle(&record, 2);
        assert!(pending.contains(&record));
        pending.settle(&record, 4);
        assert!(pending.is_empty());
    }

    #[test]
    fn mark_keeps_highest_failed_revision() {
        let pending = PendingWrites::new();
        let record = PendingRecord::Review(ReviewId::new());
        pending.mark(record.clone(), 5);
        pending.mark(record.clone(), 2);
        pending.settle(&record, 4);
        assert!(pending.contains(&record));
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn documents_settle_on_any_write() {
        let pending = PendingWrites::new();
        let record = PendingRecord::Document(InstanceId::new(), "GSTR3B".into());
        pending.mark(record.clone(), 0);
        pending.settle(&record, 0);
        assert!(!pending.contains(&record));
    }

    #[test]
    fn clones_share_state() {
        let pending = PendingWrites::new();
        let other = pending.clone();
        let id = InstanceId::new();
        other.mark(PendingRecord::Instance(id), 1);
        assert_eq!(pending.records(), vec![PendingRecord::Instance(id)]);
        pending.discard(&PendingRecord::Instance(id));
        assert!(other.is_empty());
    }
}
