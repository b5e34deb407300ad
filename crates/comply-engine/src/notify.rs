//! # Notification Trigger
//!
//! Turns due reminder instants into dispatcher calls. A reminder is
//! identified by (instance id, fires_at); once the dispatcher accepts it the
//! pair is remembered and never handed over again. A failed dispatch is
//! logged and left unmarked, so the next tick retries it.
//!
//! Delivered pairs are reported back so a caller can persist them and
//! replay them with [`NotificationTrigger::mark_delivered`] after a
//! restart. Marks of settled instances are dropped with
//! [`NotificationTrigger::forget`].

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use comply_core::{InstanceId, Timestamp};

use crate::collaborators::NotificationDispatcher;

/// Delivery channel of a reminder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReminderChannel {
    Email,
    Sms,
    InApp,
}

/// One reminder handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub instance_id: InstanceId,
    pub fires_at: Timestamp,
    pub channel: ReminderChannel,
}

/// Outcome of one trigger pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub dispatched: usize,
    pub failed: usize,
    /// Reminders accepted by the dispatcher in this pass.
    pub delivered: Vec<(InstanceId, Timestamp)>,
}

impl DispatchReport {
    pub fn merge(&mut self, other: DispatchReport) {
        self.dispatched += other.dispatched;
        self.failed += other.failed;
        self.delivered.extend(other.delivered);
    }
}

/// De-duplicating reminder trigger.
#[derive(Clone)]
pub struct NotificationTrigger {
    dispatcher: Arc<dyn NotificationDispatcher>,
    channel: ReminderChannel,
    delivered: Arc<Mutex<HashMap<InstanceId, BTreeSet<Timestamp>>>>,
}

impl std::fmt::Debug for NotificationTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationTrigger")
            .field("channel", &self.channel)
            .field("tracked_instances", &self.delivered.lock().len())
            .finish()
    }
}

impl NotificationTrigger {
    pub fn new(dispatcher: Arc<dyn NotificationDispatcher>, channel: ReminderChannel) -> Self {
        Self {
            dispatcher,
            channel,
            delivered: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Dispatch every reminder of `instance_id` that is due at `now` and has
    /// not been delivered yet.
    pub fn fire_due(&self, instance_id: InstanceId, reminders: &[Timestamp], now: Timestamp) -> DispatchReport {
        let mut report = DispatchReport::default();
        for fires_at in reminders.iter().copied().filter(|at| *at <= now) {
            if self.is_delivered(instance_id, fires_at) {
                continue;
            }
            let reminder = Reminder {
                instance_id,
                fires_at,
                channel: self.channel,
            };
            match self.dispatcher.enqueue(&reminder) {
                Ok(()) => {
                    self.mark_delivered(instance_id, fires_at);
                    report.dispatched += 1;
                    report.delivered.push((instance_id, fires_at));
                    metrics::counter!("comply_reminders_dispatched_total").increment(1);
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        instance_id = %instance_id,
                        fires_at = %fires_at,
                        error = %e,
                        "reminder dispatch failed, will retry on next tick"
                    );
                }
            }
        }
        report
    }

    /// Mark a reminder as delivered without dispatching it.
    pub fn mark_delivered(&self, instance_id: InstanceId, fires_at: Timestamp) {
        self.delivered
            .lock()
            .entry(instance_id)
            .or_default()
            .insert(fires_at);
    }

    pub fn is_delivered(&self, instance_id: InstanceId, fires_at: Timestamp) -> bool {
        self.delivered
            .lock()
            .get(&instance_id)
            .map_or(false, |sent| sent.contains(&fires_at))
    }

    /// Drop every mark of an instance that will never fire again.
    pub fn forget(&self, instance_id: &InstanceId) {
        self.delivered.lock().remove(instance_id);
    }

    /// Number of instances with at least one delivered reminder.
    pub fn tracked_instances(&self) -> usize {
        self.delivered.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::RecordingDispatcher;

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    fn setup() -> (RecordingDispatcher, NotificationTrigger) {
        let recorder = RecordingDispatcher::new();
        let trigger = NotificationTrigger::new(Arc::new(recorder.clone()), ReminderChannel::Email);
        (recorder, trigger)
    }

    #[test]
    fn only_due_reminders_fire_once() {
        let (recorder, trigger) = setup();
        let id = InstanceId::new();
        let reminders = [ts("2025-02-13T09:00:00Z"), ts("2025-02-17T09:00:00Z")];

        let now = ts("2025-02-14T00:00:00Z");
        assert_eq!(trigger.fire_due(id, &reminders, now).dispatched, 1);
        assert_eq!(trigger.fire_due(id, &reminders, now).dispatched, 0);

        let later = ts("2025-02-18T00:00:00Z");
        assert_eq!(trigger.fire_due(id, &reminders, later).dispatched, 1);
        assert_eq!(recorder.sent().len(), 2);
    }

    #[test]
    fn failed_dispatch_retried_next_pass() {
        let (recorder, trigger) = setup();
        let id = InstanceId::new();
        let reminders = [ts("2025-02-13T09:00:00Z")];
        let now = ts("2025-02-14T00:00:00Z");

        recorder.set_failing(true);
        let report = trigger.fire_due(id, &reminders, now);
        assert_eq!(report.dispatched, 0);
        assert_eq!(report.failed, 1);
        assert!(report.delivered.is_empty());
        assert!(!trigger.is_delivered(id, reminders[0]));

        recorder.set_failing(false);
        let report = trigger.fire_due(id, &reminders, now);
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.delivered, vec![(id, reminders[0])]);
        assert!(trigger.is_delivered(id, reminders[0]));
    }

    #[test]
    fn forget_drops_marks_of_one_instance() {
        let (_, trigger) = setup();
        let (a, b) = (InstanceId::new(), InstanceId::new());
        let now = ts("2025-02-14T00:00:00Z");
        trigger.fire_due(a, &[ts("2025-02-13T09:00:00Z")], now);
        trigger.fire_due(b, &[ts("2025-02-13T09:00:00Z")], now);
        assert_eq!(trigger.tracked_instances(), 2);

        trigger.forget(&a);
        assert_eq!(trigger.tracked_instances(), 1);
        assert!(!trigger.is_delivered(a, ts("2025-02-13T09:00:00Z")));
        assert!(trigger.is_delivered(b, ts("2025-02-13T09:00:00Z")));
    }

    #[test]
    fn replayed_marks_suppress_redelivery() {
        let (recorder, trigger) = setup();
        let id = InstanceId::new();
        let fires_at = ts("2025-02-13T09:00:00Z");
        trigger.mark_delivered(id, fires_at);
        let report = trigger.fire_due(id, &[fires_at], ts("2025-02-14T00:00:00Z"));
        assert_eq!(report.dispatched, 0);
        assert!(recorder.sent().is_empty());
    }
}
