//! Administrator-tunable engine settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::notify::ReminderChannel;

/// Engine settings. Defaults: no SLA buffer, three rework cycles, reminders
/// at 09:00 UTC, a tick every five minutes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Days subtracted from the due date to get the SLA deadline.
    pub sla_buffer_days: u32,
    /// Rework cycles allowed before `reopen` escalates.
    pub max_rework: u32,
    /// UTC hour reminders fire at.
    pub reminder_hour: u32,
    /// Interval of the periodic scheduler tick.
    #[serde(with = "secs")]
    pub tick_interval: Duration,
    /// Channel reminders are enqueued on.
    pub reminder_channel: ReminderChannel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sla_buffer_days: 0,
            max_rework: 3,
            reminder_hour: 9,
            tick_interval: Duration::from_secs(300),
            reminder_channel: ReminderChannel::Email,
        }
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
