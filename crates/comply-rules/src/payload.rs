//! # Rule Payloads
//!
//! On the wire a due-date rule payload is a loosely shaped object:
//!
//! ```json
//! { "periodicity": "MONTHLY", "dueDayOfMonth": 20,
//!   "nudges": { "tMinus": [7, 3, 1], "fixedDays": [1, 2] } }
//! ```
//!
//! [`RulePayload`] deserializes through [`RulePayloadWire`] and validates in
//! `TryFrom`, producing a tagged [`RuleSchedule`] per periodicity. A payload
//! with `dueDayOfMonth` outside 1-28, a negative nudge, or a `fixedDays`
//! entry that is not a calendar day never makes it past deserialization.

use serde::{Deserialize, Serialize};

use comply_core::{Periodicity, ValidationError};

/// Serialized shape of a rule payload, exactly as clients send it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulePayloadWire {
    /// Recurrence cadence.
    pub periodicity: Periodicity,
    /// Day of the due month the filing is due on.
    pub due_day_of_month: i64,
    /// Reminder offsets.
    #[serde(default)]
    pub nudges: NudgesWire,
}

/// Serialized shape of the reminder offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NudgesWire {
    /// Days before the due date.
    #[serde(default)]
    pub t_minus: Vec<i64>,
    /// Calendar days of the due month.
    #[serde(default)]
    pub fixed_days: Vec<i64>,
}

/// Validated timing schedule, one variant per periodicity.
///
/// `due_day` is always within 1-28 so it exists in every month.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleSchedule {
    /// Due once, on `due_day` of the period's month.
    OneTime {
        /// Day of month.
        due_day: u32,
    },
    /// Due every month on `due_day`.
    Monthly {
        /// Day of month.
        due_day: u32,
    },
    /// Due on `due_day` of the quarter's last month.
    Quarterly {
        /// Day of month.
        due_day: u32,
    },
    /// Due on `due_day` of December.
    Annual {
        /// Day of month.
        due_day: u32,
    },
}

impl RuleSchedule {
    /// Build from a periodicity and a validated due day.
    pub fn new(periodicity: Periodicity, due_day: u32) -> Self {
        match periodicity {
            Periodicity::OneTime => Self::OneTime { due_day },
            Periodicity::Monthly => Self::Monthly { due_day },
            Periodicity::Quarterly => Self::Quarterly { due_day },
            Periodicity::Annual => Self::Annual { due_day },
        }
    }

    /// Periodicity this schedule encodes.
    pub fn periodicity(&self) -> Periodicity {
        match self {
            Self::OneTime { .. } => Periodicity::OneTime,
            Self::Monthly { .. } => Periodicity::Monthly,
            Self::Quarterly { .. } => Periodicity::Quarterly,
            Self::Annual { .. } => Periodicity::Annual,
        }
    }

    /// Configured day of month.
    pub fn due_day(&self) -> u32 {
        match *self {
            Self::OneTime { due_day }
            | Self::Monthly { due_day }
            | Self::Quarterly { due_day }
            | Self::Annual { due_day } => due_day,
        }
    }
}

/// Validated reminder offsets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Nudges {
    /// Days before the due date, as given.
    pub t_minus: Vec<u32>,
    /// Calendar days (1-31) of the due month, as given.
    pub fixed_days: Vec<u32>,
}

/// A validated due-date rule payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RulePayloadWire", into = "RulePayloadWire")]
pub struct RulePayload {
    /// When the obligation falls due.
    pub schedule: RuleSchedule,
    /// When reminders fire.
    pub nudges: Nudges,
}

impl RulePayload {
    /// Periodicity declared by the rule.
    pub fn periodicity(&self) -> Periodicity {
        self.schedule.periodicity()
    }
}

impl TryFrom<RulePayloadWire> for RulePayload {
    type Error = ValidationError;

    fn try_from(wire: RulePayloadWire) -> Result<Self, Self::Error> {
        if !(1..=28).contains(&wire.due_day_of_month) {
            return Err(ValidationError::DueDayOutOfRange(wire.due_day_of_month));
        }
        let t_minus = wire
            .nudges
            .t_minus
            .iter()
            .map(|&v| non_negative("tMinus", v))
            .collect::<Result<Vec<_>, _>>()?;
        let fixed_days = wire
            .nudges
            .fixed_days
            .iter()
            .map(|&v| {
                let day = non_negative("fixedDays", v)?;
                if (1..=31).contains(&day) {
                    Ok(day)
                } else {
                    Err(ValidationError::FixedDayOutOfRange(v))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            schedule: RuleSchedule::new(wire.periodicity, wire.due_day_of_month as u32),
            nudges: Nudges {
                t_minus,
                fixed_days,
            },
        })
    }
}

impl From<RulePayload> for RulePayloadWire {
    fn from(payload: RulePayload) -> Self {
        Self {
            periodicity: payload.schedule.periodicity(),
            due_day_of_month: i64::from(payload.schedule.due_day()),
            nudges: NudgesWire {
                t_minus: payload.nudges.t_minus.iter().map(|&d| i64::from(d)).collect(),
                fixed_days: payload
                    .nudges
                    .fixed_days
                    .iter()
                    .map(|&d| i64::from(d))
                    .collect(),
            },
        }
    }
}

fn non_negative(kind: &'static str, value: i64) -> Result<u32, ValidationError> {
    u32::try_from(value).map_err(|_| ValidationError::NegativeNudge { kind, value })
}
