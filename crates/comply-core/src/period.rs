//! # Periods and Periodicity
//!
//! A service recurs with a [`Periodicity`]; each recurrence is a [`Period`]
//! with a canonical identifier:
//!
//! | Periodicity          | Period identifier | Example   |
//! |----------------------|-------------------|-----------|
//! | `MONTHLY`, `ONE_TIME`| `YYYY-MM`         | `2025-03` |
//! | `QUARTERLY`          | `YYYY-Qn`         | `2025-Q1` |
//! | `ANNUAL`             | `YYYY`            | `2025`    |
//!
//! Quarters are calendar quarters. A one-time obligation is anchored to the
//! month it falls due in, so it shares the monthly identifier format.

use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Recurrence cadence of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Periodicity {
    /// Filed once.
    OneTime,
    /// Filed every calendar month.
    Monthly,
    /// Filed every calendar quarter.
    Quarterly,
    /// Filed every calendar year.
    Annual,
}

impl Periodicity {
    /// Canonical wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneTime => "ONE_TIME",
            Self::Monthly => "MONTHLY",
            Self::Quarterly => "QUARTERLY",
            Self::Annual => "ANNUAL",
        }
    }
}

impl std::fmt::Display for Periodicity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Periodicity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ONE_TIME" => Ok(Self::OneTime),
            "MONTHLY" => Ok(Self::Monthly),
            "QUARTERLY" => Ok(Self::Quarterly),
            "ANNUAL" => Ok(Self::Annual),
            other => Err(ValidationError::Field {
                field: "periodicity",
                message: format!("unknown periodicity {other:?}"),
            }),
        }
    }
}

/// One concrete recurrence of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Period {
    /// A calendar month (`2025-03`).
    Month {
        /// Calendar year.
        year: i32,
        /// Month, 1-12.
        month: u32,
    },
    /// A calendar quarter (`2025-Q1`).
    Quarter {
        /// Calendar year.
        year: i32,
        /// Quarter, 1-4.
        quarter: u32,
    },
    /// A calendar year (`2025`).
    Year {
        /// Calendar year.
        year: i32,
    },
}

const MIN_YEAR: i32 = 1900;
const MAX_YEAR: i32 = 9999;

impl Period {
    /// Parse a canonical period identifier.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::InvalidPeriod {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let (year_part, rest) = match s.split_once('-') {
            Some((y, r)) => (y, Some(r)),
            None => (s, None),
        };
        if !all_digits(year_part, 4) {
            return Err(invalid("year must have four digits"));
        }
        let year: i32 = year_part
            .parse()
            .map_err(|_| invalid("year is not numeric"))?;
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return Err(invalid("year out of range"));
        }

        match rest {
            None => Ok(Self::Year { year }),
            Some(q) if q.starts_with('Q') => {
                if !all_digits(&q[1..], 1) {
                    return Err(invalid("quarter must be Q1-Q4"));
                }
                let quarter: u32 = q[1..]
                    .parse()
                    .map_err(|_| invalid("quarter is not numeric"))?;
                if !(1..=4).contains(&quarter) {
                    return Err(invalid("quarter must be Q1-Q4"));
                }
                Ok(Self::Quarter { year, quarter })
            }
            Some(m) => {
                if !all_digits(m, 2) {
                    return Err(invalid("month must have two digits"));
                }
                let month: u32 = m.parse().map_err(|_| invalid("month is not numeric"))?;
                if !(1..=12).contains(&month) {
                    return Err(invalid("month must be 01-12"));
                }
                Ok(Self::Month { year, month })
            }
        }
    }

    /// The period of the given periodicity that contains `date`.
    pub fn containing(periodicity: Periodicity, date: NaiveDate) -> Self {
        let year = date.year();
        match periodicity {
            Periodicity::OneTime | Periodicity::Monthly => Self::Month {
                year,
                month: date.month(),
            },
            Periodicity::Quarterly => Self::Quarter {
                year,
                quarter: (date.month() - 1) / 3 + 1,
            },
            Periodicity::Annual => Self::Year { year },
        }
    }

    /// Whether this period's shape is the one `periodicity` produces.
    pub fn matches(&self, periodicity: Periodicity) -> bool {
        matches!(
            (self, periodicity),
            (Self::Month { .. }, Periodicity::Monthly | Periodicity::OneTime)
                | (Self::Quarter { .. }, Periodicity::Quarterly)
                | (Self::Year { .. }, Periodicity::Annual)
        )
    }

    /// Calendar year the period belongs to.
    pub fn year(&self) -> i32 {
        match *self {
            Self::Month { year, .. } | Self::Quarter { year, .. } | Self::Year { year } => year,
        }
    }

    /// First month of the period (1-12).
    pub fn first_month(&self) -> u32 {
        match *self {
            Self::Month { month, .. } => month,
            Self::Quarter { quarter, .. } => (quarter - 1) * 3 + 1,
            Self::Year { .. } => 1,
        }
    }

    /// Last month of the period (1-12). Obligations fall due in this month.
    pub fn last_month(&self) -> u32 {
        match *self {
            Self::Month { month, .. } => month,
            Self::Quarter { quarter, .. } => quarter * 3,
            Self::Year { .. } => 12,
        }
    }

    /// First calendar day of the period.
    pub fn start(&self) -> NaiveDate {
        ymd(self.year(), self.first_month(), 1)
    }

    /// Last calendar day of the period.
    pub fn end(&self) -> NaiveDate {
        let month = self.last_month();
        ymd(self.year(), month, days_in_month(self.year(), month))
    }

    /// The period immediately after this one.
    pub fn next(&self) -> Self {
        match *self {
            Self::Month { year, month: 12 } => Self::Month {
                year: year + 1,
                month: 1,
            },
            Self::Month { year, month } => Self::Month {
                year,
                month: month + 1,
            },
            Self::Quarter { year, quarter: 4 } => Self::Quarter {
                year: year + 1,
                quarter: 1,
            },
            Self::Quarter { year, quarter } => Self::Quarter {
                year,
                quarter: quarter + 1,
            },
            Self::Year { year } => Self::Year { year: year + 1 },
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Self::Month { year, month } => write!(f, "{year:04}-{month:02}"),
            Self::Quarter { year, quarter } => write!(f, "{year:04}-Q{quarter}"),
            Self::Year { year } => write!(f, "{year:04}"),
        }
    }
}

impl FromStr for Period {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Period {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Period> for String {
    fn from(value: Period) -> Self {
        value.to_string()
    }
}

/// Number of days in the given month.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        _ if is_leap_year(year) => 29,
        _ => 28,
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// The `day`-th of the month, clamped to the month's last valid day.
pub fn clamped_day(year: i32, month: u32, day: u32) -> NaiveDate {
    ymd(year, month, day.clamp(1, days_in_month(year, month)))
}

// Callers pass range-checked components; the fallback is unreachable.
fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MIN)
}

fn all_digits(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_digit())
}
