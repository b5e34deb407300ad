//! # Obligation Scheduler
//!
//! Pure functions turning a governing rule and a target period into a due
//! date and reminder instants. Nothing here touches instance state; the
//! tracker persists the resulting [`SchedulePlan`] as a snapshot.

use chrono::{Days, NaiveDate};
use serde::Serialize;

use comply_core::period::clamped_day;
use comply_core::{
    EngineError, JurisdictionCode, Period, ServiceKey, Timestamp, ValidationError,
};

use crate::payload::RulePayload;
use crate::store::{DueDateRule, RuleStore};

/// Everything needed to materialize one obligation instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulePlan {
    /// The rule governing the period, captured at planning time.
    pub rule: DueDateRule,
    pub period: Period,
    pub due_date: NaiveDate,
    /// Sorted, de-duplicated, none earlier than the planning instant.
    pub reminders: Vec<Timestamp>,
}

/// Due date of `period` under `payload`.
///
/// The filing falls due on the configured day of the period's last month,
/// which for monthly and one-time periods is the period's own month.
pub fn compute_due_date(payload: &RulePayload, period: &Period) -> NaiveDate {
    clamped_day(period.year(), period.last_month(), payload.schedule.due_day())
}

/// Reminder instants for an obligation due on `due`.
///
/// `tMinus` offsets count back from the due date; `fixedDays` name calendar
/// days of the due month, clamped to its length. Every reminder fires at
/// `hour`:00 UTC. Reminders before `now` are dropped.
pub fn compute_reminders(
    payload: &RulePayload,
    period: &Period,
    due: NaiveDate,
    now: Timestamp,
    hour: u32,
) -> Vec<Timestamp> {
    let offsets = payload
        .nudges
        .t_minus
        .iter()
        .filter_map(|&days| due.checked_sub_days(Days::new(u64::from(days))));
    let fixed = payload
        .nudges
        .fixed_days
        .iter()
        .map(|&day| clamped_day(period.year(), period.last_month(), day));

    let mut reminders: Vec<Timestamp> = offsets
        .chain(fixed)
        .map(|date| Timestamp::at_hour(date, hour))
        .filter(|at| *at >= now)
        .collect();
    reminders.sort();
    reminders.dedup();
    reminders
}

/// Resolve the governing rule and compute the schedule for one period.
///
/// The rule is resolved as of the period's first day. Its periodicity, not
/// the service definition's, decides which period shape is acceptable.
pub fn plan_obligation(
    store: &RuleStore,
    service_key: &ServiceKey,
    jurisdiction: &JurisdictionCode,
    period: Period,
    now: Timestamp,
    reminder_hour: u32,
) -> Result<SchedulePlan, EngineError> {
    if store.service(service_key).is_none() {
        return Err(ValidationError::UnknownService(service_key.to_string()).into());
    }
    let rule = store.resolve_active_rule(service_key, jurisdiction, period.start())?;
    let periodicity = rule.payload.periodicity();
    if !period.matches(periodicity) {
        return Err(ValidationError::PeriodMismatch {
            period: period.to_string(),
            periodicity,
        }
        .into());
    }

    let due_date = compute_due_date(&rule.payload, &period);
    let reminders = compute_reminders(&rule.payload, &period, due_date, now, reminder_hour);
    Ok(SchedulePlan {
        rule,
        period,
        due_date,
        reminders,
    })
}

/// The period the scheduler should materialize on `today`.
///
/// A period is governed by the rule in force on its first day, and only a
/// period of that rule's shape is schedulable. The search starts from the
/// shape of the rule in force today and follows the rule governing each
/// candidate's start until one is consistent. `None` means `today` falls
/// in a handoff gap: a rule with a new periodicity took effect after the
/// start of the period containing today, so nothing is due until the new
/// rule's first full period begins.
pub fn current_period(
    store: &RuleStore,
    service_key: &ServiceKey,
    jurisdiction: &JurisdictionCode,
    today: NaiveDate,
) -> Result<Option<Period>, EngineError> {
    let mut periodicity = store
        .resolve_active_rule(service_key, jurisdiction, today)?
        .payload
        .periodicity();
    let mut tried = Vec::with_capacity(4);
    loop {
        let period = Period::containing(periodicity, today);
        let at_start = match store.resolve_active_rule(service_key, jurisdiction, period.start()) {
            Ok(rule) => rule.payload.periodicity(),
            Err(EngineError::NoRuleFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        if period.matches(at_start) {
            return Ok(Some(period));
        }
        tried.push(periodicity);
        if tried.contains(&at_start) {
            return Ok(None);
        }
        periodicity = at_start;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ServiceDefinition;
    use crate::payload::{Nudges, RuleSchedule};
    use comply_core::Periodicity;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn key() -> ServiceKey {
        ServiceKey::new("gst-monthly").unwrap()
    }

    fn jur() -> JurisdictionCode {
        JurisdictionCode::new("IN").unwrap()
    }

    fn payload(schedule: RuleSchedule, t_minus: Vec<u32>, fixed_days: Vec<u32>) -> RulePayload {
        RulePayload {
            schedule,
            nudges: Nudges {
                t_minus,
                fixed_days,
            },
        }
    }

    fn store_with(p: RulePayload) -> RuleStore {
        let store = RuleStore::new();
        store
            .register_service(
                ServiceDefinition::new(key(), "GST", Periodicity::Monthly, "tax").unwrap(),
            )
            .unwrap();
        store.add_rule(key(), jur(), p, date(2025, 1, 1)).unwrap();
        store
    }

    fn long_ago() -> Timestamp {
        Timestamp::parse("2000-01-01T00:00:00Z").unwrap()
    }

    #[test]
    fn monthly_rule_produces_due_date_and_reminders() {
        let store = store_with(payload(
            RuleSchedule::Monthly { due_day: 20 },
            vec![7, 3, 1],
            vec![1, 2],
        ));
        let plan = plan_obligation(
            &store,
            &key(),
            &jur(),
            Period::parse("2025-02").unwrap(),
            long_ago(),
            9,
        )
        .unwrap();

        assert_eq!(plan.due_date, date(2025, 2, 20));
        let days: Vec<String> = plan.reminders.iter().map(|r| r.to_iso8601()).collect();
        assert_eq!(
            days,
            vec![
                "2025-02-01T09:00:00Z",
                "2025-02-02T09:00:00Z",
                "2025-02-13T09:00:00Z",
                "2025-02-17T09:00:00Z",
                "2025-02-19T09:00:00Z",
            ]
        );
    }

    #[test]
    fn quarterly_due_in_last_month() {
        let p = payload(RuleSchedule::Quarterly { due_day: 15 }, vec![], vec![31]);
        let period = Period::parse("2025-Q2").unwrap();
        let due = compute_due_date(&p, &period);
        assert_eq!(due, date(2025, 6, 15));
        let reminders = compute_reminders(&p, &period, due, long_ago(), 9);
        assert_eq!(reminders, vec![Timestamp::at_hour(date(2025, 6, 30), 9)]);
    }

    #[test]
    fn annual_due_in_december() {
        let p = payload(RuleSchedule::Annual { due_day: 28 }, vec![], vec![]);
        assert_eq!(
            compute_due_date(&p, &Period::parse("2024").unwrap()),
            date(2024, 12, 28)
        );
    }

    #[test]
    fn past_reminders_dropped_and_duplicates_merged() {
        let p = payload(RuleSchedule::Monthly { due_day: 20 }, vec![10, 7], vec![13]);
        let period = Period::parse("2025-02").unwrap();
        let due = compute_due_date(&p, &period);
        let now = Timestamp::parse("2025-02-12T00:00:00Z").unwrap();
        let reminders = compute_reminders(&p, &period, due, now, 9);
        assert_eq!(reminders, vec![Timestamp::at_hour(date(2025, 2, 13), 9)]);
    }

    #[test]
    fn period_kind_must_match_rule() {
        let store = store_with(payload(RuleSchedule::Monthly { due_day: 20 }, vec![], vec![]));
        let err = plan_obligation(
            &store,
            &key(),
            &jur(),
            Period::parse("2025-Q1").unwrap(),
            long_ago(),
            9,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::PeriodMismatch { .. })
        ));
    }

    #[test]
    fn period_before_first_rule_is_not_schedulable() {
        let store = store_with(payload(RuleSchedule::Monthly { due_day: 20 }, vec![], vec![]));
        let err = plan_obligation(
            &store,
            &key(),
            &jur(),
            Period::parse("2024-12").unwrap(),
            long_ago(),
            9,
        )
        .unwrap_err();
        assert!(err.is_configuration_gap());
    }

    #[test]
    fn unknown_service_is_validation_error() {
        let store = RuleStore::new();
        let err = plan_obligation(
            &store,
            &key(),
            &jur(),
            Period::parse("2025-02").unwrap(),
            long_ago(),
            9,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    fn store_with_handoff() -> RuleStore {
        let store = store_with(payload(RuleSchedule::Monthly { due_day: 20 }, vec![], vec![]));
        store
            .add_rule(
                key(),
                jur(),
                payload(RuleSchedule::Quarterly { due_day: 15 }, vec![], vec![]),
                date(2025, 2, 10),
            )
            .unwrap();
        store
    }

    #[test]
    fn current_period_follows_rule_in_force() {
        let store = store_with(payload(RuleSchedule::Monthly { due_day: 20 }, vec![], vec![]));
        assert_eq!(
            current_period(&store, &key(), &jur(), date(2025, 3, 5)).unwrap(),
            Some(Period::parse("2025-03").unwrap())
        );
        assert!(current_period(&store, &key(), &jur(), date(2024, 12, 31))
            .unwrap_err()
            .is_configuration_gap());
    }

    #[test]
    fn mid_period_periodicity_change_keeps_old_shape_then_waits() {
        let store = store_with_handoff();

        // February started under the monthly rule.
        let feb = current_period(&store, &key(), &jur(), date(2025, 2, 20)).unwrap();
        assert_eq!(feb, Some(Period::parse("2025-02").unwrap()));
        assert!(plan_obligation(&store, &key(), &jur(), feb.unwrap(), long_ago(), 9).is_ok());

        // March starts under the quarterly rule, but Q1 started under the
        // monthly one: nothing to schedule until Q2.
        assert_eq!(current_period(&store, &key(), &jur(), date(2025, 3, 5)).unwrap(), None);

        let q2 = current_period(&store, &key(), &jur(), date(2025, 4, 1)).unwrap();
        assert_eq!(q2, Some(Period::parse("2025-Q2").unwrap()));
        assert!(plan_obligation(&store, &key(), &jur(), q2.unwrap(), long_ago(), 9).is_ok());
    }

    #[test]
    fn first_rule_starting_mid_period_waits_for_next_period() {
        let store = RuleStore::new();
        store
            .register_service(
                ServiceDefinition::new(key(), "GST", Periodicity::Monthly, "tax").unwrap(),
            )
            .unwrap();
        store
            .add_rule(
                key(),
                jur(),
                payload(RuleSchedule::Monthly { due_day: 20 }, vec![], vec![]),
                date(2025, 2, 10),
            )
            .unwrap();
        assert_eq!(current_period(&store, &key(), &jur(), date(2025, 2, 12)).unwrap(), None);
        assert_eq!(
            current_period(&store, &key(), &jur(), date(2025, 3, 1)).unwrap(),
            Some(Period::parse("2025-03").unwrap())
        );
    }
}
