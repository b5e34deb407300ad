//! Dashboard statistics over a snapshot of instances.

use std::collections::BTreeMap;

use serde::Serialize;

use comply_core::Timestamp;
use comply_state::{ObligationInstance, ObligationStatus};

/// Aggregate view for the operations dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total: usize,
    /// Count per status; every status is present, zero when unused.
    pub by_status: BTreeMap<String, usize>,
    /// Mean seconds from submission to review decision.
    pub average_review_seconds: Option<f64>,
    /// Share of approved instances approved on or before their SLA deadline.
    pub sla_compliance_percent: Option<f64>,
    /// Instances past their SLA deadline and not yet approved.
    pub sla_breaches: usize,
    pub escalated: usize,
}

impl DashboardStats {
    pub fn compute(instances: &[ObligationInstance], now: Timestamp) -> Self {
        let mut by_status: BTreeMap<String, usize> = ObligationStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        for inst in instances {
            *by_status.entry(inst.status.as_str().to_string()).or_default() += 1;
        }

        let review_times: Vec<i64> = instances.iter().filter_map(|i| i.review_seconds()).collect();
        let average_review_seconds = (!review_times.is_empty())
            .then(|| review_times.iter().sum::<i64>() as f64 / review_times.len() as f64);

        let sla_outcomes: Vec<bool> = instances
            .iter()
            .filter(|i| i.status.is_sla_settled())
            .filter_map(|i| i.approved_within_sla())
            .collect();
        let sla_compliance_percent = (!sla_outcomes.is_empty()).then(|| {
            let met = sla_outcomes.iter().filter(|met| **met).count();
            round1(met as f64 * 100.0 / sla_outcomes.len() as f64)
        });

        Self {
            total: instances.len(),
            by_status,
            average_review_seconds,
            sla_compliance_percent,
            sla_breaches: instances.iter().filter(|i| i.sla_breached(now)).count(),
            escalated: instances
                .iter()
                .filter(|i| i.status == ObligationStatus::Escalated)
                .count(),
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
