//! # Periodic Scheduler
//!
//! Runs [`ComplianceEngine::tick`](comply_engine::ComplianceEngine::tick)
//! on a fixed interval: materializes the current period of every enrolled
//! service and fires due reminders.
//!
//! Before the engine runs, records left behind by failed writes are
//! flushed. After it, created instances and accepted reminders are
//! persisted. A created instance whose write fails stays pending and is
//! flushed by a later tick.

use comply_core::Timestamp;
use comply_engine::TickSummary;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::state::AppState;

/// Result of one tick as seen by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    pub summary: TickSummary,
    /// Created instances whose write failed.
    pub persist_failed: usize,
    /// Records still waiting for a successful write after this tick.
    pub pending_writes: usize,
}

/// Flush pending writes, run one tick at `now` and persist its results.
pub async fn run_tick(state: &AppState, now: Timestamp) -> TickOutcome {
    if !state.pending.is_empty() {
        let left = state.flush_pending().await;
        tracing::info!(left, "pending writes flushed before tick");
    }

    let report = state.engine.tick(now);
    let mut persist_failed = 0;
    for inst in &report.created {
        if let Err(e) = state.persist_instance(inst).await {
            persist_failed += 1;
            tracing::error!(instance_id = %inst.id, error = %e, "failed to persist scheduled obligation");
        }
    }
    if let Err(e) = state.persist_deliveries(&report.reminders.delivered).await {
        tracing::error!(
            reminders = report.reminders.delivered.len(),
            error = %e,
            "failed to persist reminder deliveries, a restart may send them again"
        );
    }

    TickOutcome {
        summary: report.summary(),
        persist_failed,
        pending_writes: state.pending.len(),
    }
}

/// Spawn the background tick loop. The first tick runs immediately.
pub fn spawn(state: AppState) -> JoinHandle<()> {
    let every = state.config.engine.tick_interval;
    tracing::info!(interval = ?every, "scheduler started");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            run_tick(&state, Timestamp::now()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tick_on_empty_engine_does_nothing() {
        let state = AppState::new();
        let outcome = run_tick(&state, Timestamp::now()).await;
        assert_eq!(outcome.summary.created, 0);
        assert_eq!(outcome.summary.not_configured, 0);
        assert_eq!(outcome.persist_failed, 0);
        assert_eq!(outcome.pending_writes, 0);
    }

    #[tokio::test]
    async fn pending_record_of_removed_instance_is_discarded() {
        use crate::db::pending::PendingRecord;

        let state = AppState::new();
        let unknown = PendingRecord::Instance(comply_core::InstanceId::new());
        state.pending.mark(unknown.clone(), 1);
        let outcome = run_tick(&state, Timestamp::now()).await;
        assert_eq!(outcome.pending_writes, 0);
        assert!(!state.pending.contains(&unknown));
    }
}
