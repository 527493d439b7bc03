// =============================================================================
// Scheduler Loop — periodic lifecycle pass over every horizon
// =============================================================================
//
// Runs as a background Tokio task, waking every `schedule_interval_secs` to:
//   1. Run rollbacks for 1D, 7D, 30D (defensive actions first).
//   2. Run promotions for 1D, 7D, 30D.
//   3. Push every verdict into the decision ring buffer.
//
// With `auto_execute` off the pass only evaluates; verdicts are still
// recorded so operators can review what would have happened.
//
// The pass itself is blocking (trade sources may block on I/O) and runs on
// the blocking pool:
//
//   tokio::spawn(run_scheduler(Arc::clone(&state)));
//
// =============================================================================

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::app_state::AppState;
use crate::decision_envelope::DecisionEnvelope;

/// Counters for one scheduler pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassSummary {
    pub evaluated: usize,
    pub promoted: usize,
    pub rolled_back: usize,
    pub errors: usize,
}

/// Run the scheduler loop forever.
pub async fn run_scheduler(state: Arc<AppState>) {
    let secs = state.config.read().schedule_interval_secs.max(1);
    info!(interval_secs = secs, "Lifecycle scheduler started");

    let mut ticker = interval(Duration::from_secs(secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let pass_state = state.clone();
        match tokio::task::spawn_blocking(move || run_pass(&pass_state, Utc::now())).await {
            Ok(summary) => {
                info!(
                    evaluated = summary.evaluated,
                    promoted = summary.promoted,
                    rolled_back = summary.rolled_back,
                    errors = summary.errors,
                    "Lifecycle pass complete"
                );
            }
            Err(e) => {
                error!(error = %e, "Lifecycle pass panicked");
                state.push_error(format!("scheduler pass panicked: {e}"), None);
            }
        }
    }
}

/// One full pass at `now`. Rollbacks run before promotions.
pub fn run_pass(state: &AppState, now: DateTime<Utc>) -> PassSummary {
    let (symbol, auto_execute) = {
        let config = state.config.read();
        (config.symbol.clone(), config.auto_execute)
    };
    let service = &state.service;
    let mut summary = PassSummary::default();

    debug!(symbol = %symbol, auto_execute, "Lifecycle pass starting");

    if auto_execute {
        for exec in service.execute_all_rollbacks_at(&symbol, now) {
            summary.evaluated += 1;
            summary.rolled_back += usize::from(exec.rolled_back);
            summary.errors += usize::from(exec.check.error.is_some());
            state.push_decision(DecisionEnvelope::from_rollback(&symbol, &exec.check, exec.rolled_back));
        }
        for exec in service.execute_all_promotions_at(&symbol, now) {
            summary.evaluated += 1;
            summary.promoted += usize::from(exec.promoted);
            summary.errors += usize::from(exec.check.error.is_some());
            state.push_decision(DecisionEnvelope::from_promotion(&symbol, &exec.check, exec.promoted));
        }
    } else {
        let evaluations = service.evaluate_all_horizons_at(&symbol, now);
        for eval in &evaluations {
            summary.evaluated += 1;
            summary.errors += usize::from(eval.rollback.error.is_some());
            state.push_decision(DecisionEnvelope::from_rollback(&symbol, &eval.rollback, false));
        }
        for eval in &evaluations {
            summary.evaluated += 1;
            summary.errors += usize::from(eval.promotion.error.is_some());
            state.push_decision(DecisionEnvelope::from_promotion(&symbol, &eval.promotion, false));
        }
    }

    *state.last_tick.write() = Some(now);
    state.increment_version();
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::tests::test_state;
    use crate::performance::tests::fixed_now;

    #[test]
    fn evaluate_only_pass_records_every_verdict() {
        let state = test_state();
        let summary = run_pass(&state, fixed_now());
        assert_eq!(summary.evaluated, 6);
        assert_eq!(summary.promoted + summary.rolled_back, 0);

        let decisions = state.recent_decisions.read();
        assert_eq!(decisions.len(), 6);
        // Rollbacks are recorded ahead of promotions.
        assert!(decisions[..3].iter().all(|d| d.action == "ROLLBACK"));
        assert!(decisions[3..].iter().all(|d| d.action == "PROMOTION"));
        assert!(decisions.iter().all(|d| !d.executed));
        assert_eq!(*state.last_tick.read(), Some(fixed_now()));
    }

    #[test]
    fn auto_execute_pass_with_empty_registry_changes_nothing() {
        let state = test_state();
        state.config.write().auto_execute = true;
        let summary = run_pass(&state, fixed_now());
        assert_eq!(summary.evaluated, 6);
        assert_eq!(summary.errors, 0);
        assert!(state
            .recent_decisions
            .read()
            .iter()
            .all(|d| d.verdict == "BLOCK" && d.blocking_gate.as_deref() == Some("REGISTRY")));
    }
}
