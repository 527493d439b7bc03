// =============================================================================
// Sustained-Lift Evaluator — shadow must beat active in every window
// =============================================================================
//
// Recent history is cut into `sustained_windows` consecutive slices of
// `window_days` each, most recent first:
//
//   window i = [now - (i+1)*W, now - i*W)
//
// A window passes iff the shadow has at least `min_trades_per_window` trades
// AND (win-rate lift >= min_win_rate_lift OR sharpe lift >= min_sharpe_lift).
// The overall verdict is the AND of every window; the first failing window
// (scanning from the most recent) supplies the blocking reason.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::performance::{compute_window, window_start, PerformanceWindow};
use crate::runtime_config::SustainedLiftConfig;
use crate::types::{Horizon, TradeOutcome};

/// Verdict for one window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiftWindow {
    /// 0 is the most recent window.
    pub index: u32,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub active: PerformanceWindow,
    pub shadow: PerformanceWindow,
    pub win_rate_lift: f64,
    pub sharpe_lift: f64,
    pub passed: bool,
    pub reason: String,
}

/// Overall verdict across all windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SustainedLiftResult {
    pub horizon: Horizon,
    pub sustained: bool,
    pub windows: Vec<LiftWindow>,
    /// Index of the most recent failing window, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_failing_window: Option<u32>,
    pub mean_win_rate_lift: f64,
    pub mean_sharpe_lift: f64,
    pub reason: String,
}

/// Stateless evaluator; holds only its thresholds.
#[derive(Debug, Clone)]
pub struct SustainedLiftEvaluator {
    config: SustainedLiftConfig,
}

impl SustainedLiftEvaluator {
    pub fn new(config: SustainedLiftConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SustainedLiftConfig {
        &self.config
    }

    /// Compare `shadow` against `active` over every window ending at `now`.
    pub fn evaluate(
        &self,
        active: &[TradeOutcome],
        shadow: &[TradeOutcome],
        horizon: Horizon,
        now: DateTime<Utc>,
    ) -> SustainedLiftResult {
        let cfg = &self.config;
        let windows: Vec<LiftWindow> = (0..cfg.sustained_windows)
            .map(|i| {
                let end = window_start(now, cfg.window_days.saturating_mul(i));
                self.evaluate_window(i, active, shadow, end)
            })
            .collect();

        let first_failing = windows.iter().find(|w| !w.passed);
        let sustained = !windows.is_empty() && first_failing.is_none();

        let count = windows.len().max(1) as f64;
        let mean_win_rate_lift = windows.iter().map(|w| w.win_rate_lift).sum::<f64>() / count;
        let mean_sharpe_lift = windows.iter().map(|w| w.sharpe_lift).sum::<f64>() / count;

        let reason = match first_failing {
            Some(w) => format!(
                "Sustained lift not met in window {} of {}: {}",
                w.index + 1,
                windows.len(),
                w.reason
            ),
            None if windows.is_empty() => "No lift windows configured".to_string(),
            None => format!(
                "Shadow outperformed active in all {} windows (mean win-rate lift {:+.3}, mean sharpe lift {:+.3})",
                windows.len(),
                mean_win_rate_lift,
                mean_sharpe_lift
            ),
        };

        debug!(
            horizon = %horizon,
            sustained,
            windows = windows.len(),
            mean_win_rate_lift,
            mean_sharpe_lift,
            "sustained lift evaluated"
        );

        SustainedLiftResult {
            horizon,
            sustained,
            first_failing_window: first_failing.map(|w| w.index),
            windows,
            mean_win_rate_lift,
            mean_sharpe_lift,
            reason,
        }
    }

    fn evaluate_window(
        &self,
        index: u32,
        active: &[TradeOutcome],
        shadow: &[TradeOutcome],
        end: DateTime<Utc>,
    ) -> LiftWindow {
        let cfg = &self.config;
        let active_w = compute_window(active, cfg.window_days, end);
        let shadow_w = compute_window(shadow, cfg.window_days, end);

        let win_rate_lift = shadow_w.trade_win_rate - active_w.trade_win_rate;
        let sharpe_lift = shadow_w.sharpe_like - active_w.sharpe_like;

        let enough = shadow_w.sample_count >= cfg.min_trades_per_window;
        let lifted = win_rate_lift >= cfg.min_win_rate_lift || sharpe_lift >= cfg.min_sharpe_lift;
        let passed = enough && lifted;

        let reason = if !enough {
            format!(
                "insufficient shadow trades: {} < {}",
                shadow_w.sample_count, cfg.min_trades_per_window
            )
        } else if !lifted {
            format!(
                "lift too small: win rate {:+.3} (need {:+.3}), sharpe {:+.3} (need {:+.3})",
                win_rate_lift, cfg.min_win_rate_lift, sharpe_lift, cfg.min_sharpe_lift
            )
        } else {
            format!(
                "win rate {:+.3}, sharpe {:+.3}",
                win_rate_lift, sharpe_lift
            )
        };

        LiftWindow {
            index,
            start: window_start(end, cfg.window_days),
            end,
            active: active_w,
            shadow: shadow_w,
            win_rate_lift,
            sharpe_lift,
            passed,
            reason,
        }
    }
}
