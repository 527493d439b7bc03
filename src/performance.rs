// =============================================================================
// Performance Tracker — rolling-window statistics over resolved trades
// =============================================================================
//
// Turns a set of trade outcomes into one statistical window:
//
//   win rate     = wins / (wins + losses)          (NEUTRAL excluded)
//   sharpe-like  = mean(r) / sampleStd(r)          (N - 1 denominator)
//   max drawdown = largest peak-to-trough of a compounded unit equity curve
//   stability    = clamp01(1 / (1 + std/|mean|) * (1 - maxDD))
//   loss streak  = longest run of LOSS in chronological order
//
// Fewer than two trades yields the "unknown" profile (win rate 0.5, sharpe 0,
// stability 0.5), never a "bad" one.
// =============================================================================

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{TradeOutcome, TradeResult};

/// Below this, a standard deviation or mean is treated as zero.
const EPSILON: f64 = 1e-9;
/// Volatility ratio assumed when the mean return is ~0.
const DEFAULT_VOL_RATIO: f64 = 0.5;

const UNKNOWN_WIN_RATE: f64 = 0.5;
const UNKNOWN_STABILITY: f64 = 0.5;

/// Derived statistics for one time slice. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceWindow {
    pub sample_count: usize,
    pub trade_win_rate: f64,
    pub sharpe_like: f64,
    pub max_drawdown: f64,
    pub stability_score: f64,
    pub consecutive_loss_max: u32,
}

impl PerformanceWindow {
    /// Window for an empty slice.
    pub fn empty() -> Self {
        Self {
            sample_count: 0,
            trade_win_rate: UNKNOWN_WIN_RATE,
            sharpe_like: 0.0,
            max_drawdown: 0.0,
            stability_score: UNKNOWN_STABILITY,
            consecutive_loss_max: 0,
        }
    }
}

/// Start of a window of `window_days` ending at `end`.
/// Saturates at the earliest representable instant.
pub fn window_start(end: DateTime<Utc>, window_days: u32) -> DateTime<Utc> {
    end.checked_sub_signed(Duration::seconds(i64::from(window_days) * 86_400))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Fractional days from `earlier` to `later`.
pub fn days_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 86_400_000.0
}

/// Compute the window `[now - window_days, now)` over `trades`.
pub fn compute_window(
    trades: &[TradeOutcome],
    window_days: u32,
    now: DateTime<Utc>,
) -> PerformanceWindow {
    let start = window_start(now, window_days);
    let mut slice: Vec<&TradeOutcome> = trades
        .iter()
        .filter(|t| t.time >= start && t.time < now)
        .collect();
    slice.sort_by_key(|t| t.time);
    summarize(&slice)
}

/// Statistics over an already-filtered, chronologically ordered slice.
fn summarize(slice: &[&TradeOutcome]) -> PerformanceWindow {
    let n = slice.len();
    let consecutive_loss_max = longest_loss_streak(slice);

    if n < 2 {
        return PerformanceWindow {
            sample_count: n,
            consecutive_loss_max,
            ..PerformanceWindow::empty()
        };
    }

    let wins = slice.iter().filter(|t| t.result == TradeResult::Win).count();
    let losses = slice.iter().filter(|t| t.result == TradeResult::Loss).count();
    let trade_win_rate = if wins + losses > 0 {
        wins as f64 / (wins + losses) as f64
    } else {
        UNKNOWN_WIN_RATE
    };

    let returns: Vec<f64> = slice.iter().map(|t| t.return_pct).collect();
    let mean = returns.iter().sum::<f64>() / n as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    let std_dev = variance.sqrt();

    let sharpe_like = if std_dev < EPSILON { 0.0 } else { mean / std_dev };
    let max_drawdown = max_drawdown(&returns);

    let vol_ratio = if mean.abs() < EPSILON {
        DEFAULT_VOL_RATIO
    } else {
        std_dev / mean.abs()
    };
    let stability_score = ((1.0 / (1.0 + vol_ratio)) * (1.0 - max_drawdown)).clamp(0.0, 1.0);

    PerformanceWindow {
        sample_count: n,
        trade_win_rate,
        sharpe_like,
        max_drawdown,
        stability_score,
        consecutive_loss_max,
    }
}

/// Replay `returns` (percent points) on a unit equity curve and report the
/// largest retracement from a running peak, as a fraction.
fn max_drawdown(returns: &[f64]) -> f64 {
    let mut equity = 1.0_f64;
    let mut peak = 1.0_f64;
    let mut worst = 0.0_f64;

    for r in returns {
        equity *= 1.0 + r / 100.0;
        if equity > peak {
            peak = equity;
        }
        if peak > 0.0 {
            let dd = (peak - equity) / peak;
            if dd > worst {
                worst = dd;
            }
        }
    }

    worst.clamp(0.0, 1.0)
}

/// NEUTRAL neither extends nor resets a streak.
fn longest_loss_streak(slice: &[&TradeOutcome]) -> u32 {
    let mut current = 0_u32;
    let mut longest = 0_u32;
    for t in slice {
        match t.result {
            TradeResult::Loss => {
                current += 1;
                longest = longest.max(current);
            }
            TradeResult::Win => current = 0,
            TradeResult::Neutral => {}
        }
    }
    longest
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::Horizon;
    use chrono::TimeZone;

    pub(crate) fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    pub(crate) fn trade(
        model_id: &str,
        hours_ago: i64,
        return_pct: f64,
        now: DateTime<Utc>,
    ) -> TradeOutcome {
        let result = if return_pct > 0.0 {
            TradeResult::Win
        } else if return_pct < 0.0 {
            TradeResult::Loss
        } else {
            TradeResult::Neutral
        };
        TradeOutcome {
            time: now - Duration::hours(hours_ago),
            horizon: Horizon::OneDay,
            symbol: "BTC".to_string(),
            model_id: model_id.to_string(),
            return_pct,
            result,
            is_shadow: false,
        }
    }

    /// `per_window` trades in each of `windows` consecutive 14-day slices
    /// ending at `now`. Within every ten trades the first `wins_per_10` win
    /// (+1 %) and the rest lose (-0.5 %).
    pub(crate) fn series(
        model_id: &str,
        windows: i64,
        per_window: i64,
        wins_per_10: i64,
        now: DateTime<Utc>,
    ) -> Vec<TradeOutcome> {
        (0..windows)
            .flat_map(|i| {
                (0..per_window).map(move |k| {
                    let ret = if k % 10 < wins_per_10 { 1.0 } else { -0.5 };
                    (i * 14 * 24 + 1 + k * 6, ret)
                })
            })
            .map(|(hours_ago, ret)| trade(model_id, hours_ago, ret, now))
            .collect()
    }

    #[test]
    fn window_start_saturates_for_huge_lookbacks() {
        let now = fixed_now();
        assert_eq!(window_start(now, u32::MAX), DateTime::<Utc>::MIN_UTC);
        let w = compute_window(&[trade("m", 1, 1.0, now), trade("m", 2, -1.0, now)], u32::MAX, now);
        assert_eq!(w.sample_count, 2);
    }

    #[test]
    fn days_between_is_fractional() {
        let now = fixed_now();
        assert!((days_between(now - Duration::hours(36), now) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn fewer_than_two_trades_is_unknown_not_bad() {
        let now = fixed_now();
        let w = compute_window(&[trade("m", 1, -5.0, now)], 14, now);
        assert_eq!(w.sample_count, 1);
        assert!((w.trade_win_rate - 0.5).abs() < 1e-12);
        assert_eq!(w.sharpe_like, 0.0);
        assert!((w.stability_score - 0.5).abs() < 1e-12);
        assert_eq!(w.consecutive_loss_max, 1);

        let empty = compute_window(&[], 14, now);
        assert_eq!(empty, PerformanceWindow::empty());
    }

    #[test]
    fn window_bounds_are_half_open() {
        let now = fixed_now();
        let trades = vec![
            trade("m", 0, 1.0, now),        // exactly now: excluded
            trade("m", 14 * 24, 1.0, now),  // exactly start: included
            trade("m", 14 * 24 + 1, 1.0, now), // before start: excluded
            trade("m", 5, -1.0, now),
        ];
        let w = compute_window(&trades, 14, now);
        assert_eq!(w.sample_count, 2);
    }

    #[test]
    fn win_rate_excludes_neutral() {
        let now = fixed_now();
        let trades = vec![
            trade("m", 1, 2.0, now),
            trade("m", 2, 0.0, now),
            trade("m", 3, 0.0, now),
            trade("m", 4, -1.0, now),
        ];
        let w = compute_window(&trades, 14, now);
        assert_eq!(w.sample_count, 4);
        assert!((w.trade_win_rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn sharpe_uses_sample_std_dev() {
        let now = fixed_now();
        // returns 1, 2, 3: mean 2, sample std 1 -> sharpe 2
        let trades = vec![
            trade("m", 3, 1.0, now),
            trade("m", 2, 2.0, now),
            trade("m", 1, 3.0, now),
        ];
        let w = compute_window(&trades, 14, now);
        assert!((w.sharpe_like - 2.0).abs() < 1e-9, "got {}", w.sharpe_like);
        // vol ratio 0.5, no drawdown -> stability 1/1.5
        assert!((w.stability_score - 1.0 / 1.5).abs() < 1e-9);
    }

    #[test]
    fn constant_returns_have_zero_sharpe() {
        let now = fixed_now();
        let trades: Vec<_> = (1..=5).map(|h| trade("m", h, 1.0, now)).collect();
        let w = compute_window(&trades, 14, now);
        assert_eq!(w.sharpe_like, 0.0);
        assert_eq!(w.max_drawdown, 0.0);
    }

    #[test]
    fn drawdown_replays_chronologically() {
        let now = fixed_now();
        // Oldest first: +10 %, -20 %, +5 %. Peak 1.10, trough 0.88 -> 20 %.
        let trades = vec![
            trade("m", 1, 5.0, now),
            trade("m", 3, 10.0, now),
            trade("m", 2, -20.0, now),
        ];
        let w = compute_window(&trades, 14, now);
        assert!((w.max_drawdown - 0.20).abs() < 1e-9, "got {}", w.max_drawdown);
    }

    #[test]
    fn zero_mean_uses_default_vol_ratio() {
        let now = fixed_now();
        let trades = vec![trade("m", 2, 5.0, now), trade("m", 1, -5.0, now)];
        let w = compute_window(&trades, 14, now);
        let expected = (1.0 / 1.5) * (1.0 - w.max_drawdown);
        assert!((w.stability_score - expected).abs() < 1e-9);
    }

    #[test]
    fn loss_streak_ignores_neutral_and_resets_on_win() {
        let now = fixed_now();
        // chronological: L L N L W L L
        let trades = vec![
            trade("m", 7, -1.0, now),
            trade("m", 6, -1.0, now),
            trade("m", 5, 0.0, now),
            trade("m", 4, -1.0, now),
            trade("m", 3, 1.0, now),
            trade("m", 2, -1.0, now),
            trade("m", 1, -1.0, now),
        ];
        let w = compute_window(&trades, 14, now);
        assert_eq!(w.consecutive_loss_max, 3);
    }

    #[test]
    fn stability_stays_in_unit_interval() {
        let now = fixed_now();
        let trades: Vec<_> = (1..=20)
            .map(|h| trade("m", h, if h % 2 == 0 { -30.0 } else { 4.0 }, now))
            .collect();
        let w = compute_window(&trades, 14, now);
        assert!((0.0..=1.0).contains(&w.stability_score));
        assert!((0.0..=1.0).contains(&w.max_drawdown));
    }
}
