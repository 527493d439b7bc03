// =============================================================================
// Rollback Decision Engine — graded verdict on a degrading active model
// =============================================================================
//
// Gates (short-circuit, no action when any fails):
//   1. Registry   — active and previous ids exist and differ
//   2. SampleSize — active window sample count >= min_samples
//   3. Cooldown   — days since last ROLLED_BACK >= cooldown_days
//
// Trigger flags computed from the active window:
//   win_rate            win rate < win_rate_floor
//   drawdown            max drawdown > max_drawdown
//   stability           stability score < stability_floor
//   consecutive_losses  longest loss streak >= consecutive_loss_threshold
//   sharpe              sharpe-like < sharpe_floor (reported, not compounded)
//
// Compound triggers (one weak signal alone never rolls back):
//   STREAK_KILLER        streak AND (drawdown OR win_rate)   -> CRITICAL
//   CAPITAL_INSTABILITY  drawdown AND stability AND win_rate -> CRITICAL
//   otherwise win_rate OR drawdown                           -> WARNING
//   otherwise                                                -> NONE
//
// The guardrails promotion lock is not consulted here.
// =============================================================================

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::performance::{compute_window, days_between, PerformanceWindow};
use crate::runtime_config::RollbackConfig;
use crate::types::{Horizon, ModelRegistryEntry, TradeOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RollbackSeverity {
    None,
    Warning,
    Critical,
}

impl std::fmt::Display for RollbackSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "NONE"),
            Self::Warning => write!(f, "WARNING"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RollbackTrigger {
    StreakKiller,
    CapitalInstability,
}

impl std::fmt::Display for RollbackTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StreakKiller => write!(f, "STREAK_KILLER"),
            Self::CapitalInstability => write!(f, "CAPITAL_INSTABILITY"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RollbackGate {
    Registry,
    SampleSize,
    Cooldown,
}

impl std::fmt::Display for RollbackGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registry => write!(f, "REGISTRY"),
            Self::SampleSize => write!(f, "SAMPLE_SIZE"),
            Self::Cooldown => write!(f, "COOLDOWN"),
        }
    }
}

/// Which individual thresholds the active window breached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerFlags {
    pub win_rate: bool,
    pub drawdown: bool,
    pub stability: bool,
    pub consecutive_losses: bool,
    pub sharpe: bool,
}

impl TriggerFlags {
    pub fn from_window(w: &PerformanceWindow, cfg: &RollbackConfig) -> Self {
        Self {
            win_rate: w.trade_win_rate < cfg.win_rate_floor,
            drawdown: w.max_drawdown > cfg.max_drawdown,
            stability: w.stability_score < cfg.stability_floor,
            consecutive_losses: w.consecutive_loss_max >= cfg.consecutive_loss_threshold,
            sharpe: w.sharpe_like < cfg.sharpe_floor,
        }
    }

    /// Names of the raised flags, for reasons and logs.
    pub fn raised(&self) -> Vec<&'static str> {
        [
            (self.win_rate, "win_rate"),
            (self.drawdown, "drawdown"),
            (self.stability, "stability"),
            (self.consecutive_losses, "consecutive_losses"),
            (self.sharpe, "sharpe"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect()
    }
}

/// Outcome of the compound trigger logic over one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackAssessment {
    pub flags: TriggerFlags,
    pub trigger: Option<RollbackTrigger>,
    pub severity: RollbackSeverity,
    pub should_rollback: bool,
    pub reason: String,
}

/// Apply the compound trigger logic to `window`. Pure.
pub fn assess(window: &PerformanceWindow, cfg: &RollbackConfig) -> RollbackAssessment {
    let flags = TriggerFlags::from_window(window, cfg);

    let trigger = if flags.consecutive_losses && (flags.drawdown || flags.win_rate) {
        Some(RollbackTrigger::StreakKiller)
    } else if flags.drawdown && flags.stability && flags.win_rate {
        Some(RollbackTrigger::CapitalInstability)
    } else {
        None
    };

    let (severity, reason) = match trigger {
        Some(RollbackTrigger::StreakKiller) => (
            RollbackSeverity::Critical,
            format!(
                "STREAK_KILLER: {} consecutive losses (limit {}) with drawdown {:.1}% and win rate {:.1}%",
                window.consecutive_loss_max,
                cfg.consecutive_loss_threshold,
                window.max_drawdown * 100.0,
                window.trade_win_rate * 100.0
            ),
        ),
        Some(RollbackTrigger::CapitalInstability) => (
            RollbackSeverity::Critical,
            format!(
                "CAPITAL_INSTABILITY: drawdown {:.1}% > {:.1}%, stability {:.3} < {:.3}, win rate {:.1}% < {:.1}%",
                window.max_drawdown * 100.0,
                cfg.max_drawdown * 100.0,
                window.stability_score,
                cfg.stability_floor,
                window.trade_win_rate * 100.0,
                cfg.win_rate_floor * 100.0
            ),
        ),
        None if flags.win_rate || flags.drawdown => (
            RollbackSeverity::Warning,
            format!(
                "Degradation without co-occurring signals (raised: {}); no rollback",
                flags.raised().join(", ")
            ),
        ),
        None => (
            RollbackSeverity::None,
            if flags.raised().is_empty() {
                "Active model within all rollback thresholds".to_string()
            } else {
                format!("No actionable degradation (raised: {})", flags.raised().join(", "))
            },
        ),
    };

    RollbackAssessment {
        flags,
        trigger,
        severity,
        should_rollback: trigger.is_some(),
        reason,
    }
}

/// Auditable rollback verdict for one horizon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackCheckResult {
    pub horizon: Horizon,
    pub should_rollback: bool,
    pub severity: RollbackSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<RollbackTrigger>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_gate: Option<RollbackGate>,
    pub reason: String,
    pub active_model_id: Option<String>,
    pub previous_model_id: Option<String>,
    #[serde(skip)]
    pub observed_entry: Option<ModelRegistryEntry>,
    pub active_window: Option<PerformanceWindow>,
    pub flags: Option<TriggerFlags>,
    pub days_since_last_rollback: Option<f64>,
    /// Set when evaluation itself failed (trade load, registry I/O).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub evaluated_at: DateTime<Utc>,
}

impl RollbackCheckResult {
    fn new(horizon: Horizon, now: DateTime<Utc>) -> Self {
        Self {
            horizon,
            should_rollback: false,
            severity: RollbackSeverity::None,
            trigger: None,
            blocking_gate: None,
            reason: String::new(),
            active_model_id: None,
            previous_model_id: None,
            observed_entry: None,
            active_window: None,
            flags: None,
            days_since_last_rollback: None,
            error: None,
            evaluated_at: now,
        }
    }

    fn block(mut self, gate: RollbackGate, reason: String) -> Self {
        debug!(horizon = %self.horizon, gate = %gate, reason = %reason, "rollback gated");
        self.should_rollback = false;
        self.blocking_gate = Some(gate);
        self.reason = reason;
        self
    }

    pub fn failed(horizon: Horizon, now: DateTime<Utc>, reason: String) -> Self {
        Self {
            error: Some(reason.clone()),
            reason,
            ..Self::new(horizon, now)
        }
    }
}

#[derive(Debug, Clone)]
pub struct RollbackInputs<'a> {
    pub horizon: Horizon,
    pub entry: Option<&'a ModelRegistryEntry>,
    pub last_rollback: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RollbackEngine {
    config: RollbackConfig,
}

impl RollbackEngine {
    pub fn new(config: RollbackConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RollbackConfig {
        &self.config
    }

    /// Run the gates and, if they pass, the compound trigger logic.
    pub fn evaluate<L>(&self, inputs: RollbackInputs<'_>, mut load: L) -> Result<RollbackCheckResult>
    where
        L: FnMut(&str, u32) -> Result<Vec<TradeOutcome>>,
    {
        let cfg = &self.config;
        let RollbackInputs {
            horizon,
            entry,
            last_rollback,
            now,
        } = inputs;

        let mut result = RollbackCheckResult::new(horizon, now);
        result.observed_entry = entry.cloned();
        result.active_model_id = entry.and_then(|e| e.active_model_id.clone());
        result.previous_model_id = entry.and_then(|e| e.prev_model_id.clone());
        result.days_since_last_rollback = last_rollback.map(|ts| days_between(ts, now));

        // Gate 1: Registry
        let active_id = match (&result.active_model_id, &result.previous_model_id) {
            (Some(a), Some(p)) if a == p => {
                let reason = format!(
                    "Active model {} is already the previous model for {}; nothing to roll back to",
                    a, horizon
                );
                return Ok(result.block(RollbackGate::Registry, reason));
            }
            (Some(a), Some(_)) => a.clone(),
            (None, _) => {
                let reason = format!("No active model registered for {}", horizon);
                return Ok(result.block(RollbackGate::Registry, reason));
            }
            (Some(_), None) => {
                let reason = format!("No previous model registered for {}", horizon);
                return Ok(result.block(RollbackGate::Registry, reason));
            }
        };

        let trades = load(&active_id, cfg.window_days)?;
        let window = compute_window(&trades, cfg.window_days, now);
        result.active_window = Some(window.clone());

        // Gate 2: Sample size
        if window.sample_count < cfg.min_samples {
            let reason = format!(
                "Insufficient active samples: {} < {} required over {} days",
                window.sample_count, cfg.min_samples, cfg.window_days
            );
            return Ok(result.block(RollbackGate::SampleSize, reason));
        }

        // Gate 3: Cooldown
        if let Some(days) = result.days_since_last_rollback {
            if days < cfg.cooldown_days {
                let reason = format!(
                    "Rollback cooldown active: {:.1} days since last rollback < {:.0} days",
                    days, cfg.cooldown_days
                );
                return Ok(result.block(RollbackGate::Cooldown, reason));
            }
        }

        let assessment = assess(&window, cfg);
        if assessment.severity == RollbackSeverity::Warning {
            warn!(
                horizon = %horizon,
                model_id = %active_id,
                win_rate = window.trade_win_rate,
                drawdown = window.max_drawdown,
                "rollback WARNING — logged, no action"
            );
        }

        result.should_rollback = assessment.should_rollback;
        result.severity = assessment.severity;
        result.trigger = assessment.trigger;
        result.flags = Some(assessment.flags);
        result.reason = assessment.reason;
        Ok(result)
    }
}
