// =============================================================================
// Promotion Decision Engine — 6 ordered gates before a shadow goes live
// =============================================================================
//
// Gates short-circuit in order; the first failure blocks promotion and its
// reason is returned for audit.
//
// Gates:
//   1. Registry       — active and shadow ids exist and differ
//   2. PromotionLock  — guardrails promotion lock is off
//   3. SampleSize     — shadow window sample count >= min_samples
//   4. Cooldown       — days since last PROMOTED >= cooldown_days
//                       (no history = infinitely long ago)
//   5. Safety         — shadow drawdown <= ceiling AND stability >= floor
//   6. SustainedLift  — shadow beats active in every lift window
//
// The engine is pure: registry, lock state and the last promotion time are
// passed in, trades are pulled through a loader only once gates 1-2 pass.
// Executing the verdict is the lifecycle service's job.
// =============================================================================

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::performance::{compute_window, days_between, PerformanceWindow};
use crate::runtime_config::{PromotionConfig, SustainedLiftConfig};
use crate::sustained_lift::{SustainedLiftEvaluator, SustainedLiftResult};
use crate::types::{Horizon, ModelRegistryEntry, TradeOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromotionGate {
    Registry,
    PromotionLock,
    SampleSize,
    Cooldown,
    Safety,
    SustainedLift,
}

impl std::fmt::Display for PromotionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registry => write!(f, "REGISTRY"),
            Self::PromotionLock => write!(f, "PROMOTION_LOCK"),
            Self::SampleSize => write!(f, "SAMPLE_SIZE"),
            Self::Cooldown => write!(f, "COOLDOWN"),
            Self::Safety => write!(f, "SAFETY"),
            Self::SustainedLift => write!(f, "SUSTAINED_LIFT"),
        }
    }
}

/// Auditable promotion verdict for one horizon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionCheckResult {
    pub horizon: Horizon,
    pub should_promote: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_gate: Option<PromotionGate>,
    pub active_model_id: Option<String>,
    pub shadow_model_id: Option<String>,
    /// Entry observed at evaluation; the swap is conditional on it.
    #[serde(skip)]
    pub observed_entry: Option<ModelRegistryEntry>,
    pub shadow_window: Option<PerformanceWindow>,
    /// `None` means no promotion was ever logged for this horizon.
    pub days_since_last_promotion: Option<f64>,
    pub sustained_lift: Option<SustainedLiftResult>,
    /// Set when evaluation itself failed (trade load, registry I/O).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub evaluated_at: DateTime<Utc>,
}

impl PromotionCheckResult {
    fn new(horizon: Horizon, now: DateTime<Utc>) -> Self {
        Self {
            horizon,
            should_promote: false,
            reason: String::new(),
            blocking_gate: None,
            active_model_id: None,
            shadow_model_id: None,
            observed_entry: None,
            shadow_window: None,
            days_since_last_promotion: None,
            sustained_lift: None,
            error: None,
            evaluated_at: now,
        }
    }

    fn block(mut self, gate: PromotionGate, reason: String) -> Self {
        debug!(horizon = %self.horizon, gate = %gate, reason = %reason, "promotion blocked");
        self.should_promote = false;
        self.blocking_gate = Some(gate);
        self.reason = reason;
        self
    }

    /// Non-promoted result for a failure outside the gate sequence
    /// (trade load, registry I/O).
    pub fn failed(horizon: Horizon, now: DateTime<Utc>, reason: String) -> Self {
        Self {
            error: Some(reason.clone()),
            reason,
            ..Self::new(horizon, now)
        }
    }
}

/// Everything the gates read besides trades.
#[derive(Debug, Clone)]
pub struct PromotionInputs<'a> {
    pub horizon: Horizon,
    pub entry: Option<&'a ModelRegistryEntry>,
    pub promotion_locked: bool,
    pub last_promotion: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PromotionEngine {
    config: PromotionConfig,
    lift: SustainedLiftEvaluator,
}

impl PromotionEngine {
    pub fn new(config: PromotionConfig, lift: SustainedLiftConfig) -> Self {
        Self {
            config,
            lift: SustainedLiftEvaluator::new(lift),
        }
    }

    pub fn config(&self) -> &PromotionConfig {
        &self.config
    }

    /// Days of history a single evaluation needs.
    pub fn lookback_days(&self) -> u32 {
        self.config
            .window_days
            .max(self.lift.config().span_days())
    }

    /// Run the gate sequence. `load(model_id, lookback_days)` supplies resolved
    /// trades; its errors propagate.
    pub fn evaluate<L>(&self, inputs: PromotionInputs<'_>, mut load: L) -> Result<PromotionCheckResult>
    where
        L: FnMut(&str, u32) -> Result<Vec<TradeOutcome>>,
    {
        let cfg = &self.config;
        let PromotionInputs {
            horizon,
            entry,
            promotion_locked,
            last_promotion,
            now,
        } = inputs;

        let mut result = PromotionCheckResult::new(horizon, now);
        result.observed_entry = entry.cloned();
        result.active_model_id = entry.and_then(|e| e.active_model_id.clone());
        result.shadow_model_id = entry.and_then(|e| e.shadow_model_id.clone());
        result.days_since_last_promotion = last_promotion.map(|ts| days_between(ts, now));

        // Gate 1: Registry
        let (active_id, shadow_id) = match (&result.active_model_id, &result.shadow_model_id) {
            (Some(a), Some(s)) => (a.clone(), s.clone()),
            (None, _) => {
                let reason = format!("No active model registered for {}", horizon);
                return Ok(result.block(PromotionGate::Registry, reason));
            }
            (Some(_), None) => {
                let reason = format!("No shadow model registered for {}", horizon);
                return Ok(result.block(PromotionGate::Registry, reason));
            }
        };
        if active_id == shadow_id {
            let reason = format!(
                "Shadow {} is already active for {}; awaiting a fresh shadow",
                shadow_id, horizon
            );
            return Ok(result.block(PromotionGate::Registry, reason));
        }

        // Gate 2: Promotion lock
        if promotion_locked {
            let reason = "Promotion locked by guardrails".to_string();
            return Ok(result.block(PromotionGate::PromotionLock, reason));
        }

        let lookback = self.lookback_days();
        let shadow_trades = load(&shadow_id, lookback)?;
        let shadow_window = compute_window(&shadow_trades, cfg.window_days, now);
        result.shadow_window = Some(shadow_window.clone());

        // Gate 3: Sample size
        if shadow_window.sample_count < cfg.min_samples {
            let reason = format!(
                "Insufficient shadow samples: {} < {} required over {} days",
                shadow_window.sample_count, cfg.min_samples, cfg.window_days
            );
            return Ok(result.block(PromotionGate::SampleSize, reason));
        }

        // Gate 4: Cooldown
        if let Some(days) = result.days_since_last_promotion {
            if days < cfg.cooldown_days {
                let reason = format!(
                    "Promotion cooldown active: {:.1} days since last promotion < {:.0} days",
                    days, cfg.cooldown_days
                );
                return Ok(result.block(PromotionGate::Cooldown, reason));
            }
        }

        // Gate 5: Safety
        if shadow_window.max_drawdown > cfg.max_drawdown {
            let reason = format!(
                "Shadow drawdown too deep: {:.1}% > {:.1}% limit",
                shadow_window.max_drawdown * 100.0,
                cfg.max_drawdown * 100.0
            );
            return Ok(result.block(PromotionGate::Safety, reason));
        }
        if shadow_window.stability_score < cfg.min_stability {
            let reason = format!(
                "Shadow stability too low: {:.3} < {:.3}",
                shadow_window.stability_score, cfg.min_stability
            );
            return Ok(result.block(PromotionGate::Safety, reason));
        }

        // Gate 6: Sustained lift
        let active_trades = load(&active_id, lookback)?;
        let lift = self.lift.evaluate(&active_trades, &shadow_trades, horizon, now);
        let sustained = lift.sustained;
        let lift_reason = lift.reason.clone();
        result.sustained_lift = Some(lift);
        if !sustained {
            return Ok(result.block(PromotionGate::SustainedLift, lift_reason));
        }

        result.should_promote = true;
        result.reason = format!(
            "All gates passed: {} -> {} ({} shadow samples). {}",
            active_id, shadow_id, shadow_window.sample_count, lift_reason
        );
        debug!(horizon = %horizon, shadow = %shadow_id, "promotion approved");
        Ok(result)
    }
}
