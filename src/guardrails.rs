// =============================================================================
// Guardrails — process-wide switches that can veto promotion
// =============================================================================
//
// Switches:
//   1. Promotion Lock — vetoes promotion only. Rollback is never blocked by
//                       it: defensive actions must always remain possible.
//   2. Kill Switch    — consumed by the execution layer; surfaced here for
//                       the control API.
//   3. Exposure / volatility caps and the daily retrain limit are consumed by
//      the execution layer and the training orchestrator respectively.
//
// The lifecycle engine only ever reads guardrails.
// =============================================================================

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

fn default_max_daily_retrains() -> u32 {
    2
}

fn default_max_exposure_pct() -> f64 {
    25.0
}

fn default_max_volatility_pct() -> f64 {
    8.0
}

/// Process-wide guardrail flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailsConfig {
    #[serde(default)]
    pub kill_switch: bool,

    #[serde(default)]
    pub promotion_lock: bool,

    /// Maximum retrains per day (training orchestrator).
    #[serde(default = "default_max_daily_retrains")]
    pub max_daily_retrains: u32,

    /// Maximum gross exposure as a percentage of capital (execution layer).
    #[serde(default = "default_max_exposure_pct")]
    pub max_exposure_pct: f64,

    /// Realised volatility above which the execution layer stands down.
    #[serde(default = "default_max_volatility_pct")]
    pub max_volatility_pct: f64,
}

impl Default for GuardrailsConfig {
    fn default() -> Self {
        Self {
            kill_switch: false,
            promotion_lock: false,
            max_daily_retrains: default_max_daily_retrains(),
            max_exposure_pct: default_max_exposure_pct(),
            max_volatility_pct: default_max_volatility_pct(),
        }
    }
}

/// Read-only view the lifecycle engine depends on.
pub trait GuardrailsStore: Send + Sync {
    fn is_promotion_locked(&self) -> bool;

    fn snapshot(&self) -> GuardrailsConfig;
}

/// In-process guardrails, toggled by the control API.
pub struct Guardrails {
    state: RwLock<GuardrailsConfig>,
}

impl Guardrails {
    pub fn new(config: GuardrailsConfig) -> Self {
        info!(
            promotion_lock = config.promotion_lock,
            kill_switch = config.kill_switch,
            "Guardrails initialised"
        );
        Self {
            state: RwLock::new(config),
        }
    }

    pub fn set_promotion_lock(&self, locked: bool) {
        self.state.write().promotion_lock = locked;
        if locked {
            warn!("promotion lock engaged — promotions vetoed");
        } else {
            info!("promotion lock released");
        }
    }

    pub fn set_kill_switch(&self, killed: bool) {
        self.state.write().kill_switch = killed;
        if killed {
            warn!("kill switch activated");
        } else {
            info!("kill switch cleared");
        }
    }
}

impl GuardrailsStore for Guardrails {
    fn is_promotion_locked(&self) -> bool {
        self.state.read().promotion_lock
    }

    fn snapshot(&self) -> GuardrailsConfig {
        self.state.read().clone()
    }
}

impl Default for Guardrails {
    fn default() -> Self {
        Self::new(GuardrailsConfig::default())
    }
}

impl std::fmt::Debug for Guardrails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.state.read();
        f.debug_struct("Guardrails")
            .field("promotion_lock", &s.promotion_lock)
            .field("kill_switch", &s.kill_switch)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unlocked() {
        let g = Guardrails::default();
        assert!(!g.is_promotion_locked());
        assert!(!g.snapshot().kill_switch);
    }

    #[test]
    fn promotion_lock_toggles() {
        let g = Guardrails::default();
        g.set_promotion_lock(true);
        assert!(g.is_promotion_locked());
        g.set_promotion_lock(false);
        assert!(!g.is_promotion_locked());
    }

    #[test]
    fn kill_switch_does_not_lock_promotion() {
        let g = Guardrails::default();
        g.set_kill_switch(true);
        assert!(g.snapshot().kill_switch);
        assert!(!g.is_promotion_locked());
    }
}
