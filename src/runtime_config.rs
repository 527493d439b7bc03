// =============================================================================
// Runtime Configuration — Lifecycle thresholds with atomic save
// =============================================================================
//
// Central configuration hub for the lifecycle governor.  Every threshold the
// promotion and rollback engines consult lives here so that the governor can
// be retuned by editing one JSON file.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::guardrails::GuardrailsConfig;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbol() -> String {
    "BTC".to_string()
}

fn default_schedule_interval_secs() -> u64 {
    3600
}

fn default_registry_path() -> String {
    "data/model_registry.json".to_string()
}

fn default_event_log_path() -> String {
    "data/lifecycle_events.jsonl".to_string()
}

fn default_trade_journal_path() -> String {
    "data/trade_outcomes.jsonl".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:3002".to_string()
}

fn default_promo_window_days() -> u32 {
    42
}

fn default_promo_min_samples() -> usize {
    120
}

fn default_promo_cooldown_days() -> f64 {
    56.0
}

fn default_promo_max_drawdown() -> f64 {
    0.10
}

fn default_promo_min_stability() -> f64 {
    0.25
}

fn default_sustained_windows() -> u32 {
    3
}

fn default_lift_window_days() -> u32 {
    14
}

fn default_min_win_rate_lift() -> f64 {
    0.02
}

fn default_min_sharpe_lift() -> f64 {
    0.10
}

fn default_min_trades_per_window() -> usize {
    30
}

fn default_rollback_window_days() -> u32 {
    21
}

fn default_rollback_min_samples() -> usize {
    40
}

fn default_rollback_cooldown_days() -> f64 {
    14.0
}

fn default_win_rate_floor() -> f64 {
    0.45
}

fn default_rollback_max_drawdown() -> f64 {
    0.12
}

fn default_stability_floor() -> f64 {
    0.50
}

fn default_consecutive_loss_threshold() -> u32 {
    12
}

fn default_sharpe_floor() -> f64 {
    -0.25
}

// =============================================================================
// PromotionConfig
// =============================================================================

/// Thresholds for the promotion gate sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionConfig {
    /// Lookback (days) of the shadow window used by the sample and safety gates.
    #[serde(default = "default_promo_window_days")]
    pub window_days: u32,

    /// Minimum resolved shadow trades in the window.
    #[serde(default = "default_promo_min_samples")]
    pub min_samples: usize,

    /// Minimum days between two promotions of the same horizon.
    #[serde(default = "default_promo_cooldown_days")]
    pub cooldown_days: f64,

    /// Shadow max drawdown ceiling (fraction, 0.10 = 10 %).
    #[serde(default = "default_promo_max_drawdown")]
    pub max_drawdown: f64,

    /// Shadow stability score floor.
    #[serde(default = "default_promo_min_stability")]
    pub min_stability: f64,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            window_days: default_promo_window_days(),
            min_samples: default_promo_min_samples(),
            cooldown_days: default_promo_cooldown_days(),
            max_drawdown: default_promo_max_drawdown(),
            min_stability: default_promo_min_stability(),
        }
    }
}

// =============================================================================
// SustainedLiftConfig
// =============================================================================

/// Parameters of the multi-window lift check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SustainedLiftConfig {
    /// Number of consecutive windows the shadow must win.
    #[serde(default = "default_sustained_windows")]
    pub sustained_windows: u32,

    /// Length of each window in days.
    #[serde(default = "default_lift_window_days")]
    pub window_days: u32,

    /// Minimum shadow-minus-active win rate.
    #[serde(default = "default_min_win_rate_lift")]
    pub min_win_rate_lift: f64,

    /// Minimum shadow-minus-active sharpe-like ratio.
    #[serde(default = "default_min_sharpe_lift")]
    pub min_sharpe_lift: f64,

    /// Minimum shadow trades inside every window.
    #[serde(default = "default_min_trades_per_window")]
    pub min_trades_per_window: usize,
}

impl SustainedLiftConfig {
    /// Total history spanned by all windows.
    pub fn span_days(&self) -> u32 {
        self.sustained_windows.saturating_mul(self.window_days)
    }
}

impl Default for SustainedLiftConfig {
    fn default() -> Self {
        Self {
            sustained_windows: default_sustained_windows(),
            window_days: default_lift_window_days(),
            min_win_rate_lift: default_min_win_rate_lift(),
            min_sharpe_lift: default_min_sharpe_lift(),
            min_trades_per_window: default_min_trades_per_window(),
        }
    }
}

// =============================================================================
// RollbackConfig
// =============================================================================

/// Thresholds for the rollback gate sequence and trigger flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackConfig {
    /// Lookback (days) of the active window.
    #[serde(default = "default_rollback_window_days")]
    pub window_days: u32,

    /// Minimum resolved active trades in the window.
    #[serde(default = "default_rollback_min_samples")]
    pub min_samples: usize,

    /// Minimum days between two rollbacks of the same horizon.
    #[serde(default = "default_rollback_cooldown_days")]
    pub cooldown_days: f64,

    /// Win rate below this floor raises the win-rate flag.
    #[serde(default = "default_win_rate_floor")]
    pub win_rate_floor: f64,

    /// Drawdown above this ceiling raises the drawdown flag.
    #[serde(default = "default_rollback_max_drawdown")]
    pub max_drawdown: f64,

    /// Stability below this floor raises the stability flag.
    #[serde(default = "default_stability_floor")]
    pub stability_floor: f64,

    /// Loss streak at or above this length raises the streak flag.
    #[serde(default = "default_consecutive_loss_threshold")]
    pub consecutive_loss_threshold: u32,

    /// Sharpe-like ratio below this floor raises the (informational) sharpe flag.
    #[serde(default = "default_sharpe_floor")]
    pub sharpe_floor: f64,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            window_days: default_rollback_window_days(),
            min_samples: default_rollback_min_samples(),
            cooldown_days: default_rollback_cooldown_days(),
            win_rate_floor: default_win_rate_floor(),
            max_drawdown: default_rollback_max_drawdown(),
            stability_floor: default_stability_floor(),
            consecutive_loss_threshold: default_consecutive_loss_threshold(),
            sharpe_floor: default_sharpe_floor(),
        }
    }
}

// =============================================================================
// LifecycleConfig
// =============================================================================

/// Top-level configuration for the lifecycle governor.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    // --- Scheduling ---------------------------------------------------------

    /// Symbol whose trade outcomes drive evaluation.
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Seconds between two scheduler passes.
    #[serde(default = "default_schedule_interval_secs")]
    pub schedule_interval_secs: u64,

    /// When false the scheduler only evaluates and records verdicts.
    #[serde(default)]
    pub auto_execute: bool,

    // --- Storage ------------------------------------------------------------

    #[serde(default = "default_registry_path")]
    pub registry_path: String,

    #[serde(default = "default_event_log_path")]
    pub event_log_path: String,

    /// JSON-lines trade journal used by the best-effort fallback loader.
    #[serde(default = "default_trade_journal_path")]
    pub trade_journal_path: String,

    /// Base URL of the external trade-history service. When unset, the
    /// fallback journal is used.
    #[serde(default)]
    pub trade_source_url: Option<String>,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    // --- Engines ------------------------------------------------------------

    #[serde(default)]
    pub promotion: PromotionConfig,

    #[serde(default)]
    pub sustained_lift: SustainedLiftConfig,

    #[serde(default)]
    pub rollback: RollbackConfig,

    #[serde(default)]
    pub guardrails: GuardrailsConfig,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            schedule_interval_secs: default_schedule_interval_secs(),
            auto_execute: false,
            registry_path: default_registry_path(),
            event_log_path: default_event_log_path(),
            trade_journal_path: default_trade_journal_path(),
            trade_source_url: None,
            bind_addr: default_bind_addr(),
            promotion: PromotionConfig::default(),
            sustained_lift: SustainedLiftConfig::default(),
            rollback: RollbackConfig::default(),
            guardrails: GuardrailsConfig::default(),
        }
    }
}

/// Longest lookback any window may span (ten years).
pub const MAX_WINDOW_DAYS: u32 = 3_650;

/// Upper bound on the number of sustained-lift windows.
pub const MAX_SUSTAINED_WINDOWS: u32 = 52;

impl LifecycleConfig {
    /// Reject values the engines cannot evaluate meaningfully.
    pub fn validate(&self) -> Result<()> {
        let windows = [
            ("promotion.window_days", self.promotion.window_days),
            ("sustained_lift.window_days", self.sustained_lift.window_days),
            ("rollback.window_days", self.rollback.window_days),
        ];
        for (name, days) in windows {
            if days == 0 || days > MAX_WINDOW_DAYS {
                bail!("{} must be in 1..={}, got {}", name, MAX_WINDOW_DAYS, days);
            }
        }

        let n = self.sustained_lift.sustained_windows;
        if n == 0 || n > MAX_SUSTAINED_WINDOWS {
            bail!(
                "sustained_lift.sustained_windows must be in 1..={}, got {}",
                MAX_SUSTAINED_WINDOWS,
                n
            );
        }
        if self.sustained_lift.span_days() > MAX_WINDOW_DAYS {
            bail!(
                "sustained lift spans {} days, more than {}",
                self.sustained_lift.span_days(),
                MAX_WINDOW_DAYS
            );
        }

        for (name, days) in [
            ("promotion.cooldown_days", self.promotion.cooldown_days),
            ("rollback.cooldown_days", self.rollback.cooldown_days),
        ] {
            if !days.is_finite() || days < 0.0 {
                bail!("{} must be a non-negative number, got {}", name, days);
            }
        }

        if self.schedule_interval_secs == 0 {
            bail!("schedule_interval_secs must be at least 1");
        }
        Ok(())
    }

    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read lifecycle config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse lifecycle config from {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid lifecycle config in {}", path.display()))?;

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            auto_execute = config.auto_execute,
            "lifecycle config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise lifecycle config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "lifecycle config saved (atomic)");
        Ok(())
    }
}
