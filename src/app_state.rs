// =============================================================================
// Central Application State — Aurora Lifecycle Governor
// =============================================================================
//
// Ties the lifecycle service, guardrails and configuration together for the
// control API and the scheduler, and keeps the in-memory audit trail of recent
// decisions.
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock for all mutable shared collections.
//   - Arc wrappers for the service and guardrails, which manage their own
//     interior mutability.
// =============================================================================

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::decision_envelope::DecisionEnvelope;
use crate::guardrails::{Guardrails, GuardrailsConfig, GuardrailsStore};
use crate::lifecycle::LifecycleService;
use crate::runtime_config::LifecycleConfig;

// =============================================================================
// Error Record
// =============================================================================

/// A recorded error event for the control API error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// Horizon the error pertains to, if any.
    pub horizon: Option<String>,
    /// ISO 8601 timestamp.
    pub at: String,
}

// =============================================================================
// AppState
// =============================================================================

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;
/// Maximum number of recent decisions to retain.
const MAX_RECENT_DECISIONS: usize = 100;

/// Shared state handed to every async task via `Arc<AppState>`.
pub struct AppState {
    // ── Version tracking ────────────────────────────────────────────────
    /// Incremented on every meaningful state mutation.
    pub state_version: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub config: Arc<RwLock<LifecycleConfig>>,
    pub config_path: PathBuf,

    // ── Engine ──────────────────────────────────────────────────────────
    pub service: Arc<LifecycleService>,
    pub guardrails: Arc<Guardrails>,

    // ── Audit Trail ─────────────────────────────────────────────────────
    pub recent_decisions: RwLock<Vec<DecisionEnvelope>>,
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    // ── Scheduler ───────────────────────────────────────────────────────
    pub last_tick: RwLock<Option<DateTime<Utc>>>,

    // ── Timing ──────────────────────────────────────────────────────────
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        config: LifecycleConfig,
        config_path: impl Into<PathBuf>,
        service: Arc<LifecycleService>,
        guardrails: Arc<Guardrails>,
    ) -> Self {
        Self {
            state_version: AtomicU64::new(1),
            config: Arc::new(RwLock::new(config)),
            config_path: config_path.into(),
            service,
            guardrails,
            recent_decisions: RwLock::new(Vec::new()),
            recent_errors: RwLock::new(Vec::new()),
            last_tick: RwLock::new(None),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Error Logging ───────────────────────────────────────────────────

    /// Record an error message; the ring buffer is capped at
    /// [`MAX_RECENT_ERRORS`].
    pub fn push_error(&self, msg: String, horizon: Option<String>) {
        let record = ErrorRecord {
            message: msg,
            horizon,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }

        self.increment_version();
    }

    // ── Decision Audit ──────────────────────────────────────────────────

    /// Record a decision envelope. The ring buffer is capped at
    /// [`MAX_RECENT_DECISIONS`]; oldest entries are evicted first.
    pub fn push_decision(&self, envelope: DecisionEnvelope) {
        if envelope.verdict == "ERROR" {
            self.push_error(envelope.reason.clone(), Some(envelope.horizon.clone()));
        }

        let mut decisions = self.recent_decisions.write();
        decisions.push(envelope);
        while decisions.len() > MAX_RECENT_DECISIONS {
            decisions.remove(0);
        }
        drop(decisions);

        self.increment_version();
    }

    // ── Guardrails ──────────────────────────────────────────────────────

    /// Apply a guardrail change to the live switches and mirror it into the
    /// config so it survives a restart.
    pub fn update_guardrails(&self, promotion_lock: Option<bool>, kill_switch: Option<bool>) -> GuardrailsConfig {
        if let Some(locked) = promotion_lock {
            self.guardrails.set_promotion_lock(locked);
        }
        if let Some(killed) = kill_switch {
            self.guardrails.set_kill_switch(killed);
        }
        let snapshot = self.guardrails.snapshot();
        self.config.write().guardrails = snapshot.clone();
        self.increment_version();
        snapshot
    }

    // ── Status ──────────────────────────────────────────────────────────

    pub fn build_status(&self) -> StatusSnapshot {
        let config = self.config.read();
        StatusSnapshot {
            state_version: self.current_state_version(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            symbol: config.symbol.clone(),
            auto_execute: config.auto_execute,
            schedule_interval_secs: config.schedule_interval_secs,
            guardrails: self.guardrails.snapshot(),
            last_tick: *self.last_tick.read(),
            recent_decisions: self.recent_decisions.read().len(),
            recent_errors: self.recent_errors.read().clone(),
        }
    }
}

/// Serialisable overview for `GET /api/v1/status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state_version: u64,
    pub uptime_secs: u64,
    pub symbol: String,
    pub auto_execute: bool,
    pub schedule_interval_secs: u64,
    pub guardrails: GuardrailsConfig,
    pub last_tick: Option<DateTime<Utc>>,
    pub recent_decisions: usize,
    pub recent_errors: Vec<ErrorRecord>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::event_log::EventJournal;
    use crate::performance::tests::fixed_now;
    use crate::promotion::PromotionCheckResult;
    use crate::registry::ModelRegistry;
    use crate::types::Horizon;

    pub(crate) fn test_state() -> Arc<AppState> {
        let config = LifecycleConfig::default();
        let guardrails = Arc::new(Guardrails::new(config.guardrails.clone()));
        let service = LifecycleService::new(
            Arc::new(ModelRegistry::in_memory()),
            Arc::new(EventJournal::in_memory()),
            guardrails.clone(),
            &config,
        );
        let dir = std::env::temp_dir().join(format!("governor-test-{}", uuid::Uuid::new_v4()));
        Arc::new(AppState::new(
            config,
            dir.join("lifecycle_config.json"),
            Arc::new(service),
            guardrails,
        ))
    }

    #[test]
    fn decision_ring_is_capped() {
        let state = test_state();
        let check = PromotionCheckResult::failed(Horizon::OneDay, fixed_now(), "x".to_string());
        for _ in 0..(MAX_RECENT_DECISIONS + 20) {
            state.push_decision(DecisionEnvelope::from_promotion("BTC", &check, false));
        }
        assert_eq!(state.recent_decisions.read().len(), MAX_RECENT_DECISIONS);
        // ERROR verdicts are mirrored into the error log, which has its own cap.
        assert_eq!(state.recent_errors.read().len(), MAX_RECENT_ERRORS);
    }

    #[test]
    fn guardrail_updates_reach_config() {
        let state = test_state();
        let before = state.current_state_version();
        let g = state.update_guardrails(Some(true), None);
        assert!(g.promotion_lock);
        assert!(state.config.read().guardrails.promotion_lock);
        assert!(state.current_state_version() > before);
        assert!(!state.build_status().guardrails.kill_switch);
    }
}
