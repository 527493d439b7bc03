// =============================================================================
// Lifecycle Service — evaluate and execute promotions / rollbacks
// =============================================================================
//
// Wires the pure decision engines to their collaborators:
//
//   trade source ─┐
//   registry ─────┼─> PromotionEngine / RollbackEngine ─> registry swap
//   event log ────┤                                    └─> event append
//   guardrails ───┘
//
// Collaborators are injected at construction; nothing is global.
//
// Error classes:
//   - precondition failures come back as blocked results, never errors
//   - trade-history failures from the primary source propagate; the fallback
//     source is best-effort and degrades to an empty list
//   - a failed registry swap yields a not-executed result carrying the error,
//     and no event is written
//
// Batch operations walk 1D, 7D, 30D in order; a failure on one horizon is
// recorded on that horizon's result and the others still run.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::event_log::{EventLog, LifecycleEvent, LifecycleEventKind};
use crate::guardrails::GuardrailsStore;
use crate::promotion::{PromotionCheckResult, PromotionEngine, PromotionInputs};
use crate::registry::RegistryStore;
use crate::rollback::{RollbackCheckResult, RollbackEngine, RollbackInputs};
use crate::runtime_config::LifecycleConfig;
use crate::trade_source::{load_best_effort, EmptyTradeSource, TradeQuery, TradeSource};
use crate::types::{Horizon, ModelRegistryEntry, TradeOutcome};

/// Result of `execute_promotion`.
#[derive(Debug, Clone, Serialize)]
pub struct PromotionExecution {
    pub check: PromotionCheckResult,
    pub promoted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<ModelRegistryEntry>,
}

/// Result of `execute_rollback`.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackExecution {
    pub check: RollbackCheckResult,
    pub rolled_back: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<ModelRegistryEntry>,
}

/// Both verdicts for one horizon.
#[derive(Debug, Clone, Serialize)]
pub struct HorizonEvaluation {
    pub horizon: Horizon,
    pub promotion: PromotionCheckResult,
    pub rollback: RollbackCheckResult,
}

pub struct LifecycleService {
    registry: Arc<dyn RegistryStore>,
    events: Arc<dyn EventLog>,
    guardrails: Arc<dyn GuardrailsStore>,
    /// Authoritative trade history; errors propagate.
    trade_source: Option<Arc<dyn TradeSource>>,
    /// Used when no primary source is configured; best-effort.
    fallback: Arc<dyn TradeSource>,
    promotion: PromotionEngine,
    rollback: RollbackEngine,
}

impl LifecycleService {
    pub fn new(
        registry: Arc<dyn RegistryStore>,
        events: Arc<dyn EventLog>,
        guardrails: Arc<dyn GuardrailsStore>,
        config: &LifecycleConfig,
    ) -> Self {
        Self {
            registry,
            events,
            guardrails,
            trade_source: None,
            fallback: Arc::new(EmptyTradeSource),
            promotion: PromotionEngine::new(
                config.promotion.clone(),
                config.sustained_lift.clone(),
            ),
            rollback: RollbackEngine::new(config.rollback.clone()),
        }
    }

    pub fn with_trade_source(mut self, source: Arc<dyn TradeSource>) -> Self {
        self.trade_source = Some(source);
        self
    }

    pub fn with_fallback(mut self, source: Arc<dyn TradeSource>) -> Self {
        self.fallback = source;
        self
    }

    pub fn registry(&self) -> &Arc<dyn RegistryStore> {
        &self.registry
    }

    pub fn events(&self) -> &Arc<dyn EventLog> {
        &self.events
    }

    fn load_trades(
        &self,
        symbol: &str,
        horizon: Horizon,
        model_id: &str,
        lookback_days: u32,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<TradeOutcome>> {
        let query = TradeQuery {
            symbol: symbol.to_string(),
            horizon,
            as_of,
            lookback_days,
            model_id: model_id.to_string(),
        };
        match &self.trade_source {
            Some(source) => source.load(&query).with_context(|| {
                format!("failed to load {} trades for model {}", horizon, model_id)
            }),
            None => Ok(load_best_effort(self.fallback.as_ref(), &query)),
        }
    }

    // -------------------------------------------------------------------------
    // Promotion
    // -------------------------------------------------------------------------

    pub fn evaluate_promotion(&self, horizon: Horizon, symbol: &str) -> Result<PromotionCheckResult> {
        self.evaluate_promotion_at(horizon, symbol, Utc::now())
    }

    pub fn evaluate_promotion_at(
        &self,
        horizon: Horizon,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> Result<PromotionCheckResult> {
        let entry = self
            .registry
            .get(horizon)
            .with_context(|| format!("failed to read registry for {}", horizon))?;
        let last_promotion = self
            .events
            .last_promotion(horizon)
            .with_context(|| format!("failed to read last promotion for {}", horizon))?
            .map(|e| e.timestamp);

        let inputs = PromotionInputs {
            horizon,
            entry: entry.as_ref(),
            promotion_locked: self.guardrails.is_promotion_locked(),
            last_promotion,
            now,
        };
        self.promotion.evaluate(inputs, |model_id, lookback| {
            self.load_trades(symbol, horizon, model_id, lookback, now)
        })
    }

    pub fn execute_promotion(&self, horizon: Horizon, symbol: &str) -> Result<PromotionExecution> {
        self.execute_promotion_at(horizon, symbol, Utc::now())
    }

    pub fn execute_promotion_at(
        &self,
        horizon: Horizon,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> Result<PromotionExecution> {
        let mut check = self.evaluate_promotion_at(horizon, symbol, now)?;
        let mut execution = PromotionExecution {
            check: check.clone(),
            promoted: false,
            event_id: None,
            registry: None,
        };
        if !check.should_promote {
            return Ok(execution);
        }

        let expected = check.observed_entry.clone().unwrap_or_default();
        let next = match self.registry.promote_shadow_to_active(horizon, &expected) {
            Ok(next) => next,
            Err(e) => {
                warn!(horizon = %horizon, error = %e, "promotion approved but registry swap failed");
                check.reason = format!("Promotion not applied: registry update failed: {:#}", e);
                check.error = Some(format!("{:#}", e));
                execution.check = check;
                return Ok(execution);
            }
        };

        let metrics = serde_json::json!({
            "symbol": symbol,
            "sample_count": check.shadow_window.as_ref().map(|w| w.sample_count),
            "shadow_window": check.shadow_window,
            "mean_win_rate_lift": check.sustained_lift.as_ref().map(|l| l.mean_win_rate_lift),
            "mean_sharpe_lift": check.sustained_lift.as_ref().map(|l| l.mean_sharpe_lift),
            "days_since_last_promotion": check.days_since_last_promotion,
        });
        let event = LifecycleEvent::new(
            LifecycleEventKind::Promoted,
            horizon,
            expected.active_model_id.clone(),
            next.active_model_id.clone(),
            check.reason.clone(),
            metrics,
            now,
        );

        match self.events.append(event) {
            Ok(logged) => execution.event_id = Some(logged.id),
            Err(e) => {
                error!(horizon = %horizon, error = %e, "promotion applied but event append failed");
                check.reason = format!("{} (audit log append failed: {:#})", check.reason, e);
            }
        }

        info!(
            horizon = %horizon,
            from = ?expected.active_model_id,
            to = ?next.active_model_id,
            "model PROMOTED"
        );

        execution.check = check;
        execution.promoted = true;
        execution.registry = Some(next);
        Ok(execution)
    }

    // -------------------------------------------------------------------------
    // Rollback
    // -------------------------------------------------------------------------

    pub fn evaluate_rollback(&self, horizon: Horizon, symbol: &str) -> Result<RollbackCheckResult> {
        self.evaluate_rollback_at(horizon, symbol, Utc::now())
    }

    /// The promotion lock is not consulted: rollback stays available.
    pub fn evaluate_rollback_at(
        &self,
        horizon: Horizon,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> Result<RollbackCheckResult> {
        let entry = self
            .registry
            .get(horizon)
            .with_context(|| format!("failed to read registry for {}", horizon))?;
        let last_rollback = self
            .events
            .last_rollback(horizon)
            .with_context(|| format!("failed to read last rollback for {}", horizon))?
            .map(|e| e.timestamp);

        let inputs = RollbackInputs {
            horizon,
            entry: entry.as_ref(),
            last_rollback,
            now,
        };
        self.rollback.evaluate(inputs, |model_id, lookback| {
            self.load_trades(symbol, horizon, model_id, lookback, now)
        })
    }

    pub fn execute_rollback(&self, horizon: Horizon, symbol: &str) -> Result<RollbackExecution> {
        self.execute_rollback_at(horizon, symbol, Utc::now())
    }

    pub fn execute_rollback_at(
        &self,
        horizon: Horizon,
        symbol: &str,
        now: DateTime<Utc>,
    ) -> Result<RollbackExecution> {
        let mut check = self.evaluate_rollback_at(horizon, symbol, now)?;
        let mut execution = RollbackExecution {
            check: check.clone(),
            rolled_back: false,
            event_id: None,
            registry: None,
        };
        if !check.should_rollback {
            return Ok(execution);
        }

        let expected = check.observed_entry.clone().unwrap_or_default();
        let next = match self.registry.rollback_to_previous(horizon, &expected) {
            Ok(next) => next,
            Err(e) => {
                warn!(horizon = %horizon, error = %e, "rollback approved but registry swap failed");
                check.reason = format!("Rollback not applied: registry update failed: {:#}", e);
                check.error = Some(format!("{:#}", e));
                execution.check = check;
                return Ok(execution);
            }
        };

        let metrics = serde_json::json!({
            "symbol": symbol,
            "severity": check.severity,
            "trigger": check.trigger,
            "flags": check.flags,
            "active_window": check.active_window,
            "days_since_last_rollback": check.days_since_last_rollback,
        });
        let event = LifecycleEvent::new(
            LifecycleEventKind::RolledBack,
            horizon,
            expected.active_model_id.clone(),
            next.active_model_id.clone(),
            check.reason.clone(),
            metrics,
            now,
        );

        match self.events.append(event) {
            Ok(logged) => execution.event_id = Some(logged.id),
            Err(e) => {
                error!(horizon = %horizon, error = %e, "rollback applied but event append failed");
                check.reason = format!("{} (audit log append failed: {:#})", check.reason, e);
            }
        }

        warn!(
            horizon = %horizon,
            from = ?expected.active_model_id,
            to = ?next.active_model_id,
            severity = %check.severity,
            "model ROLLED BACK"
        );

        execution.check = check;
        execution.rolled_back = true;
        execution.registry = Some(next);
        Ok(execution)
    }

    // -------------------------------------------------------------------------
    // Shadow assignment
    // -------------------------------------------------------------------------

    /// Install a fresh shadow candidate supplied by the training pipeline.
    pub fn assign_shadow(&self, horizon: Horizon, model_id: &str) -> Result<ModelRegistryEntry> {
        let before = self.registry.get(horizon)?;
        let next = self.registry.assign_shadow(horizon, model_id)?;

        let event = LifecycleEvent::new(
            LifecycleEventKind::ShadowAssigned,
            horizon,
            before.and_then(|e| e.shadow_model_id),
            next.shadow_model_id.clone(),
            "Shadow candidate assigned",
            serde_json::json!({ "active_model_id": next.active_model_id }),
            Utc::now(),
        );
        if let Err(e) = self.events.append(event) {
            error!(horizon = %horizon, error = %e, "shadow assigned but event append failed");
        }
        Ok(next)
    }

    // -------------------------------------------------------------------------
    // Batch operations
    // -------------------------------------------------------------------------

    pub fn evaluate_all_horizons(&self, symbol: &str) -> Vec<HorizonEvaluation> {
        self.evaluate_all_horizons_at(symbol, Utc::now())
    }

    pub fn evaluate_all_horizons_at(&self, symbol: &str, now: DateTime<Utc>) -> Vec<HorizonEvaluation> {
        Horizon::ALL
            .iter()
            .map(|&horizon| {
                let promotion = self
                    .evaluate_promotion_at(horizon, symbol, now)
                    .unwrap_or_else(|e| {
                        error!(horizon = %horizon, error = %e, "promotion evaluation failed");
                        PromotionCheckResult::failed(
                            horizon,
                            now,
                            format!("Promotion evaluation failed: {:#}", e),
                        )
                    });
                let rollback = self
                    .evaluate_rollback_at(horizon, symbol, now)
                    .unwrap_or_else(|e| {
                        error!(horizon = %horizon, error = %e, "rollback evaluation failed");
                        RollbackCheckResult::failed(
                            horizon,
                            now,
                            format!("Rollback evaluation failed: {:#}", e),
                        )
                    });
                HorizonEvaluation {
                    horizon,
                    promotion,
                    rollback,
                }
            })
            .collect()
    }

    pub fn execute_all_promotions(&self, symbol: &str) -> Vec<PromotionExecution> {
        self.execute_all_promotions_at(symbol, Utc::now())
    }

    pub fn execute_all_promotions_at(&self, symbol: &str, now: DateTime<Utc>) -> Vec<PromotionExecution> {
        Horizon::ALL
            .iter()
            .map(|&horizon| {
                self.execute_promotion_at(horizon, symbol, now)
                    .unwrap_or_else(|e| {
                        error!(horizon = %horizon, error = %e, "promotion execution failed");
                        PromotionExecution {
                            check: PromotionCheckResult::failed(
                                horizon,
                                now,
                                format!("Promotion evaluation failed: {:#}", e),
                            ),
                            promoted: false,
                            event_id: None,
                            registry: None,
                        }
                    })
            })
            .collect()
    }

    pub fn execute_all_rollbacks(&self, symbol: &str) -> Vec<RollbackExecution> {
        self.execute_all_rollbacks_at(symbol, Utc::now())
    }

    pub fn execute_all_rollbacks_at(&self, symbol: &str, now: DateTime<Utc>) -> Vec<RollbackExecution> {
        Horizon::ALL
            .iter()
            .map(|&horizon| {
                self.execute_rollback_at(horizon, symbol, now)
                    .unwrap_or_else(|e| {
                        error!(horizon = %horizon, error = %e, "rollback execution failed");
                        RollbackExecution {
                            check: RollbackCheckResult::failed(
                                horizon,
                                now,
                                format!("Rollback evaluation failed: {:#}", e),
                            ),
                            rolled_back: false,
                            event_id: None,
                            registry: None,
                        }
                    })
            })
            .collect()
    }
}

impl std::fmt::Debug for LifecycleService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleService")
            .field("promotion", self.promotion.config())
            .field("rollback", self.rollback.config())
            .field("primary_trade_source", &self.trade_source.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::EventJournal;
    use crate::guardrails::Guardrails;
    use crate::performance::tests::{fixed_now, series};
    use crate::promotion::PromotionGate;
    use crate::registry::ModelRegistry;
    use crate::rollback::tests::collapsing_history;
    use crate::rollback::RollbackSeverity;
    use crate::trade_source::JournalTradeSource;
    use anyhow::bail;
    use chrono::Duration;

    struct Fixture {
        registry: Arc<ModelRegistry>,
        events: Arc<EventJournal>,
        guardrails: Arc<Guardrails>,
        journal: Arc<JournalTradeSource>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                registry: Arc::new(ModelRegistry::in_memory()),
                events: Arc::new(EventJournal::in_memory()),
                guardrails: Arc::new(Guardrails::default()),
                journal: Arc::new(JournalTradeSource::new()),
            }
        }

        fn service(&self) -> LifecycleService {
            LifecycleService::new(
                self.registry.clone(),
                self.events.clone(),
                self.guardrails.clone(),
                &LifecycleConfig::default(),
            )
            .with_trade_source(self.journal.clone())
        }

        /// 1D horizon ready for promotion: shadow 7/10 wins vs active 5/10.
        fn promotable(&self) -> ModelRegistryEntry {
            let entry = ModelRegistryEntry::new("active-v1")
                .with_shadow("shadow-v2")
                .with_previous("active-v0");
            self.registry.seed(Horizon::OneDay, entry.clone()).unwrap();
            self.journal.extend(series("shadow-v2", 3, 50, 7, fixed_now()));
            self.journal.extend(series("active-v1", 3, 50, 5, fixed_now()));
            entry
        }
    }

    struct FailingRegistry(ModelRegistry);

    impl RegistryStore for FailingRegistry {
        fn get(&self, horizon: Horizon) -> Result<Option<ModelRegistryEntry>> {
            self.0.get(horizon)
        }

        fn promote_shadow_to_active(&self, _: Horizon, _: &ModelRegistryEntry) -> Result<ModelRegistryEntry> {
            bail!("disk full")
        }

        fn rollback_to_previous(&self, _: Horizon, _: &ModelRegistryEntry) -> Result<ModelRegistryEntry> {
            bail!("disk full")
        }

        fn assign_shadow(&self, _: Horizon, _: &str) -> Result<ModelRegistryEntry> {
            bail!("disk full")
        }
    }

    struct FailingEventLog;

    impl EventLog for FailingEventLog {
        fn append(&self, _: LifecycleEvent) -> Result<LifecycleEvent> {
            bail!("journal unavailable")
        }

        fn last_event(&self, _: Horizon, _: LifecycleEventKind) -> Result<Option<LifecycleEvent>> {
            Ok(None)
        }

        fn recent(&self, _: usize) -> Result<Vec<LifecycleEvent>> {
            Ok(Vec::new())
        }

        fn for_horizon(&self, _: Horizon) -> Result<Vec<LifecycleEvent>> {
            Ok(Vec::new())
        }
    }

    struct FailingSource;

    impl TradeSource for FailingSource {
        fn load(&self, _: &TradeQuery) -> Result<Vec<TradeOutcome>> {
            bail!("history service down")
        }
    }

    #[test]
    fn promotion_swaps_registry_and_logs_event() {
        let fx = Fixture::new();
        fx.promotable();
        let exec = fx.service().execute_promotion_at(Horizon::OneDay, "BTC", fixed_now()).unwrap();
        assert!(exec.promoted, "{}", exec.check.reason);
        assert!(exec.event_id.is_some());

        let entry = fx.registry.get(Horizon::OneDay).unwrap().unwrap();
        assert_eq!(entry.active_model_id.as_deref(), Some("shadow-v2"));
        assert_eq!(entry.shadow_model_id.as_deref(), Some("shadow-v2"));
        assert_eq!(entry.prev_model_id.as_deref(), Some("active-v1"));

        let event = fx.events.last_promotion(Horizon::OneDay).unwrap().unwrap();
        assert_eq!(event.from_model_id.as_deref(), Some("active-v1"));
        assert_eq!(event.to_model_id.as_deref(), Some("shadow-v2"));
        assert_eq!(event.metrics["sample_count"], 150);
        assert_eq!(event.timestamp, fixed_now());
    }

    #[test]
    fn second_promotion_waits_for_fresh_shadow_then_cooldown() {
        let fx = Fixture::new();
        fx.promotable();
        let svc = fx.service();
        svc.execute_promotion_at(Horizon::OneDay, "BTC", fixed_now()).unwrap();

        let again = svc.evaluate_promotion_at(Horizon::OneDay, "BTC", fixed_now()).unwrap();
        assert_eq!(again.blocking_gate, Some(PromotionGate::Registry));

        let later = fixed_now() + Duration::days(10);
        fx.journal.extend(series("shadow-v3", 3, 50, 9, later));
        svc.assign_shadow(Horizon::OneDay, "shadow-v3").unwrap();
        let r = svc.evaluate_promotion_at(Horizon::OneDay, "BTC", later).unwrap();
        assert_eq!(r.blocking_gate, Some(PromotionGate::Cooldown), "{}", r.reason);
        assert!((r.days_since_last_promotion.unwrap() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn lock_blocks_promotion_but_not_rollback() {
        let fx = Fixture::new();
        fx.guardrails.set_promotion_lock(true);
        fx.promotable();
        fx.registry
            .seed(Horizon::OneDay, ModelRegistryEntry::new("v2").with_shadow("v3").with_previous("v1"))
            .unwrap();
        fx.journal.extend(collapsing_history("v2"));
        let svc = fx.service();

        let promo = svc.execute_promotion_at(Horizon::OneDay, "BTC", fixed_now()).unwrap();
        assert!(!promo.promoted);
        assert_eq!(promo.check.blocking_gate, Some(PromotionGate::PromotionLock));

        let rb = svc.execute_rollback_at(Horizon::OneDay, "BTC", fixed_now()).unwrap();
        assert!(rb.rolled_back, "{}", rb.check.reason);
        assert_eq!(rb.check.severity, RollbackSeverity::Critical);
        let entry = fx.registry.get(Horizon::OneDay).unwrap().unwrap();
        assert_eq!(entry.active_model_id.as_deref(), Some("v1"));
        assert_eq!(entry.prev_model_id.as_deref(), Some("v1"));
        assert!(fx.events.last_rollback(Horizon::OneDay).unwrap().is_some());

        // Previous is left in place, so a repeat is a no-op and is gated.
        let repeat = svc.evaluate_rollback_at(Horizon::OneDay, "BTC", fixed_now()).unwrap();
        assert!(!repeat.should_rollback);
    }

    #[test]
    fn failed_registry_swap_reports_and_logs_nothing() {
        let fx = Fixture::new();
        fx.promotable();
        let failing = FailingRegistry(ModelRegistry::in_memory());
        failing
            .0
            .seed(Horizon::OneDay, fx.registry.get(Horizon::OneDay).unwrap().unwrap())
            .unwrap();
        let svc = LifecycleService::new(
            Arc::new(failing),
            fx.events.clone(),
            fx.guardrails.clone(),
            &LifecycleConfig::default(),
        )
        .with_trade_source(fx.journal.clone());

        let exec = svc.execute_promotion_at(Horizon::OneDay, "BTC", fixed_now()).unwrap();
        assert!(!exec.promoted);
        assert!(exec.check.reason.contains("disk full"), "{}", exec.check.reason);
        assert!(exec.event_id.is_none());
        assert_eq!(fx.events.len(), 0);
    }

    #[test]
    fn event_append_failure_after_swap_is_reported() {
        let fx = Fixture::new();
        fx.promotable();
        let svc = LifecycleService::new(
            fx.registry.clone(),
            Arc::new(FailingEventLog),
            fx.guardrails.clone(),
            &LifecycleConfig::default(),
        )
        .with_trade_source(fx.journal.clone());

        let exec = svc.execute_promotion_at(Horizon::OneDay, "BTC", fixed_now()).unwrap();
        assert!(exec.promoted);
        assert!(exec.check.reason.contains("audit log append failed"));
        assert_eq!(
            fx.registry.get(Horizon::OneDay).unwrap().unwrap().active_model_id.as_deref(),
            Some("shadow-v2")
        );
    }

    #[test]
    fn primary_source_failure_propagates_but_batch_continues() {
        let fx = Fixture::new();
        fx.promotable();
        fx.registry
            .seed(Horizon::SevenDay, ModelRegistryEntry::new("w1"))
            .unwrap();
        let svc = LifecycleService::new(
            fx.registry.clone(),
            fx.events.clone(),
            fx.guardrails.clone(),
            &LifecycleConfig::default(),
        )
        .with_trade_source(Arc::new(FailingSource));

        assert!(svc.evaluate_promotion_at(Horizon::OneDay, "BTC", fixed_now()).is_err());

        let all = svc.evaluate_all_horizons_at("BTC", fixed_now());
        assert_eq!(all.len(), 3);
        assert!(all[0].promotion.error.is_some());
        assert!(all[0].rollback.error.is_some());
        // 7D and 30D stop at the registry gate before any trade load.
        assert_eq!(all[1].promotion.blocking_gate, Some(PromotionGate::Registry));
        assert!(all[2].promotion.error.is_none());

        let execs = svc.execute_all_promotions_at("BTC", fixed_now());
        assert_eq!(execs.len(), 3);
        assert!(execs.iter().all(|e| !e.promoted));
    }

    #[test]
    fn fallback_source_degrades_to_empty() {
        let fx = Fixture::new();
        fx.promotable();
        let svc = LifecycleService::new(
            fx.registry.clone(),
            fx.events.clone(),
            fx.guardrails.clone(),
            &LifecycleConfig::default(),
        )
        .with_fallback(Arc::new(FailingSource));

        let r = svc.evaluate_promotion_at(Horizon::OneDay, "BTC", fixed_now()).unwrap();
        assert_eq!(r.blocking_gate, Some(PromotionGate::SampleSize));
        assert_eq!(r.shadow_window.unwrap().sample_count, 0);
    }

    #[test]
    fn execute_all_runs_every_horizon() {
        let fx = Fixture::new();
        fx.promotable();
        let svc = fx.service();
        let promos = svc.execute_all_promotions_at("BTC", fixed_now());
        let promoted: Vec<Horizon> = promos.iter().filter(|e| e.promoted).map(|e| e.check.horizon).collect();
        assert_eq!(promoted, vec![Horizon::OneDay]);

        let rollbacks = svc.execute_all_rollbacks_at("BTC", fixed_now());
        assert_eq!(rollbacks.len(), 3);
        assert!(rollbacks.iter().all(|e| !e.rolled_back));
    }

    #[test]
    fn assign_shadow_logs_event() {
        let fx = Fixture::new();
        fx.registry
            .seed(Horizon::ThirtyDay, ModelRegistryEntry::new("a").with_shadow("b"))
            .unwrap();
        let svc = fx.service();
        let entry = svc.assign_shadow(Horizon::ThirtyDay, "c").unwrap();
        assert_eq!(entry.shadow_model_id.as_deref(), Some("c"));

        let event = fx
            .events
            .last_event(Horizon::ThirtyDay, LifecycleEventKind::ShadowAssigned)
            .unwrap()
            .unwrap();
        assert_eq!(event.from_model_id.as_deref(), Some("b"));
        assert_eq!(event.to_model_id.as_deref(), Some("c"));
    }

    #[test]
    fn evaluation_is_idempotent_for_fixed_now() {
        let fx = Fixture::new();
        fx.promotable();
        let svc = fx.service();
        let a = svc.evaluate_all_horizons_at("BTC", fixed_now());
        let b = svc.evaluate_all_horizons_at("BTC", fixed_now());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.promotion.should_promote, y.promotion.should_promote);
            assert_eq!(x.promotion.reason, y.promotion.reason);
            assert_eq!(x.rollback.reason, y.rollback.reason);
        }
        assert_eq!(fx.events.len(), 0);
    }
}
