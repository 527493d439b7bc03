// =============================================================================
// Decision Envelope — Auditable record of every lifecycle verdict
// =============================================================================
//
// Every promotion or rollback evaluation, approved or blocked, is wrapped in
// an envelope so that the decision can be audited after the fact from the
// control API.  The full check result rides along as `metrics`.
//
// Verdicts: "APPROVE", "BLOCK", "WARN", "NONE", "ERROR".
// =============================================================================

use serde::Serialize;

use crate::promotion::PromotionCheckResult;
use crate::rollback::{RollbackCheckResult, RollbackSeverity};

/// Auditable record of one lifecycle decision.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionEnvelope {
    /// Unique identifier for this decision (UUID v4).
    pub id: String,

    pub symbol: String,

    /// "1D", "7D" or "30D".
    pub horizon: String,

    /// "PROMOTION" or "ROLLBACK".
    pub action: String,

    pub verdict: String,

    /// Whether the registry was actually changed.
    pub executed: bool,

    /// Gate that stopped the decision (if any).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_gate: Option<String>,

    /// Human-readable reason for the decision.
    pub reason: String,

    /// ISO 8601 timestamp of when this decision was created.
    pub created_at: String,

    /// Serialised check result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<serde_json::Value>,
}

impl DecisionEnvelope {
    pub fn from_promotion(symbol: impl Into<String>, check: &PromotionCheckResult, executed: bool) -> Self {
        let verdict = if check.error.is_some() {
            "ERROR"
        } else if check.should_promote {
            "APPROVE"
        } else {
            "BLOCK"
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            horizon: check.horizon.to_string(),
            action: "PROMOTION".to_string(),
            verdict: verdict.to_string(),
            executed,
            blocking_gate: check.blocking_gate.map(|g| g.to_string()),
            reason: check.reason.clone(),
            created_at: check.evaluated_at.to_rfc3339(),
            metrics: serde_json::to_value(check).ok(),
        }
    }

    pub fn from_rollback(symbol: impl Into<String>, check: &RollbackCheckResult, executed: bool) -> Self {
        let verdict = if check.error.is_some() {
            "ERROR"
        } else if check.should_rollback {
            "APPROVE"
        } else if check.blocking_gate.is_some() {
            "BLOCK"
        } else if check.severity == RollbackSeverity::Warning {
            "WARN"
        } else {
            "NONE"
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.into(),
            horizon: check.horizon.to_string(),
            action: "ROLLBACK".to_string(),
            verdict: verdict.to_string(),
            executed,
            blocking_gate: check.blocking_gate.map(|g| g.to_string()),
            reason: check.reason.clone(),
            created_at: check.evaluated_at.to_rfc3339(),
            metrics: serde_json::to_value(check).ok(),
        }
    }
}
