// =============================================================================
// Trade Sources — where resolved trade outcomes come from
// =============================================================================
//
// Contract for every source: outcomes for one (symbol, horizon, model) that
// resolved strictly before `as_of` and within the lookback, deduplicated by
// (model_id, time), oldest first.  `normalize_trades` enforces this so that a
// sloppy upstream cannot leak future or duplicate trades into a window.
//
// Sources:
//   - JournalTradeSource — in-memory journal, loadable from JSON lines.
//   - HttpTradeSource    — external trade-history service over HTTP.
//   - EmptyTradeSource   — no-op default for the fallback slot.
//
// `load_best_effort` is the reduced-confidence path: a failing source is
// logged and treated as empty instead of aborting the evaluation.
// =============================================================================

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::performance::window_start;
use crate::types::{Horizon, TradeOutcome};

/// Parameters of one trade-history lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeQuery {
    pub symbol: String,
    pub horizon: Horizon,
    pub as_of: DateTime<Utc>,
    pub lookback_days: u32,
    pub model_id: String,
}

pub trait TradeSource: Send + Sync {
    fn load(&self, query: &TradeQuery) -> Result<Vec<TradeOutcome>>;
}

/// Restrict `trades` to `query`, drop duplicates, order chronologically.
pub fn normalize_trades(trades: Vec<TradeOutcome>, query: &TradeQuery) -> Vec<TradeOutcome> {
    let start = window_start(query.as_of, query.lookback_days);
    let mut seen: HashSet<(String, DateTime<Utc>)> = HashSet::new();

    let mut out: Vec<TradeOutcome> = trades
        .into_iter()
        .filter(|t| {
            t.model_id == query.model_id
                && t.symbol == query.symbol
                && t.horizon == query.horizon
                && t.time >= start
                && t.time < query.as_of
        })
        .filter(|t| seen.insert((t.model_id.clone(), t.time)))
        .collect();

    out.sort_by_key(|t| t.time);
    out
}

/// Load from `source`, degrading to an empty list on failure.
pub fn load_best_effort(source: &dyn TradeSource, query: &TradeQuery) -> Vec<TradeOutcome> {
    match source.load(query) {
        Ok(trades) => trades,
        Err(e) => {
            warn!(
                horizon = %query.horizon,
                model_id = %query.model_id,
                error = %e,
                "fallback trade load failed — continuing with no trades"
            );
            Vec::new()
        }
    }
}

// =============================================================================
// EmptyTradeSource
// =============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyTradeSource;

impl TradeSource for EmptyTradeSource {
    fn load(&self, _query: &TradeQuery) -> Result<Vec<TradeOutcome>> {
        Ok(Vec::new())
    }
}

// =============================================================================
// JournalTradeSource
// =============================================================================

/// Thread-safe in-memory journal of resolved trades.
#[derive(Default)]
pub struct JournalTradeSource {
    trades: RwLock<Vec<TradeOutcome>>,
}

impl JournalTradeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON-lines file with one `TradeOutcome` per line.
    pub fn from_jsonl(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read trade journal from {}", path.display()))?;

        let mut trades = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let t: TradeOutcome = serde_json::from_str(line).with_context(|| {
                format!("failed to parse trade journal line {} of {}", lineno + 1, path.display())
            })?;
            trades.push(t);
        }

        info!(path = %path.display(), trades = trades.len(), "trade journal loaded");
        Ok(Self {
            trades: RwLock::new(trades),
        })
    }

    pub fn extend(&self, outcomes: impl IntoIterator<Item = TradeOutcome>) {
        self.trades.write().extend(outcomes);
    }

    pub fn len(&self) -> usize {
        self.trades.read().len()
    }
}

impl TradeSource for JournalTradeSource {
    fn load(&self, query: &TradeQuery) -> Result<Vec<TradeOutcome>> {
        let trades = self.trades.read().clone();
        Ok(normalize_trades(trades, query))
    }
}

impl std::fmt::Debug for JournalTradeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalTradeSource")
            .field("trades", &self.trades.read().len())
            .finish()
    }
}

// =============================================================================
// HttpTradeSource
// =============================================================================

/// Client for an external trade-history service exposing
/// `GET {base}/trades?symbol&horizon&as_of&lookback_days&model_id`.
///
/// `load` blocks on the runtime handle it was built with, so it must be
/// called from a blocking thread (`tokio::task::spawn_blocking`), never from
/// inside an async task.
pub struct HttpTradeSource {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
    runtime: tokio::runtime::Handle,
}

impl HttpTradeSource {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        runtime: tokio::runtime::Handle,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build trade source HTTP client")?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(base_url = %base_url, "HttpTradeSource initialised");

        Ok(Self {
            base_url,
            token: token.filter(|t| !t.is_empty()),
            client,
            runtime,
        })
    }

    #[instrument(skip(self), name = "trade_source::fetch")]
    async fn fetch(&self, query: &TradeQuery) -> Result<Vec<TradeOutcome>> {
        let url = format!("{}/trades", self.base_url);
        let params = [
            ("symbol", query.symbol.clone()),
            ("horizon", query.horizon.to_string()),
            ("as_of", query.as_of.to_rfc3339()),
            ("lookback_days", query.lookback_days.to_string()),
            ("model_id", query.model_id.clone()),
        ];

        let mut req = self.client.get(&url).query(&params);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .with_context(|| format!("GET {} request failed", url))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("trade source returned HTTP {}: {}", status, body);
        }

        let trades: Vec<TradeOutcome> = resp
            .json()
            .await
            .context("failed to decode trade outcomes")?;

        Ok(normalize_trades(trades, query))
    }
}

impl TradeSource for HttpTradeSource {
    fn load(&self, query: &TradeQuery) -> Result<Vec<TradeOutcome>> {
        self.runtime.block_on(self.fetch(query))
    }
}

impl std::fmt::Debug for HttpTradeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTradeSource")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}
