// =============================================================================
// Aurora Lifecycle Governor — Main Entry Point
// =============================================================================
//
// Starts the control API and the lifecycle scheduler. With `auto_execute`
// off (the default) the scheduler only evaluates; promotions and rollbacks
// must be executed explicitly through the API.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod decision_envelope;
mod event_log;
mod guardrails;
mod lifecycle;
mod performance;
mod promotion;
mod registry;
mod rollback;
mod runtime_config;
mod scheduler;
mod sustained_lift;
mod trade_source;
mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::event_log::EventJournal;
use crate::guardrails::Guardrails;
use crate::lifecycle::LifecycleService;
use crate::registry::ModelRegistry;
use crate::runtime_config::LifecycleConfig;
use crate::trade_source::{HttpTradeSource, JournalTradeSource};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Aurora Lifecycle Governor — Starting Up           ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("GOVERNOR_CONFIG").unwrap_or_else(|_| "lifecycle_config.json".into());

    let mut config = LifecycleConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        LifecycleConfig::default()
    });

    if let Ok(symbol) = std::env::var("GOVERNOR_SYMBOL") {
        let symbol = symbol.trim().to_uppercase();
        if !symbol.is_empty() {
            config.symbol = symbol;
        }
    }
    if let Ok(addr) = std::env::var("GOVERNOR_BIND_ADDR") {
        config.bind_addr = addr;
    }

    info!(
        symbol = %config.symbol,
        auto_execute = config.auto_execute,
        interval_secs = config.schedule_interval_secs,
        "Lifecycle configuration"
    );

    // ── 2. Persistent stores ─────────────────────────────────────────────
    for path in [&config.registry_path, &config.event_log_path] {
        if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create data dir {}", parent.display()))?;
        }
    }

    let registry = Arc::new(ModelRegistry::open(&config.registry_path)?);
    for (horizon, entry) in registry.snapshot() {
        match entry {
            Some(e) => info!(
                horizon = %horizon,
                active = ?e.active_model_id,
                shadow = ?e.shadow_model_id,
                previous = ?e.prev_model_id,
                "Registry entry"
            ),
            None => warn!(horizon = %horizon, "No model registered"),
        }
    }

    let events = Arc::new(EventJournal::open(&config.event_log_path)?);
    info!(events = events.len(), "Event journal loaded");

    let guardrails = Arc::new(Guardrails::new(config.guardrails.clone()));

    // ── 3. Trade sources ─────────────────────────────────────────────────
    let mut service = LifecycleService::new(registry, events, guardrails.clone(), &config);

    if Path::new(&config.trade_journal_path).exists() {
        match JournalTradeSource::from_jsonl(&config.trade_journal_path) {
            Ok(journal) => {
                info!(trades = journal.len(), path = %config.trade_journal_path, "Local trade journal loaded");
                service = service.with_fallback(Arc::new(journal));
            }
            Err(e) => warn!(error = %e, "Failed to load local trade journal"),
        }
    }

    if let Some(url) = config.trade_source_url.clone() {
        let token = std::env::var("TRADE_SOURCE_TOKEN").ok();
        let source = HttpTradeSource::new(url, token, tokio::runtime::Handle::current())?;
        service = service.with_trade_source(Arc::new(source));
    } else {
        warn!("No trade_source_url configured; evaluations use the local journal only");
    }

    let state = Arc::new(AppState::new(
        config.clone(),
        config_path.clone(),
        Arc::new(service),
        guardrails,
    ));

    // ── 4. Start the API server ──────────────────────────────────────────
    let app = api::rest::router(state.clone(), api::auth::AdminAuth::from_env());
    let bind_addr = config.bind_addr.clone();

    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(addr = %bind_addr, error = %e, "Failed to bind API server");
                return;
            }
        };
        info!(addr = %bind_addr, "API server listening");
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    // ── 5. Scheduler ─────────────────────────────────────────────────────
    tokio::spawn(scheduler::run_scheduler(state.clone()));

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    if let Err(e) = state.config.read().save(&config_path) {
        error!(error = %e, "Failed to save lifecycle config on shutdown");
    }

    info!("Aurora Lifecycle Governor shut down complete.");
    Ok(())
}
