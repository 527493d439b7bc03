// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Health is public; everything else
// requires a valid Bearer token, enforced by the `require_admin` route layer.
//
// Engine calls may block on trade-history I/O and therefore run on the
// blocking pool via `spawn_blocking`.  Every evaluation or execution served
// here is also recorded in the decision ring buffer.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::{require_admin, AdminAuth};
use crate::api::{api_error, ApiError};
use crate::app_state::AppState;
use crate::decision_envelope::DecisionEnvelope;
use crate::types::{Horizon, ModelRegistryEntry};

fn parse_horizon(raw: &str) -> Result<Horizon, ApiError> {
    raw.parse::<Horizon>()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))
}

/// Run a blocking engine call off the async executor.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))),
        Err(e) => Err(api_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("engine task failed: {e}"),
        )),
    }
}

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
/// `auth` is resolved once here; every route but health requires it.
pub fn router(state: Arc<AppState>, auth: AdminAuth) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let admin = Router::new()
        // ── Read ────────────────────────────────────────────────────
        .route("/api/v1/status", get(status))
        .route("/api/v1/registry", get(registry))
        .route("/api/v1/events", get(events))
        .route("/api/v1/decisions", get(decisions))
        .route("/api/v1/guardrails", get(guardrails))
        .route("/api/v1/evaluate", get(evaluate_all))
        .route("/api/v1/evaluate/:horizon", get(evaluate_horizon))
        // ── Actions ─────────────────────────────────────────────────
        .route("/api/v1/execute/:horizon/promotion", post(execute_promotion))
        .route("/api/v1/execute/:horizon/rollback", post(execute_rollback))
        .route("/api/v1/control/promotion-lock", post(control_promotion_lock))
        .route("/api/v1/control/kill-switch", post(control_kill_switch))
        .route("/api/v1/registry/:horizon/shadow", post(assign_shadow))
        .route_layer(middleware::from_fn_with_state(Arc::new(auth), require_admin));

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        .merge(admin)
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// Read endpoints (authenticated)
// =============================================================================

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_status())
}

#[derive(Serialize)]
struct RegistryRow {
    horizon: Horizon,
    entry: Option<ModelRegistryEntry>,
}

async fn registry(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let mut rows = Vec::with_capacity(Horizon::ALL.len());
    for horizon in Horizon::ALL {
        let entry = state
            .service
            .registry()
            .get(horizon)
            .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")))?;
        rows.push(RegistryRow { horizon, entry });
    }
    Ok(Json(rows))
}

#[derive(Deserialize)]
struct EventsQuery {
    #[serde(default = "default_events_limit")]
    limit: usize,
    /// Restrict to one horizon ("1D", "7D", "30D").
    horizon: Option<String>,
}

fn default_events_limit() -> usize {
    50
}

async fn events(
    State(state): State<Arc<AppState>>,
    Query(q): Query<EventsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = q.limit.min(1000);
    let log = state.service.events();
    let events = match q.horizon.as_deref() {
        Some(raw) => {
            let horizon = parse_horizon(raw)?;
            log.for_horizon(horizon).map(|mut history| {
                history.reverse();
                history.truncate(limit);
                history
            })
        }
        None => log.recent(limit),
    }
    .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")))?;
    Ok(Json(events))
}

async fn decisions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let decisions = state.recent_decisions.read().clone();
    Json(decisions)
}

async fn guardrails(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    use crate::guardrails::GuardrailsStore;
    Json(state.guardrails.snapshot())
}

// =============================================================================
// Evaluation (authenticated)
// =============================================================================

async fn evaluate_all(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let symbol = state.config.read().symbol.clone();
    let service = state.service.clone();
    let sym = symbol.clone();
    let evaluations = blocking(move || Ok(service.evaluate_all_horizons(&sym))).await?;

    for eval in &evaluations {
        state.push_decision(DecisionEnvelope::from_rollback(&symbol, &eval.rollback, false));
        state.push_decision(DecisionEnvelope::from_promotion(&symbol, &eval.promotion, false));
    }
    Ok(Json(evaluations))
}

async fn evaluate_horizon(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let horizon = parse_horizon(&raw)?;
    let symbol = state.config.read().symbol.clone();
    let service = state.service.clone();
    let sym = symbol.clone();
    let (promotion, rollback) = blocking(move || {
        let promotion = service.evaluate_promotion(horizon, &sym)?;
        let rollback = service.evaluate_rollback(horizon, &sym)?;
        Ok((promotion, rollback))
    })
    .await?;

    state.push_decision(DecisionEnvelope::from_rollback(&symbol, &rollback, false));
    state.push_decision(DecisionEnvelope::from_promotion(&symbol, &promotion, false));
    Ok(Json(serde_json::json!({
        "horizon": horizon,
        "promotion": promotion,
        "rollback": rollback,
    })))
}

// =============================================================================
// Execution (authenticated)
// =============================================================================

async fn execute_promotion(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let horizon = parse_horizon(&raw)?;
    let symbol = state.config.read().symbol.clone();
    let service = state.service.clone();
    let sym = symbol.clone();
    let exec = blocking(move || service.execute_promotion(horizon, &sym)).await?;

    state.push_decision(DecisionEnvelope::from_promotion(&symbol, &exec.check, exec.promoted));
    info!(horizon = %horizon, promoted = exec.promoted, "Promotion requested via API");
    Ok(Json(exec))
}

async fn execute_rollback(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let horizon = parse_horizon(&raw)?;
    let symbol = state.config.read().symbol.clone();
    let service = state.service.clone();
    let sym = symbol.clone();
    let exec = blocking(move || service.execute_rollback(horizon, &sym)).await?;

    state.push_decision(DecisionEnvelope::from_rollback(&symbol, &exec.check, exec.rolled_back));
    warn!(horizon = %horizon, rolled_back = exec.rolled_back, "Rollback requested via API");
    Ok(Json(exec))
}

// =============================================================================
// Control endpoints (authenticated)
// =============================================================================

#[derive(Deserialize)]
struct PromotionLockRequest {
    locked: bool,
}

#[derive(Deserialize)]
struct KillSwitchRequest {
    active: bool,
}

/// Persist the config after a guardrail change (best-effort).
fn save_config(state: &AppState) {
    let config = state.config.read().clone();
    if let Err(e) = config.save(&state.config_path) {
        warn!(error = %e, "Failed to save guardrails to disk");
    }
}

async fn control_promotion_lock(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PromotionLockRequest>,
) -> impl IntoResponse {
    let snapshot = state.update_guardrails(Some(req.locked), None);
    save_config(&state);
    info!(locked = req.locked, "Promotion lock changed via API");
    Json(snapshot)
}

async fn control_kill_switch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<KillSwitchRequest>,
) -> impl IntoResponse {
    let snapshot = state.update_guardrails(None, Some(req.active));
    save_config(&state);
    warn!(active = req.active, "Kill switch changed via API");
    Json(snapshot)
}

#[derive(Deserialize)]
struct AssignShadowRequest {
    model_id: String,
}

async fn assign_shadow(
    State(state): State<Arc<AppState>>,
    Path(raw): Path<String>,
    Json(req): Json<AssignShadowRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let horizon = parse_horizon(&raw)?;
    if req.model_id.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "model_id must not be empty"));
    }
    let service = state.service.clone();
    let entry = blocking(move || service.assign_shadow(horizon, &req.model_id)).await?;
    state.increment_version();
    info!(horizon = %horizon, shadow = ?entry.shadow_model_id, "Shadow assigned via API");
    Ok(Json(entry))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::tests::test_state;
    use axum::body::Body;
    use axum::http::{header, Request};
    use tower::ServiceExt;

    const TOKEN: &str = "test-admin-token";

    fn app(state: Arc<AppState>) -> Router {
        router(state, AdminAuth::new(Some(TOKEN.to_string())))
    }

    fn authed(method: &str, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {TOKEN}"));
        match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(resp: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let api = app(test_state());
        let resp = api
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "ok");
    }

    #[tokio::test]
    async fn wrong_token_is_forbidden() {
        let api = app(test_state());
        let req = Request::get("/api/v1/registry")
            .header(header::AUTHORIZATION, "Bearer nope")
            .body(Body::empty())
            .unwrap();
        let resp = api.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized_with_api_error_body() {
        let resp = app(test_state())
            .oneshot(Request::get("/api/v1/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(resp).await["error"], "missing bearer token");
    }

    #[tokio::test]
    async fn unconfigured_admin_token_locks_everything_but_health() {
        let state = test_state();
        let resp = router(state.clone(), AdminAuth::new(None))
            .oneshot(authed("GET", "/api/v1/registry", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let resp = router(state, AdminAuth::new(None))
            .oneshot(Request::get("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn evaluate_rejects_unknown_horizon() {
        let api = app(test_state());
        let resp = api.oneshot(authed("GET", "/api/v1/evaluate/2W", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn evaluate_all_records_decisions() {
        let state = test_state();
        let api = app(state.clone());
        let resp = api.oneshot(authed("GET", "/api/v1/evaluate", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body.as_array().unwrap().len(), 3);
        assert_eq!(state.recent_decisions.read().len(), 6);
    }

    #[tokio::test]
    async fn promotion_lock_round_trip() {
        let state = test_state();
        let resp = app(state.clone())
            .oneshot(authed(
                "POST",
                "/api/v1/control/promotion-lock",
                Some(serde_json::json!({ "locked": true })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["promotion_lock"], true);

        let resp = app(state.clone())
            .oneshot(authed("GET", "/api/v1/guardrails", None))
            .await
            .unwrap();
        assert_eq!(json_body(resp).await["promotion_lock"], true);
    }

    #[tokio::test]
    async fn shadow_assignment_shows_in_registry_and_events() {
        let state = test_state();
        let resp = app(state.clone())
            .oneshot(authed(
                "POST",
                "/api/v1/registry/7d/shadow",
                Some(serde_json::json!({ "model_id": "cand-7" })),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app(state.clone())
            .oneshot(authed("GET", "/api/v1/registry", None))
            .await
            .unwrap();
        let rows = json_body(resp).await;
        assert_eq!(rows[1]["horizon"], "7D");
        assert_eq!(rows[1]["entry"]["shadow_model_id"], "cand-7");

        let resp = app(state)
            .oneshot(authed("GET", "/api/v1/events?limit=5", None))
            .await
            .unwrap();
        let events = json_body(resp).await;
        assert_eq!(events[0]["kind"], "SHADOW_ASSIGNED");
    }

    #[tokio::test]
    async fn execute_promotion_without_models_is_not_applied() {
        let state = test_state();
        let resp = app(state.clone())
            .oneshot(authed("POST", "/api/v1/execute/1D/promotion", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["promoted"], false);
        assert_eq!(body["check"]["blocking_gate"], "REGISTRY");
    }

    #[tokio::test]
    async fn events_can_be_filtered_by_horizon() {
        let state = test_state();
        for (horizon, model) in [("1D", "a"), ("7D", "b"), ("1D", "c")] {
            let resp = app(state.clone())
                .oneshot(authed(
                    "POST",
                    &format!("/api/v1/registry/{horizon}/shadow"),
                    Some(serde_json::json!({ "model_id": model })),
                ))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
        }

        let resp = app(state.clone())
            .oneshot(authed("GET", "/api/v1/events?horizon=1D", None))
            .await
            .unwrap();
        let events = json_body(resp).await;
        let events = events.as_array().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["to_model_id"], "c");
        assert_eq!(events[1]["to_model_id"], "a");

        let resp = app(state)
            .oneshot(authed("GET", "/api/v1/events?horizon=2W", None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
