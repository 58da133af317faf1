// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. The webhook and health/metrics
// endpoints are public (webhooks authenticate upstream); the diagnostic
// endpoints require a Bearer token via the `AuthBearer` extractor.
//
// Error contract:
//   - malformed candidate  -> 400 VALIDATION_ERROR (never a verdict)
//   - gate failures        -> 200 with decision REJECT (a business outcome)
//   - admission saturation -> 503 SATURATED with retry_after_ms
// =============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Json, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::config::ENGINE_VERSION;
use crate::engine::DecisionOutput;
use crate::normalizer::ValidationError;
use crate::stores::SignalRecord;
use crate::types::{MarketSession, QualityTier, Timeframe};
use crate::validity::signal_validity;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Webhooks ────────────────────────────────────────────────
        .route("/api/v1/webhook/signal", post(webhook_signal))
        .route("/api/v1/webhook/phase", post(webhook_phase))
        // ── Public observability ────────────────────────────────────
        .route("/api/v1/health", get(health))
        .route("/api/v1/metrics", get(metrics))
        // ── Authenticated diagnostics ───────────────────────────────
        .route("/api/v1/signals/active", get(active_signals))
        .route("/api/v1/phases/active", get(active_phases))
        .route("/api/v1/validity", get(validity_breakdown))
        .route("/api/v1/suspicious", get(suspicious_sources))
        // ── Middleware & State ──────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Signal webhook
// =============================================================================

async fn webhook_signal(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(payload): Json<Value>,
) -> Response {
    // Admission: refuse immediately above the concurrent ceiling. No audit
    // record is produced for a refused call.
    let Some(_permit) = state.perf.try_admit() else {
        let retry_after_ms = state.perf.suggested_retry_after_ms();
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "SATURATED",
                "retry_after_ms": retry_after_ms,
            })),
        )
            .into_response();
    };

    let started = Instant::now();
    match state.engine.decide(&payload).await {
        Ok(output) => {
            ingest_signal(&state, &payload, &output);
            state
                .perf
                .record_request(started.elapsed().as_millis() as u64, false);
            Json(output).into_response()
        }
        Err(err) => {
            state
                .suspicious
                .record_anomaly(&addr.ip().to_string(), Utc::now().timestamp_millis());
            state
                .perf
                .record_request(started.elapsed().as_millis() as u64, true);
            validation_response(err)
        }
    }
}

fn validation_response(err: ValidationError) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({
            "error": err.code.to_string(),
            "type": "VALIDATION_ERROR",
            "message": err.to_string(),
            "engine_version": ENGINE_VERSION,
        })),
    )
        .into_response()
}

/// A webhook signal carrying an optional `timeframe` is also recorded into
/// the timeframe store; `quality` defaults from the normalized ai_score.
fn ingest_signal(state: &Arc<AppState>, payload: &Value, output: &DecisionOutput) {
    let Some(timeframe) = payload
        .get("timeframe")
        .and_then(Value::as_str)
        .and_then(Timeframe::parse)
    else {
        return;
    };

    let candidate = &output.audit.candidate;
    let quality = payload
        .get("quality")
        .and_then(Value::as_str)
        .and_then(QualityTier::parse)
        .unwrap_or_else(|| QualityTier::from_ai_score(candidate.ai_score));

    let record = SignalRecord {
        symbol: candidate.symbol.clone(),
        signal_type: candidate.signal_type,
        ai_score: candidate.ai_score,
        saty_phase: candidate.saty_phase,
        quality,
        session: candidate.market_session,
        timestamp: candidate.timestamp,
    };

    let now_ms = Utc::now().timestamp_millis();
    let (outcome, breakdown) = state.timeframe_store.put(timeframe, record, now_ms);
    debug!(
        %timeframe,
        accepted = outcome.accepted(),
        validity_min = breakdown.validity_minutes,
        "webhook signal ingested into timeframe store"
    );
}

// =============================================================================
// Phase webhook
// =============================================================================

async fn webhook_phase(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(payload): Json<Value>,
) -> Response {
    let now_ms = Utc::now().timestamp_millis();

    match crate::stores::PhaseRecord::from_payload(&payload, now_ms) {
        Ok(record) => {
            let tf_role = record.tf_role;
            let event_tf = record.event_tf;
            let decay_minutes = record.decay_minutes();
            state.phase_store.put(record, now_ms);

            Json(json!({
                "status": "stored",
                "tf_role": tf_role,
                "event_tf": event_tf,
                "decay_minutes": decay_minutes,
            }))
            .into_response()
        }
        Err(err) => {
            state
                .suspicious
                .record_anomaly(&addr.ip().to_string(), now_ms);
            validation_response(err)
        }
    }
}

// =============================================================================
// Health & metrics (public)
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let probes = state.context_builder.probe_all().await;
    let performance = state.perf.health();

    let all_down = probes.iter().all(|p| !p.reachable);
    let any_down = probes.iter().any(|p| !p.reachable);
    let status = if all_down {
        "unhealthy"
    } else if any_down || !performance.healthy {
        "degraded"
    } else {
        "healthy"
    };

    let checked_at = Utc::now().to_rfc3339();
    let providers: Vec<Value> = probes
        .iter()
        .map(|p| {
            json!({
                "name": p.name,
                "status": if p.reachable { "up" } else { "down" },
                "response_time_ms": p.response_time_ms,
                "last_checked": checked_at,
            })
        })
        .collect();

    Json(json!({
        "status": status,
        "providers": providers,
        "performance": performance,
        "config_violations": state.config_guard.violation_count(),
        "uptime_ms": state.perf.uptime_ms(),
        "engine_version": ENGINE_VERSION,
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.perf.metrics())
}

// =============================================================================
// Diagnostics (authenticated)
// =============================================================================

async fn active_signals(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let now_ms = Utc::now().timestamp_millis();
    Json(state.timeframe_store.get_all_active(now_ms))
}

async fn active_phases(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let now_ms = Utc::now().timestamp_millis();
    Json(state.phase_store.get_all_active(now_ms))
}

#[derive(Deserialize)]
struct ValidityQuery {
    tf: String,
    #[serde(default)]
    quality: Option<String>,
    #[serde(default)]
    session: Option<String>,
}

async fn validity_breakdown(
    _auth: AuthBearer,
    Query(query): Query<ValidityQuery>,
) -> Response {
    let Some(timeframe) = Timeframe::parse(&query.tf) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": format!("unknown timeframe '{}'", query.tf)})),
        )
            .into_response();
    };

    let quality = query
        .quality
        .as_deref()
        .and_then(QualityTier::parse)
        .unwrap_or(QualityTier::High);
    let session = query
        .session
        .as_deref()
        .and_then(MarketSession::parse)
        .unwrap_or(MarketSession::Midday);

    Json(signal_validity(timeframe, quality, session)).into_response()
}

async fn suspicious_sources(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let now_ms = Utc::now().timestamp_millis();
    Json(state.suspicious.flagged(now_ms))
}
