// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/` (§6.2). `/health` is public; `/scan`
// and `/query` require a Bearer token via the `AuthBearer` extractor, same
// shape as the teacher's router. CORS stays permissive, matching the
// teacher's development-mode layer.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::api::auth::AuthBearer;
use crate::audit_log::{QueryFilter, SortBy};
use crate::engine::{DetectorKind, MomentumEngine, ScanOptions, ScanOutcome};
use crate::signal::{Signal, SignalType};

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(engine: Arc<MomentumEngine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/scan", post(scan))
        .route("/api/v1/query", get(query))
        .layer(cors)
        .with_state(engine)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    engine_state: &'static str,
    last_scan_degraded: bool,
    server_time: i64,
}

async fn health(State(engine): State<Arc<MomentumEngine>>) -> impl IntoResponse {
    let engine_state = match engine.state() {
        crate::engine::EngineState::Idle => "idle",
        crate::engine::EngineState::Scanning => "scanning",
    };
    Json(HealthResponse {
        status: "ok",
        engine_state,
        last_scan_degraded: engine.last_scan_degraded(),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Scan (authenticated)
// =============================================================================

#[derive(Deserialize)]
struct ScanRequest {
    symbols: Vec<String>,
    #[serde(default)]
    scan_types: Option<Vec<String>>,
    #[serde(default)]
    deadline_ms: Option<u64>,
}

#[derive(Serialize)]
struct ScanResponse {
    outcome: &'static str,
    unfinished: Vec<&'static str>,
    signals: Vec<Signal>,
}

async fn scan(
    _auth: AuthBearer,
    State(engine): State<Arc<MomentumEngine>>,
    Json(req): Json<ScanRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let options = ScanOptions {
        scan_types: req
            .scan_types
            .map(|raw| raw.iter().filter_map(|s| parse_detector_kind(s)).collect()),
        deadline: req.deadline_ms.map(std::time::Duration::from_millis),
    };

    match engine.scan(&req.symbols, options).await {
        Ok((signals, outcome)) => {
            let (outcome_str, unfinished) = match outcome {
                ScanOutcome::Complete => ("complete", Vec::new()),
                ScanOutcome::Partial { unfinished } => ("partial", unfinished),
            };
            Ok(Json(ScanResponse {
                outcome: outcome_str,
                unfinished,
                signals,
            }))
        }
        Err(e) => {
            warn!(error = %e, "scan rejected");
            Err((
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": e.to_string() })),
            ))
        }
    }
}

// =============================================================================
// Query (authenticated)
// =============================================================================

#[derive(Deserialize)]
struct QueryParams {
    symbols: Option<String>,
    types: Option<String>,
    min_strength: Option<f64>,
    start_utc: Option<chrono::DateTime<chrono::Utc>>,
    end_utc: Option<chrono::DateTime<chrono::Utc>>,
    sort_by: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn query(
    _auth: AuthBearer,
    State(engine): State<Arc<MomentumEngine>>,
    Query(params): Query<QueryParams>,
) -> impl IntoResponse {
    let filter = QueryFilter {
        symbols: params.symbols.map(|s| s.split(',').map(str::to_string).collect()),
        types: params.types.map(|s| s.split(',').filter_map(parse_signal_type).collect()),
        min_strength: params.min_strength,
        start_utc: params.start_utc,
        end_utc: params.end_utc,
        sort_by: params
            .sort_by
            .as_deref()
            .map(|s| match s {
                "detected_at" => SortBy::DetectedAt,
                _ => SortBy::Strength,
            })
            .unwrap_or_default(),
        limit: params.limit,
        offset: params.offset,
    };

    let results = engine.query(&filter);
    Json(results)
}

fn parse_signal_type(raw: &str) -> Option<SignalType> {
    match raw.trim().to_uppercase().as_str() {
        "CATALYST" => Some(SignalType::Catalyst),
        "PREMARKET_MOVER" => Some(SignalType::PremarketMover),
        "BULL_FLAG" => Some(SignalType::BullFlag),
        "COMPOSITE" => Some(SignalType::Composite),
        _ => None,
    }
}

fn parse_detector_kind(raw: &str) -> Option<DetectorKind> {
    match raw.trim().to_uppercase().as_str() {
        "CATALYST" => Some(DetectorKind::Catalyst),
        "PREMARKET" => Some(DetectorKind::Premarket),
        "BULL_FLAG" => Some(DetectorKind::BullFlag),
        _ => None,
    }
}
