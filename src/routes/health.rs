use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::db::HealthCheckSnapshot;
use crate::realtime::RealtimeStats;
use crate::state::AppState;

const SERVICE_NAME: &str = "tutorhub-backend";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/live", get(live))
        .route("/ready", get(ready))
        .route("/info", get(info))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
    timestamp: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LivenessResponse {
    status: &'static str,
    timestamp: String,
    uptime: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadinessResponse {
    status: &'static str,
    timestamp: String,
    database: Option<HealthCheckSnapshot>,
    cache: CacheReadiness,
    realtime: RealtimeStats,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CacheReadiness {
    redis: Option<bool>,
    memory_entries: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InfoResponse {
    service: &'static str,
    version: &'static str,
    environment: &'static str,
    start_time: String,
    uptime: u64,
}

async fn root(State(state): State<AppState>) -> Response {
    let connected = match state.db_proxy() {
        Some(proxy) => proxy.ping().await.healthy,
        None => false,
    };

    let response = HealthResponse {
        status: if connected { "ok" } else { "degraded" },
        database: if connected { "connected" } else { "disconnected" },
        timestamp: now_iso(),
    };
    let status = if connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response)).into_response()
}

async fn live(State(state): State<AppState>) -> Response {
    Json(LivenessResponse {
        status: "healthy",
        timestamp: now_iso(),
        uptime: state.uptime_seconds(),
    })
    .into_response()
}

async fn ready(State(state): State<AppState>) -> Response {
    let database = match state.db_proxy() {
        Some(proxy) => Some(proxy.health_status().await),
        None => None,
    };
    let redis = match state.cache().redis() {
        Some(redis) => Some(redis.is_connected().await),
        None => None,
    };

    let ready = database.as_ref().is_some_and(|db| db.healthy);
    let degraded = database.as_ref().is_some_and(|db| db.degraded);
    let response = ReadinessResponse {
        status: match (ready, degraded) {
            (true, false) => "healthy",
            (true, true) => "degraded",
            _ => "unhealthy",
        },
        timestamp: now_iso(),
        database,
        cache: CacheReadiness {
            redis,
            memory_entries: state.memory_cache().len(),
        },
        realtime: state.realtime().stats(),
    };

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response)).into_response()
}

async fn info(State(state): State<AppState>) -> Response {
    let start_time: DateTime<Utc> = state.started_at_system().into();
    Json(InfoResponse {
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config().app_env.as_str(),
        start_time: start_time.to_rfc3339_opts(SecondsFormat::Millis, true),
        uptime: state.uptime_seconds(),
    })
    .into_response()
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
