//! Health check handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ReadyResponse {
    pub status: String,
    pub checks: HealthChecks,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub database: CheckResult,
    pub rasterizer: CheckResult,
}

#[derive(Serialize)]
pub struct CheckResult {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckResult {
    fn up(latency_ms: Option<u64>, detail: Option<String>) -> Self {
        Self {
            status: "up".to_string(),
            latency_ms,
            detail,
        }
    }
}

/// Liveness check - always returns healthy if server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: pressroom_common::VERSION,
    })
}

/// Readiness check - checks the database when one is configured
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let start = std::time::Instant::now();

    let database = match state.db {
        None => CheckResult::up(None, Some("in-memory".to_string())),
        Some(ref db) => match db.ping().await {
            Ok(()) => CheckResult::up(Some(start.elapsed().as_millis() as u64), None),
            Err(e) => CheckResult {
                status: "down".to_string(),
                latency_ms: None,
                detail: Some(e.to_string()),
            },
        },
    };

    // Rasterizer outages degrade ingestion but never block it
    let rasterizer = CheckResult::up(None, Some(state.papers.rasterizer_name().to_string()));

    let ready = database.status == "up";
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadyResponse {
            status: if ready { "ready" } else { "not_ready" }.to_string(),
            checks: HealthChecks {
                database,
                rasterizer,
            },
        }),
    )
}
