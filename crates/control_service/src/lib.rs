use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{Duration, Utc};
use collector::Orchestrator;
use datastore::RetentionReport;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

/// Request body for a manual retention sweep
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepRequest {
    pub older_than_hours: u32,
}

/// Rows deleted by a sweep, per collection
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SweepResponse {
    pub videos: u64,
    pub active_messages: u64,
    pub archive_messages: u64,
}

impl From<RetentionReport> for SweepResponse {
    fn from(report: RetentionReport) -> Self {
        Self {
            videos: report.videos,
            active_messages: report.active_messages,
            archive_messages: report.archive_messages,
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

fn internal_error(message: String) -> axum::response::Response {
    let response = ErrorResponse {
        success: false,
        error: message,
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(response)).into_response()
}

/// Answers once the store responds to a trivial query
async fn healthz(State(orchestrator): State<Arc<Orchestrator>>) -> impl IntoResponse {
    match orchestrator.repository().health_check().await {
        Ok(()) => (StatusCode::OK, "ok").into_response(),
        Err(err) => {
            error!(error = %err, "health check failed");
            internal_error(err.to_string())
        }
    }
}

/// Delete rows not updated within the requested window
async fn sweep_retention(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(request): Json<SweepRequest>,
) -> impl IntoResponse {
    let cutoff = Utc::now() - Duration::hours(i64::from(request.older_than_hours));
    match orchestrator.sweep_retention(cutoff).await {
        Ok(report) => (StatusCode::OK, Json(SweepResponse::from(report))).into_response(),
        Err(err) => {
            error!(error = %err, "retention sweep failed");
            internal_error(err.to_string())
        }
    }
}

/// Create the router for the control API
pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/retention/sweep", post(sweep_retention))
        .with_state(orchestrator)
}
