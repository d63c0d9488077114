//! Health check endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use seqserve_core::PipelineHealth;

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

/// GET /health - Reports whether the pipeline is running.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<Value>) {
    let version = env!("CARGO_PKG_VERSION");
    match state.processor.health() {
        PipelineHealth::Running => (StatusCode::OK, Json(json!({ "status": "ok", "version": version }))),
        PipelineHealth::Failed { stage, reason } => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "degraded",
                "version": version,
                "failed_stage": stage,
                "reason": reason
            })),
        ),
        PipelineHealth::Idle | PipelineHealth::Stopped => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "degraded", "version": version })),
        ),
    }
}
