//! Pipeline statistics endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use seqserve_core::{BatchStatsSnapshot, QueueDepth};

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/stats", get(stats))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub pending: usize,
    pub queues: Vec<QueueDepth>,
    pub batches: BatchStatsSnapshot,
}

/// GET /stats - Requests in flight, per-stage queue depths and batch counters.
async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    let processor = &state.processor;
    Json(StatsResponse {
        pending: processor.pending_len().await,
        queues: processor.queue_depths().await,
        batches: processor.batch_stats(),
    })
}
