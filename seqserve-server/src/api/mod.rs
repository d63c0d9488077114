//! HTTP API.

pub mod health;
pub mod query;
pub mod stats;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Build the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(query::router())
        .merge(health::router())
        .merge(stats::router())
}
