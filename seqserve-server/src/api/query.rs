//! Query endpoint.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use crate::error::{ApiError, Result};
use crate::state::AppState;

/// Build the query router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/", get(query))
}

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    #[serde(default)]
    pub query: String,
}

/// GET /?query=... - Run a query through the pipeline and return the result
/// as plain text.
async fn query(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Result<String> {
    check_length(&params.query, state.config.settings.max_query_len)?;

    let result = state
        .processor
        .process_query(&params.query, state.config.request_timeout())
        .await?;
    Ok(result)
}

fn check_length(query: &str, max_len: usize) -> Result<()> {
    let len = query.chars().count();
    if len == 0 {
        return Err(ApiError::MalformedRequest("query must not be empty".to_string()));
    }
    if len > max_len {
        return Err(ApiError::MalformedRequest(format!(
            "query is {} characters long, the limit is {}",
            len, max_len
        )));
    }
    Ok(())
}
