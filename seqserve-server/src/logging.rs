use axum::{extract::Request, http::StatusCode, middleware::Next, response::Response};
use tokio::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// How loudly a finished request is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Served,
    Rejected,
    Failed,
}

impl Outcome {
    fn of(status: StatusCode) -> Self {
        if status.is_server_error() {
            Outcome::Failed
        } else if status.is_client_error() {
            Outcome::Rejected
        } else {
            Outcome::Served
        }
    }
}

/// Logs one line per request. Server errors (overflow, timeout, a failed
/// pipeline) go out at WARN so they stand out from ordinary traffic.
pub async fn request_logger(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let route = format!("{} {}", request.method(), request.uri().path());
    let has_query = request.uri().query().is_some();

    let response = next.run(request).await;
    let status = response.status().as_u16();
    let elapsed = started.elapsed();

    match Outcome::of(response.status()) {
        Outcome::Served => tracing::info!(%route, status, ?elapsed, "Served"),
        Outcome::Rejected => tracing::debug!(%route, status, has_query, ?elapsed, "Rejected"),
        Outcome::Failed => tracing::warn!(%route, status, ?elapsed, "Request failed"),
    }

    response
}
