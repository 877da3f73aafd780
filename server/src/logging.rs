use std::time::Instant;

use axum::{extract::Request, middleware::Next, response::Response};
use tracing_subscriber::{fmt, EnvFilter};

const LOG_TARGET: &str = "server::http";

/// Installs the global subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str, json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))?;
    let builder = fmt::fmt().with_env_filter(filter).with_target(true);
    if json {
        builder.json().flatten_event(true).try_init()
    } else {
        builder.compact().try_init()
    }
    .map_err(|err| anyhow::anyhow!(err))
}

/// Logs each request and how it completed.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    tracing::debug!(target: LOG_TARGET, %method, %path, "incoming request");

    let start = Instant::now();
    let response = next.run(request).await;
    let status = response.status();

    tracing::info!(
        target: LOG_TARGET,
        %method,
        %path,
        status = status.as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        "request completed"
    );

    response
}
