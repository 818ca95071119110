//! Request middleware

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

/// Header carrying the caller's request id
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Log every request with its status and duration
pub async fn request_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string();

    let start = Instant::now();
    tracing::debug!(request_id = %request_id, method = %method, uri = %uri, "Request started");

    let response = next.run(request).await;

    tracing::info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        status = %response.status(),
        duration_ms = %start.elapsed().as_millis(),
        "Request completed"
    );
    response
}
