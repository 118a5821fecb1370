//! Request middleware: API metrics and artifact path filtering.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::time::Instant;

use crate::metrics::{
    normalize_path, HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION,
};

/// Metrics middleware that tracks HTTP request duration and counts.
///
/// This middleware records:
/// - Request duration (histogram)
/// - Request count (counter)
/// - Requests in flight (gauge)
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = normalize_path(request.uri().path());

    HTTP_REQUESTS_IN_FLIGHT.inc();

    let response = next.run(request).await;

    HTTP_REQUESTS_IN_FLIGHT.dec();

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &path, &status])
        .observe(duration);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    response
}

/// Whether any segment of a request path names a hidden entry, such as
/// the torrent staging area. Percent-encoding is decoded first.
fn has_hidden_segment(path: &str) -> bool {
    match urlencoding::decode(path) {
        Ok(decoded) => decoded
            .split(['/', '\\'])
            .any(|segment| segment.starts_with('.')),
        Err(_) => true,
    }
}

/// Answer 404 for hidden paths so in-progress swarm data under the peer
/// root is never served.
pub async fn reject_hidden_paths(request: Request<Body>, next: Next) -> Response {
    if has_hidden_segment(request.uri().path()) {
        return StatusCode::NOT_FOUND.into_response();
    }
    next.run(request).await
}
