use std::time::Instant;

use axum::body::Body;
use axum::extract::{MatchedPath, Request};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

/// Collect the `http_*` series for every inbound request.
///
/// The endpoint label uses the matched route pattern, which keeps
/// cardinality bounded; unmatched requests coalesce to `"unknown"`.
pub async fn track_http(
    matched_path: Option<MatchedPath>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().as_str().to_string();
    let endpoint = matched_path
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let request_size = approximate_request_size(&req);

    let resp = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let response_size = resp
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    keygate_metrics::record_http_request(
        &method,
        &endpoint,
        resp.status().as_u16(),
        duration,
        request_size,
        response_size,
    );

    resp
}

/// Approximate wire size: request line, headers, host and declared content
/// length.
fn approximate_request_size(req: &Request<Body>) -> u64 {
    let mut size = req.uri().path().len() as u64;
    size += req.method().as_str().len() as u64;
    for (name, value) in req.headers() {
        size += name.as_str().len() as u64;
        size += value.len() as u64;
    }
    if let Some(len) = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        size += len;
    }
    size
}
