use std::convert::Infallible;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use futures_util::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use keygate_channel::{HttpMethod, UpstreamBody, UpstreamHttpResponse};
use keygate_core::{CoreError, InboundRequest, ProxyEngine};

use crate::response::ApiError;

/// Group override header, for clients that cannot change their base path.
const GROUP_HEADER: &str = "x-keygate-group";

/// Response headers the proxy must not relay verbatim.
const STRIPPED_RESPONSE_HEADERS: &[&str] = &["connection", "transfer-encoding", "content-length"];

const MAX_INBOUND_BODY_BYTES: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct ProxyState {
    pub engine: Arc<ProxyEngine>,
}

pub fn proxy_router(engine: Arc<ProxyEngine>) -> Router {
    let state = ProxyState { engine };
    Router::new()
        .route("/proxy/{group}/{*rest}", any(proxy_handler))
        .with_state(state)
}

async fn proxy_handler(
    State(state): State<ProxyState>,
    Path((group, rest)): Path<(String, String)>,
    req: axum::http::Request<Body>,
) -> Response {
    let trace_id = uuid::Uuid::now_v7();

    // Path prefix names the group; the override header wins when present.
    let group = req
        .headers()
        .get(GROUP_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or(group);

    let Some(method) = HttpMethod::parse(req.method().as_str()) else {
        return ApiError {
            status: StatusCode::METHOD_NOT_ALLOWED,
            code: "method_not_allowed",
            message: format!("method {} is not supported", req.method()),
        }
        .into_response();
    };

    let query = req.uri().query().map(str::to_string);
    let headers: Vec<(String, String)> = req
        .headers()
        .iter()
        .filter_map(|(k, v)| {
            v.to_str()
                .ok()
                .map(|v| (k.as_str().to_string(), v.to_string()))
        })
        .collect();

    // Buffer once: stream detection, model extraction and retries all read
    // the same bytes.
    let body = match axum::body::to_bytes(req.into_body(), MAX_INBOUND_BODY_BYTES).await {
        Ok(body) => body,
        Err(err) => {
            return ApiError::bad_request(format!("failed to read request body: {err}"))
                .into_response();
        }
    };

    debug!(%trace_id, group = %group, path = %rest, "inbound proxy request");

    let inbound = InboundRequest {
        method,
        path: format!("/{rest}"),
        query,
        headers,
        body,
    };

    match state.engine.handle(&group, inbound).await {
        Ok(resp) => upstream_to_response(resp),
        Err(err) => proxy_error_response(err),
    }
}

/// Proxy-side status mapping. Differs from the admin envelope in one place:
/// an exhausted pool is a 503 for proxy clients.
fn proxy_error_response(err: CoreError) -> Response {
    let api_err = match err {
        CoreError::NoActiveKeys(group) => ApiError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "no_active_keys",
            message: format!("no active keys available in group {group}"),
        },
        CoreError::Upstream { status, reason } => ApiError {
            status: StatusCode::BAD_GATEWAY,
            code: "upstream_error",
            message: format!("[status {status}] {reason}"),
        },
        CoreError::Channel(keygate_channel::ChannelError::Transport(message)) => ApiError {
            status: StatusCode::BAD_GATEWAY,
            code: "upstream_unreachable",
            message,
        },
        other => ApiError::from(other),
    };
    api_err.into_response()
}

fn upstream_to_response(resp: UpstreamHttpResponse) -> Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);

    if let Some(headers) = builder.headers_mut() {
        for (name, value) in &resp.headers {
            let lowered = name.to_ascii_lowercase();
            if STRIPPED_RESPONSE_HEADERS.contains(&lowered.as_str()) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                headers.append(name, value);
            }
        }
    }

    let body = match resp.body {
        UpstreamBody::Bytes(bytes) => Body::from(bytes),
        // Chunk-for-chunk relay; arrival order is delivery order.
        UpstreamBody::Stream(rx) => {
            Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>))
        }
    };

    match builder.body(body) {
        Ok(resp) => resp,
        Err(err) => ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "internal_error",
            message: format!("failed to assemble response: {err}"),
        }
        .into_response(),
    }
}
