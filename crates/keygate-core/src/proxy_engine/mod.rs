use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, warn};

use keygate_channel::{
    ChannelFactory, Headers, HttpMethod, UpstreamClient, UpstreamFailure, UpstreamHttpRequest,
    UpstreamHttpResponse, parse_upstream_error,
};
use keygate_common::{EffectiveConfig, Group};
use keygate_storage::Storage;

use crate::errors::{CoreError, CoreResult};
use crate::key_pool::KeyPool;

/// Hop-by-hop headers plus material the proxy must own itself.
const STRIPPED_REQUEST_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
    // Downstream auth material addressed to keygate, not the provider.
    "authorization",
    "x-api-key",
    "x-goog-api-key",
];

/// One buffered inbound request, ready for inspection and (re-)dispatch.
///
/// The body is read once by the router; the same buffer is reused across
/// retries without another network read.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub method: HttpMethod,
    /// Path suffix below the group prefix, e.g. `/v1/chat/completions`.
    pub path: String,
    pub query: Option<String>,
    pub headers: Headers,
    pub body: Bytes,
}

/// Glue between the router, the key pool and the channel adapters: resolves
/// the group, forwards the request, and rotates keys on credential-fatal
/// failures.
pub struct ProxyEngine {
    storage: Arc<dyn Storage>,
    key_pool: Arc<KeyPool>,
    factory: Arc<ChannelFactory>,
    client: Arc<dyn UpstreamClient>,
    defaults: EffectiveConfig,
}

impl ProxyEngine {
    pub fn new(
        storage: Arc<dyn Storage>,
        key_pool: Arc<KeyPool>,
        factory: Arc<ChannelFactory>,
        client: Arc<dyn UpstreamClient>,
        defaults: EffectiveConfig,
    ) -> Self {
        Self {
            storage,
            key_pool,
            factory,
            client,
            defaults,
        }
    }

    pub async fn handle(
        &self,
        group_name: &str,
        inbound: InboundRequest,
    ) -> CoreResult<UpstreamHttpResponse> {
        let started = Instant::now();
        let group = self
            .storage
            .get_group_by_name(group_name)
            .await?
            .ok_or_else(|| CoreError::group_not_found(group_name))?;

        let result = self.forward(&group, inbound).await;
        let elapsed = started.elapsed().as_secs_f64();
        match &result {
            Ok(resp) => {
                keygate_metrics::record_proxy_request(&group.name, &resp.status.to_string(), elapsed);
            }
            Err(_) => keygate_metrics::record_proxy_request(&group.name, "error", elapsed),
        }
        result
    }

    async fn forward(
        &self,
        group: &Group,
        inbound: InboundRequest,
    ) -> CoreResult<UpstreamHttpResponse> {
        let adapter = self.factory.channel(group)?;
        let config = group.settings.resolve(&self.defaults);

        let is_stream =
            adapter.is_stream_request(&inbound.headers, inbound.query.as_deref(), &inbound.body);
        let model = adapter.extract_model(&inbound.body);
        debug!(
            group = %group.name,
            path = %inbound.path,
            model = %model,
            is_stream,
            "proxying request"
        );

        let url = adapter
            .base()
            .join_upstream(&inbound.path, inbound.query.as_deref())?;
        let headers = forwardable_headers(&inbound.headers);

        let mut attempt: u32 = 0;
        let (mut key, mut plaintext) = self.key_pool.acquire(group).await?;
        loop {
            let mut req = UpstreamHttpRequest {
                method: inbound.method,
                url: url.clone(),
                headers: headers.clone(),
                body: Some(inbound.body.clone()),
                is_stream,
            };
            adapter.modify_request(&mut req, &plaintext);
            adapter.base().apply_header_rules(&mut req.headers, &plaintext);

            match self.client.send(req).await {
                Ok(resp) if !is_credential_fatal_status(resp.status) => {
                    // 2xx, and any non-2xx that is not credential-fatal, is
                    // forwarded unchanged.
                    return Ok(resp);
                }
                Ok(resp) => {
                    let status = resp.status;
                    let body = resp.body.as_bytes().unwrap_or_default();
                    let reason = format!("[status {status}] {}", parse_upstream_error(&body));
                    warn!(
                        group = %group.name,
                        key_id = key.id,
                        status,
                        attempt,
                        "credential-fatal upstream status"
                    );
                    self.key_pool.mark_invalid(group, key.id, &reason).await?;
                    if attempt >= config.max_retries {
                        return Ok(resp);
                    }
                    attempt += 1;
                    (key, plaintext) = self.key_pool.rotate(group).await?;
                }
                Err(failure) => {
                    let reason = failure_reason(&failure);
                    warn!(
                        group = %group.name,
                        key_id = key.id,
                        attempt,
                        reason = %reason,
                        "upstream dispatch failed"
                    );
                    self.key_pool.mark_invalid(group, key.id, &reason).await?;
                    if attempt >= config.max_retries {
                        return Err(failure_to_error(failure));
                    }
                    attempt += 1;
                    (key, plaintext) = self.key_pool.rotate(group).await?;
                }
            }
        }
    }
}

/// 401/403/429 mean the credential itself was rejected or throttled; rotate.
pub fn is_credential_fatal_status(status: u16) -> bool {
    matches!(status, 401 | 403 | 429)
}

fn forwardable_headers(headers: &Headers) -> Headers {
    headers
        .iter()
        .filter(|(name, _)| {
            let name = name.to_ascii_lowercase();
            !STRIPPED_REQUEST_HEADERS.contains(&name.as_str())
        })
        .cloned()
        .collect()
}

fn failure_reason(failure: &UpstreamFailure) -> String {
    match failure {
        UpstreamFailure::Transport { message, .. } => format!("network error: {message}"),
        UpstreamFailure::Http { status, body, .. } => {
            format!("[status {status}] {}", parse_upstream_error(body))
        }
    }
}

fn failure_to_error(failure: UpstreamFailure) -> CoreError {
    match failure {
        UpstreamFailure::Transport { message, .. } => {
            CoreError::Channel(keygate_channel::ChannelError::Transport(message))
        }
        UpstreamFailure::Http { status, body, .. } => CoreError::Upstream {
            status,
            reason: parse_upstream_error(&body),
        },
    }
}
