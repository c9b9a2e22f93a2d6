use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use keygate_channel::{
    ChannelError, UpstreamClient, UpstreamFailure, UpstreamHttpRequest, header_set,
    parse_upstream_error,
};
use keygate_common::{ChannelType, Group};
use keygate_storage::Storage;

use crate::errors::{CoreError, CoreResult};
use crate::key_pool::KeyPool;

const PLAYGROUND_TIMEOUT: Duration = Duration::from_secs(30);
const ANTHROPIC_MAX_TOKENS: u32 = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlaygroundRequest {
    pub group_name: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub temperature: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaygroundReply {
    pub content: String,
    pub model: String,
}

/// Synchronous, single-turn chat probe against any of the three channel
/// protocols.
pub struct PlaygroundExecutor {
    storage: Arc<dyn Storage>,
    key_pool: Arc<KeyPool>,
    client: Arc<dyn UpstreamClient>,
}

impl PlaygroundExecutor {
    pub fn new(
        storage: Arc<dyn Storage>,
        key_pool: Arc<KeyPool>,
        client: Arc<dyn UpstreamClient>,
    ) -> Self {
        Self {
            storage,
            key_pool,
            client,
        }
    }

    pub async fn chat(&self, req: PlaygroundRequest) -> CoreResult<PlaygroundReply> {
        let group = self
            .storage
            .get_group_by_name(&req.group_name)
            .await?
            .ok_or_else(|| CoreError::group_not_found(&req.group_name))?;

        let Some(upstream) = group.first_upstream() else {
            return Err(CoreError::BadRequest(
                "group has no upstreams configured".to_string(),
            ));
        };
        let base = upstream.trim_end_matches('/').to_string();

        let (_key, plaintext) = self.key_pool.acquire(&group).await?;

        let upstream_req = build_request(&group, &base, &plaintext, &req);
        let body = self.dispatch(upstream_req).await?;
        let content = extract_content(group.channel_type, &body)
            .ok_or(CoreError::UnexpectedResponseFormat)?;

        Ok(PlaygroundReply {
            content,
            model: req.model,
        })
    }

    async fn dispatch(&self, req: UpstreamHttpRequest) -> CoreResult<Bytes> {
        let sent = self.client.send(req);
        let resp = match tokio::time::timeout(PLAYGROUND_TIMEOUT, sent).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(UpstreamFailure::Http { status, body, .. })) => {
                return Err(CoreError::Upstream {
                    status,
                    reason: parse_upstream_error(&body),
                });
            }
            Ok(Err(UpstreamFailure::Transport { message, .. })) => {
                return Err(CoreError::Channel(ChannelError::Transport(message)));
            }
            Err(_) => {
                return Err(CoreError::Channel(ChannelError::Transport(
                    "playground request timed out".to_string(),
                )));
            }
        };

        let body = resp.body.as_bytes().unwrap_or_default();
        if !resp.is_success() {
            return Err(CoreError::Upstream {
                status: resp.status,
                reason: parse_upstream_error(&body),
            });
        }
        Ok(body)
    }
}

fn build_request(
    group: &Group,
    base: &str,
    api_key: &str,
    req: &PlaygroundRequest,
) -> UpstreamHttpRequest {
    match group.channel_type {
        ChannelType::OpenAI => {
            let payload = json!({
                "model": req.model,
                "messages": req.messages,
                "temperature": req.temperature,
            });
            let mut out = UpstreamHttpRequest::post_json(
                format!("{base}/v1/chat/completions"),
                Bytes::from(payload.to_string()),
            );
            header_set(&mut out.headers, "Authorization", format!("Bearer {api_key}"));
            out
        }
        ChannelType::Gemini => {
            let contents: Vec<Value> = req
                .messages
                .iter()
                .map(|msg| {
                    let role = if msg.role == "assistant" { "model" } else { "user" };
                    json!({
                        "role": role,
                        "parts": [{"text": msg.content}],
                    })
                })
                .collect();
            let payload = json!({
                "contents": contents,
                "generationConfig": {"temperature": req.temperature},
            });
            UpstreamHttpRequest::post_json(
                format!(
                    "{base}/v1beta/models/{}:generateContent?key={api_key}",
                    req.model
                ),
                Bytes::from(payload.to_string()),
            )
        }
        ChannelType::Anthropic => {
            let payload = json!({
                "model": req.model,
                "messages": req.messages,
                "max_tokens": ANTHROPIC_MAX_TOKENS,
                "temperature": req.temperature,
            });
            let mut out = UpstreamHttpRequest::post_json(
                format!("{base}/v1/messages"),
                Bytes::from(payload.to_string()),
            );
            header_set(&mut out.headers, "x-api-key", api_key);
            header_set(
                &mut out.headers,
                "anthropic-version",
                keygate_channel::anthropic::ANTHROPIC_VERSION,
            );
            out
        }
    }
}

/// Pull the assistant text out of the provider-shaped response body.
fn extract_content(channel_type: ChannelType, body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let text = match channel_type {
        ChannelType::OpenAI => value
            .get("choices")?
            .get(0)?
            .get("message")?
            .get("content")?
            .as_str()?,
        ChannelType::Gemini => value
            .get("candidates")?
            .get(0)?
            .get("content")?
            .get("parts")?
            .get(0)?
            .get("text")?
            .as_str()?,
        ChannelType::Anthropic => value.get("content")?.get(0)?.get("text")?.as_str()?,
    };
    Some(text.to_string())
}
