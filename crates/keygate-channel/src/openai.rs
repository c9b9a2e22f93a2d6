use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;

use crate::adapter::{ChannelAdapter, FetchedCapability};
use crate::base::ChannelBase;
use crate::client::UpstreamHttpRequest;
use crate::errors::{ChannelError, ChannelResult};
use crate::headers::header_set;
use crate::upstream_error::parse_upstream_error;

pub const CHANNEL_TYPE: &str = "openai";

/// OpenAI-compatible channel: bearer auth, Chat Completions validation
/// probe, `/v1/models` catalog.
pub struct OpenAIChannel {
    base: ChannelBase,
}

impl OpenAIChannel {
    pub fn new(base: ChannelBase) -> Self {
        Self { base }
    }
}

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    #[serde(default)]
    id: String,
}

#[async_trait]
impl ChannelAdapter for OpenAIChannel {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn base(&self) -> &ChannelBase {
        &self.base
    }

    fn modify_request(&self, req: &mut UpstreamHttpRequest, api_key: &str) {
        header_set(&mut req.headers, "Authorization", format!("Bearer {api_key}"));
    }

    async fn validate_key(&self, api_key: &str) -> ChannelResult<()> {
        let (path, query) = self.base.validation_endpoint()?;
        let url = self.base.join_upstream(&path, query.as_deref())?;

        // Minimal, low-cost probe payload.
        let payload = json!({
            "model": self.base.group().test_model,
            "messages": [{"role": "user", "content": "hi"}],
        });
        let mut req = UpstreamHttpRequest::post_json(url, Bytes::from(payload.to_string()));
        self.modify_request(&mut req, api_key);
        self.base.apply_header_rules(&mut req.headers, api_key);

        let (status, _headers, body) = self.base.execute(req).await?;
        if (200..300).contains(&status) {
            return Ok(());
        }
        Err(ChannelError::Upstream {
            status,
            reason: parse_upstream_error(&body),
        })
    }

    async fn fetch_models(&self, api_key: &str) -> ChannelResult<Vec<FetchedCapability>> {
        let url = self.base.join_upstream("/v1/models", None)?;
        let mut req = UpstreamHttpRequest::get(url);
        header_set(&mut req.headers, "Content-Type", "application/json");
        self.modify_request(&mut req, api_key);
        self.base.apply_header_rules(&mut req.headers, api_key);

        let (status, _headers, body) = self.base.execute(req).await?;
        if !(200..300).contains(&status) {
            return Err(ChannelError::Upstream {
                status,
                reason: parse_upstream_error(&body),
            });
        }

        let parsed: ModelsResponse = serde_json::from_slice(&body)
            .map_err(|err| ChannelError::UnexpectedResponse(err.to_string()))?;

        let now = OffsetDateTime::now_utc();
        let capabilities = parsed
            .data
            .into_iter()
            .filter(|m| !m.id.is_empty())
            .map(|m| {
                let mut cap = FetchedCapability::new(m.id, now);
                // OpenAI models generally support streaming.
                cap.supports_streaming = true;
                cap.supports_functions =
                    cap.model_id.contains("gpt-4") || cap.model_id.contains("gpt-3.5");
                cap.supports_vision = cap.model_id.contains("vision");
                cap
            })
            .collect();
        Ok(capabilities)
    }
}
