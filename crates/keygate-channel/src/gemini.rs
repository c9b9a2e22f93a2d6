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

pub const CHANNEL_TYPE: &str = "gemini";

/// Gemini channel. Auth is carried as a `key` query parameter, never a
/// header.
pub struct GeminiChannel {
    base: ChannelBase,
}

impl GeminiChannel {
    pub fn new(base: ChannelBase) -> Self {
        Self { base }
    }
}

#[derive(Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelEntry {
    #[serde(default)]
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    input_token_limit: Option<i64>,
    #[serde(default)]
    output_token_limit: Option<i64>,
}

fn append_key_param(url: &mut String, api_key: &str) {
    if url.contains('?') {
        url.push_str("&key=");
    } else {
        url.push_str("?key=");
    }
    url.push_str(api_key);
}

#[async_trait]
impl ChannelAdapter for GeminiChannel {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn base(&self) -> &ChannelBase {
        &self.base
    }

    fn modify_request(&self, req: &mut UpstreamHttpRequest, api_key: &str) {
        append_key_param(&mut req.url, api_key);
    }

    async fn validate_key(&self, api_key: &str) -> ChannelResult<()> {
        let path = format!(
            "/v1beta/models/{}:generateContent",
            self.base.group().test_model
        );
        let url = self
            .base
            .join_upstream(&path, Some(&format!("key={api_key}")))?;

        let payload = json!({
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
        });
        let mut req = UpstreamHttpRequest::post_json(url, Bytes::from(payload.to_string()));
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
        let url = self
            .base
            .join_upstream("/v1beta/models", Some(&format!("key={api_key}&pageSize=1000")))?;
        let mut req = UpstreamHttpRequest::get(url);
        header_set(&mut req.headers, "Content-Type", "application/json");
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
            .models
            .into_iter()
            .filter(|m| !m.name.is_empty())
            .map(|m| {
                // Catalog names come back as "models/<id>".
                let id = m.name.strip_prefix("models/").unwrap_or(&m.name).to_string();
                let mut cap = FetchedCapability::new(id, now);
                if let Some(display_name) = m.display_name.filter(|n| !n.is_empty()) {
                    cap.model_name = display_name;
                }
                cap.supports_streaming = true;
                cap.max_input_tokens = m.input_token_limit;
                cap.max_output_tokens = m.output_token_limit;
                cap
            })
            .collect();
        Ok(capabilities)
    }
}
