use async_trait::async_trait;
use serde::Deserialize;
use time::OffsetDateTime;

use crate::base::ChannelBase;
use crate::client::UpstreamHttpRequest;
use crate::errors::ChannelResult;
use crate::headers::{Headers, header_get};

/// One provider-advertised model, as normalized by `fetch_models`.
///
/// Every fetched row is auto-fetched by construction and stamped with the
/// fetch time.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedCapability {
    pub model_id: String,
    pub model_name: String,
    pub supports_streaming: bool,
    pub supports_vision: bool,
    pub supports_functions: bool,
    pub max_tokens: Option<i64>,
    pub max_input_tokens: Option<i64>,
    pub max_output_tokens: Option<i64>,
    pub is_auto_fetched: bool,
    pub last_fetched_at: OffsetDateTime,
}

impl FetchedCapability {
    pub fn new(model_id: impl Into<String>, fetched_at: OffsetDateTime) -> Self {
        let model_id = model_id.into();
        Self {
            model_name: model_id.clone(),
            model_id,
            supports_streaming: false,
            supports_vision: false,
            supports_functions: false,
            max_tokens: None,
            max_input_tokens: None,
            max_output_tokens: None,
            is_auto_fetched: true,
            last_fetched_at: fetched_at,
        }
    }
}

#[derive(Deserialize)]
struct StreamPayload {
    #[serde(default)]
    stream: bool,
}

#[derive(Deserialize)]
struct ModelPayload {
    #[serde(default)]
    model: String,
}

/// Protocol adapter bound to one group.
///
/// `is_stream_request` and `extract_model` have identical behavior on every
/// channel, so they live here as defaults; auth, probes and catalog parsing
/// are per-variant.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn base(&self) -> &ChannelBase;

    /// Attach the channel's auth material to an outgoing request.
    fn modify_request(&self, req: &mut UpstreamHttpRequest, api_key: &str);

    /// A request is streaming when any signal says so: the `Accept` header
    /// mentions `text/event-stream`, the query carries `stream=true`, or the
    /// JSON body has `"stream": true`. Body parse failures are never fatal.
    fn is_stream_request(&self, headers: &Headers, raw_query: Option<&str>, body: &[u8]) -> bool {
        if header_get(headers, "accept").is_some_and(|v| v.contains("text/event-stream")) {
            return true;
        }
        if let Some(query) = raw_query
            && url::form_urlencoded::parse(query.as_bytes())
                .any(|(k, v)| k == "stream" && v == "true")
        {
            return true;
        }
        serde_json::from_slice::<StreamPayload>(body)
            .map(|p| p.stream)
            .unwrap_or(false)
    }

    /// `model` field of the JSON body; empty string when absent or the body
    /// does not parse.
    fn extract_model(&self, body: &[u8]) -> String {
        serde_json::from_slice::<ModelPayload>(body)
            .map(|p| p.model)
            .unwrap_or_default()
    }

    /// Probe the upstream with a minimal request. `Ok(())` means the key is
    /// valid (any 2xx); the error carries the parsed upstream reason.
    async fn validate_key(&self, api_key: &str) -> ChannelResult<()>;

    /// Fetch the provider's model catalog.
    async fn fetch_models(&self, api_key: &str) -> ChannelResult<Vec<FetchedCapability>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Stream/model extraction are channel-independent; exercise the defaults
    // through a minimal adapter.
    struct Probe(ChannelBase);

    #[async_trait]
    impl ChannelAdapter for Probe {
        fn name(&self) -> &'static str {
            "probe"
        }

        fn base(&self) -> &ChannelBase {
            &self.0
        }

        fn modify_request(&self, _req: &mut UpstreamHttpRequest, _api_key: &str) {}

        async fn validate_key(&self, _api_key: &str) -> ChannelResult<()> {
            Ok(())
        }

        async fn fetch_models(&self, _api_key: &str) -> ChannelResult<Vec<FetchedCapability>> {
            Ok(Vec::new())
        }
    }

    fn probe() -> Probe {
        use keygate_common::{ChannelType, Group, GroupSettings};
        use std::sync::Arc;

        struct NoopClient;
        impl crate::client::UpstreamClient for NoopClient {
            fn send<'a>(
                &'a self,
                _req: UpstreamHttpRequest,
            ) -> std::pin::Pin<
                Box<
                    dyn std::future::Future<
                            Output = Result<
                                crate::client::UpstreamHttpResponse,
                                crate::client::UpstreamFailure,
                            >,
                        > + Send
                        + 'a,
                >,
            > {
                unreachable!()
            }
        }

        Probe(ChannelBase::new(
            "probe",
            Group {
                id: 1,
                name: "g".to_string(),
                display_name: None,
                channel_type: ChannelType::OpenAI,
                upstreams: vec!["https://u.example".to_string()],
                settings: GroupSettings::default(),
                header_rules: Vec::new(),
                validation_endpoint: "/v1/chat/completions".to_string(),
                test_model: "m".to_string(),
            },
            Arc::new(NoopClient),
        ))
    }

    #[test]
    fn stream_detected_from_body_alone() {
        let p = probe();
        let body = br#"{"model":"x","stream":true}"#;
        assert!(p.is_stream_request(&Vec::new(), None, body));
    }

    #[test]
    fn stream_detected_from_accept_header() {
        let p = probe();
        let headers = vec![(
            "Accept".to_string(),
            "text/event-stream, application/json".to_string(),
        )];
        assert!(p.is_stream_request(&headers, None, b"{}"));
    }

    #[test]
    fn stream_detected_from_query() {
        let p = probe();
        assert!(p.is_stream_request(&Vec::new(), Some("stream=true"), b""));
        assert!(!p.is_stream_request(&Vec::new(), Some("stream=false"), b"{}"));
    }

    #[test]
    fn unparseable_body_is_not_streaming() {
        let p = probe();
        assert!(!p.is_stream_request(&Vec::new(), None, b"not json"));
    }

    #[test]
    fn extract_model_defaults_to_empty() {
        let p = probe();
        assert_eq!(p.extract_model(br#"{"model":"gpt-4o"}"#), "gpt-4o");
        assert_eq!(p.extract_model(b"{}"), "");
        assert_eq!(p.extract_model(b"garbage"), "");
    }
}
