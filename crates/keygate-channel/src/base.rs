use std::sync::Arc;

use url::{Position, Url};

use keygate_common::Group;

use crate::client::{UpstreamClient, UpstreamFailure, UpstreamHttpRequest};
use crate::errors::{ChannelError, ChannelResult};
use crate::headers::{self, Headers};

/// Shared per-group plumbing for every channel adapter: the upstream IO
/// handle, upstream URL resolution, validation-endpoint parsing and
/// header-rule application.
pub struct ChannelBase {
    name: &'static str,
    group: Group,
    client: Arc<dyn UpstreamClient>,
}

impl ChannelBase {
    pub fn new(name: &'static str, group: Group, client: Arc<dyn UpstreamClient>) -> Self {
        Self {
            name,
            group,
            client,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn group(&self) -> &Group {
        &self.group
    }

    pub fn client(&self) -> &Arc<dyn UpstreamClient> {
        &self.client
    }

    /// First entry of the group's upstream list, parsed.
    pub fn upstream_url(&self) -> ChannelResult<Url> {
        let raw = self
            .group
            .first_upstream()
            .ok_or_else(|| ChannelError::NoUpstream(self.group.name.clone()))?;
        Url::parse(raw).map_err(|err| ChannelError::InvalidUpstreamUrl {
            url: raw.to_string(),
            reason: err.to_string(),
        })
    }

    /// Split the group's validation endpoint into `(path, raw_query)`.
    pub fn validation_endpoint(&self) -> ChannelResult<(String, Option<String>)> {
        let raw = self.group.validation_endpoint.trim();
        if raw.is_empty() {
            return Err(ChannelError::InvalidValidationEndpoint(raw.to_string()));
        }
        match raw.split_once('?') {
            Some((path, query)) if !query.is_empty() => {
                Ok((path.to_string(), Some(query.to_string())))
            }
            Some((path, _)) => Ok((path.to_string(), None)),
            None => Ok((raw.to_string(), None)),
        }
    }

    /// Compose the final request URL against the first upstream:
    /// `scheme://authority` + `trim_end(upstream.path, '/')` + `path`,
    /// preserving `query`. Base URLs that already carry a sub-path keep it.
    pub fn join_upstream(&self, path: &str, query: Option<&str>) -> ChannelResult<String> {
        let upstream = self.upstream_url()?;
        let origin = &upstream[..Position::BeforePath];
        let base_path = upstream.path().trim_end_matches('/');
        let mut out = format!("{origin}{base_path}{path}");
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            out.push('?');
            out.push_str(query);
        }
        Ok(out)
    }

    /// Dispatch a buffered (non-stream) request and return status, headers
    /// and body. Transport failures map to `ChannelError::Transport`; HTTP
    /// status classification is left to the caller.
    pub async fn execute(
        &self,
        req: UpstreamHttpRequest,
    ) -> ChannelResult<(u16, Headers, bytes::Bytes)> {
        match self.client.send(req).await {
            Ok(resp) => {
                let status = resp.status;
                let body = resp.body.as_bytes().unwrap_or_default();
                Ok((status, resp.headers, body))
            }
            Err(UpstreamFailure::Http {
                status,
                headers,
                body,
            }) => Ok((status, headers, body)),
            Err(UpstreamFailure::Transport { message, .. }) => {
                Err(ChannelError::Transport(message))
            }
        }
    }

    /// Apply the group's header rules, if any. Runs after channel-native
    /// headers so rules may override them.
    pub fn apply_header_rules(&self, out: &mut Headers, api_key: &str) {
        if self.group.header_rules.is_empty() {
            return;
        }
        headers::apply_header_rules(out, &self.group.header_rules, &self.group, api_key);
    }
}
