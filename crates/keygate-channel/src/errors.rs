pub type ChannelResult<T> = Result<T, ChannelError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    #[error("unknown channel type: {0}")]
    UnknownChannelType(String),
    #[error("group {0} has no upstream configured")]
    NoUpstream(String),
    #[error("invalid upstream url {url}: {reason}")]
    InvalidUpstreamUrl { url: String, reason: String },
    #[error("invalid validation endpoint: {0}")]
    InvalidValidationEndpoint(String),
    /// Non-2xx answer from the provider; `reason` comes from the shared
    /// upstream-error parser.
    #[error("[status {status}] {reason}")]
    Upstream { status: u16, reason: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected response shape: {0}")]
    UnexpectedResponse(String),
}
