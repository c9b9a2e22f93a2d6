//! Channel abstractions for keygate.
//!
//! This crate intentionally does **not** depend on axum or any concrete HTTP
//! client. Adapters build `UpstreamHttpRequest`s and hand them to the shared
//! `UpstreamClient`, whose concrete implementation lives in a higher layer.

pub mod adapter;
pub mod anthropic;
pub mod base;
pub mod client;
pub mod errors;
pub mod factory;
pub mod gemini;
pub mod headers;
pub mod openai;
pub mod upstream_error;

pub use adapter::{ChannelAdapter, FetchedCapability};
pub use base::ChannelBase;
pub use client::{
    ByteStream, HttpMethod, UpstreamBody, UpstreamClient, UpstreamFailure, UpstreamHttpRequest,
    UpstreamHttpResponse, UpstreamTransportErrorKind,
};
pub use errors::{ChannelError, ChannelResult};
pub use factory::ChannelFactory;
pub use headers::{Headers, apply_header_rules, header_get, header_remove, header_set};
pub use upstream_error::parse_upstream_error;
