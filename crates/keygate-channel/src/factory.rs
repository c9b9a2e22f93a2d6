use std::collections::HashMap;
use std::sync::Arc;

use keygate_common::Group;

use crate::adapter::ChannelAdapter;
use crate::anthropic::AnthropicChannel;
use crate::base::ChannelBase;
use crate::client::UpstreamClient;
use crate::errors::{ChannelError, ChannelResult};
use crate::gemini::GeminiChannel;
use crate::openai::OpenAIChannel;

type AdapterCtor = Arc<dyn Fn(ChannelBase) -> Box<dyn ChannelAdapter> + Send + Sync>;

/// Registry mapping channel-type name to an adapter constructor.
///
/// Adapters are cheap; `channel()` builds a freshly-bound adapter per call
/// rather than caching.
pub struct ChannelFactory {
    client: Arc<dyn UpstreamClient>,
    ctors: HashMap<String, AdapterCtor>,
}

impl ChannelFactory {
    pub fn new(client: Arc<dyn UpstreamClient>) -> Self {
        Self {
            client,
            ctors: HashMap::new(),
        }
    }

    /// Factory with the three built-in channels registered.
    pub fn with_builtins(client: Arc<dyn UpstreamClient>) -> Self {
        let mut factory = Self::new(client);
        factory.register("openai", |base| Box::new(OpenAIChannel::new(base)));
        factory.register("gemini", |base| Box::new(GeminiChannel::new(base)));
        factory.register("anthropic", |base| Box::new(AnthropicChannel::new(base)));
        factory
    }

    pub fn register<F>(&mut self, name: impl Into<String>, ctor: F)
    where
        F: Fn(ChannelBase) -> Box<dyn ChannelAdapter> + Send + Sync + 'static,
    {
        self.ctors.insert(name.into(), Arc::new(ctor));
    }

    /// Build an adapter bound to `group`.
    pub fn channel(&self, group: &Group) -> ChannelResult<Box<dyn ChannelAdapter>> {
        let name = group.channel_type.as_str();
        let ctor = self
            .ctors
            .get(name)
            .ok_or_else(|| ChannelError::UnknownChannelType(name.to_string()))?;
        let base = ChannelBase::new(name, group.clone(), self.client.clone());
        Ok(ctor(base))
    }
}
