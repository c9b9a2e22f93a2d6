use serde::{Deserialize, Serialize};

use crate::GroupSettings;

/// Upstream API family a group speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    OpenAI,
    Gemini,
    Anthropic,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::OpenAI => "openai",
            ChannelType::Gemini => "gemini",
            ChannelType::Anthropic => "anthropic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "openai" => Some(ChannelType::OpenAI),
            "gemini" => Some(ChannelType::Gemini),
            "anthropic" => Some(ChannelType::Anthropic),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderRuleAction {
    Set,
    Remove,
}

/// One ordered header rewrite rule.
///
/// `value` supports `${api_key}`, `${group_name}` and `${group_id}`
/// substitution; rules run after the channel-native headers so they can
/// override them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRule {
    pub action: HeaderRuleAction,
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// A tenant scope: upstreams, credentials, header rules and a channel type.
///
/// This is the domain view shared across crates; the storage layer maps its
/// rows into it. `upstreams` must be non-empty for any group used in
/// proxying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub display_name: Option<String>,
    pub channel_type: ChannelType,
    pub upstreams: Vec<String>,
    #[serde(default)]
    pub settings: GroupSettings,
    #[serde(default)]
    pub header_rules: Vec<HeaderRule>,
    pub validation_endpoint: String,
    pub test_model: String,
}

impl Group {
    pub fn first_upstream(&self) -> Option<&str> {
        self.upstreams.first().map(String::as_str)
    }
}
