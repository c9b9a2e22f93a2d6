use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod group;

pub use group::{ChannelType, Group, HeaderRule, HeaderRuleAction};

/// Final, resolved per-group configuration used when talking to an upstream.
///
/// Merge order: process defaults, then the group's declared overrides.
/// Derived on demand; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub stream_idle_timeout_secs: u64,
    /// How many times the proxy engine may rotate to a fresh key after a
    /// credential-fatal upstream failure before surfacing the error.
    pub max_retries: u32,
    /// Per-call deadline for validation probes and playground requests.
    pub validation_timeout_secs: u64,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            request_timeout_secs: 600,
            stream_idle_timeout_secs: 30,
            max_retries: 3,
            validation_timeout_secs: 30,
        }
    }
}

impl EffectiveConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }
}

/// The override layer a group declares in `groups.config`.
///
/// Every field is optional; unset fields fall through to the process
/// defaults when the effective config is resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_idle_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_timeout_secs: Option<u64>,
}

impl GroupSettings {
    pub fn overlay(&mut self, other: GroupSettings) {
        if other.connect_timeout_secs.is_some() {
            self.connect_timeout_secs = other.connect_timeout_secs;
        }
        if other.request_timeout_secs.is_some() {
            self.request_timeout_secs = other.request_timeout_secs;
        }
        if other.stream_idle_timeout_secs.is_some() {
            self.stream_idle_timeout_secs = other.stream_idle_timeout_secs;
        }
        if other.max_retries.is_some() {
            self.max_retries = other.max_retries;
        }
        if other.validation_timeout_secs.is_some() {
            self.validation_timeout_secs = other.validation_timeout_secs;
        }
    }

    /// Resolve against `defaults`, producing the effective config.
    pub fn resolve(&self, defaults: &EffectiveConfig) -> EffectiveConfig {
        EffectiveConfig {
            connect_timeout_secs: self
                .connect_timeout_secs
                .unwrap_or(defaults.connect_timeout_secs),
            request_timeout_secs: self
                .request_timeout_secs
                .unwrap_or(defaults.request_timeout_secs),
            stream_idle_timeout_secs: self
                .stream_idle_timeout_secs
                .unwrap_or(defaults.stream_idle_timeout_secs),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            validation_timeout_secs: self
                .validation_timeout_secs
                .unwrap_or(defaults.validation_timeout_secs),
        }
    }
}

impl From<EffectiveConfig> for GroupSettings {
    fn from(value: EffectiveConfig) -> Self {
        Self {
            connect_timeout_secs: Some(value.connect_timeout_secs),
            request_timeout_secs: Some(value.request_timeout_secs),
            stream_idle_timeout_secs: Some(value.stream_idle_timeout_secs),
            max_retries: Some(value.max_retries),
            validation_timeout_secs: Some(value.validation_timeout_secs),
        }
    }
}
