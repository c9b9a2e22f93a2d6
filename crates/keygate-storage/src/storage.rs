use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

use keygate_channel::FetchedCapability;
use keygate_common::{ChannelType, Group, GroupSettings, HeaderRule};

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    Active,
    Invalid,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Invalid => "invalid",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(KeyStatus::Active),
            "invalid" => Some(KeyStatus::Invalid),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyRecord {
    pub id: i64,
    pub group_id: i64,
    /// Ciphertext; never leaves the storage/key-pool boundary decrypted.
    #[serde(skip_serializing)]
    pub key_value: String,
    pub status: KeyStatus,
    pub status_reason: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct KeyStatusCounts {
    pub active: i64,
    pub invalid: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelCapabilityRecord {
    pub id: i64,
    pub group_id: i64,
    pub model_id: String,
    pub model_name: String,
    pub supports_streaming: bool,
    pub supports_vision: bool,
    pub supports_functions: bool,
    pub max_tokens: Option<i64>,
    pub max_input_tokens: Option<i64>,
    pub max_output_tokens: Option<i64>,
    pub custom_capabilities: Option<JsonValue>,
    pub is_auto_fetched: bool,
    pub last_fetched_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Partial update for a capability row.
///
/// The `max_*` fields are tri-state: absent means "unchanged", `null` means
/// "clear", a number means "set". `double_option` keeps the distinction
/// through deserialization; unrecognized payload fields are simply ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelPatch {
    #[serde(default)]
    pub supports_streaming: Option<bool>,
    #[serde(default)]
    pub supports_vision: Option<bool>,
    #[serde(default)]
    pub supports_functions: Option<bool>,
    #[serde(default, with = "serde_with::rust::double_option")]
    pub max_tokens: Option<Option<i64>>,
    #[serde(default, with = "serde_with::rust::double_option")]
    pub max_input_tokens: Option<Option<i64>>,
    #[serde(default, with = "serde_with::rust::double_option")]
    pub max_output_tokens: Option<Option<i64>>,
    #[serde(default)]
    pub custom_capabilities: Option<JsonValue>,
}

impl ModelPatch {
    pub fn is_empty(&self) -> bool {
        self.supports_streaming.is_none()
            && self.supports_vision.is_none()
            && self.supports_functions.is_none()
            && self.max_tokens.is_none()
            && self.max_input_tokens.is_none()
            && self.max_output_tokens.is_none()
            && self.custom_capabilities.is_none()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewGroup {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub channel_type: ChannelType,
    pub upstreams: Vec<String>,
    #[serde(default)]
    pub config: GroupSettings,
    #[serde(default)]
    pub header_rules: Vec<HeaderRule>,
    #[serde(default = "default_validation_endpoint")]
    pub validation_endpoint: String,
    pub test_model: String,
}

fn default_validation_endpoint() -> String {
    "/v1/chat/completions".to_string()
}

/// Persistence seam. Reads and writes are short transactions; the capability
/// upsert batch is all-or-nothing.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Entity-first schema sync, run once at bootstrap.
    async fn sync(&self) -> StorageResult<()>;

    // Groups
    async fn insert_group(&self, group: &NewGroup) -> StorageResult<i64>;
    async fn get_group(&self, id: i64) -> StorageResult<Option<Group>>;
    async fn get_group_by_name(&self, name: &str) -> StorageResult<Option<Group>>;
    async fn list_groups(&self) -> StorageResult<Vec<Group>>;
    /// Cascades to the group's api keys and model capabilities.
    async fn delete_group(&self, id: i64) -> StorageResult<()>;

    // API keys
    /// Bulk insert; keys are created active.
    async fn insert_keys(&self, group_id: i64, ciphertexts: &[String]) -> StorageResult<Vec<i64>>;
    async fn get_key(&self, id: i64) -> StorageResult<Option<ApiKeyRecord>>;
    async fn list_keys(&self, group_id: i64) -> StorageResult<Vec<ApiKeyRecord>>;
    async fn list_active_keys(&self, group_id: i64) -> StorageResult<Vec<ApiKeyRecord>>;
    async fn set_key_status(
        &self,
        id: i64,
        status: KeyStatus,
        reason: Option<&str>,
    ) -> StorageResult<()>;
    async fn count_keys_by_status(&self, group_id: i64) -> StorageResult<KeyStatusCounts>;
    async fn delete_key(&self, id: i64) -> StorageResult<()>;

    // Model capabilities
    /// Transactional upsert keyed on `(group_id, model_id)`. Updates touch
    /// the name, the `supports_*` flags, the auto-fetch bookkeeping and only
    /// non-null optional limits; `custom_capabilities` is never written.
    async fn upsert_capabilities(
        &self,
        group_id: i64,
        fetched: &[FetchedCapability],
    ) -> StorageResult<()>;
    /// Ordered by `model_name` ascending.
    async fn list_models(&self, group_id: i64) -> StorageResult<Vec<ModelCapabilityRecord>>;
    async fn get_model(&self, id: i64) -> StorageResult<Option<ModelCapabilityRecord>>;
    async fn patch_model(
        &self,
        id: i64,
        patch: &ModelPatch,
    ) -> StorageResult<Option<ModelCapabilityRecord>>;
    async fn delete_model(&self, id: i64) -> StorageResult<()>;
    async fn delete_models_by_group(&self, group_id: i64) -> StorageResult<()>;
    async fn count_models(&self, group_id: i64) -> StorageResult<i64>;
    /// Auto-fetched rows whose `last_fetched_at` is null or before `before`.
    async fn count_stale_models(
        &self,
        group_id: i64,
        before: OffsetDateTime,
    ) -> StorageResult<i64>;
}
