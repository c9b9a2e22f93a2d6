//! Shared fixtures: an in-memory `Storage` and a scripted `UpstreamClient`.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use time::OffsetDateTime;

use keygate_channel::{
    FetchedCapability, UpstreamBody, UpstreamClient, UpstreamFailure, UpstreamHttpRequest,
    UpstreamHttpResponse,
};
use keygate_common::{ChannelType, Group, GroupSettings};
use keygate_storage::{
    ApiKeyRecord, KeyStatus, KeyStatusCounts, ModelCapabilityRecord, ModelPatch, NewGroup,
    Storage, StorageResult, apply_patch, merge_fetched,
};

pub fn test_group(id: i64, channel_type: ChannelType) -> Group {
    Group {
        id,
        name: format!("group-{id}"),
        display_name: None,
        channel_type,
        upstreams: vec!["https://upstream.example".to_string()],
        settings: GroupSettings::default(),
        header_rules: Vec::new(),
        validation_endpoint: "/v1/chat/completions".to_string(),
        test_model: "test-model".to_string(),
    }
}

struct Inner {
    groups: Vec<Group>,
    keys: Vec<ApiKeyRecord>,
    models: Vec<ModelCapabilityRecord>,
    next_id: i64,
}

pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                groups: Vec::new(),
                keys: Vec::new(),
                models: Vec::new(),
                next_id: 1,
            }),
        })
    }

    pub fn with_group(group: Group) -> Arc<Self> {
        let storage = Self::new();
        storage.inner.lock().unwrap().groups.push(group);
        storage
    }

    pub fn add_key(&self, group_id: i64, ciphertext: &str) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        let now = OffsetDateTime::now_utc();
        inner.keys.push(ApiKeyRecord {
            id,
            group_id,
            key_value: ciphertext.to_string(),
            status: KeyStatus::Active,
            status_reason: None,
            created_at: now,
            updated_at: now,
        });
        id
    }

    pub fn key_status(&self, id: i64) -> Option<KeyStatus> {
        self.inner
            .lock()
            .unwrap()
            .keys
            .iter()
            .find(|k| k.id == id)
            .map(|k| k.status)
    }

    pub fn set_status(&self, id: i64, status: KeyStatus) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(key) = inner.keys.iter_mut().find(|k| k.id == id) {
            key.status = status;
        }
    }

    pub fn model_count(&self) -> usize {
        self.inner.lock().unwrap().models.len()
    }

    pub fn set_last_fetched(&self, model_id: &str, at: Option<OffsetDateTime>) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(model) = inner.models.iter_mut().find(|m| m.model_id == model_id) {
            model.last_fetched_at = at;
        }
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn sync(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn insert_group(&self, group: &NewGroup) -> StorageResult<i64> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.groups.push(Group {
            id,
            name: group.name.clone(),
            display_name: group.display_name.clone(),
            channel_type: group.channel_type,
            upstreams: group.upstreams.clone(),
            settings: group.config.clone(),
            header_rules: group.header_rules.clone(),
            validation_endpoint: group.validation_endpoint.clone(),
            test_model: group.test_model.clone(),
        });
        Ok(id)
    }

    async fn get_group(&self, id: i64) -> StorageResult<Option<Group>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .groups
            .iter()
            .find(|g| g.id == id)
            .cloned())
    }

    async fn get_group_by_name(&self, name: &str) -> StorageResult<Option<Group>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .groups
            .iter()
            .find(|g| g.name == name)
            .cloned())
    }

    async fn list_groups(&self) -> StorageResult<Vec<Group>> {
        Ok(self.inner.lock().unwrap().groups.clone())
    }

    async fn delete_group(&self, id: i64) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.groups.retain(|g| g.id != id);
        inner.keys.retain(|k| k.group_id != id);
        inner.models.retain(|m| m.group_id != id);
        Ok(())
    }

    async fn insert_keys(&self, group_id: i64, ciphertexts: &[String]) -> StorageResult<Vec<i64>> {
        Ok(ciphertexts
            .iter()
            .map(|ct| self.add_key(group_id, ct))
            .collect())
    }

    async fn get_key(&self, id: i64) -> StorageResult<Option<ApiKeyRecord>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .keys
            .iter()
            .find(|k| k.id == id)
            .cloned())
    }

    async fn list_keys(&self, group_id: i64) -> StorageResult<Vec<ApiKeyRecord>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .keys
            .iter()
            .filter(|k| k.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn list_active_keys(&self, group_id: i64) -> StorageResult<Vec<ApiKeyRecord>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .keys
            .iter()
            .filter(|k| k.group_id == group_id && k.status == KeyStatus::Active)
            .cloned()
            .collect())
    }

    async fn set_key_status(
        &self,
        id: i64,
        status: KeyStatus,
        reason: Option<&str>,
    ) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(key) = inner.keys.iter_mut().find(|k| k.id == id) {
            key.status = status;
            key.status_reason = reason.map(str::to_string);
            key.updated_at = OffsetDateTime::now_utc();
        }
        Ok(())
    }

    async fn count_keys_by_status(&self, group_id: i64) -> StorageResult<KeyStatusCounts> {
        let inner = self.inner.lock().unwrap();
        let mut counts = KeyStatusCounts::default();
        for key in inner.keys.iter().filter(|k| k.group_id == group_id) {
            match key.status {
                KeyStatus::Active => counts.active += 1,
                KeyStatus::Invalid => counts.invalid += 1,
            }
        }
        Ok(counts)
    }

    async fn delete_key(&self, id: i64) -> StorageResult<()> {
        self.inner.lock().unwrap().keys.retain(|k| k.id != id);
        Ok(())
    }

    async fn upsert_capabilities(
        &self,
        group_id: i64,
        fetched: &[FetchedCapability],
    ) -> StorageResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let now = OffsetDateTime::now_utc();
        for cap in fetched {
            let existing = inner
                .models
                .iter_mut()
                .find(|m| m.group_id == group_id && m.model_id == cap.model_id);
            match existing {
                Some(row) => {
                    let merged = merge_fetched(row, cap);
                    *row = merged;
                    row.updated_at = now;
                }
                None => {
                    let id = inner.next_id;
                    inner.next_id += 1;
                    inner.models.push(ModelCapabilityRecord {
                        id,
                        group_id,
                        model_id: cap.model_id.clone(),
                        model_name: cap.model_name.clone(),
                        supports_streaming: cap.supports_streaming,
                        supports_vision: cap.supports_vision,
                        supports_functions: cap.supports_functions,
                        max_tokens: cap.max_tokens,
                        max_input_tokens: cap.max_input_tokens,
                        max_output_tokens: cap.max_output_tokens,
                        custom_capabilities: None,
                        is_auto_fetched: true,
                        last_fetched_at: Some(cap.last_fetched_at),
                        created_at: now,
                        updated_at: now,
                    });
                }
            }
        }
        Ok(())
    }

    async fn list_models(&self, group_id: i64) -> StorageResult<Vec<ModelCapabilityRecord>> {
        let mut rows: Vec<ModelCapabilityRecord> = self
            .inner
            .lock()
            .unwrap()
            .models
            .iter()
            .filter(|m| m.group_id == group_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.model_name.cmp(&b.model_name));
        Ok(rows)
    }

    async fn get_model(&self, id: i64) -> StorageResult<Option<ModelCapabilityRecord>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .models
            .iter()
            .find(|m| m.id == id)
            .cloned())
    }

    async fn patch_model(
        &self,
        id: i64,
        patch: &ModelPatch,
    ) -> StorageResult<Option<ModelCapabilityRecord>> {
        let mut inner = self.inner.lock().unwrap();
        let Some(row) = inner.models.iter_mut().find(|m| m.id == id) else {
            return Ok(None);
        };
        let updated = apply_patch(row, patch);
        *row = updated.clone();
        Ok(Some(updated))
    }

    async fn delete_model(&self, id: i64) -> StorageResult<()> {
        self.inner.lock().unwrap().models.retain(|m| m.id != id);
        Ok(())
    }

    async fn delete_models_by_group(&self, group_id: i64) -> StorageResult<()> {
        self.inner
            .lock()
            .unwrap()
            .models
            .retain(|m| m.group_id != group_id);
        Ok(())
    }

    async fn count_models(&self, group_id: i64) -> StorageResult<i64> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .models
            .iter()
            .filter(|m| m.group_id == group_id)
            .count() as i64)
    }

    async fn count_stale_models(
        &self,
        group_id: i64,
        before: OffsetDateTime,
    ) -> StorageResult<i64> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .models
            .iter()
            .filter(|m| {
                m.group_id == group_id
                    && m.is_auto_fetched
                    && m.last_fetched_at.is_none_or(|at| at < before)
            })
            .count() as i64)
    }
}

/// Replays canned `(status, body)` responses in order and records every
/// outgoing request.
pub struct MockClient {
    requests: Mutex<Vec<UpstreamHttpRequest>>,
    responses: Mutex<VecDeque<Result<(u16, String), UpstreamFailure>>>,
}

impl MockClient {
    pub fn new(responses: Vec<(u16, &str)>) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(
                responses
                    .into_iter()
                    .map(|(status, body)| Ok((status, body.to_string())))
                    .collect(),
            ),
        })
    }

    pub fn with_failure(failure: UpstreamFailure) -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::from([Err(failure)])),
        })
    }

    pub fn sent(&self) -> Vec<UpstreamHttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

impl UpstreamClient for MockClient {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, UpstreamFailure>> + Send + 'a>>
    {
        self.requests.lock().unwrap().push(req);
        let next = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok((200, "{}".to_string())));
        Box::pin(async move {
            match next {
                Ok((status, body)) => Ok(UpstreamHttpResponse {
                    status,
                    headers: Vec::new(),
                    body: UpstreamBody::Bytes(Bytes::from(body)),
                }),
                Err(failure) => Err(failure),
            }
        })
    }
}
