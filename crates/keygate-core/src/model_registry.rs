use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::{debug, info};

use keygate_channel::ChannelFactory;
use keygate_common::Group;
use keygate_storage::{ModelCapabilityRecord, ModelPatch, Storage};

use crate::errors::{CoreError, CoreResult};

/// Cache of provider-advertised models with staleness-based refresh and
/// manual capability overrides.
pub struct ModelRegistry {
    storage: Arc<dyn Storage>,
    factory: Arc<ChannelFactory>,
}

impl ModelRegistry {
    pub fn new(storage: Arc<dyn Storage>, factory: Arc<ChannelFactory>) -> Self {
        Self { storage, factory }
    }

    /// Fetch the provider catalog and upsert it in one transaction.
    ///
    /// Fails when the provider returns an empty list; an empty catalog is
    /// far more likely a broken call than a provider with no models.
    pub async fn fetch_and_store(&self, group: &Group, api_key: &str) -> CoreResult<()> {
        let adapter = self.factory.channel(group)?;
        let fetched = adapter.fetch_models(api_key).await?;
        if fetched.is_empty() {
            return Err(CoreError::EmptyModelList);
        }
        self.storage.upsert_capabilities(group.id, &fetched).await?;
        info!(group = %group.name, count = fetched.len(), "model capabilities refreshed");
        Ok(())
    }

    pub async fn list(&self, group_id: i64) -> CoreResult<Vec<ModelCapabilityRecord>> {
        Ok(self.storage.list_models(group_id).await?)
    }

    pub async fn get(&self, id: i64) -> CoreResult<Option<ModelCapabilityRecord>> {
        Ok(self.storage.get_model(id).await?)
    }

    pub async fn patch(
        &self,
        id: i64,
        patch: &ModelPatch,
    ) -> CoreResult<Option<ModelCapabilityRecord>> {
        Ok(self.storage.patch_model(id, patch).await?)
    }

    pub async fn delete(&self, id: i64) -> CoreResult<()> {
        Ok(self.storage.delete_model(id).await?)
    }

    pub async fn delete_by_group(&self, group_id: i64) -> CoreResult<()> {
        Ok(self.storage.delete_models_by_group(group_id).await?)
    }

    /// Refresh iff the group has a stale (or never-stamped) auto-fetched row,
    /// or no rows at all. Returns whether a fetch ran.
    pub async fn refresh_stale(
        &self,
        group: &Group,
        api_key: &str,
        stale_duration: Duration,
    ) -> CoreResult<bool> {
        let before = OffsetDateTime::now_utc() - stale_duration;
        let stale = self.storage.count_stale_models(group.id, before).await?;
        if stale > 0 {
            self.fetch_and_store(group, api_key).await?;
            return Ok(true);
        }

        let total = self.storage.count_models(group.id).await?;
        if total == 0 {
            self.fetch_and_store(group, api_key).await?;
            return Ok(true);
        }

        debug!(group = %group.name, total, "model refresh skipped, nothing stale");
        Ok(false)
    }
}
