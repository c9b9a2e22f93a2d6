use std::sync::Arc;

use rand::Rng;
use tracing::{info, warn};

use keygate_channel::ChannelFactory;
use keygate_common::{EffectiveConfig, Group};
use keygate_storage::{ApiKeyRecord, KeyStatus, Storage};

use crate::crypto::EncryptionService;
use crate::errors::{CoreError, CoreResult};

/// Outcome of an explicit validation probe.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub reason: Option<String>,
}

/// Per-group credential selection and status transitions.
///
/// The pool does not own keys; it queries them transactionally, so selection
/// needs no cross-request coordination.
pub struct KeyPool {
    storage: Arc<dyn Storage>,
    encryption: Arc<dyn EncryptionService>,
    factory: Arc<ChannelFactory>,
    defaults: EffectiveConfig,
}

impl KeyPool {
    pub fn new(
        storage: Arc<dyn Storage>,
        encryption: Arc<dyn EncryptionService>,
        factory: Arc<ChannelFactory>,
        defaults: EffectiveConfig,
    ) -> Self {
        Self {
            storage,
            encryption,
            factory,
            defaults,
        }
    }

    /// Select one active key uniformly at random and decrypt it.
    ///
    /// Decryption failure surfaces as an error without touching the key's
    /// status: a bad master key says nothing about the credential.
    pub async fn acquire(&self, group: &Group) -> CoreResult<(ApiKeyRecord, String)> {
        let mut keys = self.storage.list_active_keys(group.id).await?;
        if keys.is_empty() {
            return Err(CoreError::NoActiveKeys(group.name.clone()));
        }
        let idx = rand::rng().random_range(0..keys.len());
        let key = keys.swap_remove(idx);
        let plaintext = self.encryption.decrypt(&key.key_value).map_err(|err| {
            warn!(key_id = key.id, group = %group.name, error = %err, "api key decryption failed");
            CoreError::Decryption { key_id: key.id }
        })?;
        Ok((key, plaintext))
    }

    pub async fn mark_invalid(&self, group: &Group, key_id: i64, reason: &str) -> CoreResult<()> {
        self.storage
            .set_key_status(key_id, KeyStatus::Invalid, Some(reason))
            .await?;
        info!(group = %group.name, key_id, reason, "api key marked invalid");
        self.refresh_gauges(group).await?;
        Ok(())
    }

    pub async fn mark_active(&self, group: &Group, key_id: i64) -> CoreResult<()> {
        self.storage
            .set_key_status(key_id, KeyStatus::Active, None)
            .await?;
        info!(group = %group.name, key_id, "api key marked active");
        self.refresh_gauges(group).await?;
        Ok(())
    }

    /// Probe the upstream with this key and persist the verdict.
    pub async fn validate(&self, group: &Group, key: &ApiKeyRecord) -> CoreResult<ValidationOutcome> {
        let plaintext = self.encryption.decrypt(&key.key_value).map_err(|err| {
            warn!(key_id = key.id, group = %group.name, error = %err, "api key decryption failed");
            CoreError::Decryption { key_id: key.id }
        })?;
        let adapter = self.factory.channel(group)?;
        let timeout = group.settings.resolve(&self.defaults).validation_timeout();

        let verdict = match tokio::time::timeout(timeout, adapter.validate_key(&plaintext)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!(
                "validation timed out after {} seconds",
                timeout.as_secs()
            )),
        };

        match verdict {
            Ok(()) => {
                if key.status != KeyStatus::Active {
                    self.mark_active(group, key.id).await?;
                } else {
                    self.refresh_gauges(group).await?;
                }
                keygate_metrics::record_key_validation(&group.name, true);
                Ok(ValidationOutcome {
                    valid: true,
                    reason: None,
                })
            }
            Err(reason) => {
                self.mark_invalid(group, key.id, &reason).await?;
                keygate_metrics::record_key_validation(&group.name, false);
                Ok(ValidationOutcome {
                    valid: false,
                    reason: Some(reason),
                })
            }
        }
    }

    /// Record a rotation and hand out a fresh key.
    pub async fn rotate(&self, group: &Group) -> CoreResult<(ApiKeyRecord, String)> {
        keygate_metrics::record_key_rotation(&group.name);
        self.acquire(group).await
    }

    /// Recount both status gauges for the group.
    pub async fn refresh_gauges(&self, group: &Group) -> CoreResult<()> {
        let counts = self.storage.count_keys_by_status(group.id).await?;
        keygate_metrics::set_active_keys(&group.name, counts.active);
        keygate_metrics::set_invalid_keys(&group.name, counts.invalid);
        Ok(())
    }
}
