use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, Condition, Database, DatabaseBackend,
    DatabaseConnection, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    Schema, TransactionTrait,
};
use time::OffsetDateTime;

use async_trait::async_trait;
use keygate_channel::FetchedCapability;
use keygate_common::{ChannelType, Group, GroupSettings, HeaderRule};

use crate::entities;
use crate::merge::{apply_patch, merge_fetched};
use crate::storage::{
    ApiKeyRecord, KeyStatus, KeyStatusCounts, ModelCapabilityRecord, ModelPatch, NewGroup,
    Storage, StorageError, StorageResult,
};

#[derive(Clone)]
pub struct SeaOrmStorage {
    db: DatabaseConnection,
}

impl SeaOrmStorage {
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        let db = Database::connect(dsn).await?;
        // Sqlite needs this for cascade deletes to fire.
        if db.get_database_backend() == DatabaseBackend::Sqlite {
            db.execute_unprepared("PRAGMA foreign_keys = ON").await?;
        }
        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn group_from_model(m: entities::groups::Model) -> StorageResult<Group> {
    let channel_type = ChannelType::parse(&m.channel_type).ok_or_else(|| {
        StorageError::Corrupt(format!(
            "group {} has unknown channel_type {:?}",
            m.id, m.channel_type
        ))
    })?;
    let upstreams: Vec<String> = serde_json::from_value(m.upstreams)?;
    let settings: GroupSettings = serde_json::from_value(m.config)?;
    let header_rules: Vec<HeaderRule> = serde_json::from_value(m.header_rules)?;
    Ok(Group {
        id: m.id,
        name: m.name,
        display_name: m.display_name,
        channel_type,
        upstreams,
        settings,
        header_rules,
        validation_endpoint: m.validation_endpoint,
        test_model: m.test_model,
    })
}

fn key_from_model(m: entities::api_keys::Model) -> StorageResult<ApiKeyRecord> {
    let status = KeyStatus::parse(&m.status).ok_or_else(|| {
        StorageError::Corrupt(format!("api key {} has unknown status {:?}", m.id, m.status))
    })?;
    Ok(ApiKeyRecord {
        id: m.id,
        group_id: m.group_id,
        key_value: m.key_value,
        status,
        status_reason: m.status_reason,
        created_at: m.created_at,
        updated_at: m.updated_at,
    })
}

fn capability_from_model(m: entities::model_capabilities::Model) -> ModelCapabilityRecord {
    ModelCapabilityRecord {
        id: m.id,
        group_id: m.group_id,
        model_id: m.model_id,
        model_name: m.model_name,
        supports_streaming: m.supports_streaming,
        supports_vision: m.supports_vision,
        supports_functions: m.supports_functions,
        max_tokens: m.max_tokens,
        max_input_tokens: m.max_input_tokens,
        max_output_tokens: m.max_output_tokens,
        custom_capabilities: m.custom_capabilities,
        is_auto_fetched: m.is_auto_fetched,
        last_fetched_at: m.last_fetched_at,
        created_at: m.created_at,
        updated_at: m.updated_at,
    }
}

#[async_trait]
impl Storage for SeaOrmStorage {
    async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Groups)
            .register(entities::ApiKeys)
            .register(entities::ModelCapabilities)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    async fn insert_group(&self, group: &NewGroup) -> StorageResult<i64> {
        let now = OffsetDateTime::now_utc();
        let active = entities::groups::ActiveModel {
            id: ActiveValue::NotSet,
            name: ActiveValue::Set(group.name.clone()),
            display_name: ActiveValue::Set(group.display_name.clone()),
            channel_type: ActiveValue::Set(group.channel_type.as_str().to_string()),
            upstreams: ActiveValue::Set(serde_json::to_value(&group.upstreams)?),
            config: ActiveValue::Set(serde_json::to_value(&group.config)?),
            header_rules: ActiveValue::Set(serde_json::to_value(&group.header_rules)?),
            validation_endpoint: ActiveValue::Set(group.validation_endpoint.clone()),
            test_model: ActiveValue::Set(group.test_model.clone()),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
        };
        let inserted = entities::Groups::insert(active).exec(&self.db).await?;
        Ok(inserted.last_insert_id)
    }

    async fn get_group(&self, id: i64) -> StorageResult<Option<Group>> {
        entities::Groups::find_by_id(id)
            .one(&self.db)
            .await?
            .map(group_from_model)
            .transpose()
    }

    async fn get_group_by_name(&self, name: &str) -> StorageResult<Option<Group>> {
        entities::Groups::find()
            .filter(entities::groups::Column::Name.eq(name))
            .one(&self.db)
            .await?
            .map(group_from_model)
            .transpose()
    }

    async fn list_groups(&self) -> StorageResult<Vec<Group>> {
        entities::Groups::find()
            .order_by_asc(entities::groups::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(group_from_model)
            .collect()
    }

    async fn delete_group(&self, id: i64) -> StorageResult<()> {
        entities::Groups::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }

    async fn insert_keys(&self, group_id: i64, ciphertexts: &[String]) -> StorageResult<Vec<i64>> {
        let now = OffsetDateTime::now_utc();
        let txn = self.db.begin().await?;
        let mut ids = Vec::with_capacity(ciphertexts.len());
        for ciphertext in ciphertexts {
            let active = entities::api_keys::ActiveModel {
                id: ActiveValue::NotSet,
                group_id: ActiveValue::Set(group_id),
                key_value: ActiveValue::Set(ciphertext.clone()),
                status: ActiveValue::Set(KeyStatus::Active.as_str().to_string()),
                status_reason: ActiveValue::Set(None),
                created_at: ActiveValue::Set(now),
                updated_at: ActiveValue::Set(now),
            };
            let inserted = entities::ApiKeys::insert(active).exec(&txn).await?;
            ids.push(inserted.last_insert_id);
        }
        txn.commit().await?;
        Ok(ids)
    }

    async fn get_key(&self, id: i64) -> StorageResult<Option<ApiKeyRecord>> {
        entities::ApiKeys::find_by_id(id)
            .one(&self.db)
            .await?
            .map(key_from_model)
            .transpose()
    }

    async fn list_keys(&self, group_id: i64) -> StorageResult<Vec<ApiKeyRecord>> {
        entities::ApiKeys::find()
            .filter(entities::api_keys::Column::GroupId.eq(group_id))
            .order_by_asc(entities::api_keys::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(key_from_model)
            .collect()
    }

    async fn list_active_keys(&self, group_id: i64) -> StorageResult<Vec<ApiKeyRecord>> {
        entities::ApiKeys::find()
            .filter(entities::api_keys::Column::GroupId.eq(group_id))
            .filter(entities::api_keys::Column::Status.eq(KeyStatus::Active.as_str()))
            .order_by_asc(entities::api_keys::Column::Id)
            .all(&self.db)
            .await?
            .into_iter()
            .map(key_from_model)
            .collect()
    }

    async fn set_key_status(
        &self,
        id: i64,
        status: KeyStatus,
        reason: Option<&str>,
    ) -> StorageResult<()> {
        let Some(row) = entities::ApiKeys::find_by_id(id).one(&self.db).await? else {
            return Ok(());
        };
        let mut active: entities::api_keys::ActiveModel = row.into();
        active.status = ActiveValue::Set(status.as_str().to_string());
        active.status_reason = ActiveValue::Set(reason.map(str::to_string));
        active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
        active.update(&self.db).await?;
        Ok(())
    }

    async fn count_keys_by_status(&self, group_id: i64) -> StorageResult<KeyStatusCounts> {
        let active = entities::ApiKeys::find()
            .filter(entities::api_keys::Column::GroupId.eq(group_id))
            .filter(entities::api_keys::Column::Status.eq(KeyStatus::Active.as_str()))
            .count(&self.db)
            .await?;
        let invalid = entities::ApiKeys::find()
            .filter(entities::api_keys::Column::GroupId.eq(group_id))
            .filter(entities::api_keys::Column::Status.eq(KeyStatus::Invalid.as_str()))
            .count(&self.db)
            .await?;
        Ok(KeyStatusCounts {
            active: active as i64,
            invalid: invalid as i64,
        })
    }

    async fn delete_key(&self, id: i64) -> StorageResult<()> {
        entities::ApiKeys::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }

    async fn upsert_capabilities(
        &self,
        group_id: i64,
        fetched: &[FetchedCapability],
    ) -> StorageResult<()> {
        let now = OffsetDateTime::now_utc();
        let txn = self.db.begin().await?;
        for cap in fetched {
            let existing = entities::ModelCapabilities::find()
                .filter(entities::model_capabilities::Column::GroupId.eq(group_id))
                .filter(entities::model_capabilities::Column::ModelId.eq(cap.model_id.as_str()))
                .one(&txn)
                .await?;

            match existing {
                Some(row) => {
                    let merged = merge_fetched(&capability_from_model(row.clone()), cap);
                    let mut active: entities::model_capabilities::ActiveModel = row.into();
                    active.model_name = ActiveValue::Set(merged.model_name);
                    active.supports_streaming = ActiveValue::Set(merged.supports_streaming);
                    active.supports_vision = ActiveValue::Set(merged.supports_vision);
                    active.supports_functions = ActiveValue::Set(merged.supports_functions);
                    active.max_tokens = ActiveValue::Set(merged.max_tokens);
                    active.max_input_tokens = ActiveValue::Set(merged.max_input_tokens);
                    active.max_output_tokens = ActiveValue::Set(merged.max_output_tokens);
                    active.is_auto_fetched = ActiveValue::Set(true);
                    active.last_fetched_at = ActiveValue::Set(merged.last_fetched_at);
                    active.updated_at = ActiveValue::Set(now);
                    active.update(&txn).await?;
                }
                None => {
                    let active = entities::model_capabilities::ActiveModel {
                        id: ActiveValue::NotSet,
                        group_id: ActiveValue::Set(group_id),
                        model_id: ActiveValue::Set(cap.model_id.clone()),
                        model_name: ActiveValue::Set(cap.model_name.clone()),
                        supports_streaming: ActiveValue::Set(cap.supports_streaming),
                        supports_vision: ActiveValue::Set(cap.supports_vision),
                        supports_functions: ActiveValue::Set(cap.supports_functions),
                        max_tokens: ActiveValue::Set(cap.max_tokens),
                        max_input_tokens: ActiveValue::Set(cap.max_input_tokens),
                        max_output_tokens: ActiveValue::Set(cap.max_output_tokens),
                        custom_capabilities: ActiveValue::Set(None),
                        is_auto_fetched: ActiveValue::Set(true),
                        last_fetched_at: ActiveValue::Set(Some(cap.last_fetched_at)),
                        created_at: ActiveValue::Set(now),
                        updated_at: ActiveValue::Set(now),
                    };
                    entities::ModelCapabilities::insert(active).exec(&txn).await?;
                }
            }
        }
        txn.commit().await?;
        Ok(())
    }

    async fn list_models(&self, group_id: i64) -> StorageResult<Vec<ModelCapabilityRecord>> {
        let rows = entities::ModelCapabilities::find()
            .filter(entities::model_capabilities::Column::GroupId.eq(group_id))
            .order_by_asc(entities::model_capabilities::Column::ModelName)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(capability_from_model).collect())
    }

    async fn get_model(&self, id: i64) -> StorageResult<Option<ModelCapabilityRecord>> {
        Ok(entities::ModelCapabilities::find_by_id(id)
            .one(&self.db)
            .await?
            .map(capability_from_model))
    }

    async fn patch_model(
        &self,
        id: i64,
        patch: &ModelPatch,
    ) -> StorageResult<Option<ModelCapabilityRecord>> {
        let Some(row) = entities::ModelCapabilities::find_by_id(id).one(&self.db).await? else {
            return Ok(None);
        };
        if patch.is_empty() {
            return Ok(Some(capability_from_model(row)));
        }
        let updated = apply_patch(&capability_from_model(row.clone()), patch);
        let mut active: entities::model_capabilities::ActiveModel = row.into();
        active.supports_streaming = ActiveValue::Set(updated.supports_streaming);
        active.supports_vision = ActiveValue::Set(updated.supports_vision);
        active.supports_functions = ActiveValue::Set(updated.supports_functions);
        active.max_tokens = ActiveValue::Set(updated.max_tokens);
        active.max_input_tokens = ActiveValue::Set(updated.max_input_tokens);
        active.max_output_tokens = ActiveValue::Set(updated.max_output_tokens);
        active.custom_capabilities = ActiveValue::Set(updated.custom_capabilities.clone());
        active.updated_at = ActiveValue::Set(OffsetDateTime::now_utc());
        let model = active.update(&self.db).await?;
        Ok(Some(capability_from_model(model)))
    }

    async fn delete_model(&self, id: i64) -> StorageResult<()> {
        entities::ModelCapabilities::delete_by_id(id)
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn delete_models_by_group(&self, group_id: i64) -> StorageResult<()> {
        entities::ModelCapabilities::delete_many()
            .filter(entities::model_capabilities::Column::GroupId.eq(group_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn count_models(&self, group_id: i64) -> StorageResult<i64> {
        let count = entities::ModelCapabilities::find()
            .filter(entities::model_capabilities::Column::GroupId.eq(group_id))
            .count(&self.db)
            .await?;
        Ok(count as i64)
    }

    async fn count_stale_models(
        &self,
        group_id: i64,
        before: OffsetDateTime,
    ) -> StorageResult<i64> {
        let count = entities::ModelCapabilities::find()
            .filter(entities::model_capabilities::Column::GroupId.eq(group_id))
            .filter(entities::model_capabilities::Column::IsAutoFetched.eq(true))
            .filter(
                Condition::any()
                    .add(entities::model_capabilities::Column::LastFetchedAt.is_null())
                    .add(entities::model_capabilities::Column::LastFetchedAt.lt(before)),
            )
            .count(&self.db)
            .await?;
        Ok(count as i64)
    }
}
