use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "groups")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "group_name")]
    pub name: String,
    pub display_name: Option<String>,
    pub channel_type: String,
    /// JSON array of absolute base URLs, first entry wins.
    pub upstreams: Json,
    /// Tenant override layer (`GroupSettings`).
    pub config: Json,
    /// Ordered header rewrite rules.
    pub header_rules: Json,
    pub validation_endpoint: String,
    pub test_model: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(has_many)]
    pub api_keys: HasMany<super::api_keys::Entity>,
    #[sea_orm(has_many)]
    pub model_capabilities: HasMany<super::model_capabilities::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
