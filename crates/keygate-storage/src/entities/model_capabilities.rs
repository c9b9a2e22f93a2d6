use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "model_capabilities")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "group_model")]
    pub group_id: i64,
    #[sea_orm(unique_key = "group_model")]
    pub model_id: String,
    pub model_name: String,
    pub supports_streaming: bool,
    pub supports_vision: bool,
    pub supports_functions: bool,
    pub max_tokens: Option<i64>,
    pub max_input_tokens: Option<i64>,
    pub max_output_tokens: Option<i64>,
    /// Operator-owned extension map; auto-refresh never writes it.
    pub custom_capabilities: Option<Json>,
    pub is_auto_fetched: bool,
    pub last_fetched_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "group_id", to = "id", on_delete = "Cascade")]
    pub group: HasOne<super::groups::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
