//! Generated image entity: one row per successful, charged generation

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "generated_images")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    
    pub user_id: Uuid,
    
    pub team_id: Option<Uuid>,
    
    #[sea_orm(column_type = "Text")]
    pub prompt: String,
    
    #[sea_orm(column_type = "Text")]
    pub image_url: String,
    
    /// image, video or clothing_application
    #[sea_orm(column_type = "Text")]
    pub kind: String,
    
    /// Adapter that produced the URL (including fallbacks)
    #[sea_orm(column_type = "Text")]
    pub processor: String,
    
    pub credits_charged: i32,
    
    /// Client key; unique per user
    #[sea_orm(column_type = "Text", nullable)]
    pub idempotency_key: Option<String>,
    
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
