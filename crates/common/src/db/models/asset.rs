//! Asset entity (characters and other uploaded references)

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// `asset_type` value for trained characters
pub const CHARACTER_ASSET_TYPE: &str = "characters";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "assets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    
    pub user_id: Uuid,
    
    pub team_id: Option<Uuid>,
    
    #[sea_orm(column_type = "Text")]
    pub asset_type: String,
    
    #[sea_orm(column_type = "Text")]
    pub name: String,
    
    #[sea_orm(column_type = "Text")]
    pub url: String,
    
    /// Type-specific payload as JSONB; see `characters::CharacterMetadata`
    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: serde_json::Value,
    
    pub created_at: DateTimeWithTimeZone,
    
    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn is_character(&self) -> bool {
        self.asset_type == CHARACTER_ASSET_TYPE
    }
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
