//! User account entity (credit balance + package tier)

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    
    #[sea_orm(column_type = "Text", unique)]
    pub email: String,
    
    /// Spendable balance; only the conditional decrement in the
    /// repository lowers it
    pub credits: i32,
    
    #[sea_orm(column_type = "Text")]
    pub package_tier: String,
    
    pub created_at: DateTimeWithTimeZone,
    
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::generated_image::Entity")]
    GeneratedImages,
    
    #[sea_orm(has_many = "super::asset::Entity")]
    Assets,
    
    #[sea_orm(has_many = "super::generation_job::Entity")]
    GenerationJobs,
}

impl Related<super::generated_image::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::GeneratedImages.def()
    }
}

impl Related<super::asset::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Assets.def()
    }
}

impl Related<super::generation_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::GenerationJobs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
