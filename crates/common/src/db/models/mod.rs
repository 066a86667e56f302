//! SeaORM entity models
//!
//! Database entities for Ginchy

mod user;
mod generated_image;
mod asset;
mod generation_job;

pub use user::{
    Entity as UserEntity,
    Model as User,
    ActiveModel as UserActiveModel,
    Column as UserColumn,
};

pub use generated_image::{
    Entity as GeneratedImageEntity,
    Model as GeneratedImage,
    ActiveModel as GeneratedImageActiveModel,
    Column as GeneratedImageColumn,
};

pub use asset::{
    Entity as AssetEntity,
    Model as Asset,
    ActiveModel as AssetActiveModel,
    Column as AssetColumn,
    CHARACTER_ASSET_TYPE,
};

pub use generation_job::{
    Entity as GenerationJobEntity,
    Model as GenerationJob,
    ActiveModel as GenerationJobActiveModel,
    Column as GenerationJobColumn,
    JobStatus,
};
