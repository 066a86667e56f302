//! API handlers module

pub mod account;
pub mod assets;
pub mod characters;
pub mod creations;
pub mod generate;
pub mod health;
pub mod jobs;
pub mod packages;
