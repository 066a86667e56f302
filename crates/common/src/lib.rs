//! Ginchy Common Library
//!
//! Shared code for the Ginchy gateway and generation worker including:
//! - Subscription packages and entitlement checks
//! - Generation orchestration and provider adapters
//! - Character training state
//! - Database models and the storage seam
//! - Error types and handling
//! - Configuration management
//! - Authentication utilities
//! - Metrics and observability

pub mod auth;
pub mod characters;
pub mod config;
pub mod db;
pub mod errors;
pub mod generation;
pub mod metrics;
pub mod packages;
pub mod providers;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{MemoryStore, Repository, Store};
pub use errors::{AppError, Result};
pub use generation::{GenerationService, Requester};
pub use providers::{ImageProvider, ProviderSet};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
