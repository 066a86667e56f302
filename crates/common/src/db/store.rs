//! Storage seam for the services
//!
//! `Repository` is the Postgres implementation; `MemoryStore` backs unit
//! and router tests. Multi-row writes are a single call here so each
//! implementation can make them atomic.

use crate::db::models::{Asset, GeneratedImage, GenerationJob, User};
use crate::errors::Result;
use crate::generation::GenerationKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A successful generation ready to be charged and persisted
#[derive(Debug, Clone)]
pub struct NewGeneration {
    pub user_id: Uuid,
    pub team_id: Option<Uuid>,
    pub prompt: String,
    pub image_url: String,
    pub kind: GenerationKind,
    pub processor: String,
    pub credits: i32,
    pub idempotency_key: Option<String>,
}

/// Outcome of `Store::commit_generation`
#[derive(Debug, Clone)]
pub struct CommittedGeneration {
    pub image: GeneratedImage,
    pub remaining_credits: i32,
    /// True when the idempotency key matched an earlier commit and
    /// nothing was charged
    pub replayed: bool,
}

#[derive(Debug, Clone)]
pub struct NewAsset {
    pub user_id: Uuid,
    pub team_id: Option<Uuid>,
    pub asset_type: String,
    pub name: String,
    pub url: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct NewJob {
    pub user_id: Uuid,
    pub team_id: Option<Uuid>,
    pub request: serde_json::Value,
    pub idempotency_key: Option<String>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> Result<()>;

    // Users

    async fn find_user(&self, id: Uuid) -> Result<Option<User>>;

    // Generations

    /// Generations of `kind` committed by `user_id` at or after `since`
    async fn count_generations_since(
        &self,
        user_id: Uuid,
        kind: GenerationKind,
        since: DateTime<Utc>,
    ) -> Result<u64>;

    async fn credits_spent_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<u64>;

    async fn find_generation_by_idempotency_key(
        &self,
        user_id: Uuid,
        key: &str,
    ) -> Result<Option<GeneratedImage>>;

    /// Decrement credits and insert the record as one unit. Fails with
    /// `InsufficientCredits` and writes nothing when the balance is short.
    async fn commit_generation(&self, generation: NewGeneration) -> Result<CommittedGeneration>;

    /// Newest first
    async fn list_generations(
        &self,
        user_id: Uuid,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<GeneratedImage>, u64)>;

    async fn delete_generation(&self, user_id: Uuid, id: Uuid) -> Result<bool>;

    // Assets

    async fn create_asset(&self, asset: NewAsset) -> Result<Asset>;

    async fn find_asset(&self, id: Uuid) -> Result<Option<Asset>>;

    async fn list_assets(&self, user_id: Uuid, asset_type: Option<&str>) -> Result<Vec<Asset>>;

    async fn count_assets(&self, user_id: Uuid, asset_type: &str) -> Result<u64>;

    async fn delete_asset(&self, user_id: Uuid, id: Uuid) -> Result<bool>;

    /// Merge `patch` into the top level of the asset's metadata, only while
    /// `metadata.status` still equals `expected_status`. `None` when the
    /// asset is missing or its status moved on.
    async fn merge_asset_metadata(
        &self,
        id: Uuid,
        expected_status: &str,
        patch: serde_json::Value,
    ) -> Result<Option<Asset>>;

    // Jobs

    async fn create_job(&self, job: NewJob) -> Result<GenerationJob>;

    async fn find_job(&self, id: Uuid) -> Result<Option<GenerationJob>>;

    async fn find_job_by_idempotency_key(
        &self,
        user_id: Uuid,
        key: &str,
    ) -> Result<Option<GenerationJob>>;

    /// Move the oldest pending job to processing, skipping rows other
    /// workers hold
    async fn claim_next_job(&self) -> Result<Option<GenerationJob>>;

    async fn complete_job(&self, id: Uuid, image_url: &str) -> Result<GenerationJob>;

    async fn fail_job(&self, id: Uuid, error_message: &str) -> Result<GenerationJob>;

    /// Requeue jobs stuck in processing since before `started_before`;
    /// jobs already at `max_attempts` are failed instead. Returns the
    /// number of rows touched.
    async fn requeue_stale_jobs(
        &self,
        started_before: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<u64>;
}
