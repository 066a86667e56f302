//! In-memory `Store` for tests and local tooling
//!
//! A single lock guards all tables, so every multi-row write is atomic in
//! the same sense as a Postgres transaction.

use crate::db::models::*;
use crate::db::store::{CommittedGeneration, NewAsset, NewGeneration, NewJob, Store};
use crate::errors::{AppError, Result};
use crate::generation::GenerationKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    generations: Vec<GeneratedImage>,
    assets: Vec<Asset>,
    jobs: Vec<GenerationJob>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a user with the given balance and tier
    pub async fn seed_user(&self, email: &str, credits: i32, package_tier: &str) -> User {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            credits,
            package_tier: package_tier.to_string(),
            created_at: now.into(),
            updated_at: now.into(),
        };
        self.tables.write().await.users.insert(user.id, user.clone());
        user
    }

    /// Overwrite a user's balance
    pub async fn set_credits(&self, user_id: Uuid, credits: i32) {
        if let Some(user) = self.tables.write().await.users.get_mut(&user_id) {
            user.credits = credits;
        }
    }

    /// Backdate a job's `started_at`
    pub async fn set_job_started_at(&self, id: Uuid, started_at: DateTime<Utc>) {
        let mut tables = self.tables.write().await;
        if let Some(job) = tables.jobs.iter_mut().find(|j| j.id == id) {
            job.started_at = Some(started_at.into());
        }
    }

    pub async fn generation_count(&self) -> usize {
        self.tables.read().await.generations.len()
    }
}

fn finish_job(
    tables: &mut Tables,
    id: Uuid,
    status: JobStatus,
    image_url: Option<&str>,
    error_message: Option<&str>,
) -> Result<GenerationJob> {
    let job = tables
        .jobs
        .iter_mut()
        .find(|j| j.id == id)
        .ok_or_else(|| AppError::JobNotFound { id: id.to_string() })?;

    job.status = status.into();
    if let Some(url) = image_url {
        job.image_url = Some(url.to_string());
        job.error_message = None;
    }
    if let Some(message) = error_message {
        job.error_message = Some(message.to_string());
    }
    job.completed_at = Some(Utc::now().into());
    Ok(job.clone())
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn count_generations_since(
        &self,
        user_id: Uuid,
        kind: GenerationKind,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        let tables = self.tables.read().await;
        let count = tables
            .generations
            .iter()
            .filter(|g| g.user_id == user_id && g.kind == kind.as_str() && g.created_at >= since)
            .count();
        Ok(count as u64)
    }

    async fn credits_spent_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<u64> {
        let tables = self.tables.read().await;
        let spent: i64 = tables
            .generations
            .iter()
            .filter(|g| g.user_id == user_id && g.created_at >= since)
            .map(|g| i64::from(g.credits_charged))
            .sum();
        Ok(spent.max(0) as u64)
    }

    async fn find_generation_by_idempotency_key(
        &self,
        user_id: Uuid,
        key: &str,
    ) -> Result<Option<GeneratedImage>> {
        let tables = self.tables.read().await;
        Ok(tables
            .generations
            .iter()
            .find(|g| g.user_id == user_id && g.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn commit_generation(&self, generation: NewGeneration) -> Result<CommittedGeneration> {
        let mut tables = self.tables.write().await;

        if let Some(key) = generation.idempotency_key.as_deref() {
            let existing = tables
                .generations
                .iter()
                .find(|g| g.user_id == generation.user_id && g.idempotency_key.as_deref() == Some(key))
                .cloned();
            if let Some(image) = existing {
                let remaining_credits = tables
                    .users
                    .get(&generation.user_id)
                    .map(|u| u.credits)
                    .unwrap_or_default();
                return Ok(CommittedGeneration {
                    image,
                    remaining_credits,
                    replayed: true,
                });
            }
        }

        let user = tables
            .users
            .get_mut(&generation.user_id)
            .ok_or_else(|| AppError::UserNotFound {
                id: generation.user_id.to_string(),
            })?;

        if user.credits < generation.credits {
            return Err(AppError::InsufficientCredits {
                balance: user.credits,
                required: generation.credits,
            });
        }

        let now = Utc::now();
        user.credits -= generation.credits;
        user.updated_at = now.into();
        let remaining_credits = user.credits;

        let image = GeneratedImage {
            id: Uuid::new_v4(),
            user_id: generation.user_id,
            team_id: generation.team_id,
            prompt: generation.prompt,
            image_url: generation.image_url,
            kind: generation.kind.as_str().to_string(),
            processor: generation.processor,
            credits_charged: generation.credits,
            idempotency_key: generation.idempotency_key,
            created_at: now.into(),
        };
        tables.generations.push(image.clone());

        Ok(CommittedGeneration {
            image,
            remaining_credits,
            replayed: false,
        })
    }

    async fn list_generations(
        &self,
        user_id: Uuid,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<GeneratedImage>, u64)> {
        let tables = self.tables.read().await;
        let mut owned: Vec<GeneratedImage> = tables
            .generations
            .iter()
            .filter(|g| g.user_id == user_id)
            .cloned()
            .collect();
        owned.reverse();
        let total = owned.len() as u64;
        let page = owned
            .into_iter()
            .skip(offset as usize)
            .take(limit.max(1) as usize)
            .collect();
        Ok((page, total))
    }

    async fn delete_generation(&self, user_id: Uuid, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.generations.len();
        tables
            .generations
            .retain(|g| !(g.id == id && g.user_id == user_id));
        Ok(tables.generations.len() < before)
    }

    async fn create_asset(&self, asset: NewAsset) -> Result<Asset> {
        let now = Utc::now();
        let model = Asset {
            id: Uuid::new_v4(),
            user_id: asset.user_id,
            team_id: asset.team_id,
            asset_type: asset.asset_type,
            name: asset.name,
            url: asset.url,
            metadata: asset.metadata,
            created_at: now.into(),
            updated_at: now.into(),
        };
        self.tables.write().await.assets.push(model.clone());
        Ok(model)
    }

    async fn find_asset(&self, id: Uuid) -> Result<Option<Asset>> {
        let tables = self.tables.read().await;
        Ok(tables.assets.iter().find(|a| a.id == id).cloned())
    }

    async fn list_assets(&self, user_id: Uuid, asset_type: Option<&str>) -> Result<Vec<Asset>> {
        let tables = self.tables.read().await;
        Ok(tables
            .assets
            .iter()
            .rev()
            .filter(|a| a.user_id == user_id)
            .filter(|a| asset_type.map_or(true, |t| a.asset_type == t))
            .cloned()
            .collect())
    }

    async fn count_assets(&self, user_id: Uuid, asset_type: &str) -> Result<u64> {
        let tables = self.tables.read().await;
        let count = tables
            .assets
            .iter()
            .filter(|a| a.user_id == user_id && a.asset_type == asset_type)
            .count();
        Ok(count as u64)
    }

    async fn delete_asset(&self, user_id: Uuid, id: Uuid) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.assets.len();
        tables.assets.retain(|a| !(a.id == id && a.user_id == user_id));
        Ok(tables.assets.len() < before)
    }

    async fn merge_asset_metadata(
        &self,
        id: Uuid,
        expected_status: &str,
        patch: serde_json::Value,
    ) -> Result<Option<Asset>> {
        let mut tables = self.tables.write().await;
        let Some(asset) = tables.assets.iter_mut().find(|a| a.id == id) else {
            return Ok(None);
        };

        if asset.metadata.get("status").and_then(|s| s.as_str()) != Some(expected_status) {
            return Ok(None);
        }

        if let (Some(target), serde_json::Value::Object(fields)) =
            (asset.metadata.as_object_mut(), patch)
        {
            target.extend(fields);
        }
        asset.updated_at = Utc::now().into();

        Ok(Some(asset.clone()))
    }

    async fn create_job(&self, job: NewJob) -> Result<GenerationJob> {
        let model = GenerationJob {
            id: Uuid::new_v4(),
            user_id: job.user_id,
            team_id: job.team_id,
            status: JobStatus::Pending.into(),
            request: job.request,
            image_url: None,
            error_message: None,
            idempotency_key: job.idempotency_key,
            attempt_count: 0,
            created_at: Utc::now().into(),
            started_at: None,
            completed_at: None,
        };
        self.tables.write().await.jobs.push(model.clone());
        Ok(model)
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<GenerationJob>> {
        let tables = self.tables.read().await;
        Ok(tables.jobs.iter().find(|j| j.id == id).cloned())
    }

    async fn find_job_by_idempotency_key(
        &self,
        user_id: Uuid,
        key: &str,
    ) -> Result<Option<GenerationJob>> {
        let tables = self.tables.read().await;
        Ok(tables
            .jobs
            .iter()
            .find(|j| j.user_id == user_id && j.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn claim_next_job(&self) -> Result<Option<GenerationJob>> {
        let mut tables = self.tables.write().await;
        let Some(job) = tables
            .jobs
            .iter_mut()
            .find(|j| j.job_status() == JobStatus::Pending)
        else {
            return Ok(None);
        };

        job.status = JobStatus::Processing.into();
        job.started_at = Some(Utc::now().into());
        job.attempt_count += 1;
        Ok(Some(job.clone()))
    }

    async fn complete_job(&self, id: Uuid, image_url: &str) -> Result<GenerationJob> {
        let mut tables = self.tables.write().await;
        finish_job(&mut tables, id, JobStatus::Completed, Some(image_url), None)
    }

    async fn fail_job(&self, id: Uuid, error_message: &str) -> Result<GenerationJob> {
        let mut tables = self.tables.write().await;
        finish_job(&mut tables, id, JobStatus::Failed, None, Some(error_message))
    }

    async fn requeue_stale_jobs(
        &self,
        started_before: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let mut touched = 0;

        for job in tables.jobs.iter_mut() {
            let stale = job.job_status() == JobStatus::Processing
                && job.started_at.map_or(false, |t| t < started_before);
            if !stale {
                continue;
            }

            if job.attempt_count >= max_attempts {
                job.status = JobStatus::Failed.into();
                job.error_message = Some("Exceeded retry limit".to_string());
                job.completed_at = Some(Utc::now().into());
            } else {
                job.status = JobStatus::Pending.into();
                job.started_at = None;
            }
            touched += 1;
        }

        Ok(touched)
    }
}
