//! Postgres implementation of `Store`
//!
//! Plain reads go through SeaORM's query builder. The writes that must be
//! atomic or contention-safe (credit decrement, status-guarded metadata
//! merge, job claiming) are raw statements.

use crate::db::models::*;
use crate::db::store::{CommittedGeneration, NewAsset, NewGeneration, NewJob, Store};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::generation::GenerationKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, DbErr,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, SqlErr, Statement,
    TransactionTrait,
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    async fn current_balance(&self, user_id: Uuid) -> Result<i32> {
        UserEntity::find_by_id(user_id)
            .one(self.write_conn())
            .await?
            .map(|user| user.credits)
            .ok_or_else(|| AppError::UserNotFound {
                id: user_id.to_string(),
            })
    }

    async fn job_status_update(&self, sql: &str, values: Vec<sea_orm::Value>, id: Uuid) -> Result<GenerationJob> {
        let stmt = Statement::from_sql_and_values(DbBackend::Postgres, sql, values);
        GenerationJobEntity::find()
            .from_raw_sql(stmt)
            .one(self.write_conn())
            .await?
            .ok_or_else(|| AppError::JobNotFound { id: id.to_string() })
    }
}

#[async_trait]
impl Store for Repository {
    // ========================================================================
    // Health Check
    // ========================================================================

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }

    // ========================================================================
    // User Operations
    // ========================================================================

    async fn find_user(&self, id: Uuid) -> Result<Option<User>> {
        UserEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Generation Operations
    // ========================================================================

    async fn count_generations_since(
        &self,
        user_id: Uuid,
        kind: GenerationKind,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        GeneratedImageEntity::find()
            .filter(GeneratedImageColumn::UserId.eq(user_id))
            .filter(GeneratedImageColumn::Kind.eq(kind.as_str()))
            .filter(GeneratedImageColumn::CreatedAt.gte(since))
            .count(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn credits_spent_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<u64> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            SELECT COALESCE(SUM(credits_charged), 0)::BIGINT
            FROM generated_images
            WHERE user_id = $1 AND created_at >= $2
            "#,
            vec![user_id.into(), since.into()],
        );

        let spent = match self.read_conn().query_one(stmt).await? {
            Some(row) => row.try_get_by_index::<i64>(0)?,
            None => 0,
        };

        Ok(spent.max(0) as u64)
    }

    async fn find_generation_by_idempotency_key(
        &self,
        user_id: Uuid,
        key: &str,
    ) -> Result<Option<GeneratedImage>> {
        GeneratedImageEntity::find()
            .filter(GeneratedImageColumn::UserId.eq(user_id))
            .filter(GeneratedImageColumn::IdempotencyKey.eq(key))
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn commit_generation(&self, generation: NewGeneration) -> Result<CommittedGeneration> {
        let txn = self.write_conn().begin().await?;

        // Conditional decrement: the balance check and the write are one
        // statement, so concurrent commits can never overdraw.
        let debit = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE users
            SET credits = credits - $1, updated_at = NOW()
            WHERE id = $2 AND credits >= $1
            RETURNING credits
            "#,
            vec![generation.credits.into(), generation.user_id.into()],
        );

        let remaining_credits = match txn.query_one(debit).await? {
            Some(row) => row.try_get_by_index::<i32>(0)?,
            None => {
                txn.rollback().await?;
                let balance = self.current_balance(generation.user_id).await?;
                return Err(AppError::InsufficientCredits {
                    balance,
                    required: generation.credits,
                });
            }
        };

        let record = GeneratedImageActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(generation.user_id),
            team_id: Set(generation.team_id),
            prompt: Set(generation.prompt.clone()),
            image_url: Set(generation.image_url.clone()),
            kind: Set(generation.kind.as_str().to_string()),
            processor: Set(generation.processor.clone()),
            credits_charged: Set(generation.credits),
            idempotency_key: Set(generation.idempotency_key.clone()),
            created_at: Set(Utc::now().into()),
        };

        match record.insert(&txn).await {
            Ok(image) => {
                txn.commit().await?;
                debug!(
                    generation_id = %image.id,
                    user_id = %generation.user_id,
                    remaining_credits = remaining_credits,
                    "Generation committed"
                );
                Ok(CommittedGeneration {
                    image,
                    remaining_credits,
                    replayed: false,
                })
            }
            Err(e) if is_unique_violation(&e) => {
                // Same idempotency key committed concurrently; undo this debit
                txn.rollback().await?;
                let key = generation.idempotency_key.as_deref().unwrap_or_default();
                warn!(user_id = %generation.user_id, "Idempotent replay detected at commit");

                let image = self
                    .find_generation_by_idempotency_key(generation.user_id, key)
                    .await?
                    .ok_or_else(|| AppError::Internal {
                        message: "Unique violation without a matching generation".to_string(),
                    })?;
                let remaining_credits = self.current_balance(generation.user_id).await?;

                Ok(CommittedGeneration {
                    image,
                    remaining_credits,
                    replayed: true,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_generations(
        &self,
        user_id: Uuid,
        offset: u64,
        limit: u64,
    ) -> Result<(Vec<GeneratedImage>, u64)> {
        let limit = limit.max(1);
        let paginator = GeneratedImageEntity::find()
            .filter(GeneratedImageColumn::UserId.eq(user_id))
            .order_by_desc(GeneratedImageColumn::CreatedAt)
            .paginate(self.read_conn(), limit);

        let total = paginator.num_items().await?;
        let images = paginator.fetch_page(offset / limit).await?;

        Ok((images, total))
    }

    async fn delete_generation(&self, user_id: Uuid, id: Uuid) -> Result<bool> {
        let result = GeneratedImageEntity::delete_many()
            .filter(GeneratedImageColumn::Id.eq(id))
            .filter(GeneratedImageColumn::UserId.eq(user_id))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    // ========================================================================
    // Asset Operations
    // ========================================================================

    async fn create_asset(&self, asset: NewAsset) -> Result<Asset> {
        let now = Utc::now();

        let model = AssetActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(asset.user_id),
            team_id: Set(asset.team_id),
            asset_type: Set(asset.asset_type),
            name: Set(asset.name),
            url: Set(asset.url),
            metadata: Set(asset.metadata),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        model.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn find_asset(&self, id: Uuid) -> Result<Option<Asset>> {
        AssetEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn list_assets(&self, user_id: Uuid, asset_type: Option<&str>) -> Result<Vec<Asset>> {
        let mut query = AssetEntity::find().filter(AssetColumn::UserId.eq(user_id));
        if let Some(asset_type) = asset_type {
            query = query.filter(AssetColumn::AssetType.eq(asset_type));
        }

        query
            .order_by_desc(AssetColumn::CreatedAt)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn count_assets(&self, user_id: Uuid, asset_type: &str) -> Result<u64> {
        AssetEntity::find()
            .filter(AssetColumn::UserId.eq(user_id))
            .filter(AssetColumn::AssetType.eq(asset_type))
            .count(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn delete_asset(&self, user_id: Uuid, id: Uuid) -> Result<bool> {
        let result = AssetEntity::delete_many()
            .filter(AssetColumn::Id.eq(id))
            .filter(AssetColumn::UserId.eq(user_id))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn merge_asset_metadata(
        &self,
        id: Uuid,
        expected_status: &str,
        patch: serde_json::Value,
    ) -> Result<Option<Asset>> {
        // `||` merges top-level keys only; siblings not named in the patch survive
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE assets
            SET metadata = metadata || $2::jsonb, updated_at = NOW()
            WHERE id = $1 AND metadata->>'status' = $3
            RETURNING *
            "#,
            vec![id.into(), patch.into(), expected_status.into()],
        );

        AssetEntity::find()
            .from_raw_sql(stmt)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    // ========================================================================
    // Job Operations
    // ========================================================================

    async fn create_job(&self, job: NewJob) -> Result<GenerationJob> {
        let model = GenerationJobActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(job.user_id),
            team_id: Set(job.team_id),
            status: Set(JobStatus::Pending.into()),
            request: Set(job.request),
            image_url: Set(None),
            error_message: Set(None),
            idempotency_key: Set(job.idempotency_key),
            attempt_count: Set(0),
            created_at: Set(Utc::now().into()),
            started_at: Set(None),
            completed_at: Set(None),
        };

        model.insert(self.write_conn()).await.map_err(Into::into)
    }

    async fn find_job(&self, id: Uuid) -> Result<Option<GenerationJob>> {
        GenerationJobEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_job_by_idempotency_key(
        &self,
        user_id: Uuid,
        key: &str,
    ) -> Result<Option<GenerationJob>> {
        GenerationJobEntity::find()
            .filter(GenerationJobColumn::UserId.eq(user_id))
            .filter(GenerationJobColumn::IdempotencyKey.eq(key))
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn claim_next_job(&self) -> Result<Option<GenerationJob>> {
        let stmt = Statement::from_string(
            DbBackend::Postgres,
            r#"
            UPDATE generation_jobs
            SET status = 'processing', started_at = NOW(), attempt_count = attempt_count + 1
            WHERE id = (
                SELECT id FROM generation_jobs
                WHERE status = 'pending'
                ORDER BY created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING *
            "#,
        );

        GenerationJobEntity::find()
            .from_raw_sql(stmt)
            .one(self.write_conn())
            .await
            .map_err(Into::into)
    }

    async fn complete_job(&self, id: Uuid, image_url: &str) -> Result<GenerationJob> {
        self.job_status_update(
            r#"
            UPDATE generation_jobs
            SET status = 'completed', image_url = $2, error_message = NULL, completed_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
            vec![id.into(), image_url.into()],
            id,
        )
        .await
    }

    async fn fail_job(&self, id: Uuid, error_message: &str) -> Result<GenerationJob> {
        self.job_status_update(
            r#"
            UPDATE generation_jobs
            SET status = 'failed', error_message = $2, completed_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
            vec![id.into(), error_message.into()],
            id,
        )
        .await
    }

    async fn requeue_stale_jobs(
        &self,
        started_before: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<u64> {
        let exhausted = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE generation_jobs
            SET status = 'failed', error_message = 'Exceeded retry limit', completed_at = NOW()
            WHERE status = 'processing' AND started_at < $1 AND attempt_count >= $2
            "#,
            vec![started_before.into(), max_attempts.into()],
        );

        let retry = Statement::from_sql_and_values(
            DbBackend::Postgres,
            r#"
            UPDATE generation_jobs
            SET status = 'pending', started_at = NULL
            WHERE status = 'processing' AND started_at < $1 AND attempt_count < $2
            "#,
            vec![started_before.into(), max_attempts.into()],
        );

        let failed = self.write_conn().execute(exhausted).await?.rows_affected();
        let requeued = self.write_conn().execute(retry).await?.rows_affected();

        Ok(failed + requeued)
    }
}
