//! Generation worker processor
//!
//! Claims pending jobs, runs them through the orchestrator and records
//! the outcome on the job row.

use chrono::{Duration as ChronoDuration, Utc};
use ginchy_common::auth::hash_idempotency_key;
use ginchy_common::db::models::GenerationJob;
use ginchy_common::db::Store;
use ginchy_common::errors::AppError;
use ginchy_common::generation::{GenerationRequest, GenerationService, Requester};
use ginchy_common::metrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Final state written for a processed job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed { image_url: String },
    Failed { message: String },
}

/// Worker processor configuration
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Processing jobs older than this are considered abandoned
    pub lease: Duration,
    /// Attempts before an abandoned job is failed
    pub max_attempts: i32,
}

/// Generation worker processor
pub struct JobProcessor {
    store: Arc<dyn Store>,
    generation: Arc<GenerationService>,
    config: ProcessorConfig,
}

impl JobProcessor {
    pub fn new(store: Arc<dyn Store>, generation: Arc<GenerationService>, config: ProcessorConfig) -> Self {
        Self {
            store,
            generation,
            config,
        }
    }

    /// Claim and process one job. `None` when the queue is empty.
    pub async fn run_once(&self) -> Result<Option<JobOutcome>, WorkerError> {
        let Some(job) = self.store.claim_next_job().await? else {
            return Ok(None);
        };
        self.process_job(job).await.map(Some)
    }

    /// Run a claimed job
    #[instrument(skip(self, job), fields(job_id = %job.id, user_id = %job.user_id, attempt = job.attempt_count))]
    pub async fn process_job(&self, job: GenerationJob) -> Result<JobOutcome, WorkerError> {
        info!("Processing generation job");

        let mut request: GenerationRequest = match serde_json::from_value(job.request.clone()) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Job payload is not a generation request");
                return self.fail(&job, "Invalid job payload").await;
            }
        };

        // Reruns of a requeued job must replay the first commit
        if request.idempotency_key.is_none() {
            request.idempotency_key = Some(job_idempotency_key(&job));
        }

        let requester = Requester {
            user_id: job.user_id,
            team_id: job.team_id,
        };

        match self.generation.generate(&requester, request).await {
            Ok(outcome) => {
                self.store.complete_job(job.id, &outcome.image_url).await?;
                metrics::record_job("completed");
                info!(
                    generation_id = %outcome.generation_id,
                    used_fallback = outcome.used_fallback,
                    replayed = outcome.replayed,
                    "Generation job completed"
                );
                Ok(JobOutcome::Completed {
                    image_url: outcome.image_url,
                })
            }
            Err(e) => {
                warn!(error = %e, "Generation job failed");
                self.fail(&job, &e.user_message()).await
            }
        }
    }

    async fn fail(&self, job: &GenerationJob, message: &str) -> Result<JobOutcome, WorkerError> {
        self.store.fail_job(job.id, message).await?;
        metrics::record_job("failed");
        Ok(JobOutcome::Failed {
            message: message.to_string(),
        })
    }

    /// Return abandoned jobs to the queue (or fail them past the retry limit)
    pub async fn sweep_stale(&self) -> Result<u64, WorkerError> {
        let lease = ChronoDuration::from_std(self.config.lease)
            .map_err(|e| WorkerError::Config(e.to_string()))?;
        let touched = self
            .store
            .requeue_stale_jobs(Utc::now() - lease, self.config.max_attempts)
            .await?;

        if touched > 0 {
            metrics::record_requeued(touched);
            warn!(count = touched, "Requeued stale generation jobs");
        }
        Ok(touched)
    }
}

/// Stable per-job key for jobs queued without one
fn job_idempotency_key(job: &GenerationJob) -> String {
    hash_idempotency_key(job.user_id, &format!("job:{}", job.id))
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<AppError> for WorkerError {
    fn from(e: AppError) -> Self {
        WorkerError::Database(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ginchy_common::config::{GenerationConfig, ProvidersConfig};
    use ginchy_common::db::models::{JobStatus, User};
    use ginchy_common::db::{MemoryStore, NewJob};
    use ginchy_common::generation::Processor;
    use ginchy_common::providers::{MockProvider, ProviderSet};
    use serde_json::json;

    fn processor(store: Arc<MemoryStore>, kling: MockProvider) -> JobProcessor {
        let providers = ProviderSet::from_config(&ProvidersConfig::default())
            .unwrap()
            .with_primary(
                Processor::Replicate,
                Arc::new(MockProvider::succeeding("replicate", "https://replicate.delivery/w.png")),
            )
            .with_primary(Processor::Kling, Arc::new(kling));
        let generation = GenerationService::new(store.clone(), Arc::new(providers), GenerationConfig::default());

        JobProcessor::new(
            store,
            Arc::new(generation),
            ProcessorConfig {
                lease: Duration::from_secs(600),
                max_attempts: 2,
            },
        )
    }

    async fn enqueue(store: &MemoryStore, user: &User, request: serde_json::Value) -> uuid::Uuid {
        store
            .create_job(NewJob {
                user_id: user.id,
                team_id: None,
                request,
                idempotency_key: None,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let store = Arc::new(MemoryStore::new());
        let worker = processor(store, MockProvider::failing("kling", "unused"));
        assert_eq!(worker.run_once().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_job_completes_and_charges() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user("w@example.com", 3, "standard").await;
        let job_id = enqueue(&store, &user, json!({"prompt": "pleated skirt"})).await;
        let worker = processor(store.clone(), MockProvider::failing("kling", "unused"));

        let outcome = worker.run_once().await.unwrap();
        assert_eq!(
            outcome,
            Some(JobOutcome::Completed {
                image_url: "https://replicate.delivery/w.png".to_string()
            })
        );

        let job = store.find_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.job_status(), JobStatus::Completed);
        assert_eq!(job.image_url.as_deref(), Some("https://replicate.delivery/w.png"));
        assert_eq!(store.find_user(user.id).await.unwrap().unwrap().credits, 2);
    }

    #[tokio::test]
    async fn test_video_failure_records_user_message() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user("v@example.com", 5, "pro").await;
        let job_id = enqueue(&store, &user, json!({"prompt": "catwalk", "processor": "Kling"})).await;
        let worker = processor(store.clone(), MockProvider::failing("kling", "task failed"));

        worker.run_once().await.unwrap();

        let job = store.find_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.job_status(), JobStatus::Failed);
        assert_eq!(
            job.error_message.as_deref(),
            Some("Failed to generate image. Please try again.")
        );
        assert_eq!(store.find_user(user.id).await.unwrap().unwrap().credits, 5);
    }

    #[tokio::test]
    async fn test_bad_payload_fails_job() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user("p@example.com", 5, "standard").await;
        let job_id = enqueue(&store, &user, json!({"unexpected": true})).await;
        let worker = processor(store.clone(), MockProvider::failing("kling", "unused"));

        let outcome = worker.run_once().await.unwrap().unwrap();
        assert_eq!(
            outcome,
            JobOutcome::Failed {
                message: "Invalid job payload".to_string()
            }
        );
        assert_eq!(store.find_job(job_id).await.unwrap().unwrap().job_status(), JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_rerun_after_crash_does_not_double_charge() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user("r@example.com", 5, "standard").await;
        let job_id = enqueue(&store, &user, json!({"prompt": "parka", "idempotencyKey": "job-key-1"})).await;
        let worker = processor(store.clone(), MockProvider::failing("kling", "unused"));

        // First attempt commits but the worker dies before marking the job
        let job = store.claim_next_job().await.unwrap().unwrap();
        let request: GenerationRequest = serde_json::from_value(job.request.clone()).unwrap();
        worker
            .generation
            .generate(&Requester { user_id: user.id, team_id: None }, request)
            .await
            .unwrap();

        store.set_job_started_at(job_id, Utc::now() - ChronoDuration::hours(1)).await;
        assert_eq!(worker.sweep_stale().await.unwrap(), 1);

        let outcome = worker.run_once().await.unwrap();
        assert!(matches!(outcome, Some(JobOutcome::Completed { .. })));
        assert_eq!(store.find_user(user.id).await.unwrap().unwrap().credits, 4);
        assert_eq!(store.generation_count().await, 1);
    }

    #[tokio::test]
    async fn test_keyless_job_rerun_charges_once() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user("k@example.com", 5, "standard").await;
        let job_id = enqueue(&store, &user, json!({"prompt": "parka"})).await;
        let worker = processor(store.clone(), MockProvider::failing("kling", "unused"));

        // First attempt commits under the derived key, then the worker dies
        // before completing the job
        let job = store.claim_next_job().await.unwrap().unwrap();
        let request = GenerationRequest {
            idempotency_key: Some(job_idempotency_key(&job)),
            ..serde_json::from_value(job.request.clone()).unwrap()
        };
        worker
            .generation
            .generate(&Requester { user_id: user.id, team_id: None }, request)
            .await
            .unwrap();
        assert_eq!(store.find_user(user.id).await.unwrap().unwrap().credits, 4);

        store.set_job_started_at(job_id, Utc::now() - ChronoDuration::hours(1)).await;
        assert_eq!(worker.sweep_stale().await.unwrap(), 1);

        let outcome = worker.run_once().await.unwrap();
        assert!(matches!(outcome, Some(JobOutcome::Completed { .. })));
        assert_eq!(store.find_user(user.id).await.unwrap().unwrap().credits, 4);
        assert_eq!(store.generation_count().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_fails_after_max_attempts() {
        let store = Arc::new(MemoryStore::new());
        let user = store.seed_user("s@example.com", 5, "standard").await;
        let job_id = enqueue(&store, &user, json!({"prompt": "gilet"})).await;
        let worker = processor(store.clone(), MockProvider::failing("kling", "unused"));

        for _ in 0..2 {
            store.claim_next_job().await.unwrap().unwrap();
            store.set_job_started_at(job_id, Utc::now() - ChronoDuration::hours(1)).await;
            worker.sweep_stale().await.unwrap();
        }

        let job = store.find_job(job_id).await.unwrap().unwrap();
        assert_eq!(job.job_status(), JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("Exceeded retry limit"));
    }
}
