//! Character model training submission

use crate::config::{ProvidersConfig, TrainingConfig};
use crate::errors::{AppError, Result};
use crate::providers::{first_str, read_json, require_key};
use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

/// Everything a trainer needs to start a fine-tune for one character
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingSubmission {
    pub asset_id: Uuid,
    pub name: String,
    pub training_images: Vec<String>,
    /// Where the trainer reports progress
    pub webhook_url: String,
}

/// Backend that accepts training jobs and reports back via webhook
#[async_trait]
pub trait Trainer: Send + Sync {
    fn name(&self) -> &str;

    /// Start training; returns the vendor's training id
    async fn submit(&self, submission: &TrainingSubmission) -> Result<String>;
}

pub struct ReplicateTrainer {
    client: reqwest::Client,
    api_token: Option<String>,
    base_url: String,
    model: String,
}

impl ReplicateTrainer {
    pub fn new(client: reqwest::Client, providers: &ProvidersConfig, training: &TrainingConfig) -> Self {
        Self {
            client,
            api_token: providers.replicate_api_token.clone(),
            base_url: providers.replicate_base_url.trim_end_matches('/').to_string(),
            model: training.trainer_model.clone(),
        }
    }
}

/// Trigger word derived from the character name
fn trigger_word(name: &str) -> String {
    let word: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_uppercase();
    if word.is_empty() {
        "TOK".to_string()
    } else {
        word
    }
}

#[async_trait]
impl Trainer for ReplicateTrainer {
    fn name(&self) -> &str {
        "replicate"
    }

    async fn submit(&self, submission: &TrainingSubmission) -> Result<String> {
        let token = require_key(&self.api_token, "REPLICATE_API_TOKEN")?;

        let body = json!({
            "model": self.model,
            "input": {
                "input_images": submission.training_images,
                "trigger_word": trigger_word(&submission.name),
            },
            "webhook": submission.webhook_url,
            "webhook_events_filter": ["start", "completed"],
        });

        let response = self
            .client
            .post(format!("{}/v1/trainings", self.base_url))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let payload = read_json(self.name(), response).await?;

        first_str(&payload, &["/id"])
            .map(str::to_string)
            .ok_or_else(|| AppError::provider(self.name(), "training response has no id"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::spawn_upstream;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::Value;

    fn submission() -> TrainingSubmission {
        TrainingSubmission {
            asset_id: Uuid::new_v4(),
            name: "Ava Rose".to_string(),
            training_images: vec!["https://cdn.example.com/1.png".to_string()],
            webhook_url: "https://api.example.com/v1/characters/x/training".to_string(),
        }
    }

    fn trainer(base: String, token: Option<&str>) -> ReplicateTrainer {
        let providers = ProvidersConfig {
            replicate_api_token: token.map(str::to_string),
            replicate_base_url: base,
            ..Default::default()
        };
        ReplicateTrainer::new(reqwest::Client::new(), &providers, &TrainingConfig::default())
    }

    #[test]
    fn test_trigger_word() {
        assert_eq!(trigger_word("Ava Rose"), "AVAROSE");
        assert_eq!(trigger_word("  ★ "), "TOK");
    }

    #[tokio::test]
    async fn test_submit_returns_training_id() {
        let router = Router::new().route(
            "/v1/trainings",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["input"]["trigger_word"], "AVAROSE");
                assert!(body["webhook"].as_str().unwrap().ends_with("/training"));
                Json(serde_json::json!({"id": "tr_123", "status": "starting"}))
            }),
        );
        let id = trainer(spawn_upstream(router).await, Some("r8-test"))
            .submit(&submission())
            .await
            .unwrap();
        assert_eq!(id, "tr_123");
    }

    #[tokio::test]
    async fn test_submit_surfaces_rejection() {
        let router = Router::new().route(
            "/v1/trainings",
            post(|| async { (StatusCode::UNPROCESSABLE_ENTITY, Json(serde_json::json!({"detail": "too few images"}))) }),
        );
        let err = trainer(spawn_upstream(router).await, Some("r8-test"))
            .submit(&submission())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "replicate request failed: HTTP 422: too few images");
    }

    #[tokio::test]
    async fn test_missing_token_is_configuration_error() {
        let err = trainer("http://127.0.0.1:9".to_string(), None)
            .submit(&submission())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));
    }
}
