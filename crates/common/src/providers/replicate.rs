//! Replicate prediction adapter (default processor)

use super::{extract_output_url, first_str, read_json, require_key, GeneratedMedia, ImageProvider, ProviderRequest};
use crate::config::ProvidersConfig;
use crate::errors::{AppError, Result};
use crate::generation::{poll_until, PollPolicy, PollState};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub struct ReplicateProvider {
    client: reqwest::Client,
    api_token: Option<String>,
    base_url: String,
    model_version: String,
    poll: PollPolicy,
}

impl ReplicateProvider {
    pub fn new(client: reqwest::Client, config: &ProvidersConfig) -> Self {
        Self {
            client,
            api_token: config.replicate_api_token.clone(),
            base_url: config.replicate_base_url.trim_end_matches('/').to_string(),
            model_version: config.replicate_model_version.clone(),
            poll: PollPolicy::new(
                Duration::from_millis(config.replicate_poll_interval_ms),
                config.replicate_max_polls,
            ),
        }
    }

    async fn create(&self, token: &str, request: &ProviderRequest) -> Result<Value> {
        let (width, height) = request.dimensions();
        let mut input = json!({
            "prompt": request.enhanced_prompt,
            "width": width,
            "height": height,
        });
        if let Some(image) = request.references.model_url.as_deref() {
            input["image"] = json!(image);
        }

        let response = self
            .client
            .post(format!("{}/v1/predictions", self.base_url))
            .bearer_auth(token)
            .json(&json!({"version": self.model_version, "input": input}))
            .send()
            .await?;
        read_json(self.name(), response).await
    }

    async fn fetch(&self, token: &str, id: &str) -> Result<Value> {
        let response = self
            .client
            .get(format!("{}/v1/predictions/{}", self.base_url, id))
            .bearer_auth(token)
            .send()
            .await?;
        read_json(self.name(), response).await
    }
}

fn classify(prediction: Value) -> PollState<String> {
    let status = first_str(&prediction, &["/status"])
        .unwrap_or_default()
        .to_ascii_lowercase();

    match status.as_str() {
        "succeeded" => match prediction.get("output").and_then(extract_output_url) {
            Some(url) => PollState::Ready(url),
            None => PollState::Failed("prediction succeeded without output".to_string()),
        },
        "failed" | "canceled" => PollState::Failed(
            first_str(&prediction, &["/error"])
                .unwrap_or("prediction failed")
                .to_string(),
        ),
        _ => PollState::Pending,
    }
}

#[async_trait]
impl ImageProvider for ReplicateProvider {
    fn name(&self) -> &str {
        "replicate"
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<GeneratedMedia> {
        let token = require_key(&self.api_token, "REPLICATE_API_TOKEN")?;
        let created = self.create(token, request).await?;

        let url = match classify(created.clone()) {
            PollState::Ready(url) => url,
            PollState::Failed(message) => return Err(AppError::provider(self.name(), message)),
            PollState::Pending => {
                let id = first_str(&created, &["/id"])
                    .map(str::to_string)
                    .ok_or_else(|| AppError::provider(self.name(), "prediction has no id"))?;
                debug!(prediction_id = %id, "Polling Replicate prediction");
                poll_until(self.name(), self.poll, || self.fetch(token, &id), classify).await?
            }
        };

        Ok(GeneratedMedia::new(url, self.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::GenerationRequest;
    use crate::providers::test_support::spawn_upstream;
    use axum::{
        routing::{get, post},
        Json, Router,
    };
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn provider(base: String) -> ReplicateProvider {
        let config = ProvidersConfig {
            replicate_api_token: Some("r8-test".to_string()),
            replicate_base_url: base,
            replicate_poll_interval_ms: 5,
            replicate_max_polls: 10,
            ..Default::default()
        };
        ReplicateProvider::new(reqwest::Client::new(), &config)
    }

    fn request() -> ProviderRequest {
        ProviderRequest::from_request(&GenerationRequest {
            prompt: "knit beanie".to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_polls_prediction_to_output() {
        let polls = Arc::new(AtomicU32::new(0));
        let counter = polls.clone();
        let router = Router::new()
            .route(
                "/v1/predictions",
                post(|| async { Json(json!({"id": "p1", "status": "starting"})) }),
            )
            .route(
                "/v1/predictions/{id}",
                get(move || {
                    let counter = counter.clone();
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                            Json(json!({"id": "p1", "status": "processing"}))
                        } else {
                            Json(json!({"id": "p1", "status": "succeeded", "output": ["https://replicate.delivery/o.png"]}))
                        }
                    }
                }),
            );

        let media = provider(spawn_upstream(router).await).generate(&request()).await.unwrap();
        assert_eq!(media.url, "https://replicate.delivery/o.png");
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_immediate_string_output() {
        let router = Router::new().route(
            "/v1/predictions",
            post(|| async {
                Json(json!({"id": "p2", "status": "succeeded", "output": "https://replicate.delivery/s.png"}))
            }),
        );
        let media = provider(spawn_upstream(router).await).generate(&request()).await.unwrap();
        assert_eq!(media.url, "https://replicate.delivery/s.png");
    }

    #[tokio::test]
    async fn test_failed_prediction() {
        let router = Router::new()
            .route("/v1/predictions", post(|| async { Json(json!({"id": "p3", "status": "starting"})) }))
            .route(
                "/v1/predictions/{id}",
                get(|| async { Json(json!({"status": "failed", "error": "NSFW content detected"})) }),
            );
        let err = provider(spawn_upstream(router).await).generate(&request()).await.unwrap_err();
        assert_eq!(err.to_string(), "replicate request failed: NSFW content detected");
    }
}
