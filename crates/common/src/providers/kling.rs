//! Kling video adapter: submit a job, then poll until it settles

use super::{extract_output_url, first_str, read_json, require_key, GeneratedMedia, ImageProvider, ProviderRequest};
use crate::config::ProvidersConfig;
use crate::errors::{AppError, Result};
use crate::generation::{poll_until, PollPolicy, PollState};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::info;

const CLIP_SECONDS: u32 = 5;

pub struct KlingProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    poll: PollPolicy,
}

#[derive(Serialize)]
struct SubmitBody<'a> {
    prompt: &'a str,
    aspect_ratio: &'a str,
    duration: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<&'a str>,
}

impl KlingProvider {
    pub fn new(client: reqwest::Client, config: &ProvidersConfig) -> Self {
        Self {
            client,
            api_key: config.kling_api_key.clone(),
            base_url: config.kling_base_url.trim_end_matches('/').to_string(),
            poll: PollPolicy::new(
                Duration::from_secs(config.kling_poll_interval_secs),
                config.kling_max_polls,
            ),
        }
    }

    async fn submit(&self, api_key: &str, request: &ProviderRequest) -> Result<String> {
        let body = SubmitBody {
            prompt: &request.enhanced_prompt,
            aspect_ratio: request.aspect_ratio.as_str(),
            duration: CLIP_SECONDS,
            image_url: request.references.model_url.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}/v1/videos", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;
        let payload = read_json(self.name(), response).await?;

        first_str(&payload, &["/id", "/task_id", "/data/task_id"])
            .map(str::to_string)
            .ok_or_else(|| AppError::provider(self.name(), "response contained no job id"))
    }

    async fn status(&self, api_key: &str, job_id: &str) -> Result<Value> {
        let response = self
            .client
            .get(format!("{}/v1/videos/{}", self.base_url, job_id))
            .bearer_auth(api_key)
            .send()
            .await?;
        read_json(self.name(), response).await
    }
}

fn classify(payload: Value) -> PollState<String> {
    let status = first_str(&payload, &["/status", "/data/task_status"])
        .unwrap_or_default()
        .to_ascii_lowercase();

    match status.as_str() {
        "completed" | "succeeded" | "succeed" => {
            let url = first_str(&payload, &["/video_url", "/data/video_url"])
                .map(str::to_string)
                .or_else(|| payload.get("output").and_then(extract_output_url))
                .or_else(|| payload.pointer("/data/task_result/videos").and_then(extract_output_url));
            match url {
                Some(url) => PollState::Ready(url),
                None => PollState::Failed("job completed without a video URL".to_string()),
            }
        }
        "failed" | "error" | "canceled" => PollState::Failed(
            first_str(&payload, &["/error", "/message", "/data/task_status_msg"])
                .unwrap_or("video generation failed")
                .to_string(),
        ),
        _ => PollState::Pending,
    }
}

#[async_trait]
impl ImageProvider for KlingProvider {
    fn name(&self) -> &str {
        "kling"
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<GeneratedMedia> {
        let api_key = require_key(&self.api_key, "KLING_API_KEY")?;
        let job_id = self.submit(api_key, request).await?;
        info!(job_id = %job_id, "Kling video job submitted");

        let url = poll_until(
            self.name(),
            self.poll,
            || self.status(api_key, &job_id),
            classify,
        )
        .await?;

        Ok(GeneratedMedia::new(url, self.name()))
    }
}
