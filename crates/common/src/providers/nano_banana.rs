//! Nano Banana image adapter

use super::{extract_output_url, first_str, read_json, require_key, GeneratedMedia, ImageProvider, ProviderRequest};
use crate::config::ProvidersConfig;
use crate::errors::{AppError, Result};
use crate::generation::with_timeout;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

pub struct NanoBananaProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    prompt: &'a str,
    width: u32,
    height: u32,
    aspect_ratio: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    image_urls: Vec<&'a str>,
}

impl NanoBananaProvider {
    pub fn new(client: reqwest::Client, config: &ProvidersConfig) -> Self {
        Self {
            client,
            api_key: config.nano_banana_api_key.clone(),
            base_url: config.nano_banana_base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.nano_banana_timeout_secs),
        }
    }

    async fn request(&self, api_key: &str, request: &ProviderRequest) -> Result<String> {
        let (width, height) = request.dimensions();
        let body = GenerateBody {
            prompt: &request.enhanced_prompt,
            width,
            height,
            aspect_ratio: request.aspect_ratio.as_str(),
            image_urls: request.references.urls(),
        };

        let response = self
            .client
            .post(format!("{}/v1/generate", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;
        let payload = read_json(self.name(), response).await?;

        first_str(&payload, &["/image_url", "/data/image_url"])
            .map(str::to_string)
            .or_else(|| payload.get("output").and_then(extract_output_url))
            .ok_or_else(|| AppError::provider(self.name(), "response contained no image URL"))
    }
}

#[async_trait]
impl ImageProvider for NanoBananaProvider {
    fn name(&self) -> &str {
        "nano_banana"
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<GeneratedMedia> {
        let api_key = require_key(&self.api_key, "NANOBANANA_API_KEY")?;
        let url = with_timeout(self.name(), self.timeout, self.request(api_key, request)).await?;
        Ok(GeneratedMedia::new(url, self.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::GenerationRequest;
    use crate::providers::test_support::spawn_upstream;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};

    fn config(base: String, timeout_secs: u64) -> ProvidersConfig {
        ProvidersConfig {
            nano_banana_api_key: Some("nb-test".to_string()),
            nano_banana_base_url: base,
            nano_banana_timeout_secs: timeout_secs,
            ..Default::default()
        }
    }

    fn request() -> ProviderRequest {
        ProviderRequest::from_request(&GenerationRequest {
            prompt: "pleated skirt".to_string(),
            model_url: Some("https://cdn.example.com/model.png".to_string()),
            aspect_ratio: Some("9:16".to_string()),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_reads_image_url() {
        let router = Router::new().route(
            "/v1/generate",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["width"], 576);
                assert_eq!(body["image_urls"][0], "https://cdn.example.com/model.png");
                Json(json!({"image_url": "https://cdn.nanobanana.ai/out.png"}))
            }),
        );
        let provider = NanoBananaProvider::new(reqwest::Client::new(), &config(spawn_upstream(router).await, 15));

        let media = provider.generate(&request()).await.unwrap();
        assert_eq!(media.url, "https://cdn.nanobanana.ai/out.png");
        assert_eq!(media.provider, "nano_banana");
    }

    #[tokio::test]
    async fn test_reads_output_array() {
        let router = Router::new().route(
            "/v1/generate",
            post(|| async { Json(json!({"output": ["https://cdn.nanobanana.ai/0.png"]})) }),
        );
        let provider = NanoBananaProvider::new(reqwest::Client::new(), &config(spawn_upstream(router).await, 15));
        assert_eq!(
            provider.generate(&request()).await.unwrap().url,
            "https://cdn.nanobanana.ai/0.png"
        );
    }

    #[tokio::test]
    async fn test_server_error_is_provider_error() {
        let router = Router::new().route(
            "/v1/generate",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded") }),
        );
        let provider = NanoBananaProvider::new(reqwest::Client::new(), &config(spawn_upstream(router).await, 15));

        let err = provider.generate(&request()).await.unwrap_err();
        assert!(matches!(err, AppError::Provider { .. }));
        assert!(err.to_string().contains("HTTP 500"));
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out() {
        let router = Router::new().route(
            "/v1/generate",
            post(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Json(json!({"image_url": "https://late"}))
            }),
        );
        let mut provider = NanoBananaProvider::new(reqwest::Client::new(), &config(spawn_upstream(router).await, 15));
        provider.timeout = Duration::from_millis(100);

        let err = provider.generate(&request()).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_calling_upstream() {
        let provider = NanoBananaProvider::new(reqwest::Client::new(), &ProvidersConfig::default());
        let err = provider.generate(&request()).await.unwrap_err();
        assert!(matches!(err, AppError::Configuration { .. }));
    }
}
