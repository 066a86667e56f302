//! Gemini adapter
//!
//! Gemini only rewrites the prompt; the image itself is the placeholder
//! service rendered from the rewritten text. Enhancement is best-effort:
//! a missing key or a failed call falls back to the canonical prompt.

use super::{first_str, read_json, GeneratedMedia, ImageProvider, PlaceholderImages, ProviderRequest};
use crate::config::ProvidersConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde_json::json;
use tracing::warn;

const INSTRUCTION: &str = "Rewrite this fashion image prompt to be vivid and specific. \
Reply with the prompt only, under 60 words:\n\n";

pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    placeholder: PlaceholderImages,
}

impl GeminiProvider {
    pub fn new(client: reqwest::Client, config: &ProvidersConfig, placeholder: PlaceholderImages) -> Self {
        Self {
            client,
            api_key: config.gemini_api_key.clone().filter(|k| !k.trim().is_empty()),
            base_url: config.gemini_base_url.trim_end_matches('/').to_string(),
            model: config.gemini_model.clone(),
            placeholder,
        }
    }

    async fn enhance(&self, api_key: &str, prompt: &str) -> Result<String> {
        let endpoint = format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model);
        let url = Url::parse_with_params(&endpoint, &[("key", api_key)]).map_err(|e| {
            AppError::Configuration {
                message: format!("Invalid Gemini endpoint: {}", e),
            }
        })?;

        let body = json!({
            "contents": [{"parts": [{"text": format!("{}{}", INSTRUCTION, prompt)}]}]
        });

        let response = self.client.post(url).json(&body).send().await?;
        let payload = read_json(self.name(), response).await?;

        first_str(&payload, &["/candidates/0/content/parts/0/text"])
            .map(str::to_string)
            .ok_or_else(|| AppError::provider(self.name(), "response contained no text"))
    }
}

#[async_trait]
impl ImageProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<GeneratedMedia> {
        let mut rendered = request.clone();

        if let Some(api_key) = self.api_key.as_deref() {
            match self.enhance(api_key, &request.enhanced_prompt).await {
                Ok(text) => rendered.prompt = text,
                Err(e) => warn!(error = %e, "Gemini enhancement failed, using base prompt"),
            }
        }

        Ok(GeneratedMedia::new(self.placeholder.url_for(&rendered), self.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::GenerationRequest;
    use crate::providers::test_support::spawn_upstream;
    use axum::{extract::Query, http::StatusCode, routing::post, Json, Router};
    use serde_json::Value;
    use std::collections::HashMap;

    fn placeholder() -> PlaceholderImages {
        PlaceholderImages::new("https://image.pollinations.ai").unwrap()
    }

    fn request() -> ProviderRequest {
        ProviderRequest::from_request(&GenerationRequest {
            prompt: "cropped cardigan".to_string(),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_enhanced_text_drives_placeholder() {
        let router = Router::new().route(
            "/v1beta/models/{model}",
            post(|Query(params): Query<HashMap<String, String>>, Json(_): Json<Value>| async move {
                assert_eq!(params.get("key").map(String::as_str), Some("gm-test"));
                Json(json!({
                    "candidates": [{"content": {"parts": [{"text": "cropped wool cardigan at golden hour"}]}}]
                }))
            }),
        );
        let config = ProvidersConfig {
            gemini_api_key: Some("gm-test".to_string()),
            gemini_base_url: spawn_upstream(router).await,
            ..Default::default()
        };
        let provider = GeminiProvider::new(reqwest::Client::new(), &config, placeholder());

        let media = provider.generate(&request()).await.unwrap();
        assert!(media
            .url
            .starts_with("https://image.pollinations.ai/prompt/cropped%20wool%20cardigan%20at%20golden%20hour?"));
    }

    #[tokio::test]
    async fn test_degrades_on_upstream_error() {
        let router = Router::new().route(
            "/v1beta/models/{model}",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "quota") }),
        );
        let config = ProvidersConfig {
            gemini_api_key: Some("gm-test".to_string()),
            gemini_base_url: spawn_upstream(router).await,
            ..Default::default()
        };
        let provider = GeminiProvider::new(reqwest::Client::new(), &config, placeholder());

        let media = provider.generate(&request()).await.unwrap();
        assert!(media.url.starts_with("https://image.pollinations.ai/prompt/cropped%20cardigan?"));
    }

    #[tokio::test]
    async fn test_without_key_skips_network() {
        let provider = GeminiProvider::new(reqwest::Client::new(), &ProvidersConfig::default(), placeholder());
        let media = provider.generate(&request()).await.unwrap();
        assert_eq!(media.provider, "gemini");
        assert!(media.url.contains("/prompt/cropped%20cardigan?"));
    }
}
