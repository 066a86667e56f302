//! OpenAI DALL·E 3 adapter

use super::{first_str, read_json, require_key, GeneratedMedia, ImageProvider, ProviderRequest};
use crate::config::ProvidersConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::Serialize;

const MODEL: &str = "dall-e-3";

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

#[derive(Serialize)]
struct ImagesRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    size: &'a str,
}

impl OpenAiProvider {
    pub fn new(client: reqwest::Client, config: &ProvidersConfig) -> Self {
        Self {
            client,
            api_key: config.openai_api_key.clone(),
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ImageProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<GeneratedMedia> {
        let api_key = require_key(&self.api_key, "OPENAI_API_KEY")?;

        let body = ImagesRequest {
            model: MODEL,
            prompt: &request.enhanced_prompt,
            n: 1,
            size: request.aspect_ratio.dalle_size(),
        };

        let response = self
            .client
            .post(format!("{}/v1/images/generations", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;
        let payload = read_json(self.name(), response).await?;

        let url = first_str(&payload, &["/data/0/url"])
            .ok_or_else(|| AppError::provider(self.name(), "response contained no image URL"))?;

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

    fn provider(base: String) -> OpenAiProvider {
        let config = ProvidersConfig {
            openai_api_key: Some("sk-test".to_string()),
            openai_base_url: base,
            ..Default::default()
        };
        OpenAiProvider::new(reqwest::Client::new(), &config)
    }

    #[tokio::test]
    async fn test_sends_dalle_size_and_reads_url() {
        let router = Router::new().route(
            "/v1/images/generations",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["model"], "dall-e-3");
                assert_eq!(body["size"], "1792x1024");
                Json(json!({"data": [{"url": "https://oaidalle.example.com/img.png"}]}))
            }),
        );
        let request = ProviderRequest::from_request(&GenerationRequest {
            prompt: "evening gown".to_string(),
            aspect_ratio: Some("16:9".to_string()),
            ..Default::default()
        });

        let media = provider(spawn_upstream(router).await).generate(&request).await.unwrap();
        assert_eq!(media.url, "https://oaidalle.example.com/img.png");
    }

    #[tokio::test]
    async fn test_propagates_upstream_error_text() {
        let router = Router::new().route(
            "/v1/images/generations",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": {"message": "Your request was rejected by the safety system."}})),
                )
            }),
        );
        let request = ProviderRequest::from_request(&GenerationRequest {
            prompt: "swimwear".to_string(),
            ..Default::default()
        });

        let err = provider(spawn_upstream(router).await).generate(&request).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "openai request failed: HTTP 400: Your request was rejected by the safety system."
        );
    }
}
