//! Clothing AI try-on adapter

use super::{extract_output_url, first_str, read_json, require_key, GeneratedMedia, ImageProvider, ProviderRequest};
use crate::config::ProvidersConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde::Serialize;

pub struct ClothingAiProvider {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

#[derive(Serialize)]
struct TryOnBody<'a> {
    model_image: &'a str,
    garment_image: &'a str,
    prompt: &'a str,
}

impl ClothingAiProvider {
    pub fn new(client: reqwest::Client, config: &ProvidersConfig) -> Self {
        Self {
            client,
            api_key: config.clothing_ai_api_key.clone(),
            base_url: config.clothing_ai_base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ImageProvider for ClothingAiProvider {
    fn name(&self) -> &str {
        "clothing_ai"
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<GeneratedMedia> {
        let api_key = require_key(&self.api_key, "CLOTHING_AI_API_KEY")?;

        let (Some(model_image), Some(garment_image)) = (
            request.references.model_url.as_deref(),
            request.references.garment_url.as_deref(),
        ) else {
            return Err(AppError::provider(self.name(), "model and garment images are required"));
        };

        let body = TryOnBody {
            model_image,
            garment_image,
            prompt: &request.enhanced_prompt,
        };

        let response = self
            .client
            .post(format!("{}/v1/try-on", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await?;
        let payload = read_json(self.name(), response).await?;

        let url = first_str(&payload, &["/result_url", "/image_url"])
            .map(str::to_string)
            .or_else(|| payload.get("output").and_then(extract_output_url))
            .ok_or_else(|| AppError::provider(self.name(), "response contained no image URL"))?;

        Ok(GeneratedMedia::new(url, self.name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::ClothingRequest;
    use crate::providers::test_support::spawn_upstream;
    use axum::{routing::post, Json, Router};
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_try_on_round() {
        let router = Router::new().route(
            "/v1/try-on",
            post(|Json(body): Json<Value>| async move {
                assert_eq!(body["garment_image"], "https://cdn.example.com/g.png");
                Json(json!({"result_url": "https://clothing.example.com/r.png"}))
            }),
        );
        let config = ProvidersConfig {
            clothing_ai_api_key: Some("ca-test".to_string()),
            clothing_ai_base_url: spawn_upstream(router).await,
            ..Default::default()
        };
        let provider = ClothingAiProvider::new(reqwest::Client::new(), &config);

        let request = ProviderRequest::from_request(
            &ClothingRequest {
                model_url: "https://cdn.example.com/m.png".to_string(),
                garment_url: "https://cdn.example.com/g.png".to_string(),
                ..Default::default()
            }
            .into_generation_request(),
        );

        let media = provider.generate(&request).await.unwrap();
        assert_eq!(media.url, "https://clothing.example.com/r.png");
        assert_eq!(media.provider, "clothing_ai");
    }
}
