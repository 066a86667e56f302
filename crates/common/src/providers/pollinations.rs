//! Pollinations fallback and the static placeholder

use super::{GeneratedMedia, ImageProvider, ProviderRequest};
use crate::config::ProvidersConfig;
use crate::errors::{AppError, Result};
use crate::generation::with_timeout;
use async_trait::async_trait;
use rand::Rng;
use reqwest::Url;
use std::time::Duration;
use tracing::debug;

/// Builds `{base}/prompt/{prompt}?width=..&height=..&seed=..&nologo=true`
/// without touching the network
#[derive(Debug, Clone)]
pub struct PlaceholderImages {
    base: Url,
}

impl PlaceholderImages {
    pub fn new(base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| AppError::Configuration {
            message: format!("Invalid image base URL {}: {}", base_url, e),
        })?;
        if base.cannot_be_a_base() {
            return Err(AppError::Configuration {
                message: format!("Image base URL cannot carry a path: {}", base_url),
            });
        }
        Ok(Self { base })
    }

    pub fn url_with_seed(&self, prompt: &str, (width, height): (u32, u32), seed: u32) -> String {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push("prompt").push(prompt);
        }
        url.query_pairs_mut()
            .append_pair("width", &width.to_string())
            .append_pair("height", &height.to_string())
            .append_pair("seed", &seed.to_string())
            .append_pair("nologo", "true");
        url.to_string()
    }

    /// Randomly seeded URL for the request's prompt and geometry
    pub fn url_for(&self, request: &ProviderRequest) -> String {
        let seed = rand::thread_rng().gen_range(0..1_000_000);
        self.url_with_seed(&request.prompt, request.dimensions(), seed)
    }
}

/// Free text-to-image service; the URL itself is the generation, so the
/// adapter only checks that the service answers
pub struct PollinationsProvider {
    client: reqwest::Client,
    images: PlaceholderImages,
    probe_timeout: Duration,
}

impl PollinationsProvider {
    pub fn new(client: reqwest::Client, config: &ProvidersConfig) -> Result<Self> {
        Ok(Self {
            client,
            images: PlaceholderImages::new(&config.pollinations_base_url)?,
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
        })
    }
}

#[async_trait]
impl ImageProvider for PollinationsProvider {
    fn name(&self) -> &str {
        "pollinations"
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<GeneratedMedia> {
        let url = self.images.url_for(request);

        let probe = async {
            let response = self.client.get(&url).send().await?;
            if !response.status().is_success() {
                return Err(AppError::provider(
                    "pollinations",
                    format!("probe returned HTTP {}", response.status().as_u16()),
                ));
            }
            Ok(())
        };
        with_timeout(self.name(), self.probe_timeout, probe).await?;

        debug!(url = %url, "Pollinations probe succeeded");
        Ok(GeneratedMedia::new(url, self.name()))
    }
}
