//! Generation provider abstraction
//!
//! One adapter per vendor behind a single trait:
//! - Nano Banana (images, synchronous)
//! - Kling (video, submit + poll)
//! - Gemini (prompt enhancement, placeholder image)
//! - OpenAI DALL·E 3 (images, synchronous)
//! - Replicate (images, submit + poll)
//! - Clothing AI (garment try-on)
//! - Pollinations and a static placeholder as the fallback chain

mod clothing;
mod gemini;
mod kling;
mod nano_banana;
mod openai;
mod pollinations;
mod replicate;

pub use clothing::ClothingAiProvider;
pub use gemini::GeminiProvider;
pub use kling::KlingProvider;
pub use nano_banana::NanoBananaProvider;
pub use openai::OpenAiProvider;
pub use pollinations::{PlaceholderImages, PollinationsProvider};
pub use replicate::ReplicateProvider;

use crate::config::ProvidersConfig;
use crate::errors::{AppError, Result};
use crate::generation::{
    build_enhanced_prompt, AspectRatio, GenerationRequest, Processor, PromptOptions,
    ReferenceImages,
};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Trait for media generation backends
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Stable identifier used in logs, metrics and persisted records
    fn name(&self) -> &str;

    /// Produce a publicly reachable media URL
    async fn generate(&self, request: &ProviderRequest) -> Result<GeneratedMedia>;
}

/// Provider-facing view of a generation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRequest {
    /// Prompt as the user typed it (trimmed)
    pub prompt: String,
    /// Canonical enhanced prompt sent to every vendor
    pub enhanced_prompt: String,
    pub aspect_ratio: AspectRatio,
    pub references: ReferenceImages,
}

impl ProviderRequest {
    pub fn from_request(request: &GenerationRequest) -> Self {
        let references = request.references();
        let options = PromptOptions::from_request(request, &references);
        let enhanced_prompt = build_enhanced_prompt(&options);

        Self {
            prompt: request.prompt.trim().to_string(),
            enhanced_prompt,
            aspect_ratio: options.aspect_ratio,
            references,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.aspect_ratio.dimensions()
    }
}

/// Media URL plus the adapter that produced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedMedia {
    pub url: String,
    pub provider: String,
}

impl GeneratedMedia {
    pub fn new(url: impl Into<String>, provider: &str) -> Self {
        Self {
            url: url.into(),
            provider: provider.to_string(),
        }
    }
}

/// All adapters wired from configuration
pub struct ProviderSet {
    nano_banana: Arc<dyn ImageProvider>,
    kling: Arc<dyn ImageProvider>,
    gemini: Arc<dyn ImageProvider>,
    openai: Arc<dyn ImageProvider>,
    replicate: Arc<dyn ImageProvider>,
    clothing: Arc<dyn ImageProvider>,
    fallback: Arc<dyn ImageProvider>,
    placeholder: PlaceholderImages,
}

impl ProviderSet {
    /// Build every adapter. Missing API keys are not an error here; the
    /// affected adapter fails at call time and the fallback chain takes over.
    pub fn from_config(config: &ProvidersConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("ginchy/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let placeholder = PlaceholderImages::new(&config.placeholder_base_url)?;

        Ok(Self {
            nano_banana: Arc::new(NanoBananaProvider::new(client.clone(), config)),
            kling: Arc::new(KlingProvider::new(client.clone(), config)),
            gemini: Arc::new(GeminiProvider::new(client.clone(), config, placeholder.clone())),
            openai: Arc::new(OpenAiProvider::new(client.clone(), config)),
            replicate: Arc::new(ReplicateProvider::new(client.clone(), config)),
            clothing: Arc::new(ClothingAiProvider::new(client.clone(), config)),
            fallback: Arc::new(PollinationsProvider::new(client, config)?),
            placeholder,
        })
    }

    /// Adapter for a routed processor
    pub fn primary(&self, processor: Processor) -> Arc<dyn ImageProvider> {
        match processor {
            Processor::NanoBanana => self.nano_banana.clone(),
            Processor::Kling => self.kling.clone(),
            Processor::Gemini => self.gemini.clone(),
            Processor::OpenAi => self.openai.clone(),
            Processor::Replicate => self.replicate.clone(),
        }
    }

    pub fn clothing(&self) -> Arc<dyn ImageProvider> {
        self.clothing.clone()
    }

    /// First link of the fallback chain
    pub fn fallback(&self) -> Arc<dyn ImageProvider> {
        self.fallback.clone()
    }

    /// Last link of the fallback chain; never fails
    pub fn placeholder(&self) -> &PlaceholderImages {
        &self.placeholder
    }

    /// Replace the adapter for one processor
    pub fn with_primary(mut self, processor: Processor, provider: Arc<dyn ImageProvider>) -> Self {
        match processor {
            Processor::NanoBanana => self.nano_banana = provider,
            Processor::Kling => self.kling = provider,
            Processor::Gemini => self.gemini = provider,
            Processor::OpenAi => self.openai = provider,
            Processor::Replicate => self.replicate = provider,
        }
        self
    }

    pub fn with_clothing(mut self, provider: Arc<dyn ImageProvider>) -> Self {
        self.clothing = provider;
        self
    }

    pub fn with_fallback(mut self, provider: Arc<dyn ImageProvider>) -> Self {
        self.fallback = provider;
        self
    }
}

// ============================================================================
// Shared adapter helpers
// ============================================================================

/// API key or a configuration error naming the variable to set
pub(crate) fn require_key<'a>(key: &'a Option<String>, variable: &str) -> Result<&'a str> {
    key.as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| AppError::Configuration {
            message: format!("{} is not set", variable),
        })
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

/// Best human-readable message from an upstream error body
fn upstream_error_text(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let message = parsed.as_ref().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.get("error"))
            .or_else(|| v.get("detail"))
            .or_else(|| v.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });
    truncate_text(message.as_deref().unwrap_or(body).trim(), 512)
}

/// Decode a JSON body, turning non-2xx responses into provider errors
/// that carry the upstream message
pub(crate) async fn read_json(provider: &str, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(AppError::provider(
            provider,
            format!("HTTP {}: {}", status.as_u16(), upstream_error_text(&body)),
        ));
    }

    serde_json::from_str(&body)
        .map_err(|e| AppError::provider(provider, format!("invalid JSON payload: {}", e)))
}

/// First http(s) URL found in a vendor `output` value
pub(crate) fn extract_output_url(value: &Value) -> Option<String> {
    match value {
        Value::String(url) => {
            let trimmed = url.trim();
            trimmed.starts_with("http").then(|| trimmed.to_string())
        }
        Value::Array(rows) => rows.iter().find_map(extract_output_url),
        Value::Object(obj) => ["url", "image_url", "video_url", "output"]
            .iter()
            .filter_map(|key| obj.get(*key))
            .find_map(extract_output_url),
        _ => None,
    }
}

/// First non-blank string found at any of the JSON pointers
pub(crate) fn first_str<'a>(value: &'a Value, pointers: &[&str]) -> Option<&'a str> {
    pointers
        .iter()
        .filter_map(|p| value.pointer(p))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
}

// ============================================================================
// Mock provider
// ============================================================================

#[derive(Debug, Clone)]
enum MockBehavior {
    Succeed(String),
    Fail(String),
    Hang,
}

/// Scriptable provider for tests and local runs without vendor keys
pub struct MockProvider {
    name: String,
    behavior: MockBehavior,
    calls: AtomicUsize,
    last_request: Mutex<Option<ProviderRequest>>,
}

impl MockProvider {
    fn with_behavior(name: &str, behavior: MockBehavior) -> Self {
        Self {
            name: name.to_string(),
            behavior,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn succeeding(name: &str, url: &str) -> Self {
        Self::with_behavior(name, MockBehavior::Succeed(url.to_string()))
    }

    pub fn failing(name: &str, message: &str) -> Self {
        Self::with_behavior(name, MockBehavior::Fail(message.to_string()))
    }

    /// Never resolves; exercises deadlines
    pub fn hanging(name: &str) -> Self {
        Self::with_behavior(name, MockBehavior::Hang)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn last_request(&self) -> Option<ProviderRequest> {
        self.last_request.lock().await.clone()
    }
}

#[async_trait]
impl ImageProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &ProviderRequest) -> Result<GeneratedMedia> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().await = Some(request.clone());

        match &self.behavior {
            MockBehavior::Succeed(url) => Ok(GeneratedMedia::new(url.clone(), &self.name)),
            MockBehavior::Fail(message) => Err(AppError::provider(&self.name, message.clone())),
            MockBehavior::Hang => std::future::pending().await,
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::Router;
    use tokio::net::TcpListener;

    /// Serve `router` on an ephemeral local port and return its base URL
    pub async fn spawn_upstream(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// Base URL nothing listens on
    pub async fn dead_upstream() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_request_enriches_prompt() {
        let request = GenerationRequest {
            prompt: " trench coat ".to_string(),
            camera_view: Some("back".to_string()),
            aspect_ratio: Some("16:9".to_string()),
            ..Default::default()
        };
        let provider_request = ProviderRequest::from_request(&request);

        assert_eq!(provider_request.prompt, "trench coat");
        assert!(provider_request.enhanced_prompt.starts_with("trench coat, back view"));
        assert_eq!(provider_request.dimensions(), (1024, 576));
    }

    #[test]
    fn test_extract_output_url_shapes() {
        assert_eq!(
            extract_output_url(&json!(["https://a/1.png", "https://a/2.png"])).as_deref(),
            Some("https://a/1.png")
        );
        assert_eq!(
            extract_output_url(&json!("https://a/x.mp4")).as_deref(),
            Some("https://a/x.mp4")
        );
        assert_eq!(
            extract_output_url(&json!({"images": [], "url": "https://a/y.png"})).as_deref(),
            Some("https://a/y.png")
        );
        assert_eq!(extract_output_url(&json!(["not-a-url"])), None);
    }

    #[test]
    fn test_upstream_error_prefers_message_field() {
        let body = r#"{"error":{"message":"Billing hard limit reached","type":"billing"}}"#;
        assert_eq!(upstream_error_text(body), "Billing hard limit reached");
        assert_eq!(upstream_error_text("plain failure"), "plain failure");
    }

    #[test]
    fn test_require_key_names_variable() {
        let err = require_key(&None, "OPENAI_API_KEY").unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: OPENAI_API_KEY is not set");
        assert!(require_key(&Some("  ".into()), "X").is_err());
        assert_eq!(require_key(&Some("k".into()), "X").unwrap(), "k");
    }

    #[tokio::test]
    async fn test_provider_set_routes_and_overrides() {
        let set = ProviderSet::from_config(&ProvidersConfig::default()).unwrap();
        assert_eq!(set.primary(Processor::Kling).name(), "kling");
        assert_eq!(set.primary(Processor::OpenAi).name(), "openai");
        assert_eq!(set.fallback().name(), "pollinations");

        let set = set.with_primary(
            Processor::Replicate,
            Arc::new(MockProvider::succeeding("mock", "https://cdn.example.com/m.png")),
        );
        assert_eq!(set.primary(Processor::Replicate).name(), "mock");
    }
}
