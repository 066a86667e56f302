//! Configuration management for Ginchy services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml)
//! - Conventional vendor variables (OPENAI_API_KEY, KLING_API_KEY, ...)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Authentication configuration
    #[serde(default)]
    pub auth: AuthConfig,

    /// Generation pipeline deadlines
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Third-party AI providers
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Character training
    #[serde(default)]
    pub training: TrainingConfig,

    /// Async generation worker
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Apply pending migrations on startup
    #[serde(default = "default_enabled")]
    pub run_migrations: bool,

    /// Directory holding the SQL migrations
    #[serde(default = "default_migrations_path")]
    pub migrations_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// HS256 secret shared with the identity provider
    pub jwt_secret: Option<String>,

    /// Expected `aud` claim
    #[serde(default = "default_jwt_audience")]
    pub jwt_audience: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Outer deadline around enrich + dispatch for still images
    #[serde(default = "default_image_timeout")]
    pub image_timeout_secs: u64,

    /// Outer deadline for video jobs; must exceed the video polling ceiling
    #[serde(default = "default_video_timeout")]
    pub video_timeout_secs: u64,

    /// Outer deadline for clothing applications
    #[serde(default = "default_clothing_timeout")]
    pub clothing_timeout_secs: u64,
}

/// Credentials and endpoints for every generation vendor
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvidersConfig {
    pub nano_banana_api_key: Option<String>,
    #[serde(default = "default_nano_banana_base")]
    pub nano_banana_base_url: String,
    #[serde(default = "default_nano_banana_timeout")]
    pub nano_banana_timeout_secs: u64,

    pub kling_api_key: Option<String>,
    #[serde(default = "default_kling_base")]
    pub kling_base_url: String,
    #[serde(default = "default_kling_poll_interval")]
    pub kling_poll_interval_secs: u64,
    #[serde(default = "default_kling_max_polls")]
    pub kling_max_polls: u32,

    pub gemini_api_key: Option<String>,
    #[serde(default = "default_gemini_base")]
    pub gemini_base_url: String,
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,

    pub openai_api_key: Option<String>,
    #[serde(default = "default_openai_base")]
    pub openai_base_url: String,

    pub replicate_api_token: Option<String>,
    #[serde(default = "default_replicate_base")]
    pub replicate_base_url: String,
    #[serde(default = "default_replicate_model_version")]
    pub replicate_model_version: String,
    #[serde(default = "default_replicate_poll_interval")]
    pub replicate_poll_interval_ms: u64,
    #[serde(default = "default_replicate_max_polls")]
    pub replicate_max_polls: u32,

    pub clothing_ai_api_key: Option<String>,
    #[serde(default = "default_clothing_base")]
    pub clothing_ai_base_url: String,

    /// Free image service used as the first fallback
    #[serde(default = "default_pollinations_base")]
    pub pollinations_base_url: String,

    /// Base for placeholder URLs handed back when everything else failed
    #[serde(default = "default_pollinations_base")]
    pub placeholder_base_url: String,

    /// Deadline for the Pollinations reachability probe
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrainingConfig {
    /// Shared secret expected on training callbacks
    pub webhook_secret: Option<String>,

    /// Public URL the trainer calls back, `{asset_id}` is substituted
    #[serde(default = "default_training_callback")]
    pub callback_url: String,

    /// Upper bound on training images per character
    #[serde(default = "default_max_training_images")]
    pub max_training_images: usize,

    /// Replicate trainer model (`owner/name`)
    #[serde(default = "default_trainer_model")]
    pub trainer_model: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Sleep between claims when the queue is empty
    #[serde(default = "default_worker_idle")]
    pub idle_poll_ms: u64,

    /// A job stuck in `processing` longer than this is requeued
    #[serde(default = "default_worker_lease")]
    pub lease_secs: u64,

    /// Attempts before a stale job is failed instead of requeued
    #[serde(default = "default_worker_attempts")]
    pub max_attempts: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log filter (debug, info, warn, error or an EnvFilter directive)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name reported in logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Generation requests per second (whole gateway)
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_database_url() -> String { "postgres://localhost/ginchy".to_string() }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_migrations_path() -> String { "migrations".to_string() }
fn default_jwt_audience() -> String { "authenticated".to_string() }
fn default_image_timeout() -> u64 { 20 }
fn default_video_timeout() -> u64 { 330 }
fn default_clothing_timeout() -> u64 { 30 }
fn default_nano_banana_base() -> String { "https://api.nanobanana.ai".to_string() }
fn default_nano_banana_timeout() -> u64 { 15 }
fn default_kling_base() -> String { "https://api.klingai.com".to_string() }
fn default_kling_poll_interval() -> u64 { 5 }
fn default_kling_max_polls() -> u32 { 60 }
fn default_gemini_base() -> String { "https://generativelanguage.googleapis.com".to_string() }
fn default_gemini_model() -> String { "gemini-1.5-flash".to_string() }
fn default_openai_base() -> String { "https://api.openai.com".to_string() }
fn default_replicate_base() -> String { "https://api.replicate.com".to_string() }
fn default_replicate_model_version() -> String {
    "stability-ai/sdxl:7762fd07cf82c948538e41f63f77d685e02b063e37e496e96eefd46c929f9bdc".to_string()
}
fn default_replicate_poll_interval() -> u64 { 1000 }
fn default_replicate_max_polls() -> u32 { 120 }
fn default_clothing_base() -> String { "https://api.clothing-ai.com".to_string() }
fn default_pollinations_base() -> String { "https://image.pollinations.ai".to_string() }
fn default_probe_timeout() -> u64 { 5 }
fn default_training_callback() -> String {
    "http://localhost:8080/v1/characters/{asset_id}/training".to_string()
}
fn default_max_training_images() -> usize { 20 }
fn default_trainer_model() -> String { "ostris/flux-dev-lora-trainer".to_string() }
fn default_worker_idle() -> u64 { 1000 }
fn default_worker_lease() -> u64 { 600 }
fn default_worker_attempts() -> i32 { 3 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "ginchy".to_string() }
fn default_rate_limit() -> u32 { 10 }
fn default_burst() -> u32 { 20 }
fn default_enabled() -> bool { true }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        let mut config: Self = config.try_deserialize()?;
        config.apply_conventional_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        let mut config: Self = config.try_deserialize()?;
        config.apply_conventional_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Fill unset secrets from the variable names vendors document.
    /// Values already provided through files or `APP__` win.
    pub fn apply_conventional_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let fill = |slot: &mut Option<String>, name: &str| {
            if slot.is_none() {
                *slot = lookup(name).filter(|v| !v.trim().is_empty());
            }
        };

        let providers = &mut self.providers;
        fill(&mut providers.nano_banana_api_key, "NANOBANANA_API_KEY");
        fill(&mut providers.kling_api_key, "KLING_API_KEY");
        fill(&mut providers.gemini_api_key, "GEMINI_API_KEY");
        fill(&mut providers.openai_api_key, "OPENAI_API_KEY");
        fill(&mut providers.replicate_api_token, "REPLICATE_API_TOKEN");
        fill(&mut providers.clothing_ai_api_key, "CLOTHING_AI_API_KEY");
        fill(&mut self.auth.jwt_secret, "SUPABASE_JWT_SECRET");
        fill(&mut self.training.webhook_secret, "TRAINING_WEBHOOK_SECRET");

        if self.database.url == default_database_url() {
            if let Some(url) = lookup("DATABASE_URL") {
                self.database.url = url;
            }
        }
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }
}

impl GenerationConfig {
    pub fn image_timeout(&self) -> Duration {
        Duration::from_secs(self.image_timeout_secs)
    }

    pub fn video_timeout(&self) -> Duration {
        Duration::from_secs(self.video_timeout_secs)
    }

    pub fn clothing_timeout(&self) -> Duration {
        Duration::from_secs(self.clothing_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            read_url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            run_migrations: default_enabled(),
            migrations_path: default_migrations_path(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            jwt_audience: default_jwt_audience(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            image_timeout_secs: default_image_timeout(),
            video_timeout_secs: default_video_timeout(),
            clothing_timeout_secs: default_clothing_timeout(),
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            nano_banana_api_key: None,
            nano_banana_base_url: default_nano_banana_base(),
            nano_banana_timeout_secs: default_nano_banana_timeout(),
            kling_api_key: None,
            kling_base_url: default_kling_base(),
            kling_poll_interval_secs: default_kling_poll_interval(),
            kling_max_polls: default_kling_max_polls(),
            gemini_api_key: None,
            gemini_base_url: default_gemini_base(),
            gemini_model: default_gemini_model(),
            openai_api_key: None,
            openai_base_url: default_openai_base(),
            replicate_api_token: None,
            replicate_base_url: default_replicate_base(),
            replicate_model_version: default_replicate_model_version(),
            replicate_poll_interval_ms: default_replicate_poll_interval(),
            replicate_max_polls: default_replicate_max_polls(),
            clothing_ai_api_key: None,
            clothing_ai_base_url: default_clothing_base(),
            pollinations_base_url: default_pollinations_base(),
            placeholder_base_url: default_pollinations_base(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            webhook_secret: None,
            callback_url: default_training_callback(),
            max_training_images: default_max_training_images(),
            trainer_model: default_trainer_model(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_poll_ms: default_worker_idle(),
            lease_secs: default_worker_lease(),
            max_attempts: default_worker_attempts(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}
