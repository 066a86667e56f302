//! Generation pipeline: request types, processor routing and orchestration
//!
//! ```text
//! validate -> enrich -> dispatch (deadline) -> fallback chain -> commit
//! ```
//!
//! Nothing is written until a provider has returned a URL; validation
//! failures and provider errors leave credits untouched.

mod orchestrator;
pub mod policy;
pub mod prompt;

pub use orchestrator::{GenerationService, Requester};
pub use policy::{poll_until, with_timeout, PollPolicy, PollState};
pub use prompt::{build_enhanced_prompt, get_height, get_width, AspectRatio, PromptOptions, ReferenceImages};

use crate::errors::{AppError, Result};
use crate::packages::{Action, Feature};
use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

/// What a generation produces and how it is metered
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationKind {
    Image,
    Video,
    ClothingApplication,
}

impl GenerationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationKind::Image => "image",
            GenerationKind::Video => "video",
            GenerationKind::ClothingApplication => "clothing_application",
        }
    }

    /// Credits debited on success
    pub fn cost(&self) -> i32 {
        match self {
            GenerationKind::Image => 1,
            GenerationKind::Video => 2,
            GenerationKind::ClothingApplication => 2,
        }
    }

    /// Monthly limit this kind counts against
    pub fn action(&self) -> Action {
        match self {
            GenerationKind::Image => Action::ImageGenerations,
            GenerationKind::Video => Action::VideoGenerations,
            GenerationKind::ClothingApplication => Action::ClothingApplications,
        }
    }

    /// Feature the package must grant, if any
    pub fn required_feature(&self) -> Option<Feature> {
        match self {
            GenerationKind::Image => None,
            GenerationKind::Video => Some(Feature::VideoGeneration),
            GenerationKind::ClothingApplication => Some(Feature::ClothingAi),
        }
    }

    /// Still-image kinds degrade to a fallback image; video does not
    pub fn allows_fallback(&self) -> bool {
        !matches!(self, GenerationKind::Video)
    }
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary provider selected by the request's `processor` label
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Processor {
    NanoBanana,
    Kling,
    Gemini,
    OpenAi,
    Replicate,
}

impl Processor {
    pub const ALL: [Processor; 5] = [
        Processor::NanoBanana,
        Processor::Kling,
        Processor::Gemini,
        Processor::OpenAi,
        Processor::Replicate,
    ];

    /// Exact label match; anything unrecognised routes to Replicate
    pub fn from_label(label: Option<&str>) -> Self {
        match label {
            Some("Nano Banana") => Processor::NanoBanana,
            Some("Kling") => Processor::Kling,
            Some("Gemini") => Processor::Gemini,
            Some("OpenAI DALL-E") => Processor::OpenAi,
            _ => Processor::Replicate,
        }
    }

    /// Label as shown in the client
    pub fn label(&self) -> &'static str {
        match self {
            Processor::NanoBanana => "Nano Banana",
            Processor::Kling => "Kling",
            Processor::Gemini => "Gemini",
            Processor::OpenAi => "OpenAI DALL-E",
            Processor::Replicate => "Replicate",
        }
    }

    /// Stable identifier for logs, metrics and the `processor` column
    pub fn name(&self) -> &'static str {
        match self {
            Processor::NanoBanana => "nano_banana",
            Processor::Kling => "kling",
            Processor::Gemini => "gemini",
            Processor::OpenAi => "openai",
            Processor::Replicate => "replicate",
        }
    }

    pub fn kind(&self) -> GenerationKind {
        match self {
            Processor::Kling => GenerationKind::Video,
            _ => GenerationKind::Image,
        }
    }
}

/// Inbound generation request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    #[validate(length(max = 1000, message = "Prompt is too long"))]
    pub prompt: String,

    #[validate(url)]
    pub model_url: Option<String>,

    #[validate(url)]
    pub pose_url: Option<String>,

    #[validate(url)]
    pub garment_url: Option<String>,

    #[validate(url)]
    pub environment_url: Option<String>,

    #[validate(length(max = 64))]
    pub camera_view: Option<String>,

    #[validate(length(max = 64))]
    pub lens_angle: Option<String>,

    pub aspect_ratio: Option<String>,

    pub processor: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 255))]
    pub idempotency_key: Option<String>,
}

impl GenerationRequest {
    pub fn processor(&self) -> Processor {
        Processor::from_label(self.processor.as_deref())
    }

    pub fn references(&self) -> ReferenceImages {
        ReferenceImages {
            model_url: self.model_url.clone(),
            pose_url: self.pose_url.clone(),
            garment_url: self.garment_url.clone(),
            environment_url: self.environment_url.clone(),
        }
    }

    /// Field validation plus the non-blank prompt rule
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        if self.prompt.trim().is_empty() {
            return Err(AppError::Validation {
                message: "Prompt is required".to_string(),
                field: Some("prompt".to_string()),
            });
        }
        Ok(())
    }
}

/// Inbound garment try-on request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ClothingRequest {
    #[validate(url)]
    pub model_url: String,

    #[validate(url)]
    pub garment_url: String,

    #[validate(length(max = 1000, message = "Prompt is too long"))]
    pub prompt: Option<String>,

    pub aspect_ratio: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 255))]
    pub idempotency_key: Option<String>,
}

impl ClothingRequest {
    const DEFAULT_PROMPT: &'static str = "model wearing the reference garment";

    /// Clothing runs through the same pipeline as any generation
    pub fn into_generation_request(self) -> GenerationRequest {
        let prompt = self
            .prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| Self::DEFAULT_PROMPT.to_string());

        GenerationRequest {
            prompt,
            model_url: Some(self.model_url),
            garment_url: Some(self.garment_url),
            aspect_ratio: self.aspect_ratio,
            idempotency_key: self.idempotency_key,
            ..Default::default()
        }
    }
}

/// A committed (or replayed) generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutcome {
    pub generation_id: Uuid,
    pub image_url: String,
    pub kind: GenerationKind,
    pub processor: String,
    pub credits_charged: i32,
    pub remaining_credits: i32,
    pub used_fallback: bool,
    pub replayed: bool,
}

/// Shape returned to the client by the generate action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GenerationResult {
    Success {
        success: bool,
        #[serde(rename = "imageUrl")]
        image_url: String,
    },
    Failure {
        error: String,
    },
}

impl GenerationResult {
    pub fn is_success(&self) -> bool {
        matches!(self, GenerationResult::Success { .. })
    }
}

impl From<Result<GenerationOutcome>> for GenerationResult {
    fn from(result: Result<GenerationOutcome>) -> Self {
        match result {
            Ok(outcome) => GenerationResult::Success {
                success: true,
                image_url: outcome.image_url,
            },
            Err(e) => GenerationResult::Failure {
                error: e.user_message(),
            },
        }
    }
}

/// Start of the calendar month (UTC) containing `now`; usage windows reset here
pub fn current_period_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}
