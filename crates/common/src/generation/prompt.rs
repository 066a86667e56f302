//! Prompt enrichment and aspect-ratio geometry
//!
//! Every provider adapter receives the same canonical prompt built here,
//! so phrasing never drifts between vendors.

use super::GenerationRequest;
use serde::{Deserialize, Serialize};

/// Fixed suffix appended to every enhanced prompt
pub const PHOTOGRAPHY_SUFFIX: &str = "professional fashion photography, high quality, detailed";

/// Supported aspect ratios
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "9:16")]
    Portrait9x16,
    #[serde(rename = "16:9")]
    Landscape16x9,
    #[serde(rename = "3:2")]
    Landscape3x2,
    #[serde(rename = "2:3")]
    Portrait2x3,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Square,
        AspectRatio::Portrait9x16,
        AspectRatio::Landscape16x9,
        AspectRatio::Landscape3x2,
        AspectRatio::Portrait2x3,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait9x16 => "9:16",
            AspectRatio::Landscape16x9 => "16:9",
            AspectRatio::Landscape3x2 => "3:2",
            AspectRatio::Portrait2x3 => "2:3",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        AspectRatio::ALL.into_iter().find(|r| r.as_str() == value.trim())
    }

    /// Unknown or missing ratios resolve to 1:1
    pub fn resolve(value: Option<&str>) -> Self {
        value.and_then(Self::parse).unwrap_or_default()
    }

    /// Canonical pixel dimensions (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            AspectRatio::Square => (512, 512),
            AspectRatio::Portrait9x16 => (576, 1024),
            AspectRatio::Landscape16x9 => (1024, 576),
            AspectRatio::Landscape3x2 => (768, 512),
            AspectRatio::Portrait2x3 => (512, 768),
        }
    }

    /// DALL·E `size` parameter
    pub fn dalle_size(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1024x1024",
            AspectRatio::Portrait9x16 => "1024x1792",
            AspectRatio::Landscape16x9 => "1792x1024",
            AspectRatio::Landscape3x2 => "1792x1024",
            AspectRatio::Portrait2x3 => "1024x1792",
        }
    }

    fn phrase(&self) -> &'static str {
        match self {
            AspectRatio::Square => "square composition",
            AspectRatio::Portrait9x16 => "vertical 9:16 composition",
            AspectRatio::Landscape16x9 => "wide 16:9 composition",
            AspectRatio::Landscape3x2 => "landscape 3:2 composition",
            AspectRatio::Portrait2x3 => "portrait 2:3 composition",
        }
    }
}

pub fn get_width(aspect_ratio: &str) -> u32 {
    AspectRatio::resolve(Some(aspect_ratio)).dimensions().0
}

pub fn get_height(aspect_ratio: &str) -> u32 {
    AspectRatio::resolve(Some(aspect_ratio)).dimensions().1
}

/// Reference assets passed to providers as plain URLs
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceImages {
    pub model_url: Option<String>,
    pub pose_url: Option<String>,
    pub garment_url: Option<String>,
    pub environment_url: Option<String>,
}

impl ReferenceImages {
    /// Present references in a fixed order: model, pose, garment, environment
    pub fn labeled(&self) -> Vec<(&'static str, &str)> {
        [
            ("Character reference", self.model_url.as_deref()),
            ("Pose reference", self.pose_url.as_deref()),
            ("Garment reference", self.garment_url.as_deref()),
            ("Environment reference", self.environment_url.as_deref()),
        ]
        .into_iter()
        .filter_map(|(label, url)| {
            url.map(str::trim)
                .filter(|u| !u.is_empty())
                .map(|u| (label, u))
        })
        .collect()
    }

    pub fn urls(&self) -> Vec<&str> {
        self.labeled().into_iter().map(|(_, url)| url).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.labeled().is_empty()
    }
}

/// Structured inputs for the canonical prompt
#[derive(Clone, Debug, Default)]
pub struct PromptOptions<'a> {
    pub prompt: &'a str,
    pub camera_view: Option<&'a str>,
    pub lens_angle: Option<&'a str>,
    pub aspect_ratio: AspectRatio,
    pub references: Option<&'a ReferenceImages>,
}

impl<'a> PromptOptions<'a> {
    pub fn from_request(request: &'a GenerationRequest, references: &'a ReferenceImages) -> Self {
        Self {
            prompt: &request.prompt,
            camera_view: request.camera_view.as_deref(),
            lens_angle: request.lens_angle.as_deref(),
            aspect_ratio: AspectRatio::resolve(request.aspect_ratio.as_deref()),
            references: Some(references),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Build the provider-agnostic enhanced prompt
pub fn build_enhanced_prompt(options: &PromptOptions<'_>) -> String {
    let mut parts: Vec<String> = vec![options.prompt.trim().to_string()];

    if let Some(view) = non_blank(options.camera_view) {
        if view.to_lowercase().ends_with("view") {
            parts.push(view.to_string());
        } else {
            parts.push(format!("{} view", view));
        }
    }

    parts.push(options.aspect_ratio.phrase().to_string());

    if let Some(lens) = non_blank(options.lens_angle) {
        parts.push(format!("shot with {} lens", lens));
    }

    parts.push(PHOTOGRAPHY_SUFFIX.to_string());

    let mut prompt = parts.join(", ");

    if let Some(references) = options.references {
        for (label, url) in references.labeled() {
            prompt.push_str(&format!(". {}: {}", label, url));
        }
    }

    prompt
}
