//! Subscription packages and entitlement checks
//!
//! The package table is static: one entry per tier, fixed at compile time.
//! Every function here is a pure lookup or comparison over that table.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Subscription tier, ordered standard < pro < premium
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Standard,
    Pro,
    Premium,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Standard, Tier::Pro, Tier::Premium];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Standard => "standard",
            Tier::Pro => "pro",
            Tier::Premium => "premium",
        }
    }

    /// Exact, case-sensitive match against the stored tier names
    pub fn parse(value: &str) -> Option<Self> {
        Tier::ALL.into_iter().find(|tier| tier.as_str() == value)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability flags a package may grant
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Upscaling,
    BatchProcessing,
    ApiAccess,
    PrioritySupport,
    ClothingAi,
    VideoGeneration,
    CharacterTraining,
}

impl Feature {
    pub const ALL: [Feature; 7] = [
        Feature::Upscaling,
        Feature::BatchProcessing,
        Feature::ApiAccess,
        Feature::PrioritySupport,
        Feature::ClothingAi,
        Feature::VideoGeneration,
        Feature::CharacterTraining,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Upscaling => "upscaling",
            Feature::BatchProcessing => "batch_processing",
            Feature::ApiAccess => "api_access",
            Feature::PrioritySupport => "priority_support",
            Feature::ClothingAi => "clothing_ai",
            Feature::VideoGeneration => "video_generation",
            Feature::CharacterTraining => "character_training",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Feature::ALL.into_iter().find(|f| f.as_str() == value)
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metered actions with a monthly ceiling
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ImageGenerations,
    VideoGenerations,
    Upscales,
    ClothingApplications,
}

impl Action {
    pub const ALL: [Action; 4] = [
        Action::ImageGenerations,
        Action::VideoGenerations,
        Action::Upscales,
        Action::ClothingApplications,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::ImageGenerations => "image_generations",
            Action::VideoGenerations => "video_generations",
            Action::Upscales => "upscales",
            Action::ClothingApplications => "clothing_applications",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Action::ALL.into_iter().find(|a| a.as_str() == value)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FeatureFlags {
    pub upscaling: bool,
    pub batch_processing: bool,
    pub api_access: bool,
    pub priority_support: bool,
    pub clothing_ai: bool,
    pub video_generation: bool,
    pub character_training: bool,
}

impl FeatureFlags {
    pub fn get(&self, feature: Feature) -> bool {
        match feature {
            Feature::Upscaling => self.upscaling,
            Feature::BatchProcessing => self.batch_processing,
            Feature::ApiAccess => self.api_access,
            Feature::PrioritySupport => self.priority_support,
            Feature::ClothingAi => self.clothing_ai,
            Feature::VideoGeneration => self.video_generation,
            Feature::CharacterTraining => self.character_training,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct UsageLimits {
    pub image_generations: u32,
    pub video_generations: u32,
    pub upscales: u32,
    pub clothing_applications: u32,
}

impl UsageLimits {
    pub fn get(&self, action: Action) -> u32 {
        match action {
            Action::ImageGenerations => self.image_generations,
            Action::VideoGenerations => self.video_generations,
            Action::Upscales => self.upscales,
            Action::ClothingApplications => self.clothing_applications,
        }
    }
}

/// A subscription package
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Package {
    pub id: &'static str,
    pub name: &'static str,
    pub tier: Tier,
    pub monthly_credits: u32,
    pub max_models: u32,
    pub max_videos: u32,
    pub price_monthly_cents: u32,
    pub features: FeatureFlags,
    pub limits: UsageLimits,
}

impl Package {
    pub fn limit(&self, action: Action) -> u32 {
        self.limits.get(action)
    }
}

static PACKAGES: [Package; 3] = [
    Package {
        id: "pkg_standard",
        name: "Standard",
        tier: Tier::Standard,
        monthly_credits: 100,
        max_models: 1,
        max_videos: 0,
        price_monthly_cents: 1_900,
        features: FeatureFlags {
            upscaling: true,
            batch_processing: false,
            api_access: false,
            priority_support: false,
            clothing_ai: true,
            video_generation: false,
            character_training: false,
        },
        limits: UsageLimits {
            image_generations: 100,
            video_generations: 0,
            upscales: 20,
            clothing_applications: 25,
        },
    },
    Package {
        id: "pkg_pro",
        name: "Pro",
        tier: Tier::Pro,
        monthly_credits: 500,
        max_models: 5,
        max_videos: 20,
        price_monthly_cents: 4_900,
        features: FeatureFlags {
            upscaling: true,
            batch_processing: true,
            api_access: false,
            priority_support: false,
            clothing_ai: true,
            video_generation: true,
            character_training: true,
        },
        limits: UsageLimits {
            image_generations: 500,
            video_generations: 20,
            upscales: 100,
            clothing_applications: 150,
        },
    },
    Package {
        id: "pkg_premium",
        name: "Premium",
        tier: Tier::Premium,
        monthly_credits: 1_500,
        max_models: 20,
        max_videos: 100,
        price_monthly_cents: 9_900,
        features: FeatureFlags {
            upscaling: true,
            batch_processing: true,
            api_access: true,
            priority_support: true,
            clothing_ai: true,
            video_generation: true,
            character_training: true,
        },
        limits: UsageLimits {
            image_generations: 1_500,
            video_generations: 100,
            upscales: 500,
            clothing_applications: 600,
        },
    },
];

/// All packages in tier order
pub fn list_packages() -> &'static [Package] {
    &PACKAGES
}

/// Look up a package by its tier name. Unknown tiers yield `None`;
/// callers must surface that, never substitute a default.
pub fn get_package_by_tier(tier: &str) -> Option<&'static Package> {
    let tier = Tier::parse(tier)?;
    PACKAGES.iter().find(|p| p.tier == tier)
}

pub fn can_user_access_feature(package: &Package, feature: Feature) -> bool {
    package.features.get(feature)
}

/// Strictly below the ceiling: with a limit of N, N prior uses exhaust it.
pub fn can_user_perform_action(package: &Package, action: Action, current_usage: u32) -> bool {
    current_usage < package.limit(action)
}

pub fn get_remaining_credits(package: &Package, used_credits: u32) -> u32 {
    package.monthly_credits.saturating_sub(used_credits)
}
