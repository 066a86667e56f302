//! Trained characters
//!
//! A character is an `assets` row with `asset_type = "characters"` whose
//! `metadata` carries the training state. Training callbacks only ever
//! merge the fields they change, guarded by the status they expect to
//! replace, so concurrent writers cannot clobber each other's keys.

mod trainer;

pub use trainer::{ReplicateTrainer, Trainer, TrainingSubmission};

use crate::config::TrainingConfig;
use crate::db::models::{Asset, CHARACTER_ASSET_TYPE};
use crate::db::{NewAsset, Store};
use crate::errors::{AppError, Result};
use crate::generation::Requester;
use crate::metrics;
use crate::packages::{can_user_access_feature, get_package_by_tier, Feature};
use chrono::{DateTime, FixedOffset};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingStatus {
    Training,
    Ready,
    Trained,
    Failed,
}

impl TrainingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingStatus::Training => "training",
            TrainingStatus::Ready => "ready",
            TrainingStatus::Trained => "trained",
            TrainingStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TrainingStatus::Training)
    }

    /// Only an in-flight training may move; terminal states are final
    pub fn can_transition_to(&self, next: TrainingStatus) -> bool {
        matches!(self, TrainingStatus::Training)
            && matches!(
                next,
                TrainingStatus::Training
                    | TrainingStatus::Ready
                    | TrainingStatus::Trained
                    | TrainingStatus::Failed
            )
    }
}

impl fmt::Display for TrainingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed view of a character's `metadata` blob. Keys this struct does
/// not know about survive a parse/serialize round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CharacterMetadata {
    #[serde(default)]
    pub gender: String,

    #[serde(default)]
    pub available_models: Vec<String>,

    #[serde(default)]
    pub training_images: Vec<String>,

    pub status: TrainingStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_id: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CharacterMetadata {
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Status report from the trainer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TrainingUpdate {
    pub status: TrainingStatus,

    #[validate(length(max = 2000))]
    pub error: Option<String>,

    #[validate(range(max = 100))]
    pub progress: Option<u8>,

    #[validate(length(min = 1, max = 255))]
    pub model_id: Option<String>,
}

impl TrainingUpdate {
    /// Only the keys this update changes
    pub fn to_patch(&self) -> Value {
        let mut patch = Map::new();
        patch.insert("status".to_string(), Value::from(self.status.as_str()));

        let error = match (self.status, self.error.as_deref()) {
            (TrainingStatus::Failed, None) => Some("Training failed"),
            (_, error) => error,
        };
        if let Some(error) = error {
            patch.insert("error".to_string(), Value::from(error));
        }
        if let Some(progress) = self.progress {
            patch.insert("progress".to_string(), Value::from(progress));
        }
        if let Some(model_id) = &self.model_id {
            patch.insert("modelId".to_string(), Value::from(model_id.as_str()));
        }
        Value::Object(patch)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCharacterRequest {
    #[validate(length(min = 1, max = 100, message = "Name is required"))]
    pub name: String,

    #[validate(length(min = 1, max = 32, message = "Gender is required"))]
    pub gender: String,

    #[serde(default)]
    pub available_models: Vec<String>,

    pub training_images: Vec<String>,
}

/// Character as returned to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub metadata: CharacterMetadata,
    pub created_at: DateTime<FixedOffset>,
    pub updated_at: DateTime<FixedOffset>,
}

impl TryFrom<Asset> for Character {
    type Error = AppError;

    fn try_from(asset: Asset) -> Result<Self> {
        if !asset.is_character() {
            return Err(AppError::AssetNotFound {
                id: asset.id.to_string(),
            });
        }
        Ok(Self {
            metadata: CharacterMetadata::from_value(&asset.metadata)?,
            id: asset.id,
            name: asset.name,
            url: asset.url,
            created_at: asset.created_at,
            updated_at: asset.updated_at,
        })
    }
}

pub struct CharacterService {
    store: Arc<dyn Store>,
    trainer: Option<Arc<dyn Trainer>>,
    config: TrainingConfig,
}

impl CharacterService {
    pub fn new(store: Arc<dyn Store>, trainer: Option<Arc<dyn Trainer>>, config: TrainingConfig) -> Self {
        Self {
            store,
            trainer,
            config,
        }
    }

    fn check_training_images(&self, images: &[String]) -> Result<()> {
        let max = self.config.max_training_images;
        if images.is_empty() || images.len() > max {
            return Err(AppError::Validation {
                message: format!("Between 1 and {} training images are required", max),
                field: Some("trainingImages".to_string()),
            });
        }

        let valid = images.iter().all(|image| {
            Url::parse(image)
                .map(|url| matches!(url.scheme(), "http" | "https"))
                .unwrap_or(false)
        });
        if !valid {
            return Err(AppError::Validation {
                message: "Training images must be http(s) URLs".to_string(),
                field: Some("trainingImages".to_string()),
            });
        }
        Ok(())
    }

    /// Persist a new character in `training` and hand it to the trainer
    pub async fn create_character(
        &self,
        requester: &Requester,
        request: CreateCharacterRequest,
    ) -> Result<Character> {
        request.validate()?;
        self.check_training_images(&request.training_images)?;

        let user = self
            .store
            .find_user(requester.user_id)
            .await?
            .ok_or_else(|| AppError::UserNotFound {
                id: requester.user_id.to_string(),
            })?;
        let package = get_package_by_tier(&user.package_tier).ok_or_else(|| {
            AppError::InvalidPackageTier {
                tier: user.package_tier.clone(),
            }
        })?;

        if !can_user_access_feature(package, Feature::CharacterTraining) {
            return Err(AppError::FeatureNotEntitled {
                tier: package.tier.to_string(),
                feature: Feature::CharacterTraining.to_string(),
            });
        }

        let existing = self.store.count_assets(user.id, CHARACTER_ASSET_TYPE).await?;
        if existing >= u64::from(package.max_models) {
            return Err(AppError::Forbidden {
                message: format!(
                    "The {} package allows {} trained characters",
                    package.name, package.max_models
                ),
            });
        }

        let metadata = CharacterMetadata {
            gender: request.gender.trim().to_string(),
            available_models: request.available_models,
            training_images: request.training_images.clone(),
            status: TrainingStatus::Training,
            error: None,
            progress: None,
            model_id: None,
            training_id: None,
            extra: Map::new(),
        };

        let asset = self
            .store
            .create_asset(NewAsset {
                user_id: user.id,
                team_id: requester.team_id,
                asset_type: CHARACTER_ASSET_TYPE.to_string(),
                name: request.name.trim().to_string(),
                url: request.training_images[0].clone(),
                metadata: metadata.to_value()?,
            })
            .await?;

        info!(asset_id = %asset.id, user_id = %user.id, images = request.training_images.len(), "Character created");

        let Some(trainer) = &self.trainer else {
            return Character::try_from(asset);
        };

        let submission = TrainingSubmission {
            asset_id: asset.id,
            name: asset.name.clone(),
            training_images: request.training_images,
            webhook_url: self
                .config
                .callback_url
                .replace("{asset_id}", &asset.id.to_string()),
        };

        let patch = match trainer.submit(&submission).await {
            Ok(training_id) => {
                info!(asset_id = %asset.id, training_id = %training_id, trainer = trainer.name(), "Training submitted");
                serde_json::json!({ "trainingId": training_id })
            }
            Err(e) => {
                warn!(asset_id = %asset.id, error = %e, "Training submission failed");
                metrics::record_training_update(TrainingStatus::Failed.as_str());
                serde_json::json!({ "status": TrainingStatus::Failed.as_str(), "error": e.to_string() })
            }
        };

        let updated = self
            .store
            .merge_asset_metadata(asset.id, TrainingStatus::Training.as_str(), patch)
            .await?
            .unwrap_or(asset);
        Character::try_from(updated)
    }

    /// Owner-scoped lookup; other users' characters read as missing
    pub async fn get_character(&self, user_id: Uuid, id: Uuid) -> Result<Character> {
        let asset = self
            .store
            .find_asset(id)
            .await?
            .filter(|a| a.user_id == user_id && a.is_character())
            .ok_or_else(|| AppError::AssetNotFound { id: id.to_string() })?;
        Character::try_from(asset)
    }

    /// Apply a trainer callback as a status-guarded merge
    pub async fn apply_training_update(&self, asset_id: Uuid, update: TrainingUpdate) -> Result<Character> {
        update.validate()?;

        let asset = self
            .store
            .find_asset(asset_id)
            .await?
            .filter(Asset::is_character)
            .ok_or_else(|| AppError::AssetNotFound {
                id: asset_id.to_string(),
            })?;
        let current = CharacterMetadata::from_value(&asset.metadata)?.status;

        if !current.can_transition_to(update.status) {
            return Err(AppError::InvalidTransition {
                from: current.to_string(),
                to: update.status.to_string(),
            });
        }

        let merged = self
            .store
            .merge_asset_metadata(asset_id, current.as_str(), update.to_patch())
            .await?;

        // A concurrent callback moved the status between read and write
        let Some(merged) = merged else {
            let now = self
                .store
                .find_asset(asset_id)
                .await?
                .and_then(|a| CharacterMetadata::from_value(&a.metadata).ok())
                .map(|m| m.status.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            return Err(AppError::InvalidTransition {
                from: now,
                to: update.status.to_string(),
            });
        };

        metrics::record_training_update(update.status.as_str());
        info!(asset_id = %asset_id, from = %current, to = %update.status, "Training status updated");

        Character::try_from(merged)
    }
}
