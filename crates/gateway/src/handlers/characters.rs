//! Character handlers and the training callback

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use uuid::Uuid;

use crate::AppState;
use ginchy_common::{
    auth::{verify_shared_secret, AuthContext, TRAINING_SECRET_HEADER},
    characters::{Character, CreateCharacterRequest, TrainingUpdate},
    errors::{AppError, Result},
};

/// Create a character and start training
pub async fn create_character(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(request): Json<CreateCharacterRequest>,
) -> Result<(StatusCode, Json<Character>)> {
    let character = state
        .characters
        .create_character(&auth.requester(), request)
        .await?;
    Ok((StatusCode::CREATED, Json(character)))
}

pub async fn get_character(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<Json<Character>> {
    let character = state.characters.get_character(auth.user_id, id).await?;
    Ok(Json(character))
}

/// Trainer webhook; authenticated by shared secret, not a user token
pub async fn training_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(update): Json<TrainingUpdate>,
) -> Result<Json<Character>> {
    let expected = state
        .config
        .training
        .webhook_secret
        .as_deref()
        .ok_or_else(|| AppError::Unauthorized {
            message: "Training callbacks are not configured".to_string(),
        })?;

    let provided = headers
        .get(TRAINING_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !verify_shared_secret(provided, expected) {
        return Err(AppError::Unauthorized {
            message: "Invalid training secret".to_string(),
        });
    }

    let character = state.characters.apply_training_update(id, update).await?;
    Ok(Json(character))
}
