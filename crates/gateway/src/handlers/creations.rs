//! "My creations" handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::AppState;
use ginchy_common::{
    auth::AuthContext,
    db::models::GeneratedImage,
    errors::{AppError, Result},
};

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreationsQuery {
    #[serde(default = "default_page")]
    #[validate(range(min = 1))]
    pub page: u64,

    #[serde(default = "default_per_page")]
    #[validate(range(min = 1, max = 100))]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}

fn default_per_page() -> u64 {
    24
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreationsResponse {
    pub items: Vec<GeneratedImage>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

/// Newest first, paginated
pub async fn list_creations(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<CreationsQuery>,
) -> Result<Json<CreationsResponse>> {
    query.validate()?;

    let offset = (query.page - 1).saturating_mul(query.per_page);
    let (items, total) = state
        .store
        .list_generations(auth.user_id, offset, query.per_page)
        .await?;

    Ok(Json(CreationsResponse {
        items,
        total,
        page: query.page,
        per_page: query.per_page,
    }))
}

/// Delete one of the caller's creations
pub async fn delete_creation(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    if state.store.delete_generation(auth.user_id, id).await? {
        tracing::info!(generation_id = %id, user_id = %auth.user_id, "Creation deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound {
            resource_type: "creation".to_string(),
            id: id.to_string(),
        })
    }
}
