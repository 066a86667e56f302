//! Generic asset handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::AppState;
use ginchy_common::{
    auth::AuthContext,
    db::models::Asset,
    errors::{AppError, Result},
};

#[derive(Debug, Deserialize)]
pub struct AssetsQuery {
    #[serde(rename = "type")]
    pub asset_type: Option<String>,
}

/// The caller's assets, optionally filtered by type
pub async fn list_assets(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<AssetsQuery>,
) -> Result<Json<Vec<Asset>>> {
    let asset_type = query.asset_type.as_deref().filter(|t| !t.is_empty());
    let assets = state.store.list_assets(auth.user_id, asset_type).await?;
    Ok(Json(assets))
}

pub async fn delete_asset(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    if state.store.delete_asset(auth.user_id, id).await? {
        tracing::info!(asset_id = %id, user_id = %auth.user_id, "Asset deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::AssetNotFound { id: id.to_string() })
    }
}
