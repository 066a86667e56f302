//! Job status handlers

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::AppState;
use ginchy_common::{
    auth::AuthContext,
    errors::{AppError, Result},
};

/// Job status response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResponse {
    pub job_id: Uuid,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempt_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    pub created_at: String,
}

/// Get job status; other users' jobs read as missing
pub async fn get_job(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobResponse>> {
    let job = state
        .store
        .find_job(job_id)
        .await?
        .filter(|job| job.user_id == auth.user_id)
        .ok_or_else(|| AppError::JobNotFound {
            id: job_id.to_string(),
        })?;

    Ok(Json(JobResponse {
        job_id: job.id,
        status: job.status,
        image_url: job.image_url,
        error: job.error_message,
        attempt_count: job.attempt_count,
        started_at: job.started_at.map(|dt| dt.to_rfc3339()),
        completed_at: job.completed_at.map(|dt| dt.to_rfc3339()),
        created_at: job.created_at.to_rfc3339(),
    }))
}
