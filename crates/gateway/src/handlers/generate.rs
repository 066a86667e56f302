//! Generation handlers

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::AppState;
use ginchy_common::{
    auth::{hash_idempotency_key, AuthContext},
    db::NewJob,
    errors::Result,
    generation::{ClothingRequest, GenerationOutcome, GenerationRequest, GenerationResult},
};

/// Header form of the idempotency key; wins over the body field
const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// Response after queueing an async generation
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJobResponse {
    pub job_id: Uuid,
    pub status: String,
    pub poll_url: String,
}

fn scoped_idempotency_key(headers: &HeaderMap, user_id: Uuid, body_key: Option<String>) -> Option<String> {
    headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or(body_key)
        .filter(|k| !k.trim().is_empty())
        .map(|k| hash_idempotency_key(user_id, &k))
}

fn into_response(result: Result<GenerationOutcome>) -> (StatusCode, Json<GenerationResult>) {
    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            if e.is_server_error() {
                tracing::error!(error = %e, "Generation failed");
            }
            e.status_code()
        }
    };
    (status, Json(GenerationResult::from(result)))
}

/// Synchronous generation
pub async fn generate(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    Json(mut request): Json<GenerationRequest>,
) -> (StatusCode, Json<GenerationResult>) {
    request.idempotency_key = scoped_idempotency_key(&headers, auth.user_id, request.idempotency_key.take());

    let result = state.generation.generate(&auth.requester(), request).await;
    into_response(result)
}

/// Clothing application (garment onto model image)
pub async fn apply_clothing(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    Json(mut request): Json<ClothingRequest>,
) -> (StatusCode, Json<GenerationResult>) {
    request.idempotency_key = scoped_idempotency_key(&headers, auth.user_id, request.idempotency_key.take());

    let result = state.generation.apply_clothing(&auth.requester(), request).await;
    into_response(result)
}

/// Validate, then persist a job for the worker
pub async fn generate_async(
    State(state): State<AppState>,
    auth: AuthContext,
    headers: HeaderMap,
    Json(mut request): Json<GenerationRequest>,
) -> Result<(StatusCode, Json<QueuedJobResponse>)> {
    request.idempotency_key = scoped_idempotency_key(&headers, auth.user_id, request.idempotency_key.take());

    // Check for duplicate via idempotency key
    if let Some(ref key) = request.idempotency_key {
        if let Some(existing) = state.store.find_job_by_idempotency_key(auth.user_id, key).await? {
            return Ok((
                StatusCode::OK,
                Json(QueuedJobResponse {
                    job_id: existing.id,
                    poll_url: format!("/v1/jobs/{}", existing.id),
                    status: existing.status,
                }),
            ));
        }
    }

    let kind = state.generation.preflight(&auth.requester(), &request).await?;

    let job = state
        .store
        .create_job(NewJob {
            user_id: auth.user_id,
            team_id: auth.team_id,
            request: serde_json::to_value(&request)?,
            idempotency_key: request.idempotency_key.clone(),
        })
        .await?;

    tracing::info!(
        job_id = %job.id,
        user_id = %auth.user_id,
        kind = %kind,
        request_id = %auth.request_id,
        "Generation job queued"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(QueuedJobResponse {
            job_id: job.id,
            poll_url: format!("/v1/jobs/{}", job.id),
            status: job.status,
        }),
    ))
}
