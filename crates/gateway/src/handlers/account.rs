//! Account summary handler

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::Serialize;
use uuid::Uuid;

use crate::AppState;
use ginchy_common::{
    auth::AuthContext,
    errors::{AppError, Result},
    generation::{current_period_start, GenerationKind},
    packages::{get_package_by_tier, get_remaining_credits, Action, Package},
};

const METERED_KINDS: [GenerationKind; 3] = [
    GenerationKind::Image,
    GenerationKind::Video,
    GenerationKind::ClothingApplication,
];

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEntry {
    pub action: Action,
    pub used: u64,
    pub limit: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub user_id: Uuid,
    pub email: String,
    pub credits: i32,
    pub package: &'static Package,
    pub remaining_monthly_credits: u32,
    pub period_start: DateTime<Utc>,
    pub usage: Vec<UsageEntry>,
}

/// Credits, package and this month's usage for the caller
pub async fn get_account(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<AccountResponse>> {
    let user = state
        .store
        .find_user(auth.user_id)
        .await?
        .ok_or_else(|| AppError::UserNotFound {
            id: auth.user_id.to_string(),
        })?;

    let package = get_package_by_tier(&user.package_tier).ok_or_else(|| {
        AppError::InvalidPackageTier {
            tier: user.package_tier.clone(),
        }
    })?;

    let since = current_period_start(Utc::now());
    let counts = try_join_all(
        METERED_KINDS
            .iter()
            .map(|kind| state.store.count_generations_since(user.id, *kind, since)),
    )
    .await?;
    let spent = state.store.credits_spent_since(user.id, since).await?;

    let usage = METERED_KINDS
        .iter()
        .zip(counts)
        .map(|(kind, used)| UsageEntry {
            action: kind.action(),
            used,
            limit: package.limit(kind.action()),
        })
        .collect();

    Ok(Json(AccountResponse {
        user_id: user.id,
        email: user.email,
        credits: user.credits,
        package,
        remaining_monthly_credits: get_remaining_credits(package, u32::try_from(spent).unwrap_or(u32::MAX)),
        period_start: since,
        usage,
    }))
}
