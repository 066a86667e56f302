//! Package table handlers

use axum::{extract::Path, Json};
use ginchy_common::{
    errors::{AppError, Result},
    packages::{self, Package},
};

/// All packages in tier order
pub async fn list_packages() -> Json<&'static [Package]> {
    Json(packages::list_packages())
}

/// One package by tier name
pub async fn get_package(Path(tier): Path<String>) -> Result<Json<&'static Package>> {
    packages::get_package_by_tier(&tier)
        .map(Json)
        .ok_or(AppError::InvalidPackageTier { tier })
}
