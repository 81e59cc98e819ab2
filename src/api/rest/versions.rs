//! Version listing, rollback, and diff routes.

use crate::api::AppState;
use crate::db::catalog;
use crate::error::{safe_filename, AppError};
use crate::versioning;
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// ROUTES
// ============================================================================

pub fn version_routes() -> Router<AppState> {
    Router::new()
        .route("/versions/:filename", get(list_versions))
        .route("/rollback/:filename/:version", post(rollback))
        .route("/diff/:filename", get(diff))
}

// ============================================================================
// TYPES
// ============================================================================

#[derive(Serialize)]
struct VersionEntry {
    version_number: i64,
    timestamp: String,
    size: i64,
    hash: String,
    is_current: bool,
}

#[derive(Deserialize)]
struct DiffQuery {
    v1: Option<i64>,
    v2: Option<i64>,
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn list_versions(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> Result<Json<Vec<VersionEntry>>, AppError> {
    let filename = safe_filename(&filename)?;
    let file = catalog::get_file_by_filename(&state.db, &filename)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no such file: {filename}")))?;

    let versions = catalog::list_versions(&state.db, file.id).await?;
    Ok(Json(
        versions
            .into_iter()
            .map(|v| VersionEntry {
                is_current: v.version_number == file.current_version,
                version_number: v.version_number,
                timestamp: v.timestamp,
                size: v.size,
                hash: v.hash,
            })
            .collect(),
    ))
}

async fn rollback(
    State(state): State<AppState>,
    Path((filename, version)): Path<(String, i64)>,
) -> Result<(), AppError> {
    let filename = safe_filename(&filename)?;
    let file = catalog::get_file_by_filename(&state.db, &filename)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no such file: {filename}")))?;

    versioning::rollback(&state.db, state.config.catalog_max_retries, file.id, version).await?;
    Ok(())
}

async fn diff(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Query(query): Query<DiffQuery>,
) -> Result<Json<versioning::Diff>, AppError> {
    let filename = safe_filename(&filename)?;
    let (v1, v2) = match (query.v1, query.v2) {
        (Some(v1), Some(v2)) => (v1, v2),
        _ => return Err(AppError::BadRequest("both v1 and v2 are required".into())),
    };

    let file = catalog::get_file_by_filename(&state.db, &filename)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no such file: {filename}")))?;

    let result = versioning::diff(&state.db, file.id, v1, v2).await?;
    Ok(Json(result))
}
