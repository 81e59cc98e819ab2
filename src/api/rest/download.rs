//! Download and listing routes.

use crate::api::AppState;
use crate::db::catalog;
use crate::error::{safe_filename, AppError, CoreError};
use crate::storage;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// ROUTES
// ============================================================================

pub fn download_routes() -> Router<AppState> {
    Router::new()
        .route("/download/:filename", get(download_file))
        .route("/files", get(list_files))
}

// ============================================================================
// TYPES
// ============================================================================

#[derive(Deserialize)]
struct DownloadQuery {
    version: Option<i64>,
}

#[derive(Serialize)]
struct FileSummary {
    id: i64,
    filename: String,
    current_version: i64,
    size: i64,
    storage_tier: String,
    last_accessed: Option<String>,
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn download_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filename = safe_filename(&filename)?;
    let file = catalog::get_file_by_filename(&state.db, &filename)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no such file: {filename}")))?;

    let version = query.version.unwrap_or(file.current_version);

    let result = storage::read_file(&state.db, &state.registry, &state.cipher, file.id, version)
        .await
        .map_err(|e| match e {
            CoreError::NotFound(msg) => AppError::NotFound(msg),
            other => other.into(),
        })?;

    catalog::touch_access(&state.db, file.id).await?;

    let headers = [
        (header::CONTENT_TYPE, "application/octet-stream".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        ),
    ];

    Ok((StatusCode::OK, headers, result.data))
}

async fn list_files(State(state): State<AppState>) -> Result<Json<Vec<FileSummary>>, AppError> {
    let files = catalog::list_non_archived(&state.db).await?;
    Ok(Json(
        files
            .into_iter()
            .map(|f| FileSummary {
                id: f.id,
                filename: f.filename,
                current_version: f.current_version,
                size: f.size,
                storage_tier: f.storage_tier,
                last_accessed: f.last_accessed,
            })
            .collect(),
    ))
}
