//! Upload routes
//!
//! Accepts a multipart `file` field, chunks/compresses/encrypts/places it,
//! and returns the resulting version summary.

use crate::api::AppState;
use crate::error::{safe_filename, AppError};
use crate::storage;
use axum::{
    extract::{Multipart, State},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tempfile::NamedTempFile;

// ============================================================================
// ROUTES
// ============================================================================

pub fn upload_routes() -> Router<AppState> {
    Router::new().route("/upload", post(upload_file))
}

// ============================================================================
// TYPES
// ============================================================================

#[derive(Serialize)]
struct UploadResponse {
    filename: String,
    version: i64,
    original_size: u64,
    compressed_size: u64,
    compression_ratio: f64,
    storage_nodes: Vec<String>,
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut filename = None;
    let mut tmp_file = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let original_name = field
            .file_name()
            .map(|s| s.to_string())
            .ok_or_else(|| AppError::BadRequest("file field is missing a filename".into()))?;
        let cleaned = safe_filename(&original_name)?;

        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("failed reading upload body: {e}")))?;

        let tmp = NamedTempFile::new()
            .map_err(|e| AppError::Internal(format!("failed to stage upload: {e}")))?;
        tokio::fs::write(tmp.path(), &bytes).await?;

        filename = Some(cleaned);
        tmp_file = Some(tmp);
    }

    let filename = filename.ok_or_else(|| AppError::BadRequest("missing 'file' field".into()))?;
    let tmp_file = tmp_file.ok_or_else(|| AppError::BadRequest("missing 'file' field".into()))?;

    let result = storage::write_file(
        &state.db,
        &state.registry,
        &state.cipher,
        state.config.node_capacity_bytes,
        state.config.catalog_max_retries,
        &filename,
        tmp_file.path(),
    )
    .await?;

    Ok(Json(UploadResponse {
        filename,
        version: result.version,
        original_size: result.original_size,
        compressed_size: result.compressed_size,
        compression_ratio: result.compression_ratio,
        storage_nodes: result.storage_nodes,
    }))
}
