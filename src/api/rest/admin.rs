//! Admin-gated routes.
//!
//! Every route here sits behind `require_admin_key`, which compares the
//! `X-Admin-Key` request header against the configured secret in constant
//! time before letting the request through.

use crate::api::AppState;
use crate::db::{catalog, with_transaction};
use crate::error::AppError;
use crate::hash;
use crate::lifecycle::archive;
use crate::placement;
use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::collections::HashSet;
use subtle::ConstantTimeEq;

// ============================================================================
// ROUTES
// ============================================================================

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/files", get(list_files))
        .route("/admin/files/:id/reallocate", post(reallocate_file))
        .route("/admin/files/:id/archive", post(archive_file))
        .route("/admin/files/:id/restore", post(restore_file))
        .route("/admin/nodes/health", get(nodes_health))
        .route("/admin/nodes/:name/verify", post(verify_node))
        .route("/admin/storage/tiers", get(storage_tiers))
        .route("/admin/storage/deduplication", get(storage_deduplication))
        .layer(middleware::from_fn(require_admin_key))
}

// ============================================================================
// MIDDLEWARE
// ============================================================================

async fn require_admin_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let supplied = req
        .headers()
        .get("X-Admin-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let matches: bool = supplied
        .as_bytes()
        .ct_eq(state.config.admin_key.as_bytes())
        .into();
    if !matches {
        return Err(AppError::Unauthorized("missing or invalid X-Admin-Key".into()));
    }
    Ok(next.run(req).await)
}

// ============================================================================
// TYPES
// ============================================================================

#[derive(Serialize)]
struct NodeHealth {
    node_name: String,
    alive: bool,
    seconds_since_heartbeat: Option<i64>,
}

#[derive(Serialize)]
struct VerifyReport {
    node_name: String,
    verified: u32,
    corrupted: u32,
    missing: u32,
    details: Vec<VerifyDetail>,
}

#[derive(Serialize)]
struct VerifyDetail {
    chunk_id: i64,
    file_id: i64,
    chunk_index: i64,
    status: &'static str,
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn list_files(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let files = catalog::list_all_files(&state.db).await?;
    Ok(Json(files))
}

async fn reallocate_file(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let file = catalog::get_file_by_id(&state.db, id)
        .await?
        .ok_or_else(|| AppError::NotFound("file not found".into()))?;

    let chunks = catalog::all_chunks_for_version(&state.db, id, file.current_version).await?;

    for chunk in chunks.into_iter().filter(|c| c.status == "active") {
        let mut excluded = HashSet::new();
        excluded.insert(chunk.node_name.clone());
        let target = match placement::select_storage_node(
            &state.registry,
            state.config.node_capacity_bytes,
            chunk.compressed_size as u64,
            &excluded,
        ) {
            Ok(node) => node,
            Err(e) => {
                tracing::warn!(chunk_id = chunk.id, error = %e, "reallocate: no target node available");
                continue;
            }
        };
        let Some(dir) = state.registry.node_dir(&target) else {
            continue;
        };
        let Some(basename) = std::path::Path::new(&chunk.chunk_location).file_name() else {
            continue;
        };
        let new_path = dir.join(basename);

        match tokio::fs::read(&chunk.chunk_location).await {
            Ok(data) => {
                if let Err(e) = tokio::fs::write(&new_path, &data).await {
                    tracing::warn!(chunk_id = chunk.id, error = %e, "reallocate: write failed");
                    continue;
                }
            }
            Err(e) => {
                tracing::warn!(chunk_id = chunk.id, error = %e, "reallocate: read failed");
                continue;
            }
        }

        let new_path_str = new_path.to_string_lossy().to_string();
        let target_clone = target.clone();
        let chunk_id = chunk.id;
        let old_path = chunk.chunk_location.clone();
        if let Err(e) = with_transaction(&state.db, state.config.catalog_max_retries, move |tx| {
            let new_path_str = new_path_str.clone();
            let target_clone = target_clone.clone();
            Box::pin(async move {
                catalog::relocate_chunk(&mut **tx, chunk_id, &new_path_str, &target_clone).await
            })
        })
        .await
        {
            tracing::warn!(chunk_id, error = %e, "reallocate: catalog update failed");
            continue;
        }
        let _ = tokio::fs::remove_file(&old_path).await;
    }

    Ok(StatusCode::OK)
}

async fn archive_file(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    archive::archive_file(&state.db, &state.registry, state.config.catalog_max_retries, id).await?;
    Ok(StatusCode::OK)
}

async fn restore_file(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    archive::restore_file(
        &state.db,
        &state.registry,
        &state.cipher,
        state.config.node_capacity_bytes,
        state.config.catalog_max_retries,
        id,
    )
    .await?;
    Ok(StatusCode::OK)
}

async fn nodes_health(State(state): State<AppState>) -> Json<Vec<NodeHealth>> {
    Json(
        state
            .registry
            .node_names()
            .into_iter()
            .map(|name| {
                let age = state.registry.heartbeat_age(&name);
                NodeHealth {
                    alive: age.map_or(false, |a| {
                        a.num_seconds() < state.config.heartbeat_threshold_secs as i64
                    }),
                    seconds_since_heartbeat: age.map(|a| a.num_seconds()),
                    node_name: name,
                }
            })
            .collect(),
    )
}

async fn verify_node(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<VerifyReport>, AppError> {
    if state.registry.node_dir(&name).is_none() {
        return Err(AppError::NotFound(format!("unknown node: {name}")));
    }

    let chunks = catalog::chunks_on_node(&state.db, &name).await?;
    let mut report = VerifyReport {
        node_name: name,
        verified: 0,
        corrupted: 0,
        missing: 0,
        details: Vec::new(),
    };

    for chunk in chunks {
        let status = match tokio::fs::read(&chunk.chunk_location).await {
            Ok(data) => {
                if hash::hash_bytes(&data) == chunk.chunk_hash {
                    report.verified += 1;
                    "verified"
                } else {
                    report.corrupted += 1;
                    "corrupted"
                }
            }
            Err(_) => {
                report.missing += 1;
                "missing"
            }
        };
        report.details.push(VerifyDetail {
            chunk_id: chunk.id,
            file_id: chunk.file_id,
            chunk_index: chunk.chunk_index,
            status,
        });
    }

    Ok(Json(report))
}

async fn storage_tiers(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let tiers = catalog::list_tiers(&state.db).await?;
    Ok(Json(tiers))
}

async fn storage_deduplication(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let entries = catalog::list_deduplication(&state.db).await?;
    Ok(Json(entries))
}
