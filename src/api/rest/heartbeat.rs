//! Node heartbeat ingestion.

use crate::api::AppState;
use crate::error::AppError;
use crate::heartbeat;
use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;

// ============================================================================
// ROUTES
// ============================================================================

pub fn heartbeat_routes() -> Router<AppState> {
    Router::new().route("/heartbeat", post(receive_heartbeat))
}

// ============================================================================
// TYPES
// ============================================================================

#[derive(Deserialize)]
struct HeartbeatRequest {
    node_name: String,
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn receive_heartbeat(
    State(state): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<(), AppError> {
    if state.registry.node_dir(&req.node_name).is_none() {
        return Err(AppError::BadRequest(format!("unknown node: {}", req.node_name)));
    }
    let recovering = heartbeat::record_heartbeat(&state.registry, &req.node_name);
    if recovering {
        tracing::info!(node = %req.node_name, "node recovered");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::crypto::Cipher;
    use crate::db::DbPool;
    use crate::registry::NodeRegistry;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::tempdir;

    async fn test_state(node_dirs: BTreeMap<String, std::path::PathBuf>) -> AppState {
        let pool = DbPool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./src/db/migrations").run(&pool).await.unwrap();
        let dir = tempdir().unwrap();
        let cipher = Arc::new(
            Cipher::load_or_init(&dir.path().join("key"), &dir.path().join("salt"), "pw").unwrap(),
        );
        let registry = Arc::new(NodeRegistry::new(node_dirs));
        let config = Config {
            bind_addr: "127.0.0.1:0".into(),
            database_path: ":memory:".into(),
            node_dirs: BTreeMap::new(),
            admin_key: "key".into(),
            encryption_passphrase: "pw".into(),
            key_file: dir.path().join("key"),
            salt_file: dir.path().join("salt"),
            heartbeat_threshold_secs: 40,
            monitor_period_secs: 10,
            tier_migration_period_secs: 3600,
            tier_migration_backoff_secs: 300,
            version_sync_timeout_secs: 30,
            catalog_busy_timeout_secs: 20,
            catalog_max_retries: 3,
            node_capacity_bytes: 500 * 1024 * 1024,
        };
        AppState::new(pool, registry, cipher, config)
    }

    #[tokio::test]
    async fn rejects_heartbeat_from_unknown_node() {
        let state = test_state(BTreeMap::new()).await;
        let result = receive_heartbeat(
            State(state),
            Json(HeartbeatRequest { node_name: "ghost".into() }),
        )
        .await;
        assert!(matches!(result, Err(AppError::BadRequest(_))));
    }

    #[tokio::test]
    async fn accepts_heartbeat_from_known_node() {
        let mut dirs = BTreeMap::new();
        dirs.insert("Node1".to_string(), std::path::PathBuf::from("./n1"));
        let state = test_state(dirs).await;
        let result = receive_heartbeat(
            State(state),
            Json(HeartbeatRequest { node_name: "Node1".into() }),
        )
        .await;
        assert!(result.is_ok());
    }
}
