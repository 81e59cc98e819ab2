//! Liveness probe.

use crate::api::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

// ============================================================================
// ROUTES
// ============================================================================

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let pool_ok = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();
    let dirs_ok = state
        .registry
        .node_names()
        .iter()
        .all(|name| state.registry.node_dir(name).map_or(false, |d| d.exists()));

    if pool_ok && dirs_ok {
        (StatusCode::OK, Json(HealthResponse { status: "ok" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse { status: "unavailable" }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AppState;
    use crate::config::Config;
    use crate::crypto::Cipher;
    use crate::db::DbPool;
    use crate::registry::NodeRegistry;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::tempdir;

    async fn base_config(dir: &std::path::Path) -> Config {
        Config {
            bind_addr: "127.0.0.1:0".into(),
            database_path: ":memory:".into(),
            node_dirs: BTreeMap::new(),
            admin_key: "key".into(),
            encryption_passphrase: "pw".into(),
            key_file: dir.join("key"),
            salt_file: dir.join("salt"),
            heartbeat_threshold_secs: 40,
            monitor_period_secs: 10,
            tier_migration_period_secs: 3600,
            tier_migration_backoff_secs: 300,
            version_sync_timeout_secs: 30,
            catalog_busy_timeout_secs: 20,
            catalog_max_retries: 3,
            node_capacity_bytes: 500 * 1024 * 1024,
        }
    }

    #[tokio::test]
    async fn reports_ok_when_db_and_node_dirs_are_reachable() {
        let pool = DbPool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./src/db/migrations").run(&pool).await.unwrap();
        let dir = tempdir().unwrap();
        let cipher = Arc::new(
            Cipher::load_or_init(&dir.path().join("key"), &dir.path().join("salt"), "pw").unwrap(),
        );
        let mut node_dirs = BTreeMap::new();
        node_dirs.insert("A".to_string(), dir.path().to_path_buf());
        let registry = Arc::new(NodeRegistry::new(node_dirs));
        let state = AppState::new(pool, registry, cipher, base_config(dir.path()).await);

        let (status, Json(body)) = healthz(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.status, "ok");
    }

    #[tokio::test]
    async fn reports_unavailable_when_a_node_dir_is_missing() {
        let pool = DbPool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./src/db/migrations").run(&pool).await.unwrap();
        let dir = tempdir().unwrap();
        let cipher = Arc::new(
            Cipher::load_or_init(&dir.path().join("key"), &dir.path().join("salt"), "pw").unwrap(),
        );
        let mut node_dirs = BTreeMap::new();
        node_dirs.insert("A".to_string(), dir.path().join("does-not-exist"));
        let registry = Arc::new(NodeRegistry::new(node_dirs));
        let state = AppState::new(pool, registry, cipher, base_config(dir.path()).await);

        let (status, Json(body)) = healthz(State(state)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body.status, "unavailable");
    }
}
