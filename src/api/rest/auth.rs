//! Admin login.
//!
//! A single shared admin key gates the `/admin/*` surface; this endpoint
//! just validates a candidate key so a caller can fail fast before trying
//! the gated routes.

use crate::api::AppState;
use crate::error::AppError;
use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

// ============================================================================
// ROUTES
// ============================================================================

pub fn auth_routes() -> Router<AppState> {
    Router::new().route("/login", post(login))
}

// ============================================================================
// TYPES
// ============================================================================

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(rename = "adminKey")]
    admin_key: String,
}

#[derive(Serialize)]
struct LoginResponse {
    ok: bool,
}

// ============================================================================
// HANDLERS
// ============================================================================

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let matches: bool = req
        .admin_key
        .as_bytes()
        .ct_eq(state.config.admin_key.as_bytes())
        .into();
    if !matches {
        return Err(AppError::Unauthorized("invalid admin key".into()));
    }
    Ok(Json(LoginResponse { ok: true }))
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

    async fn test_state(admin_key: &str) -> AppState {
        let pool = DbPool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./src/db/migrations").run(&pool).await.unwrap();
        let dir = tempdir().unwrap();
        let cipher = Arc::new(
            Cipher::load_or_init(&dir.path().join("key"), &dir.path().join("salt"), "pw").unwrap(),
        );
        let registry = Arc::new(NodeRegistry::new(BTreeMap::new()));
        let config = Config {
            bind_addr: "127.0.0.1:0".into(),
            database_path: ":memory:".into(),
            node_dirs: BTreeMap::new(),
            admin_key: admin_key.to_string(),
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
    async fn accepts_the_configured_admin_key() {
        let state = test_state("hunter2").await;
        let result = login(
            State(state),
            Json(LoginRequest { admin_key: "hunter2".into() }),
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn rejects_a_wrong_admin_key() {
        let state = test_state("hunter2").await;
        let result = login(
            State(state),
            Json(LoginRequest { admin_key: "wrong".into() }),
        )
        .await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }
}
