//! Tier migration: demote idle files from hot to warm to cold, and hand
//! fully cold-and-idle files off to archival. Runs as an independent
//! background loop with its own error back-off so one bad file never stalls
//! the whole scan permanently.

use crate::crypto::Cipher;
use crate::db::models::parse_iso;
use crate::db::{catalog, DbPool};
use crate::error::CoreError;
use crate::lifecycle::archive;
use crate::registry::NodeRegistry;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const HOT_TO_WARM_IDLE_DAYS: i64 = 30;
const HOT_TO_WARM_MAX_ACCESS_COUNT: i64 = 10;
const WARM_TO_COLD_IDLE_DAYS: i64 = 90;
const COLD_TO_ARCHIVE_IDLE_DAYS: i64 = 180;

pub async fn migration_loop(
    pool: DbPool,
    registry: Arc<NodeRegistry>,
    cipher: Arc<Cipher>,
    catalog_max_retries: u32,
    period_secs: u64,
    error_backoff_secs: u64,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("tier migration loop shutting down");
                return;
            }
            _ = tokio::time::sleep(Duration::from_secs(period_secs)) => {}
        }

        if let Err(e) = run_once(&pool, &registry, &cipher, catalog_max_retries).await {
            tracing::error!(error = %e, "tier migration pass failed, backing off");
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(error_backoff_secs)) => {}
            }
        }
    }
}

async fn run_once(
    pool: &DbPool,
    registry: &NodeRegistry,
    cipher: &Cipher,
    catalog_max_retries: u32,
) -> Result<(), CoreError> {
    let files = catalog::list_non_archived(pool).await?;
    let now = Utc::now();

    for file in files {
        let reference = file
            .last_accessed
            .as_deref()
            .and_then(parse_iso)
            .or_else(|| parse_iso(&file.upload_timestamp));
        let Some(reference) = reference else { continue };
        let idle = now - reference;

        let target_tier = match file.storage_tier.as_str() {
            "hot" if idle > ChronoDuration::days(HOT_TO_WARM_IDLE_DAYS)
                && file.access_count < HOT_TO_WARM_MAX_ACCESS_COUNT =>
            {
                Some("warm")
            }
            "warm" if idle > ChronoDuration::days(WARM_TO_COLD_IDLE_DAYS) => Some("cold"),
            "cold" if idle > ChronoDuration::days(COLD_TO_ARCHIVE_IDLE_DAYS) => {
                if let Err(e) =
                    archive::archive_file(pool, registry, catalog_max_retries, file.id).await
                {
                    tracing::error!(file_id = file.id, error = %e, "archival failed, skipping");
                }
                None
            }
            _ => None,
        };

        if let Some(tier) = target_tier {
            if let Err(e) =
                recompress_for_tier(pool, registry, cipher, catalog_max_retries, file.id, tier).await
            {
                tracing::error!(file_id = file.id, tier, error = %e, "tier recompression failed");
            }
        }
    }

    Ok(())
}

async fn recompress_for_tier(
    pool: &DbPool,
    registry: &NodeRegistry,
    cipher: &Cipher,
    catalog_max_retries: u32,
    file_id: i64,
    new_tier: &str,
) -> Result<(), CoreError> {
    let file = catalog::get_file_by_id(pool, file_id)
        .await?
        .ok_or_else(|| CoreError::NotFound("file not found".into()))?;
    let tier_config = catalog::get_tier(pool, new_tier).await?;
    let chunks = crate::db::catalog::all_chunks_for_version(pool, file_id, file.current_version)
        .await?;

    for chunk in chunks.into_iter().filter(|c| c.status == "active") {
        let Some(dir) = registry.node_dir(&chunk.node_name) else {
            continue;
        };
        let _ = dir; // location already absolute; kept for symmetry with other loops
        let data = tokio::fs::read(&chunk.chunk_location).await?;
        let plaintext = cipher.decrypt_decompress(&data)?;
        let recompressed = cipher.encrypt_compress(&plaintext, tier_config.compression_level as u32)?;
        tokio::fs::write(&chunk.chunk_location, &recompressed).await?;

        let new_hash = crate::hash::hash_bytes(&recompressed);
        catalog::update_chunk_sizes(pool, chunk.id, recompressed.len() as i64, &new_hash, new_tier)
            .await?;
    }

    crate::db::with_transaction(pool, catalog_max_retries, move |tx| {
        let new_tier = new_tier.to_string();
        Box::pin(async move { catalog::set_storage_tier(&mut **tx, file_id, &new_tier).await })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbPool;
    use crate::storage::write_file;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    async fn test_pool() -> DbPool {
        let pool = DbPool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./src/db/migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn recompress_for_tier_updates_chunks_and_file_tier() {
        let pool = test_pool().await;
        let node_a = tempdir().unwrap();
        let node_b = tempdir().unwrap();
        let node_c = tempdir().unwrap();
        let mut dirs = BTreeMap::new();
        dirs.insert("A".to_string(), node_a.path().to_path_buf());
        dirs.insert("B".to_string(), node_b.path().to_path_buf());
        dirs.insert("C".to_string(), node_c.path().to_path_buf());
        let registry = NodeRegistry::new(dirs);
        let keydir = tempdir().unwrap();
        let cipher =
            Cipher::load_or_init(&keydir.path().join("key"), &keydir.path().join("salt"), "pw")
                .unwrap();

        let source_dir = tempdir().unwrap();
        let source_path = source_dir.path().join("cooling.bin");
        tokio::fs::write(&source_path, b"data bound for a colder tier".repeat(50))
            .await
            .unwrap();

        let written = write_file(&pool, &registry, &cipher, 1_000_000_000, 3, "cooling.bin", &source_path)
            .await
            .unwrap();

        recompress_for_tier(&pool, &registry, &cipher, 3, written.file_id, "warm")
            .await
            .unwrap();

        let file = catalog::get_file_by_id(&pool, written.file_id).await.unwrap().unwrap();
        assert_eq!(file.storage_tier, "warm");

        let chunks = catalog::all_chunks_for_version(&pool, written.file_id, written.version)
            .await
            .unwrap();
        assert!(chunks.iter().all(|c| c.storage_tier == "warm"));
    }
}
