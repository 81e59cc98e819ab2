//! Idempotent deduplication. Groups files by content hash and links
//! secondaries to the lowest-id primary. Metadata-only: Chunk rows are never
//! physically shared between primary and secondary files.

use crate::db::{catalog, DbPool};
use crate::error::CoreError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Background task: every `period_secs`, scan for newly-duplicated content
/// and link it. Runs until `cancel` is triggered.
pub async fn dedup_loop(pool: DbPool, period_secs: u64, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("deduplication loop shutting down");
                return;
            }
            _ = tokio::time::sleep(Duration::from_secs(period_secs)) => {}
        }

        match run(&pool).await {
            Ok(linked) if linked > 0 => tracing::info!(linked, "deduplication pass linked files"),
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "deduplication pass failed"),
        }
    }
}

pub async fn run(pool: &DbPool) -> Result<u32, CoreError> {
    let hashes = catalog::files_with_duplicate_hashes(pool).await?;
    let mut linked = 0;

    for content_hash in hashes {
        let mut files = catalog::files_by_content_hash(pool, &content_hash).await?;
        files.sort_by_key(|f| f.id);
        let Some((primary, secondaries)) = files.split_first() else {
            continue;
        };

        for secondary in secondaries {
            if secondary.deduplication_ref == Some(primary.id) {
                continue; // already linked, idempotent no-op
            }
            catalog::set_deduplication_ref(pool, secondary.id, primary.id).await?;
            catalog::upsert_deduplication(pool, &content_hash, secondary.size).await?;
            linked += 1;
        }
    }

    Ok(linked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbPool;

    async fn test_pool() -> DbPool {
        let pool = DbPool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./src/db/migrations").run(&pool).await.unwrap();
        pool
    }

    async fn insert_file(pool: &DbPool, filename: &str, content_hash: &str) -> i64 {
        sqlx::query(
            "INSERT INTO metadata \
             (filename, current_version, size, compressed_size, compression_ratio, \
              upload_timestamp, primary_location, replicas, storage_tier, access_count, \
              retention_policy, is_archived, content_hash) \
             VALUES (?, 1, 100, 50, 0.5, datetime('now'), 'A', '[]', 'hot', 0, 'default', 0, ?)",
        )
        .bind(filename)
        .bind(content_hash)
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid()
    }

    #[tokio::test]
    async fn links_duplicate_files_to_lowest_id_primary() {
        let pool = test_pool().await;
        let primary = insert_file(&pool, "a.bin", "samehash").await;
        let secondary = insert_file(&pool, "b.bin", "samehash").await;
        insert_file(&pool, "c.bin", "differenthash").await;

        let linked = run(&pool).await.unwrap();
        assert_eq!(linked, 1);

        let file = catalog::get_file_by_id(&pool, secondary).await.unwrap().unwrap();
        assert_eq!(file.deduplication_ref, Some(primary));

        // idempotent: a second pass links nothing new
        assert_eq!(run(&pool).await.unwrap(), 0);
    }
}
