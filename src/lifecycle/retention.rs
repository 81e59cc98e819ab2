//! Per-file retention: always keep the newest `min_versions`, anything
//! within `retention_period_days`, and the current version; deprecate every
//! other version's active chunks (never delete rows outright).

use crate::db::models::parse_iso;
use crate::db::{catalog, with_transaction, DbPool};
use crate::error::CoreError;
use chrono::{Duration as ChronoDuration, Utc};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Background task: every `period_secs`, apply the retention policy to
/// every non-archived file. One file's failure is logged and does not stop
/// the pass. Runs until `cancel` is triggered.
pub async fn retention_loop(
    pool: DbPool,
    catalog_max_retries: u32,
    period_secs: u64,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("retention loop shutting down");
                return;
            }
            _ = tokio::time::sleep(Duration::from_secs(period_secs)) => {}
        }

        let files = match catalog::list_non_archived(&pool).await {
            Ok(files) => files,
            Err(e) => {
                tracing::error!(error = %e, "retention pass failed to list files");
                continue;
            }
        };

        for file in files {
            if let Err(e) = apply_retention_policy(&pool, catalog_max_retries, file.id).await {
                tracing::error!(file_id = file.id, error = %e, "retention policy application failed");
            }
        }
    }
}

pub async fn apply_retention_policy(
    pool: &DbPool,
    catalog_max_retries: u32,
    file_id: i64,
) -> Result<(), CoreError> {
    let file = catalog::get_file_by_id(pool, file_id)
        .await?
        .ok_or_else(|| CoreError::NotFound("file not found".into()))?;
    let policy = catalog::get_retention_policy(pool, &file.retention_policy).await?;

    let mut versions = catalog::list_versions(pool, file_id).await?; // already DESC by version_number
    versions.sort_by(|a, b| b.version_number.cmp(&a.version_number));

    let now = Utc::now();
    let keep_period = ChronoDuration::days(policy.retention_period_days);

    for (rank, version) in versions.iter().enumerate() {
        let within_min_versions = (rank as i64) < policy.min_versions;
        let within_age = parse_iso(&version.timestamp)
            .map(|t| now - t <= keep_period)
            .unwrap_or(false);
        let is_current = version.version_number == file.current_version;

        if within_min_versions || within_age || is_current {
            continue;
        }

        let file_id = file_id;
        let version_number = version.version_number;
        with_transaction(pool, catalog_max_retries, move |tx| {
            Box::pin(async move {
                catalog::set_chunk_status(&mut **tx, file_id, version_number, "deprecated").await
            })
        })
        .await?;
    }

    Ok(())
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

    async fn seed_file_with_versions(pool: &DbPool) -> i64 {
        let old_timestamp = (Utc::now() - ChronoDuration::days(400)).to_rfc3339();
        let file_id: i64 = sqlx::query(
            "INSERT INTO metadata \
             (filename, current_version, size, compressed_size, compression_ratio, \
              upload_timestamp, primary_location, replicas, storage_tier, access_count, \
              retention_policy, is_archived, content_hash) \
             VALUES ('f.bin', 2, 10, 10, 0, ?, 'A', '[]', 'hot', 0, 'default', 0, 'hash')",
        )
        .bind(&old_timestamp)
        .execute(pool)
        .await
        .unwrap()
        .last_insert_rowid();

        for (version, timestamp) in [(1i64, old_timestamp.clone()), (2, now_iso_for_test())] {
            sqlx::query(
                "INSERT INTO versions (file_id, version_number, timestamp, size, compressed_size, \
                 hash, storage_tier, is_archived) VALUES (?, ?, ?, 10, 10, 'h', 'hot', 0)",
            )
            .bind(file_id)
            .bind(version)
            .bind(&timestamp)
            .execute(pool)
            .await
            .unwrap();

            sqlx::query(
                "INSERT INTO chunks \
                 (file_id, version_number, chunk_index, chunk_location, node_name, \
                  original_size, compressed_size, chunk_hash, storage_tier, status) \
                 VALUES (?, ?, 0, 'loc', 'A', 10, 10, 'h', 'hot', 'active')",
            )
            .bind(file_id)
            .bind(version)
            .execute(pool)
            .await
            .unwrap();
        }

        file_id
    }

    fn now_iso_for_test() -> String {
        Utc::now().to_rfc3339()
    }

    #[tokio::test]
    async fn deprecates_old_non_current_version_chunks() {
        let pool = test_pool().await;
        let file_id = seed_file_with_versions(&pool).await;

        apply_retention_policy(&pool, 3, file_id).await.unwrap();

        let chunks = catalog::all_chunks_for_version(&pool, file_id, 1).await.unwrap();
        assert_eq!(chunks[0].status, "deprecated");

        let current_chunks = catalog::all_chunks_for_version(&pool, file_id, 2).await.unwrap();
        assert_eq!(current_chunks[0].status, "active");
    }
}
