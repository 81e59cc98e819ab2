//! Catalog queries. Every function here either runs inside a caller-supplied
//! transaction (the upload/rollback/archive paths, which must be atomic) or
//! issues a single statement against the pool directly (plain reads).

use crate::db::models::{
    now_iso, ArchiveRow, ChunkRow, ConsistencyRow, DeduplicationRow, FileRow, RetentionPolicyRow,
    TierRow, VersionRow,
};
use crate::error::CoreError;
use sqlx::{Executor, Sqlite, SqlitePool};

// ---------------------------------------------------------------------------
// Files
// ---------------------------------------------------------------------------

pub async fn get_file_by_filename(
    pool: &SqlitePool,
    filename: &str,
) -> Result<Option<FileRow>, CoreError> {
    let row = sqlx::query_as::<_, FileRow>("SELECT * FROM metadata WHERE filename = ?")
        .bind(filename)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn get_file_by_id(pool: &SqlitePool, file_id: i64) -> Result<Option<FileRow>, CoreError> {
    let row = sqlx::query_as::<_, FileRow>("SELECT * FROM metadata WHERE id = ?")
        .bind(file_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn list_non_archived(pool: &SqlitePool) -> Result<Vec<FileRow>, CoreError> {
    let rows = sqlx::query_as::<_, FileRow>(
        "SELECT * FROM metadata WHERE is_archived = 0 ORDER BY filename",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn list_all_files(pool: &SqlitePool) -> Result<Vec<FileRow>, CoreError> {
    let rows = sqlx::query_as::<_, FileRow>("SELECT * FROM metadata ORDER BY filename")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Insert a new File row, or update it for a re-upload (incrementing
/// `current_version`). Returns (file_id, new_current_version).
pub async fn upsert_file(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    filename: &str,
    size: i64,
    compressed_size: i64,
    primary_location: &str,
    content_hash: &str,
) -> Result<(i64, i64), CoreError> {
    let ratio = if size > 0 {
        (size - compressed_size) as f64 / size as f64
    } else {
        0.0
    };
    let existing = sqlx::query_as::<_, FileRow>("SELECT * FROM metadata WHERE filename = ?")
        .bind(filename)
        .fetch_optional(&mut **tx)
        .await?;

    match existing {
        Some(file) => {
            let new_version = file.current_version + 1;
            sqlx::query(
                "UPDATE metadata SET current_version = ?, size = ?, compressed_size = ?, \
                 compression_ratio = ?, primary_location = ?, content_hash = ?, \
                 last_accessed = ?, access_count = access_count + 1 WHERE id = ?",
            )
            .bind(new_version)
            .bind(size)
            .bind(compressed_size)
            .bind(ratio)
            .bind(primary_location)
            .bind(content_hash)
            .bind(now_iso())
            .bind(file.id)
            .execute(&mut **tx)
            .await?;
            Ok((file.id, new_version))
        }
        None => {
            let id = sqlx::query(
                "INSERT INTO metadata \
                 (filename, current_version, size, compressed_size, compression_ratio, \
                  upload_timestamp, primary_location, replicas, storage_tier, last_accessed, \
                  access_count, retention_policy, is_archived, content_hash) \
                 VALUES (?, 1, ?, ?, ?, ?, ?, '[]', 'hot', ?, 1, 'default', 0, ?)",
            )
            .bind(filename)
            .bind(size)
            .bind(compressed_size)
            .bind(ratio)
            .bind(now_iso())
            .bind(primary_location)
            .bind(now_iso())
            .bind(content_hash)
            .execute(&mut **tx)
            .await?
            .last_insert_rowid();
            Ok((id, 1))
        }
    }
}

pub async fn set_replicas(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    file_id: i64,
    nodes: &[String],
) -> Result<(), CoreError> {
    let json = serde_json::to_string(nodes).unwrap_or_else(|_| "[]".to_string());
    sqlx::query("UPDATE metadata SET replicas = ? WHERE id = ?")
        .bind(json)
        .bind(file_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

pub async fn set_current_version(
    executor: impl Executor<'_, Database = Sqlite>,
    file_id: i64,
    version: i64,
) -> Result<(), CoreError> {
    sqlx::query("UPDATE metadata SET current_version = ? WHERE id = ?")
        .bind(version)
        .bind(file_id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn set_storage_tier(
    executor: impl Executor<'_, Database = Sqlite>,
    file_id: i64,
    tier: &str,
) -> Result<(), CoreError> {
    sqlx::query("UPDATE metadata SET storage_tier = ? WHERE id = ?")
        .bind(tier)
        .bind(file_id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn touch_access(pool: &SqlitePool, file_id: i64) -> Result<(), CoreError> {
    sqlx::query(
        "UPDATE metadata SET last_accessed = ?, access_count = access_count + 1 WHERE id = ?",
    )
    .bind(now_iso())
    .bind(file_id)
    .execute(pool)
    .await?;
    sqlx::query("INSERT INTO access_history (file_id, accessed_at, operation) VALUES (?, ?, 'download')")
        .bind(file_id)
        .bind(now_iso())
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn mark_archived(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    file_id: i64,
) -> Result<(), CoreError> {
    sqlx::query(
        "UPDATE metadata SET is_archived = 1, storage_tier = 'cold', archive_date = ? WHERE id = ?",
    )
    .bind(now_iso())
    .bind(file_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn mark_restored(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    file_id: i64,
) -> Result<(), CoreError> {
    sqlx::query(
        "UPDATE metadata SET is_archived = 0, storage_tier = 'hot', last_accessed = ?, \
         current_version = 1 WHERE id = ?",
    )
    .bind(now_iso())
    .bind(file_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn set_deduplication_ref(
    executor: impl Executor<'_, Database = Sqlite>,
    file_id: i64,
    primary_id: i64,
) -> Result<(), CoreError> {
    sqlx::query("UPDATE metadata SET deduplication_ref = ? WHERE id = ?")
        .bind(primary_id)
        .bind(file_id)
        .execute(executor)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Versions
// ---------------------------------------------------------------------------

pub async fn insert_version(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    file_id: i64,
    version_number: i64,
    size: i64,
    compressed_size: i64,
    hash: &str,
    storage_tier: &str,
) -> Result<(), CoreError> {
    sqlx::query(
        "INSERT INTO versions (file_id, version_number, timestamp, size, compressed_size, hash, \
         storage_tier, is_archived) VALUES (?, ?, ?, ?, ?, ?, ?, 0)",
    )
    .bind(file_id)
    .bind(version_number)
    .bind(now_iso())
    .bind(size)
    .bind(compressed_size)
    .bind(hash)
    .bind(storage_tier)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn get_version(
    pool: &SqlitePool,
    file_id: i64,
    version_number: i64,
) -> Result<Option<VersionRow>, CoreError> {
    let row = sqlx::query_as::<_, VersionRow>(
        "SELECT * FROM versions WHERE file_id = ? AND version_number = ?",
    )
    .bind(file_id)
    .bind(version_number)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn list_versions(pool: &SqlitePool, file_id: i64) -> Result<Vec<VersionRow>, CoreError> {
    let rows = sqlx::query_as::<_, VersionRow>(
        "SELECT * FROM versions WHERE file_id = ? ORDER BY version_number DESC",
    )
    .bind(file_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn insert_version_change(
    executor: impl Executor<'_, Database = Sqlite>,
    file_id: i64,
    change_type: &str,
    old_version: Option<i64>,
    new_version: i64,
) -> Result<(), CoreError> {
    sqlx::query(
        "INSERT INTO version_changes (file_id, change_type, old_version, new_version, timestamp) \
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(file_id)
    .bind(change_type)
    .bind(old_version)
    .bind(new_version)
    .bind(now_iso())
    .execute(executor)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Chunks
// ---------------------------------------------------------------------------

#[allow(clippy::too_many_arguments)]
pub async fn insert_chunk(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    file_id: i64,
    version_number: i64,
    chunk_index: i64,
    chunk_location: &str,
    node_name: &str,
    original_size: i64,
    compressed_size: i64,
    chunk_hash: &str,
    storage_tier: &str,
    status: &str,
) -> Result<i64, CoreError> {
    let id = sqlx::query(
        "INSERT INTO chunks (file_id, version_number, chunk_index, chunk_location, node_name, \
         original_size, compressed_size, chunk_hash, storage_tier, status) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(file_id)
    .bind(version_number)
    .bind(chunk_index)
    .bind(chunk_location)
    .bind(node_name)
    .bind(original_size)
    .bind(compressed_size)
    .bind(chunk_hash)
    .bind(storage_tier)
    .bind(status)
    .execute(&mut **tx)
    .await?
    .last_insert_rowid();
    Ok(id)
}

pub async fn active_chunks(
    pool: &SqlitePool,
    file_id: i64,
    version_number: i64,
) -> Result<Vec<ChunkRow>, CoreError> {
    let rows = sqlx::query_as::<_, ChunkRow>(
        "SELECT * FROM chunks WHERE file_id = ? AND version_number = ? AND status = 'active' \
         ORDER BY chunk_index",
    )
    .bind(file_id)
    .bind(version_number)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn all_chunks_for_version(
    executor: impl Executor<'_, Database = Sqlite>,
    file_id: i64,
    version_number: i64,
) -> Result<Vec<ChunkRow>, CoreError> {
    let rows = sqlx::query_as::<_, ChunkRow>(
        "SELECT * FROM chunks WHERE file_id = ? AND version_number = ? ORDER BY chunk_index",
    )
    .bind(file_id)
    .bind(version_number)
    .fetch_all(executor)
    .await?;
    Ok(rows)
}

pub async fn chunks_on_node(pool: &SqlitePool, node_name: &str) -> Result<Vec<ChunkRow>, CoreError> {
    let rows = sqlx::query_as::<_, ChunkRow>("SELECT * FROM chunks WHERE node_name = ?")
        .bind(node_name)
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn set_chunk_status(
    executor: impl Executor<'_, Database = Sqlite>,
    file_id: i64,
    version_number: i64,
    status: &str,
) -> Result<(), CoreError> {
    sqlx::query(
        "UPDATE chunks SET status = ? WHERE file_id = ? AND version_number = ? AND status = 'active'",
    )
    .bind(status)
    .bind(file_id)
    .bind(version_number)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn reactivate_deprecated(
    executor: impl Executor<'_, Database = Sqlite>,
    file_id: i64,
    version_number: i64,
) -> Result<(), CoreError> {
    sqlx::query(
        "UPDATE chunks SET status = 'active' WHERE file_id = ? AND version_number = ? \
         AND status = 'deprecated'",
    )
    .bind(file_id)
    .bind(version_number)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn relocate_chunk(
    executor: impl Executor<'_, Database = Sqlite>,
    chunk_id: i64,
    new_location: &str,
    new_node: &str,
) -> Result<(), CoreError> {
    sqlx::query("UPDATE chunks SET chunk_location = ?, node_name = ? WHERE id = ?")
        .bind(new_location)
        .bind(new_node)
        .bind(chunk_id)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn update_chunk_sizes(
    executor: impl Executor<'_, Database = Sqlite>,
    chunk_id: i64,
    compressed_size: i64,
    chunk_hash: &str,
    storage_tier: &str,
) -> Result<(), CoreError> {
    sqlx::query(
        "UPDATE chunks SET compressed_size = ?, chunk_hash = ?, storage_tier = ? WHERE id = ?",
    )
    .bind(compressed_size)
    .bind(chunk_hash)
    .bind(storage_tier)
    .bind(chunk_id)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn mark_chunks_archived(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    file_id: i64,
    version_number: i64,
) -> Result<(), CoreError> {
    sqlx::query(
        "UPDATE chunks SET status = 'archived' WHERE file_id = ? AND version_number = ? \
         AND status = 'active'",
    )
    .bind(file_id)
    .bind(version_number)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Consistency status
// ---------------------------------------------------------------------------

pub async fn upsert_consistency_status(
    pool: &SqlitePool,
    file_id: i64,
    version_number: i64,
    node_name: &str,
    status: &str,
) -> Result<(), CoreError> {
    sqlx::query(
        "INSERT INTO consistency_status (file_id, version_number, node_name, status, last_update) \
         VALUES (?, ?, ?, ?, ?) \
         ON CONFLICT(file_id, version_number, node_name) DO UPDATE SET status = excluded.status, \
         last_update = excluded.last_update",
    )
    .bind(file_id)
    .bind(version_number)
    .bind(node_name)
    .bind(status)
    .bind(now_iso())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn consistency_for_version(
    pool: &SqlitePool,
    file_id: i64,
    version_number: i64,
) -> Result<Vec<ConsistencyRow>, CoreError> {
    let rows = sqlx::query_as::<_, ConsistencyRow>(
        "SELECT file_id, version_number, node_name, status, last_update FROM consistency_status \
         WHERE file_id = ? AND version_number = ?",
    )
    .bind(file_id)
    .bind(version_number)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Storage tiers & retention policies
// ---------------------------------------------------------------------------

pub async fn get_tier(pool: &SqlitePool, tier_name: &str) -> Result<TierRow, CoreError> {
    let row = sqlx::query_as::<_, TierRow>("SELECT * FROM storage_tiers WHERE tier_name = ?")
        .bind(tier_name)
        .fetch_one(pool)
        .await?;
    Ok(row)
}

pub async fn list_tiers(pool: &SqlitePool) -> Result<Vec<TierRow>, CoreError> {
    let rows = sqlx::query_as::<_, TierRow>("SELECT * FROM storage_tiers ORDER BY tier_name")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

pub async fn get_retention_policy(
    pool: &SqlitePool,
    policy_name: &str,
) -> Result<RetentionPolicyRow, CoreError> {
    let row = sqlx::query_as::<_, RetentionPolicyRow>(
        "SELECT * FROM retention_policies WHERE policy_name = ?",
    )
    .bind(policy_name)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

// ---------------------------------------------------------------------------
// Deduplication
// ---------------------------------------------------------------------------

pub async fn files_with_duplicate_hashes(pool: &SqlitePool) -> Result<Vec<String>, CoreError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT content_hash FROM metadata WHERE content_hash IS NOT NULL \
         GROUP BY content_hash HAVING COUNT(*) > 1",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(h,)| h).collect())
}

pub async fn files_by_content_hash(
    pool: &SqlitePool,
    content_hash: &str,
) -> Result<Vec<FileRow>, CoreError> {
    let rows = sqlx::query_as::<_, FileRow>(
        "SELECT * FROM metadata WHERE content_hash = ? ORDER BY id",
    )
    .bind(content_hash)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn upsert_deduplication(
    pool: &SqlitePool,
    content_hash: &str,
    space_saved_delta: i64,
) -> Result<(), CoreError> {
    sqlx::query(
        "INSERT INTO deduplication (content_hash, reference_count, total_space_saved, first_seen, \
         last_reference) VALUES (?, 2, ?, ?, ?) \
         ON CONFLICT(content_hash) DO UPDATE SET reference_count = reference_count + 1, \
         total_space_saved = total_space_saved + excluded.total_space_saved, \
         last_reference = excluded.last_reference",
    )
    .bind(content_hash)
    .bind(space_saved_delta)
    .bind(now_iso())
    .bind(now_iso())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn list_deduplication(pool: &SqlitePool) -> Result<Vec<DeduplicationRow>, CoreError> {
    let rows = sqlx::query_as::<_, DeduplicationRow>(
        "SELECT * FROM deduplication ORDER BY total_space_saved DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Archives
// ---------------------------------------------------------------------------

pub async fn insert_archive(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    file_id: i64,
    archive_location: &str,
    archive_size: i64,
) -> Result<(), CoreError> {
    sqlx::query(
        "INSERT INTO archives (file_id, archive_location, archive_size, restore_count, \
         archive_tier) VALUES (?, ?, ?, 0, 'cold')",
    )
    .bind(file_id)
    .bind(archive_location)
    .bind(archive_size)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn get_archive(pool: &SqlitePool, file_id: i64) -> Result<Option<ArchiveRow>, CoreError> {
    let row = sqlx::query_as::<_, ArchiveRow>("SELECT * FROM archives WHERE file_id = ?")
        .bind(file_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn bump_restore_count(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    file_id: i64,
) -> Result<(), CoreError> {
    sqlx::query(
        "UPDATE archives SET restore_count = restore_count + 1, last_restore_date = ? \
         WHERE file_id = ?",
    )
    .bind(now_iso())
    .bind(file_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
