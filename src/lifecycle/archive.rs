//! Archival (concatenate active chunks into one cold-stored blob) and
//! restore (split the blob back into fresh chunks at version 1).

use crate::crypto::Cipher;
use crate::db::{catalog, with_transaction, DbPool};
use crate::error::CoreError;
use crate::hash;
use crate::placement;
use crate::registry::NodeRegistry;
use crate::storage::CHUNK_SIZE;
use std::collections::HashSet;
use std::path::PathBuf;

/// Concatenate every active chunk of a file's current version, in index
/// order, into `<cold_node_dir>/archives/<filename>.archive`, then retire
/// the original chunk files.
pub async fn archive_file(
    pool: &DbPool,
    registry: &NodeRegistry,
    catalog_max_retries: u32,
    file_id: i64,
) -> Result<(), CoreError> {
    let file = catalog::get_file_by_id(pool, file_id)
        .await?
        .ok_or_else(|| CoreError::NotFound("file not found".into()))?;

    let cold_node = placement::least_used_node(registry, u64::MAX)?;
    let cold_dir = registry
        .node_dir(&cold_node)
        .ok_or_else(|| CoreError::Invariant("cold node has no directory".into()))?;
    let archives_dir = cold_dir.join("archives");
    tokio::fs::create_dir_all(&archives_dir).await?;

    let chunks = catalog::active_chunks(pool, file_id, file.current_version).await?;
    let archive_path = archives_dir.join(format!("{}.archive", file.filename));

    let mut blob = Vec::new();
    let mut original_paths = Vec::new();
    for chunk in &chunks {
        let data = tokio::fs::read(&chunk.chunk_location).await?;
        blob.extend_from_slice(&data);
        original_paths.push(PathBuf::from(&chunk.chunk_location));
    }
    tokio::fs::write(&archive_path, &blob).await?;

    let archive_path_str = archive_path.to_string_lossy().to_string();
    let archive_size = blob.len() as i64;
    let version_number = file.current_version;
    with_transaction(pool, catalog_max_retries, move |tx| {
        let archive_path_str = archive_path_str.clone();
        Box::pin(async move {
            catalog::insert_archive(tx, file_id, &archive_path_str, archive_size).await?;
            catalog::mark_archived(tx, file_id).await?;
            catalog::mark_chunks_archived(tx, file_id, version_number).await?;
            Ok(())
        })
    })
    .await?;

    for path in original_paths {
        let _ = tokio::fs::remove_file(path).await;
    }

    Ok(())
}

/// Restore an archived file: split the archive blob back into fixed-size
/// chunks, place each on a hot-selected node, and record fresh Chunk rows
/// at version_number = 1. Pre-archive version history is intentionally not
/// reconstructed in the catalog; only the archive blob retains those bytes.
pub async fn restore_file(
    pool: &DbPool,
    registry: &NodeRegistry,
    cipher: &Cipher,
    node_capacity_bytes: u64,
    catalog_max_retries: u32,
    file_id: i64,
) -> Result<(), CoreError> {
    let archive = catalog::get_archive(pool, file_id)
        .await?
        .ok_or_else(|| CoreError::NotFound("no archive for this file".into()))?;
    let file = catalog::get_file_by_id(pool, file_id)
        .await?
        .ok_or_else(|| CoreError::NotFound("file not found".into()))?;

    let blob = tokio::fs::read(&archive.archive_location).await?;
    let tier = catalog::get_tier(pool, "hot").await?;

    struct NewChunk {
        index: i64,
        path: PathBuf,
        node: String,
        original_len: u64,
        compressed_len: u64,
        hash: String,
    }

    let mut placed = Vec::new();
    for (index, raw) in blob.chunks(CHUNK_SIZE).enumerate() {
        let token = cipher.encrypt_compress(raw, tier.compression_level as u32)?;
        let chunk_hash = hash::hash_bytes(&token);
        let node = placement::select_storage_node(
            registry,
            node_capacity_bytes,
            token.len() as u64,
            &HashSet::new(),
        )?;
        let dir = registry
            .node_dir(&node)
            .ok_or_else(|| CoreError::Invariant(format!("unknown node {node}")))?;
        let path = dir.join(format!("{}_v1_chunk_{}", file.filename, index));
        tokio::fs::write(&path, &token).await?;
        placed.push(NewChunk {
            index: index as i64,
            path,
            node,
            original_len: raw.len() as u64,
            compressed_len: token.len() as u64,
            hash: chunk_hash,
        });
    }

    with_transaction(pool, catalog_max_retries, move |tx| {
        let placed = &placed;
        Box::pin(async move {
            for chunk in placed {
                catalog::insert_chunk(
                    tx,
                    file_id,
                    1,
                    chunk.index,
                    &chunk.path.to_string_lossy(),
                    &chunk.node,
                    chunk.original_len as i64,
                    chunk.compressed_len as i64,
                    &chunk.hash,
                    "hot",
                    "active",
                )
                .await?;
            }
            catalog::mark_restored(tx, file_id).await?;
            catalog::bump_restore_count(tx, file_id).await?;
            Ok(())
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbPool;
    use crate::storage::{read_file, write_file};
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    async fn test_pool() -> DbPool {
        let pool = DbPool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./src/db/migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn archive_then_restore_round_trips_file_contents() {
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
        let cipher = Cipher::load_or_init(
            &keydir.path().join("key"),
            &keydir.path().join("salt"),
            "test-passphrase",
        )
        .unwrap();

        let source_dir = tempdir().unwrap();
        let source_path = source_dir.path().join("archived.bin");
        let payload = b"cold storage candidate payload".repeat(200);
        tokio::fs::write(&source_path, &payload).await.unwrap();

        let written = write_file(
            &pool,
            &registry,
            &cipher,
            1_000_000_000,
            3,
            "archived.bin",
            &source_path,
        )
        .await
        .unwrap();

        archive_file(&pool, &registry, 3, written.file_id).await.unwrap();

        let file = catalog::get_file_by_id(&pool, written.file_id)
            .await
            .unwrap()
            .unwrap();
        assert!(file.is_archived);
        assert!(catalog::active_chunks(&pool, written.file_id, written.version)
            .await
            .unwrap()
            .is_empty());

        restore_file(&pool, &registry, &cipher, 1_000_000_000, 3, written.file_id)
            .await
            .unwrap();

        let restored = read_file(&pool, &registry, &cipher, written.file_id, 1)
            .await
            .unwrap();
        assert_eq!(restored.data, payload);

        let file = catalog::get_file_by_id(&pool, written.file_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!file.is_archived);
    }
}
