//! The chunk pipeline: streaming split -> compress -> encrypt -> place ->
//! replicate on write, and the inverse gather -> verify -> decrypt ->
//! decompress -> concatenate on read, including replica failover.

use crate::crypto::Cipher;
use crate::db::{self, catalog, DbPool};
use crate::error::CoreError;
use crate::hash;
use crate::placement;
use crate::registry::NodeRegistry;
use crate::storage::replication::replicate_chunk;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Fixed chunk size used to split every uploaded file.
pub const CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Replicas created per newly written chunk, beyond the primary copy.
const REPLICAS_PER_CHUNK: usize = 2;

pub struct WriteResult {
    pub file_id: i64,
    pub version: i64,
    pub original_size: u64,
    pub compressed_size: u64,
    pub compression_ratio: f64,
    pub storage_nodes: Vec<String>,
}

struct Copy {
    node: String,
    path: PathBuf,
}

struct PlacedChunk {
    index: i64,
    primary: Copy,
    replicas: Vec<Copy>,
    original_len: u64,
    compressed_len: u64,
    hash: String,
}

/// Build the on-disk chunk filename. The version number is embedded so a
/// later upload of the same filename can never overwrite an earlier
/// version's chunk payloads (without this, rollback would restore a
/// catalog pointer to bytes that had already been clobbered on disk).
fn chunk_filename(safe_name: &str, version: i64, index: i64) -> String {
    format!("{safe_name}_v{version}_chunk_{index}")
}

/// Write an uploaded file through the full pipeline: split, compress+encrypt
/// each chunk, place the primary and its replicas, and commit the single
/// catalog transaction that makes the new version visible.
#[allow(clippy::too_many_arguments)]
pub async fn write_file(
    pool: &DbPool,
    registry: &NodeRegistry,
    cipher: &Cipher,
    node_capacity_bytes: u64,
    catalog_max_retries: u32,
    safe_filename: &str,
    source: &Path,
) -> Result<WriteResult, CoreError> {
    let metadata = tokio::fs::metadata(source).await?;
    let total_size = metadata.len();

    let whole_file_hash = {
        let file = tokio::fs::File::open(source).await?;
        hash::hash_async_reader(file).await?
    };

    let initial_node = placement::select_storage_node(
        registry,
        node_capacity_bytes,
        total_size,
        &HashSet::new(),
    )
    .or_else(|_| placement::least_used_node(registry, node_capacity_bytes))?;

    // Peek the version this upload will become so chunk filenames can embed
    // it up front; the authoritative value is re-derived atomically inside
    // the catalog transaction below. A concurrent uploader of the same
    // filename finishing first would invalidate this peek; that race is
    // bounded by the catalog's own serialization and only affects the
    // on-disk filename, never the catalog's bookkeeping.
    let next_version = match catalog::get_file_by_filename(pool, safe_filename).await? {
        Some(existing) => existing.current_version + 1,
        None => 1,
    };

    let tier = catalog::get_tier(pool, "hot").await?;
    let compression_level = tier.compression_level as u32;

    let mut placed = Vec::new();
    let mut written_paths = Vec::new();
    let pipeline_result: Result<(), CoreError> = async {
        let mut reader = tokio::fs::File::open(source).await?;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut index: i64 = 0;
        loop {
            let mut filled = 0;
            while filled < buf.len() {
                let n = reader.read(&mut buf[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                break;
            }
            let original_chunk = &buf[..filled];
            let token = cipher.encrypt_compress(original_chunk, compression_level)?;
            let chunk_hash = hash::hash_bytes(&token);

            let mut excluded = HashSet::new();
            let primary_node =
                placement::select_storage_node(registry, node_capacity_bytes, token.len() as u64, &excluded)?;
            excluded.insert(primary_node.clone());

            let primary_dir = registry
                .node_dir(&primary_node)
                .ok_or_else(|| CoreError::Invariant(format!("unknown node {primary_node}")))?;
            let primary_path = primary_dir.join(chunk_filename(safe_filename, next_version, index));
            write_atomic(&primary_path, &token).await?;
            written_paths.push(primary_path.clone());

            let mut replicas = Vec::new();
            for _ in 0..REPLICAS_PER_CHUNK {
                match placement::select_storage_node(registry, node_capacity_bytes, token.len() as u64, &excluded) {
                    Ok(node) => {
                        excluded.insert(node.clone());
                        let dir = registry.node_dir(&node).expect("node from registry");
                        let path = dir.join(chunk_filename(safe_filename, next_version, index));
                        replicas.push(Copy { node, path });
                    }
                    Err(e) => {
                        tracing::warn!(
                            chunk_index = index,
                            error = %e,
                            "failed to place replica, continuing with fewer copies"
                        );
                        break;
                    }
                }
            }

            placed.push(PlacedChunk {
                index,
                primary: Copy { node: primary_node, path: primary_path },
                replicas,
                original_len: filled as u64,
                compressed_len: token.len() as u64,
                hash: chunk_hash,
            });

            if filled < buf.len() {
                break;
            }
            index += 1;
        }
        Ok(())
    }
    .await;

    if let Err(e) = pipeline_result {
        for p in &written_paths {
            let _ = tokio::fs::remove_file(p).await;
        }
        return Err(e);
    }

    let total_compressed: u64 = placed.iter().map(|c| c.compressed_len).sum();
    let mut nodes_used: Vec<String> = placed.iter().map(|c| c.primary.node.clone()).collect();
    for c in &placed {
        nodes_used.extend(c.replicas.iter().map(|r| r.node.clone()));
    }
    nodes_used.sort();
    nodes_used.dedup();

    let placed_ref = &placed;
    let result = db::with_transaction(pool, catalog_max_retries, move |tx| {
        let nodes_used = nodes_used.clone();
        Box::pin(async move {
            let change_type = if next_version == 1 { "create" } else { "update" };
            let (file_id, version) = catalog::upsert_file(
                tx,
                safe_filename,
                total_size as i64,
                total_compressed as i64,
                &initial_node,
                &whole_file_hash,
            )
            .await?;

            catalog::insert_version(
                tx,
                file_id,
                version,
                total_size as i64,
                total_compressed as i64,
                &whole_file_hash,
                "hot",
            )
            .await?;

            for chunk in placed_ref {
                catalog::insert_chunk(
                    tx,
                    file_id,
                    version,
                    chunk.index,
                    &chunk.primary.path.to_string_lossy(),
                    &chunk.primary.node,
                    chunk.original_len as i64,
                    chunk.compressed_len as i64,
                    &chunk.hash,
                    "hot",
                    "active",
                )
                .await?;
                for replica in &chunk.replicas {
                    catalog::insert_chunk(
                        tx,
                        file_id,
                        version,
                        chunk.index,
                        &replica.path.to_string_lossy(),
                        &replica.node,
                        chunk.original_len as i64,
                        chunk.compressed_len as i64,
                        &chunk.hash,
                        "hot",
                        "active",
                    )
                    .await?;
                }
            }

            catalog::set_replicas(tx, file_id, &nodes_used).await?;
            catalog::insert_version_change(&mut **tx, file_id, change_type, None, version).await?;

            Ok((file_id, version))
        })
    })
    .await;

    let (file_id, version) = match result {
        Ok(v) => v,
        Err(e) => {
            for p in &written_paths {
                let _ = tokio::fs::remove_file(p).await;
            }
            return Err(e);
        }
    };

    for chunk in &placed {
        for replica in &chunk.replicas {
            replicate_chunk(&chunk.primary.path, &replica.path).await;
        }
    }

    let ratio = if total_size > 0 {
        (total_size - total_compressed) as f64 / total_size as f64
    } else {
        0.0
    };

    Ok(WriteResult {
        file_id,
        version,
        original_size: total_size,
        compressed_size: total_compressed,
        compression_ratio: ratio,
        storage_nodes: placed.iter().map(|c| c.primary.node.clone()).collect(),
    })
}

async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), CoreError> {
    let tmp_path = path.with_extension("tmp-write");
    let mut file = tokio::fs::File::create(&tmp_path).await?;
    file.write_all(data).await?;
    file.flush().await?;
    tokio::fs::rename(&tmp_path, path).await?;
    Ok(())
}

pub struct ReadResult {
    pub data: Vec<u8>,
}

/// Gather the active chunks of (file, version), verifying and failing over
/// to a replica when a chunk's primary copy is missing or corrupt.
pub async fn read_file(
    pool: &DbPool,
    registry: &NodeRegistry,
    cipher: &Cipher,
    file_id: i64,
    version_number: i64,
) -> Result<ReadResult, CoreError> {
    let chunks = catalog::active_chunks(pool, file_id, version_number).await?;
    if chunks.is_empty() {
        return Err(CoreError::NotFound("no active chunks for this version".into()));
    }

    // Group by chunk_index: every row at the same index is a replica of the
    // same logical chunk (primary plus copies), distinguished by location.
    let mut by_index: std::collections::BTreeMap<i64, Vec<&crate::db::models::ChunkRow>> =
        std::collections::BTreeMap::new();
    for c in &chunks {
        by_index.entry(c.chunk_index).or_default().push(c);
    }

    let mut out = Vec::new();
    for (index, copies) in by_index {
        let payload = recover_chunk(registry, &copies)
            .await
            .ok_or_else(|| {
                CoreError::Corruption(format!("chunk {index} unrecoverable across all replicas"))
            })?;
        let plaintext = cipher.decrypt_decompress(&payload)?;
        out.extend_from_slice(&plaintext);
    }

    Ok(ReadResult { data: out })
}

async fn recover_chunk(
    registry: &NodeRegistry,
    copies: &[&crate::db::models::ChunkRow],
) -> Option<Vec<u8>> {
    for copy in copies {
        if let Ok(bytes) = tokio::fs::read(&copy.chunk_location).await {
            if hash::hash_bytes(&bytes) == copy.chunk_hash {
                return Some(bytes);
            }
        }
    }

    // Every known location failed (missing or hash mismatch); scan every
    // other node directory for a same-basename file that verifies.
    let expected_hash = &copies[0].chunk_hash;
    let basenames: Vec<&str> = copies
        .iter()
        .filter_map(|c| Path::new(&c.chunk_location).file_name()?.to_str())
        .collect();
    for node in registry.node_names() {
        let Some(dir) = registry.node_dir(&node) else {
            continue;
        };
        for basename in &basenames {
            let candidate = dir.join(basename);
            if let Ok(bytes) = tokio::fs::read(&candidate).await {
                if hash::hash_bytes(&bytes) == *expected_hash {
                    return Some(bytes);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::NodeRegistry;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn chunk_filename_embeds_version() {
        let name = chunk_filename("report.pdf", 3, 2);
        assert_eq!(name, "report.pdf_v3_chunk_2");
    }

    async fn test_pool() -> DbPool {
        let pool = DbPool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./src/db/migrations").run(&pool).await.unwrap();
        pool
    }

    fn test_cipher(dir: &std::path::Path) -> Cipher {
        Cipher::load_or_init(&dir.join("key"), &dir.join("salt"), "test-passphrase").unwrap()
    }

    #[tokio::test]
    async fn write_then_read_round_trips_and_replicates() {
        let pool = test_pool().await;
        let node_a = tempdir().unwrap();
        let node_b = tempdir().unwrap();
        let node_c = tempdir().unwrap();
        let mut dirs = BTreeMap::new();
        dirs.insert("A".to_string(), node_a.path().to_path_buf());
        dirs.insert("B".to_string(), node_b.path().to_path_buf());
        dirs.insert("C".to_string(), node_c.path().to_path_buf());
        let registry = NodeRegistry::new(dirs);
        let cipher = test_cipher(&tempdir().unwrap());

        let source_dir = tempdir().unwrap();
        let source_path = source_dir.path().join("upload.bin");
        let payload = b"distributed storage coordinator payload".repeat(100);
        tokio::fs::write(&source_path, &payload).await.unwrap();

        let write_result = write_file(
            &pool,
            &registry,
            &cipher,
            1_000_000_000,
            3,
            "upload.bin",
            &source_path,
        )
        .await
        .unwrap();

        assert_eq!(write_result.version, 1);
        assert_eq!(write_result.original_size, payload.len() as u64);

        let read_result = read_file(&pool, &registry, &cipher, write_result.file_id, 1)
            .await
            .unwrap();
        assert_eq!(read_result.data, payload);
    }

    #[tokio::test]
    async fn second_upload_of_same_name_bumps_version() {
        let pool = test_pool().await;
        let node_a = tempdir().unwrap();
        let node_b = tempdir().unwrap();
        let node_c = tempdir().unwrap();
        let mut dirs = BTreeMap::new();
        dirs.insert("A".to_string(), node_a.path().to_path_buf());
        dirs.insert("B".to_string(), node_b.path().to_path_buf());
        dirs.insert("C".to_string(), node_c.path().to_path_buf());
        let registry = NodeRegistry::new(dirs);
        let cipher = test_cipher(&tempdir().unwrap());

        let source_dir = tempdir().unwrap();
        let source_path = source_dir.path().join("doc.txt");

        tokio::fs::write(&source_path, b"version one").await.unwrap();
        let first = write_file(&pool, &registry, &cipher, 1_000_000_000, 3, "doc.txt", &source_path)
            .await
            .unwrap();
        assert_eq!(first.version, 1);

        tokio::fs::write(&source_path, b"version two, slightly longer").await.unwrap();
        let second = write_file(&pool, &registry, &cipher, 1_000_000_000, 3, "doc.txt", &source_path)
            .await
            .unwrap();
        assert_eq!(second.version, 2);
        assert_eq!(second.file_id, first.file_id);

        let read_result = read_file(&pool, &registry, &cipher, second.file_id, 2)
            .await
            .unwrap();
        assert_eq!(read_result.data, b"version two, slightly longer");
    }
}
