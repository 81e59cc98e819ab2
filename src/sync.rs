//! Parallel fan-out of a file version's chunks to a target set of nodes,
//! with per-(file,version,node) consistency tracking.

use crate::db::{catalog, DbPool};
use crate::error::CoreError;
use crate::hash;
use crate::registry::NodeRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const MAX_CONCURRENT_SYNCS: usize = 8;

/// Copy every chunk location to every target node (if the node doesn't
/// already have it) and verify the copy is bytewise identical to the
/// source, recording a `synced`/`failed` ConsistencyStatus row per node.
/// Returns true iff every target node reached `synced`.
pub async fn ensure_version_consistency(
    pool: &DbPool,
    registry: &NodeRegistry,
    file_id: i64,
    version: i64,
    target_nodes: &[String],
    chunk_locations: &[PathBuf],
    timeout_secs: u64,
) -> Result<bool, CoreError> {
    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_SYNCS));
    let mut tasks = JoinSet::new();

    for node in target_nodes {
        let Some(dir) = registry.node_dir(node).map(|p| p.to_path_buf()) else {
            continue;
        };
        let node = node.clone();
        let locations = chunk_locations.to_vec();
        let permit = semaphore.clone();

        tasks.spawn(async move {
            let _permit = permit.acquire_owned().await;
            let ok = sync_to_node(&dir, &locations).await;
            (node, ok)
        });
    }

    let deadline = Duration::from_secs(timeout_secs);
    let mut all_synced = true;
    let collected = tokio::time::timeout(deadline, async {
        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok(pair) = joined {
                results.push(pair);
            }
        }
        results
    })
    .await
    .unwrap_or_default();

    for (node, ok) in &collected {
        let status = if *ok { "synced" } else { "failed" };
        if !ok {
            all_synced = false;
        }
        catalog::upsert_consistency_status(pool, file_id, version, node, status).await?;
    }

    // Any target that never reported back before the deadline is a straggler.
    for node in target_nodes {
        if !collected.iter().any(|(n, _)| n == node) {
            all_synced = false;
            catalog::upsert_consistency_status(pool, file_id, version, node, "failed").await?;
        }
    }

    Ok(all_synced)
}

async fn sync_to_node(node_dir: &std::path::Path, locations: &[PathBuf]) -> bool {
    let mut ok = true;
    for source in locations {
        let Some(basename) = source.file_name() else {
            ok = false;
            continue;
        };
        let dest = node_dir.join(basename);
        if tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            continue;
        }
        let Ok(data) = tokio::fs::read(source).await else {
            ok = false;
            continue;
        };
        if tokio::fs::write(&dest, &data).await.is_err() {
            ok = false;
            continue;
        }
        let Ok(dest_data) = tokio::fs::read(&dest).await else {
            ok = false;
            continue;
        };
        if hash::hash_bytes(&data) != hash::hash_bytes(&dest_data) {
            ok = false;
        }
    }
    ok
}

/// Pure catalog query: true iff every expected node has a `synced` row for
/// (file_id, version).
pub async fn ensure_all_nodes_synced(
    pool: &DbPool,
    file_id: i64,
    version: i64,
    nodes: &[String],
) -> Result<bool, CoreError> {
    let rows = catalog::consistency_for_version(pool, file_id, version).await?;
    Ok(nodes.iter().all(|node| {
        rows.iter()
            .any(|r| r.node_name == *node && r.status == "synced")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbPool;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    async fn test_pool() -> DbPool {
        let pool = DbPool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./src/db/migrations").run(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn replicates_chunk_to_every_target_node() {
        let pool = test_pool().await;
        let source_dir = tempdir().unwrap();
        let target_a = tempdir().unwrap();
        let target_b = tempdir().unwrap();

        let mut dirs = BTreeMap::new();
        dirs.insert("A".to_string(), target_a.path().to_path_buf());
        dirs.insert("B".to_string(), target_b.path().to_path_buf());
        let registry = NodeRegistry::new(dirs);

        let chunk_path = source_dir.path().join("chunk_0");
        tokio::fs::write(&chunk_path, b"chunk payload").await.unwrap();

        let targets = vec!["A".to_string(), "B".to_string()];
        let all_synced = ensure_version_consistency(
            &pool,
            &registry,
            1,
            1,
            &targets,
            &[chunk_path.clone()],
            5,
        )
        .await
        .unwrap();

        assert!(all_synced);
        assert!(target_a.path().join("chunk_0").exists());
        assert!(target_b.path().join("chunk_0").exists());
        assert!(ensure_all_nodes_synced(&pool, 1, 1, &targets).await.unwrap());
    }

    #[tokio::test]
    async fn missing_target_node_is_not_synced() {
        let pool = test_pool().await;
        let source_dir = tempdir().unwrap();
        let registry = NodeRegistry::new(BTreeMap::new());

        let chunk_path = source_dir.path().join("chunk_0");
        tokio::fs::write(&chunk_path, b"chunk payload").await.unwrap();

        let targets = vec!["ghost".to_string()];
        let all_synced =
            ensure_version_consistency(&pool, &registry, 1, 1, &targets, &[chunk_path], 5)
                .await
                .unwrap();

        assert!(!all_synced);
        assert!(!ensure_all_nodes_synced(&pool, 1, 1, &targets).await.unwrap());
    }
}
