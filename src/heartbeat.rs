//! Heartbeat ingestion, the node-liveness monitor loop, and failure
//! recovery (chunk redistribution away from a node presumed dead).

use crate::db::{catalog, with_transaction, DbPool};
use crate::error::CoreError;
use crate::placement;
use crate::registry::NodeRegistry;
use chrono::Duration as ChronoDuration;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Record a heartbeat POSTed by a node's heartbeat emitter. Returns true if
/// this node had been presumed dead (absent from the live map) and is now
/// recovering.
pub fn record_heartbeat(registry: &NodeRegistry, node_name: &str) -> bool {
    registry.record_heartbeat(node_name)
}

/// Background task: every `period`, find nodes whose last heartbeat is
/// older than `threshold` and hand them to failure recovery, then drop them
/// from the live map. Runs until `cancel` is triggered.
pub async fn monitor_loop(
    pool: DbPool,
    registry: Arc<NodeRegistry>,
    node_capacity_bytes: u64,
    catalog_max_retries: u32,
    threshold_secs: u64,
    period_secs: u64,
    cancel: CancellationToken,
) {
    let threshold = ChronoDuration::seconds(threshold_secs as i64);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("node monitor loop shutting down");
                return;
            }
            _ = tokio::time::sleep(Duration::from_secs(period_secs)) => {}
        }

        // Snapshot-based: a node recovering mid-pass may still be treated
        // as failed for this pass, by design.
        for (node, last_seen) in registry.snapshot() {
            if chrono::Utc::now() - last_seen > threshold {
                tracing::warn!(node = %node, "heartbeat threshold exceeded, handling failure");
                if let Err(e) = redistribute_chunks(
                    &pool,
                    &registry,
                    node_capacity_bytes,
                    catalog_max_retries,
                    &node,
                )
                .await
                {
                    tracing::error!(node = %node, error = %e, "chunk redistribution failed");
                }
                registry.forget(&node);
            }
        }
    }
}

/// For every chunk row owned by `failed_node`, attempt to place a copy on
/// another node and rewrite the catalog row to point at it. Best-effort,
/// per-chunk: a single chunk's failure is logged and does not stop the
/// scan. Never downgrades a chunk's status.
pub async fn redistribute_chunks(
    pool: &DbPool,
    registry: &NodeRegistry,
    node_capacity_bytes: u64,
    catalog_max_retries: u32,
    failed_node: &str,
) -> Result<(), CoreError> {
    let chunks = catalog::chunks_on_node(pool, failed_node).await?;

    for chunk in chunks {
        let mut excluded = HashSet::new();
        excluded.insert(failed_node.to_string());
        let target = match placement::select_storage_node(
            registry,
            node_capacity_bytes,
            chunk.compressed_size as u64,
            &excluded,
        ) {
            Ok(node) => node,
            Err(e) => {
                tracing::warn!(chunk_id = chunk.id, error = %e, "no replacement node available");
                continue;
            }
        };

        let Some(dir) = registry.node_dir(&target) else {
            continue;
        };
        let Some(basename) = std::path::Path::new(&chunk.chunk_location).file_name() else {
            continue;
        };
        let new_path = dir.join(basename);

        if !tokio::fs::try_exists(&new_path).await.unwrap_or(false) {
            match tokio::fs::read(&chunk.chunk_location).await {
                Ok(data) => {
                    if let Err(e) = tokio::fs::write(&new_path, &data).await {
                        tracing::warn!(chunk_id = chunk.id, error = %e, "redistribution write failed");
                        continue;
                    }
                }
                Err(e) => {
                    tracing::warn!(chunk_id = chunk.id, error = %e, "redistribution read failed");
                    continue;
                }
            }
        }

        let new_path_str = new_path.to_string_lossy().to_string();
        let target_clone = target.clone();
        let result = with_transaction(pool, catalog_max_retries, move |tx| {
            let new_path_str = new_path_str.clone();
            let target_clone = target_clone.clone();
            Box::pin(async move {
                catalog::relocate_chunk(&mut **tx, chunk.id, &new_path_str, &target_clone).await
            })
        })
        .await;

        if let Err(e) = result {
            tracing::warn!(chunk_id = chunk.id, error = %e, "redistribution catalog update failed");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn record_heartbeat_reports_recovery() {
        let mut dirs = BTreeMap::new();
        dirs.insert("Node1".to_string(), "./n1".into());
        let registry = NodeRegistry::new(dirs);
        assert!(record_heartbeat(&registry, "Node1"));
        assert!(!record_heartbeat(&registry, "Node1"));
    }
}
