//! Replica fan-out: copy a chunk's already-encrypted bytes to the 1-2
//! replica locations chosen for it when it was written. Failures are logged
//! and skipped; they never abort the upload (the primary copy already
//! committed in the catalog transaction).

use std::path::Path;

pub async fn replicate_chunk(source_path: &Path, dest_path: &Path) {
    if tokio::fs::try_exists(dest_path).await.unwrap_or(false) {
        return;
    }
    let data = match tokio::fs::read(source_path).await {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(source = %source_path.display(), error = %e, "replication read failed");
            return;
        }
    };
    if let Some(parent) = dest_path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            tracing::warn!(dir = %parent.display(), error = %e, "replication mkdir failed");
            return;
        }
    }
    if let Err(e) = tokio::fs::write(dest_path, &data).await {
        tracing::warn!(dest = %dest_path.display(), error = %e, "replication write failed");
    }
}
