//! Version numbering, rollback, and diff.

use crate::db::models::{parse_iso, VersionRow};
use crate::db::{catalog, with_transaction, DbPool};
use crate::error::CoreError;
use serde::Serialize;

/// Roll a file back to a previously-uploaded version. A no-op if `target`
/// is already the current version. Does not write a new Version row — the
/// version history is unchanged, only which version is "current" moves.
pub async fn rollback(
    pool: &DbPool,
    catalog_max_retries: u32,
    file_id: i64,
    target_version: i64,
) -> Result<(), CoreError> {
    let target = catalog::get_version(pool, file_id, target_version)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("version {target_version} not found")))?;

    let file = catalog::get_file_by_id(pool, file_id)
        .await?
        .ok_or_else(|| CoreError::NotFound("file not found".into()))?;

    if file.current_version == target.version_number {
        return Ok(());
    }

    with_transaction(pool, catalog_max_retries, move |tx| {
        Box::pin(async move {
            catalog::set_chunk_status(&mut **tx, file_id, file.current_version, "deprecated").await?;
            catalog::reactivate_deprecated(&mut **tx, file_id, target.version_number).await?;
            catalog::set_current_version(&mut **tx, file_id, target.version_number).await?;
            catalog::insert_version_change(
                &mut **tx,
                file_id,
                "rollback",
                Some(file.current_version),
                target.version_number,
            )
            .await?;
            Ok(())
        })
    })
    .await
}

#[derive(Debug, Serialize)]
pub struct Diff {
    pub size_delta: i64,
    pub hash_identical: bool,
    pub seconds_between: i64,
    pub v1: VersionRow,
    pub v2: VersionRow,
}

pub async fn diff(pool: &DbPool, file_id: i64, v1: i64, v2: i64) -> Result<Diff, CoreError> {
    let first = catalog::get_version(pool, file_id, v1)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("version {v1} not found")))?;
    let second = catalog::get_version(pool, file_id, v2)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("version {v2} not found")))?;

    let t1 = parse_iso(&first.timestamp).unwrap_or_default();
    let t2 = parse_iso(&second.timestamp).unwrap_or_default();

    Ok(Diff {
        size_delta: second.size - first.size,
        hash_identical: first.hash == second.hash,
        seconds_between: (t2 - t1).num_seconds(),
        v1: first,
        v2: second,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_struct_serializes() {
        let d = Diff {
            size_delta: 10,
            hash_identical: false,
            seconds_between: 60,
            v1: VersionRow {
                id: 1,
                file_id: 1,
                version_number: 1,
                timestamp: "2024-01-01T00:00:00+00:00".into(),
                size: 10,
                compressed_size: 5,
                hash: "a".into(),
                storage_tier: "hot".into(),
                is_archived: false,
            },
            v2: VersionRow {
                id: 2,
                file_id: 1,
                version_number: 2,
                timestamp: "2024-01-01T00:01:00+00:00".into(),
                size: 20,
                compressed_size: 10,
                hash: "b".into(),
                storage_tier: "hot".into(),
                is_archived: false,
            },
        };
        assert_eq!(d.size_delta, 10);
        assert!(serde_json::to_string(&d).is_ok());
    }
}
