//! Row types mapping directly onto the catalog schema (see
//! `db/migrations/0001_init.sql`).

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct FileRow {
    pub id: i64,
    pub filename: String,
    pub current_version: i64,
    pub size: i64,
    pub compressed_size: i64,
    pub compression_ratio: f64,
    pub upload_timestamp: String,
    pub primary_location: String,
    pub replicas: String,
    pub storage_tier: String,
    pub last_accessed: Option<String>,
    pub access_count: i64,
    pub retention_policy: String,
    pub is_archived: bool,
    pub archive_date: Option<String>,
    pub content_hash: String,
    pub deduplication_ref: Option<i64>,
}

impl FileRow {
    pub fn replica_nodes(&self) -> Vec<String> {
        serde_json::from_str(&self.replicas).unwrap_or_default()
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct VersionRow {
    pub id: i64,
    pub file_id: i64,
    pub version_number: i64,
    pub timestamp: String,
    pub size: i64,
    pub compressed_size: i64,
    pub hash: String,
    pub storage_tier: String,
    pub is_archived: bool,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ChunkRow {
    pub id: i64,
    pub file_id: i64,
    pub version_number: i64,
    pub chunk_index: i64,
    pub chunk_location: String,
    pub node_name: String,
    pub original_size: i64,
    pub compressed_size: i64,
    pub chunk_hash: String,
    pub storage_tier: String,
    pub deduplication_ref: Option<i64>,
    pub status: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConsistencyRow {
    pub file_id: i64,
    pub version_number: i64,
    pub node_name: String,
    pub status: String,
    pub last_update: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TierRow {
    pub tier_name: String,
    pub max_size: i64,
    pub retention_days: i64,
    pub auto_archive_days: Option<i64>,
    pub compression_level: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RetentionPolicyRow {
    pub policy_name: String,
    pub min_versions: i64,
    pub max_versions: i64,
    pub retention_period_days: i64,
    pub auto_archive_enabled: bool,
    pub archive_after_days: i64,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ArchiveRow {
    pub id: i64,
    pub file_id: i64,
    pub archive_location: String,
    pub archive_size: i64,
    pub restore_count: i64,
    pub last_restore_date: Option<String>,
    pub archive_tier: String,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct DeduplicationRow {
    pub id: i64,
    pub content_hash: String,
    pub reference_count: i64,
    pub total_space_saved: i64,
    pub first_seen: String,
    pub last_reference: String,
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

pub fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
