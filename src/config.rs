use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Runtime configuration, loaded once at startup from the environment (with
/// `.env` support via `dotenvy`).
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub bind_addr: String,
    pub database_path: String,

    /// Ordered node-name -> directory map, e.g. `Node1=./storage_node1,Node2=./storage_node2`.
    pub node_dirs: BTreeMap<String, PathBuf>,

    pub admin_key: String,
    pub encryption_passphrase: String,
    pub key_file: PathBuf,
    pub salt_file: PathBuf,

    pub heartbeat_threshold_secs: u64,
    pub monitor_period_secs: u64,
    pub tier_migration_period_secs: u64,
    pub tier_migration_backoff_secs: u64,
    pub version_sync_timeout_secs: u64,
    pub catalog_busy_timeout_secs: u64,
    pub catalog_max_retries: u32,

    /// Per-node capacity, in bytes. Fixed constant per the placement design.
    pub node_capacity_bytes: u64,
}

const DEFAULT_NODE_CAPACITY_BYTES: u64 = 500 * 1024 * 1024;

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Config {
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            database_path: std::env::var("DATABASE_PATH")
                .unwrap_or_else(|_| "./coordinator.sqlite".to_string()),
            node_dirs: parse_node_dirs(
                &std::env::var("NODE_DIRS").unwrap_or_else(|_| {
                    "Node1=./storage_node1,Node2=./storage_node2,Node3=./storage_node3".to_string()
                }),
            )?,
            admin_key: std::env::var("ADMIN_KEY")
                .expect("ADMIN_KEY environment variable must be set"),
            encryption_passphrase: std::env::var("ENCRYPTION_PASSPHRASE")
                .expect("ENCRYPTION_PASSPHRASE environment variable must be set"),
            key_file: std::env::var("KEY_FILE")
                .unwrap_or_else(|_| "./encryption.key".to_string())
                .into(),
            salt_file: std::env::var("SALT_FILE")
                .unwrap_or_else(|_| "./salt.key".to_string())
                .into(),
            heartbeat_threshold_secs: env_parse("HEARTBEAT_THRESHOLD_SECS", 40)?,
            monitor_period_secs: env_parse("MONITOR_PERIOD_SECS", 10)?,
            tier_migration_period_secs: env_parse("TIER_MIGRATION_PERIOD_SECS", 3600)?,
            tier_migration_backoff_secs: env_parse("TIER_MIGRATION_BACKOFF_SECS", 300)?,
            version_sync_timeout_secs: env_parse("VERSION_SYNC_TIMEOUT_SECS", 30)?,
            catalog_busy_timeout_secs: env_parse("CATALOG_BUSY_TIMEOUT_SECS", 20)?,
            catalog_max_retries: env_parse("CATALOG_MAX_RETRIES", 3)?,
            node_capacity_bytes: env_parse("NODE_CAPACITY_BYTES", DEFAULT_NODE_CAPACITY_BYTES)?,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) => v
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

fn parse_node_dirs(raw: &str) -> anyhow::Result<BTreeMap<String, PathBuf>> {
    let mut map = BTreeMap::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let (name, dir) = entry
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("malformed NODE_DIRS entry: {entry}"))?;
        map.insert(name.to_string(), PathBuf::from(dir));
    }
    if map.is_empty() {
        anyhow::bail!("NODE_DIRS must name at least one node");
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_node_dirs() {
        let map = parse_node_dirs("Node1=./a,Node2=./b").unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["Node1"], PathBuf::from("./a"));
    }

    #[test]
    fn rejects_empty_node_dirs() {
        assert!(parse_node_dirs("").is_err());
    }
}
