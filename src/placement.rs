//! Per-chunk node selection: `select_storage_node` honors capacity and an
//! exclusion set (used to spread a chunk's replicas across distinct nodes);
//! `least_used_node` ignores both and is used for tier-migration and restore
//! placement where no specific size/exclusion constraint applies.

use crate::error::CoreError;
use crate::registry::NodeRegistry;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Bytes currently used in a node's directory: the sum of regular file
/// sizes, non-recursive (chunk files and the archives/ subdirectory's
/// archive blobs are flat siblings of each other, never nested further).
fn used_bytes(dir: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

fn usage_ratio(dir: &Path, capacity: u64) -> f64 {
    if capacity == 0 {
        return f64::INFINITY;
    }
    used_bytes(dir) as f64 / capacity as f64
}

/// Select the least-used node that has room for `size` bytes, excluding any
/// node named in `excluded`. Ties are broken by the registry's stable node
/// order.
pub fn select_storage_node(
    registry: &NodeRegistry,
    capacity_bytes: u64,
    size: u64,
    excluded: &HashSet<String>,
) -> Result<String, CoreError> {
    let mut best: Option<(String, f64)> = None;
    for name in registry.node_names() {
        if excluded.contains(&name) {
            continue;
        }
        let Some(dir) = registry.node_dir(&name) else {
            continue;
        };
        let used = used_bytes(dir);
        let available = capacity_bytes.saturating_sub(used);
        if available < size {
            continue;
        }
        let ratio = used as f64 / capacity_bytes.max(1) as f64;
        match &best {
            Some((_, best_ratio)) if *best_ratio <= ratio => {}
            _ => best = Some((name, ratio)),
        }
    }
    best.map(|(name, _)| name)
        .ok_or_else(|| CoreError::NoSpace("no suitable nodes available for storage".into()))
}

/// The globally least-used node, ignoring size and exclusions.
pub fn least_used_node(registry: &NodeRegistry, capacity_bytes: u64) -> Result<String, CoreError> {
    registry
        .node_names()
        .into_iter()
        .filter_map(|name| {
            let dir = registry.node_dir(&name)?;
            Some((name, usage_ratio(dir, capacity_bytes)))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(name, _)| name)
        .ok_or_else(|| CoreError::NoSpace("no nodes configured".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn registry_with(dirs: &[(&str, &Path)]) -> NodeRegistry {
        let mut map = BTreeMap::new();
        for (name, dir) in dirs {
            map.insert(name.to_string(), dir.to_path_buf());
        }
        NodeRegistry::new(map)
    }

    #[test]
    fn picks_least_used_node_with_room() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        fs::write(a.path().join("existing"), vec![0u8; 1000]).unwrap();
        let reg = registry_with(&[("A", a.path()), ("B", b.path())]);
        let selected = select_storage_node(&reg, 1_000_000, 10, &HashSet::new()).unwrap();
        assert_eq!(selected, "B");
    }

    #[test]
    fn excludes_named_nodes() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let reg = registry_with(&[("A", a.path()), ("B", b.path())]);
        let mut excluded = HashSet::new();
        excluded.insert("A".to_string());
        excluded.insert("B".to_string());
        assert!(select_storage_node(&reg, 1_000_000, 10, &excluded).is_err());
    }

    #[test]
    fn fails_when_no_node_has_room() {
        let a = tempdir().unwrap();
        let reg = registry_with(&[("A", a.path())]);
        let result = select_storage_node(&reg, 100, 1_000, &HashSet::new());
        assert!(result.is_err());
    }
}
