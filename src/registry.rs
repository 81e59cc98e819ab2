//! Cross-cutting mutable state shared by every HTTP handler and background
//! loop: the node -> directory map (fixed at startup) and the in-memory
//! heartbeat table (mutated continuously). Kept behind a mutex rather than
//! as an implicit global, and injected into handlers via `AppState`.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct NodeRegistry {
    dirs: BTreeMap<String, PathBuf>,
    heartbeats: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl NodeRegistry {
    pub fn new(dirs: BTreeMap<String, PathBuf>) -> Self {
        NodeRegistry {
            dirs,
            heartbeats: Mutex::new(HashMap::new()),
        }
    }

    pub fn node_dir(&self, name: &str) -> Option<&Path> {
        self.dirs.get(name).map(|p| p.as_path())
    }

    /// Nodes in stable registration order (used to break placement ties).
    pub fn node_names(&self) -> Vec<String> {
        self.dirs.keys().cloned().collect()
    }

    pub fn other_nodes<'a>(&'a self, exclude: &'a str) -> impl Iterator<Item = &'a String> + 'a {
        self.dirs.keys().filter(move |n| n.as_str() != exclude)
    }

    /// Record (or refresh) a heartbeat. A name transitioning from absent to
    /// present is a recovery; the caller decides what, if anything, to do
    /// with that fact.
    pub fn record_heartbeat(&self, name: &str) -> bool {
        let mut guard = self.heartbeats.lock().expect("heartbeat mutex poisoned");
        let recovered = !guard.contains_key(name);
        guard.insert(name.to_string(), Utc::now());
        recovered
    }

    pub fn heartbeat_age(&self, name: &str) -> Option<chrono::Duration> {
        let guard = self.heartbeats.lock().expect("heartbeat mutex poisoned");
        guard.get(name).map(|t| Utc::now() - *t)
    }

    /// Snapshot the currently tracked (node, last_heartbeat) pairs. The
    /// monitor loop works off a snapshot by design: a node recovering during
    /// failure handling may still be treated as failed for this pass.
    pub fn snapshot(&self) -> Vec<(String, DateTime<Utc>)> {
        let guard = self.heartbeats.lock().expect("heartbeat mutex poisoned");
        guard.iter().map(|(k, v)| (k.clone(), *v)).collect()
    }

    /// Remove a node from the live map once failure handling has run for it.
    pub fn forget(&self, name: &str) {
        let mut guard = self.heartbeats.lock().expect("heartbeat mutex poisoned");
        guard.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> NodeRegistry {
        let mut dirs = BTreeMap::new();
        dirs.insert("Node1".to_string(), PathBuf::from("./n1"));
        dirs.insert("Node2".to_string(), PathBuf::from("./n2"));
        NodeRegistry::new(dirs)
    }

    #[test]
    fn first_heartbeat_is_a_recovery() {
        let reg = registry();
        assert!(reg.record_heartbeat("Node1"));
        assert!(!reg.record_heartbeat("Node1"));
    }

    #[test]
    fn forget_removes_from_snapshot() {
        let reg = registry();
        reg.record_heartbeat("Node1");
        assert_eq!(reg.snapshot().len(), 1);
        reg.forget("Node1");
        assert_eq!(reg.snapshot().len(), 0);
    }
}
