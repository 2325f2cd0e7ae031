//! Data source snapshots
//!
//! Readers take an `Arc` of the current map and keep using it for the whole
//! request. A reload builds a complete new map first and only then swaps the
//! reference, so a failed reload leaves the previous snapshot in place.

use parking_lot::RwLock;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use wirebridge_common::{BridgeError, Result};

use super::{DataSource, DataSourceRegistry};

pub type Snapshot = Arc<HashMap<String, Arc<dyn DataSource>>>;

pub struct DataSourceManager {
    registry: DataSourceRegistry,
    current: RwLock<Snapshot>,
}

impl Default for DataSourceManager {
    fn default() -> Self {
        Self::new(DataSourceRegistry::new())
    }
}

impl DataSourceManager {
    pub fn new(registry: DataSourceRegistry) -> Self {
        Self {
            registry,
            current: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Current set of data sources
    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.current.read())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn DataSource>> {
        self.current.read().get(id).cloned()
    }

    /// Like [`get`](Self::get), failing with the known ids
    pub fn require(&self, id: &str) -> Result<Arc<dyn DataSource>> {
        self.get(id).ok_or_else(|| {
            BridgeError::invalid_argument(format!(
                "unknown data source '{}', configured: [{}]",
                id,
                self.ids().join(", ")
            ))
        })
    }

    /// Sorted ids of the current snapshot
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.current.read().keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Replace all data sources with the ones described by `configs`.
    ///
    /// Accepts `{"<id>": {...}, ...}` or the same map under a top-level
    /// `datasources` key. Returns the number of loaded data sources.
    pub fn reload(&self, configs: &JsonValue) -> Result<usize> {
        let configs = configs.get("datasources").unwrap_or(configs);
        let entries = configs
            .as_object()
            .ok_or_else(|| BridgeError::Config("data source configuration must be an object".into()))?;

        let mut next = HashMap::with_capacity(entries.len());
        for (id, config) in entries {
            match self.registry.create(id, config) {
                Ok(ds) => {
                    next.insert(id.clone(), ds);
                }
                Err(e) => {
                    warn!(datasource = %id, error = %e, "failed to load data source");
                    return Err(e);
                }
            }
        }

        let count = next.len();
        *self.current.write() = Arc::new(next);
        info!(count, "data sources reloaded");
        Ok(count)
    }

    /// Reload from a JSON file
    pub fn load_file(&self, path: &Path) -> Result<usize> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let configs: JsonValue = serde_json::from_str(&text)?;
        self.reload(&configs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn values(rows: JsonValue) -> JsonValue {
        json!({"type": "values", "columns": [{"name": "n", "type": "Int32"}], "rows": rows})
    }

    #[test]
    fn test_reload_swaps_snapshot() {
        let manager = DataSourceManager::default();
        assert_eq!(manager.reload(&json!({"a": values(json!([[1]])), "b": values(json!([]))})).unwrap(), 2);
        assert_eq!(manager.ids(), vec!["a", "b"]);

        let old = manager.snapshot();
        manager.reload(&json!({"datasources": {"c": values(json!([]))}})).unwrap();

        // readers holding the old snapshot keep it
        assert!(old.contains_key("a"));
        assert!(manager.get("a").is_none());
        assert_eq!(manager.ids(), vec!["c"]);
    }

    #[test]
    fn test_failed_reload_keeps_previous() {
        let manager = DataSourceManager::default();
        manager.reload(&json!({"a": values(json!([]))})).unwrap();
        let err = manager
            .reload(&json!({"a": values(json!([])), "broken": {"type": "nope"}}))
            .unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
        assert_eq!(manager.ids(), vec!["a"]);
        assert!(manager.reload(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_require_lists_known_ids() {
        let manager = DataSourceManager::default();
        manager.reload(&json!({"a": values(json!([]))})).unwrap();
        assert_eq!(manager.require("a").unwrap().id(), "a");
        let err = manager.require("zz").err().unwrap();
        assert!(err.to_string().contains("configured: [a]"));
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", json!({"datasources": {"static": values(json!([[1], [2]]))}})).unwrap();
        let manager = DataSourceManager::default();
        assert_eq!(manager.load_file(file.path()).unwrap(), 1);
        assert!(manager.get("static").is_some());

        let missing = manager.load_file(Path::new("/nonexistent/datasources.json")).unwrap_err();
        assert_eq!(missing.code(), "CONFIG_ERROR");
    }
}
