//! Registry resolving configuration ids to storage locations.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::policy::eq_fold;

/// Storage locations and principals of one configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    /// Raw log file name inside `data_path`
    #[serde(default)]
    pub log_file: String,
    /// Directory holding the policy document
    pub config_path: PathBuf,
    /// Directory holding the raw log
    pub data_path: PathBuf,
    /// Principals per operation, in manifest order
    #[serde(default)]
    pub authorized_users: HashMap<String, Vec<String>>,
    /// Data owner
    #[serde(default)]
    pub owner: String,
    /// Key used by the data owner to deduplicate uploads
    #[serde(default)]
    pub dedup_key: String,
}

impl Mapping {
    /// Returns true if the manifest lists `principal` for `operation`.
    ///
    /// Both the operation key and the principal compare case-insensitively.
    pub fn is_authorized(&self, operation: &str, principal: &str) -> bool {
        self.authorized_users
            .iter()
            .filter(|(op, _)| op.eq_ignore_ascii_case(operation))
            .flat_map(|(_, users)| users.iter())
            .any(|user| eq_fold(user, principal))
    }
}

type MappingTable = HashMap<String, Mapping>;

/// Registry of configuration mappings.
///
/// Loading swaps the whole table at once; readers always see either the old
/// or the new table, never a mix.
#[derive(Debug, Default)]
pub struct MappingRegistry {
    table: RwLock<Arc<MappingTable>>,
}

impl MappingRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry loaded from a JSON manifest.
    pub fn from_path(path: &Path) -> Result<Self> {
        let registry = Self::new();
        registry.load_mappings(path)?;
        Ok(registry)
    }

    /// Replaces the table with the contents of a JSON manifest
    /// (`{"<configID>": {...}}`).
    ///
    /// On failure the previous table stays in place.
    pub fn load_mappings(&self, path: &Path) -> Result<()> {
        let raw = std::fs::read(path).map_err(|e| {
            Error::Config(format!("cannot read mapping {}: {}", path.display(), e))
        })?;
        let table: MappingTable = serde_json::from_slice(&raw).map_err(|e| {
            Error::Config(format!("cannot parse mapping {}: {}", path.display(), e))
        })?;
        self.replace(table);
        Ok(())
    }

    /// Replaces the table with an already-built one.
    pub fn replace(&self, table: HashMap<String, Mapping>) {
        let count = table.len();
        let next = Arc::new(table);
        match self.table.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        tracing::info!(configs = count, "mapping table loaded");
    }

    /// Resolves a configuration id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownConfig`] when the id is not mapped.
    pub fn get_mapping(&self, config_id: &str) -> Result<Mapping> {
        self.snapshot()
            .get(config_id)
            .cloned()
            .ok_or_else(|| Error::UnknownConfig(config_id.to_string()))
    }

    /// Returns the known configuration ids, sorted.
    pub fn config_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.snapshot().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn snapshot(&self) -> Arc<MappingTable> {
        match self.table.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "cfg-1": {
            "log_file": "event_log.xes",
            "config_path": "configs/cfg-1",
            "data_path": "data/cfg-1",
            "authorized_users": {"logUsage": ["Agenas"], "processing": ["agenas", "ministero"]},
            "owner": "hospital",
            "dedup_key": "k1"
        }
    }"#;

    fn registry() -> MappingRegistry {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.json");
        std::fs::write(&path, MANIFEST).unwrap();
        MappingRegistry::from_path(&path).unwrap()
    }

    #[test]
    fn resolves_known_config() {
        let mapping = registry().get_mapping("cfg-1").unwrap();
        assert_eq!(mapping.data_path, PathBuf::from("data/cfg-1"));
        assert_eq!(mapping.owner, "hospital");
        assert!(mapping.is_authorized("logusage", "agenas"));
        assert!(!mapping.is_authorized("output", "agenas"));
    }

    #[test]
    fn unknown_config_is_hard_error() {
        assert!(matches!(
            registry().get_mapping("cfg-2"),
            Err(Error::UnknownConfig(id)) if id == "cfg-2"
        ));
    }

    #[test]
    fn failed_reload_keeps_previous_table() {
        let reg = registry();
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "[1, 2").unwrap();
        assert!(reg.load_mappings(&bad).is_err());
        assert_eq!(reg.config_ids(), vec!["cfg-1".to_string()]);
    }

    #[test]
    fn reload_replaces_whole_table() {
        let reg = registry();
        reg.replace(HashMap::new());
        assert!(reg.get_mapping("cfg-1").is_err());
        assert!(reg.config_ids().is_empty());
    }
}
