//! Engine configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A policy the engine is bound to at startup.
///
/// When present, the engine refuses to start unless the policy file of
/// `config_id` hashes to `identity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundPolicy {
    /// Configuration whose policy is pinned
    pub config_id: String,
    /// Expected lowercase hex SHA-256 of the policy file
    pub identity: String,
}

/// Top-level configuration of an [`Engine`](crate::Engine).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding one subdirectory per configuration (counters, audit).
    #[serde(default = "default_configs_root")]
    pub configs_root: PathBuf,

    /// Directory receiving processing artifacts.
    #[serde(default = "default_outputs_root")]
    pub outputs_root: PathBuf,

    /// Mapping manifest loaded at startup.
    #[serde(default = "default_mapping_path")]
    pub mapping_path: PathBuf,

    /// Whether a trusted execution environment signs responses.
    /// When false, reports are produced by the simulated attester.
    #[serde(default = "default_tee")]
    pub tee: bool,

    /// Attribute used to build the event matrix handed to mining algorithms.
    #[serde(default = "default_activity_attribute")]
    pub activity_attribute: String,

    /// Optional policy identity pin, checked once at startup.
    #[serde(default)]
    pub bound_policy: Option<BoundPolicy>,
}

fn default_configs_root() -> PathBuf {
    PathBuf::from("configs")
}

fn default_outputs_root() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_mapping_path() -> PathBuf {
    PathBuf::from("mapping.json")
}

fn default_tee() -> bool {
    true
}

fn default_activity_attribute() -> String {
    "concept:name".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            configs_root: default_configs_root(),
            outputs_root: default_outputs_root(),
            mapping_path: default_mapping_path(),
            tee: default_tee(),
            activity_attribute: default_activity_attribute(),
            bound_policy: None,
        }
    }
}

impl EngineConfig {
    /// Creates a configuration rooted at `base`, using the default layout
    /// (`configs/`, `outputs/`, `mapping.json`) underneath it.
    pub fn rooted_at(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        Self {
            configs_root: base.join(default_configs_root()),
            outputs_root: base.join(default_outputs_root()),
            mapping_path: base.join(default_mapping_path()),
            ..Self::default()
        }
    }

    /// Loads configuration from a JSON file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no engine config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.activity_attribute.trim().is_empty() {
            return Err(Error::Config("activity_attribute must not be empty".into()));
        }
        if let Some(bound) = &self.bound_policy {
            if bound.identity.len() != 64 || !bound.identity.chars().all(|c| c.is_ascii_hexdigit())
            {
                return Err(Error::Config(format!(
                    "bound policy identity for '{}' is not a SHA-256 hex digest",
                    bound.config_id
                )));
            }
        }
        Ok(())
    }

    /// Directory holding the mutable state (counters, audit) of one configuration.
    pub fn config_dir(&self, config_id: &str) -> PathBuf {
        self.configs_root.join(config_id)
    }

    /// Directory receiving artifacts of one (configuration, algorithm) pair.
    pub fn output_dir(&self, config_id: &str, algorithm: &str) -> PathBuf {
        self.outputs_root.join(config_id).join(algorithm)
    }
}
