//! File-backed audit trail.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{AuditEntry, AuditOutcome};
use crate::error::{Error, Result};
use crate::request::RequestMeta;

/// File name of the audit trail inside a configuration directory.
pub const AUDIT_FILE: &str = "audit.txt";

/// Append-only audit trail, one `audit.txt` per configuration.
///
/// Each append is one `write_all` of a complete line on a file opened in
/// append mode, serialized by an internal lock, so concurrent appenders never
/// interleave within a line. The configuration directory must already exist.
///
/// # Example
///
/// ```
/// use ucon_core::audit::AuditTrail;
///
/// let root = tempfile::tempdir().unwrap();
/// std::fs::create_dir(root.path().join("cfg-1")).unwrap();
///
/// let trail = AuditTrail::new(root.path());
/// trail.write_audit_log("cfg-1", "policy loaded").unwrap();
/// assert!(trail.read_trail("cfg-1").unwrap().contains("policy loaded"));
/// ```
#[derive(Debug)]
pub struct AuditTrail {
    configs_root: PathBuf,
    append_lock: Mutex<()>,
}

impl AuditTrail {
    /// Creates a trail rooted at the configurations directory.
    pub fn new(configs_root: impl Into<PathBuf>) -> Self {
        Self {
            configs_root: configs_root.into(),
            append_lock: Mutex::new(()),
        }
    }

    /// Path of the audit file of a configuration.
    pub fn path(&self, config_id: &str) -> PathBuf {
        self.configs_root.join(config_id).join(AUDIT_FILE)
    }

    /// Appends a free-form message.
    pub fn write_audit_log(&self, config_id: &str, message: impl Into<String>) -> Result<()> {
        self.append(config_id, &AuditEntry::message(message))
    }

    /// Appends the outcome of a boundary request.
    pub fn write_request(
        &self,
        config_id: &str,
        meta: &RequestMeta,
        outcome: AuditOutcome,
        result: impl Into<String>,
    ) -> Result<()> {
        self.append(config_id, &AuditEntry::request(meta, outcome, result))
    }

    /// Appends an entry.
    pub fn append(&self, config_id: &str, entry: &AuditEntry) -> Result<()> {
        let path = self.path(config_id);
        let line = entry.to_line();
        {
            let _guard = self
                .append_lock
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            append_line(&path, line.as_bytes())?;
        }
        entry.emit(config_id);
        Ok(())
    }

    /// Returns the raw text of a configuration's trail.
    pub fn read_trail(&self, config_id: &str) -> Result<String> {
        let path = self.path(config_id);
        std::fs::read_to_string(&path)
            .map_err(|e| Error::Audit(format!("cannot read {}: {}", path.display(), e)))
    }
}

fn append_line(path: &Path, line: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::Audit(format!("cannot open {}: {}", path.display(), e)))?;
    file.write_all(line)
        .map_err(|e| Error::Audit(format!("cannot write {}: {}", path.display(), e)))
}
