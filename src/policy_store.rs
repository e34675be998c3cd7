//! Loading policies from configuration directories.

use std::fmt;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::policy::{Policy, PolicySet};

/// File name of the policy document inside a configuration directory.
pub const POLICY_FILE: &str = "policy_config.json";

/// Path of the policy document for a configuration directory.
pub fn policy_path(config_dir: &Path) -> PathBuf {
    config_dir.join(POLICY_FILE)
}

/// Loads the policy of a configuration.
///
/// A policy file may hold several policies; the first one is returned.
/// Selecting among several policies is not supported.
///
/// # Errors
///
/// - [`Error::PolicyLoad`] if the file cannot be read or parsed (including
///   timestamps in neither accepted format)
/// - [`Error::EmptyPolicySet`] if the file holds no policies
pub fn load_policy(config_dir: &Path) -> Result<Policy> {
    let path = policy_path(config_dir);
    let raw = std::fs::read(&path)
        .map_err(|e| Error::PolicyLoad(format!("cannot read {}: {}", path.display(), e)))?;
    let set: PolicySet = serde_json::from_slice(&raw)
        .map_err(|e| Error::PolicyLoad(format!("cannot parse {}: {}", path.display(), e)))?;

    let count = set.policies.len();
    let policy = set
        .policies
        .into_iter()
        .next()
        .ok_or_else(|| Error::EmptyPolicySet(path.display().to_string()))?;
    if count > 1 {
        tracing::warn!(
            path = %path.display(),
            count,
            "policy file holds several policies, using the first"
        );
    }
    Ok(policy)
}

/// Content identity of a policy file: lowercase hex SHA-256 of its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PolicyIdentity(String);

impl PolicyIdentity {
    /// Computes the identity of raw policy bytes.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Computes the identity of the policy file of a configuration directory.
    pub fn of_config_dir(config_dir: &Path) -> Result<Self> {
        let path = policy_path(config_dir);
        let bytes = std::fs::read(&path)
            .map_err(|e| Error::PolicyLoad(format!("cannot read {}: {}", path.display(), e)))?;
        Ok(Self::of_bytes(&bytes))
    }

    /// Wraps an identity supplied by configuration.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into().to_ascii_lowercase())
    }

    /// Returns the hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PolicyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Checks that the running policy is the one the engine was bound to.
///
/// # Errors
///
/// Returns [`Error::PolicyMismatch`] when the identities differ.
pub fn verify_bound_policy_identity(
    expected: &PolicyIdentity,
    actual: &PolicyIdentity,
) -> Result<()> {
    if expected != actual {
        return Err(Error::PolicyMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_POLICY: &str = r#"{"policies": [
        {"log_file": "first.xes", "last_updated": "2025-01-01T00:00:00Z"},
        {"log_file": "second.xes", "last_updated": "2025-01-02T00:00:00Z"}
    ]}"#;

    #[test]
    fn first_policy_wins() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(policy_path(dir.path()), ONE_POLICY).unwrap();
        let policy = load_policy(dir.path()).unwrap();
        assert_eq!(policy.log_file, "first.xes");
    }

    #[test]
    fn empty_policy_set_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(policy_path(dir.path()), r#"{"policies": []}"#).unwrap();
        assert!(matches!(
            load_policy(dir.path()),
            Err(Error::EmptyPolicySet(_))
        ));
    }

    #[test]
    fn missing_and_malformed_files_fail() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(load_policy(dir.path()), Err(Error::PolicyLoad(_))));
        std::fs::write(policy_path(dir.path()), "{").unwrap();
        assert!(matches!(load_policy(dir.path()), Err(Error::PolicyLoad(_))));
    }

    #[test]
    fn bound_identity_gate() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(policy_path(dir.path()), ONE_POLICY).unwrap();
        let actual = PolicyIdentity::of_config_dir(dir.path()).unwrap();
        assert_eq!(actual, PolicyIdentity::of_bytes(ONE_POLICY.as_bytes()));
        assert_eq!(actual.as_str().len(), 64);

        let expected = PolicyIdentity::from_hex(actual.as_str().to_ascii_uppercase());
        assert!(verify_bound_policy_identity(&expected, &actual).is_ok());

        let other = PolicyIdentity::of_bytes(b"tampered");
        assert!(matches!(
            verify_bound_policy_identity(&other, &actual),
            Err(Error::PolicyMismatch { .. })
        ));
    }
}
