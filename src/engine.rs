//! Request orchestration.
//!
//! Each operation runs the same pipeline: sanitize inputs, resolve the
//! mapping, load the policy and counters, enforce, check the quota, perform
//! the side effect, increment, attest, audit, respond. The first failing step
//! ends the request; its reason is audited and returned unchanged.
//!
//! Quota-gated operations hold a [`crate::QuotaReservation`] from the limit check
//! until the increment, so concurrent requests never exceed the quota.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::Utc;
use serde::Serialize;
use tempfile::TempDir;

use crate::attest::{self, Attester, SimulatedAttester};
use crate::audit::{AuditOutcome, AuditTrail};
use crate::config::EngineConfig;
use crate::counters::CounterStore;
use crate::dispatch::{Algorithm, AlgorithmHandler, AlgorithmRegistry};
use crate::enforcement;
use crate::error::{Error, Result, RuleScope, Status};
use crate::filter;
use crate::logging::RequestLog;
use crate::mapping::{Mapping, MappingRegistry};
use crate::policy::Policy;
use crate::policy_store::{self, PolicyIdentity};
use crate::request::{RequestMeta, UsageRequest};
use crate::sanitizer::{PathSegment, PathSegmentSanitizer, Sanitizer};
use crate::tainted::Tainted;

/// Response to a log read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogAccessResponse {
    /// Filtered log as JSON text
    pub filtered_log: String,
    /// Base64 report over the SHA-256 of `filtered_log`
    pub tee_signed_log: String,
}

/// Response to a processing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessingResponse {
    /// Human-readable outcome
    pub message: String,
    /// Base64 report over the SHA-256 of the artifact bytes
    pub output_signature: String,
    /// File name of the produced artifact
    #[serde(skip)]
    pub artifact: String,
}

/// Response to an artifact read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputAccessResponse {
    /// Artifact content
    pub output_file: String,
    /// Base64 report over the SHA-256 of `output_file`
    pub output_signature: String,
    /// File name of the returned artifact
    #[serde(skip)]
    pub artifact: String,
}

/// Builder for [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    mappings: Option<MappingRegistry>,
    algorithms: AlgorithmRegistry,
    attester: Option<Arc<dyn Attester>>,
}

impl EngineBuilder {
    /// Uses an already-loaded mapping registry instead of reading
    /// `config.mapping_path`.
    pub fn mappings(mut self, mappings: MappingRegistry) -> Self {
        self.mappings = Some(mappings);
        self
    }

    /// Registers a processing handler.
    pub fn algorithm(mut self, algorithm: Algorithm, handler: impl AlgorithmHandler + 'static) -> Self {
        self.algorithms.register(algorithm, handler);
        self
    }

    /// Replaces the whole algorithm table.
    pub fn algorithms(mut self, algorithms: AlgorithmRegistry) -> Self {
        self.algorithms = algorithms;
        self
    }

    /// Sets the attestation backend.
    pub fn attester(mut self, attester: impl Attester + 'static) -> Self {
        self.attester = Some(Arc::new(attester));
        self
    }

    /// Validates the configuration and builds the engine.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] for an invalid configuration, an unreadable mapping
    ///   manifest, or TEE mode without an attester
    /// - [`Error::PolicyMismatch`] if a bound policy does not match the file
    ///   on disk
    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;

        let mappings = match self.mappings {
            Some(mappings) => mappings,
            None => MappingRegistry::from_path(&self.config.mapping_path)?,
        };

        let attester: Arc<dyn Attester> = match (self.attester, self.config.tee) {
            (Some(attester), _) => attester,
            (None, false) => Arc::new(SimulatedAttester),
            (None, true) => {
                return Err(Error::Config("TEE mode requires an attester".into()));
            }
        };

        if let Some(bound) = &self.config.bound_policy {
            let mapping = mappings.get_mapping(&bound.config_id)?;
            let actual = PolicyIdentity::of_config_dir(&mapping.config_path)?;
            policy_store::verify_bound_policy_identity(
                &PolicyIdentity::from_hex(bound.identity.as_str()),
                &actual,
            )?;
            tracing::info!(config_id = %bound.config_id, identity = %actual, "bound policy verified");
        }

        let audit = Arc::new(AuditTrail::new(self.config.configs_root.clone()));
        let counters = CounterStore::new(self.config.configs_root.clone(), Arc::clone(&audit));

        tracing::info!(
            tee = self.config.tee,
            configs = mappings.config_ids().len(),
            algorithms = ?self.algorithms.registered(),
            "engine ready"
        );

        Ok(Engine {
            config: self.config,
            mappings,
            counters,
            audit,
            algorithms: self.algorithms,
            attester,
            sanitizer: PathSegmentSanitizer::default(),
        })
    }
}

/// The usage-control engine.
///
/// Built once and shared by reference across request threads.
pub struct Engine {
    config: EngineConfig,
    mappings: MappingRegistry,
    counters: CounterStore,
    audit: Arc<AuditTrail>,
    algorithms: AlgorithmRegistry,
    attester: Arc<dyn Attester>,
    sanitizer: PathSegmentSanitizer,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("algorithms", &self.algorithms)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Starts building an engine.
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            mappings: None,
            algorithms: AlgorithmRegistry::new(),
            attester: None,
        }
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Mapping registry.
    pub fn mappings(&self) -> &MappingRegistry {
        &self.mappings
    }

    /// Counter store.
    pub fn counters(&self) -> &CounterStore {
        &self.counters
    }

    /// Audit trail.
    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// Reloads the mapping manifest from `config.mapping_path`.
    pub fn reload_mappings(&self) -> Result<()> {
        self.mappings.load_mappings(&self.config.mapping_path)
    }

    /// Decodes a JSON request body.
    ///
    /// A body that does not decode is audited as an error against the
    /// `config_id` it names, when that id is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if the body is not a valid payload.
    pub fn decode_request(&self, meta: &RequestMeta, body: &[u8]) -> Result<UsageRequest> {
        let outcome = UsageRequest::decode(body);
        if outcome.is_err() {
            let raw_config_id = UsageRequest::salvage_config_id(body).unwrap_or_default();
            self.audit_failure(meta, &raw_config_id, &outcome);
        }
        outcome
    }

    /// Returns the filtered log of a configuration with an attestation report.
    pub fn log_access(&self, meta: &RequestMeta, request: UsageRequest) -> Result<LogAccessResponse> {
        let raw_config_id = request.raw_config_id().to_string();
        let outcome = self.run_log_access(meta, request);
        self.audit_failure(meta, &raw_config_id, &outcome);
        outcome
    }

    /// Runs a mining algorithm over the filtered log and attests its artifact.
    pub fn processing(&self, meta: &RequestMeta, request: UsageRequest) -> Result<ProcessingResponse> {
        let raw_config_id = request.raw_config_id().to_string();
        let outcome = self.run_processing(meta, request);
        self.audit_failure(meta, &raw_config_id, &outcome);
        outcome
    }

    /// Returns a stored artifact with an attestation report.
    ///
    /// Without an explicit file name the most recently modified artifact of
    /// the requested algorithm is returned.
    pub fn output_access(&self, meta: &RequestMeta, request: UsageRequest) -> Result<OutputAccessResponse> {
        let raw_config_id = request.raw_config_id().to_string();
        let outcome = self.run_output_access(meta, request);
        self.audit_failure(meta, &raw_config_id, &outcome);
        outcome
    }

    /// Returns the policy governing a configuration.
    pub fn policy_info(&self, meta: &RequestMeta, config_id: Tainted<String>) -> Result<Policy> {
        let raw_config_id = config_id.peek().clone();
        let outcome = self.run_policy_info(meta, config_id);
        self.audit_failure(meta, &raw_config_id, &outcome);
        outcome
    }

    /// Returns the raw audit trail of a configuration.
    pub fn monitoring(&self, config_id: Tainted<String>) -> Result<String> {
        let config_id = self.sanitizer.sanitize("config_id", config_id)?;
        self.audit.read_trail(config_id.as_str())
    }

    fn run_log_access(&self, meta: &RequestMeta, request: UsageRequest) -> Result<LogAccessResponse> {
        let config_id = self.sanitizer.sanitize("config_id", request.config_id)?;
        let log = RequestLog::new(&meta.request_id, config_id.as_str());

        let (mapping, policy) = self.resolve(&config_id)?;
        self.counters.load_counters(config_id.as_str())?;

        let grant = enforcement::validate_log_access(&request.principal, &request.location, &policy)?;
        let max = policy.log_usage_rules.max_access_count;
        let slot = self
            .counters
            .reserve_log_access(config_id.as_str(), max)?
            .ok_or(Error::QuotaExceeded {
                scope: RuleScope::Log,
                max,
            })?;

        grant.require(RuleScope::Log)?;
        let filtered = filter::load_and_filter(&log_path(&mapping, &policy), &policy.log_usage_rules)?;
        let filtered_log = serde_json::to_string(&filtered)
            .map_err(|e| Error::Encoding(format!("cannot serialize filtered log: {}", e)))?;

        let count = slot.commit()?;
        let tee_signed_log = attest::sign(self.attester.as_ref(), filtered_log.as_bytes())?;
        self.audit_success(
            meta,
            &config_id,
            format!("log access granted, {} traces returned", filtered.traces.len()),
        );
        log.info(format_args!(
            "log access granted to {} ({} of {})",
            grant.principal(),
            count,
            max
        ));

        Ok(LogAccessResponse {
            filtered_log,
            tee_signed_log,
        })
    }

    fn run_processing(&self, meta: &RequestMeta, request: UsageRequest) -> Result<ProcessingResponse> {
        let config_id = self.sanitizer.sanitize("config_id", request.config_id)?;
        let log = RequestLog::new(&meta.request_id, config_id.as_str());
        let algorithm_name = self
            .sanitizer
            .sanitize("algorithm", request.algorithm.unwrap_or_default())?;
        let technique_type = request.technique_type.unwrap_or_default();

        let (mapping, policy) = self.resolve(&config_id)?;
        let grant = enforcement::validate_processing(
            &request.principal,
            &request.location,
            algorithm_name.as_str(),
            &technique_type,
            &policy,
        )?;
        let algorithm = self.algorithms.resolve(algorithm_name.as_str())?;

        grant.require(RuleScope::Processing)?;
        let input_path = log_path(&mapping, &policy);
        let filtered = filter::load_and_filter(&input_path, &policy.log_usage_rules)?;
        let event_matrix = filtered.event_matrix(&self.config.activity_attribute);

        let output_dir = self.config.output_dir(config_id.as_str(), algorithm.as_str());
        std::fs::create_dir_all(&output_dir).map_err(|e| {
            Error::Execution(format!("cannot create {}: {}", output_dir.display(), e))
        })?;
        // The handler writes into a private staging directory; only complete
        // artifacts are published into `output_dir`.
        let staging = tempfile::Builder::new()
            .prefix(".staging-")
            .tempdir_in(&output_dir)
            .map_err(|e| Error::Execution(format!("cannot stage in {}: {}", output_dir.display(), e)))?;
        let output_path = staging
            .path()
            .join(format!("model_{}.json", Utc::now().timestamp()));
        log.debug(format_args!(
            "running {} over {} traces",
            algorithm,
            event_matrix.len()
        ));

        let artifact = self.algorithms.run_algorithm(
            algorithm.as_str(),
            &input_path,
            &output_path,
            &event_matrix,
            config_id.as_str(),
        )?;
        let artifact = self
            .sanitizer
            .sanitize("artifact", Tainted::new(artifact))
            .map_err(|e| Error::Execution(e.to_string()))?;
        let bytes = read_artifact(&staging.path().join(artifact.as_str()))?;
        let artifact = publish_artifact(&staging, &output_dir, artifact.as_str())?;

        let output_signature = attest::sign(self.attester.as_ref(), &bytes)?;
        let message = format!("processing completed with algorithm {}", algorithm);
        self.audit_success(meta, &config_id, format!("{}: {}", message, artifact));
        log.info(format_args!("{} for {}", message, grant.principal()));

        Ok(ProcessingResponse {
            message,
            output_signature,
            artifact,
        })
    }

    fn run_output_access(&self, meta: &RequestMeta, request: UsageRequest) -> Result<OutputAccessResponse> {
        let config_id = self.sanitizer.sanitize("config_id", request.config_id)?;
        let log = RequestLog::new(&meta.request_id, config_id.as_str());
        let algorithm: Algorithm = self
            .sanitizer
            .sanitize("algorithm", request.algorithm.unwrap_or_default())?
            .as_str()
            .parse()?;
        let requested = request
            .output_file
            .map(|name| self.sanitizer.sanitize("outputFile", name))
            .transpose()?;

        let (_mapping, policy) = self.resolve(&config_id)?;
        self.counters.load_counters(config_id.as_str())?;

        let grant = enforcement::validate_output_access(&request.principal, &request.location, &policy)?;
        let max = policy.output_rules.max_access_count;
        let slot = self
            .counters
            .reserve_output_access(config_id.as_str(), max)?
            .ok_or(Error::QuotaExceeded {
                scope: RuleScope::Output,
                max,
            })?;

        grant.require(RuleScope::Output)?;
        let output_dir = self.config.output_dir(config_id.as_str(), algorithm.as_str());
        let path = match requested {
            Some(name) => output_dir.join(name.as_str()),
            None => latest_artifact(&output_dir)?,
        };
        if !path.is_file() {
            return Err(Error::ArtifactNotFound(file_name(&path)));
        }
        let bytes = read_artifact(&path)?;
        let output_file = String::from_utf8(bytes)
            .map_err(|_| Error::Encoding(format!("artifact {} is not UTF-8", file_name(&path))))?;

        let count = slot.commit()?;
        let output_signature = attest::sign(self.attester.as_ref(), output_file.as_bytes())?;
        let artifact = file_name(&path);
        self.audit_success(meta, &config_id, format!("output returned: {}", artifact));
        log.info(format_args!(
            "output {} returned to {} ({} of {})",
            artifact,
            grant.principal(),
            count,
            max
        ));

        Ok(OutputAccessResponse {
            output_file,
            output_signature,
            artifact,
        })
    }

    fn run_policy_info(&self, meta: &RequestMeta, config_id: Tainted<String>) -> Result<Policy> {
        let config_id = self.sanitizer.sanitize("config_id", config_id)?;
        let (_mapping, policy) = self.resolve(&config_id)?;
        self.audit_success(meta, &config_id, "policy returned");
        Ok(policy)
    }

    fn resolve(&self, config_id: &PathSegment) -> Result<(Mapping, Policy)> {
        let mapping = self.mappings.get_mapping(config_id.as_str())?;
        let policy = policy_store::load_policy(&mapping.config_path)?;
        Ok((mapping, policy))
    }

    fn audit_success(&self, meta: &RequestMeta, config_id: &PathSegment, result: impl Into<String>) {
        if let Err(e) = self
            .audit
            .write_request(config_id.as_str(), meta, AuditOutcome::Success, result)
        {
            tracing::warn!(request_id = %meta.request_id, config_id = %config_id, error = %e, "success not audited");
        }
    }

    fn audit_failure<T>(&self, meta: &RequestMeta, raw_config_id: &str, outcome: &Result<T>) {
        let err = match outcome {
            Ok(_) => return,
            Err(err) => err,
        };
        tracing::debug!(request_id = %meta.request_id, error = %err, "request failed");

        // Unsafe ids never reach the filesystem, not even for auditing.
        let config_id = match self
            .sanitizer
            .sanitize("config_id", Tainted::new(raw_config_id.to_string()))
        {
            Ok(id) => id,
            Err(_) => {
                tracing::warn!(request_id = %meta.request_id, error = %err, "failure not audited: unusable config id");
                return;
            }
        };
        let audit_outcome = match err.status() {
            Status::Forbidden => AuditOutcome::Denied,
            _ => AuditOutcome::Error,
        };
        if let Err(e) = self
            .audit
            .write_request(config_id.as_str(), meta, audit_outcome, err.to_string())
        {
            tracing::warn!(
                request_id = %meta.request_id,
                config_id = %config_id,
                error = %e,
                "failure not audited"
            );
        }
    }
}

fn log_path(mapping: &Mapping, policy: &Policy) -> PathBuf {
    let name = if policy.log_file.is_empty() {
        &mapping.log_file
    } else {
        &policy.log_file
    };
    mapping.data_path.join(name)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn read_artifact(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::ArtifactNotFound(file_name(path)),
        _ => Error::Execution(format!("cannot read {}: {}", path.display(), e)),
    })
}

const MAX_PUBLISH_ATTEMPTS: u32 = 1000;

/// Moves `name` out of `staging` into `output_dir` without replacing an
/// existing artifact, returning the published file name.
///
/// A taken name gets a numeric suffix before its extension.
fn publish_artifact(staging: &TempDir, output_dir: &Path, name: &str) -> Result<String> {
    let source = staging.path().join(name);
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };
    for attempt in 0..MAX_PUBLISH_ATTEMPTS {
        let candidate = match (attempt, ext) {
            (0, _) => name.to_string(),
            (n, Some(ext)) => format!("{}_{}.{}", stem, n, ext),
            (n, None) => format!("{}_{}", stem, n),
        };
        // A hard link never replaces an existing entry.
        match std::fs::hard_link(&source, output_dir.join(&candidate)) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(Error::Execution(format!(
                    "cannot publish {} into {}: {}",
                    name,
                    output_dir.display(),
                    e
                )))
            }
        }
    }
    Err(Error::Execution(format!(
        "no free artifact name for {} in {}",
        name,
        output_dir.display()
    )))
}

/// Most recently modified regular file in `dir`.
fn latest_artifact(dir: &Path) -> Result<PathBuf> {
    let entries = std::fs::read_dir(dir)
        .map_err(|_| Error::ArtifactNotFound(format!("no outputs in {}", dir.display())))?;

    let mut latest: Option<(SystemTime, PathBuf)> = None;
    for entry in entries.flatten() {
        let meta = match entry.metadata() {
            Ok(meta) if meta.is_file() => meta,
            _ => continue,
        };
        let modified = match meta.modified() {
            Ok(modified) => modified,
            Err(_) => continue,
        };
        if latest.as_ref().map_or(true, |(best, _)| modified > *best) {
            latest = Some((modified, entry.path()));
        }
    }
    latest
        .map(|(_, path)| path)
        .ok_or_else(|| Error::ArtifactNotFound(format!("no outputs in {}", dir.display())))
}
