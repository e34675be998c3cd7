//! Policy-driven usage control over event logs, process mining and its
//! artifacts.
//!
//! Every configuration binds a data owner's event log to a declarative
//! policy with three rule groups: log usage, processing and output. The
//! [`Engine`] gates each request against the matching group, enforces access
//! quotas with persistent counters, writes an append-only audit trail, and
//! attests the exact bytes it returns.
//!
//! # Core Types
//!
//! - [`Engine`]: request orchestrator, built once via [`Engine::builder`]
//! - [`Policy`]: rule groups of one configuration
//! - [`AccessGrant`]: proof that a rule group admitted a request
//! - [`Tainted<T>`]: request fields that must be sanitized before use in paths
//! - [`CounterStore`] and [`AuditTrail`]: the only persisted, mutable state
//!
//! # Examples
//!
//! ```
//! use ucon_core::{validate_log_access, Policy, RuleScope, ViolationKind};
//!
//! let policy: Policy = serde_json::from_str(r#"{
//!     "last_updated": "2025-01-01T00:00:00Z",
//!     "logUsageRules": {
//!         "logExpiration": "2999-01-01T00:00:00Z",
//!         "allowedLocations": ["it"],
//!         "accessControlRules": ["agenas"]
//!     }
//! }"#).unwrap();
//!
//! assert!(validate_log_access("agenas", "it", &policy).is_ok());
//!
//! let denied = validate_log_access("agenas", "fr", &policy).unwrap_err();
//! assert_eq!(denied.kind, ViolationKind::LocationDenied { scope: RuleScope::Log });
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod attest;
pub mod audit;
mod config;
mod counters;
pub mod dispatch;
mod enforcement;
mod engine;
mod error;
pub mod event_log;
pub mod filter;
mod grant;
mod logging;
mod mapping;
mod policy;
mod policy_store;
mod request;
mod sanitizer;
mod tainted;

pub use attest::{Attester, SimulatedAttester};
pub use audit::{AuditOutcome, AuditTrail};
pub use config::{BoundPolicy, EngineConfig};
pub use counters::{CounterStore, Counters, QuotaReservation, COUNTERS_FILE};
pub use dispatch::{Algorithm, AlgorithmHandler, AlgorithmRegistry, ProcessingJob};
pub use enforcement::{
    is_before_expiration, is_location_allowed, is_principal_authorized, validate_log_access,
    validate_log_access_at, validate_output_access, validate_output_access_at,
    validate_processing,
};
pub use engine::{Engine, EngineBuilder, LogAccessResponse, OutputAccessResponse, ProcessingResponse};
pub use error::{Error, Result, RuleScope, Status, Violation, ViolationKind};
pub use event_log::EventLog;
pub use filter::{filter_log, load_and_filter, FilteredLog};
pub use grant::AccessGrant;
pub use logging::RequestLog;
pub use mapping::{Mapping, MappingRegistry};
pub use policy::{
    parse_timestamp, AllowedTechnique, AttributeExclusionRules, LogUsageRules, OutputRules, Policy,
    PolicySet, ProcessingRules, SemanticLogConstraints, TimeRange,
};
pub use policy_store::{
    load_policy, policy_path, verify_bound_policy_identity, PolicyIdentity, POLICY_FILE,
};
pub use request::{RequestMeta, UsageRequest};
pub use sanitizer::{PathSegment, PathSegmentSanitizer, Sanitizer};
pub use tainted::Tainted;
