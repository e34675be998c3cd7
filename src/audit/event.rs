//! Audit entry schema.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::request::RequestMeta;

/// Outcome of an audited decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditOutcome {
    /// Operation succeeded
    Success,
    /// Operation was denied by policy or quota
    Denied,
    /// Operation failed due to error
    Error,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditOutcome::Success => write!(f, "success"),
            AuditOutcome::Denied => write!(f, "denied"),
            AuditOutcome::Error => write!(f, "error"),
        }
    }
}

/// What an audit line records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditBody {
    /// Internal event such as a counter increment
    Message(String),
    /// Outcome of a boundary request
    Request {
        /// Request method
        method: String,
        /// Request path
        path: String,
        /// Remote origin
        origin: String,
        /// Decision class
        outcome: AuditOutcome,
        /// Human-readable result, naming the failing rule on denial
        result: String,
    },
}

/// One line of an audit trail.
///
/// # Example
///
/// ```
/// use ucon_core::audit::{AuditEntry, AuditOutcome};
/// use ucon_core::RequestMeta;
///
/// let meta = RequestMeta::new("req-1", "POST", "/log", "10.0.0.7");
/// let entry = AuditEntry::request(&meta, AuditOutcome::Denied, "quota exhausted");
/// assert!(entry.to_string().ends_with("POST /log - IP: 10.0.0.7 - Outcome: denied: quota exhausted"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    timestamp: DateTime<Utc>,
    body: AuditBody,
}

impl AuditEntry {
    /// Creates a message entry stamped with the current time.
    pub fn message(message: impl Into<String>) -> Self {
        Self::at(Utc::now(), AuditBody::Message(message.into()))
    }

    /// Creates a request-outcome entry stamped with the current time.
    pub fn request(meta: &RequestMeta, outcome: AuditOutcome, result: impl Into<String>) -> Self {
        Self::at(
            Utc::now(),
            AuditBody::Request {
                method: meta.method.clone(),
                path: meta.path.clone(),
                origin: meta.origin.clone(),
                outcome,
                result: result.into(),
            },
        )
    }

    /// Creates an entry with an explicit timestamp.
    pub fn at(timestamp: DateTime<Utc>, body: AuditBody) -> Self {
        Self { timestamp, body }
    }

    /// Returns the entry timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the entry body.
    pub fn body(&self) -> &AuditBody {
        &self.body
    }

    /// Renders the entry as one newline-terminated line.
    ///
    /// Embedded line breaks are flattened so one entry is always one line.
    pub fn to_line(&self) -> String {
        let mut line = self.to_string().replace(['\r', '\n'], " ");
        line.push('\n');
        line
    }

    /// Emits the entry through `tracing`.
    pub(crate) fn emit(&self, config_id: &str) {
        match &self.body {
            AuditBody::Message(message) => tracing::info!(
                target: "ucon_audit",
                config_id = %config_id,
                entry = %message,
                "audit entry"
            ),
            AuditBody::Request {
                method,
                path,
                origin,
                outcome,
                result,
            } => tracing::info!(
                target: "ucon_audit",
                config_id = %config_id,
                method = %method,
                path = %path,
                origin = %origin,
                outcome = %outcome,
                result = %result,
                "audit entry"
            ),
        }
    }
}

impl fmt::Display for AuditEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.timestamp.format("%Y-%m-%d %H:%M:%S"))?;
        match &self.body {
            AuditBody::Message(message) => write!(f, "{}", message),
            AuditBody::Request {
                method,
                path,
                origin,
                outcome,
                result,
            } => write!(
                f,
                "{} {} - IP: {} - Outcome: {}: {}",
                method, path, origin, outcome, result
            ),
        }
    }
}
