use std::fmt;

use thiserror::Error;

/// Errors produced by the usage-control engine.
///
/// Every variant maps onto one boundary [`Status`] class via
/// [`Error::status`], so a transport layer can answer without inspecting
/// messages.
#[derive(Debug, Error)]
pub enum Error {
    /// The configuration identifier is not present in the mapping registry.
    #[error("unknown configuration: {0}")]
    UnknownConfig(String),

    /// The policy document is missing or malformed.
    #[error("policy load error: {0}")]
    PolicyLoad(String),

    /// The policy document parsed but contains no policies.
    #[error("no policies found in {0}")]
    EmptyPolicySet(String),

    /// The policy on disk is not the one this engine was bound to.
    #[error("policy mismatch: expected {expected}, found {actual}")]
    PolicyMismatch {
        /// Identity the engine was bound to
        expected: String,
        /// Identity computed from the policy file
        actual: String,
    },

    /// Reading or writing a counters document failed.
    #[error("counter store error: {0}")]
    CounterIo(String),

    /// A usage rule denied the request.
    #[error(transparent)]
    Violation(#[from] Violation),

    /// The access quota for a rule group is exhausted.
    #[error("access limit reached for {scope} (max {max})")]
    QuotaExceeded {
        /// Rule group whose counter is exhausted
        scope: RuleScope,
        /// Configured maximum
        max: u64,
    },

    /// No output artifact matches the request.
    #[error("no output artifact available: {0}")]
    ArtifactNotFound(String),

    /// The requested algorithm has no registered handler.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// A processing handler failed.
    #[error("algorithm execution failed: {0}")]
    Execution(String),

    /// The attestation backend could not produce a report.
    #[error("attestation failed: {0}")]
    Attestation(String),

    /// A payload could not be decoded, or an input was rejected by sanitization.
    #[error("invalid payload: {0}")]
    Encoding(String),

    /// The raw event log could not be read or parsed.
    #[error("event log error: {0}")]
    LogParse(String),

    /// An audit trail could not be written or read.
    #[error("audit trail error: {0}")]
    Audit(String),

    /// Engine configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Boundary status class of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Malformed request or unknown configuration (400)
    BadRequest,
    /// Policy or quota denial (403)
    Forbidden,
    /// Requested artifact does not exist (404)
    NotFound,
    /// Internal failure (500)
    Internal,
}

impl Status {
    /// Returns the HTTP status code conventionally used for this class.
    pub fn code(self) -> u16 {
        match self {
            Status::BadRequest => 400,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::Internal => 500,
        }
    }
}

impl Error {
    /// Classifies the error for the boundary.
    pub fn status(&self) -> Status {
        match self {
            Error::UnknownConfig(_) | Error::Encoding(_) | Error::UnsupportedAlgorithm(_) => {
                Status::BadRequest
            }
            Error::Violation(_) | Error::QuotaExceeded { .. } => Status::Forbidden,
            Error::ArtifactNotFound(_) => Status::NotFound,
            Error::PolicyLoad(_)
            | Error::EmptyPolicySet(_)
            | Error::PolicyMismatch { .. }
            | Error::CounterIo(_)
            | Error::Execution(_)
            | Error::Attestation(_)
            | Error::LogParse(_)
            | Error::Audit(_)
            | Error::Config(_) => Status::Internal,
        }
    }

    /// Returns the rule violation, if this error is a policy denial.
    pub fn violation(&self) -> Option<&Violation> {
        match self {
            Error::Violation(v) => Some(v),
            _ => None,
        }
    }
}

/// The rule group a decision was taken against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleScope {
    /// `logUsageRules`
    Log,
    /// `processingRules`
    Processing,
    /// `outputRules`
    Output,
}

impl fmt::Display for RuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleScope::Log => write!(f, "log"),
            RuleScope::Processing => write!(f, "processing"),
            RuleScope::Output => write!(f, "output"),
        }
    }
}

/// A policy violation with details about which rule failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// The kind of violation that occurred
    pub kind: ViolationKind,
    /// Human-readable message explaining the violation
    pub message: String,
}

impl Violation {
    /// Creates a new violation.
    pub fn new(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Violation {}

/// The rule that rejected a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    /// Principal is not in the rule group's access-control list
    NotAuthorized {
        /// Rule group that was checked
        scope: RuleScope,
    },
    /// Location is not in the rule group's allowed locations
    LocationDenied {
        /// Rule group that was checked
        scope: RuleScope,
    },
    /// The rule group's expiration has passed
    Expired {
        /// Rule group that was checked
        scope: RuleScope,
    },
    /// The (technique, algorithm) pair is not allowed
    AlgorithmNotAllowed,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::NotAuthorized { scope } => write!(f, "Not authorized for {}", scope),
            ViolationKind::LocationDenied { scope } => write!(f, "Location denied for {}", scope),
            ViolationKind::Expired { scope } => write!(f, "Expired {} rules", scope),
            ViolationKind::AlgorithmNotAllowed => write!(f, "Algorithm not allowed"),
        }
    }
}

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_display_names_rule() {
        let v = Violation::new(
            ViolationKind::LocationDenied {
                scope: RuleScope::Output,
            },
            "location 'fr' not allowed",
        );
        assert_eq!(
            v.to_string(),
            "Location denied for output: location 'fr' not allowed"
        );
    }

    #[test]
    fn status_classes() {
        assert_eq!(Error::UnknownConfig("x".into()).status(), Status::BadRequest);
        assert_eq!(
            Error::QuotaExceeded {
                scope: RuleScope::Log,
                max: 3
            }
            .status(),
            Status::Forbidden
        );
        assert_eq!(Error::ArtifactNotFound("d".into()).status().code(), 404);
        assert_eq!(Error::Attestation("tee".into()).status().code(), 500);
    }

    #[test]
    fn violation_converts_into_error() {
        let err: Error = Violation::new(ViolationKind::AlgorithmNotAllowed, "nope").into();
        assert_eq!(err.status(), Status::Forbidden);
        assert_eq!(
            err.violation().map(|v| v.kind),
            Some(ViolationKind::AlgorithmNotAllowed)
        );
    }
}
