//! Append-only audit trail.
//!
//! This module provides:
//! - `AuditEntry`: one timestamped line, either a free-form message or a
//!   request outcome
//! - `AuditTrail`: per-configuration `audit.txt` files under the configs root
//!
//! Every appended entry is also emitted as a structured `tracing` event with
//! target `ucon_audit`.

mod event;
mod trail;

pub use event::{AuditBody, AuditEntry, AuditOutcome};
pub use trail::{AuditTrail, AUDIT_FILE};
