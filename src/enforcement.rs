//! Rule evaluation.
//!
//! Pure functions of (policy, request context, clock). Checks run in the order
//! authorization, location, then expiry or technique; the first failing check
//! is the one reported, and callers must surface it unchanged.

use chrono::{DateTime, Utc};

use crate::error::{RuleScope, Violation, ViolationKind};
use crate::grant::AccessGrant;
use crate::policy::{eq_fold, Policy};

/// Returns true if `principal` appears in `authorized`, ignoring case.
pub fn is_principal_authorized(principal: &str, authorized: &[String]) -> bool {
    authorized.iter().any(|p| eq_fold(p, principal))
}

/// Returns true if `location` appears in `allowed`, ignoring case.
pub fn is_location_allowed(location: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|l| eq_fold(l, location))
}

/// Returns true if `now` is strictly before `expiration`.
///
/// A rule group without an expiration is treated as expired.
pub fn is_before_expiration(now: DateTime<Utc>, expiration: Option<DateTime<Utc>>) -> bool {
    expiration.map_or(false, |exp| now < exp)
}

fn check_principal(scope: RuleScope, principal: &str, authorized: &[String]) -> Result<(), Violation> {
    if is_principal_authorized(principal, authorized) {
        Ok(())
    } else {
        Err(Violation::new(
            ViolationKind::NotAuthorized { scope },
            format!("principal '{}' is not allowed", principal),
        ))
    }
}

fn check_location(scope: RuleScope, location: &str, allowed: &[String]) -> Result<(), Violation> {
    if is_location_allowed(location, allowed) {
        Ok(())
    } else {
        Err(Violation::new(
            ViolationKind::LocationDenied { scope },
            format!("location '{}' is not allowed", location),
        ))
    }
}

fn check_expiration(
    scope: RuleScope,
    now: DateTime<Utc>,
    expiration: Option<DateTime<Utc>>,
) -> Result<(), Violation> {
    if is_before_expiration(now, expiration) {
        return Ok(());
    }
    let message = match expiration {
        Some(exp) => format!("rules expired at {}", exp.to_rfc3339()),
        None => "rules carry no expiration".to_string(),
    };
    Err(Violation::new(ViolationKind::Expired { scope }, message))
}

/// Validates a log read against `logUsageRules` at the current time.
pub fn validate_log_access(
    principal: &str,
    location: &str,
    policy: &Policy,
) -> Result<AccessGrant, Violation> {
    validate_log_access_at(principal, location, policy, Utc::now())
}

/// Validates a log read against `logUsageRules` at `now`.
pub fn validate_log_access_at(
    principal: &str,
    location: &str,
    policy: &Policy,
    now: DateTime<Utc>,
) -> Result<AccessGrant, Violation> {
    let rules = &policy.log_usage_rules;
    check_principal(RuleScope::Log, principal, &rules.access_control_rules)?;
    check_location(RuleScope::Log, location, &rules.allowed_locations)?;
    check_expiration(RuleScope::Log, now, rules.log_expiration)?;
    Ok(AccessGrant::new(RuleScope::Log, principal))
}

/// Validates an artifact read against `outputRules` at the current time.
pub fn validate_output_access(
    principal: &str,
    location: &str,
    policy: &Policy,
) -> Result<AccessGrant, Violation> {
    validate_output_access_at(principal, location, policy, Utc::now())
}

/// Validates an artifact read against `outputRules` at `now`.
pub fn validate_output_access_at(
    principal: &str,
    location: &str,
    policy: &Policy,
    now: DateTime<Utc>,
) -> Result<AccessGrant, Violation> {
    let rules = &policy.output_rules;
    check_principal(RuleScope::Output, principal, &rules.access_control_rules)?;
    check_location(RuleScope::Output, location, &rules.allowed_locations)?;
    check_expiration(RuleScope::Output, now, rules.output_expiration)?;
    Ok(AccessGrant::new(RuleScope::Output, principal))
}

/// Validates a processing request against `processingRules`.
///
/// The (technique type, algorithm) pair must be listed in
/// `allowedTechniques`; both fields compare case-insensitively.
pub fn validate_processing(
    principal: &str,
    location: &str,
    algorithm: &str,
    technique_type: &str,
    policy: &Policy,
) -> Result<AccessGrant, Violation> {
    let rules = &policy.processing_rules;
    check_principal(RuleScope::Processing, principal, &rules.access_control_rules)?;
    check_location(RuleScope::Processing, location, &rules.allowed_locations)?;
    if !rules
        .allowed_techniques
        .iter()
        .any(|t| t.matches(technique_type, algorithm))
    {
        return Err(Violation::new(
            ViolationKind::AlgorithmNotAllowed,
            format!(
                "algorithm '{}' with technique '{}' is not allowed",
                algorithm, technique_type
            ),
        ));
    }
    Ok(AccessGrant::new(RuleScope::Processing, principal))
}
