use crate::error::RuleScope;

/// Proof that a rule group admitted a request.
///
/// Only the enforcement functions can construct a grant; the engine requires
/// one before performing any side effect for the matching rule group.
///
/// ```compile_fail
/// # use ucon_core::{AccessGrant, RuleScope};
/// // Grants cannot be forged outside the crate:
/// let grant = AccessGrant { scope: RuleScope::Log, principal: "x".into(), _private: () };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessGrant {
    scope: RuleScope,
    principal: String,
    // Private field prevents construction outside the crate
    _private: (),
}

impl AccessGrant {
    pub(crate) fn new(scope: RuleScope, principal: &str) -> Self {
        Self {
            scope,
            principal: principal.to_string(),
            _private: (),
        }
    }

    /// Returns the rule group that admitted the request.
    pub fn scope(&self) -> RuleScope {
        self.scope
    }

    /// Returns the admitted principal as given in the request.
    pub fn principal(&self) -> &str {
        &self.principal
    }

    /// Returns `Ok(self)` if the grant was issued for `scope`.
    pub(crate) fn require(&self, scope: RuleScope) -> Result<&Self, crate::Error> {
        if self.scope == scope {
            Ok(self)
        } else {
            Err(crate::Error::Config(format!(
                "grant for {} used for {}",
                self.scope, scope
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_records_scope_and_principal() {
        let grant = AccessGrant::new(RuleScope::Output, "agenas");
        assert_eq!(grant.scope(), RuleScope::Output);
        assert_eq!(grant.principal(), "agenas");
    }

    #[test]
    fn grant_is_bound_to_its_scope() {
        let grant = AccessGrant::new(RuleScope::Log, "agenas");
        assert!(grant.require(RuleScope::Log).is_ok());
        assert!(grant.require(RuleScope::Processing).is_err());
    }
}
