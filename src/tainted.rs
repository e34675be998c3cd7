use std::fmt;

use serde::{Deserialize, Deserializer};

/// A request field that has not been validated yet.
///
/// Payload fields that end up in filesystem paths (configuration ids, output
/// file names) arrive as `Tainted<String>` and can only be unwrapped by a
/// sanitizer inside this crate.
///
/// # Examples
///
/// ```
/// use ucon_core::Tainted;
///
/// let config_id = Tainted::new("../../etc".to_string());
/// assert!(format!("{:?}", config_id).starts_with("Tainted"));
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Tainted<T> {
    // Must stay private: the only way out is through a sanitizer.
    inner: T,
}

impl<T> Tainted<T> {
    /// Wraps an untrusted value.
    pub fn new(value: T) -> Self {
        Self { inner: value }
    }

    /// Borrows the raw value for audit and diagnostics only.
    ///
    /// `pub(crate)`: callers outside the crate must sanitize.
    pub(crate) fn peek(&self) -> &T {
        &self.inner
    }

    /// Extracts the inner value for sanitization.
    pub(crate) fn into_inner(self) -> T {
        self.inner
    }
}

impl<T: fmt::Debug> fmt::Debug for Tainted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tainted")
            .field("inner", &self.inner)
            .finish()
    }
}

impl<T: Default> Default for Tainted<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Tainted<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Tainted::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tainted_round_trips_inside_crate() {
        let t = Tainted::new("cfg-1".to_string());
        assert_eq!(t.peek(), "cfg-1");
        assert_eq!(t.into_inner(), "cfg-1");
    }

    #[test]
    fn tainted_debug_is_labelled() {
        let t = Tainted::new(7);
        assert_eq!(format!("{:?}", t), "Tainted { inner: 7 }");
    }
}
