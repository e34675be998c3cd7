use std::fmt;
use std::path::Path;

use crate::error::Error;
use crate::tainted::Tainted;

/// A validated single path component.
///
/// Configuration ids, algorithm names and output file names are joined into
/// filesystem paths. A `PathSegment` is guaranteed to be non-empty, free of
/// separators and control characters, and not `.` or `..`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathSegment(String);

impl PathSegment {
    /// Returns the segment as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the segment, returning the owned string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl AsRef<str> for PathSegment {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl AsRef<Path> for PathSegment {
    fn as_ref(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trait for promoting tainted values into validated ones.
pub trait Sanitizer<T> {
    /// The validated output type.
    type Output;

    /// Validates `input`, returning the verified form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] naming the field when validation fails.
    fn sanitize(&self, field: &str, input: Tainted<T>) -> Result<Self::Output, Error>;
}

/// Sanitizer that accepts only safe single path components.
///
/// # Examples
///
/// ```
/// use ucon_core::{PathSegmentSanitizer, Sanitizer, Tainted};
///
/// let sanitizer = PathSegmentSanitizer::default();
/// assert!(sanitizer.sanitize("config_id", Tainted::new("hospital-1".to_string())).is_ok());
/// assert!(sanitizer.sanitize("config_id", Tainted::new("../x".to_string())).is_err());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct PathSegmentSanitizer {
    max_len: usize,
}

impl PathSegmentSanitizer {
    /// Creates a sanitizer with the given maximum length in bytes.
    pub fn new(max_len: usize) -> Self {
        Self { max_len }
    }
}

impl Default for PathSegmentSanitizer {
    fn default() -> Self {
        Self::new(255)
    }
}

impl Sanitizer<String> for PathSegmentSanitizer {
    type Output = PathSegment;

    fn sanitize(&self, field: &str, input: Tainted<String>) -> Result<PathSegment, Error> {
        let value = input.into_inner();
        let reject = |reason: &str| Error::Encoding(format!("{}: {}", field, reason));

        if value.trim().is_empty() {
            return Err(reject("missing or empty"));
        }
        if value.len() > self.max_len {
            return Err(reject("too long"));
        }
        if value == "." || value == ".." {
            return Err(reject("relative path component"));
        }
        if value.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
            return Err(reject("contains path separators or control characters"));
        }
        Ok(PathSegment(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitize(raw: &str) -> Result<PathSegment, Error> {
        PathSegmentSanitizer::default().sanitize("field", Tainted::new(raw.to_string()))
    }

    #[test]
    fn accepts_plain_names() {
        assert_eq!(sanitize("model_1700000000.json").unwrap().as_str(), "model_1700000000.json");
        assert_eq!(sanitize("cfg-01").unwrap().to_string(), "cfg-01");
    }

    #[test]
    fn rejects_traversal_and_separators() {
        for bad in ["", "  ", ".", "..", "a/b", "..\\x", "a\nb"] {
            assert!(
                matches!(sanitize(bad), Err(Error::Encoding(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn enforces_max_len() {
        let sanitizer = PathSegmentSanitizer::new(4);
        assert!(sanitizer
            .sanitize("f", Tainted::new("abcde".to_string()))
            .is_err());
    }
}
