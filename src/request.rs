use serde::Deserialize;

use crate::error::Error;
use crate::tainted::Tainted;

/// Transport metadata about an incoming request.
///
/// Only used for correlation and audit lines; never for decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMeta {
    /// Unique identifier for this request
    pub request_id: String,
    /// Request method (e.g. `POST`)
    pub method: String,
    /// Request path (e.g. `/log`)
    pub path: String,
    /// Remote origin of the request
    pub origin: String,
}

impl RequestMeta {
    /// Creates request metadata.
    pub fn new(
        request_id: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            method: method.into(),
            path: path.into(),
            origin: origin.into(),
        }
    }
}

/// Decoded body of a log, processing or output request.
///
/// Fields that become path components stay [`Tainted`] until the engine
/// sanitizes them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageRequest {
    /// Principal issuing the request
    #[serde(rename = "user_id")]
    pub principal: String,
    /// Configuration the request targets
    pub config_id: Tainted<String>,
    /// Location the request originates from
    pub location: String,
    /// Requested algorithm (processing and output requests)
    #[serde(default)]
    pub algorithm: Option<Tainted<String>>,
    /// Requested technique type (processing requests)
    #[serde(default, rename = "techniqueType")]
    pub technique_type: Option<String>,
    /// Requested artifact name (output requests)
    #[serde(default, rename = "outputFile")]
    pub output_file: Option<Tainted<String>>,
}

impl UsageRequest {
    /// Creates a request for the given principal, configuration and location.
    pub fn new(
        principal: impl Into<String>,
        config_id: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            principal: principal.into(),
            config_id: Tainted::new(config_id.into()),
            location: location.into(),
            ..Self::default()
        }
    }

    /// Sets the algorithm and technique type of a processing request.
    pub fn with_algorithm(
        mut self,
        algorithm: impl Into<String>,
        technique_type: impl Into<String>,
    ) -> Self {
        self.algorithm = Some(Tainted::new(algorithm.into()));
        self.technique_type = Some(technique_type.into());
        self
    }

    /// Sets the artifact name of an output request.
    pub fn with_output_file(mut self, name: impl Into<String>) -> Self {
        self.output_file = Some(Tainted::new(name.into()));
        self
    }

    /// Decodes a JSON request body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if the body is not a valid payload.
    pub fn decode(body: &[u8]) -> Result<Self, Error> {
        serde_json::from_slice(body).map_err(|e| Error::Encoding(e.to_string()))
    }

    /// Reads `config_id` from a body that failed to decode, for audit routing.
    pub(crate) fn salvage_config_id(body: &[u8]) -> Option<String> {
        let value: serde_json::Value = serde_json::from_slice(body).ok()?;
        value.get("config_id")?.as_str().map(str::to_string)
    }

    /// Raw configuration id, for audit routing before sanitization.
    pub(crate) fn raw_config_id(&self) -> &str {
        self.config_id.peek()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_wire_field_names() {
        let body = br#"{
            "user_id": "agenas",
            "config_id": "cfg-1",
            "location": "it",
            "algorithm": "HeuristicMiner",
            "techniqueType": "AutomatedDiscovery"
        }"#;
        let req = UsageRequest::decode(body).unwrap();
        assert_eq!(req.principal, "agenas");
        assert_eq!(req.raw_config_id(), "cfg-1");
        assert_eq!(req.technique_type.as_deref(), Some("AutomatedDiscovery"));
        assert!(req.output_file.is_none());
    }

    #[test]
    fn rejects_malformed_body() {
        assert!(matches!(
            UsageRequest::decode(b"{not json"),
            Err(Error::Encoding(_))
        ));
        assert!(matches!(
            UsageRequest::decode(br#"{"config_id": "x"}"#),
            Err(Error::Encoding(_))
        ));
    }

    #[test]
    fn salvages_config_id_from_invalid_payload() {
        assert_eq!(
            UsageRequest::salvage_config_id(br#"{"config_id": "cfg-1", "location": 7}"#).as_deref(),
            Some("cfg-1")
        );
        assert_eq!(UsageRequest::salvage_config_id(b"{not json"), None);
        assert_eq!(UsageRequest::salvage_config_id(br#"{"config_id": 3}"#), None);
    }
}
