//! Policy document data model.
//!
//! A policy file holds `{"policies": [...]}`; each policy carries three rule
//! groups (log usage, output, processing). Timestamps accept RFC 3339 with an
//! offset or a bare `YYYY-MM-DDTHH:MM:SS`, which is read as UTC.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Parses a policy timestamp in either accepted format.
///
/// Returns `None` when neither format matches.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_timestamp(&raw)
            .ok_or_else(|| de::Error::custom(format!("unrecognized timestamp '{}'", raw)))
    }
}

mod option_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match ts {
            Some(ts) => s.serialize_some(&ts.to_rfc3339()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            None => Ok(None),
            Some(raw) => super::parse_timestamp(&raw)
                .map(Some)
                .ok_or_else(|| de::Error::custom(format!("unrecognized timestamp '{}'", raw))),
        }
    }
}

/// A date window applied to one event attribute.
///
/// An absent bound leaves that side of the window open.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    /// Event attribute holding the timestamp (e.g. `time:timestamp`)
    #[serde(default)]
    pub event_attribute: String,
    /// Inclusive lower bound
    #[serde(default, with = "option_timestamp")]
    pub start_date: Option<DateTime<Utc>>,
    /// Inclusive upper bound
    #[serde(default, with = "option_timestamp")]
    pub end_date: Option<DateTime<Utc>>,
}

impl TimeRange {
    /// Returns true if `ts` lies inside the window.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start_date.map_or(true, |start| ts >= start)
            && self.end_date.map_or(true, |end| ts <= end)
    }
}

/// Events whose key attribute takes one of `excluded_attributes` are removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeExclusionRules {
    /// Granularity the rule applies to (informational, e.g. `event`)
    #[serde(default)]
    pub scope: String,
    /// Attribute whose value is the event's key (e.g. `concept:name`)
    #[serde(default)]
    pub event_attribute: String,
    /// Key values that are removed from the log
    #[serde(default)]
    pub excluded_attributes: Vec<String>,
}

/// Trace-level constraints on the key values a trace must or must not contain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticLogConstraints {
    /// Attribute named by the data owner (kept for introspection)
    #[serde(default)]
    pub event_attribute: String,
    /// A surviving trace must contain at least one of these
    #[serde(default)]
    pub must_include: Vec<String>,
    /// A surviving trace must contain none of these
    #[serde(default)]
    pub must_exclude: Vec<String>,
}

/// Rules governing access to the raw event log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogUsageRules {
    /// Access is allowed strictly before this instant
    #[serde(default, with = "option_timestamp")]
    pub log_expiration: Option<DateTime<Utc>>,
    /// Number of log reads allowed
    #[serde(default)]
    pub max_access_count: u64,
    /// Locations requests may originate from
    #[serde(default)]
    pub allowed_locations: Vec<String>,
    /// Principals allowed to read the log
    #[serde(default)]
    pub access_control_rules: Vec<String>,
    /// Event-level redaction
    #[serde(default)]
    pub attribute_exclusion_rules: AttributeExclusionRules,
    /// Event-level time window
    #[serde(default)]
    pub allowed_time_range: TimeRange,
    /// Trace-level selection
    #[serde(default)]
    pub semantic_log_constraints: SemanticLogConstraints,
}

/// Rules governing access to processing artifacts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputRules {
    /// Access is allowed strictly before this instant
    #[serde(default, with = "option_timestamp")]
    pub output_expiration: Option<DateTime<Utc>>,
    /// Number of artifact reads allowed
    #[serde(default)]
    pub max_access_count: u64,
    /// Locations requests may originate from
    #[serde(default)]
    pub allowed_locations: Vec<String>,
    /// Principals allowed to read artifacts
    #[serde(default)]
    pub access_control_rules: Vec<String>,
    /// Time window of the output (kept for introspection)
    #[serde(default)]
    pub allowed_time_range: TimeRange,
}

/// One allowed (technique, algorithm) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedTechnique {
    /// Technique family (e.g. `AutomatedDiscovery`)
    pub technique_type: String,
    /// Algorithm name (e.g. `HeuristicMiner`)
    pub algorithm: String,
}

impl AllowedTechnique {
    /// Creates a technique pair.
    pub fn new(technique_type: impl Into<String>, algorithm: impl Into<String>) -> Self {
        Self {
            technique_type: technique_type.into(),
            algorithm: algorithm.into(),
        }
    }

    /// Case-insensitive match on both fields.
    pub fn matches(&self, technique_type: &str, algorithm: &str) -> bool {
        eq_fold(&self.technique_type, technique_type) && eq_fold(&self.algorithm, algorithm)
    }
}

/// Compares two names ignoring case, with Unicode lowercase folding.
pub(crate) fn eq_fold(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// Rules governing processing over the log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingRules {
    /// Principals allowed to run processing
    #[serde(default)]
    pub access_control_rules: Vec<String>,
    /// Allowed (technique, algorithm) pairs, in document order
    #[serde(default)]
    pub allowed_techniques: Vec<AllowedTechnique>,
    /// Locations requests may originate from
    #[serde(default)]
    pub allowed_locations: Vec<String>,
}

/// A policy bound to one configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    /// Name of the raw log inside the mapping's data directory
    #[serde(default)]
    pub log_file: String,
    /// Log usage rules
    #[serde(rename = "logUsageRules", default)]
    pub log_usage_rules: LogUsageRules,
    /// Output rules
    #[serde(rename = "outputRules", default)]
    pub output_rules: OutputRules,
    /// Processing rules
    #[serde(rename = "processingRules", default)]
    pub processing_rules: ProcessingRules,
    /// When the data owner last edited the policy
    #[serde(with = "timestamp")]
    pub last_updated: DateTime<Utc>,
}

/// On-disk wrapper holding one or more policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySet {
    /// Policies in document order
    #[serde(default)]
    pub policies: Vec<Policy>,
}
