//! Policy-shaped view of an event log.
//!
//! Per event, the key attribute (named by `attributeExclusionRules`) drives
//! exclusion and the semantic constraints; the time-range attribute, when it
//! parses as RFC 3339, must fall inside the allowed window. Value matching is
//! exact; attribute names match ignoring case.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::event_log::{Attribute, Event, EventLog, Trace};
use crate::policy::LogUsageRules;

/// A surviving event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilteredEvent {
    /// All attributes of the source event
    pub attributes: Vec<Attribute>,
    /// Raw value of the time-range attribute, if present
    pub date: Option<String>,
}

/// A surviving trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilteredTrace {
    /// Case-level attributes, unchanged
    pub attributes: Vec<Attribute>,
    /// Surviving events in original order
    pub events: Vec<FilteredEvent>,
}

/// Result of [`filter_log`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilteredLog {
    /// Surviving traces in original order
    pub traces: Vec<FilteredTrace>,
}

impl FilteredLog {
    /// Returns true if no trace survived.
    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }

    /// Sequences of `attribute` values, one per surviving trace.
    pub fn event_matrix(&self, attribute: &str) -> Vec<Vec<String>> {
        EventLog::from(self).event_matrix(attribute)
    }
}

impl From<&FilteredLog> for EventLog {
    fn from(filtered: &FilteredLog) -> Self {
        EventLog {
            traces: filtered
                .traces
                .iter()
                .map(|t| Trace {
                    attributes: t.attributes.clone(),
                    events: t
                        .events
                        .iter()
                        .map(|e| Event::new(e.attributes.clone()))
                        .collect(),
                })
                .collect(),
        }
    }
}

/// Parses the XES file at `path` and filters it.
pub fn load_and_filter(path: &Path, rules: &LogUsageRules) -> Result<FilteredLog> {
    let log = EventLog::load(path)?;
    let filtered = filter_log(&log, rules);
    tracing::debug!(
        path = %path.display(),
        traces_in = log.traces.len(),
        traces_out = filtered.traces.len(),
        "log filtered"
    );
    Ok(filtered)
}

/// Applies exclusion, time-window and semantic constraints.
///
/// A trace survives only if at least one surviving event hits `mustInclude`,
/// no surviving event hits `mustExclude`, and at least one event survives.
pub fn filter_log(log: &EventLog, rules: &LogUsageRules) -> FilteredLog {
    FilteredLog {
        traces: log
            .traces
            .iter()
            .filter_map(|trace| filter_trace(trace, rules))
            .collect(),
    }
}

fn filter_trace(trace: &Trace, rules: &LogUsageRules) -> Option<FilteredTrace> {
    let key_attribute = &rules.attribute_exclusion_rules.event_attribute;
    let semantic = &rules.semantic_log_constraints;

    let mut includes = false;
    let mut excludes = false;
    let mut events = Vec::new();

    for event in &trace.events {
        // An event without the key attribute is keyed by the empty string.
        let key = event.get(key_attribute).unwrap_or("");
        if contains(&rules.attribute_exclusion_rules.excluded_attributes, key) {
            continue;
        }

        let date = event.get(&rules.allowed_time_range.event_attribute);
        if let Some(ts) = date.and_then(parse_rfc3339) {
            if !rules.allowed_time_range.contains(ts) {
                continue;
            }
        }

        includes |= contains(&semantic.must_include, key);
        excludes |= contains(&semantic.must_exclude, key);
        events.push(FilteredEvent {
            attributes: event.attributes.clone(),
            date: date.map(str::to_string),
        });
    }

    if includes && !excludes && !events.is_empty() {
        Some(FilteredTrace {
            attributes: trace.attributes.clone(),
            events,
        })
    } else {
        None
    }
}

fn contains(set: &[String], value: &str) -> bool {
    set.iter().any(|v| v == value)
}

fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}
