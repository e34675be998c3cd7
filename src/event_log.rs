//! Event log model and XES parsing.
//!
//! A log is an ordered list of traces, a trace an ordered list of events.
//! Only the flat, typed attributes directly under `<trace>` and `<event>` are
//! kept; nested `<list>`/`<container>` content and log-level metadata
//! (`<global>`, `<extension>`, `<classifier>`) are skipped.

use std::path::Path;

use quick_xml::events::{BytesStart, Event as XmlEvent};
use quick_xml::Reader;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// XES type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    /// `<string>`
    String,
    /// `<date>`
    Date,
    /// `<int>`
    Int,
    /// `<float>`
    Float,
    /// `<boolean>`
    Boolean,
    /// `<id>`
    Id,
}

impl AttributeKind {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"string" => Some(AttributeKind::String),
            b"date" => Some(AttributeKind::Date),
            b"int" => Some(AttributeKind::Int),
            b"float" => Some(AttributeKind::Float),
            b"boolean" => Some(AttributeKind::Boolean),
            b"id" => Some(AttributeKind::Id),
            _ => None,
        }
    }
}

/// A named attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    /// Attribute name (e.g. `concept:name`)
    pub key: String,
    /// Raw textual value
    pub value: String,
    /// XES type
    #[serde(rename = "type")]
    pub kind: AttributeKind,
}

impl Attribute {
    /// Creates a string attribute.
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            kind: AttributeKind::String,
        }
    }

    /// Creates a date attribute.
    pub fn date(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            kind: AttributeKind::Date,
        }
    }
}

/// Looks up an attribute value by key, ignoring case.
pub fn attribute_value<'a>(attributes: &'a [Attribute], key: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|a| a.key.eq_ignore_ascii_case(key))
        .map(|a| a.value.as_str())
}

/// One event of a trace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Attributes in document order
    pub attributes: Vec<Attribute>,
}

impl Event {
    /// Creates an event from attributes.
    pub fn new(attributes: Vec<Attribute>) -> Self {
        Self { attributes }
    }

    /// Returns the value of `key`, ignoring case.
    pub fn get(&self, key: &str) -> Option<&str> {
        attribute_value(&self.attributes, key)
    }
}

/// One process instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    /// Case-level attributes
    pub attributes: Vec<Attribute>,
    /// Events in causal order
    pub events: Vec<Event>,
}

/// An ordered collection of traces.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    /// Traces in document order
    pub traces: Vec<Trace>,
}

impl EventLog {
    /// Reads and parses an XES file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::LogParse(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_xes_str(&raw)
    }

    /// Parses an XES document.
    pub fn from_xes_str(xml: &str) -> Result<Self> {
        let mut reader = Reader::from_str(xml);
        let mut log = EventLog::default();
        let mut trace: Option<Trace> = None;
        let mut event: Option<Event> = None;
        // Depth inside attribute elements; only depth-0 attributes are recorded.
        let mut nested = 0usize;

        loop {
            let xml_event = reader.read_event().map_err(|e| {
                Error::LogParse(format!("at byte {}: {}", reader.buffer_position(), e))
            })?;
            match xml_event {
                XmlEvent::Start(start) => {
                    let name = start.local_name();
                    match name.as_ref() {
                        b"trace" if nested == 0 && trace.is_none() => {
                            trace = Some(Trace::default());
                        }
                        b"event" if nested == 0 && trace.is_some() && event.is_none() => {
                            event = Some(Event::default());
                        }
                        tag if is_attribute_element(tag) => {
                            if nested == 0 {
                                record(&start, &mut trace, &mut event)?;
                            }
                            nested += 1;
                        }
                        _ => {}
                    }
                }
                XmlEvent::Empty(start) => {
                    let name = start.local_name();
                    match name.as_ref() {
                        b"trace" if nested == 0 && trace.is_none() => {
                            log.traces.push(Trace::default());
                        }
                        b"event" if nested == 0 && event.is_none() => {
                            if let Some(t) = trace.as_mut() {
                                t.events.push(Event::default());
                            }
                        }
                        tag if is_attribute_element(tag) && nested == 0 => {
                            record(&start, &mut trace, &mut event)?;
                        }
                        _ => {}
                    }
                }
                XmlEvent::End(end) => {
                    let name = end.local_name();
                    match name.as_ref() {
                        tag if is_attribute_element(tag) => nested = nested.saturating_sub(1),
                        b"event" if nested == 0 => {
                            if let (Some(t), Some(e)) = (trace.as_mut(), event.take()) {
                                t.events.push(e);
                            }
                        }
                        b"trace" if nested == 0 => {
                            if let Some(t) = trace.take() {
                                log.traces.push(t);
                            }
                        }
                        _ => {}
                    }
                }
                XmlEvent::Eof => break,
                _ => {}
            }
        }

        if trace.is_some() || event.is_some() {
            return Err(Error::LogParse("unterminated trace or event".into()));
        }
        Ok(log)
    }

    /// Sequences of `attribute` values, one per trace, as consumed by mining
    /// algorithms. Events without the attribute and traces left empty are
    /// omitted.
    pub fn event_matrix(&self, attribute: &str) -> Vec<Vec<String>> {
        self.traces
            .iter()
            .map(|trace| {
                trace
                    .events
                    .iter()
                    .filter_map(|e| e.get(attribute))
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|seq| !seq.is_empty())
            .collect()
    }

    /// Number of events across all traces.
    pub fn event_count(&self) -> usize {
        self.traces.iter().map(|t| t.events.len()).sum()
    }
}

fn is_attribute_element(tag: &[u8]) -> bool {
    AttributeKind::from_tag(tag).is_some() || tag == b"list" || tag == b"container"
}

fn record(start: &BytesStart<'_>, trace: &mut Option<Trace>, event: &mut Option<Event>) -> Result<()> {
    let kind = match AttributeKind::from_tag(start.local_name().as_ref()) {
        Some(kind) => kind,
        None => return Ok(()),
    };
    let target = match (event.as_mut(), trace.as_mut()) {
        (Some(e), _) => &mut e.attributes,
        (None, Some(t)) => &mut t.attributes,
        (None, None) => return Ok(()),
    };

    let mut key = None;
    let mut value = None;
    for attr in start.attributes() {
        let attr = attr.map_err(|e| Error::LogParse(e.to_string()))?;
        let text = attr
            .unescape_value()
            .map_err(|e| Error::LogParse(e.to_string()))?
            .into_owned();
        match attr.key.as_ref() {
            b"key" => key = Some(text),
            b"value" => value = Some(text),
            _ => {}
        }
    }
    if let Some(key) = key {
        target.push(Attribute {
            key,
            value: value.unwrap_or_default(),
            kind,
        });
    }
    Ok(())
}
