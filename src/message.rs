//! # Messages and the Message Store
//!
//! A [`MessageStore`] is the ordered, read-only list of [`MessageTemplate`]s a
//! sender task walks through on every iteration. Each template carries a
//! multiplicity (how many times it is sent back to back) and is resolved to a
//! concrete [`Message`] against the task's current attributes just before the
//! first send.
//!
//! Placeholders use the `${name}` form, with an optional fallback written as
//! `${name:default}`. A placeholder with no matching attribute and no default
//! is left in the payload untouched.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Header carrying the iteration number when message numbering is enabled
pub const MESSAGE_NUMBER_HEADER: &str = "PerfCake_Performance_Message_Number";

/// Filter attribute carrying the iteration number when message numbering is enabled
pub const MESSAGE_NUMBER_PROPERTY: &str = "MessageNumber";

/// Headers passed to every phase of a round trip
pub type Headers = BTreeMap<String, String>;

/// Attributes used to resolve template placeholders
pub type Attributes = BTreeMap<String, String>;

/// A concrete message, ready to hand to a transport
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub payload: String,
    pub headers: Headers,
    pub properties: BTreeMap<String, String>,
}

impl Message {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            ..Default::default()
        }
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// One configured message together with its repeat count
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplate {
    template: String,
    multiplicity: u64,
    #[serde(default)]
    headers: Headers,
    #[serde(default)]
    properties: BTreeMap<String, String>,
}

impl MessageTemplate {
    /// Create a template sent once per iteration
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            multiplicity: 1,
            headers: Headers::new(),
            properties: BTreeMap::new(),
        }
    }

    /// Set how many times the message is sent per iteration; 0 skips it
    pub fn with_multiplicity(mut self, multiplicity: u64) -> Self {
        self.multiplicity = multiplicity;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn multiplicity(&self) -> u64 {
        self.multiplicity
    }

    /// Resolve the template to a concrete message using `attributes`
    pub fn filtered(&self, attributes: &Attributes) -> Message {
        Message {
            payload: substitute(&self.template, attributes),
            headers: self
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), substitute(v, attributes)))
                .collect(),
            properties: self.properties.clone(),
        }
    }

    /// Parse the command-line form `payload` or `payload*multiplicity`.
    ///
    /// Only a trailing `*<digits>` is treated as a multiplicity, so payloads
    /// containing `*` elsewhere are kept intact.
    pub fn parse(arg: &str) -> Result<Self, String> {
        if let Some((payload, count)) = arg.rsplit_once('*') {
            if !count.is_empty() && count.chars().all(|c| c.is_ascii_digit()) {
                let multiplicity = count
                    .parse::<u64>()
                    .map_err(|e| format!("Invalid multiplicity '{}': {}", count, e))?;
                return Ok(Self::new(payload).with_multiplicity(multiplicity));
            }
        }
        Ok(Self::new(arg))
    }
}

/// Replace `${name}` / `${name:default}` placeholders
fn substitute(input: &str, attributes: &Attributes) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            // unterminated, copy verbatim
            out.push_str(&rest[start..]);
            return out;
        };

        let expr = &after[..end];
        let (name, default) = match expr.split_once(':') {
            Some((name, default)) => (name, Some(default)),
            None => (expr, None),
        };

        match (attributes.get(name), default) {
            (Some(value), _) => out.push_str(value),
            (None, Some(default)) => out.push_str(default),
            (None, None) => out.push_str(&rest[start..start + 2 + end + 1]),
        }
        rest = &after[end + 1..];
    }

    out.push_str(rest);
    out
}

/// Ordered, shared, read-only list of message templates
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    entries: Arc<Vec<MessageTemplate>>,
}

impl MessageStore {
    pub fn new(entries: Vec<MessageTemplate>) -> Self {
        Self {
            entries: Arc::new(entries),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MessageTemplate> {
        self.entries.iter()
    }
}

impl From<Vec<MessageTemplate>> for MessageStore {
    fn from(entries: Vec<MessageTemplate>) -> Self {
        Self::new(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_filtered_substitutes_attributes() {
        let template = MessageTemplate::new("order ${MessageNumber} for ${user:anonymous}");
        let message = template.filtered(&attrs(&[("MessageNumber", "42")]));
        assert_eq!(message.payload, "order 42 for anonymous");
    }

    #[test]
    fn test_unknown_placeholder_is_left_alone() {
        let template = MessageTemplate::new("hello ${missing} ${broken");
        let message = template.filtered(&Attributes::new());
        assert_eq!(message.payload, "hello ${missing} ${broken");
    }

    #[test]
    fn test_template_headers_are_filtered() {
        let template = MessageTemplate::new("x").with_header("trace", "t-${MessageNumber}");
        let message = template.filtered(&attrs(&[("MessageNumber", "7")]));
        assert_eq!(message.headers.get("trace").map(String::as_str), Some("t-7"));
    }

    #[test]
    fn test_parse_multiplicity() {
        let t = MessageTemplate::parse("ping*3").unwrap();
        assert_eq!(t.template(), "ping");
        assert_eq!(t.multiplicity(), 3);

        let t = MessageTemplate::parse("a*b").unwrap();
        assert_eq!(t.template(), "a*b");
        assert_eq!(t.multiplicity(), 1);

        let t = MessageTemplate::parse("skip*0").unwrap();
        assert_eq!(t.multiplicity(), 0);
    }

    #[test]
    fn test_store_keeps_order() {
        assert!(MessageStore::default().is_empty());

        let store = MessageStore::from(vec![
            MessageTemplate::new("A").with_multiplicity(2),
            MessageTemplate::new("B"),
            MessageTemplate::new("C").with_multiplicity(0),
        ]);
        let walked: Vec<(&str, u64)> = store
            .iter()
            .map(|t| (t.template(), t.multiplicity()))
            .collect();
        assert_eq!(walked, vec![("A", 2), ("B", 1), ("C", 0)]);
    }
}
