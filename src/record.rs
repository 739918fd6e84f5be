use std::fmt::Write as _;

use log::Level;
use serde_json::{Map, Value};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::config::Format;

/// Attribute key reserved for the call stack attached to error records.
pub const STACK_TRACE_KEY: &str = "stack_trace";

const RESERVED_KEYS: [&str; 3] = ["time", "level", "message"];

/// Ordered key/value attributes of a log record.
///
/// Keys are unique; inserting an existing key replaces its value in place.
///
/// # Examples
/// ```rust
/// use actix_web_middleware_tracelog::Attributes;
///
/// let attrs = Attributes::new()
///     .with("user_id", 42)
///     .with("action", "login");
/// assert_eq!(attrs.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(Map<String, Value>);

impl Attributes {
    pub fn new() -> Self {
        Attributes(Map::new())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub(crate) fn extend(&mut self, other: Attributes) {
        self.0.extend(other.0);
    }
}

impl From<Map<String, Value>> for Attributes {
    fn from(map: Map<String, Value>) -> Self {
        Attributes(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Attributes(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A single record, rendered into one line before it is handed to the sinks.
pub(crate) struct Record<'a> {
    pub(crate) level: Level,
    pub(crate) message: &'a str,
    pub(crate) attributes: &'a Attributes,
    pub(crate) time: OffsetDateTime,
}

impl Record<'_> {
    /// Render the record, newline included.
    pub(crate) fn render(&self, format: Format) -> Vec<u8> {
        let mut line = match format {
            Format::Json => self.render_json(),
            Format::Text => self.render_text(),
        };
        line.push('\n');
        line.into_bytes()
    }

    fn timestamp(&self) -> String {
        self.time.format(&Rfc3339).unwrap_or_default()
    }

    fn render_json(&self) -> String {
        let mut object = Map::new();
        object.insert("time".to_string(), Value::String(self.timestamp()));
        object.insert("level".to_string(), Value::String(level_name(self.level)));
        object.insert("message".to_string(), Value::String(self.message.to_string()));

        for (key, value) in self.attributes.iter() {
            let key = if RESERVED_KEYS.contains(&key.as_str()) {
                format!("fields.{key}")
            } else {
                key.clone()
            };
            object.insert(key, value.clone());
        }

        Value::Object(object).to_string()
    }

    fn render_text(&self) -> String {
        let mut line = String::new();
        let _ = write!(
            line,
            "time={} level={} msg={}",
            quote(&self.timestamp()),
            level_name(self.level),
            quote(self.message)
        );

        for (key, value) in self.attributes.iter() {
            let value = match value {
                Value::String(s) => quote(s),
                Value::Null => String::new(),
                other => quote(&other.to_string()),
            };
            let _ = write!(line, " {key}={value}");
        }

        line
    }
}

fn level_name(level: Level) -> String {
    level.as_str().to_ascii_lowercase()
}

fn quote(value: &str) -> String {
    let needs_quoting = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '=' || c.is_control());

    if needs_quoting {
        format!("{value:?}")
    } else {
        value.to_string()
    }
}
