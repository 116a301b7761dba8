use crate::record::{EventRecord, Fields};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

/// Keys produced by the pipeline itself. Extra fields with these names are
/// rendered under [`SHADOWED_FIELD_PREFIX`] instead.
pub const RESERVED_KEYS: &[&str] = &[
    "timestamp",
    "level",
    "event",
    "logger",
    "call_site",
    "stack",
    "exception",
];

/// Prefix for caller fields whose name collides with a reserved key:
/// a `level` field renders as `field.level`.
pub const SHADOWED_FIELD_PREFIX: &str = "field.";

/// Turns a finished record into one textual representation.
///
/// Implementations must be deterministic: the same record always renders to
/// the same bytes.
pub trait Renderer: Send + Sync {
    fn render(&self, record: &EventRecord) -> String;
}

/// Fixed-width UTC timestamp with microseconds, sortable as text.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// `[timestamp][LEVEL][module:line] message`, followed by the exception and
/// stack on their own lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainTextRenderer;

impl Renderer for PlainTextRenderer {
    fn render(&self, record: &EventRecord) -> String {
        let timestamp = record
            .timestamp()
            .map(|ts| format_timestamp(&ts))
            .unwrap_or_else(|| "-".to_string());
        let site = record
            .call_site
            .as_ref()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown:0".to_string());

        let mut out = format!(
            "[{}][{}][{}] {}",
            timestamp,
            record.level().as_upper_str(),
            site,
            record.message_text()
        );

        // The raw exception wins over its preformatted text so the trace is
        // written exactly once.
        let trace = match (&record.exception, &record.exception_text) {
            (Some(exc), _) => Some(exc.format_text()),
            (None, Some(text)) => Some(text.clone()),
            (None, None) => None,
        };
        if let Some(trace) = trace {
            out.push('\n');
            out.push_str(&trace);
        }
        if let Some(stack) = &record.stack_text {
            out.push('\n');
            out.push_str(stack.trim_end());
        }
        out
    }
}

/// `key=value` pairs on one line.
///
/// Keys listed in `key_order` come first, then every other field in
/// insertion order. Strings are written bare unless they contain spaces,
/// `=` or quotes, in which case they are JSON-quoted.
#[derive(Debug, Clone)]
pub struct KeyValueRenderer {
    key_order: Vec<String>,
}

impl Default for KeyValueRenderer {
    fn default() -> Self {
        Self::new(["timestamp", "level", "event", "logger"])
    }
}

impl KeyValueRenderer {
    pub fn new<I, S>(key_order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key_order: key_order.into_iter().map(Into::into).collect(),
        }
    }

    fn format_value(value: &Value) -> String {
        match value {
            Value::String(s) if needs_quotes(s) => Value::String(s.clone()).to_string(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

fn needs_quotes(s: &str) -> bool {
    s.is_empty() || s.chars().any(|c| c.is_whitespace() || c == '=' || c == '"')
}

impl Renderer for KeyValueRenderer {
    fn render(&self, record: &EventRecord) -> String {
        let mut fields = record_fields(record, false);
        let mut parts = Vec::with_capacity(fields.len());
        for key in &self.key_order {
            if let Some(value) = fields.shift_remove(key) {
                parts.push(format!("{}={}", key, Self::format_value(&value)));
            }
        }
        for (key, value) in &fields {
            parts.push(format!("{}={}", key, Self::format_value(value)));
        }
        parts.join(" ")
    }
}

/// One JSON object per line. The exception is a nested object, not text.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render(&self, record: &EventRecord) -> String {
        let fields = record_fields(record, true);
        serde_json::to_string(&Value::Object(fields)).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Flatten a record into an ordered field map shared by the key-value and
/// JSON renderers.
fn record_fields(record: &EventRecord, structured: bool) -> Fields {
    let mut fields = Fields::new();
    if let Some(ts) = record.timestamp() {
        fields.insert("timestamp".into(), Value::String(format_timestamp(&ts)));
    }
    fields.insert("level".into(), Value::String(record.rendered_level().to_string()));
    fields.insert("event".into(), Value::String(record.message_text()));
    fields.insert("logger".into(), Value::String(record.logger_name().to_string()));

    let mut shadowed = Vec::new();
    for (key, value) in &record.extra {
        if RESERVED_KEYS.contains(&key.as_str()) {
            shadowed.push((format!("{}{}", SHADOWED_FIELD_PREFIX, key), value.clone()));
        } else {
            fields.insert(key.clone(), value.clone());
        }
    }

    if let Some(site) = &record.call_site {
        let value = if structured {
            json!({ "module": site.module, "line": site.line })
        } else {
            Value::String(site.to_string())
        };
        fields.insert("call_site".into(), value);
    }
    if let Some(stack) = &record.stack_text {
        fields.insert("stack".into(), Value::String(stack.trim_end().to_string()));
    }

    let exception = match (&record.exception, &record.exception_text) {
        (Some(exc), _) if structured => serde_json::to_value(exc).ok(),
        (Some(exc), None) => Some(Value::String(exc.format_text())),
        (_, Some(text)) => Some(Value::String(text.clone())),
        (None, None) => None,
    };
    if let Some(exception) = exception {
        fields.insert("exception".into(), exception);
    }
    fields.extend(shadowed);
    fields
}
