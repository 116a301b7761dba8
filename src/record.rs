use crate::level::Level;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt;

/// Open key/value mapping. Insertion order is preserved so the key-value
/// renderer can emit extra fields in the order they were attached.
pub type Fields = serde_json::Map<String, Value>;

/// The message half of an event: free text or a structured mapping.
///
/// A mapping is normalized to text (its `event` key) plus extra fields once,
/// at chain entry. Every later stage sees [`Message::Text`].
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Text(String),
    Event(Fields),
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Message::Text(s.to_string())
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Message::Text(s)
    }
}

impl From<Fields> for Message {
    fn from(map: Fields) -> Self {
        Message::Event(map)
    }
}

/// Originating module and line of an emission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSite {
    pub module: String,
    pub line: u32,
}

impl CallSite {
    pub const UNKNOWN_MODULE: &'static str = "unknown";

    pub fn new(module: impl Into<String>, line: u32) -> Self {
        Self { module: module.into(), line }
    }

    /// Sentinel returned when no frame outside the ignored modules exists.
    pub fn unknown() -> Self {
        Self::new(Self::UNKNOWN_MODULE, 0)
    }

    pub fn is_unknown(&self) -> bool {
        self.module == Self::UNKNOWN_MODULE && self.line == 0
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.line)
    }
}

/// One frame of a call stack, innermost first when stored in a `Vec`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    pub module: String,
    pub line: u32,
    /// `module` was derived from a source file and lacks the crate name.
    #[serde(skip)]
    pub crate_relative: bool,
}

impl StackFrame {
    pub fn new(module: impl Into<String>, line: u32) -> Self {
        Self {
            module: module.into(),
            line,
            crate_relative: false,
        }
    }

    /// Frame whose module path starts below the crate root, e.g. `api::login`.
    pub fn crate_relative(module: impl Into<String>, line: u32) -> Self {
        Self {
            crate_relative: true,
            ..Self::new(module, line)
        }
    }
}

/// A captured error: kind, message, cause chain and trace frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExceptionInfo {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub frames: Vec<StackFrame>,
}

impl ExceptionInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            causes: Vec::new(),
            frames: Vec::new(),
        }
    }

    /// Capture a typed error. The kind is the unqualified type name.
    pub fn from_error<E: Error + 'static>(err: &E) -> Self {
        let full = std::any::type_name::<E>();
        let kind = short_type_name(full);
        Self::from_dyn(kind, err)
    }

    /// Capture a type-erased error under an explicit kind.
    pub fn from_dyn(kind: impl Into<String>, err: &(dyn Error + 'static)) -> Self {
        let mut info = Self::new(kind, err.to_string());
        let mut source = err.source();
        while let Some(cause) = source {
            info.causes.push(cause.to_string());
            source = cause.source();
        }
        info
    }

    pub fn with_frames(mut self, frames: Vec<StackFrame>) -> Self {
        self.frames = frames;
        self
    }

    /// Human-readable multi-line rendering.
    pub fn format_text(&self) -> String {
        let mut out = format!("{}: {}", self.kind, self.message);
        for cause in &self.causes {
            out.push_str("\n  caused by: ");
            out.push_str(cause);
        }
        for frame in &self.frames {
            out.push_str(&format!("\n  at {}:{}", frame.module, frame.line));
        }
        out
    }
}

fn short_type_name(full: &str) -> &str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// The in-flight record carrying one emission through the pipeline.
///
/// `level` and `logger_name` are fixed at construction and only exposed
/// through getters. `timestamp` can be assigned once via [`EventRecord::stamp`].
#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    level: Level,
    logger_name: String,
    timestamp: Option<DateTime<Utc>>,
    pub message: Message,
    /// Positional interpolation arguments for `%s`-style messages.
    pub positional_args: Vec<Value>,
    /// Canonical level name, set by the level-name normalizer.
    pub level_name: Option<&'static str>,
    /// Emission stack, innermost frame first.
    pub frames: Vec<StackFrame>,
    pub call_site: Option<CallSite>,
    pub stack_info: bool,
    pub stack_text: Option<String>,
    /// Raw captured exception. Kept after formatting so each renderer can
    /// produce its own representation.
    pub exception: Option<ExceptionInfo>,
    pub exception_text: Option<String>,
    /// Byte-valued fields awaiting decoding into `extra`.
    pub byte_fields: Vec<(String, Vec<u8>)>,
    pub extra: Fields,
}

impl EventRecord {
    pub fn new(level: Level, logger_name: impl Into<String>, message: impl Into<Message>) -> Self {
        Self {
            level,
            logger_name: logger_name.into(),
            timestamp: None,
            message: message.into(),
            positional_args: Vec::new(),
            level_name: None,
            frames: Vec::new(),
            call_site: None,
            stack_info: false,
            stack_text: None,
            exception: None,
            exception_text: None,
            byte_fields: Vec::new(),
            extra: Fields::new(),
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn logger_name(&self) -> &str {
        &self.logger_name
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Assign the timestamp if unset. Returns `false` when it was already set.
    pub fn stamp(&mut self, at: DateTime<Utc>) -> bool {
        if self.timestamp.is_some() {
            return false;
        }
        self.timestamp = Some(at);
        true
    }

    /// Insert an extra field; a later write to the same key overwrites.
    pub fn set_field(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.extra.insert(key.into(), value.into());
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    /// Current message text. For a not yet normalized mapping this is its
    /// `event` entry.
    pub fn message_text(&self) -> String {
        match &self.message {
            Message::Text(s) => s.clone(),
            Message::Event(map) => map
                .get("event")
                .or_else(|| map.get("message"))
                .map(value_to_text)
                .unwrap_or_default(),
        }
    }

    /// Collapse a structured mapping into text plus extra fields. The text is
    /// the `event` entry, or `message` when there is no `event`; a `message`
    /// next to an `event` stays a field. Keys the caller attached separately
    /// overwrite keys from the mapping.
    pub fn normalize_message(&mut self) {
        let map = match &mut self.message {
            Message::Text(_) => return,
            Message::Event(map) => std::mem::take(map),
        };
        let text_key = if map.contains_key("event") { "event" } else { "message" };
        let mut merged = Fields::new();
        let mut text = String::new();
        for (key, value) in map {
            if key == text_key {
                text = value_to_text(&value);
            } else {
                merged.insert(key, value);
            }
        }
        for (key, value) in std::mem::take(&mut self.extra) {
            merged.insert(key, value);
        }
        self.extra = merged;
        self.message = Message::Text(text);
    }

    /// Level name used by renderers.
    pub fn rendered_level(&self) -> &'static str {
        self.level_name.unwrap_or_else(|| self.level.as_str())
    }
}

/// Text form of a JSON value: strings unquoted, everything else as JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
