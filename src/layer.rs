use crate::callsite::covers;
use crate::level::Level;
use crate::pipeline::Pipeline;
use crate::record::{EventRecord, ExceptionInfo, Fields, StackFrame};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Field that, set to `true` on a `tracing` event, requests stack capture.
pub const STACK_INFO_FIELD: &str = "stack_info";

/// Targets skipped by [`PipelineLayer::new`]: the HTTP and Sentry clients
/// that deliver collector reports. Their events would otherwise be logged
/// (and, at error level, forwarded) from inside the delivery task.
pub const DEFAULT_IGNORED_TARGETS: &[&str] = &[
    "hyper",
    "hyper_util",
    "h2",
    "reqwest",
    "rustls",
    "sentry",
    "sentry_core",
];

/// `tracing_subscriber` layer that feeds conventional `tracing` events into
/// the same [`Pipeline`] the structured [`Logger`](crate::logger::Logger)
/// uses.
///
/// The event target becomes the logger name, the `message` field the text,
/// and the metadata's module path and line the innermost stack frame.
/// Processing runs synchronously on the emitting thread. Events whose target
/// is in the ignore list never reach the pipeline.
pub struct PipelineLayer {
    pipeline: Arc<Pipeline>,
    ignored_targets: Vec<String>,
    /// Events handed to the pipeline.
    pub total_events: Arc<AtomicU64>,
}

impl PipelineLayer {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            ignored_targets: DEFAULT_IGNORED_TARGETS.iter().map(|t| t.to_string()).collect(),
            total_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Skip events from `target` and every target nested below it.
    pub fn ignore_target(mut self, target: impl Into<String>) -> Self {
        self.ignored_targets.push(target.into());
        self
    }

    pub fn accepts_target(&self, target: &str) -> bool {
        !self.ignored_targets.iter().any(|ignored| covers(ignored, target))
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }
}

/// Convert a `tracing` event into an [`EventRecord`].
pub fn record_from_event(event: &Event<'_>) -> EventRecord {
    let mut fields = Fields::new();
    let mut message: Option<String> = None;
    let mut exception: Option<ExceptionInfo> = None;
    let mut stack_info = false;

    let mut visitor = FieldVisitor {
        fields: &mut fields,
        message: &mut message,
        exception: &mut exception,
        stack_info: &mut stack_info,
    };
    event.record(&mut visitor);

    let meta = event.metadata();
    let mut record = EventRecord::new(Level::from(*meta.level()), meta.target(), message.unwrap_or_default());
    record.extra = fields;
    record.exception = exception;
    record.stack_info = stack_info;
    if let (Some(module), Some(line)) = (meta.module_path(), meta.line()) {
        record.frames.push(StackFrame::new(module, line));
    }
    record
}

impl<S> Layer<S> for PipelineLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !self.accepts_target(event.metadata().target()) {
            return;
        }
        self.total_events.fetch_add(1, Ordering::Relaxed);
        let record = record_from_event(event);
        let method = record.level().method_name();
        self.pipeline.emit(method, record);
    }
}

pub struct FieldVisitor<'a> {
    pub fields: &'a mut Fields,
    pub message: &'a mut Option<String>,
    pub exception: &'a mut Option<ExceptionInfo>,
    pub stack_info: &'a mut bool,
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            *self.message = Some(value.to_string());
        } else {
            self.fields.insert(field.name().to_string(), Value::String(value.to_string()));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == STACK_INFO_FIELD {
            *self.stack_info = value;
        } else {
            self.fields.insert(field.name().to_string(), Value::from(value));
        }
    }

    fn record_error(&mut self, _field: &Field, value: &(dyn std::error::Error + 'static)) {
        *self.exception = Some(ExceptionInfo::from_dyn(error_kind(value), value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let text = format!("{:?}", value);
        if field.name() == "message" {
            *self.message = Some(text);
        } else {
            self.fields.insert(field.name().to_string(), Value::String(text));
        }
    }
}

/// Best-effort kind for a type-erased error: the leading identifier of its
/// `Debug` output (`Custom`, `ParseIntError`, ...).
fn error_kind(err: &(dyn std::error::Error + 'static)) -> String {
    let debug = format!("{:?}", err);
    let kind: String = debug
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if kind.is_empty() {
        "Error".to_string()
    } else {
        kind
    }
}
