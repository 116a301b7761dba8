use crate::callsite::module_of_file;
use crate::level::Level;
use crate::pipeline::{EmitOutcome, Pipeline};
use crate::record::{EventRecord, ExceptionInfo, Fields, Message, StackFrame};
use serde_json::Value;
use std::error::Error;
use std::panic::Location;
use std::sync::Arc;

/// Structured, context-bound logger.
///
/// ```no_run
/// # use tracing_dual_sink::logger::Logger;
/// # use serde_json::json;
/// # fn demo(logger: &Logger) {
/// let request_log = logger.bind("request_id", "b7f1");
/// request_log.info("user_login").field("user_id", 42).emit();
/// request_log.warning("retrying %s after %d ms").args([json!("payment"), json!(250)]).emit();
/// # }
/// ```
///
/// Cloning is cheap; clones share the pipeline and copy the bound context.
#[derive(Clone)]
pub struct Logger {
    name: Arc<str>,
    pipeline: Arc<Pipeline>,
    context: Fields,
}

impl Logger {
    pub fn new(name: impl Into<String>, pipeline: Arc<Pipeline>) -> Self {
        Self {
            name: Arc::from(name.into()),
            pipeline,
            context: Fields::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// New logger whose records all carry `key=value`.
    pub fn bind(&self, key: impl Into<String>, value: impl Into<Value>) -> Logger {
        let mut bound = self.clone();
        bound.context.insert(key.into(), value.into());
        bound
    }

    pub fn context(&self) -> &Fields {
        &self.context
    }

    #[track_caller]
    pub fn log(&self, level: Level, message: impl Into<Message>) -> Emission<'_> {
        Emission::new(self, level, message.into(), Location::caller())
    }

    #[track_caller]
    pub fn debug(&self, message: impl Into<Message>) -> Emission<'_> {
        Emission::new(self, Level::Debug, message.into(), Location::caller())
    }

    #[track_caller]
    pub fn info(&self, message: impl Into<Message>) -> Emission<'_> {
        Emission::new(self, Level::Info, message.into(), Location::caller())
    }

    #[track_caller]
    pub fn warning(&self, message: impl Into<Message>) -> Emission<'_> {
        Emission::new(self, Level::Warning, message.into(), Location::caller())
    }

    #[track_caller]
    pub fn error(&self, message: impl Into<Message>) -> Emission<'_> {
        Emission::new(self, Level::Error, message.into(), Location::caller())
    }

    #[track_caller]
    pub fn critical(&self, message: impl Into<Message>) -> Emission<'_> {
        Emission::new(self, Level::Critical, message.into(), Location::caller())
    }

    /// Error-level emission carrying `err` as its exception.
    #[track_caller]
    pub fn exception<E: Error + 'static>(&self, message: impl Into<Message>, err: &E) -> Emission<'_> {
        Emission::new(self, Level::Error, message.into(), Location::caller()).with_error(err)
    }
}

/// A record being assembled; nothing happens until [`Emission::emit`].
#[must_use = "an emission does nothing until `emit` is called"]
pub struct Emission<'a> {
    logger: &'a Logger,
    record: EventRecord,
}

impl<'a> Emission<'a> {
    fn new(logger: &'a Logger, level: Level, message: Message, caller: &Location<'_>) -> Self {
        let mut record = EventRecord::new(level, logger.name.to_string(), message);
        record.extra = logger.context.clone();
        record.frames.push(StackFrame::crate_relative(module_of_file(caller.file()), caller.line()));
        Self { logger, record }
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.record.set_field(key, value);
        self
    }

    pub fn fields<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (key, value) in fields {
            self.record.set_field(key, value);
        }
        self
    }

    /// Positional arguments for `%s`, `%d` and `%r` placeholders.
    pub fn args<I, V>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.record.positional_args.extend(args.into_iter().map(Into::into));
        self
    }

    /// A field holding raw bytes, decoded to text by the pipeline.
    pub fn bytes_field(mut self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.record.byte_fields.push((key.into(), bytes.into()));
        self
    }

    pub fn exception(mut self, exception: ExceptionInfo) -> Self {
        self.record.exception = Some(exception);
        self
    }

    pub fn with_error<E: Error + 'static>(self, err: &E) -> Self {
        self.exception(ExceptionInfo::from_error(err))
    }

    /// Capture the stack at emission time.
    pub fn stack_info(mut self) -> Self {
        self.record.stack_info = true;
        self
    }

    pub fn record(&self) -> &EventRecord {
        &self.record
    }

    pub fn emit(self) -> EmitOutcome {
        let method = self.record.level().method_name();
        self.logger.pipeline.emit(method, self.record)
    }
}
