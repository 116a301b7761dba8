//! Built-in processors, in the order [`standard_chain`] installs them:
//!
//! 1. [`RequestPathFilter`]
//! 2. [`LevelFilter`]
//! 3. [`TimeStamper`]
//! 4. [`LevelNameNormalizer`]
//! 5. [`PositionalArgsFormatter`]
//! 6. [`StackInfoRenderer`]
//! 7. [`ExceptionFormatter`]
//! 8. [`UnicodeDecoder`]
//! 9. [`CallSiteAnnotator`]
//! 10. [`CollectorForward`]

use crate::callsite::CallSiteResolver;
use crate::collector::{Breadcrumb, BreadcrumbTrail, CollectorForwarder, ErrorReport};
use crate::error::ProcessorError;
use crate::level::Level;
use crate::processor::{ProcessContext, Processor, ProcessorChain, Step};
use crate::record::{value_to_text, EventRecord, Message};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::backtrace::Backtrace;
use std::collections::BTreeSet;

/// Field inspected by [`RequestPathFilter`].
pub const REQUEST_PATH_FIELD: &str = "request_path";

/// Drops records whose `request_path` contains an excluded substring.
#[derive(Debug, Clone, Default)]
pub struct RequestPathFilter {
    excluded: Vec<String>,
}

impl RequestPathFilter {
    pub fn new<I, S>(excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded: excluded
                .into_iter()
                .map(Into::into)
                .filter(|s: &String| !s.is_empty())
                .collect(),
        }
    }

    fn is_excluded(&self, path: &str) -> bool {
        self.excluded.iter().any(|ex| path.contains(ex.as_str()))
    }
}

impl Processor for RequestPathFilter {
    fn name(&self) -> &'static str {
        "request_path_filter"
    }

    fn process(&self, _ctx: &ProcessContext<'_>, record: EventRecord) -> Result<Step, ProcessorError> {
        match record.field(REQUEST_PATH_FIELD) {
            Some(Value::String(path)) if self.is_excluded(path) => Ok(Step::Drop),
            _ => Ok(Step::Continue(record)),
        }
    }
}

/// Drops records below the minimum level of their logger.
///
/// Per-logger overrides match on logger-name prefixes split at `::` or `.`;
/// the longest match wins.
#[derive(Debug, Clone)]
pub struct LevelFilter {
    default: Level,
    per_logger: Vec<(String, Level)>,
}

impl LevelFilter {
    pub fn new(default: Level) -> Self {
        Self {
            default,
            per_logger: Vec::new(),
        }
    }

    pub fn with_logger(mut self, logger: impl Into<String>, level: Level) -> Self {
        self.per_logger.push((logger.into(), level));
        self
    }

    pub fn min_level_for(&self, logger: &str) -> Level {
        self.per_logger
            .iter()
            .filter(|(prefix, _)| logger_matches(logger, prefix))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, level)| *level)
            .unwrap_or(self.default)
    }
}

fn logger_matches(logger: &str, prefix: &str) -> bool {
    if logger == prefix {
        return true;
    }
    match logger.strip_prefix(prefix) {
        Some(rest) => rest.starts_with("::") || rest.starts_with('.'),
        None => false,
    }
}

impl Processor for LevelFilter {
    fn name(&self) -> &'static str {
        "level_filter"
    }

    fn process(&self, ctx: &ProcessContext<'_>, record: EventRecord) -> Result<Step, ProcessorError> {
        if record.level() < self.min_level_for(ctx.logger) {
            Ok(Step::Drop)
        } else {
            Ok(Step::Continue(record))
        }
    }
}

/// Assigns `timestamp` if the record has none yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeStamper {
    fixed: Option<DateTime<Utc>>,
}

impl TimeStamper {
    /// Stamp every record with the same instant.
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self { fixed: Some(at) }
    }
}

impl Processor for TimeStamper {
    fn name(&self) -> &'static str {
        "timestamper"
    }

    fn process(&self, _ctx: &ProcessContext<'_>, mut record: EventRecord) -> Result<Step, ProcessorError> {
        record.stamp(self.fixed.unwrap_or_else(Utc::now));
        Ok(Step::Continue(record))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LevelNameNormalizer;

impl Processor for LevelNameNormalizer {
    fn name(&self) -> &'static str {
        "add_log_level"
    }

    fn process(&self, _ctx: &ProcessContext<'_>, mut record: EventRecord) -> Result<Step, ProcessorError> {
        record.level_name = Some(record.level().as_str());
        Ok(Step::Continue(record))
    }
}

/// Interpolates `%s`, `%d`, `%r` and `%%` with the record's positional
/// arguments, then discards them.
#[derive(Debug, Clone, Copy, Default)]
pub struct PositionalArgsFormatter;

impl PositionalArgsFormatter {
    fn interpolate(template: &str, args: &[Value]) -> Result<String, ProcessorError> {
        let mut out = String::with_capacity(template.len());
        let mut args = args.iter();
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.peek().copied() {
                Some('%') => {
                    chars.next();
                    out.push('%');
                }
                Some(spec @ ('s' | 'd' | 'r')) => {
                    chars.next();
                    match args.next() {
                        Some(arg) => out.push_str(&Self::format_arg(spec, arg)?),
                        None => {
                            out.push('%');
                            out.push(spec);
                        }
                    }
                }
                _ => out.push('%'),
            }
        }
        Ok(out)
    }

    fn format_arg(spec: char, arg: &Value) -> Result<String, ProcessorError> {
        match spec {
            'd' => match arg {
                Value::Number(n) => Ok(n.to_string()),
                Value::Bool(b) => Ok(u8::from(*b).to_string()),
                other => Err(ProcessorError::failed(
                    "positional_args_formatter",
                    format!("%d format requires a number, got {}", other),
                )),
            },
            'r' => Ok(arg.to_string()),
            _ => Ok(value_to_text(arg)),
        }
    }
}

impl Processor for PositionalArgsFormatter {
    fn name(&self) -> &'static str {
        "positional_args_formatter"
    }

    fn process(&self, _ctx: &ProcessContext<'_>, mut record: EventRecord) -> Result<Step, ProcessorError> {
        if record.positional_args.is_empty() {
            return Ok(Step::Continue(record));
        }
        let args = std::mem::take(&mut record.positional_args);
        let text = Self::interpolate(&record.message_text(), &args)?;
        record.message = Message::Text(text);
        Ok(Step::Continue(record))
    }
}

/// Renders the current stack into `stack_text` when the caller asked for it.
#[derive(Debug, Clone, Copy, Default)]
pub struct StackInfoRenderer;

impl Processor for StackInfoRenderer {
    fn name(&self) -> &'static str {
        "stack_info_renderer"
    }

    fn process(&self, _ctx: &ProcessContext<'_>, mut record: EventRecord) -> Result<Step, ProcessorError> {
        if record.stack_info {
            record.stack_info = false;
            record.stack_text = Some(Backtrace::force_capture().to_string());
        }
        Ok(Step::Continue(record))
    }
}

/// Formats the captured exception to text. The raw [`ExceptionInfo`] stays
/// on the record so structured renderers do not reparse the text.
///
/// [`ExceptionInfo`]: crate::record::ExceptionInfo
#[derive(Debug, Clone, Copy, Default)]
pub struct ExceptionFormatter;

impl Processor for ExceptionFormatter {
    fn name(&self) -> &'static str {
        "format_exc_info"
    }

    fn process(&self, _ctx: &ProcessContext<'_>, mut record: EventRecord) -> Result<Step, ProcessorError> {
        if record.exception_text.is_none() {
            record.exception_text = record.exception.as_ref().map(|exc| exc.format_text());
        }
        Ok(Step::Continue(record))
    }
}

/// Decodes byte-valued fields into text, replacing invalid UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnicodeDecoder;

impl Processor for UnicodeDecoder {
    fn name(&self) -> &'static str {
        "unicode_decoder"
    }

    fn process(&self, _ctx: &ProcessContext<'_>, mut record: EventRecord) -> Result<Step, ProcessorError> {
        for (key, bytes) in std::mem::take(&mut record.byte_fields) {
            let text = String::from_utf8_lossy(&bytes).into_owned();
            record.set_field(key, text);
        }
        Ok(Step::Continue(record))
    }
}

/// Attaches `call_site` from the record's emission frames, or from the live
/// stack when the emitter supplied none or only ignored ones.
#[derive(Debug, Clone, Default)]
pub struct CallSiteAnnotator {
    resolver: CallSiteResolver,
}

impl CallSiteAnnotator {
    pub fn new(resolver: CallSiteResolver) -> Self {
        Self { resolver }
    }
}

impl Processor for CallSiteAnnotator {
    fn name(&self) -> &'static str {
        "add_module_and_lineno"
    }

    fn process(&self, _ctx: &ProcessContext<'_>, mut record: EventRecord) -> Result<Step, ProcessorError> {
        record.call_site = Some(self.resolver.resolve_or_current(&record.frames));
        Ok(Step::Continue(record))
    }
}

/// Sends a copy of qualifying records to the external collector.
///
/// Records below the collector threshold but at or above the breadcrumb
/// level are remembered per logger and attached to that logger's next
/// report. Never blocks and never fails the chain: forwarding problems are
/// handled inside [`CollectorForwarder`].
pub struct CollectorForward {
    forwarder: CollectorForwarder,
    min_level: Level,
    breadcrumb_level: Level,
    breadcrumbs: BreadcrumbTrail,
    ignored_loggers: BTreeSet<String>,
    tag_keys: Vec<String>,
}

impl CollectorForward {
    pub fn new(forwarder: CollectorForwarder) -> Self {
        Self {
            forwarder,
            min_level: Level::Error,
            breadcrumb_level: Level::Info,
            breadcrumbs: BreadcrumbTrail::default(),
            ignored_loggers: BTreeSet::new(),
            tag_keys: Vec::new(),
        }
    }

    pub fn min_level(mut self, level: Level) -> Self {
        self.min_level = level;
        self
    }

    /// Lowest level kept as a breadcrumb and the per-logger trail length.
    pub fn breadcrumbs(mut self, level: Level, capacity: usize) -> Self {
        self.breadcrumb_level = level;
        self.breadcrumbs = BreadcrumbTrail::new(capacity);
        self
    }

    pub fn ignore_loggers<I, S>(mut self, loggers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored_loggers.extend(loggers.into_iter().map(Into::into));
        self
    }

    /// Extra fields promoted to collector tags.
    pub fn tag_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tag_keys.extend(keys.into_iter().map(Into::into));
        self
    }
}

impl Processor for CollectorForward {
    fn name(&self) -> &'static str {
        "collector_forward"
    }

    fn process(&self, _ctx: &ProcessContext<'_>, record: EventRecord) -> Result<Step, ProcessorError> {
        if self.ignored_loggers.contains(record.logger_name()) {
            return Ok(Step::Continue(record));
        }
        if record.level() >= self.min_level {
            let report = ErrorReport::from_record(&record, self.forwarder.environment(), &self.tag_keys)
                .with_breadcrumbs(self.breadcrumbs.take(record.logger_name()));
            self.forwarder.forward(report);
        } else if record.level() >= self.breadcrumb_level {
            self.breadcrumbs.record(Breadcrumb::from_record(&record));
        }
        Ok(Step::Continue(record))
    }
}

/// Settings for [`standard_chain`].
#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub min_level: Level,
    pub logger_levels: Vec<(String, Level)>,
    pub excluded_paths: Vec<String>,
    pub resolver: CallSiteResolver,
    pub collector_min_level: Level,
    pub collector_ignored_loggers: Vec<String>,
    pub collector_tag_keys: Vec<String>,
    pub collector_breadcrumb_level: Level,
    pub collector_max_breadcrumbs: usize,
    /// Stamp every record with this instant instead of the clock.
    pub fixed_time: Option<DateTime<Utc>>,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            min_level: Level::Debug,
            logger_levels: Vec::new(),
            excluded_paths: Vec::new(),
            resolver: CallSiteResolver::default(),
            collector_min_level: Level::Error,
            collector_ignored_loggers: Vec::new(),
            collector_tag_keys: Vec::new(),
            collector_breadcrumb_level: Level::Info,
            collector_max_breadcrumbs: 100,
            fixed_time: None,
        }
    }
}

/// Build the ten-stage chain. Without a forwarder the final stage is omitted.
pub fn standard_chain(settings: &ChainSettings, forwarder: Option<CollectorForwarder>) -> ProcessorChain {
    let level_filter = settings
        .logger_levels
        .iter()
        .fold(LevelFilter::new(settings.min_level), |filter, (logger, level)| {
            filter.with_logger(logger.clone(), *level)
        });
    let stamper = match settings.fixed_time {
        Some(at) => TimeStamper::fixed(at),
        None => TimeStamper::default(),
    };

    let mut chain = ProcessorChain::new()
        .with(RequestPathFilter::new(settings.excluded_paths.iter().cloned()))
        .with(level_filter)
        .with(stamper)
        .with(LevelNameNormalizer)
        .with(PositionalArgsFormatter)
        .with(StackInfoRenderer)
        .with(ExceptionFormatter)
        .with(UnicodeDecoder)
        .with(CallSiteAnnotator::new(settings.resolver.clone()));

    if let Some(forwarder) = forwarder {
        chain.push(
            CollectorForward::new(forwarder)
                .min_level(settings.collector_min_level)
                .breadcrumbs(settings.collector_breadcrumb_level, settings.collector_max_breadcrumbs)
                .ignore_loggers(settings.collector_ignored_loggers.iter().cloned())
                .tag_keys(settings.collector_tag_keys.iter().cloned()),
        );
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ExceptionInfo, StackFrame};
    use serde_json::json;

    const CTX: ProcessContext<'static> = ProcessContext {
        logger: "app",
        method: "info",
    };

    fn run<P: Processor>(processor: &P, record: EventRecord) -> Option<EventRecord> {
        match processor.process(&CTX, record).expect("processor failed") {
            Step::Continue(record) => Some(record),
            Step::Drop => None,
        }
    }

    #[test]
    fn request_path_filter_drops_excluded_paths() {
        let filter = RequestPathFilter::new(["/health", ""]);
        let mut record = EventRecord::new(Level::Info, "app", "request");
        record.set_field(REQUEST_PATH_FIELD, "/api/health/live");
        assert!(run(&filter, record).is_none());

        let mut record = EventRecord::new(Level::Info, "app", "request");
        record.set_field(REQUEST_PATH_FIELD, "/api/orders");
        assert!(run(&filter, record).is_some());
        assert!(run(&filter, EventRecord::new(Level::Info, "app", "no path")).is_some());
    }

    #[test]
    fn level_filter_uses_longest_logger_prefix() {
        let filter = LevelFilter::new(Level::Info)
            .with_logger("app", Level::Warning)
            .with_logger("app::db", Level::Debug);
        assert_eq!(filter.min_level_for("app::db::pool"), Level::Debug);
        assert_eq!(filter.min_level_for("app.http"), Level::Warning);
        assert_eq!(filter.min_level_for("application"), Level::Info);
        assert_eq!(filter.min_level_for("other"), Level::Info);
    }

    #[test]
    fn level_filter_is_monotonic() {
        let filter = LevelFilter::new(Level::Warning);
        for level in Level::ALL {
            let kept = run(&filter, EventRecord::new(level, "app", "x")).is_some();
            assert_eq!(kept, level >= Level::Warning, "level {}", level);
        }
    }

    #[test]
    fn positional_args_are_merged_and_discarded() {
        let mut record = EventRecord::new(Level::Info, "app", "user %s logged in %d times (%r) 100%%");
        record.positional_args = vec![json!("ana"), json!(3), json!("web")];
        let record = run(&PositionalArgsFormatter, record).unwrap();
        assert_eq!(record.message_text(), "user ana logged in 3 times (\"web\") 100%");
        assert!(record.positional_args.is_empty());
    }

    #[test]
    fn positional_args_type_mismatch_is_a_fault() {
        let mut record = EventRecord::new(Level::Info, "app", "count %d");
        record.positional_args = vec![json!("many")];
        assert!(PositionalArgsFormatter.process(&CTX, record).is_err());
    }

    #[test]
    fn missing_positional_args_leave_placeholder() {
        let mut record = EventRecord::new(Level::Info, "app", "%s and %s");
        record.positional_args = vec![json!("one")];
        let record = run(&PositionalArgsFormatter, record).unwrap();
        assert_eq!(record.message_text(), "one and %s");
    }

    #[test]
    fn exception_formatter_keeps_raw_exception() {
        let mut record = EventRecord::new(Level::Error, "app", "failed");
        record.exception = Some(ExceptionInfo::new("ZeroDivision", "division by zero"));
        let record = run(&ExceptionFormatter, record).unwrap();
        assert_eq!(record.exception_text.as_deref(), Some("ZeroDivision: division by zero"));
        assert!(record.exception.is_some());
    }

    #[test]
    fn unicode_decoder_replaces_invalid_bytes() {
        let mut record = EventRecord::new(Level::Info, "app", "bytes");
        record.byte_fields.push(("body".into(), b"caf\xc3\xa9 \xff".to_vec()));
        let record = run(&UnicodeDecoder, record).unwrap();
        assert_eq!(record.field("body"), Some(&json!("café \u{fffd}")));
        assert!(record.byte_fields.is_empty());
    }

    #[test]
    fn stack_info_is_rendered_once() {
        let mut record = EventRecord::new(Level::Info, "app", "where");
        record.stack_info = true;
        let record = run(&StackInfoRenderer, record).unwrap();
        assert!(record.stack_text.is_some());
        assert!(!record.stack_info);
    }

    #[test]
    fn call_site_annotator_uses_emission_frames() {
        let mut record = EventRecord::new(Level::Info, "app", "here");
        record.frames = vec![
            StackFrame::new("tracing_dual_sink::logger", 10),
            StackFrame::new("shop::cart", 31),
        ];
        let record = run(&CallSiteAnnotator::default(), record).unwrap();
        assert_eq!(record.call_site.unwrap().to_string(), "shop::cart:31");
    }

    #[test]
    fn standard_chain_order() {
        let chain = standard_chain(&ChainSettings::default(), None);
        assert_eq!(
            chain.names(),
            vec![
                "request_path_filter",
                "level_filter",
                "timestamper",
                "add_log_level",
                "positional_args_formatter",
                "stack_info_renderer",
                "format_exc_info",
                "unicode_decoder",
                "add_module_and_lineno",
            ]
        );
    }
}
