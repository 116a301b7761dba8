use crate::collector::{Breadcrumb, ErrorCollector, ErrorReport};
use crate::error::ConfigError;
use crate::level::Level;
use crate::record::ExceptionInfo;
use async_trait::async_trait;
use sentry::protocol::{Event, Exception, Frame, Stacktrace};
use std::error::Error;
use std::sync::Arc;
use std::time::SystemTime;

/// Collector backed by the Sentry SDK.
///
/// Uses its own [`sentry::Hub`] so it does not depend on (or disturb) a
/// process-wide Sentry setup. Delivery, batching and retries are handled by
/// the SDK's transport.
#[derive(Clone)]
pub struct SentryCollector {
    hub: Arc<sentry::Hub>,
}

impl SentryCollector {
    pub fn new(dsn: &str, environment: &str) -> Result<Self, ConfigError> {
        let dsn = dsn
            .parse::<sentry::types::Dsn>()
            .map_err(|e| ConfigError::InvalidDsn(e.to_string()))?;
        let options = sentry::ClientOptions {
            dsn: Some(dsn),
            environment: Some(environment.to_string().into()),
            ..Default::default()
        };
        let client = Arc::new(sentry::Client::from(options));
        let hub = sentry::Hub::new(Some(client), Arc::new(sentry::Scope::default()));
        Ok(Self { hub: Arc::new(hub) })
    }
}

fn sentry_level(level: Level) -> sentry::Level {
    match level {
        Level::Debug => sentry::Level::Debug,
        Level::Info => sentry::Level::Info,
        Level::Warning => sentry::Level::Warning,
        Level::Error => sentry::Level::Error,
        Level::Critical => sentry::Level::Fatal,
    }
}

fn sentry_breadcrumb(crumb: &Breadcrumb) -> sentry::protocol::Breadcrumb {
    sentry::protocol::Breadcrumb {
        timestamp: crumb.timestamp.map(SystemTime::from).unwrap_or_else(SystemTime::now),
        ty: "log".into(),
        category: Some(crumb.logger.clone()),
        level: sentry_level(crumb.level),
        message: Some(crumb.message.clone()),
        ..Default::default()
    }
}

/// Sentry lists exception values innermost cause first, the reported error
/// last. Frames are stored innermost first but sent outermost first.
fn sentry_exceptions(exc: &ExceptionInfo, module: Option<String>) -> Vec<Exception> {
    let mut values: Vec<Exception> = exc
        .causes
        .iter()
        .rev()
        .map(|cause| Exception {
            ty: "Cause".into(),
            value: Some(cause.clone()),
            ..Default::default()
        })
        .collect();
    let stacktrace = if exc.frames.is_empty() {
        None
    } else {
        Some(Stacktrace {
            frames: exc
                .frames
                .iter()
                .rev()
                .map(|frame| Frame {
                    module: Some(frame.module.clone()),
                    lineno: Some(u64::from(frame.line)),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        })
    };
    values.push(Exception {
        ty: exc.kind.clone(),
        value: Some(exc.message.clone()),
        module,
        stacktrace,
        ..Default::default()
    });
    values
}

/// Map a report onto a Sentry event: tags stay tags, extra fields go to
/// `extra`, breadcrumbs and the exception chain carry over.
pub fn event_from_report(report: &ErrorReport) -> Event<'static> {
    let mut event = Event {
        message: Some(report.message.clone()),
        level: sentry_level(report.level),
        logger: Some(report.logger.clone()),
        environment: report.environment.clone().map(Into::into),
        tags: report.tags.clone(),
        extra: report.extra.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        breadcrumbs: report.breadcrumbs.iter().map(sentry_breadcrumb).collect::<Vec<_>>().into(),
        ..Default::default()
    };
    if let Some(ts) = report.timestamp {
        event.timestamp = SystemTime::from(ts);
    }
    if let Some(exc) = &report.exception {
        event.exception = sentry_exceptions(exc, report.tags.get("module").cloned()).into();
    }
    event
}

#[async_trait]
impl ErrorCollector for SentryCollector {
    async fn report(&self, report: &ErrorReport) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.hub.capture_event(event_from_report(report));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::Breadcrumb;
    use crate::record::{EventRecord, StackFrame};

    #[test]
    fn report_maps_onto_event() {
        let mut record = EventRecord::new(Level::Critical, "app", "payment_failed");
        record.exception = Some(ExceptionInfo::new("Declined", "card declined"));
        record.set_field("order_id", 7);
        let report = ErrorReport::from_record(&record, Some("staging"), &[]);

        let event = event_from_report(&report);
        assert_eq!(event.level, sentry::Level::Fatal);
        assert_eq!(event.message.as_deref(), Some("payment_failed"));
        assert_eq!(event.environment.as_deref(), Some("staging"));
        assert_eq!(event.tags["logger"], "app");
        assert_eq!(event.extra["order_id"], 7);
        assert_eq!(event.exception.values[0].ty, "Declined");
        assert!(event.breadcrumbs.values.is_empty());
    }

    #[test]
    fn breadcrumbs_and_exception_chain_carry_over() {
        let mut record = EventRecord::new(Level::Error, "app", "division failed");
        let mut exc = ExceptionInfo::new("ZeroDivision", "division by zero").with_frames(vec![
            StackFrame::new("app::math", 12),
            StackFrame::new("app::views", 40),
        ]);
        exc.causes.push("operand was zero".to_string());
        record.exception = Some(exc);
        let crumb = Breadcrumb::from_record(&EventRecord::new(Level::Info, "app", "breadcrumb 1"));
        let report = ErrorReport::from_record(&record, None, &[]).with_breadcrumbs(vec![crumb]);

        let event = event_from_report(&report);
        assert_eq!(event.breadcrumbs.values.len(), 1);
        assert_eq!(event.breadcrumbs.values[0].message.as_deref(), Some("breadcrumb 1"));
        assert_eq!(event.breadcrumbs.values[0].category.as_deref(), Some("app"));

        let values = &event.exception.values;
        assert_eq!(values.len(), 2);
        assert_eq!(values[0].value.as_deref(), Some("operand was zero"));
        assert_eq!(values[1].ty, "ZeroDivision");
        let frames = &values[1].stacktrace.as_ref().unwrap().frames;
        assert_eq!(frames[0].module.as_deref(), Some("app::views"));
        assert_eq!(frames[1].lineno, Some(12));
    }

    #[test]
    fn invalid_dsn_is_a_config_error() {
        assert!(matches!(
            SentryCollector::new("not a dsn", "test"),
            Err(ConfigError::InvalidDsn(_))
        ));
    }
}
