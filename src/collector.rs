use crate::diagnostics::Fallback;
use crate::error::CollectorError;
use crate::level::Level;
use crate::record::{value_to_text, EventRecord, ExceptionInfo, Fields};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

/// Envelope handed to an [`ErrorCollector`].
///
/// Built after the record went through every enriching processor, so it
/// carries the timestamp, call site and decoded fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub level: Level,
    pub message: String,
    pub logger: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub tags: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exception: Option<ExceptionInfo>,
    pub extra: Fields,
    /// Recent lower-level records of the same logger, oldest first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub breadcrumbs: Vec<Breadcrumb>,
}

impl ErrorReport {
    /// Build a report from a processed record. `tag_keys` selects extra
    /// fields that are also copied into `tags`.
    pub fn from_record(record: &EventRecord, environment: Option<&str>, tag_keys: &[String]) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert("logger".to_string(), record.logger_name().to_string());
        if let Some(site) = &record.call_site {
            tags.insert("module".to_string(), site.module.clone());
            tags.insert("line".to_string(), site.line.to_string());
        }
        for key in tag_keys {
            if let Some(value) = record.field(key) {
                tags.insert(key.clone(), value_to_text(value));
            }
        }

        Self {
            level: record.level(),
            message: record.message_text(),
            logger: record.logger_name().to_string(),
            environment: environment.map(str::to_string),
            timestamp: record.timestamp(),
            tags,
            exception: record.exception.clone(),
            extra: record.extra.clone(),
            breadcrumbs: Vec::new(),
        }
    }

    pub fn with_breadcrumbs(mut self, breadcrumbs: Vec<Breadcrumb>) -> Self {
        self.breadcrumbs = breadcrumbs;
        self
    }
}

/// Summary of a record that was not itself reported, kept as context for
/// the next report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Breadcrumb {
    pub level: Level,
    pub logger: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Breadcrumb {
    pub fn from_record(record: &EventRecord) -> Self {
        Self {
            level: record.level(),
            logger: record.logger_name().to_string(),
            message: record.message_text(),
            timestamp: record.timestamp(),
        }
    }
}

/// Bounded per-logger buffers of recent breadcrumbs.
///
/// Each logger keeps at most `capacity` entries; the oldest is evicted
/// first. Taking a logger's trail empties it.
#[derive(Debug)]
pub struct BreadcrumbTrail {
    capacity: usize,
    trails: Mutex<HashMap<String, VecDeque<Breadcrumb>>>,
}

impl Default for BreadcrumbTrail {
    fn default() -> Self {
        Self::new(100)
    }
}

impl BreadcrumbTrail {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            trails: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, crumb: Breadcrumb) {
        if self.capacity == 0 {
            return;
        }
        let mut trails = match self.trails.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let trail = trails.entry(crumb.logger.clone()).or_default();
        if trail.len() == self.capacity {
            trail.pop_front();
        }
        trail.push_back(crumb);
    }

    pub fn take(&self, logger: &str) -> Vec<Breadcrumb> {
        let mut trails = match self.trails.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        trails.remove(logger).map(Vec::from).unwrap_or_default()
    }
}

/// External error-aggregation service.
///
/// Called from the forwarder's background task, never on the emitting
/// thread. Retries and queueing inside the client are its own business; the
/// forwarder gives every call a single attempt bounded by a timeout.
#[async_trait]
pub trait ErrorCollector: Send + Sync {
    async fn report(&self, report: &ErrorReport) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Collector that accepts and discards every report.
#[derive(Clone, Default)]
pub struct NoopCollector;

#[async_trait]
impl ErrorCollector for NoopCollector {
    async fn report(&self, _report: &ErrorReport) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }
}

/// Collector that keeps reports in memory.
#[derive(Clone, Default)]
pub struct MemoryCollector {
    reports: Arc<Mutex<Vec<ErrorReport>>>,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<ErrorReport> {
        match self.reports.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl ErrorCollector for MemoryCollector {
    async fn report(&self, report: &ErrorReport) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut guard = self.reports.lock().map_err(|_| "memory collector poisoned")?;
        guard.push(report.clone());
        Ok(())
    }
}

/// Settings for [`CollectorForwarder::spawn`].
#[derive(Clone, Debug)]
pub struct ForwarderConfig {
    /// Reports queued before new ones are dropped.
    pub buffer: usize,
    /// Upper bound for a single `report` call.
    pub timeout: Duration,
    /// Deployment environment tag attached to every report.
    pub environment: Option<String>,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            buffer: 256,
            timeout: Duration::from_secs(5),
            environment: None,
        }
    }
}

/// Forwarding counters.
#[derive(Debug, Default)]
pub struct ForwarderStats {
    /// Accepted into the queue.
    pub enqueued: AtomicU64,
    /// Dropped because the queue was full or the task had stopped.
    pub dropped: AtomicU64,
    /// Acknowledged by the collector.
    pub delivered: AtomicU64,
    /// Rejected by the collector or timed out.
    pub failed: AtomicU64,
}

/// Point-in-time copy of [`ForwarderStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ForwarderSnapshot {
    pub enqueued: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl ForwarderStats {
    pub fn snapshot(&self) -> ForwarderSnapshot {
        ForwarderSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Non-blocking handoff from the processor chain to an [`ErrorCollector`].
///
/// Reports go through a bounded channel to a background task; the emitting
/// thread only ever calls `try_send`. Cloning shares the same queue.
#[derive(Clone)]
pub struct CollectorForwarder {
    sender: mpsc::Sender<ErrorReport>,
    environment: Option<Arc<str>>,
    stats: Arc<ForwarderStats>,
    fallback: Arc<dyn Fallback>,
}

impl CollectorForwarder {
    /// Spawn the delivery task on the current Tokio runtime.
    ///
    /// The task ends once every clone of the forwarder is dropped and the
    /// queue is drained.
    pub fn spawn(
        collector: Arc<dyn ErrorCollector>,
        config: ForwarderConfig,
        fallback: Arc<dyn Fallback>,
    ) -> (Self, JoinHandle<()>) {
        let buffer = config.buffer.max(16);
        let limit = if config.timeout < Duration::from_millis(10) {
            Duration::from_millis(10)
        } else {
            config.timeout
        };

        let (tx, mut rx) = mpsc::channel::<ErrorReport>(buffer);
        let stats = Arc::new(ForwarderStats::default());

        let stats_bg = Arc::clone(&stats);
        let fallback_bg = Arc::clone(&fallback);
        let handle = tokio::spawn(async move {
            while let Some(report) = rx.recv().await {
                match timeout(limit, collector.report(&report)).await {
                    Ok(Ok(())) => {
                        stats_bg.delivered.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(Err(e)) => {
                        stats_bg.failed.fetch_add(1, Ordering::Relaxed);
                        fallback_bg.report(&CollectorError::Backend(e).to_string());
                    }
                    Err(_) => {
                        stats_bg.failed.fetch_add(1, Ordering::Relaxed);
                        fallback_bg.report(&CollectorError::Timeout(limit).to_string());
                    }
                }
            }
        });

        (
            Self {
                sender: tx,
                environment: config.environment.map(Arc::from),
                stats,
                fallback,
            },
            handle,
        )
    }

    /// Queue a report. Never blocks; a full queue drops the report.
    pub fn forward(&self, report: ErrorReport) {
        match self.sender.try_send(report) {
            Ok(()) => {
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                self.fallback.report(&CollectorError::QueueFull.to_string());
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                self.fallback.report(&CollectorError::Closed.to_string());
            }
        }
    }

    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    pub fn stats(&self) -> ForwarderSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::MemoryFallback;
    use crate::record::CallSite;
    use serde_json::json;

    struct SlowCollector;

    #[async_trait]
    impl ErrorCollector for SlowCollector {
        async fn report(&self, _report: &ErrorReport) -> Result<(), Box<dyn Error + Send + Sync>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
    }

    struct FailingCollector;

    #[async_trait]
    impl ErrorCollector for FailingCollector {
        async fn report(&self, _report: &ErrorReport) -> Result<(), Box<dyn Error + Send + Sync>> {
            Err("collector unreachable".into())
        }
    }

    async fn settle(forwarder: &CollectorForwarder, expected: u64) {
        for _ in 0..200 {
            let stats = forwarder.stats();
            if stats.delivered + stats.failed >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn report(message: &str) -> ErrorReport {
        let record = EventRecord::new(Level::Error, "app", message);
        ErrorReport::from_record(&record, Some("test"), &[])
    }

    #[test]
    fn report_carries_enrichment_and_tags() {
        let mut record = EventRecord::new(Level::Error, "app.payments", "payment_failed");
        record.call_site = Some(CallSite::new("shop::pay", 17));
        record.set_field("order_id", 99);
        record.set_field("tenant", "acme");

        let report = ErrorReport::from_record(&record, Some("prod"), &["tenant".to_string()]);

        assert_eq!(report.message, "payment_failed");
        assert_eq!(report.environment.as_deref(), Some("prod"));
        assert_eq!(report.tags["logger"], "app.payments");
        assert_eq!(report.tags["module"], "shop::pay");
        assert_eq!(report.tags["line"], "17");
        assert_eq!(report.tags["tenant"], "acme");
        assert!(!report.tags.contains_key("order_id"));
        assert_eq!(report.extra["order_id"], json!(99));
    }

    #[test]
    fn breadcrumb_trail_is_bounded_and_per_logger() {
        let trail = BreadcrumbTrail::new(2);
        for message in ["breadcrumb 1", "breadcrumb 2", "breadcrumb 3"] {
            trail.record(Breadcrumb::from_record(&EventRecord::new(Level::Info, "app", message)));
        }
        trail.record(Breadcrumb::from_record(&EventRecord::new(Level::Info, "worker", "tick")));

        let crumbs: Vec<_> = trail.take("app").into_iter().map(|c| c.message).collect();
        assert_eq!(crumbs, vec!["breadcrumb 2", "breadcrumb 3"]);
        assert!(trail.take("app").is_empty());
        assert_eq!(trail.take("worker").len(), 1);
    }

    #[tokio::test]
    async fn delivers_reports_in_background() {
        let collector = MemoryCollector::new();
        let fallback = Arc::new(MemoryFallback::new());
        let (forwarder, _handle) =
            CollectorForwarder::spawn(Arc::new(collector.clone()), ForwarderConfig::default(), fallback.clone());

        forwarder.forward(report("payment_failed"));
        settle(&forwarder, 1).await;

        let reports = collector.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].message, "payment_failed");
        assert!(fallback.messages().is_empty());
    }

    #[tokio::test]
    async fn slow_collector_times_out_without_blocking() {
        let fallback = Arc::new(MemoryFallback::new());
        let config = ForwarderConfig {
            timeout: Duration::from_millis(20),
            ..ForwarderConfig::default()
        };
        let (forwarder, _handle) = CollectorForwarder::spawn(Arc::new(SlowCollector), config, fallback.clone());

        let started = std::time::Instant::now();
        forwarder.forward(report("slow"));
        assert!(started.elapsed() < Duration::from_millis(20));

        settle(&forwarder, 1).await;
        assert_eq!(forwarder.stats().failed, 1);
        assert_eq!(fallback.messages().len(), 1);
        assert!(fallback.messages()[0].contains("did not answer"));
    }

    #[tokio::test]
    async fn failures_are_reported_once_and_not_retried() {
        let fallback = Arc::new(MemoryFallback::new());
        let (forwarder, _handle) =
            CollectorForwarder::spawn(Arc::new(FailingCollector), ForwarderConfig::default(), fallback.clone());

        forwarder.forward(report("a"));
        forwarder.forward(report("b"));
        settle(&forwarder, 2).await;

        let stats = forwarder.stats();
        assert_eq!(stats.enqueued, 2);
        assert_eq!(stats.failed, 2);
        assert_eq!(fallback.messages().len(), 2);
    }
}
