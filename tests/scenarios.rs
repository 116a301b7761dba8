use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing_dual_sink::callsite::CallSiteResolver;
use tracing_dual_sink::collector::{CollectorForwarder, ForwarderConfig, MemoryCollector};
use tracing_dual_sink::config::PipelineConfig;
use tracing_dual_sink::diagnostics::MemoryFallback;
use tracing_dual_sink::error::ProcessorError;
use tracing_dual_sink::init::build_pipeline;
use tracing_dual_sink::layer::PipelineLayer;
use tracing_dual_sink::level::Level;
use tracing_dual_sink::logger::Logger;
use tracing_dual_sink::pipeline::{EmitOutcome, Pipeline};
use tracing_dual_sink::processor::{fn_processor, ProcessorChain, Step};
use tracing_dual_sink::processors::{
    standard_chain, ChainSettings, ExceptionFormatter, LevelNameNormalizer, TimeStamper,
};
use tracing_dual_sink::record::{ExceptionInfo, StackFrame};
use tracing_dual_sink::render::{JsonRenderer, KeyValueRenderer, PlainTextRenderer};
use tracing_dual_sink::router::{Destination, SinkRouter};
use tracing_dual_sink::sink::MemorySink;
use tracing_subscriber::layer::SubscriberExt;

#[path = "support/log_helpers.rs"]
mod log_helpers;

struct Harness {
    logger: Logger,
    text: MemorySink,
    kv: MemorySink,
    json: MemorySink,
    collector: MemoryCollector,
    forwarder: CollectorForwarder,
    fallback: Arc<MemoryFallback>,
}

impl Harness {
    fn new(settings: ChainSettings) -> Self {
        let text = MemorySink::new();
        let kv = MemorySink::new();
        let json = MemorySink::new();
        let collector = MemoryCollector::new();
        let fallback = Arc::new(MemoryFallback::new());

        let (forwarder, _handle) = CollectorForwarder::spawn(
            Arc::new(collector.clone()),
            ForwarderConfig {
                environment: Some("test".to_string()),
                ..ForwarderConfig::default()
            },
            fallback.clone(),
        );
        let router = SinkRouter::new(fallback.clone())
            .with(Destination::new("text", Level::Info, PlainTextRenderer, text.clone()))
            .with(Destination::new("kv", Level::Debug, KeyValueRenderer::default(), kv.clone()))
            .with(Destination::new("json", Level::Debug, JsonRenderer, json.clone()));
        let chain = standard_chain(&settings, Some(forwarder.clone()));
        let pipeline = Pipeline::with_fallback(chain, router, fallback.clone());

        Self {
            logger: Logger::new("app", Arc::new(pipeline)),
            text,
            kv,
            json,
            collector,
            forwarder,
            fallback,
        }
    }

    fn min_level(level: Level) -> Self {
        Self::new(ChainSettings {
            min_level: level,
            ..ChainSettings::default()
        })
    }

    /// Wait until the forwarder has finished every queued report.
    async fn settle(&self) {
        for _ in 0..200 {
            let stats = self.forwarder.stats();
            if stats.delivered + stats.failed >= stats.enqueued {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn json_lines(&self) -> Vec<Value> {
        self.json
            .entries()
            .iter()
            .map(|line| serde_json::from_str(line).expect("json sink wrote invalid JSON"))
            .collect()
    }
}

#[tokio::test]
async fn structured_event_reaches_json_and_key_value_sinks() {
    let h = Harness::min_level(Level::Info);

    h.logger.info("user_login").field("user_id", 42).emit();
    h.settle().await;

    let json = h.json_lines();
    assert_eq!(json.len(), 1);
    assert_eq!(json[0]["event"], "user_login");
    assert_eq!(json[0]["level"], "info");
    assert_eq!(json[0]["user_id"], 42);
    assert!(json[0]["timestamp"].is_string());
    assert_eq!(json[0]["call_site"]["module"], "scenarios");

    let kv = h.kv.entries();
    assert_eq!(kv.len(), 1);
    for pair in ["event=user_login", "level=info", "user_id=42", "logger=app"] {
        assert!(kv[0].contains(pair), "missing {} in {}", pair, kv[0]);
    }
    assert!(kv[0].starts_with("timestamp="));

    assert_eq!(h.text.entries().len(), 1);
    assert!(h.collector.reports().is_empty());
}

#[tokio::test]
async fn error_is_reported_to_collector_and_local_sinks() {
    let h = Harness::min_level(Level::Info);

    h.logger.error("payment_failed").field("order_id", 991).emit();
    h.settle().await;

    let reports = h.collector.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].level, Level::Error);
    assert_eq!(reports[0].message, "payment_failed");
    assert_eq!(reports[0].environment.as_deref(), Some("test"));
    assert_eq!(reports[0].tags["logger"], "app");
    assert_eq!(reports[0].extra["order_id"], 991);

    assert_eq!(h.json.entries().len(), 1);
    assert_eq!(h.kv.entries().len(), 1);
    assert_eq!(h.text.entries().len(), 1);
    assert!(h.text.entries()[0].contains("[ERROR]"));
    assert!(h.fallback.messages().is_empty());
}

#[tokio::test]
async fn below_minimum_level_reaches_nothing() {
    let h = Harness::new(ChainSettings {
        min_level: Level::Info,
        collector_min_level: Level::Debug,
        ..ChainSettings::default()
    });

    assert_eq!(h.logger.debug("noop").emit(), EmitOutcome::Dropped);
    h.settle().await;

    assert!(h.json.entries().is_empty());
    assert!(h.kv.entries().is_empty());
    assert!(h.text.entries().is_empty());
    assert!(h.collector.reports().is_empty());
}

#[tokio::test]
async fn excluded_request_paths_are_fully_suppressed() {
    let h = Harness::new(ChainSettings {
        excluded_paths: vec!["/healthz".to_string()],
        ..ChainSettings::default()
    });

    h.logger
        .critical("healthcheck failed")
        .field("request_path", "/api/healthz?full=1")
        .emit();
    h.logger
        .critical("checkout failed")
        .field("request_path", "/api/checkout")
        .emit();
    h.settle().await;

    let events: Vec<_> = h.json_lines().iter().map(|v| v["event"].clone()).collect();
    assert_eq!(events, vec![Value::from("checkout failed")]);
    assert_eq!(h.kv.entries().len(), 1);
    assert_eq!(h.text.entries().len(), 1);
    let reports = h.collector.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].message, "checkout failed");
}

#[tokio::test]
async fn per_destination_levels_are_monotonic() {
    let h = Harness::min_level(Level::Debug);

    for level in Level::ALL {
        h.logger.log(level, format!("at {}", level)).emit();
    }
    h.settle().await;

    // text starts at info, kv and json at debug
    assert_eq!(h.text.entries().len(), 4);
    assert_eq!(h.kv.entries().len(), 5);
    assert_eq!(h.json.entries().len(), 5);
    assert!(h.text.entries().iter().all(|line| !line.contains("[DEBUG]")));
    // collector gets error and critical only
    assert_eq!(h.collector.reports().len(), 2);
}

#[tokio::test]
async fn exception_is_rendered_once_per_format() {
    let h = Harness::min_level(Level::Debug);
    let exc = ExceptionInfo::new("ZeroDivision", "division by zero")
        .with_frames(vec![StackFrame::new("app::views", 21)]);

    h.logger
        .error("we divided by zero and handled it")
        .exception(exc)
        .emit();
    h.settle().await;

    let text = h.text.entries().remove(0);
    assert_eq!(text.matches("ZeroDivision: division by zero").count(), 1);
    assert!(text.ends_with("\n  at app::views:21"));

    let json = h.json_lines().remove(0);
    assert_eq!(json["exception"]["kind"], "ZeroDivision");
    assert_eq!(json["exception"]["frames"][0]["line"], 21);
    assert_eq!(h.json.entries()[0].matches("division by zero").count(), 1);

    assert!(h.kv.entries()[0].contains("exception=\"ZeroDivision: division by zero\\n  at app::views:21\""));

    let reports = h.collector.reports();
    assert_eq!(reports[0].exception.as_ref().map(|e| e.kind.as_str()), Some("ZeroDivision"));
}

#[tokio::test]
async fn mapping_and_positional_callers_converge() {
    let h = Harness::min_level(Level::Debug);

    let mut event = serde_json::Map::new();
    event.insert("event".into(), Value::from("user 7 logged in"));
    event.insert("user_id".into(), Value::from(7));
    h.logger.info(event).emit();
    h.logger.info("user %s logged in").args([7]).field("user_id", 7).emit();

    let json = h.json_lines();
    assert_eq!(json[0]["event"], json[1]["event"]);
    assert_eq!(json[0]["user_id"], json[1]["user_id"]);
}

#[tokio::test]
async fn mapping_event_key_takes_precedence_over_message() {
    let h = Harness::min_level(Level::Debug);

    let mut event = serde_json::Map::new();
    event.insert("message".into(), Value::from("free text"));
    event.insert("event".into(), Value::from("user_login"));
    h.logger.info(event).emit();

    let json = h.json_lines().remove(0);
    assert_eq!(json["event"], "user_login");
    assert_eq!(json["message"], "free text");
}

#[tokio::test]
async fn info_records_become_breadcrumbs_of_the_next_error() {
    let h = Harness::min_level(Level::Debug);

    h.logger.debug("cache miss").emit();
    for i in 1..=3 {
        h.logger.info(format!("breadcrumb {}", i)).emit();
    }
    h.logger.error("we divided by zero").emit();
    h.logger.error("second failure").emit();
    h.settle().await;

    let reports = h.collector.reports();
    assert_eq!(reports.len(), 2);
    let crumbs: Vec<_> = reports[0].breadcrumbs.iter().map(|c| c.message.as_str()).collect();
    assert_eq!(crumbs, vec!["breadcrumb 1", "breadcrumb 2", "breadcrumb 3"]);
    assert!(reports[0].breadcrumbs.iter().all(|c| c.level == Level::Info));
    assert!(reports[1].breadcrumbs.is_empty());
}

#[test]
fn logging_wrappers_are_skipped_when_resolving_call_sites() {
    let json = MemorySink::new();
    let settings = ChainSettings {
        resolver: CallSiteResolver::default().ignore("scenarios::log_helpers"),
        ..ChainSettings::default()
    };
    let router = SinkRouter::default().with(Destination::new("json", Level::Debug, JsonRenderer, json.clone()));
    let pipeline = Arc::new(Pipeline::new(standard_chain(&settings, None), router));
    let logger = Logger::new("app", Arc::clone(&pipeline));
    let subscriber = tracing_subscriber::registry().with(PipelineLayer::new(Arc::clone(&pipeline)));

    tracing::subscriber::with_default(subscriber, || log_helpers::report_failure(7));
    log_helpers::warn_stock_low(&logger);

    let entries = json.entries();
    assert_eq!(entries.len(), 2);
    for line in &entries {
        let parsed: Value = serde_json::from_str(line).unwrap();
        assert_eq!(parsed["call_site"]["module"], "scenarios", "in {}", line);
        assert!(parsed["call_site"]["line"].as_u64().unwrap() > 0);
    }
}

#[tokio::test]
async fn bytes_and_bound_context_are_rendered_as_text() {
    let h = Harness::min_level(Level::Debug);
    let request_log = h.logger.bind("request_id", "r-17");

    request_log.info("upload").bytes_field("name", b"r\xc3\xa9sum\xc3\xa9.pdf".to_vec()).emit();

    let json = h.json_lines().remove(0);
    assert_eq!(json["request_id"], "r-17");
    assert_eq!(json["name"], "résumé.pdf");
}

#[test]
fn processor_fault_drops_one_record_and_recovers() {
    let sink = MemorySink::new();
    let fallback = Arc::new(MemoryFallback::new());
    let chain = ProcessorChain::new()
        .with(TimeStamper::default())
        .with(LevelNameNormalizer)
        .with(fn_processor("fragile", |_, record| {
            if record.field("poison").is_some() {
                panic!("unexpected field");
            }
            Ok(Step::Continue(record))
        }))
        .with(ExceptionFormatter);
    let router = SinkRouter::new(fallback.clone()).with(Destination::new(
        "json",
        Level::Debug,
        JsonRenderer,
        sink.clone(),
    ));
    let logger = Logger::new("app", Arc::new(Pipeline::with_fallback(chain, router, fallback.clone())));

    assert_eq!(logger.info("first").field("poison", true).emit(), EmitOutcome::Faulted);
    assert!(matches!(logger.info("second").emit(), EmitOutcome::Delivered(_)));

    let entries = sink.entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].contains("\"event\":\"second\""));
    let diagnostics = fallback.messages();
    assert_eq!(diagnostics.len(), 1);
    assert!(diagnostics[0].contains("fragile"));
    assert!(diagnostics[0].contains("unexpected field"));
}

#[test]
fn processor_errors_are_not_raised_to_the_caller() {
    let fallback = Arc::new(MemoryFallback::new());
    let chain = ProcessorChain::new().with(fn_processor("strict", |_, _| {
        Err(ProcessorError::failed("strict", "rejected"))
    }));
    let pipeline = Arc::new(Pipeline::with_fallback(
        chain,
        SinkRouter::new(fallback.clone()),
        fallback.clone(),
    ));
    let logger = Logger::new("app", Arc::clone(&pipeline));

    for _ in 0..3 {
        assert_eq!(logger.warning("x").emit(), EmitOutcome::Faulted);
    }
    assert_eq!(fallback.messages().len(), 3);
    assert_eq!(pipeline.stats().faulted, 3);
    assert_eq!(pipeline.stats().emitted, 0);
}

#[tokio::test]
async fn file_destinations_from_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let text_path = dir.path().join("logs").join("app.log");
    let json_path = dir.path().join("logs").join("app.json.log");
    let kv_path = dir.path().join("logs").join("app.kv.log");
    let vars = [
        ("COLLECTOR_DSN", "noop://".to_string()),
        ("LOG_LEVEL", "info".to_string()),
        ("LOG_JSON_LEVEL", "debug".to_string()),
        ("LOG_TEXT_PATH", text_path.display().to_string()),
        ("LOG_JSON_PATH", json_path.display().to_string()),
        ("LOG_KV_PATH", kv_path.display().to_string()),
    ];
    let config = PipelineConfig::from_lookup(|key| {
        vars.iter().find(|(k, _)| *k == key).map(|(_, v)| v.clone())
    })
    .unwrap()
    .with_logger_level("app::db", Level::Debug);

    let collector = MemoryCollector::new();
    let fallback = Arc::new(MemoryFallback::new());
    let (pipeline, _forwarder, _task) =
        build_pipeline(&config, Arc::new(collector.clone()), fallback.clone()).unwrap();

    let app = Logger::new("app", Arc::clone(&pipeline));
    let db = Logger::new("app::db", Arc::clone(&pipeline));
    app.debug("suppressed by global level").emit();
    db.debug("pool warmed").field("size", 8).emit();
    app.info("user_login").field("user_id", 42).emit();
    pipeline.flush();

    let text = std::fs::read_to_string(&text_path).unwrap();
    let json = std::fs::read_to_string(&json_path).unwrap();
    let kv = std::fs::read_to_string(&kv_path).unwrap();

    // per-logger override lets app::db debug through the chain, but only
    // the JSON destination accepts debug
    assert_eq!(text.lines().count(), 1);
    assert!(text.contains("[INFO][scenarios:"));
    assert_eq!(json.lines().count(), 2);
    assert_eq!(kv.lines().count(), 1);
    for line in json.lines() {
        let parsed: Value = serde_json::from_str(line).unwrap();
        assert!(parsed.get("timestamp").is_some());
        assert!(parsed.get("level").is_some());
        assert!(parsed.get("event").is_some());
    }
    assert!(!json.contains("suppressed by global level"));
    assert!(fallback.messages().is_empty());
}
