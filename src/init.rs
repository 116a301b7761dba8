use crate::backend::{make_collector, parse_dsn};
use crate::collector::{CollectorForwarder, ErrorCollector, ForwarderConfig};
use crate::config::PipelineConfig;
use crate::diagnostics::{Fallback, StderrFallback};
use crate::error::ConfigError;
use crate::layer::PipelineLayer;
use crate::logger::Logger;
use crate::pipeline::Pipeline;
use crate::processors::standard_chain;
use crate::render::PlainTextRenderer;
use crate::router::{Destination, SinkRouter};
use crate::sink::{FileSink, LineSink, WriterSink};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

/// Handle returned by [`init_logging`].
///
/// Keeps the shared pipeline reachable for structured loggers and owns the
/// collector delivery task.
pub struct LoggingHandle {
    pipeline: Arc<Pipeline>,
    forwarder: CollectorForwarder,
    /// Background task delivering collector reports.
    pub collector_task: JoinHandle<()>,
}

impl LoggingHandle {
    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn forwarder(&self) -> &CollectorForwarder {
        &self.forwarder
    }

    /// Structured logger sharing the installed pipeline.
    pub fn logger(&self, name: impl Into<String>) -> Logger {
        Logger::new(name, Arc::clone(&self.pipeline))
    }
}

/// Open every configured destination and build the router.
///
/// With `config.stdout`, a plain-text `stdout` destination at the global
/// minimum level is added after the files.
///
/// **Returns**
/// - `Err(ConfigError::Destination)` if a file cannot be opened; no
///   destination is half-configured in that case.
pub fn build_router(config: &PipelineConfig, fallback: Arc<dyn Fallback>) -> Result<SinkRouter, ConfigError> {
    let mut router = SinkRouter::new(fallback);
    for dest in &config.destinations {
        let sink = FileSink::open(&dest.path).map_err(|source| ConfigError::Destination {
            path: dest.path.clone(),
            source,
        })?;
        router = router.with(Destination {
            name: dest.format.name().to_string(),
            min_level: dest.min_level,
            renderer: dest.format.renderer(),
            sink: Arc::new(sink) as Arc<dyn LineSink>,
        });
    }
    if config.stdout {
        router = router.with(Destination::new(
            "stdout",
            config.min_level,
            PlainTextRenderer,
            WriterSink::stdout(),
        ));
    }
    Ok(router)
}

/// Build the full pipeline (chain, router, collector forwarder) for
/// `config` with an explicit collector.
///
/// The forwarder task is spawned on the current Tokio runtime; without one
/// this returns `Err(ConfigError::NoRuntime)` before opening anything.
pub fn build_pipeline(
    config: &PipelineConfig,
    collector: Arc<dyn ErrorCollector>,
    fallback: Arc<dyn Fallback>,
) -> Result<(Arc<Pipeline>, CollectorForwarder, JoinHandle<()>), ConfigError> {
    tokio::runtime::Handle::try_current().map_err(|_| ConfigError::NoRuntime)?;
    let router = build_router(config, Arc::clone(&fallback))?;
    let (forwarder, handle) = CollectorForwarder::spawn(
        collector,
        ForwarderConfig {
            buffer: config.collector.buffer,
            timeout: config.collector.timeout,
            environment: Some(config.collector.environment.clone()),
        },
        Arc::clone(&fallback),
    );
    let chain = standard_chain(&config.chain_settings(), Some(forwarder.clone()));
    let pipeline = Arc::new(Pipeline::with_fallback(chain, router, fallback));
    Ok((pipeline, forwarder, handle))
}

/// Initialize the global `tracing` subscriber from `config`.
///
/// **Effects**
///
/// Installs a [`Registry`] combined with [`PipelineLayer`] as the global
/// default subscriber, so `tracing` events and [`Logger`] emissions share
/// one pipeline, stdout output included.
///
/// **Errors**
///
/// Any [`ConfigError`]: unknown collector scheme, no Tokio runtime,
/// destination that cannot be opened, or a subscriber that is already
/// installed.
pub fn init_logging_with_config(config: &PipelineConfig) -> Result<LoggingHandle, ConfigError> {
    let target = parse_dsn(&config.collector.dsn)?;
    let collector = make_collector(&target, &config.collector.environment)?;
    let (pipeline, forwarder, collector_task) = build_pipeline(config, collector, Arc::new(StderrFallback))?;

    let subscriber = Registry::default().with(PipelineLayer::new(Arc::clone(&pipeline)));
    tracing::subscriber::set_global_default(subscriber).map_err(|_| ConfigError::SubscriberInstalled)?;

    Ok(LoggingHandle {
        pipeline,
        forwarder,
        collector_task,
    })
}

/// Initialize logging from environment variables.
///
/// Equivalent to [`PipelineConfig::from_env`] followed by
/// [`init_logging_with_config`]. A missing `COLLECTOR_DSN` fails here,
/// before anything is emitted. Call from inside a Tokio runtime.
pub fn init_logging() -> Result<LoggingHandle, ConfigError> {
    let config = PipelineConfig::from_env()?;
    init_logging_with_config(&config)
}
