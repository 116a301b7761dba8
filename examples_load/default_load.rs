use std::sync::Arc;
use std::time::Instant;

use tracing_dual_sink::collector::{CollectorForwarder, ForwarderConfig, NoopCollector};
use tracing_dual_sink::diagnostics::StderrFallback;
use tracing_dual_sink::level::Level;
use tracing_dual_sink::logger::Logger;
use tracing_dual_sink::noop_sink::NoopSink;
use tracing_dual_sink::pipeline::Pipeline;
use tracing_dual_sink::processors::{standard_chain, ChainSettings};
use tracing_dual_sink::render::{JsonRenderer, KeyValueRenderer, PlainTextRenderer};
use tracing_dual_sink::router::{Destination, SinkRouter};

#[tokio::main]
async fn main() {
    let (forwarder, _handle) = CollectorForwarder::spawn(
        Arc::new(NoopCollector),
        ForwarderConfig::default(),
        Arc::new(StderrFallback),
    );
    let router = SinkRouter::default()
        .with(Destination::new("text", Level::Info, PlainTextRenderer, NoopSink))
        .with(Destination::new("kv", Level::Info, KeyValueRenderer::default(), NoopSink))
        .with(Destination::new("json", Level::Debug, JsonRenderer, NoopSink));
    let chain = standard_chain(&ChainSettings::default(), Some(forwarder));
    let logger = Logger::new("load", Arc::new(Pipeline::new(chain, router)));

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        logger.info("load_test_event").field("iteration", i).emit();
    }

    let elapsed = start.elapsed();
    println!("default config: emitted {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );
}
