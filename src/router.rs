use crate::diagnostics::{Fallback, StderrFallback};
use crate::error::SinkError;
use crate::level::Level;
use crate::record::EventRecord;
use crate::render::Renderer;
use crate::sink::LineSink;
use std::sync::Arc;

/// A renderer bound to an append target with its own minimum level.
#[derive(Clone)]
pub struct Destination {
    pub name: String,
    pub min_level: Level,
    pub renderer: Arc<dyn Renderer>,
    pub sink: Arc<dyn LineSink>,
}

impl Destination {
    pub fn new<R, S>(name: impl Into<String>, min_level: Level, renderer: R, sink: S) -> Self
    where
        R: Renderer + 'static,
        S: LineSink + 'static,
    {
        Self {
            name: name.into(),
            min_level,
            renderer: Arc::new(renderer),
            sink: Arc::new(sink),
        }
    }

    pub fn accepts(&self, level: Level) -> bool {
        level >= self.min_level
    }
}

/// How one record fared across all destinations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Writes each record to every destination whose level admits it.
pub struct SinkRouter {
    destinations: Vec<Destination>,
    fallback: Arc<dyn Fallback>,
}

impl Default for SinkRouter {
    fn default() -> Self {
        Self::new(Arc::new(StderrFallback))
    }
}

impl SinkRouter {
    pub fn new(fallback: Arc<dyn Fallback>) -> Self {
        Self {
            destinations: Vec::new(),
            fallback,
        }
    }

    pub fn with(mut self, destination: Destination) -> Self {
        self.destinations.push(destination);
        self
    }

    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    /// Render and append the record to each admitting destination. A write
    /// failure is reported once on the fallback channel and does not stop
    /// delivery to the remaining destinations.
    pub fn dispatch(&self, record: &EventRecord) -> Delivery {
        let mut delivery = Delivery::default();
        for destination in &self.destinations {
            if !destination.accepts(record.level()) {
                delivery.skipped += 1;
                continue;
            }
            let line = destination.renderer.render(record);
            match destination.sink.append(&line) {
                Ok(()) => delivery.delivered += 1,
                Err(source) => {
                    delivery.failed += 1;
                    let err = SinkError {
                        destination: destination.name.clone(),
                        source,
                    };
                    self.fallback.report(&err.to_string());
                }
            }
        }
        delivery
    }

    pub fn flush(&self) {
        for destination in &self.destinations {
            if let Err(source) = destination.sink.flush() {
                let err = SinkError {
                    destination: destination.name.clone(),
                    source,
                };
                self.fallback.report(&err.to_string());
            }
        }
    }
}
