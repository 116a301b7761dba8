//! Structured logging pipeline shared by a context-bound [`Logger`] and
//! ordinary `tracing` events.
//!
//! Every emission becomes an [`EventRecord`], runs through an ordered
//! [`ProcessorChain`] (filtering, timestamping, interpolation, exception and
//! call-site enrichment), and is then rendered by each file destination as
//! plain text, key-value pairs or JSON. Error-level records are also handed
//! to an external [`ErrorCollector`] without blocking the caller.
//!
//! [`Logger`]: logger::Logger
//! [`EventRecord`]: record::EventRecord
//! [`ProcessorChain`]: processor::ProcessorChain
//! [`ErrorCollector`]: collector::ErrorCollector

pub mod level;
pub mod record;
pub mod error;
pub mod diagnostics;
pub mod callsite;
pub mod processor;
pub mod processors;
pub mod render;
pub mod sink;
pub mod noop_sink;
pub mod router;
pub mod collector;
pub mod pipeline;
pub mod logger;
pub mod layer;
pub mod env;
pub mod config;
pub mod backend;

#[cfg(feature = "http-collector")]
pub mod http_collector;

#[cfg(feature = "sentry")]
pub mod sentry_collector;

pub mod init;
