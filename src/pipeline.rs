use crate::diagnostics::{Fallback, StderrFallback};
use crate::processor::{ChainOutcome, ProcessContext, ProcessorChain};
use crate::record::EventRecord;
use crate::router::{Delivery, SinkRouter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Emission counters.
#[derive(Debug, Default)]
pub struct PipelineStats {
    /// Records that reached the router.
    pub emitted: AtomicU64,
    /// Records discarded by a filtering processor.
    pub dropped: AtomicU64,
    /// Records discarded because a processor failed.
    pub faulted: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub emitted: u64,
    pub dropped: u64,
    pub faulted: u64,
}

/// What happened to one emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitOutcome {
    Delivered(Delivery),
    Dropped,
    Faulted,
}

/// Processor chain plus sink router: the single path every emission takes.
///
/// Configuration is fixed at construction; `emit` only reads it, so one
/// pipeline can be shared by any number of threads.
pub struct Pipeline {
    chain: ProcessorChain,
    router: SinkRouter,
    fallback: Arc<dyn Fallback>,
    stats: PipelineStats,
}

impl Pipeline {
    pub fn new(chain: ProcessorChain, router: SinkRouter) -> Self {
        Self::with_fallback(chain, router, Arc::new(StderrFallback))
    }

    pub fn with_fallback(chain: ProcessorChain, router: SinkRouter, fallback: Arc<dyn Fallback>) -> Self {
        Self {
            chain,
            router,
            fallback,
            stats: PipelineStats::default(),
        }
    }

    /// Run one record through the chain and deliver it.
    ///
    /// Never panics and never returns an error to the caller: processor
    /// faults and sink failures are reported on the fallback channel.
    pub fn emit(&self, method: &str, mut record: EventRecord) -> EmitOutcome {
        record.normalize_message();
        let logger = record.logger_name().to_string();
        let ctx = ProcessContext {
            logger: &logger,
            method,
        };

        match self.chain.run(&ctx, record) {
            ChainOutcome::Emit(record) => {
                self.stats.emitted.fetch_add(1, Ordering::Relaxed);
                EmitOutcome::Delivered(self.router.dispatch(&record))
            }
            ChainOutcome::Dropped { .. } => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                EmitOutcome::Dropped
            }
            ChainOutcome::Faulted(err) => {
                self.stats.faulted.fetch_add(1, Ordering::Relaxed);
                self.fallback.report(&format!(
                    "dropping `{}` record from logger `{}`: {}",
                    method, logger, err
                ));
                EmitOutcome::Faulted
            }
        }
    }

    pub fn flush(&self) {
        self.router.flush();
    }

    pub fn router(&self) -> &SinkRouter {
        &self.router
    }

    pub fn chain(&self) -> &ProcessorChain {
        &self.chain
    }

    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            emitted: self.stats.emitted.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
            faulted: self.stats.faulted.load(Ordering::Relaxed),
        }
    }
}
