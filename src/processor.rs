use crate::error::ProcessorError;
use crate::record::EventRecord;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Who emitted the record being processed.
#[derive(Debug, Clone, Copy)]
pub struct ProcessContext<'a> {
    /// Name of the logger the emission went through.
    pub logger: &'a str,
    /// Emission method (`info`, `error`, ...).
    pub method: &'a str,
}

/// Result of one processor.
#[derive(Debug)]
pub enum Step {
    Continue(EventRecord),
    /// Discard the record; no later processor, renderer or sink sees it.
    Drop,
}

/// One stage of the [`ProcessorChain`].
///
/// Processors must not hold mutable state shared between emissions; any
/// configuration is read-only after construction.
pub trait Processor: Send + Sync {
    /// Stable name used in fault diagnostics.
    fn name(&self) -> &'static str;

    fn process(&self, ctx: &ProcessContext<'_>, record: EventRecord) -> Result<Step, ProcessorError>;
}

/// Adapter turning a closure into a [`Processor`].
pub struct FnProcessor<F> {
    name: &'static str,
    f: F,
}

pub fn fn_processor<F>(name: &'static str, f: F) -> FnProcessor<F>
where
    F: Fn(&ProcessContext<'_>, EventRecord) -> Result<Step, ProcessorError> + Send + Sync,
{
    FnProcessor { name, f }
}

impl<F> Processor for FnProcessor<F>
where
    F: Fn(&ProcessContext<'_>, EventRecord) -> Result<Step, ProcessorError> + Send + Sync,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn process(&self, ctx: &ProcessContext<'_>, record: EventRecord) -> Result<Step, ProcessorError> {
        (self.f)(ctx, record)
    }
}

/// What happened to a record after running the whole chain.
#[derive(Debug)]
pub enum ChainOutcome {
    Emit(EventRecord),
    Dropped { by: &'static str },
    Faulted(ProcessorError),
}

/// Ordered list of processors applied to every record.
#[derive(Default)]
pub struct ProcessorChain {
    processors: Vec<Box<dyn Processor>>,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<P: Processor + 'static>(mut self, processor: P) -> Self {
        self.push(processor);
        self
    }

    pub fn push<P: Processor + 'static>(&mut self, processor: P) {
        self.processors.push(Box::new(processor));
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Run every processor in order. An error or a panic inside a processor
    /// stops the chain for this record only.
    pub fn run(&self, ctx: &ProcessContext<'_>, mut record: EventRecord) -> ChainOutcome {
        for processor in &self.processors {
            let step = catch_unwind(AssertUnwindSafe(|| processor.process(ctx, record)));
            record = match step {
                Ok(Ok(Step::Continue(next))) => next,
                Ok(Ok(Step::Drop)) => return ChainOutcome::Dropped { by: processor.name() },
                Ok(Err(err)) => return ChainOutcome::Faulted(err),
                Err(panic) => {
                    return ChainOutcome::Faulted(ProcessorError::Panicked {
                        processor: processor.name(),
                        message: panic_message(panic.as_ref()),
                    })
                }
            };
        }
        ChainOutcome::Emit(record)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
