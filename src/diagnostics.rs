use std::sync::{Arc, Mutex};

/// Channel for the pipeline's own faults.
///
/// The pipeline cannot report through itself, so processor faults, sink
/// write errors and collector failures end up here instead.
pub trait Fallback: Send + Sync {
    fn report(&self, message: &str);
}

/// Default fallback: one line on standard error per fault.
#[derive(Clone, Copy, Debug, Default)]
pub struct StderrFallback;

impl Fallback for StderrFallback {
    fn report(&self, message: &str) {
        eprintln!("tracing-dual-sink: {}", message);
    }
}

/// Fallback that keeps every diagnostic in memory.
#[derive(Clone, Debug, Default)]
pub struct MemoryFallback {
    messages: Arc<Mutex<Vec<String>>>,
}

impl MemoryFallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        match self.messages.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Fallback for MemoryFallback {
    fn report(&self, message: &str) {
        let mut guard = match self.messages.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(message.to_string());
    }
}
