use crate::sink::LineSink;
use std::io;

/// A destination that simply drops every entry.
///
/// Useful for measuring the overhead of the processor chain and renderers
/// without any file I/O.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl LineSink for NoopSink {
    fn append(&self, _entry: &str) -> io::Result<()> {
        Ok(())
    }
}
