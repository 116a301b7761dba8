use crate::level::ParseLevelError;
use std::error::Error;
use std::path::PathBuf;

/// Startup configuration failure. Fatal: the pipeline is not built.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("required environment variable `{0}` is not set")]
    Missing(&'static str),

    #[error("invalid level in `{var}`: {source}")]
    Level {
        var: &'static str,
        #[source]
        source: ParseLevelError,
    },

    #[error("unknown or unsupported collector DSN scheme: {0}")]
    UnknownScheme(String),

    #[error("collector backend not enabled in this build: {0}")]
    BackendDisabled(&'static str),

    #[error("invalid collector DSN: {0}")]
    InvalidDsn(String),

    #[error("cannot open log destination {path}: {source}")]
    Destination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("global tracing subscriber already installed")]
    SubscriberInstalled,

    #[error("logging must be initialized from within a Tokio runtime")]
    NoRuntime,
}

/// Fault raised by a single processor. The record is discarded.
#[derive(thiserror::Error, Debug)]
pub enum ProcessorError {
    #[error("processor `{processor}` failed: {message}")]
    Failed {
        processor: &'static str,
        message: String,
    },

    #[error("processor `{processor}` panicked: {message}")]
    Panicked {
        processor: &'static str,
        message: String,
    },
}

impl ProcessorError {
    pub fn failed(processor: &'static str, message: impl Into<String>) -> Self {
        ProcessorError::Failed {
            processor,
            message: message.into(),
        }
    }
}

/// Failure appending to one destination.
#[derive(thiserror::Error, Debug)]
#[error("write to destination `{destination}` failed: {source}")]
pub struct SinkError {
    pub destination: String,
    #[source]
    pub source: std::io::Error,
}

/// Failure forwarding a report to the external collector. Never surfaced to
/// the emitting caller.
#[derive(thiserror::Error, Debug)]
pub enum CollectorError {
    #[error("collector queue full, report dropped")]
    QueueFull,

    #[error("collector forwarder stopped")]
    Closed,

    #[error("collector did not answer within {0:?}")]
    Timeout(std::time::Duration),

    #[error("collector rejected report: {0}")]
    Backend(Box<dyn Error + Send + Sync>),
}
