use std::sync::Arc;

use crate::collector::{ErrorCollector, NoopCollector};
use crate::error::ConfigError;

/// Supported collector kinds that can be selected via DSN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorKind {
    Http,
    Sentry,
    Noop,
}

/// Collector target parsed from a DSN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorTarget {
    /// Selected backend implementation.
    pub kind: CollectorKind,
    /// DSN handed to the backend, with any selector prefix removed.
    pub dsn: String,
}

/// Parse a DSN string and infer the collector kind from its scheme.
///
/// Examples:
/// - "https://collector.example/api/errors" (JSON over HTTP)
/// - "sentry+https://public@o0.ingest.sentry.io/42"
/// - "noop://"
pub fn parse_dsn(dsn: &str) -> Result<CollectorTarget, ConfigError> {
    let dsn = dsn.trim();
    let lower = dsn.to_ascii_lowercase();

    if lower.starts_with("sentry+http://") || lower.starts_with("sentry+https://") {
        Ok(CollectorTarget {
            kind: CollectorKind::Sentry,
            dsn: dsn["sentry+".len()..].to_string(),
        })
    } else if lower.starts_with("http://") || lower.starts_with("https://") {
        Ok(CollectorTarget {
            kind: CollectorKind::Http,
            dsn: dsn.to_string(),
        })
    } else if lower.starts_with("noop://") {
        Ok(CollectorTarget {
            kind: CollectorKind::Noop,
            dsn: dsn.to_string(),
        })
    } else {
        Err(ConfigError::UnknownScheme(dsn.to_string()))
    }
}

/// Create a concrete [`ErrorCollector`] for a parsed target.
pub fn make_collector(target: &CollectorTarget, environment: &str) -> Result<Arc<dyn ErrorCollector>, ConfigError> {
    match target.kind {
        CollectorKind::Noop => Ok(Arc::new(NoopCollector)),
        CollectorKind::Http => {
            #[cfg(feature = "http-collector")]
            {
                use crate::http_collector::HttpCollector;
                let _ = environment;
                Ok(Arc::new(HttpCollector::new(target.dsn.clone())) as Arc<dyn ErrorCollector>)
            }

            #[cfg(not(feature = "http-collector"))]
            {
                let _ = environment;
                Err(ConfigError::BackendDisabled("http-collector"))
            }
        }
        CollectorKind::Sentry => {
            #[cfg(feature = "sentry")]
            {
                use crate::sentry_collector::SentryCollector;
                let collector = SentryCollector::new(&target.dsn, environment)?;
                Ok(Arc::new(collector) as Arc<dyn ErrorCollector>)
            }

            #[cfg(not(feature = "sentry"))]
            {
                let _ = environment;
                Err(ConfigError::BackendDisabled("sentry"))
            }
        }
    }
}
