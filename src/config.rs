use crate::env::*;
use crate::error::ConfigError;
use crate::level::Level;
use crate::processors::ChainSettings;
use crate::render::{JsonRenderer, KeyValueRenderer, PlainTextRenderer, Renderer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Rendering format of a file destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Text,
    Json,
    KeyValue,
}

impl Format {
    pub fn name(&self) -> &'static str {
        match self {
            Format::Text => "text",
            Format::Json => "json",
            Format::KeyValue => "key_value",
        }
    }

    pub fn renderer(&self) -> Arc<dyn Renderer> {
        match self {
            Format::Text => Arc::new(PlainTextRenderer),
            Format::Json => Arc::new(JsonRenderer),
            Format::KeyValue => Arc::new(KeyValueRenderer::default()),
        }
    }
}

/// One append-only file destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationConfig {
    pub format: Format,
    pub path: PathBuf,
    pub min_level: Level,
}

/// External collector settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    /// Endpoint/credential; the scheme selects the backend.
    pub dsn: String,
    pub environment: String,
    /// Records at or above this level are forwarded.
    pub min_level: Level,
    /// Loggers never forwarded to the collector.
    pub ignored_loggers: Vec<String>,
    /// Extra fields promoted to collector tags.
    pub tag_keys: Vec<String>,
    /// Lower records at or above this level become breadcrumbs.
    pub breadcrumb_level: Level,
    /// Breadcrumbs kept per logger.
    pub max_breadcrumbs: usize,
    pub timeout: Duration,
    pub buffer: usize,
}

/// Everything needed to build the pipeline. Read once at startup and
/// treated as read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub min_level: Level,
    pub logger_levels: Vec<(String, Level)>,
    pub destinations: Vec<DestinationConfig>,
    pub excluded_paths: Vec<String>,
    pub stdout: bool,
    pub collector: CollectorConfig,
}

impl PipelineConfig {
    /// Build the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup. Empty values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let level = |var: &'static str, default: Level| -> Result<Level, ConfigError> {
            match get(var) {
                Some(raw) => raw.parse().map_err(|source| ConfigError::Level { var, source }),
                None => Ok(default),
            }
        };

        let min_level = level(LOG_LEVEL_ENV, Level::Debug)?;

        let mut destinations = vec![
            DestinationConfig {
                format: Format::Text,
                path: get(LOG_TEXT_PATH_ENV).unwrap_or_else(|| DEFAULT_TEXT_PATH.to_string()).into(),
                min_level: level(LOG_TEXT_LEVEL_ENV, min_level)?,
            },
            DestinationConfig {
                format: Format::Json,
                path: get(LOG_JSON_PATH_ENV).unwrap_or_else(|| DEFAULT_JSON_PATH.to_string()).into(),
                min_level: level(LOG_JSON_LEVEL_ENV, min_level)?,
            },
        ];
        if let Some(path) = get(LOG_KV_PATH_ENV) {
            destinations.push(DestinationConfig {
                format: Format::KeyValue,
                path: path.into(),
                min_level: level(LOG_KV_LEVEL_ENV, min_level)?,
            });
        }

        let excluded_paths = get(LOG_EXCLUDE_PATHS_ENV)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let stdout = get(LOG_STDOUT_ENV)
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let dsn = get(COLLECTOR_DSN_ENV).ok_or(ConfigError::Missing(COLLECTOR_DSN_ENV))?;
        let environment = get(ENVIRONMENT_ENV).unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());

        Ok(Self {
            min_level,
            logger_levels: Vec::new(),
            destinations,
            excluded_paths,
            stdout,
            collector: CollectorConfig {
                dsn,
                environment,
                min_level: Level::Error,
                ignored_loggers: Vec::new(),
                tag_keys: Vec::new(),
                breadcrumb_level: Level::Info,
                max_breadcrumbs: 100,
                timeout: Duration::from_secs(5),
                buffer: 256,
            },
        })
    }

    /// Override the minimum level for one logger (and loggers nested below it).
    pub fn with_logger_level(mut self, logger: impl Into<String>, level: Level) -> Self {
        self.logger_levels.push((logger.into(), level));
        self
    }

    /// Processor settings derived from this configuration.
    pub fn chain_settings(&self) -> ChainSettings {
        ChainSettings {
            min_level: self.min_level,
            logger_levels: self.logger_levels.clone(),
            excluded_paths: self.excluded_paths.clone(),
            collector_min_level: self.collector.min_level,
            collector_ignored_loggers: self.collector.ignored_loggers.clone(),
            collector_tag_keys: self.collector.tag_keys.clone(),
            collector_breadcrumb_level: self.collector.breadcrumb_level,
            collector_max_breadcrumbs: self.collector.max_breadcrumbs,
            ..ChainSettings::default()
        }
    }
}
