//! Environment variable names read by [`PipelineConfig::from_env`].
//!
//! These are purely helpers; every component can also be configured
//! directly without touching the environment.
//!
//! [`PipelineConfig::from_env`]: crate::config::PipelineConfig::from_env

/// Global minimum level (`debug`, `info`, `warning`, `error`, `critical`).
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

/// Plain-text destination file.
pub const LOG_TEXT_PATH_ENV: &str = "LOG_TEXT_PATH";

/// JSON destination file.
pub const LOG_JSON_PATH_ENV: &str = "LOG_JSON_PATH";

/// Optional key-value destination file.
pub const LOG_KV_PATH_ENV: &str = "LOG_KV_PATH";

/// Per-destination minimum levels; default to [`LOG_LEVEL_ENV`].
pub const LOG_TEXT_LEVEL_ENV: &str = "LOG_TEXT_LEVEL";
pub const LOG_JSON_LEVEL_ENV: &str = "LOG_JSON_LEVEL";
pub const LOG_KV_LEVEL_ENV: &str = "LOG_KV_LEVEL";

/// Comma-separated request-path substrings whose records are suppressed.
pub const LOG_EXCLUDE_PATHS_ENV: &str = "LOG_EXCLUDE_PATHS";

/// `true` to also print events through `tracing_subscriber::fmt`.
pub const LOG_STDOUT_ENV: &str = "LOG_STDOUT";

/// Collector DSN. Required.
pub const COLLECTOR_DSN_ENV: &str = "COLLECTOR_DSN";

/// Deployment environment tag sent with every collector report.
pub const ENVIRONMENT_ENV: &str = "ENVIRONMENT";

pub const DEFAULT_TEXT_PATH: &str = "logs/app.log";
pub const DEFAULT_JSON_PATH: &str = "logs/app.json.log";
pub const DEFAULT_ENVIRONMENT: &str = "development";

