use std::path::PathBuf;

use thiserror::Error;

use crate::check::Stage;

/// Unified error type for the Hailstorm library.
#[derive(Debug, Error)]
pub enum HailstormError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration file '{0}' not found")]
    ConfigNotFound(PathBuf),

    #[error("Configuration file '{path}' is not valid JSON: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Environment variable '{0}' referenced in config is not set")]
    ConfigEnvVar(String),

    #[error("Invalid configuration: {0}")]
    ConfigValidation(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Blocked at {stage} gate by '{check}': {reason}")]
    Blocked {
        stage: Stage,
        check: String,
        reason: String,
    },

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Check '{check}' exceeded {timeout_ms}ms timeout")]
    CheckTimeout { check: String, timeout_ms: u64 },

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Connection pool error: {0}")]
    Pool(String),
}

pub type Result<T> = std::result::Result<T, HailstormError>;
