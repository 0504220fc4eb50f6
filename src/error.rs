//! Error types for publish runs
//!
//! Only configuration problems and unreadable input files escalate out of a
//! run. Per-client transport failures are contained by the pool and the
//! scheduler and only show up in the run summary and the log stream.

use crate::config::ConfigError;
use crate::payload::PayloadError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use thiserror::Error;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|passwd|token|secret)[=:]\s*\S+").expect("valid secret pattern")
});

static CREDENTIAL_URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)([a-z][a-z0-9+.-]*://)[^/@\s:]+:[^/@\s]+@").expect("valid url pattern")
});

const MAX_ERROR_TEXT: usize = 500;

/// Errors that abort a run before (or instead of) publishing
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    #[error("Failed to read data document {path}: {source}")]
    DataRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse data document {path}: {source}")]
    DataParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Config store error: {0}")]
    Store(#[from] ConfigError),
}

impl RunError {
    /// Create configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// True when the run was rejected because of its configuration
    pub fn is_configuration(&self) -> bool {
        matches!(self, RunError::Configuration { .. } | RunError::Payload(_))
    }
}

/// Result type for run operations
pub type RunResult<T> = Result<T, RunError>;

/// Redact credentials and bound the length of error text before it reaches
/// logs or a run summary
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();

    sanitized = CREDENTIAL_URL_PATTERN
        .replace_all(&sanitized, "${1}***@")
        .to_string();

    if sanitized.len() > MAX_ERROR_TEXT {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_ERROR_TEXT - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}
