use std::path::PathBuf;

use thiserror::Error;

/// Rule compiler error types
#[derive(Error, Debug)]
pub enum RuleError {
    /// Proxy tag, mode, list identifier or credentials do not form a usable profile
    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    /// A selected list's backing file is missing or unreadable
    #[error("List file unavailable: {}: {}", .path.display(), .source)]
    ListFileUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A proxy server hostname could not be turned into a bypass address
    #[error("DNS resolution failed for {host}: {message}")]
    DnsResolutionFailed { host: String, message: String },

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl RuleError {
    pub(crate) fn invalid_profile(message: impl Into<String>) -> Self {
        RuleError::InvalidProfile(message.into())
    }

    pub(crate) fn dns_failed(host: impl Into<String>, message: impl Into<String>) -> Self {
        RuleError::DnsResolutionFailed {
            host: host.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
