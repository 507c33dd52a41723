//! Error types for the interaction engine.

use thiserror::Error;

/// Primary error type for all gatekeep operations.
#[derive(Error, Debug)]
pub enum GatekeepError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("No open negotiation for request {0}")]
    UnknownNegotiation(String),

    #[error("Negotiation {0} was already resolved")]
    AlreadyResolved(String),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Timeout after {0}ms")]
    Timeout(u64),
}

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Timeout,
    Server,
    Api,
    Configuration,
    Serialization,
    Protocol,
    State,
}

impl GatekeepError {
    /// Create an API error from a status code and response body.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network(_) | Self::Io(_) => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Api { status, .. } if (500..=599).contains(status) => ErrorCategory::Server,
            Self::Api { .. } => ErrorCategory::Api,
            Self::Configuration(_) | Self::Toml(_) => ErrorCategory::Configuration,
            Self::Serialization(_) | Self::Store(_) => ErrorCategory::Serialization,
            Self::Stream(_) => ErrorCategory::Protocol,
            Self::InvalidState(_)
            | Self::UnknownNegotiation(_)
            | Self::AlreadyResolved(_)
            | Self::SessionClosed => ErrorCategory::State,
        }
    }

    /// Whether this error is potentially transient.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Server
        )
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, GatekeepError>;
