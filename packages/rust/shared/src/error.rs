//! Error types for LeadForge.
//!
//! Library crates use [`LeadForgeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//! Third-party adapters (AI model, SMTP, Twilio) return [`ChannelError`] so
//! callers can tell a skipped send from a failed one.

use std::path::PathBuf;

/// Top-level error type for all LeadForge operations.
#[derive(Debug, thiserror::Error)]
pub enum LeadForgeError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to an external provider.
    #[error("network error: {0}")]
    Network(String),

    /// JSON/TOML parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error (missing field, bad phone, illegal transition).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// A referenced record does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Webhook secret mismatch.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LeadForgeError>;

impl LeadForgeError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a not-found error for the given entity kind.
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Outcome of a call to a third-party provider.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Credentials, destination, or sender identity are not configured.
    /// No network call was made.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// The request never produced a response (connect, TLS, timeout).
    #[error("transport error: {0}")]
    Transport(String),

    /// The provider answered with a non-success status.
    #[error("provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    /// The provider answered but the payload could not be used.
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ChannelError {
    /// Create a missing-configuration error.
    pub fn missing(what: impl Into<String>) -> Self {
        Self::MissingConfig(what.into())
    }

    /// True when the send was skipped rather than attempted.
    pub fn is_missing_config(&self) -> bool {
        matches!(self, Self::MissingConfig(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = LeadForgeError::config("missing database path");
        assert_eq!(err.to_string(), "config error: missing database path");

        let err = LeadForgeError::not_found("funnel", "solar-quote");
        assert_eq!(err.to_string(), "funnel not found: solar-quote");

        let err = LeadForgeError::validation("phone must have at least 10 digits");
        assert!(err.to_string().contains("10 digits"));
    }

    #[test]
    fn channel_error_classification() {
        assert!(ChannelError::missing("twilio credentials").is_missing_config());
        let err = ChannelError::Provider {
            status: 400,
            body: "bad number".into(),
        };
        assert!(!err.is_missing_config());
        assert_eq!(err.to_string(), "provider returned 400: bad number");
    }
}
