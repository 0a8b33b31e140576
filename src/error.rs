//! Error handling for mqtt-replay
//!
//! This module defines the crate error type and a Result alias. The variants
//! follow how each failure propagates:
//!
//! - Construction-time failures ([`ReplayError::Connection`],
//!   [`ReplayError::ConnectTimeout`], [`ReplayError::Parse`],
//!   [`ReplayError::Usage`]) are fatal and returned to the caller.
//! - Steady-state per-message failures ([`ReplayError::Append`],
//!   [`ReplayError::Publish`]) are logged where they happen and never abort
//!   a session.
//! - [`ReplayError::Interrupted`] ends whatever wait was in progress when
//!   the user pressed Ctrl-C.

use thiserror::Error;

/// Main error type for mqtt-replay operations
#[derive(Error, Debug)]
pub enum ReplayError {
    /// The broker refused the connection or the transport failed before it was established
    #[error("Connection error: {0}")]
    Connection(String),

    /// No connection acknowledgement arrived in time
    #[error("Timed out after {timeout_ms} ms waiting for broker at {address}")]
    ConnectTimeout { address: String, timeout_ms: u64 },

    /// Malformed log row or non-numeric time field
    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Failure writing a single record
    #[error("Append error: {0}")]
    Append(String),

    /// Failure publishing a single message
    #[error("Publish error on topic '{topic}': {message}")]
    Publish { topic: String, message: String },

    /// Invalid parameter or unreadable input
    #[error("Usage error: {0}")]
    Usage(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// The user interrupted the operation
    #[error("Interrupted")]
    Interrupted,

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<ReplayError>,
    },
}

impl ReplayError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        ReplayError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Build a parse error for a given 1-based line
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        ReplayError::Parse {
            line,
            message: message.into(),
        }
    }

    /// Build a publish error for a topic
    pub fn publish(topic: impl Into<String>, message: impl Into<String>) -> Self {
        ReplayError::Publish {
            topic: topic.into(),
            message: message.into(),
        }
    }

    /// The innermost error, skipping any context wrappers
    pub fn root(&self) -> &ReplayError {
        match self {
            ReplayError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type alias for mqtt-replay operations
pub type Result<T> = std::result::Result<T, ReplayError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| ReplayError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| ReplayError::Io(e).with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ReplayError::Usage("speed must be positive".to_string());
        assert_eq!(err.to_string(), "Usage error: speed must be positive");
    }

    #[test]
    fn test_error_with_context() {
        let err = ReplayError::parse(3, "expected 3 fields, got 2");
        let with_ctx = err.with_context("Failed to load 1_log.csv");
        assert!(with_ctx.to_string().contains("Failed to load 1_log.csv"));
        assert!(matches!(with_ctx.root(), ReplayError::Parse { line: 3, .. }));
    }

    #[test]
    fn test_io_context() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        let err = res.context("Opening log").unwrap_err();
        assert!(err.to_string().starts_with("Opening log"));
        assert!(matches!(err.root(), ReplayError::Io(_)));
    }
}
