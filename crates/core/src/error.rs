//! Error types for the mirroring layer
//!
//! This module defines the single error type shared by every table kind,
//! backend and routing component. We use `thiserror` for automatic
//! `Display` and `Error` trait implementations.

use std::io;
use thiserror::Error;

/// Result type alias for mirroring operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the mirroring layer
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, network, etc.)
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Connection is unusable (e.g. empty URL)
    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    /// Error raised by an underlying store client
    #[error("Store error ({backend}): {message}")]
    Store {
        /// Name of the backend that raised the error
        backend: String,
        /// Message reported by the store
        message: String,
    },

    /// Table does not exist in the store
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration could not be loaded or refers to unknown items
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invariant violated inside the layer
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Store error raised by `backend`
    pub fn store(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Store {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config(message.into())
    }

    /// Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_io() {
        let err = Error::IoError(io::Error::new(io::ErrorKind::NotFound, "file not found"));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_error_display_store() {
        let err = Error::store("sqlite", "disk full");
        let msg = err.to_string();
        assert!(msg.contains("Store error"));
        assert!(msg.contains("sqlite"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_error_display_config() {
        let err = Error::config("unknown backend 'mysql'");
        let msg = err.to_string();
        assert!(msg.contains("Configuration error"));
        assert!(msg.contains("mysql"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::IoError(_)));
    }

    #[test]
    fn test_error_from_json() {
        let result: Result<serde_json::Value> =
            serde_json::from_str("{not json").map_err(Error::from);
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[test]
    fn test_error_pattern_matching() {
        match Error::store("mirror", "timeout") {
            Error::Store { backend, message } => {
                assert_eq!(backend, "mirror");
                assert_eq!(message, "timeout");
            }
            _ => panic!("Wrong error variant"),
        }
    }
}
