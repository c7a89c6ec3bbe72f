//! Error types for Formguard.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Formguard operations.
#[derive(Error, Debug)]
pub enum FormguardError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the shared timestamp store.
///
/// The first three variants mean the store could not be reached and are
/// recovered by the in-process fallback. `Command` means Redis answered,
/// but with an error.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The store was marked unavailable by a recent failure
    #[error("store is not ready")]
    NotReady,

    /// An operation did not complete in time
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The connection failed, was refused or dropped
    #[error("store connection failed: {0}")]
    Connection(#[source] redis::RedisError),

    /// The store rejected the command
    #[error("store command failed: {0}")]
    Command(#[source] redis::RedisError),
}

impl StoreError {
    /// Whether this error means the store could not be reached.
    pub fn is_unavailable(&self) -> bool {
        !matches!(self, StoreError::Command(_))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_timeout()
        {
            StoreError::Connection(err)
        } else {
            StoreError::Command(err)
        }
    }
}

/// Result type alias for Formguard operations.
pub type Result<T> = std::result::Result<T, FormguardError>;

#[cfg(test)]
mod tests {
    use super::*;
    use redis::ErrorKind;

    #[test]
    fn test_io_errors_are_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = StoreError::from(redis::RedisError::from(io));

        assert!(matches!(err, StoreError::Connection(_)));
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_server_errors_are_commands() {
        let redis_err = redis::RedisError::from((ErrorKind::ResponseError, "ERR wrong number of arguments"));
        let err = StoreError::from(redis_err);

        assert!(matches!(err, StoreError::Command(_)));
        assert!(!err.is_unavailable());
    }

    #[test]
    fn test_timeout_and_not_ready_are_unavailable() {
        assert!(StoreError::NotReady.is_unavailable());
        assert!(StoreError::Timeout(Duration::from_secs(2)).is_unavailable());
    }

    #[test]
    fn test_top_level_error_messages() {
        let err = FormguardError::Config("limit must be greater than zero".to_string());
        assert_eq!(err.to_string(), "Configuration error: limit must be greater than zero");

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: FormguardError = io.into();
        assert!(matches!(err, FormguardError::Io(_)));
        assert_eq!(err.to_string(), "I/O error: missing");
    }
}
