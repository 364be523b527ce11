//! Error types for the replication subscriber
//!
//! Includes transient/fatal classification so the reconnect loop can log
//! errors with the right severity.

use crate::protocol::DecodeError;
use thiserror::Error;

/// Errors raised while subscribing to a logical replication slot.
#[derive(Error, Debug)]
pub enum CdcError {
    /// Failure while establishing or authenticating the connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// Replication protocol violation
    #[error("Replication error: {0}")]
    Replication(String),

    /// Unsupported or malformed pgoutput message
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Invalid subscriber configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Stream ended (server sent CopyDone or closed the socket)
    #[error("Connection closed")]
    ConnectionClosed,

    /// Operation not valid for the subscriber's current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// I/O error on the replication socket
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CdcError {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a replication protocol error
    pub fn replication(msg: impl Into<String>) -> Self {
        Self::Replication(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Check whether the reconnect loop should treat this as routine.
    ///
    /// Transient errors are logged at `warn` and recovered by resubscribing;
    /// everything else is logged at `error` but the loop still resubscribes,
    /// since the subscriber never gives up.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionClosed => true,
            Self::Connection(_) => true,
            Self::Io(e) => {
                use std::io::ErrorKind;
                matches!(
                    e.kind(),
                    ErrorKind::ConnectionReset
                        | ErrorKind::ConnectionAborted
                        | ErrorKind::ConnectionRefused
                        | ErrorKind::TimedOut
                        | ErrorKind::UnexpectedEof
                        | ErrorKind::Interrupted
                )
            }
            Self::Replication(msg) => {
                msg.contains("connection") || msg.contains("terminat") || msg.contains("timeout")
            }
            Self::Decode(_) | Self::Config(_) | Self::InvalidState(_) => false,
        }
    }
}

/// Result type for subscriber operations
pub type Result<T> = std::result::Result<T, CdcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CdcError::replication("slot walhook is active for PID 42");
        assert!(err.to_string().contains("Replication error"));
        assert!(err.to_string().contains("PID 42"));
    }

    #[test]
    fn test_transient_classification() {
        assert!(CdcError::ConnectionClosed.is_transient());
        assert!(CdcError::connection("refused").is_transient());
        assert!(CdcError::Io(std::io::Error::from(std::io::ErrorKind::ConnectionReset)).is_transient());

        assert!(!CdcError::config("missing slot name").is_transient());
    }
}
