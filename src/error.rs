//! Error handling for exsync
//!
//! This module defines the crate error type and a Result alias for use
//! throughout the library. Transport-reported failures are carried as a
//! [`TransportFault`] so that an aborted link or channel stays fully
//! observable (code and human-readable reason).

use crate::types::{ConnectionState, ErrorCode};
use thiserror::Error;

/// Failure reported by the transport for a link or a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFault {
    /// Error code reported by the transport
    pub code: ErrorCode,
    /// Human-readable reason
    pub reason: String,
}

impl TransportFault {
    /// Create a new fault
    pub fn new(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for TransportFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.code.as_u32(), self.reason)
    }
}

/// Flat classification of [`SyncError`], convenient for matching in callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadState,
    BadDatasetSize,
    NotReady,
    NotAllowed,
    Overflow,
    Empty,
    TransportAborted,
    NotFound,
    InvalidName,
    Config,
    Channel,
    Io,
    Serialization,
}

/// Main error type for exsync operations
#[derive(Error, Debug)]
pub enum SyncError {
    /// Operation is not valid in the current state machine position
    #[error("Bad state: cannot {operation} while {state}")]
    BadState {
        operation: &'static str,
        state: ConnectionState,
    },

    /// Payload size does not match the channel's fixed byte size
    #[error("Bad dataset size: expected {expected} bytes, got {actual}")]
    BadDatasetSize { expected: usize, actual: usize },

    /// Channel is not connected, or no log configuration was received yet
    #[error("Not ready: {0}")]
    NotReady(String),

    /// Operation is not allowed for this channel direction
    #[error("Not allowed: {0}")]
    NotAllowed(String),

    /// Ring buffer is full, the incoming record was dropped
    #[error("Buffer overflow ({overflow_count} records dropped so far)")]
    Overflow { overflow_count: u64 },

    /// Ring buffer has nothing pending
    #[error("Buffer empty")]
    Empty,

    /// Unrecoverable failure reported by the transport
    #[error("Transport aborted: {0}")]
    TransportAborted(TransportFault),

    /// Unknown channel name or id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Module or channel name violates naming limits
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Errors related to configuration loading/saving/validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        SyncError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Classify this error, looking through any context wrappers
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::BadState { .. } => ErrorKind::BadState,
            SyncError::BadDatasetSize { .. } => ErrorKind::BadDatasetSize,
            SyncError::NotReady(_) => ErrorKind::NotReady,
            SyncError::NotAllowed(_) => ErrorKind::NotAllowed,
            SyncError::Overflow { .. } => ErrorKind::Overflow,
            SyncError::Empty => ErrorKind::Empty,
            SyncError::TransportAborted(_) => ErrorKind::TransportAborted,
            SyncError::NotFound(_) => ErrorKind::NotFound,
            SyncError::InvalidName(_) => ErrorKind::InvalidName,
            SyncError::Config(_) => ErrorKind::Config,
            SyncError::Channel(_) => ErrorKind::Channel,
            SyncError::Io(_) => ErrorKind::Io,
            SyncError::Serialization(_) => ErrorKind::Serialization,
            SyncError::WithContext { source, .. } => source.kind(),
        }
    }

    /// Error code equivalent of this error, as reported to peers
    pub fn code(&self) -> ErrorCode {
        match self {
            SyncError::BadState { .. } => ErrorCode::BadState,
            SyncError::BadDatasetSize { .. } => ErrorCode::BadDatasetSize,
            SyncError::NotReady(_) => ErrorCode::NotReady,
            SyncError::NotAllowed(_) => ErrorCode::NotAllowed,
            SyncError::Overflow { .. } => ErrorCode::BufferOverflow,
            SyncError::Empty => ErrorCode::NoData,
            SyncError::TransportAborted(fault) => fault.code,
            SyncError::NotFound(_) => ErrorCode::NotFound,
            SyncError::InvalidName(_) => ErrorCode::StringFormat,
            SyncError::Config(_) | SyncError::Serialization(_) => ErrorCode::MessageFormat,
            SyncError::Channel(_) | SyncError::Io(_) => ErrorCode::System,
            SyncError::WithContext { source, .. } => source.code(),
        }
    }
}

impl From<TransportFault> for SyncError {
    fn from(fault: TransportFault) -> Self {
        SyncError::TransportAborted(fault)
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

/// Result type alias for exsync operations
pub type Result<T> = std::result::Result<T, SyncError>;

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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SyncError::BadDatasetSize {
            expected: 8,
            actual: 10,
        };
        assert_eq!(
            err.to_string(),
            "Bad dataset size: expected 8 bytes, got 10"
        );
    }

    #[test]
    fn test_bad_state_display() {
        let err = SyncError::BadState {
            operation: "set operational",
            state: ConnectionState::Disconnected,
        };
        assert!(err.to_string().contains("set operational"));
        assert!(err.to_string().contains("Disconnected"));
    }

    #[test]
    fn test_error_with_context_keeps_kind() {
        let err = SyncError::Empty.with_context("draining samples");
        assert!(err.to_string().contains("draining samples"));
        assert_eq!(err.kind(), ErrorKind::Empty);
        assert_eq!(err.code(), ErrorCode::NoData);
    }

    #[test]
    fn test_transport_fault_display() {
        let fault = TransportFault::new(ErrorCode::ServerShutdown, "peer went away");
        let err = SyncError::from(fault.clone());
        assert_eq!(err.kind(), ErrorKind::TransportAborted);
        assert_eq!(err.code(), ErrorCode::ServerShutdown);
        assert!(err.to_string().contains("peer went away"));
        assert!(fault.to_string().contains("5021"));
    }

    #[test]
    fn test_result_ext_context() {
        let res: Result<()> = Err(SyncError::NotFound("setup".into()));
        let err = res.context("looking up channel").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().starts_with("looking up channel"));
    }
}
