//! Error types for cloudtap-stream

use crate::chunked::ChunkedError;
use cloudtap_core::ConfigError;
use std::fmt;
use thiserror::Error;

/// Errors raised by the stream connection and consumption loop
#[derive(Debug, Error)]
pub enum StreamError {
    /// Too many consecutive failed handshakes
    #[error("Connection failure limit exceeded with {failures} failures. Last error: {last_error}")]
    ConnectionLimitExceeded { failures: u32, last_error: LastError },

    /// Server answered 200 without chunked framing
    #[error("Server did not send a chunked transfer-encoding header (status {status}). Is this really HTTP/1.1? Headers:\n{headers}")]
    ProtocolViolation { status: u16, headers: String },

    /// Fresh connections kept coming up with nothing to read
    #[error("No readable stream after {attempts} connection attempts")]
    StreamUnavailable { attempts: u32 },

    /// Response could not be parsed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Body framing error
    #[error("Chunked framing error: {0}")]
    Framing(#[from] ChunkedError),

    /// TLS setup error
    #[error("TLS error: {0}")]
    Tls(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Whether this error ends consumption instead of triggering a reconnect
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StreamError::ConnectionLimitExceeded { .. }
                | StreamError::ProtocolViolation { .. }
                | StreamError::StreamUnavailable { .. }
                | StreamError::Tls(_)
                | StreamError::Config(_)
        )
    }

    /// HTTP status carried by the error, if any
    pub fn http_status(&self) -> Option<u16> {
        match self {
            StreamError::ConnectionLimitExceeded { last_error, .. } => last_error.status,
            StreamError::ProtocolViolation { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for stream operations
pub type StreamResult<T> = Result<T, StreamError>;

/// Most recent failed connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    /// HTTP status, when the server answered at all
    pub status: Option<u16>,

    /// Reason phrase or transport error message
    pub message: String,

    /// Drained response body
    pub body: String,
}

impl LastError {
    pub fn http(status: u16, reason: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: reason.into(),
            body: body.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            body: String::new(),
        }
    }
}

impl fmt::Display for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP ERROR {}: {} ({})", status, self.message, self.body),
            None => write!(f, "{}", self.message),
        }
    }
}
