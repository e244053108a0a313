//! # Errors
//!
//! Error types and helper functions used in the library

use std::time::Duration;
use thiserror::Error;

/// Errors reported while parsing the RESP wire format
///
/// Every one of these is fatal for the connection it occurred on: the decoder
/// cannot resynchronize a corrupted stream, so the connection is torn down and
/// pending requests fail with [`CloseCause::Protocol`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RespError {
    #[error("invalid RESP token byte: 0x{0:02x}")]
    InvalidToken(u8),

    #[error("malformed line terminator (expected CRLF)")]
    MalformedTerminator,

    #[error("malformed integer in line body")]
    MalformedInteger,

    #[error("invalid bulk string size: {0}")]
    InvalidBulkStringSize(i64),

    #[error("bulk string payload does not match its declared size")]
    BulkStringSizeMismatch,

    #[error("malformed boolean byte: 0x{0:02x}")]
    MalformedBoolean(u8),

    #[error("push frame without a leading simple string tag")]
    MalformedPush,

    #[error("frame nesting exceeds the supported depth")]
    RecursionTooDeep,
}

/// Why a connection stopped being usable
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CloseCause {
    #[error("closed locally")]
    Local,

    #[error("remote end closed the connection")]
    RemoteEof,

    #[error("i/o failure: {0}")]
    Io(String),

    #[error("protocol violation: {0}")]
    Protocol(RespError),
}

impl CloseCause {
    /// Whether the closure was initiated by this side
    pub fn is_local(&self) -> bool {
        matches!(self, CloseCause::Local)
    }
}

/// Errors related to working with [`crate::conn`] and [`crate::pipeline`]
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection closed: {cause}")]
    Closed { cause: CloseCause },

    #[error("write buffer full: {buffered} bytes buffered, limit is {limit}")]
    WriteBufferFull { buffered: usize, limit: usize },

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("handshake rejected by server: {0}")]
    Handshake(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(transparent)]
    ConfigError(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ConnectionError {
    pub(crate) fn closed(cause: CloseCause) -> Self {
        ConnectionError::Closed { cause }
    }
}

/// Errors related to working with [`crate::pool`]
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool is closed")]
    PoolClosed,

    #[error("no connection became available before the lease deadline")]
    WaiterTimeout,

    #[error(transparent)]
    ConfigError(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from validating [`crate::config`] values
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("at least one address is required")]
    EmptyAddresses,

    #[error("database index must not be negative, got {0}")]
    NegativeDatabase(i64),

    #[error("pool limits invalid: min {min} exceeds max {max}")]
    MinExceedsMax { min: usize, max: usize },

    #[error("pool max must be at least 1")]
    ZeroMax,

    #[error("retry factor must be >= 1.0, got {0}")]
    RetryFactorTooSmall(f64),
}
