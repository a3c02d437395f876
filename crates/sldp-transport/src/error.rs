//! Transport error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "tls")]
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("tls handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    /// Buffer would exceed its fixed capacity
    #[error("buffer full: need {needed} bytes, {available} available")]
    BufferFull { needed: usize, available: usize },

    /// Previous wrapped record still draining
    #[error("send while a wrapped record is pending")]
    SendPending,

    #[error("protocol error: {0}")]
    Protocol(#[from] sldp_core::Error),
}
