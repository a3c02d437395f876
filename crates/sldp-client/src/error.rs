//! Client error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection closed")]
    Closed,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("command rejected: {0}")]
    Rejected(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] sldp_core::Error),

    #[error("transport error: {0}")]
    Transport(#[from] sldp_transport::TransportError),
}
