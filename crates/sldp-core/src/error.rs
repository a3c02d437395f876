//! Error types for SLDP

use thiserror::Error;

/// Result type alias for SLDP operations
pub type Result<T> = std::result::Result<T, Error>;

/// SLDP error types
///
/// Every variant is fatal for the connection it came from: the byte stream
/// is never resynchronized after one of these.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed HTTP status line in the upgrade response
    #[error("malformed status line: {0:?}")]
    MalformedStatusLine(String),

    /// Malformed HTTP header line in the upgrade response
    #[error("malformed header line: {0:?}")]
    MalformedHeader(String),

    /// Masked frame received from the server
    #[error("server frame is masked")]
    MaskedFrame,

    /// 64-bit extended payload length
    #[error("64-bit frame length is not supported")]
    UnsupportedLength,

    /// Reserved or unknown WebSocket opcode
    #[error("reserved opcode: 0x{0:x}")]
    ReservedOpcode(u8),

    /// Reassembled message larger than the accumulator
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// Outbound payload does not fit the 16-bit length encoding
    #[error("payload too large: {0} bytes (max 65535)")]
    PayloadTooLarge(usize),

    /// Binary media message shorter than its header
    #[error("truncated media message: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },

    /// Text message is not valid UTF-8
    #[error("text message is not valid utf-8")]
    InvalidText,

    /// JSON error on a mandatory field
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Required control field absent or of the wrong type
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// Server sent a close frame
    #[error("connection closed by server")]
    ConnectionClosed,

    /// Operation issued in a state that does not allow it
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Generic protocol error
    #[error("protocol error: {0}")]
    Protocol(String),
}
