//! SLDP Core
//!
//! Core types, codecs, and buffering primitives for the SLDP client.
//! Softvelum Low Delay Protocol, carried over WebSocket.
//!
//! This crate is sans-IO. It provides:
//! - Presentation timing ([`Timestamp`], [`Clock`])
//! - The upgrade response parser ([`HandshakeParser`])
//! - WebSocket frame decoding/encoding ([`WebSocketFramer`])
//! - Binary media frame demux ([`MediaMessage`], [`FrameType`])
//! - Control channel JSON ([`messages`])
//! - Per-stream frame storage with clock drift tracking ([`StreamBuffer`])

pub mod buffer;
pub mod error;
pub mod frame;
pub mod http;
pub mod media;
pub mod messages;
pub mod time;
pub mod types;

pub use buffer::{BufferItem, BufferObserver, DefaultBufferFactory, StreamBuffer, StreamBufferFactory};
pub use error::{Error, Result};
pub use frame::{Decoded, WebSocketFramer, WsEvent};
pub use http::HandshakeParser;
pub use media::{FrameType, MediaMessage};
pub use time::{Clock, ManualClock, MonotonicClock, Timestamp};
pub use types::*;

/// WebSocket subprotocol identifier
pub const WS_SUBPROTOCOL: &str = "sldp.softvelum.com";

/// WebSocket protocol version sent in the upgrade request
pub const WS_VERSION: u8 = 13;

/// Default user agent
pub const DEFAULT_USER_AGENT: &str = "SLDPLib/1.0";

/// Default plain-text port
pub const DEFAULT_PORT: u16 = 80;

/// Default TLS port
pub const DEFAULT_TLS_PORT: u16 = 443;

/// HTTP status that accepts the WebSocket upgrade
pub const SWITCHING_PROTOCOLS: u16 = 101;
