//! WebSocket frame decoding/encoding
//!
//! Client side of RFC 6455 as used by SLDP:
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ Byte 0:     [7] FIN   [3:0] Opcode                              │
//! │ Byte 1:     [7] MASK  [6:0] Payload length                      │
//! │             126 = 16-bit extended length follows                │
//! │             127 = 64-bit extended length (unsupported)          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ [If length == 126] Bytes 2-3: Length (uint16 big-endian)        │
//! │ [Client frames only] 4 bytes masking key                        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Payload                                                         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Server frames must never be masked. Ping frames are consumed without a
//! pong reply.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, Result};

/// Continuation frame
pub const OP_CONTINUATION: u8 = 0x0;
/// Text frame
pub const OP_TEXT: u8 = 0x1;
/// Binary frame
pub const OP_BINARY: u8 = 0x2;
/// Connection close
pub const OP_CLOSE: u8 = 0x8;
/// Ping
pub const OP_PING: u8 = 0x9;
/// Pong
pub const OP_PONG: u8 = 0xA;

/// FIN bit in byte 0
pub const FIN_BIT: u8 = 0x80;
/// MASK bit in byte 1
pub const MASK_BIT: u8 = 0x80;

/// Largest payload length that fits the 7-bit field
pub const MAX_SHORT_PAYLOAD: usize = 125;

/// Largest outbound payload (16-bit extended length)
pub const MAX_CONTROL_PAYLOAD: usize = 0xFFFF;

/// Default reassembly limit (1 MiB)
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageKind {
    Text,
    Binary,
}

/// Something a decoded frame delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsEvent {
    /// Complete text message
    Text(String),
    /// Complete binary message
    Binary(Bytes),
    Close,
    Ping,
    Pong,
}

/// Result of decoding one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Header or payload not fully buffered; nothing consumed
    Incomplete,
    /// One frame consumed; `event` is `None` for a non-final fragment
    Frame {
        consumed: usize,
        event: Option<WsEvent>,
    },
}

/// Incremental WebSocket frame decoder with message reassembly
#[derive(Debug)]
pub struct WebSocketFramer {
    accumulator: BytesMut,
    kind: Option<MessageKind>,
    max_message_size: usize,
}

impl Default for WebSocketFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketFramer {
    pub fn new() -> Self {
        Self::with_max_message_size(DEFAULT_MAX_MESSAGE_SIZE)
    }

    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            accumulator: BytesMut::new(),
            kind: None,
            max_message_size,
        }
    }

    /// Decode one frame from the front of `buf`
    pub fn decode(&mut self, buf: &[u8]) -> Result<Decoded> {
        let mut header_len = 2;

        if buf.len() < header_len {
            return Ok(Decoded::Incomplete);
        }

        if buf[1] & MASK_BIT != 0 {
            return Err(Error::MaskedFrame);
        }

        let mut payload_len = (buf[1] & 0x7F) as usize;
        if payload_len == 126 {
            header_len += 2;
            if buf.len() < header_len {
                return Ok(Decoded::Incomplete);
            }
            payload_len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        } else if payload_len == 127 {
            return Err(Error::UnsupportedLength);
        }

        let consumed = header_len + payload_len;
        if buf.len() < consumed {
            return Ok(Decoded::Incomplete);
        }

        let payload = &buf[header_len..consumed];
        let opcode = buf[0] & 0x0F;

        match opcode {
            OP_CONTINUATION => {
                if self.kind.is_none() {
                    return Err(Error::Protocol("continuation without a started message".into()));
                }
                self.append(payload)?;
            }
            OP_TEXT | OP_BINARY => {
                self.kind = Some(if opcode == OP_TEXT {
                    MessageKind::Text
                } else {
                    MessageKind::Binary
                });
                self.accumulator.clear();
                self.append(payload)?;
            }
            OP_CLOSE => {
                return Ok(Decoded::Frame {
                    consumed,
                    event: Some(WsEvent::Close),
                })
            }
            OP_PING => {
                return Ok(Decoded::Frame {
                    consumed,
                    event: Some(WsEvent::Ping),
                })
            }
            OP_PONG => {
                return Ok(Decoded::Frame {
                    consumed,
                    event: Some(WsEvent::Pong),
                })
            }
            other => return Err(Error::ReservedOpcode(other)),
        }

        if buf[0] & FIN_BIT == 0 {
            return Ok(Decoded::Frame {
                consumed,
                event: None,
            });
        }

        let message = self.accumulator.split().freeze();
        let event = match self.kind.take() {
            Some(MessageKind::Text) => {
                let text = String::from_utf8(message.to_vec()).map_err(|_| Error::InvalidText)?;
                Some(WsEvent::Text(text))
            }
            Some(MessageKind::Binary) => Some(WsEvent::Binary(message)),
            None => None,
        };

        Ok(Decoded::Frame { consumed, event })
    }

    fn append(&mut self, payload: &[u8]) -> Result<()> {
        let size = self.accumulator.len() + payload.len();
        if size > self.max_message_size {
            self.accumulator.clear();
            self.kind = None;
            return Err(Error::MessageTooLarge {
                size,
                max: self.max_message_size,
            });
        }
        self.accumulator.extend_from_slice(payload);
        Ok(())
    }

    /// Bytes buffered for a message still missing its final fragment
    pub fn pending_len(&self) -> usize {
        self.accumulator.len()
    }
}

/// Encode a single masked text frame (FIN set)
pub fn encode_text(payload: &[u8], mask: [u8; 4]) -> Result<Bytes> {
    let len = payload.len();
    if len > MAX_CONTROL_PAYLOAD {
        return Err(Error::PayloadTooLarge(len));
    }

    let mut buf = BytesMut::with_capacity(len + 8);
    buf.put_u8(FIN_BIT | OP_TEXT);

    if len <= MAX_SHORT_PAYLOAD {
        buf.put_u8(MASK_BIT | len as u8);
    } else {
        buf.put_u8(MASK_BIT | 126);
        buf.put_u16(len as u16);
    }

    buf.put_slice(&mask);
    buf.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));

    Ok(buf.freeze())
}
