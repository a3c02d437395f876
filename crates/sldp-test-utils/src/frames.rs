//! Server-side wire builders
//!
//! Everything a test needs to play the server: unmasked WebSocket frames,
//! upgrade responses, status JSON and binary media messages, plus a decoder
//! for the masked frames the client sends.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::{json, Value};
use sldp_core::frame::{FIN_BIT, MASK_BIT, OP_BINARY, OP_CLOSE, OP_CONTINUATION, OP_PING, OP_TEXT};
use sldp_core::{FrameType, MediaMessage};

/// One unmasked server frame
pub fn server_frame(opcode: u8, fin: bool, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 4);
    buf.put_u8(if fin { FIN_BIT | opcode } else { opcode });
    if payload.len() < 126 {
        buf.put_u8(payload.len() as u8);
    } else {
        assert!(payload.len() <= 0xFFFF, "test frame too large");
        buf.put_u8(126);
        buf.put_u16(payload.len() as u16);
    }
    buf.put_slice(payload);
    buf.freeze()
}

pub fn text_frame(text: &str) -> Bytes {
    server_frame(OP_TEXT, true, text.as_bytes())
}

pub fn binary_frame(payload: &[u8]) -> Bytes {
    server_frame(OP_BINARY, true, payload)
}

/// A binary message split into a start frame and `pieces - 1` continuations
pub fn fragmented_binary(payload: &[u8], pieces: usize) -> Bytes {
    let pieces = pieces.max(1);
    let chunk = payload.len().div_ceil(pieces).max(1);
    let mut out = BytesMut::new();
    for (i, part) in payload.chunks(chunk).enumerate() {
        let opcode = if i == 0 { OP_BINARY } else { OP_CONTINUATION };
        let fin = (i + 1) * chunk >= payload.len();
        out.extend_from_slice(&server_frame(opcode, fin, part));
    }
    out.freeze()
}

pub fn close_frame() -> Bytes {
    server_frame(OP_CLOSE, true, &[])
}

pub fn ping_frame() -> Bytes {
    server_frame(OP_PING, true, b"ping")
}

/// Same as a text frame but with the mask bit set, which servers must not do
pub fn masked_server_frame(text: &str) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(FIN_BIT | OP_TEXT);
    buf.put_u8(MASK_BIT | text.len() as u8);
    buf.put_slice(&[0, 0, 0, 0]);
    buf.put_slice(text.as_bytes());
    buf.freeze()
}

/// `HTTP/1.1 101 Switching Protocols` with the usual upgrade headers
pub fn upgrade_accepted() -> String {
    "HTTP/1.1 101 Switching Protocols\r\n\
     Upgrade: websocket\r\n\
     Connection: Upgrade\r\n\
     Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
     Sec-WebSocket-Protocol: sldp.softvelum.com\r\n\
     \r\n"
        .to_string()
}

/// A non-101 response with an empty body
pub fn upgrade_rejected(code: u16, text: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: 0\r\n\r\n",
        code, text
    )
}

/// A client frame with its mask removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFrame {
    pub fin: bool,
    pub opcode: u8,
    pub masked: bool,
    pub payload: Vec<u8>,
}

impl ClientFrame {
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.payload).ok()
    }
}

/// Decode one client frame from the front of `buf`; returns it and its length
pub fn decode_client_frame(buf: &[u8]) -> Option<(ClientFrame, usize)> {
    if buf.len() < 2 {
        return None;
    }
    let fin = buf[0] & FIN_BIT != 0;
    let opcode = buf[0] & 0x0F;
    let masked = buf[1] & MASK_BIT != 0;

    let mut pos = 2;
    let mut len = (buf[1] & 0x7F) as usize;
    if len == 126 {
        if buf.len() < 4 {
            return None;
        }
        len = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        pos = 4;
    } else if len == 127 {
        return None;
    }

    let mut mask = [0u8; 4];
    if masked {
        if buf.len() < pos + 4 {
            return None;
        }
        mask.copy_from_slice(&buf[pos..pos + 4]);
        pos += 4;
    }
    if buf.len() < pos + len {
        return None;
    }

    let payload = buf[pos..pos + len]
        .iter()
        .enumerate()
        .map(|(i, b)| b ^ mask[i % 4])
        .collect();

    Some((
        ClientFrame {
            fin,
            opcode,
            masked,
            payload,
        },
        pos + len,
    ))
}

/// Decode every complete client frame in `buf`
pub fn decode_client_frames(mut buf: &[u8]) -> Vec<ClientFrame> {
    let mut frames = Vec::new();
    while let Some((frame, used)) = decode_client_frame(buf) {
        frames.push(frame);
        buf = &buf[used..];
    }
    frames
}

/// Builder for a server `status` command
#[derive(Debug, Clone, Default)]
pub struct StatusBuilder {
    steady: Option<Value>,
    system: Option<Value>,
    info: Vec<Value>,
}

impl StatusBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Steady and system clock values, sent as numeric strings
    pub fn steady(mut self, steady: i64, system: i64) -> Self {
        self.steady = Some(json!(steady.to_string()));
        self.system = Some(json!(system.to_string()));
        self
    }

    pub fn video(mut self, stream: &str, vcodec: &str, timescale: u32, resolution: &str) -> Self {
        self.info.push(json!({
            "stream": stream,
            "stream_info": {
                "vcodec": vcodec,
                "vtimescale": timescale,
                "resolution": resolution,
                "bandwidth": 2_000_000,
            }
        }));
        self
    }

    pub fn audio(mut self, stream: &str, acodec: &str, timescale: u32) -> Self {
        self.info.push(json!({
            "stream": stream,
            "stream_info": {
                "acodec": acodec,
                "atimescale": timescale,
                "bandwidth": 128_000,
            }
        }));
        self
    }

    /// One descriptor carrying both tracks
    pub fn muxed(mut self, stream: &str, vcodec: &str, acodec: &str) -> Self {
        self.info.push(json!({
            "stream": stream,
            "stream_info": {
                "vcodec": vcodec,
                "vtimescale": 90_000,
                "resolution": "1280x720",
                "acodec": acodec,
                "atimescale": 48_000,
                "bandwidth": 2_500_000,
            }
        }));
        self
    }

    pub fn descriptor(mut self, descriptor: Value) -> Self {
        self.info.push(descriptor);
        self
    }

    pub fn to_value(&self) -> Value {
        let mut status = json!({
            "command": "status",
            "info": self.info,
        });
        if let Some(steady) = &self.steady {
            status["steady"] = steady.clone();
        }
        if let Some(system) = &self.system {
            status["system"] = system.clone();
        }
        status
    }

    pub fn build(&self) -> String {
        self.to_value().to_string()
    }
}

/// Binary media message bytes
pub fn media_message(
    sn: u8,
    frame_type: FrameType,
    timestamp: i64,
    steady: Option<i64>,
    payload: &[u8],
) -> Bytes {
    let timestamp = (!frame_type.is_sequence_header()).then_some(timestamp);
    let composition_offset = frame_type.has_composition_offset().then_some(0);
    MediaMessage {
        sn,
        type_code: frame_type as u8,
        timestamp,
        steady: timestamp.and(steady),
        composition_offset,
        payload,
    }
    .encode()
}

/// One length-prefixed NAL unit
pub fn avcc_nal(nal: &[u8]) -> Vec<u8> {
    let mut out = (nal.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(nal);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use sldp_core::frame::encode_text;

    #[test]
    fn test_client_frame_roundtrip_through_mask() {
        let frame = encode_text(br#"{"command":"Play"}"#, [1, 2, 3, 4]).unwrap();
        let (decoded, used) = decode_client_frame(&frame).unwrap();

        assert_eq!(used, frame.len());
        assert!(decoded.masked);
        assert!(decoded.fin);
        assert_eq!(decoded.opcode, OP_TEXT);
        assert_eq!(decoded.json().unwrap()["command"], "Play");
    }

    #[test]
    fn test_fragmented_binary_layout() {
        let frames = fragmented_binary(b"abcdef", 3);
        // 3 frames of 2 header + 2 payload bytes
        assert_eq!(frames.len(), 12);
        assert_eq!(frames[0], OP_BINARY);
        assert_eq!(frames[4], OP_CONTINUATION);
        assert_eq!(frames[8], FIN_BIT | OP_CONTINUATION);
    }

    #[test]
    fn test_status_builder() {
        let status = StatusBuilder::new()
            .steady(10, 20)
            .video("cam", "avc1.64001f", 90_000, "640x360")
            .to_value();
        assert_eq!(status["steady"], "10");
        assert_eq!(status["info"][0]["stream_info"]["vtimescale"], 90_000);
    }
}
