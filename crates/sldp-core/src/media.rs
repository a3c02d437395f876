//! Binary media message demux
//!
//! SLDP binary message format:
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ Byte 0:     Sequence number (from the Play request)             │
//! │ Byte 1:     Frame type (see FrameType)                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ [Unless sequence header] Timestamp (int64 big-endian)           │
//! │ [If steady clock negotiated] Steady value (int64 big-endian)    │
//! │ [AVC/HEVC non-header] Composition offset (int32 big-endian)     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Codec payload                                                   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, MediaType, Result};

/// Frame type codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    AacSequenceHeader = 0,
    AacFrame = 1,
    AvcSequenceHeader = 2,
    AvcKeyFrame = 3,
    AvcFrame = 4,
    HevcSequenceHeader = 5,
    HevcKeyFrame = 6,
    HevcFrame = 7,
    Vp6KeyFrame = 8,
    Vp6Frame = 9,
    Vp8KeyFrame = 10,
    Vp8Frame = 11,
    Vp9KeyFrame = 12,
    Vp9Frame = 13,
    Mp3Frame = 14,
    OpusFrame = 15,
    Av1SequenceHeader = 16,
    Av1KeyFrame = 17,
    Av1Frame = 18,
}

impl FrameType {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(FrameType::AacSequenceHeader),
            1 => Some(FrameType::AacFrame),
            2 => Some(FrameType::AvcSequenceHeader),
            3 => Some(FrameType::AvcKeyFrame),
            4 => Some(FrameType::AvcFrame),
            5 => Some(FrameType::HevcSequenceHeader),
            6 => Some(FrameType::HevcKeyFrame),
            7 => Some(FrameType::HevcFrame),
            8 => Some(FrameType::Vp6KeyFrame),
            9 => Some(FrameType::Vp6Frame),
            10 => Some(FrameType::Vp8KeyFrame),
            11 => Some(FrameType::Vp8Frame),
            12 => Some(FrameType::Vp9KeyFrame),
            13 => Some(FrameType::Vp9Frame),
            14 => Some(FrameType::Mp3Frame),
            15 => Some(FrameType::OpusFrame),
            16 => Some(FrameType::Av1SequenceHeader),
            17 => Some(FrameType::Av1KeyFrame),
            18 => Some(FrameType::Av1Frame),
            _ => None,
        }
    }

    pub fn is_sequence_header(&self) -> bool {
        matches!(
            self,
            FrameType::AacSequenceHeader
                | FrameType::AvcSequenceHeader
                | FrameType::HevcSequenceHeader
                | FrameType::Av1SequenceHeader
        )
    }

    /// AVC/HEVC data frames carry a composition time offset
    pub fn has_composition_offset(&self) -> bool {
        matches!(
            self,
            FrameType::AvcKeyFrame
                | FrameType::AvcFrame
                | FrameType::HevcKeyFrame
                | FrameType::HevcFrame
        )
    }

    /// Data frames in length-prefixed NAL unit format
    pub fn is_h26x(&self) -> bool {
        self.has_composition_offset()
    }

    pub fn is_key_frame(&self) -> bool {
        matches!(
            self,
            FrameType::AvcKeyFrame
                | FrameType::HevcKeyFrame
                | FrameType::Vp6KeyFrame
                | FrameType::Vp8KeyFrame
                | FrameType::Vp9KeyFrame
                | FrameType::Av1KeyFrame
        )
    }

    pub fn media_type(&self) -> MediaType {
        match self {
            FrameType::AacSequenceHeader
            | FrameType::AacFrame
            | FrameType::Mp3Frame
            | FrameType::OpusFrame => MediaType::Audio,
            _ => MediaType::Video,
        }
    }
}

fn code_is_sequence_header(code: u8) -> bool {
    FrameType::from_u8(code).is_some_and(|t| t.is_sequence_header())
}

fn code_has_composition_offset(code: u8) -> bool {
    FrameType::from_u8(code).is_some_and(|t| t.has_composition_offset())
}

/// One parsed binary media message, borrowing its payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaMessage<'a> {
    pub sn: u8,
    /// Raw frame type code, possibly outside the known table
    pub type_code: u8,
    pub timestamp: Option<i64>,
    pub steady: Option<i64>,
    pub composition_offset: Option<i32>,
    pub payload: &'a [u8],
}

impl<'a> MediaMessage<'a> {
    /// Parse a message; `steady_expected` is set once the steady clock is negotiated
    pub fn parse(buf: &'a [u8], steady_expected: bool) -> Result<Self> {
        let mut offset = 2;
        need(buf, offset)?;

        let sn = buf[0];
        let type_code = buf[1];

        let mut timestamp = None;
        let mut steady = None;

        if !code_is_sequence_header(type_code) {
            need(buf, offset + 8)?;
            timestamp = Some(read_i64(&buf[offset..]));
            offset += 8;

            if steady_expected {
                need(buf, offset + 8)?;
                steady = Some(read_i64(&buf[offset..]));
                offset += 8;
            }
        }

        let mut composition_offset = None;
        if code_has_composition_offset(type_code) {
            need(buf, offset + 4)?;
            let b = &buf[offset..offset + 4];
            composition_offset = Some(i32::from_be_bytes([b[0], b[1], b[2], b[3]]));
            offset += 4;
        }

        Ok(Self {
            sn,
            type_code,
            timestamp,
            steady,
            composition_offset,
            payload: &buf[offset..],
        })
    }

    pub fn frame_type(&self) -> Option<FrameType> {
        FrameType::from_u8(self.type_code)
    }

    /// Encode back to the wire format
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + 8 + 8 + 4 + self.payload.len());
        buf.put_u8(self.sn);
        buf.put_u8(self.type_code);
        if let Some(ts) = self.timestamp {
            buf.put_i64(ts);
        }
        if let Some(steady) = self.steady {
            buf.put_i64(steady);
        }
        if let Some(cto) = self.composition_offset {
            buf.put_i32(cto);
        }
        buf.put_slice(self.payload);
        buf.freeze()
    }
}

fn need(buf: &[u8], needed: usize) -> Result<()> {
    if buf.len() < needed {
        return Err(Error::Truncated {
            needed,
            have: buf.len(),
        });
    }
    Ok(())
}

fn read_i64(b: &[u8]) -> i64 {
    i64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

/// Rewrite 4-byte NAL length prefixes to Annex-B start codes in place
///
/// Walks the buffer by the declared lengths; a length running past the end
/// simply terminates the walk.
pub fn rewrite_length_prefixes(buf: &mut [u8]) {
    let mut pos = 0usize;
    while buf.len().saturating_sub(pos) > 4 {
        let nalu_len = u32::from_be_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]);
        buf[pos..pos + 4].copy_from_slice(&[0, 0, 0, 1]);
        pos = pos.saturating_add(4).saturating_add(nalu_len as usize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type_table() {
        for code in 0..=18u8 {
            let ft = FrameType::from_u8(code).unwrap();
            assert_eq!(ft as u8, code);
        }
        assert_eq!(FrameType::from_u8(19), None);
    }

    #[test]
    fn test_sequence_header_has_no_timestamp() {
        let buf = [1, FrameType::AvcSequenceHeader as u8, 0xAA, 0xBB];
        let msg = MediaMessage::parse(&buf, true).unwrap();

        assert_eq!(msg.timestamp, None);
        assert_eq!(msg.steady, None);
        assert_eq!(msg.composition_offset, None);
        assert_eq!(msg.payload, &[0xAA, 0xBB]);
    }

    #[test]
    fn test_truncated_timestamp_is_error() {
        let buf = [1, FrameType::AacFrame as u8, 0, 0, 0];
        assert!(matches!(
            MediaMessage::parse(&buf, false),
            Err(Error::Truncated { needed: 10, have: 5 })
        ));
    }

    #[test]
    fn test_rewrite_two_nal_units() {
        let mut buf = vec![0, 0, 0, 2, 0x65, 0x88, 0, 0, 0, 1, 0x06];
        rewrite_length_prefixes(&mut buf);
        assert_eq!(buf, vec![0, 0, 0, 1, 0x65, 0x88, 0, 0, 0, 1, 0x06]);
    }

    #[test]
    fn test_rewrite_bogus_length_terminates() {
        let mut buf = vec![0xFF, 0xFF, 0xFF, 0xFF, 1, 2, 3];
        rewrite_length_prefixes(&mut buf);
        assert_eq!(&buf[..4], &[0, 0, 0, 1]);
    }
}
