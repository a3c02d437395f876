//! Connection, stream and codec types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Connection lifecycle state reported to the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    Initialized,
    Connected,
    Setup,
    Play,
    Disconnected,
    SteadySupportCheck,
}

/// Outcome attached to a state notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Success,
    /// Socket or TLS failure before or during connect
    #[default]
    ConnFail,
    /// Reserved for credential failures
    AuthFail,
    /// Upgrade response was not 101
    HandshakeFail,
    UnknownFail,
    /// Server lacks clock-sync fields; playback continues without drift correction
    SteadyUnsupported,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Media kind of a stream buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Audio,
    Video,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Audio => "audio",
            MediaType::Video => "video",
        }
    }
}

/// Playback state of a stream buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PlaybackState {
    #[default]
    Stop,
    Play,
}

/// Codecs the catalog can announce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    Avc,
    Hevc,
    Vp8,
    Vp9,
    Av1,
    Opus,
    Mp3,
    Aac,
}

impl Codec {
    /// Map a catalog `vcodec` string by prefix; unknown prefixes yield `None`
    pub fn from_video_name(name: &str) -> Option<Self> {
        if name.starts_with("avc1") {
            Some(Codec::Avc)
        } else if name.starts_with("hvc1") {
            Some(Codec::Hevc)
        } else if name.starts_with("vp8") {
            Some(Codec::Vp8)
        } else if name.starts_with("vp9") {
            Some(Codec::Vp9)
        } else if name.starts_with("av01") {
            Some(Codec::Av1)
        } else {
            None
        }
    }

    /// Map a catalog `acodec` string; anything unrecognized is AAC
    pub fn from_audio_name(name: &str) -> Self {
        if name.starts_with("opus") {
            Codec::Opus
        } else if name == "mp4a.40.34" {
            Codec::Mp3
        } else {
            Codec::Aac
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            Codec::Avc => "video/avc",
            Codec::Hevc => "video/hevc",
            Codec::Vp8 => "video/x-vnd.on2.vp8",
            Codec::Vp9 => "video/x-vnd.on2.vp9",
            Codec::Av1 => "video/av01",
            Codec::Opus => "audio/opus",
            Codec::Mp3 => "audio/mpeg",
            Codec::Aac => "audio/mp4a-latm",
        }
    }

    pub fn media_type(&self) -> MediaType {
        match self {
            Codec::Opus | Codec::Mp3 | Codec::Aac => MediaType::Audio,
            _ => MediaType::Video,
        }
    }
}

/// Video frame dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Client intent to start one catalog stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayRequest {
    pub stream_id: u32,
    /// Seek offset in milliseconds
    pub offset_ms: i32,
    /// Duration in milliseconds, 0 for unbounded
    pub duration_ms: i32,
}

impl PlayRequest {
    pub fn new(stream_id: u32, offset_ms: i32, duration_ms: i32) -> Self {
        Self {
            stream_id,
            offset_ms,
            duration_ms,
        }
    }

    /// Live edge, unbounded
    pub fn live(stream_id: u32) -> Self {
        Self::new(stream_id, 0, 0)
    }
}

/// Diagnostic key/value pairs attached to a failure notification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiagnosticInfo(BTreeMap<String, serde_json::Value>);

impl DiagnosticInfo {
    /// HTTP status code of a rejected upgrade
    pub const STATUS_CODE: &'static str = "statusCode";
    /// HTTP status text of a rejected upgrade
    pub const STATUS_TEXT: &'static str = "statusText";
    /// Human readable close cause
    pub const REASON: &'static str = "reason";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_prefixes() {
        assert_eq!(Codec::from_video_name("avc1.64001f"), Some(Codec::Avc));
        assert_eq!(Codec::from_video_name("hvc1.1.6.L93"), Some(Codec::Hevc));
        assert_eq!(Codec::from_video_name("av01.0.05M.08"), Some(Codec::Av1));
        assert_eq!(Codec::from_video_name("theora"), None);

        assert_eq!(Codec::from_audio_name("opus"), Codec::Opus);
        assert_eq!(Codec::from_audio_name("mp4a.40.34"), Codec::Mp3);
        assert_eq!(Codec::from_audio_name("mp4a.40.2"), Codec::Aac);
    }

    #[test]
    fn test_diagnostic_info_serializes_flat() {
        let mut info = DiagnosticInfo::new();
        info.insert(DiagnosticInfo::STATUS_CODE, 404);
        info.insert(DiagnosticInfo::STATUS_TEXT, "Not Found");

        let json = serde_json::to_string(&info).unwrap();
        assert_eq!(json, r#"{"statusCode":404,"statusText":"Not Found"}"#);
    }
}
