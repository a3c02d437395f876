//! Control channel messages
//!
//! Server to client: `status` carrying the stream catalog and the optional
//! steady-clock anchor. Client to server: `Play` and `Cancel`.
//!
//! Numeric fields are accepted either as JSON numbers or numeric strings.

use regex_lite::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::OnceLock;

use crate::{Codec, Error, MediaType, Result, Size};

fn resolution_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)x(\d+)").expect("static regex"))
}

/// Inbound control message
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    Status(StatusCommand),
    /// Any other command, ignored by the client
    Other(String),
}

impl ControlMessage {
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let command = value
            .get("command")
            .and_then(Value::as_str)
            .ok_or(Error::MissingField("command"))?;

        if command.eq_ignore_ascii_case("status") {
            Ok(ControlMessage::Status(serde_json::from_value(value)?))
        } else {
            Ok(ControlMessage::Other(command.to_string()))
        }
    }
}

/// `status` command
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatusCommand {
    /// Server steady clock (µs); absent or unparsable means unsupported
    #[serde(default, deserialize_with = "advisory_i64")]
    pub steady: Option<i64>,
    /// Server system clock (µs)
    #[serde(default, deserialize_with = "advisory_i64")]
    pub system: Option<i64>,
    /// Stream catalog; checked by [`StatusCommand::streams`]
    #[serde(default)]
    pub info: Option<Vec<StreamDescriptor>>,
}

impl StatusCommand {
    /// Both clock fields present
    pub fn steady_supported(&self) -> bool {
        self.steady.is_some() && self.system.is_some()
    }

    /// Catalog entries, or [`Error::MissingField`] when `info` is absent
    pub fn streams(&self) -> Result<&[StreamDescriptor]> {
        self.info.as_deref().ok_or(Error::MissingField("info"))
    }
}

/// Catalog entry for one named stream
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StreamDescriptor {
    pub stream: String,
    pub stream_info: StreamInfo,
}

/// Raw `stream_info` object
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StreamInfo {
    pub vcodec: Option<String>,
    pub vtimescale: Option<Value>,
    pub acodec: Option<String>,
    pub atimescale: Option<Value>,
    pub bandwidth: Option<Value>,
    pub resolution: Option<String>,
}

/// Video track announced by a descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoInfo {
    pub stream: String,
    /// `None` for an unrecognized codec prefix
    pub codec: Option<Codec>,
    pub timescale: u32,
    pub bandwidth: u32,
    pub size: Option<Size>,
}

/// Audio track announced by a descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioInfo {
    pub stream: String,
    pub codec: Codec,
    pub timescale: u32,
    pub bandwidth: u32,
}

impl StreamDescriptor {
    pub fn video(&self) -> Result<Option<VideoInfo>> {
        let info = &self.stream_info;
        let (Some(vcodec), Some(timescale)) = (&info.vcodec, &info.vtimescale) else {
            return Ok(None);
        };

        Ok(Some(VideoInfo {
            stream: self.stream.clone(),
            codec: Codec::from_video_name(vcodec),
            timescale: parse_timescale(timescale, "vtimescale")?,
            bandwidth: info.bandwidth(),
            size: info.resolution.as_deref().and_then(parse_resolution),
        }))
    }

    pub fn audio(&self) -> Result<Option<AudioInfo>> {
        let info = &self.stream_info;
        let (Some(acodec), Some(timescale)) = (&info.acodec, &info.atimescale) else {
            return Ok(None);
        };

        Ok(Some(AudioInfo {
            stream: self.stream.clone(),
            codec: Codec::from_audio_name(acodec),
            timescale: parse_timescale(timescale, "atimescale")?,
            bandwidth: info.bandwidth(),
        }))
    }
}

impl StreamInfo {
    fn bandwidth(&self) -> u32 {
        self.bandwidth
            .as_ref()
            .and_then(lenient_i64)
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0)
    }
}

fn parse_timescale(value: &Value, field: &'static str) -> Result<u32> {
    lenient_i64(value)
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v > 0)
        .ok_or(Error::MissingField(field))
}

/// `WxH` anywhere in the string
pub fn parse_resolution(s: &str) -> Option<Size> {
    let caps = resolution_re().captures(s)?;
    Some(Size::new(caps[1].parse().ok()?, caps[2].parse().ok()?))
}

fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn advisory_i64<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(lenient_i64))
}

/// One stream entry of a `Play` command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayEntry {
    pub stream: String,
    #[serde(rename = "type")]
    pub kind: MediaType,
    pub sn: String,
    #[serde(rename = "offsetMs")]
    pub offset_ms: String,
    pub duration: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub steady: bool,
}

impl PlayEntry {
    pub fn new(stream: &str, kind: MediaType, sn: u8, offset_ms: i32, duration_ms: i32, steady: bool) -> Self {
        Self {
            stream: stream.to_string(),
            kind,
            sn: sn.to_string(),
            offset_ms: offset_ms.to_string(),
            duration: duration_ms.to_string(),
            steady,
        }
    }
}

/// `Play` command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlayCommand {
    command: &'static str,
    pub streams: Vec<PlayEntry>,
}

impl PlayCommand {
    pub fn new(streams: Vec<PlayEntry>) -> Self {
        Self {
            command: "Play",
            streams,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// `Cancel` command listing sequence numbers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CancelCommand {
    command: &'static str,
    pub streams: Vec<String>,
}

impl CancelCommand {
    pub fn new(sns: impl IntoIterator<Item = u8>) -> Self {
        Self {
            command: "Cancel",
            streams: sns.into_iter().map(|sn| sn.to_string()).collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
