//! SLDP protocol engine
//!
//! Sans-IO state machine for one connection, driven by a
//! [`Transport`](sldp_transport::Transport) through [`TransportHandler`]:
//!
//! ```text
//! INITIAL ──connect──▶ HANDSHAKE ──101──▶ STATUS ──Play──▶ PLAY
//!    │                     │                 │               │
//!    └─────────────────────┴───── close ─────┴───────────────┴──▶ CLOSED
//! ```
//!
//! Outbound bytes (the upgrade request, Play and Cancel commands) are queued
//! and handed to the transport from [`TransportHandler::poll_outbound`].

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::{Buf, Bytes, BytesMut};
use parking_lot::RwLock;
use rand::RngCore;
use sldp_core::frame::encode_text;
use sldp_core::messages::{CancelCommand, ControlMessage, PlayCommand, PlayEntry, StatusCommand};
use sldp_core::{
    Clock, Decoded, DiagnosticInfo, Error, FrameType, HandshakeParser, MediaMessage, MediaType,
    PlayRequest, PlaybackState, Result, State, Status, StreamBuffer, StreamBufferFactory,
    WebSocketFramer, WsEvent, SWITCHING_PROTOCOLS, WS_SUBPROTOCOL, WS_VERSION,
};
use sldp_transport::{CloseReason, TransportHandler};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::config::ConnectionConfig;
use crate::listener::Notifier;

/// Streams announced by the server, by catalog id
pub type Catalog = Arc<RwLock<BTreeMap<u32, Arc<StreamBuffer>>>>;

/// Connection phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initial,
    Handshake,
    Status,
    Play,
    Closed,
}

/// Protocol state machine for one connection
pub struct ProtocolEngine {
    connection_id: u32,
    host: String,
    port: u16,
    app: String,
    stream: String,
    tls: bool,
    user_agent: String,
    playback_delay_us: i64,

    phase: Phase,
    status: Status,
    diagnostics: DiagnosticInfo,

    parser: HandshakeParser,
    framer: WebSocketFramer,

    catalog: Catalog,
    by_sn: HashMap<u8, Arc<StreamBuffer>>,
    next_stream_id: u32,
    last_sn: u8,

    /// Local anchor for remote steady values; set only when frames carry them
    zero_time: Option<i64>,

    factory: Arc<dyn StreamBufferFactory>,
    notifier: Notifier,
    clock: Arc<dyn Clock>,
    rng: Box<dyn RngCore + Send>,
    outbound: VecDeque<Bytes>,
}

impl ProtocolEngine {
    /// `clock` must be the clock the factory's buffers measure drift against
    pub fn new(
        config: &ConnectionConfig,
        factory: Arc<dyn StreamBufferFactory>,
        notifier: Notifier,
        clock: Arc<dyn Clock>,
        rng: Box<dyn RngCore + Send>,
    ) -> Self {
        Self {
            connection_id: config.connection_id,
            host: config.host.clone(),
            port: config.port,
            app: config.app.clone(),
            stream: config.stream.clone(),
            tls: config.tls,
            user_agent: config.user_agent().to_string(),
            playback_delay_us: config.playback_delay_us(),
            phase: Phase::Initial,
            status: Status::ConnFail,
            diagnostics: DiagnosticInfo::new(),
            parser: HandshakeParser::new(),
            framer: WebSocketFramer::new(),
            catalog: Arc::new(RwLock::new(BTreeMap::new())),
            by_sn: HashMap::new(),
            next_stream_id: 0,
            last_sn: 0,
            zero_time: None,
            factory,
            notifier,
            clock,
            rng,
            outbound: VecDeque::new(),
        }
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Most specific status captured so far
    pub fn status(&self) -> Status {
        self.status
    }

    pub fn diagnostics(&self) -> &DiagnosticInfo {
        &self.diagnostics
    }

    pub fn catalog(&self) -> Catalog {
        self.catalog.clone()
    }

    pub fn stream_by_id(&self, stream_id: u32) -> Option<Arc<StreamBuffer>> {
        self.catalog.read().get(&stream_id).cloned()
    }

    /// Whether binary frames carry a steady value
    pub fn steady_active(&self) -> bool {
        self.zero_time.is_some()
    }

    pub fn zero_time(&self) -> Option<i64> {
        self.zero_time
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// Report the connection as created
    pub fn start(&mut self) {
        debug!("Connection {} initialized", self.connection_id);
        self.notify(State::Initialized, Status::Success);
    }

    /// Start the given catalog streams
    ///
    /// Unknown stream ids are skipped. Fails with [`Error::InvalidState`]
    /// before the catalog is known, after close, or when every sequence
    /// number is held by a playing stream. Any other error means the
    /// connection must be closed.
    pub fn play(&mut self, requests: &[PlayRequest]) -> Result<()> {
        self.require_open("Play")?;

        let steady = self.steady_active();
        let mut assigned = Vec::with_capacity(requests.len());

        for request in requests {
            let Some(buffer) = self.stream_by_id(request.stream_id) else {
                warn!("Play: unknown stream id {}", request.stream_id);
                continue;
            };

            let previous = buffer.sn();
            if let Some(previous) = previous {
                self.by_sn.remove(&previous);
            }
            let sn = match self.next_sn() {
                Ok(sn) => sn,
                Err(e) => {
                    if let Some(previous) = previous {
                        self.by_sn.insert(previous, buffer);
                    }
                    self.unassign(assigned);
                    return Err(e);
                }
            };
            buffer.set_sn(Some(sn));
            self.by_sn.insert(sn, buffer.clone());
            assigned.push((request, buffer, sn, previous));
        }

        let mut entries = Vec::with_capacity(assigned.len());
        for (request, buffer, sn, _) in &assigned {
            buffer.set_state(PlaybackState::Play);
            buffer.set_request(request.offset_ms, request.duration_ms);
            entries.push(PlayEntry::new(
                buffer.stream(),
                buffer.media_type(),
                *sn,
                request.offset_ms,
                request.duration_ms,
                steady,
            ));
        }

        if entries.is_empty() {
            debug!("Play: nothing to request");
            return Ok(());
        }

        let json = PlayCommand::new(entries).to_json()?;
        debug!("-> {}", json);
        self.send_command(&json)?;

        if self.phase == Phase::Status {
            self.phase = Phase::Play;
            self.notify(State::Play, Status::Success);
        }
        Ok(())
    }

    /// Stop the given catalog streams and release their buffers
    pub fn cancel(&mut self, stream_ids: &[u32]) -> Result<()> {
        self.require_open("Cancel")?;

        let mut cancelled = Vec::with_capacity(stream_ids.len());
        for &stream_id in stream_ids {
            let Some(buffer) = self.stream_by_id(stream_id) else {
                warn!("Cancel: unknown stream id {}", stream_id);
                continue;
            };
            let Some(sn) = buffer.sn() else {
                warn!("Cancel: stream {} is not playing", stream_id);
                continue;
            };
            cancelled.push((sn, buffer));
        }

        if cancelled.is_empty() {
            debug!("Cancel: nothing to cancel");
            return Ok(());
        }

        let json = CancelCommand::new(cancelled.iter().map(|(sn, _)| *sn)).to_json()?;
        debug!("-> {}", json);
        self.send_command(&json)?;

        for (sn, buffer) in cancelled {
            buffer.set_state(PlaybackState::Stop);
            self.by_sn.remove(&sn);
            buffer.release();
        }
        Ok(())
    }

    fn require_open(&self, command: &str) -> Result<()> {
        match self.phase {
            Phase::Status | Phase::Play => Ok(()),
            phase => Err(Error::InvalidState(format!(
                "{} not allowed in {:?}",
                command, phase
            ))),
        }
    }

    /// Sequence numbers are one byte on the wire; 0 is never assigned and
    /// numbers held by a playing stream are skipped
    fn next_sn(&mut self) -> Result<u8> {
        let mut candidate = self.last_sn;
        for _ in 0..u8::MAX {
            candidate = candidate.wrapping_add(1);
            if candidate == 0 {
                candidate = 1;
            }
            if !self.by_sn.contains_key(&candidate) {
                self.last_sn = candidate;
                return Ok(candidate);
            }
        }
        Err(Error::InvalidState(format!(
            "all {} sequence numbers are in use",
            u8::MAX
        )))
    }

    /// Undo sequence numbers handed out by a Play that failed part way
    fn unassign(&mut self, assigned: Vec<(&PlayRequest, Arc<StreamBuffer>, u8, Option<u8>)>) {
        for (_, buffer, sn, previous) in assigned.into_iter().rev() {
            self.by_sn.remove(&sn);
            buffer.set_sn(previous);
            if let Some(previous) = previous {
                self.by_sn.insert(previous, buffer);
            }
        }
    }

    fn send_command(&mut self, json: &str) -> Result<()> {
        let mut mask = [0u8; 4];
        self.rng.fill_bytes(&mut mask);
        let frame = encode_text(json.as_bytes(), mask)?;
        self.outbound.push_back(frame);
        Ok(())
    }

    fn upgrade_request(&mut self) -> String {
        let mut nonce = [0u8; 16];
        self.rng.fill_bytes(&mut nonce);
        let origin = if self.tls { "https" } else { "http" };

        format!(
            "GET /{}/{} HTTP/1.1\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Host: {}:{}\r\n\
             Origin: {}://{}\r\n\
             Sec-WebSocket-Protocol: {}\r\n\
             Pragma: no-cache\r\n\
             Sec-WebSocket-Key: {}\r\n\
             Sec-WebSocket-Version: {}\r\n\
             Sec-WebSocket-Extensions: x-webkit-deflate-frame\r\n\
             User-Agent: {}\r\n\
             \r\n",
            self.app,
            self.stream,
            self.host,
            self.port,
            origin,
            self.host,
            WS_SUBPROTOCOL,
            BASE64.encode(nonce),
            WS_VERSION,
            self.user_agent,
        )
    }

    fn notify(&self, state: State, status: Status) {
        self.notifier.state_changed(state, status, DiagnosticInfo::new());
    }

    /// Returns true once the upgrade is accepted
    fn process_handshake(&mut self, data: &mut BytesMut) -> Result<bool> {
        let consumed = self.parser.parse(data)?;
        data.advance(consumed);

        if self.parser.is_foreign() {
            return Err(Error::Protocol("upgrade response is not HTTP".into()));
        }
        if !self.parser.is_complete() {
            return Ok(false);
        }

        let code = self.parser.status_code().unwrap_or_default();
        if code != SWITCHING_PROTOCOLS {
            let text = self.parser.status_text().to_string();
            warn!("Upgrade rejected: {} {}", code, text);
            self.status = Status::HandshakeFail;
            self.diagnostics.insert(DiagnosticInfo::STATUS_CODE, code);
            self.diagnostics.insert(DiagnosticInfo::STATUS_TEXT, text.clone());
            return Err(Error::Protocol(format!("upgrade rejected: {} {}", code, text)));
        }

        info!("WebSocket upgrade accepted");
        self.phase = Phase::Status;
        self.status = Status::UnknownFail;
        self.notify(State::Setup, Status::Success);
        Ok(true)
    }

    fn process_frames(&mut self, data: &mut BytesMut) -> Result<()> {
        loop {
            match self.framer.decode(data)? {
                Decoded::Incomplete => return Ok(()),
                Decoded::Frame { consumed, event } => {
                    data.advance(consumed);
                    match event {
                        Some(WsEvent::Text(text)) => self.process_text(&text)?,
                        Some(WsEvent::Binary(message)) => self.process_binary(message)?,
                        Some(WsEvent::Close) => return Err(Error::ConnectionClosed),
                        Some(WsEvent::Ping) | Some(WsEvent::Pong) => trace!("control frame"),
                        None => {}
                    }
                }
            }
            if self.phase == Phase::Closed {
                return Ok(());
            }
        }
    }

    fn process_text(&mut self, text: &str) -> Result<()> {
        debug!("<- {}", text);
        match ControlMessage::parse(text)? {
            ControlMessage::Status(status) => self.process_status(status),
            ControlMessage::Other(command) => {
                debug!("Ignoring command {:?}", command);
                Ok(())
            }
        }
    }

    fn process_status(&mut self, status: StatusCommand) -> Result<()> {
        match (status.steady, status.system) {
            (Some(steady), Some(_)) => {
                self.notify(State::SteadySupportCheck, Status::Success);
                if self.playback_delay_us > 0 {
                    let zero_time = self
                        .clock
                        .now_micros()
                        .saturating_sub(steady)
                        .saturating_add(self.playback_delay_us);
                    debug!("Steady clock anchored, zero time {}", zero_time);
                    self.zero_time = Some(zero_time);
                }
            }
            _ => {
                warn!("Server does not report steady clock");
                self.notify(State::SteadySupportCheck, Status::SteadyUnsupported);
            }
        }

        let streams = status.streams()?;
        if streams.is_empty() {
            debug!("Status carries no streams");
            return Ok(());
        }

        for descriptor in streams {
            if let Some(video) = descriptor.video()? {
                let stream_id = self.allocate_stream_id();
                let buffer = self
                    .factory
                    .create_video_buffer()
                    .with_identity(self.connection_id, stream_id, video.stream);
                buffer.set_timescale(video.timescale);
                buffer.set_bandwidth(video.bandwidth);
                buffer.set_size(video.size);
                buffer.set_codec(video.codec);
                info!(
                    "Stream {}: video {} {:?} {:?}",
                    stream_id,
                    buffer.stream(),
                    buffer.mime_type(),
                    buffer.size()
                );
                self.catalog.write().insert(stream_id, Arc::new(buffer));
            }

            if let Some(audio) = descriptor.audio()? {
                let stream_id = self.allocate_stream_id();
                let buffer = self
                    .factory
                    .create_audio_buffer()
                    .with_identity(self.connection_id, stream_id, audio.stream);
                buffer.set_timescale(audio.timescale);
                buffer.set_bandwidth(audio.bandwidth);
                buffer.set_codec(Some(audio.codec));
                info!(
                    "Stream {}: audio {} {:?}",
                    stream_id,
                    buffer.stream(),
                    buffer.mime_type()
                );
                self.catalog.write().insert(stream_id, Arc::new(buffer));
            }
        }

        self.notifier.stream_info_received();
        Ok(())
    }

    fn allocate_stream_id(&mut self) -> u32 {
        self.next_stream_id += 1;
        self.next_stream_id
    }

    fn process_binary(&mut self, message: Bytes) -> Result<()> {
        let (sn, type_code, timestamp, steady, offset, payload_start) = {
            let msg = MediaMessage::parse(&message, self.steady_active())?;
            (
                msg.sn,
                msg.type_code,
                msg.timestamp.unwrap_or_default(),
                msg.steady,
                msg.composition_offset.unwrap_or_default(),
                message.len() - msg.payload.len(),
            )
        };

        let Some(frame_type) = FrameType::from_u8(type_code) else {
            trace!("Dropping unknown frame type {}", type_code);
            return Ok(());
        };
        let Some(buffer) = self.by_sn.get(&sn).cloned() else {
            trace!("Dropping frame for unknown sn {}", sn);
            return Ok(());
        };
        let payload = message.slice(payload_start..);

        match buffer.media_type() {
            MediaType::Video => write_video(&buffer, frame_type, timestamp, offset, payload),
            MediaType::Audio => write_audio(&buffer, frame_type, timestamp, payload),
        }

        if let (Some(steady), Some(zero_time)) = (steady, self.zero_time) {
            if records_steady(buffer.media_type(), frame_type) {
                buffer.notify_steady_timestamp(zero_time, steady);
            }
        }
        Ok(())
    }
}

fn write_video(
    buffer: &StreamBuffer,
    frame_type: FrameType,
    timestamp: i64,
    offset: i32,
    payload: Bytes,
) {
    if buffer.state() != PlaybackState::Play {
        return;
    }

    match frame_type {
        FrameType::AvcSequenceHeader
        | FrameType::HevcSequenceHeader
        | FrameType::Av1SequenceHeader => buffer.set_extradata(payload),
        FrameType::AvcKeyFrame
        | FrameType::AvcFrame
        | FrameType::HevcKeyFrame
        | FrameType::HevcFrame => buffer.write_h26x_frame(
            timestamp,
            offset,
            BytesMut::from(payload.as_ref()),
            frame_type.is_key_frame(),
        ),
        FrameType::Vp6KeyFrame
        | FrameType::Vp6Frame
        | FrameType::Vp8KeyFrame
        | FrameType::Vp8Frame
        | FrameType::Vp9KeyFrame
        | FrameType::Vp9Frame
        | FrameType::Av1KeyFrame
        | FrameType::Av1Frame => {
            buffer.write_vpx_frame(timestamp, payload, frame_type.is_key_frame())
        }
        _ => trace!("Dropping {:?} on a video stream", frame_type),
    }
}

fn write_audio(buffer: &StreamBuffer, frame_type: FrameType, timestamp: i64, payload: Bytes) {
    if buffer.state() != PlaybackState::Play {
        return;
    }

    match frame_type {
        FrameType::AacSequenceHeader => buffer.set_extradata(payload),
        FrameType::AacFrame | FrameType::Mp3Frame | FrameType::OpusFrame => {
            buffer.write_audio_frame(timestamp, payload)
        }
        _ => trace!("Dropping {:?} on an audio stream", frame_type),
    }
}

/// Frames that anchor a steady sample: video key frames, audio data frames
fn records_steady(media_type: MediaType, frame_type: FrameType) -> bool {
    match media_type {
        MediaType::Video => matches!(
            frame_type,
            FrameType::AvcKeyFrame
                | FrameType::HevcKeyFrame
                | FrameType::Vp8KeyFrame
                | FrameType::Vp9KeyFrame
                | FrameType::Av1KeyFrame
        ),
        MediaType::Audio => matches!(
            frame_type,
            FrameType::AacFrame | FrameType::Mp3Frame | FrameType::OpusFrame
        ),
    }
}

impl TransportHandler for ProtocolEngine {
    fn on_connect(&mut self) -> Result<()> {
        info!("Connected to {}:{}", self.host, self.port);
        self.notify(State::Connected, Status::Success);

        let request = self.upgrade_request();
        self.outbound.push_back(Bytes::from(request));

        self.phase = Phase::Handshake;
        self.status = Status::ConnFail;
        Ok(())
    }

    fn on_receive(&mut self, data: &mut BytesMut) -> Result<()> {
        if self.phase == Phase::Handshake && !self.process_handshake(data)? {
            return Ok(());
        }

        match self.phase {
            Phase::Status | Phase::Play => self.process_frames(data),
            _ => {
                data.clear();
                Ok(())
            }
        }
    }

    fn on_send(&mut self) {
        trace!("Outbound drained");
    }

    fn poll_outbound(&mut self) -> Option<Bytes> {
        self.outbound.pop_front()
    }

    fn on_close(&mut self, reason: &CloseReason) {
        if self.phase == Phase::Closed {
            return;
        }
        self.phase = Phase::Closed;
        self.outbound.clear();

        match reason {
            CloseReason::Requested => {
                if self.status != Status::HandshakeFail {
                    self.status = Status::Success;
                }
                info!("Connection {} released", self.connection_id);
            }
            CloseReason::PeerClosed => {
                info!("Connection {} closed by server", self.connection_id);
                self.diagnostics
                    .insert(DiagnosticInfo::REASON, reason.to_string());
            }
            CloseReason::Inactivity | CloseReason::Failed(_) => {
                warn!("Connection {} closed: {}", self.connection_id, reason);
                self.diagnostics
                    .insert(DiagnosticInfo::REASON, reason.to_string());
            }
        }

        self.notifier
            .state_changed(State::Disconnected, self.status, self.diagnostics.clone());
    }
}

impl std::fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("connection_id", &self.connection_id)
            .field("phase", &self.phase)
            .field("status", &self.status)
            .field("streams", &self.catalog.read().len())
            .finish()
    }
}
