//! Protocol Engine Tests (sldp-client)
//!
//! Drives the engine directly through its transport callbacks:
//! - Upgrade request and handshake response handling
//! - Status command, stream catalog and steady clock negotiation
//! - Play / Cancel commands and media frame routing
//! - Failure paths and the close notification

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::BytesMut;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sldp_client::{ConnectionBuilder, ConnectionConfig, InlineDispatcher, Phase, ProtocolEngine};
use sldp_core::{
    Codec, DefaultBufferFactory, DiagnosticInfo, Error, FrameType, ManualClock, MediaMessage,
    PlayRequest, PlaybackState, Size, State, Status,
};
use sldp_test_utils::frames::{
    avcc_nal, binary_frame, close_frame, decode_client_frames, fragmented_binary,
    masked_server_frame, media_message, ping_frame, text_frame, upgrade_accepted,
    upgrade_rejected, ClientFrame, StatusBuilder,
};
use sldp_test_utils::EventCollector;
use sldp_transport::{CloseReason, TransportError, TransportHandler};
use std::sync::Arc;

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    engine: ProtocolEngine,
    events: Arc<EventCollector>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(ConnectionConfig::new("media.test", "live", "cam"))
    }

    fn with_delay(delay_ms: u32) -> Self {
        let mut config = ConnectionConfig::new("media.test", "live", "cam");
        config.steady_delay_ms = delay_ms;
        Self::with_config(config)
    }

    fn with_config(mut config: ConnectionConfig) -> Self {
        config.connection_id = 42;
        config.buffer_capacity = 8;
        let events = Arc::new(EventCollector::new());
        let clock = Arc::new(ManualClock::new(2_000_000));
        let factory = DefaultBufferFactory::new(config.buffer_capacity).with_clock(clock.clone());

        let engine = ConnectionBuilder::new(config)
            .listener(events.clone())
            .dispatcher(Arc::new(InlineDispatcher))
            .factory(Arc::new(factory))
            .clock(clock.clone())
            .rng(Box::new(StdRng::seed_from_u64(7)))
            .build_engine()
            .unwrap();

        Self {
            engine,
            events,
            clock,
        }
    }

    fn receive(&mut self, bytes: &[u8]) -> sldp_core::Result<()> {
        let mut data = BytesMut::from(bytes);
        let result = self.engine.on_receive(&mut data);
        assert!(
            result.is_err() || data.is_empty(),
            "{} bytes left unconsumed",
            data.len()
        );
        result
    }

    fn drain(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = self.engine.poll_outbound() {
            out.extend_from_slice(&chunk);
        }
        out
    }

    fn sent_frames(&mut self) -> Vec<ClientFrame> {
        decode_client_frames(&self.drain())
    }

    /// Connected, upgraded, status received
    fn ready(&mut self, status: StatusBuilder) {
        self.engine.on_connect().unwrap();
        self.drain();
        self.receive(upgrade_accepted().as_bytes()).unwrap();
        self.receive(&text_frame(&status.build())).unwrap();
    }

    fn play_all(&mut self) {
        let requests: Vec<_> = self
            .engine
            .catalog()
            .read()
            .keys()
            .map(|&id| PlayRequest::live(id))
            .collect();
        self.engine.play(&requests).unwrap();
    }
}

fn two_track_status() -> StatusBuilder {
    StatusBuilder::new()
        .video("cam", "avc1.64001f", 90_000, "1280x720")
        .audio("cam", "mp4a.40.2", 48_000)
}

// ============================================================================
// Handshake
// ============================================================================

#[test]
fn test_upgrade_request() {
    let mut h = Harness::new();
    h.engine.on_connect().unwrap();

    let request = String::from_utf8(h.drain()).unwrap();
    assert!(request.starts_with("GET /live/cam HTTP/1.1\r\n"));
    assert!(request.ends_with("\r\n\r\n"));
    for header in [
        "Upgrade: websocket\r\n",
        "Connection: Upgrade\r\n",
        "Host: media.test:80\r\n",
        "Sec-WebSocket-Protocol: sldp.softvelum.com\r\n",
        "Sec-WebSocket-Version: 13\r\n",
        "Sec-WebSocket-Extensions: x-webkit-deflate-frame\r\n",
        "User-Agent: SLDPLib/1.0\r\n",
    ] {
        assert!(request.contains(header), "missing {:?}", header);
    }

    let key = request
        .lines()
        .find_map(|l| l.strip_prefix("Sec-WebSocket-Key: "))
        .unwrap();
    assert_eq!(BASE64.decode(key).unwrap().len(), 16);

    assert_eq!(h.engine.phase(), Phase::Handshake);
    assert_eq!(h.events.states(), vec![(State::Connected, Status::Success)]);
}

#[test]
fn test_handshake_in_pieces() {
    let mut h = Harness::new();
    h.engine.on_connect().unwrap();

    let response = upgrade_accepted();
    let (head, tail) = response.as_bytes().split_at(20);

    let mut data = BytesMut::from(head);
    h.engine.on_receive(&mut data).unwrap();
    assert_eq!(h.engine.phase(), Phase::Handshake);

    data.extend_from_slice(tail);
    h.engine.on_receive(&mut data).unwrap();
    assert!(data.is_empty());
    assert_eq!(h.engine.phase(), Phase::Status);
    assert_eq!(h.events.count_of(State::Setup), 1);
}

#[test]
fn test_upgrade_and_status_in_one_read() {
    let mut h = Harness::new();
    h.engine.on_connect().unwrap();

    let mut bytes = upgrade_accepted().into_bytes();
    bytes.extend_from_slice(&text_frame(&two_track_status().build()));
    h.receive(&bytes).unwrap();

    assert_eq!(h.engine.catalog().read().len(), 2);
    assert_eq!(h.events.catalog_count(), 1);
}

#[test]
fn test_handshake_rejected() {
    let mut h = Harness::new();
    h.engine.on_connect().unwrap();

    let err = h
        .receive(upgrade_rejected(404, "Not Found").as_bytes())
        .unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
    assert_eq!(h.engine.status(), Status::HandshakeFail);

    h.engine
        .on_close(&CloseReason::Failed(TransportError::Protocol(err)));

    let event = h.events.last_event(State::Disconnected).unwrap();
    assert_eq!(event.status, Status::HandshakeFail);
    assert_eq!(event.connection_id, 42);
    assert_eq!(event.info.get(DiagnosticInfo::STATUS_CODE).unwrap(), 404);
    assert_eq!(
        event.info.get(DiagnosticInfo::STATUS_TEXT).unwrap(),
        "Not Found"
    );
}

#[test]
fn test_non_http_response_is_fatal() {
    let mut h = Harness::new();
    h.engine.on_connect().unwrap();
    assert!(h.receive(b"SSH-2.0-OpenSSH\r\n").is_err());
}

#[test]
fn test_connect_failure_reports_conn_fail() {
    let mut h = Harness::new();
    h.engine.on_close(&CloseReason::Failed(TransportError::ConnectionFailed(
        "refused".into(),
    )));

    let event = h.events.last_event(State::Disconnected).unwrap();
    assert_eq!(event.status, Status::ConnFail);
    assert!(event.info.contains(DiagnosticInfo::REASON));
}

// ============================================================================
// Status / Catalog
// ============================================================================

#[test]
fn test_status_builds_catalog() {
    let mut h = Harness::new();
    h.ready(two_track_status());

    let catalog = h.engine.catalog();
    let catalog = catalog.read();
    let video = catalog.get(&1).unwrap();
    let audio = catalog.get(&2).unwrap();

    assert!(video.is_video());
    assert_eq!(video.connection_id(), 42);
    assert_eq!(video.stream(), "cam");
    assert_eq!(video.codec(), Some(Codec::Avc));
    assert_eq!(video.mime_type(), Some("video/avc"));
    assert_eq!(video.timescale(), 90_000);
    assert_eq!(video.size(), Some(Size::new(1280, 720)));
    assert_eq!(video.bandwidth(), 2_000_000);
    assert_eq!(video.capacity(), 8);

    assert!(audio.is_audio());
    assert_eq!(audio.codec(), Some(Codec::Aac));
    assert_eq!(audio.timescale(), 48_000);
    assert_eq!(audio.state(), PlaybackState::Stop);

    assert_eq!(h.events.catalog_count(), 1);
}

#[test]
fn test_muxed_descriptor_allocates_two_buffers() {
    let mut h = Harness::new();
    h.ready(StatusBuilder::new().muxed("show", "hvc1.1.6.L93", "opus"));

    let streams = h.engine.catalog();
    let streams = streams.read();
    assert_eq!(streams.len(), 2);
    assert_eq!(streams[&1].mime_type(), Some("video/hevc"));
    assert_eq!(streams[&2].mime_type(), Some("audio/opus"));
}

#[test]
fn test_unknown_video_codec_leaves_mime_unset() {
    let mut h = Harness::new();
    h.ready(StatusBuilder::new().video("cam", "theora", 90_000, "320x240"));

    let buffer = h.engine.stream_by_id(1).unwrap();
    assert_eq!(buffer.codec(), None);
    assert_eq!(buffer.mime_type(), None);
}

#[test]
fn test_empty_info_sends_no_catalog_notification() {
    let mut h = Harness::new();
    h.ready(StatusBuilder::new());

    assert_eq!(h.events.catalog_count(), 0);
    assert_eq!(h.events.count_of(State::SteadySupportCheck), 1);
}

#[test]
fn test_missing_steady_is_unsupported() {
    let mut h = Harness::with_delay(500);
    h.ready(two_track_status());

    assert_eq!(
        h.events.last_event(State::SteadySupportCheck).unwrap().status,
        Status::SteadyUnsupported
    );
    assert!(!h.engine.steady_active());

    h.play_all();
    let play = h.sent_frames()[0].json().unwrap();
    assert!(play["streams"][0].get("steady").is_none());

    // No steady field on the wire
    let nal = avcc_nal(&[0x65, 0x88]);
    h.receive(&binary_frame(&media_message(
        1,
        FrameType::AvcKeyFrame,
        90_000,
        None,
        &nal,
    )))
    .unwrap();

    let video = h.engine.stream_by_id(1).unwrap();
    assert_eq!(video.message_index(), 1);
    assert_eq!(video.steady_sample_count(), 0);
    for playtime in [0, 1_000_000, 5_000_000] {
        assert_eq!(video.get_deviation_for_play_time(playtime), 0.0);
    }
}

#[test]
fn test_steady_without_delay_is_not_anchored() {
    let mut h = Harness::new();
    h.ready(two_track_status().steady(1_000_000, 1_700_000_000));

    assert_eq!(
        h.events.last_event(State::SteadySupportCheck).unwrap().status,
        Status::Success
    );
    assert!(!h.engine.steady_active());
}

#[test]
fn test_steady_anchor_and_samples() {
    let mut h = Harness::with_delay(500);
    h.ready(two_track_status().steady(1_000_000, 1_700_000_000));

    // now 2_000_000 - steady 1_000_000 + delay 500_000
    assert_eq!(h.engine.zero_time(), Some(1_500_000));

    h.play_all();
    let play = h.sent_frames()[0].json().unwrap();
    assert_eq!(play["streams"][0]["steady"], true);
    assert_eq!(play["streams"][1]["steady"], true);

    let nal = avcc_nal(&[0x65, 0x88]);
    h.receive(&binary_frame(&media_message(
        1,
        FrameType::AvcKeyFrame,
        90_000,
        Some(1_200_000),
        &nal,
    )))
    .unwrap();
    // Delta frames do not record a sample
    h.receive(&binary_frame(&media_message(
        1,
        FrameType::AvcFrame,
        180_000,
        Some(2_200_000),
        &nal,
    )))
    .unwrap();

    let video = h.engine.stream_by_id(1).unwrap();
    assert_eq!(video.message_index(), 2);
    assert_eq!(video.steady_sample_count(), 1);

    // Audio data frames always record
    h.receive(&binary_frame(&media_message(
        2,
        FrameType::AacFrame,
        48_000,
        Some(1_200_000),
        &[0x21, 0x10],
    )))
    .unwrap();
    let audio = h.engine.stream_by_id(2).unwrap();
    assert_eq!(audio.steady_sample_count(), 1);

    // Sample at pts 1 s, steady 1.2 s, anchored at zero time 1.5 s
    h.clock.set(2_000_000);
    let deviation = video.get_deviation_for_play_time(1_000_000);
    assert!((deviation - 0.7).abs() < 1e-9, "deviation {}", deviation);
}

#[test]
fn test_bad_timescale_is_fatal() {
    let mut h = Harness::new();
    h.engine.on_connect().unwrap();
    h.receive(upgrade_accepted().as_bytes()).unwrap();

    let status = StatusBuilder::new().descriptor(serde_json::json!({
        "stream": "cam",
        "stream_info": { "vcodec": "avc1", "vtimescale": "ninety" }
    }));
    assert!(h.receive(&text_frame(&status.build())).is_err());
}

#[test]
fn test_unknown_command_is_ignored() {
    let mut h = Harness::new();
    h.ready(two_track_status());
    h.receive(&text_frame(r#"{"command":"stats","bytes":"10"}"#))
        .unwrap();
    assert_eq!(h.engine.phase(), Phase::Status);
}

#[test]
fn test_text_without_command_is_fatal() {
    let mut h = Harness::new();
    h.ready(two_track_status());
    assert!(matches!(
        h.receive(&text_frame(r#"{"info":[]}"#)),
        Err(Error::MissingField("command"))
    ));
}

#[test]
fn test_status_without_info_reports_steady_check_first() {
    let mut h = Harness::new();
    h.engine.on_connect().unwrap();
    h.receive(upgrade_accepted().as_bytes()).unwrap();

    let err = h
        .receive(&text_frame(
            r#"{"command":"status","steady":"1000000","system":"1700000000"}"#,
        ))
        .unwrap_err();
    assert!(matches!(err, Error::MissingField("info")));
    assert_eq!(
        h.events.last_event(State::SteadySupportCheck).unwrap().status,
        Status::Success
    );
    assert_eq!(h.events.catalog_count(), 0);

    h.engine
        .on_close(&CloseReason::Failed(TransportError::Protocol(err)));
    assert_eq!(h.events.count_of(State::Disconnected), 1);
}

#[test]
fn test_extreme_steady_value_saturates() {
    let mut h = Harness::with_delay(500);
    h.ready(two_track_status().steady(i64::MIN, 1));

    assert_eq!(h.engine.zero_time(), Some(i64::MAX));
    assert_eq!(h.engine.phase(), Phase::Status);
    assert_eq!(h.events.count_of(State::Disconnected), 0);
    assert_eq!(h.events.catalog_count(), 1);
}

#[test]
fn test_extreme_timestamp_with_steady() {
    let mut h = Harness::with_delay(500);
    h.ready(two_track_status().steady(1_000_000, 1_700_000_000));
    h.play_all();
    h.drain();

    let nal = avcc_nal(&[0x65, 0x88]);
    let message = MediaMessage {
        sn: 1,
        type_code: FrameType::AvcKeyFrame as u8,
        timestamp: Some(i64::MAX),
        steady: Some(i64::MAX),
        composition_offset: Some(1),
        payload: &nal,
    }
    .encode();
    h.receive(&binary_frame(&message)).unwrap();

    let video = h.engine.stream_by_id(1).unwrap();
    assert_eq!(video.message_index(), 1);
    assert_eq!(video.end_timestamp().unwrap().pts(), i64::MAX);
    assert_eq!(video.steady_sample_count(), 1);
    assert!(video.get_deviation_for_play_time(i64::MAX).is_finite());
    assert_eq!(h.engine.phase(), Phase::Play);
}

// ============================================================================
// Play / Cancel / Media
// ============================================================================

#[test]
fn test_play_command() {
    let mut h = Harness::new();
    h.ready(two_track_status());

    h.engine
        .play(&[PlayRequest::new(1, 1500, 0), PlayRequest::live(2)])
        .unwrap();

    let frames = h.sent_frames();
    assert_eq!(frames.len(), 1);
    assert!(frames[0].masked);
    let play = frames[0].json().unwrap();
    assert_eq!(play["command"], "Play");
    assert_eq!(play["streams"][0]["stream"], "cam");
    assert_eq!(play["streams"][0]["type"], "video");
    assert_eq!(play["streams"][0]["sn"], "1");
    assert_eq!(play["streams"][0]["offsetMs"], "1500");
    assert_eq!(play["streams"][0]["duration"], "0");
    assert_eq!(play["streams"][1]["type"], "audio");
    assert_eq!(play["streams"][1]["sn"], "2");

    let video = h.engine.stream_by_id(1).unwrap();
    assert_eq!(video.state(), PlaybackState::Play);
    assert_eq!(video.sn(), Some(1));
    assert_eq!(video.offset_ms(), 1500);

    assert_eq!(h.engine.phase(), Phase::Play);
    assert_eq!(h.events.count_of(State::Play), 1);

    // A second Play does not repeat the notification
    h.engine.play(&[PlayRequest::live(2)]).unwrap();
    assert_eq!(h.events.count_of(State::Play), 1);
}

#[test]
fn test_play_unknown_stream_sends_nothing() {
    let mut h = Harness::new();
    h.ready(two_track_status());
    h.engine.play(&[PlayRequest::live(99)]).unwrap();
    assert!(h.drain().is_empty());
}

#[test]
fn test_play_before_catalog_is_rejected() {
    let mut h = Harness::new();
    assert!(matches!(
        h.engine.play(&[PlayRequest::live(1)]),
        Err(Error::InvalidState(_))
    ));
    h.engine.on_connect().unwrap();
    assert!(matches!(
        h.engine.play(&[PlayRequest::live(1)]),
        Err(Error::InvalidState(_))
    ));
}

#[test]
fn test_avc_key_frame_end_to_end() {
    let mut h = Harness::new();
    h.ready(two_track_status());
    h.engine.play(&[PlayRequest::live(1)]).unwrap();

    h.receive(&binary_frame(&media_message(
        1,
        FrameType::AvcSequenceHeader,
        0,
        None,
        &[0x01, 0x64, 0x00, 0x1f],
    )))
    .unwrap();

    let nal = avcc_nal(&[0x65, 0x88, 0x84, 0x00]);
    h.receive(&binary_frame(&media_message(
        1,
        FrameType::AvcKeyFrame,
        12345,
        None,
        &nal,
    )))
    .unwrap();

    let video = h.engine.stream_by_id(1).unwrap();
    assert_eq!(
        video.extradata().unwrap().as_ref(),
        &[0x01, 0x64, 0x00, 0x1f]
    );
    assert_eq!(video.message_index(), 1);

    let item = video.get_item(0).unwrap();
    assert!(item.is_key_frame());
    assert_eq!(item.data().as_ref(), &[0, 0, 0, 1, 0x65, 0x88, 0x84, 0x00]);
    assert_eq!(item.timestamp().dts(), 12345);
    assert_eq!(item.timestamp().timescale(), 90_000);
}

#[test]
fn test_fragmented_media_message() {
    let mut h = Harness::new();
    h.ready(two_track_status());
    h.engine.play(&[PlayRequest::live(2)]).unwrap();

    let message = media_message(1, FrameType::AacFrame, 1024, None, &[7u8; 300]);
    h.receive(&fragmented_binary(&message, 4)).unwrap();

    let audio = h.engine.stream_by_id(2).unwrap();
    assert_eq!(audio.message_index(), 1);
    assert_eq!(audio.get_item(0).unwrap().data().len(), 300);
}

#[test]
fn test_frames_for_unplayed_streams_are_dropped() {
    let mut h = Harness::new();
    h.ready(two_track_status());

    let nal = avcc_nal(&[0x65]);
    h.receive(&binary_frame(&media_message(
        1,
        FrameType::AvcKeyFrame,
        0,
        None,
        &nal,
    )))
    .unwrap();
    assert_eq!(h.engine.stream_by_id(1).unwrap().message_index(), 0);
}

#[test]
fn test_unknown_frame_type_is_dropped() {
    let mut h = Harness::new();
    h.ready(two_track_status());
    h.play_all();

    let mut message = vec![1u8, 99];
    message.extend_from_slice(&0i64.to_be_bytes());
    h.receive(&binary_frame(&message)).unwrap();
    assert_eq!(h.engine.phase(), Phase::Play);
}

#[test]
fn test_truncated_media_header_is_fatal() {
    let mut h = Harness::new();
    h.ready(two_track_status());
    h.play_all();

    assert!(matches!(
        h.receive(&binary_frame(&[1, FrameType::AacFrame as u8, 0, 0])),
        Err(Error::Truncated { .. })
    ));
}

#[test]
fn test_cancel() {
    let mut h = Harness::new();
    h.ready(two_track_status());
    h.play_all();
    h.drain();

    h.receive(&binary_frame(&media_message(
        2,
        FrameType::OpusFrame,
        960,
        None,
        &[1, 2, 3],
    )))
    .unwrap();
    let audio = h.engine.stream_by_id(2).unwrap();
    assert_eq!(audio.message_index(), 1);

    h.engine.cancel(&[2]).unwrap();
    let cancel = h.sent_frames()[0].json().unwrap();
    assert_eq!(cancel["command"], "Cancel");
    assert_eq!(cancel["streams"], serde_json::json!(["2"]));

    assert_eq!(audio.state(), PlaybackState::Stop);
    assert_eq!(audio.message_index(), 0);
    assert_eq!(audio.sn(), None);

    // Late frames for the cancelled sn are dropped
    h.receive(&binary_frame(&media_message(
        2,
        FrameType::OpusFrame,
        1920,
        None,
        &[4, 5, 6],
    )))
    .unwrap();
    assert_eq!(audio.message_index(), 0);

    // Cancelling again has nothing to send
    h.engine.cancel(&[2, 77]).unwrap();
    assert!(h.drain().is_empty());
}

#[test]
fn test_sequence_numbers_wrap_and_skip_zero() {
    let mut h = Harness::new();
    h.ready(two_track_status());

    for _ in 0..255 {
        h.engine.play(&[PlayRequest::live(1)]).unwrap();
    }
    let video = h.engine.stream_by_id(1).unwrap();
    assert_eq!(video.sn(), Some(255));

    h.engine.play(&[PlayRequest::live(1)]).unwrap();
    assert_eq!(video.sn(), Some(1));
}

#[test]
fn test_sequence_numbers_skip_live_streams() {
    let mut h = Harness::new();
    h.ready(two_track_status());

    h.engine.play(&[PlayRequest::live(1)]).unwrap();
    let video = h.engine.stream_by_id(1).unwrap();
    let audio = h.engine.stream_by_id(2).unwrap();
    assert_eq!(video.sn(), Some(1));

    for _ in 0..300 {
        h.engine.play(&[PlayRequest::live(2)]).unwrap();
        assert_ne!(audio.sn(), Some(1));
        h.engine.cancel(&[2]).unwrap();
    }
    h.drain();
    assert_eq!(video.sn(), Some(1));

    // sn 1 still routes to the video stream
    h.receive(&binary_frame(&media_message(
        1,
        FrameType::AvcKeyFrame,
        90_000,
        None,
        &avcc_nal(&[0x65, 0x88]),
    )))
    .unwrap();
    assert_eq!(video.message_index(), 1);
    assert_eq!(audio.message_index(), 0);
}

#[test]
fn test_sequence_numbers_exhausted() {
    let mut status = StatusBuilder::new();
    for i in 0..257 {
        status = status.audio(&format!("radio{i}"), "opus", 48_000);
    }
    let mut h = Harness::new();
    h.ready(status);

    for id in 1..=255 {
        h.engine.play(&[PlayRequest::live(id)]).unwrap();
    }
    h.drain();

    assert!(matches!(
        h.engine.play(&[PlayRequest::live(256)]),
        Err(Error::InvalidState(_))
    ));
    let extra = h.engine.stream_by_id(256).unwrap();
    assert_eq!(extra.sn(), None);
    assert_eq!(extra.state(), PlaybackState::Stop);
    assert!(h.drain().is_empty());

    // One free number; a batch needing two rolls back
    h.engine.cancel(&[5]).unwrap();
    h.drain();
    assert!(matches!(
        h.engine.play(&[PlayRequest::live(256), PlayRequest::live(257)]),
        Err(Error::InvalidState(_))
    ));
    assert_eq!(extra.sn(), None);
    assert!(h.drain().is_empty());

    // Replaying a live stream reuses its own number
    h.engine.play(&[PlayRequest::live(256)]).unwrap();
    assert_eq!(extra.sn(), Some(5));
    h.engine.play(&[PlayRequest::live(256)]).unwrap();
    assert_eq!(extra.sn(), Some(5));
    assert_eq!(h.engine.stream_by_id(1).unwrap().sn(), Some(1));
}

// ============================================================================
// Control frames and close
// ============================================================================

#[test]
fn test_ping_is_consumed_silently() {
    let mut h = Harness::new();
    h.ready(two_track_status());
    h.receive(&ping_frame()).unwrap();
    assert!(h.drain().is_empty());
}

#[test]
fn test_server_close_frame() {
    let mut h = Harness::new();
    h.ready(two_track_status());
    assert!(matches!(
        h.receive(&close_frame()),
        Err(Error::ConnectionClosed)
    ));
}

#[test]
fn test_masked_server_frame_is_fatal() {
    let mut h = Harness::new();
    h.ready(two_track_status());
    assert!(matches!(
        h.receive(&masked_server_frame("{}")),
        Err(Error::MaskedFrame)
    ));
}

#[test]
fn test_close_notifies_once() {
    let mut h = Harness::new();
    h.ready(two_track_status());

    h.engine.on_close(&CloseReason::PeerClosed);
    h.engine.on_close(&CloseReason::Requested);

    assert_eq!(h.events.count_of(State::Disconnected), 1);
    let event = h.events.last_event(State::Disconnected).unwrap();
    assert_eq!(event.status, Status::UnknownFail);
    assert_eq!(
        event.info.get(DiagnosticInfo::REASON).unwrap(),
        "closed by server"
    );
    assert!(h.engine.is_closed());
    assert!(matches!(
        h.engine.play(&[PlayRequest::live(1)]),
        Err(Error::InvalidState(_))
    ));
}

#[test]
fn test_release_reports_success() {
    let mut h = Harness::new();
    h.ready(two_track_status());
    h.engine.on_close(&CloseReason::Requested);

    let event = h.events.last_event(State::Disconnected).unwrap();
    assert_eq!(event.status, Status::Success);
    assert!(event.info.is_empty());
}

#[test]
fn test_notification_sequence() {
    let mut h = Harness::with_delay(100);
    h.engine.start();
    h.ready(two_track_status().steady(5, 6));
    h.play_all();
    h.engine.on_close(&CloseReason::Inactivity);

    assert_eq!(
        h.events.states(),
        vec![
            (State::Initialized, Status::Success),
            (State::Connected, Status::Success),
            (State::Setup, Status::Success),
            (State::SteadySupportCheck, Status::Success),
            (State::Play, Status::Success),
            (State::Disconnected, Status::UnknownFail),
        ]
    );
}
