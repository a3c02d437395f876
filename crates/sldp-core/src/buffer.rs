//! Per-stream frame buffer
//!
//! A [`StreamBuffer`] holds the most recent `capacity` frames of one audio or
//! video track in a ring indexed by `message_index % capacity`, along with
//! the steady-clock samples used to compute playback drift.
//!
//! The network task writes frames while a playback consumer reads them, so
//! all mutable state sits behind a single mutex.

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::trace;

use crate::media::rewrite_length_prefixes;
use crate::{Clock, Codec, MediaType, MonotonicClock, PlaybackState, Size, Timestamp};

/// Minimum presentation time between two recorded steady samples (µs)
pub const STEADY_SAMPLE_INTERVAL_US: i64 = 1_000_000;

/// Default ring capacity
pub const DEFAULT_CAPACITY: usize = 512;

/// One demuxed frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferItem {
    data: Bytes,
    timestamp: Timestamp,
    key_frame: bool,
    message_index: u64,
}

impl BufferItem {
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn is_key_frame(&self) -> bool {
        self.key_frame
    }

    /// Insertion index, assigned once by the owning buffer
    pub fn message_index(&self) -> u64 {
        self.message_index
    }
}

/// Consumer hooks fired by a [`StreamBuffer`]
///
/// Hooks run after the buffer lock is released, so they may read the buffer.
pub trait BufferObserver: Send + Sync {
    /// First decodable frame arrived
    fn on_ready(&self, _buffer: &StreamBuffer) {}

    /// Playback state was reset
    fn on_release(&self, _buffer: &StreamBuffer) {}

    /// A frame was inserted
    fn on_produced(&self, _buffer: &StreamBuffer, _item: &BufferItem) {}
}

/// Creates buffers for newly announced tracks
pub trait StreamBufferFactory: Send + Sync {
    fn create_video_buffer(&self) -> StreamBuffer;

    fn create_audio_buffer(&self) -> StreamBuffer;
}

/// Factory producing plain buffers of a fixed capacity
#[derive(Clone)]
pub struct DefaultBufferFactory {
    capacity: usize,
    clock: Arc<dyn Clock>,
    observer: Option<Arc<dyn BufferObserver>>,
}

impl Default for DefaultBufferFactory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl DefaultBufferFactory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            clock: Arc::new(MonotonicClock),
            observer: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn BufferObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn create(&self, media_type: MediaType) -> StreamBuffer {
        let mut buffer = StreamBuffer::with_clock(media_type, self.capacity, self.clock.clone());
        if let Some(observer) = &self.observer {
            buffer = buffer.with_observer(observer.clone());
        }
        buffer
    }
}

impl StreamBufferFactory for DefaultBufferFactory {
    fn create_video_buffer(&self) -> StreamBuffer {
        self.create(MediaType::Video)
    }

    fn create_audio_buffer(&self) -> StreamBuffer {
        self.create(MediaType::Audio)
    }
}

#[derive(Debug)]
struct Inner {
    state: PlaybackState,
    timescale: u32,
    codec: Option<Codec>,
    size: Option<Size>,
    bandwidth: u32,
    extradata: Option<Bytes>,
    initialized: bool,

    ring: Vec<Option<BufferItem>>,
    message_index: u64,
    start_ts: Option<Timestamp>,
    end_ts: Option<Timestamp>,

    offset_ms: i32,
    duration_ms: i32,
    sn: Option<u8>,

    /// local PTS (µs) -> server steady clock (µs)
    steady_map: BTreeMap<i64, i64>,
    steady_offset: Option<i64>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: PlaybackState::Stop,
            timescale: 0,
            codec: None,
            size: None,
            bandwidth: 0,
            extradata: None,
            initialized: false,
            ring: Vec::new(),
            message_index: 0,
            start_ts: None,
            end_ts: None,
            offset_ms: 0,
            duration_ms: 0,
            sn: None,
            steady_map: BTreeMap::new(),
            steady_offset: None,
        }
    }
}

enum Written {
    Dropped,
    Stored { item: BufferItem, became_ready: bool },
}

/// Frame ring and clock-sync state for one track
pub struct StreamBuffer {
    media_type: MediaType,
    connection_id: u32,
    stream_id: u32,
    stream: String,
    capacity: usize,
    clock: Arc<dyn Clock>,
    observer: Option<Arc<dyn BufferObserver>>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for StreamBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBuffer")
            .field("media_type", &self.media_type)
            .field("connection_id", &self.connection_id)
            .field("stream_id", &self.stream_id)
            .field("stream", &self.stream)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl StreamBuffer {
    pub fn new(media_type: MediaType, capacity: usize) -> Self {
        Self::with_clock(media_type, capacity, Arc::new(MonotonicClock))
    }

    pub fn with_clock(media_type: MediaType, capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            media_type,
            connection_id: 0,
            stream_id: 0,
            stream: String::new(),
            capacity: capacity.max(1),
            clock,
            observer: None,
            inner: Mutex::new(Inner::new()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn BufferObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Attach catalog identity; done once before the buffer is shared
    pub fn with_identity(mut self, connection_id: u32, stream_id: u32, stream: impl Into<String>) -> Self {
        self.connection_id = connection_id;
        self.stream_id = stream_id;
        self.stream = stream.into();
        self
    }

    // === Identity ===

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn is_video(&self) -> bool {
        self.media_type == MediaType::Video
    }

    pub fn is_audio(&self) -> bool {
        self.media_type == MediaType::Audio
    }

    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Catalog stream name
    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // === Writers ===

    fn put_locked(&self, inner: &mut Inner, data: Bytes, timestamp: Timestamp, key_frame: bool) -> BufferItem {
        if inner.start_ts.is_none() {
            inner.start_ts = Some(timestamp);
        }
        inner.end_ts = Some(timestamp);

        if inner.ring.is_empty() {
            inner.ring = vec![None; self.capacity];
        }

        let item = BufferItem {
            data,
            timestamp,
            key_frame,
            message_index: inner.message_index,
        };
        let slot = (inner.message_index % self.capacity as u64) as usize;
        inner.ring[slot] = Some(item.clone());
        inner.message_index += 1;
        item
    }

    fn notify_written(&self, written: Written) {
        let Written::Stored { item, became_ready } = written else {
            return;
        };
        if let Some(observer) = &self.observer {
            observer.on_produced(self, &item);
            if became_ready {
                observer.on_ready(self);
            }
        }
        if became_ready {
            trace!(stream_id = self.stream_id, "Buffer ready");
        }
    }

    /// Append an audio frame; every audio frame is a sync point
    pub fn write_audio_frame(&self, timestamp: i64, data: Bytes) {
        let written = {
            let mut inner = self.inner.lock();
            let ts = Timestamp::new(timestamp, 0, inner.timescale);
            let item = self.put_locked(&mut inner, data, ts, true);

            let became_ready = !inner.initialized;
            if became_ready {
                if inner.codec == Some(Codec::Mp3) && item.data.len() >= 4 {
                    inner.extradata = Some(item.data.slice(..4));
                }
                inner.initialized = true;
            }
            Written::Stored { item, became_ready }
        };
        self.notify_written(written);
    }

    /// Append an AVC/HEVC frame, converting NAL length prefixes to start codes
    ///
    /// Frames before the first key frame are dropped.
    pub fn write_h26x_frame(&self, timestamp: i64, offset: i32, mut data: BytesMut, key_frame: bool) {
        let written = {
            let mut inner = self.inner.lock();
            if inner.initialized || key_frame {
                rewrite_length_prefixes(&mut data);
                let ts = Timestamp::new(timestamp, offset, inner.timescale);
                let item = self.put_locked(&mut inner, data.freeze(), ts, key_frame);
                let became_ready = !inner.initialized;
                inner.initialized = true;
                Written::Stored { item, became_ready }
            } else {
                Written::Dropped
            }
        };
        self.notify_written(written);
    }

    /// Append a VP6/VP8/VP9/AV1 frame
    pub fn write_vpx_frame(&self, timestamp: i64, data: Bytes, key_frame: bool) {
        let written = {
            let mut inner = self.inner.lock();
            if inner.initialized || key_frame {
                let ts = Timestamp::new(timestamp, 0, inner.timescale);
                let item = self.put_locked(&mut inner, data, ts, key_frame);
                let became_ready = !inner.initialized;
                inner.initialized = true;
                Written::Stored { item, became_ready }
            } else {
                Written::Dropped
            }
        };
        self.notify_written(written);
    }

    /// Frame at `index`, or `None` if not yet written or already overwritten
    pub fn get_item(&self, index: u64) -> Option<BufferItem> {
        let inner = self.inner.lock();
        if index >= inner.message_index || inner.ring.is_empty() {
            return None;
        }
        let slot = (index % self.capacity as u64) as usize;
        inner.ring[slot]
            .as_ref()
            .filter(|item| item.message_index == index)
            .cloned()
    }

    /// Reset playback state; identity and catalog metadata persist
    pub fn release(&self) {
        {
            let mut inner = self.inner.lock();
            inner.state = PlaybackState::Stop;
            inner.offset_ms = 0;
            inner.duration_ms = 0;
            inner.sn = None;
            inner.initialized = false;
            inner.start_ts = None;
            inner.end_ts = None;
            inner.message_index = 0;
            inner.ring = Vec::new();
            inner.steady_map.clear();
            inner.steady_offset = None;
        }
        trace!(stream_id = self.stream_id, "Buffer released");

        if let Some(observer) = &self.observer {
            observer.on_release(self);
        }
    }

    // === Clock sync ===

    /// Record a server steady-clock sample for the last inserted frame
    ///
    /// `zero_time` anchors the first sample; later ones are kept at most once
    /// per second of presentation time.
    pub fn notify_steady_timestamp(&self, zero_time: i64, steady: i64) {
        let mut inner = self.inner.lock();
        let Some(end_ts) = inner.end_ts else {
            return;
        };
        let pts = end_ts.pts_us();

        if inner.steady_offset.is_none() {
            inner.steady_offset = Some(zero_time);
        }
        if let Some((&last, _)) = inner.steady_map.last_key_value() {
            if pts.saturating_sub(last) < STEADY_SAMPLE_INTERVAL_US {
                return;
            }
        }
        inner.steady_map.insert(pts, steady);
    }

    /// Seconds between where `playtime_us` should be presented and now
    ///
    /// Positive means the frame is early, negative means playback lags.
    /// Returns 0 when no sample at or before `playtime_us` exists. Samples
    /// older than the one used are discarded.
    pub fn get_deviation_for_play_time(&self, playtime_us: i64) -> f64 {
        let now = self.clock.now_micros();
        let mut inner = self.inner.lock();

        let Some((&pts, &steady)) = inner.steady_map.range(..=playtime_us).next_back() else {
            return 0.0;
        };
        inner.steady_map = inner.steady_map.split_off(&pts);

        let since_pts = playtime_us.saturating_sub(pts);
        let expected = steady
            .saturating_add(since_pts)
            .saturating_add(inner.steady_offset.unwrap_or(0));
        expected.saturating_sub(now) as f64 / 1_000_000.0
    }

    /// Recorded steady samples
    pub fn steady_sample_count(&self) -> usize {
        self.inner.lock().steady_map.len()
    }

    pub fn steady_offset(&self) -> Option<i64> {
        self.inner.lock().steady_offset
    }

    // === Playback metadata ===

    pub fn state(&self) -> PlaybackState {
        self.inner.lock().state
    }

    pub fn set_state(&self, state: PlaybackState) {
        self.inner.lock().state = state;
    }

    pub fn timescale(&self) -> u32 {
        self.inner.lock().timescale
    }

    pub fn set_timescale(&self, timescale: u32) {
        self.inner.lock().timescale = timescale;
    }

    pub fn codec(&self) -> Option<Codec> {
        self.inner.lock().codec
    }

    pub fn set_codec(&self, codec: Option<Codec>) {
        self.inner.lock().codec = codec;
    }

    /// Mime identifier of the announced codec
    pub fn mime_type(&self) -> Option<&'static str> {
        self.codec().map(|c| c.mime())
    }

    pub fn size(&self) -> Option<Size> {
        self.inner.lock().size
    }

    pub fn set_size(&self, size: Option<Size>) {
        self.inner.lock().size = size;
    }

    pub fn bandwidth(&self) -> u32 {
        self.inner.lock().bandwidth
    }

    pub fn set_bandwidth(&self, bandwidth: u32) {
        self.inner.lock().bandwidth = bandwidth;
    }

    pub fn extradata(&self) -> Option<Bytes> {
        self.inner.lock().extradata.clone()
    }

    pub fn set_extradata(&self, extradata: Bytes) {
        self.inner.lock().extradata = Some(extradata);
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.lock().initialized
    }

    /// Index the next inserted frame will receive
    pub fn message_index(&self) -> u64 {
        self.inner.lock().message_index
    }

    pub fn start_timestamp(&self) -> Option<Timestamp> {
        self.inner.lock().start_ts
    }

    pub fn end_timestamp(&self) -> Option<Timestamp> {
        self.inner.lock().end_ts
    }

    pub fn offset_ms(&self) -> i32 {
        self.inner.lock().offset_ms
    }

    pub fn duration_ms(&self) -> i32 {
        self.inner.lock().duration_ms
    }

    /// Requested seek offset and duration of the active Play
    pub fn set_request(&self, offset_ms: i32, duration_ms: i32) {
        let mut inner = self.inner.lock();
        inner.offset_ms = offset_ms;
        inner.duration_ms = duration_ms;
    }

    /// Sequence number of the active Play
    pub fn sn(&self) -> Option<u8> {
        self.inner.lock().sn
    }

    pub fn set_sn(&self, sn: Option<u8>) {
        self.inner.lock().sn = sn;
    }
}
