//! StreamBuffer ring and clock-sync tests

use bytes::{Bytes, BytesMut};
use sldp_core::{
    DefaultBufferFactory, ManualClock, MediaType, PlaybackState, StreamBuffer, StreamBufferFactory,
};
use std::sync::Arc;

fn audio(capacity: usize, clock: Arc<ManualClock>) -> StreamBuffer {
    let buffer = StreamBuffer::with_clock(MediaType::Audio, capacity, clock);
    buffer.set_timescale(1000);
    buffer
}

#[test]
fn test_ring_keeps_last_capacity_items() {
    let buffer = audio(4, Arc::new(ManualClock::new(0)));
    for i in 0..10u8 {
        buffer.write_audio_frame(i as i64 * 20, Bytes::from(vec![i]));
    }

    assert_eq!(buffer.message_index(), 10);
    for index in 0..6 {
        assert!(buffer.get_item(index).is_none(), "index {index} should be evicted");
    }
    for index in 6..10 {
        let item = buffer.get_item(index).unwrap();
        assert_eq!(item.message_index(), index);
        assert_eq!(item.data().as_ref(), &[index as u8]);
    }
    assert!(buffer.get_item(10).is_none());
    assert!(buffer.get_item(u64::MAX).is_none());
}

#[test]
fn test_start_and_end_timestamps() {
    let buffer = audio(4, Arc::new(ManualClock::new(0)));
    assert!(buffer.start_timestamp().is_none());

    buffer.write_audio_frame(100, Bytes::new());
    buffer.write_audio_frame(120, Bytes::new());

    assert_eq!(buffer.start_timestamp().unwrap().dts(), 100);
    assert_eq!(buffer.end_timestamp().unwrap().dts(), 120);
    assert_eq!(buffer.end_timestamp().unwrap().timescale(), 1000);
}

#[test]
fn test_release_resets_index() {
    let buffer = audio(4, Arc::new(ManualClock::new(0)))
        .with_identity(7, 3, "live/cam");
    buffer.set_state(PlaybackState::Play);
    buffer.set_sn(Some(2));
    buffer.set_request(500, 1000);
    buffer.write_audio_frame(0, Bytes::from_static(b"a"));
    buffer.write_audio_frame(20, Bytes::from_static(b"b"));

    buffer.release();

    assert_eq!(buffer.state(), PlaybackState::Stop);
    assert_eq!(buffer.sn(), None);
    assert_eq!(buffer.offset_ms(), 0);
    assert_eq!(buffer.duration_ms(), 0);
    assert!(!buffer.is_initialized());
    assert_eq!(buffer.message_index(), 0);
    assert!(buffer.get_item(0).is_none());

    buffer.write_audio_frame(40, Bytes::from_static(b"c"));
    let item = buffer.get_item(0).unwrap();
    assert_eq!(item.message_index(), 0);
    assert_eq!(item.data().as_ref(), b"c");

    assert_eq!(buffer.connection_id(), 7);
    assert_eq!(buffer.stream_id(), 3);
    assert_eq!(buffer.stream(), "live/cam");
    assert_eq!(buffer.timescale(), 1000);
}

#[test]
fn test_h26x_frame_rewritten() {
    let buffer = StreamBuffer::new(MediaType::Video, 8);
    buffer.set_timescale(90_000);

    let nal = BytesMut::from(&[0u8, 0, 0, 3, 0x65, 0x88, 0x84][..]);
    buffer.write_h26x_frame(12345, 0, nal, true);

    let item = buffer.get_item(0).unwrap();
    assert_eq!(item.data().as_ref(), &[0, 0, 0, 1, 0x65, 0x88, 0x84]);
    assert!(item.is_key_frame());
    assert_eq!(item.timestamp().dts(), 12345);
}

#[test]
fn test_h26x_delta_before_key_dropped() {
    let buffer = StreamBuffer::new(MediaType::Video, 8);
    buffer.write_h26x_frame(0, 0, BytesMut::from(&[0u8, 0, 0, 1, 0x41][..]), false);

    assert_eq!(buffer.message_index(), 0);
    assert!(!buffer.is_initialized());
}

#[test]
fn test_deviation_uses_latest_sample_at_or_before() {
    let clock = Arc::new(ManualClock::new(0));
    let buffer = audio(16, clock.clone());

    // samples: 1_000_000 -> 500_000, 3_000_000 -> 2_500_000
    buffer.write_audio_frame(1000, Bytes::new());
    buffer.notify_steady_timestamp(100_000, 500_000);
    buffer.write_audio_frame(3000, Bytes::new());
    buffer.notify_steady_timestamp(100_000, 2_500_000);
    assert_eq!(buffer.steady_sample_count(), 2);

    clock.set(2_000_000);
    // expected = 2_500_000 + 200_000 + 100_000 = 2_800_000
    let deviation = buffer.get_deviation_for_play_time(3_200_000);
    assert!((deviation - 0.8).abs() < 1e-9, "deviation {deviation}");

    // first sample pruned, second retained
    assert_eq!(buffer.steady_sample_count(), 1);
}

#[test]
fn test_deviation_at_exact_sample_time() {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let buffer = audio(16, clock);

    buffer.write_audio_frame(1000, Bytes::new());
    buffer.notify_steady_timestamp(0, 1_000_000);

    assert_eq!(buffer.get_deviation_for_play_time(1_000_000), 0.0);
    assert_eq!(buffer.get_deviation_for_play_time(999_999), 0.0);
    assert_eq!(buffer.steady_sample_count(), 1);
}

#[test]
fn test_deviation_negative_when_late() {
    let clock = Arc::new(ManualClock::new(0));
    let buffer = audio(16, clock.clone());

    buffer.write_audio_frame(0, Bytes::new());
    buffer.notify_steady_timestamp(0, 0);

    clock.set(1_500_000);
    let deviation = buffer.get_deviation_for_play_time(500_000);
    assert!((deviation + 1.0).abs() < 1e-9);
}

#[test]
fn test_release_clears_steady_state() {
    let buffer = audio(16, Arc::new(ManualClock::new(0)));
    buffer.write_audio_frame(0, Bytes::new());
    buffer.notify_steady_timestamp(42, 0);
    assert_eq!(buffer.steady_offset(), Some(42));

    buffer.release();

    assert_eq!(buffer.steady_sample_count(), 0);
    assert_eq!(buffer.steady_offset(), None);
    assert!(buffer.end_timestamp().is_none());
}

#[test]
fn test_default_factory() {
    let factory = DefaultBufferFactory::new(32).with_clock(Arc::new(ManualClock::new(0)));

    let video = factory.create_video_buffer();
    let audio = factory.create_audio_buffer();

    assert!(video.is_video());
    assert!(audio.is_audio());
    assert_eq!(video.capacity(), 32);
}

#[test]
fn test_concurrent_reader_sees_whole_items() {
    let buffer = Arc::new(audio(64, Arc::new(ManualClock::new(0))));
    let writer = {
        let buffer = buffer.clone();
        std::thread::spawn(move || {
            for i in 0..1000u32 {
                buffer.write_audio_frame(i as i64, Bytes::from(i.to_be_bytes().to_vec()));
            }
        })
    };

    let mut seen = 0;
    while seen < 1000 {
        let next = buffer.message_index();
        for index in seen..next {
            if let Some(item) = buffer.get_item(index) {
                let value = u32::from_be_bytes(item.data()[..4].try_into().unwrap());
                assert_eq!(value as u64, item.message_index());
                assert_eq!(item.timestamp().dts(), value as i64);
            }
        }
        seen = next;
    }
    writer.join().unwrap();
}
