//! Timestamp rescaling tests

use sldp_core::{Clock, ManualClock, Timestamp};

#[test]
fn test_identity_when_timescales_match() {
    let ts = Timestamp::new(123_456_789, 17, 1000);
    assert_eq!(ts.dts_ms(), 123_456_789);
    assert_eq!(ts.pts_ms(), 123_456_806);

    let ts = Timestamp::new(i64::MAX / 2, 0, 1_000_000);
    assert_eq!(ts.dts_us(), i64::MAX / 2);
}

#[test]
fn test_90khz_to_milliseconds() {
    let ts = Timestamp::new(90_000, 3_000, 90_000);
    assert_eq!(ts.dts_ms(), 1000);
    assert_eq!(ts.pts_ms(), 1033); // 1033.33
    assert_eq!(ts.pts_us(), 1_033_333);
}

#[test]
fn test_rounding_matches_formula() {
    for timescale in [1u32, 3, 7, 1000, 44_100, 48_000, 90_000] {
        for dts in [-1_000_001i64, -7, 0, 1, 2, 999, 123_457, 10_000_019] {
            let ts = Timestamp::new(dts, 5, timescale);
            let expected_ms = (dts as f64 * 1000.0 / timescale as f64).round() as i64;
            let expected_pts_ms = ((dts + 5) as f64 * 1000.0 / timescale as f64).round() as i64;
            assert_eq!(ts.dts_ms(), expected_ms, "dts {dts} @ {timescale}");
            assert_eq!(ts.pts_ms(), expected_pts_ms, "pts {dts}+5 @ {timescale}");
        }
    }
}

#[test]
fn test_negative_offset() {
    let ts = Timestamp::new(1000, -40, 1000);
    assert_eq!(ts.pts(), 960);
    assert_eq!(ts.pts_us(), 960_000);
}

#[test]
fn test_equality_compares_raw_triple() {
    let a = Timestamp::new(1, 0, 1000);
    let b = Timestamp::new(1000, 0, 1_000_000);
    assert_eq!(a.dts_us(), b.dts_us());
    assert_ne!(a, b);
    assert_eq!(a, Timestamp::from_millis(1));
}

#[test]
fn test_manual_clock() {
    let clock = ManualClock::new(5);
    clock.advance(10);
    assert_eq!(clock.now_micros(), 15);
    clock.set(-3);
    assert_eq!(clock.now_micros(), -3);
}
