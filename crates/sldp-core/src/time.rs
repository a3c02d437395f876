//! Timing utilities for SLDP
//!
//! Provides stream timestamps and the local monotonic clock used for
//! steady-clock synchronization.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// Milliseconds timescale
pub const TIMESCALE_MS: u32 = 1_000;

/// Microseconds timescale
pub const TIMESCALE_US: u32 = 1_000_000;

/// Frame timing in the stream's native timescale
///
/// `dts` is the decode timestamp and `offset` the composition offset, both
/// in `timescale` ticks per second. Equality compares the raw triple, never
/// a rescaled value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp {
    dts: i64,
    offset: i32,
    timescale: u32,
}

impl Default for Timestamp {
    fn default() -> Self {
        Self {
            dts: 0,
            offset: 0,
            timescale: TIMESCALE_MS,
        }
    }
}

impl Timestamp {
    pub fn new(dts: i64, offset: i32, timescale: u32) -> Self {
        Self {
            dts,
            offset,
            timescale,
        }
    }

    /// Millisecond presentation time with no composition offset
    pub fn from_millis(pts: i64) -> Self {
        Self::new(pts, 0, TIMESCALE_MS)
    }

    pub fn dts(&self) -> i64 {
        self.dts
    }

    pub fn offset(&self) -> i32 {
        self.offset
    }

    pub fn timescale(&self) -> u32 {
        self.timescale
    }

    /// Presentation time in native ticks, saturating at the i64 range
    pub fn pts(&self) -> i64 {
        self.dts.saturating_add(self.offset as i64)
    }

    /// Decode time rescaled to `target` ticks per second
    pub fn dts_in(&self, target: u32) -> i64 {
        rescale(self.dts, self.timescale, target)
    }

    /// Presentation time rescaled to `target` ticks per second
    pub fn pts_in(&self, target: u32) -> i64 {
        rescale(self.pts(), self.timescale, target)
    }

    pub fn dts_ms(&self) -> i64 {
        self.dts_in(TIMESCALE_MS)
    }

    pub fn dts_us(&self) -> i64 {
        self.dts_in(TIMESCALE_US)
    }

    pub fn pts_ms(&self) -> i64 {
        self.pts_in(TIMESCALE_MS)
    }

    pub fn pts_us(&self) -> i64 {
        self.pts_in(TIMESCALE_US)
    }
}

/// `round(value * to / from)`, rounding half away from zero.
fn rescale(value: i64, from: u32, to: u32) -> i64 {
    if from == to {
        return value;
    }
    if from == 0 {
        return 0;
    }
    let num = value as i128 * to as i128;
    let den = from as i128;
    let quotient = num / den;
    let remainder = num % den;
    let adjust = if 2 * remainder.abs() >= den {
        num.signum()
    } else {
        0
    };
    (quotient + adjust).clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

/// Local monotonic time source in microseconds
pub trait Clock: Send + Sync {
    fn now_micros(&self) -> i64;
}

/// Process-wide monotonic clock
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now_micros(&self) -> i64 {
        static EPOCH: OnceLock<Instant> = OnceLock::new();
        EPOCH.get_or_init(Instant::now).elapsed().as_micros() as i64
    }
}

/// Manually driven clock
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now_micros: i64) -> Self {
        Self {
            now: AtomicI64::new(now_micros),
        }
    }

    pub fn set(&self, now_micros: i64) {
        self.now.store(now_micros, Ordering::SeqCst);
    }

    pub fn advance(&self, micros: i64) {
        self.now.fetch_add(micros, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_micros(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
