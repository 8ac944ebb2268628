//! Tick period helpers.

/// Number of microseconds in one second.
pub const MICROS_PER_SEC: u64 = 1_000_000;
/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;

/// Tick period in microseconds; `hz` is clamped to at least 1.
#[inline]
pub fn period_us(hz: u32) -> u64 {
    (MICROS_PER_SEC / u64::from(hz.max(1))).max(1)
}

/// Tick period in milliseconds, never below 1.
#[inline]
pub fn period_ms(hz: u32) -> u64 {
    (MILLIS_PER_SEC / u64::from(hz.max(1))).max(1)
}

/// Seconds between two millisecond timestamps; zero when time did not advance.
#[inline]
pub fn dt_seconds(prev_ms: Option<u64>, now_ms: u64) -> f32 {
    prev_ms.map_or(0.0, |p| now_ms.saturating_sub(p) as f32 / MILLIS_PER_SEC as f32)
}
