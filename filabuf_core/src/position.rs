//! Filament displacement from per-channel rotary angle sensors.

use filabuf_traits::{CHANNELS, RotaryReading};

use crate::config::PositionCfg;

/// Motion of one channel over the last tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChannelMotion {
    /// Signed filament displacement, positive toward the printer.
    pub delta_mm: f32,
    /// Millimetres per second over the tick.
    pub speed_mm_s: f32,
}

/// One channel's unwrap state.
#[derive(Debug, Clone, Default)]
pub struct PositionTracker {
    last_angle: Option<u16>,
    last_ms: u64,
    total_mm: f32,
}

impl PositionTracker {
    /// Advance with a fresh angle. `None` means the sensor is offline.
    pub fn update(&mut self, cfg: &PositionCfg, angle: Option<u16>, now_ms: u64) -> ChannelMotion {
        let Some(angle) = angle else {
            self.last_angle = None;
            return ChannelMotion::default();
        };
        let Some(last) = self.last_angle else {
            self.last_angle = Some(angle);
            self.last_ms = now_ms;
            return ChannelMotion::default();
        };
        if now_ms <= self.last_ms {
            return ChannelMotion::default();
        }

        let counts = unwrap_delta(angle, last, cfg.counts_per_rev);
        let delta_mm = counts as f32 * cfg.mm_per_count();
        let dt_s = (now_ms - self.last_ms) as f32 / 1000.0;

        self.last_angle = Some(angle);
        self.last_ms = now_ms;
        self.total_mm += delta_mm;

        ChannelMotion {
            delta_mm,
            speed_mm_s: delta_mm / dt_s,
        }
    }

    /// Cumulative displacement since construction.
    pub fn total_mm(&self) -> f32 {
        self.total_mm
    }

    pub fn is_seeded(&self) -> bool {
        self.last_angle.is_some()
    }
}

/// Signed count delta across the wrap point.
///
/// A jump from the top quarter to the bottom quarter (or back) is taken as a
/// crossing; anything else is a plain difference.
pub fn unwrap_delta(now: u16, last: u16, counts_per_rev: u16) -> i32 {
    let cpr = i32::from(counts_per_rev);
    let (now, last) = (i32::from(now), i32::from(last));
    let mut delta = now - last;
    if now > cpr * 3 / 4 && last <= cpr / 4 {
        delta -= cpr;
    } else if now <= cpr / 4 && last > cpr * 3 / 4 {
        delta += cpr;
    }
    delta
}

/// Trackers for all channels.
pub struct PositionBank {
    cfg: PositionCfg,
    trackers: [PositionTracker; CHANNELS],
}

impl PositionBank {
    pub fn new(cfg: PositionCfg) -> Self {
        Self {
            cfg,
            trackers: Default::default(),
        }
    }

    pub fn update(&mut self, reading: &RotaryReading, now_ms: u64) -> [ChannelMotion; CHANNELS] {
        std::array::from_fn(|ch| {
            let angle = reading.online[ch].then_some(reading.angles[ch]);
            self.trackers[ch].update(&self.cfg, angle, now_ms)
        })
    }

    pub fn tracker(&self, ch: usize) -> &PositionTracker {
        &self.trackers[ch]
    }

    pub fn cfg(&self) -> &PositionCfg {
        &self.cfg
    }
}
