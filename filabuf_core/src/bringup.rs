//! Boot-time motor polarity probe.
//!
//! Drives a channel briefly and watches its rotary sensor to find which drive
//! sign feeds filament. This is the one place the core blocks, and it is
//! bounded by the configured probe timeout.

use filabuf_traits::{ChannelId, Clock, MotorDrive, RotarySensor};
use std::time::Duration;

use crate::config::{BringupCfg, PositionCfg};
use crate::error::BufferError;
use crate::hw_error::map_hw_error;
use crate::position::unwrap_delta;
use crate::types::Direction;

/// Result of probing one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    /// Measured polarity; `None` when the roller never moved far enough.
    pub measured: Option<Direction>,
    /// Polarity to use after the static correction table.
    pub applied: Direction,
}

fn read_angle<R: RotarySensor>(rotary: &mut R, ch: ChannelId) -> Result<Option<u16>, BufferError> {
    let reading = rotary.read_angles().map_err(|e| map_hw_error(e.as_ref()))?;
    Ok(reading.online[ch].then_some(reading.angles[ch]))
}

/// Probe one channel. The drive is always returned to zero before this returns.
pub fn probe_channel<R, D>(
    rotary: &mut R,
    drive: &mut D,
    clock: &dyn Clock,
    cfg: &BringupCfg,
    position: &PositionCfg,
    ch: ChannelId,
) -> Result<ProbeOutcome, BufferError>
where
    R: RotarySensor,
    D: MotorDrive,
{
    let measured = match read_angle(rotary, ch)? {
        Some(start) => {
            drive
                .set_drive(ch, cfg.probe_drive)
                .map_err(|e| map_hw_error(e.as_ref()))?;
            let moved = watch_movement(rotary, clock, cfg, position, ch, start);
            let stopped = drive.set_drive(ch, 0).map_err(|e| map_hw_error(e.as_ref()));
            let counts = moved?;
            stopped?;
            counts.and_then(|c| Direction::of(c as f32 * position.mm_per_count()))
        }
        None => {
            tracing::warn!(channel = ch, "rotary sensor offline; skipping polarity probe");
            None
        }
    };

    let base = measured.unwrap_or_default();
    let applied = if cfg.correction[ch] { base.flipped() } else { base };
    tracing::info!(channel = ch, ?measured, ?applied, "polarity probe finished");
    Ok(ProbeOutcome { measured, applied })
}

/// Poll until the roller has moved past the threshold or the probe times out.
fn watch_movement<R: RotarySensor>(
    rotary: &mut R,
    clock: &dyn Clock,
    cfg: &BringupCfg,
    position: &PositionCfg,
    ch: ChannelId,
    start: u16,
) -> Result<Option<i32>, BufferError> {
    let poll = Duration::from_millis(cfg.poll_ms.max(1));
    let epoch = clock.now();
    let mut last = start;
    let mut counts: i32 = 0;

    while clock.ms_since(epoch) < cfg.probe_timeout_ms {
        clock.sleep(poll);
        let Some(angle) = read_angle(rotary, ch)? else {
            continue;
        };
        counts += unwrap_delta(angle, last, position.counts_per_rev);
        last = angle;
        if counts.unsigned_abs() > cfg.movement_counts {
            return Ok(Some(counts));
        }
    }
    tracing::warn!(channel = ch, counts, "no roller movement during polarity probe");
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filabuf_traits::{CHANNELS, ManualClock, RotaryReading};
    use std::error::Error;

    /// Roller that turns by `step` counts per read while driven.
    struct Roller {
        angle: u16,
        step: i32,
        driven: bool,
    }

    impl RotarySensor for Roller {
        fn read_angles(&mut self) -> Result<RotaryReading, Box<dyn Error + Send + Sync>> {
            if self.driven {
                self.angle = (i32::from(self.angle) + self.step).rem_euclid(4096) as u16;
            }
            Ok(RotaryReading {
                angles: [self.angle; CHANNELS],
                online: [true; CHANNELS],
            })
        }
    }

    #[derive(Default)]
    struct SpyDrive {
        calls: Vec<(ChannelId, i16)>,
    }

    impl MotorDrive for SpyDrive {
        fn set_drive(&mut self, channel: ChannelId, value: i16) -> Result<(), Box<dyn Error + Send + Sync>> {
            self.calls.push((channel, value));
            Ok(())
        }
    }

    fn probe(step: i32, driven: bool, ch: ChannelId) -> (ProbeOutcome, SpyDrive) {
        let mut roller = Roller {
            angle: 4000,
            step,
            driven,
        };
        let mut drive = SpyDrive::default();
        let clock = ManualClock::new();
        let out = probe_channel(
            &mut roller,
            &mut drive,
            &clock,
            &BringupCfg::default(),
            &PositionCfg::default(),
            ch,
        )
        .unwrap_or_else(|e| panic!("probe failed: {e}"));
        (out, drive)
    }

    #[test]
    fn decreasing_angle_means_forward_feed() {
        // sensor faces the magnet, so falling counts are forward motion
        let (out, drive) = probe(-40, true, 0);
        assert_eq!(out.measured, Some(Direction::Forward));
        assert_eq!(out.applied, Direction::Forward);
        assert_eq!(drive.calls, vec![(0, 1000), (0, 0)]);
    }

    #[test]
    fn correction_table_flips_result() {
        let (out, _) = probe(-40, true, 1);
        assert_eq!(out.measured, Some(Direction::Forward));
        assert_eq!(out.applied, Direction::Reverse);
    }

    #[test]
    fn stationary_roller_falls_back() {
        let (out, drive) = probe(0, false, 3);
        assert_eq!(out.measured, None);
        assert_eq!(out.applied, Direction::Forward);
        assert_eq!(drive.calls.last(), Some(&(3, 0)));
    }
}
