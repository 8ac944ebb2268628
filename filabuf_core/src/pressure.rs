//! Pull sensor zero-point calibration.
//!
//! Sessions are non-blocking: the manager samples a channel's idle pull
//! voltage across many control ticks and only then replaces the learned zero
//! and ranges. A session that cannot finish cleanly leaves the previous
//! calibration untouched.

use filabuf_traits::{CHANNELS, ChannelId};

use crate::config::PressureCfg;
use crate::types::PressureStatus;

/// Learned neutral point of one channel's pull sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelCalibration {
    pub zero_v: f32,
    pub positive_range_v: f32,
    pub negative_range_v: f32,
    pub samples: u32,
    pub calibrated: bool,
    /// Not persisted; `None` after a restore.
    pub last_calibrated_ms: Option<u64>,
}

impl ChannelCalibration {
    fn uncalibrated(cfg: &PressureCfg) -> Self {
        Self {
            zero_v: cfg.default_zero_v,
            positive_range_v: cfg.default_range_v,
            negative_range_v: cfg.default_range_v,
            samples: 0,
            calibrated: false,
            last_calibrated_ms: None,
        }
    }
}

/// Per-tick facts the manager needs about a channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationView {
    pub idle: bool,
    pub presence_absent: bool,
    pub pull_healthy: bool,
    pub pull_v: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    PresenceDetected,
    ChannelBusy,
    SensorUnhealthy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationOutcome {
    Completed {
        channel: ChannelId,
        zero_v: f32,
        samples: u32,
    },
    Rejected {
        channel: ChannelId,
        samples: u32,
    },
    Aborted {
        channel: ChannelId,
        reason: AbortReason,
    },
}

#[derive(Debug)]
struct Session {
    started_ms: u64,
    last_sample_ms: Option<u64>,
    samples: Vec<f32>,
}

pub struct PressureManager {
    cfg: PressureCfg,
    vref: f32,
    channels: [ChannelCalibration; CHANNELS],
    sessions: [Option<Session>; CHANNELS],
    requested: [bool; CHANNELS],
    last_auto_ms: Option<u64>,
}

impl PressureManager {
    pub fn new(cfg: PressureCfg, vref: f32) -> Self {
        let channels = std::array::from_fn(|_| ChannelCalibration::uncalibrated(&cfg));
        Self {
            cfg,
            vref,
            channels,
            sessions: Default::default(),
            requested: [false; CHANNELS],
            last_auto_ms: None,
        }
    }

    pub fn cfg(&self) -> &PressureCfg {
        &self.cfg
    }

    pub fn calibration(&self, ch: ChannelId) -> &ChannelCalibration {
        &self.channels[ch]
    }

    pub fn is_running(&self, ch: ChannelId) -> bool {
        self.sessions[ch].is_some()
    }

    fn learned(&self, ch: ChannelId) -> Option<&ChannelCalibration> {
        let c = &self.channels[ch];
        (self.cfg.adaptive && c.calibrated).then_some(c)
    }

    /// Effective neutral voltage.
    pub fn zero(&self, ch: ChannelId) -> f32 {
        self.learned(ch).map_or(self.cfg.default_zero_v, |c| c.zero_v)
    }

    /// Effective `(low, high)` deadband.
    pub fn deadband(&self, ch: ChannelId) -> (f32, f32) {
        match self.learned(ch) {
            Some(c) => {
                let half = c.positive_range_v.min(c.negative_range_v) * self.cfg.deadband_scale;
                (c.zero_v - half, c.zero_v + half)
            }
            None => (self.cfg.static_low_v, self.cfg.static_high_v),
        }
    }

    pub fn status(&self, ch: ChannelId, pull_v: f32) -> PressureStatus {
        let (low, high) = self.deadband(ch);
        if pull_v < low {
            PressureStatus::Low
        } else if pull_v > high {
            PressureStatus::High
        } else {
            PressureStatus::Normal
        }
    }

    pub fn is_calibrated(&self, ch: ChannelId) -> bool {
        self.learned(ch).is_some()
    }

    /// Queue a manual session; it starts on the next tick the channel is eligible.
    pub fn request(&mut self, ch: ChannelId) {
        self.requested[ch] = true;
    }

    pub fn reset(&mut self, ch: ChannelId) {
        self.channels[ch] = ChannelCalibration::uncalibrated(&self.cfg);
        self.sessions[ch] = None;
        tracing::info!(channel = ch, "pressure calibration reset");
    }

    /// Install a persisted calibration.
    pub fn restore(&mut self, ch: ChannelId, mut cal: ChannelCalibration) {
        cal.last_calibrated_ms = None;
        self.channels[ch] = cal;
    }

    pub fn tick(&mut self, now_ms: u64, views: &[CalibrationView; CHANNELS]) -> Vec<CalibrationOutcome> {
        let mut out = Vec::new();

        let auto_due = self.cfg.auto_recalibration
            && self
                .last_auto_ms
                .is_none_or(|at| now_ms.saturating_sub(at) >= self.cfg.auto_interval_ms);
        if auto_due {
            self.last_auto_ms = Some(now_ms);
        }

        for (ch, view) in views.iter().enumerate() {
            if self.sessions[ch].is_none() {
                let manual = std::mem::take(&mut self.requested[ch]);
                let start = (manual && eligible(view))
                    || (auto_due && eligible(view) && self.cooled_down(ch, now_ms));
                if start {
                    tracing::info!(channel = ch, manual, "pressure calibration started");
                    self.sessions[ch] = Some(Session {
                        started_ms: now_ms,
                        last_sample_ms: None,
                        samples: Vec::with_capacity(self.cfg.target_samples as usize),
                    });
                } else {
                    continue;
                }
            }

            if let Some(reason) = abort_reason(view) {
                self.sessions[ch] = None;
                tracing::info!(channel = ch, ?reason, "pressure calibration aborted");
                out.push(CalibrationOutcome::Aborted { channel: ch, reason });
                continue;
            }

            let finished = self.sessions[ch].as_mut().is_some_and(|s| {
                if s.last_sample_ms
                    .is_none_or(|at| now_ms.saturating_sub(at) >= self.cfg.cadence_ms)
                {
                    s.last_sample_ms = Some(now_ms);
                    if (self.cfg.min_valid_v..=self.cfg.max_valid_v).contains(&view.pull_v) {
                        s.samples.push(view.pull_v);
                    }
                }
                s.samples.len() >= self.cfg.target_samples as usize
                    || now_ms.saturating_sub(s.started_ms) >= self.cfg.window_ms
            });
            if finished {
                if let Some(session) = self.sessions[ch].take() {
                    out.push(self.finish(ch, &session.samples, now_ms));
                }
            }
        }
        out
    }

    fn cooled_down(&self, ch: ChannelId, now_ms: u64) -> bool {
        let c = &self.channels[ch];
        if !c.calibrated {
            return true;
        }
        c.last_calibrated_ms
            .is_none_or(|at| now_ms.saturating_sub(at) >= self.cfg.cooldown_ms)
    }

    fn finish(&mut self, ch: ChannelId, samples: &[f32], now_ms: u64) -> CalibrationOutcome {
        let count = samples.len() as u32;
        if count == 0 || count < self.cfg.target_samples / 2 {
            tracing::warn!(channel = ch, samples = count, "pressure calibration rejected: too few samples");
            return CalibrationOutcome::Rejected {
                channel: ch,
                samples: count,
            };
        }

        let zero = samples.iter().sum::<f32>() / count as f32;
        let (lo, hi) = samples
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let spread = hi - lo;
        let range = if spread < self.cfg.zero_tolerance_v {
            self.cfg.fallback_range_v
        } else {
            (spread * self.cfg.range_multiplier).max(self.cfg.range_floor_v)
        };

        self.channels[ch] = ChannelCalibration {
            zero_v: zero,
            positive_range_v: range.min(self.vref - zero),
            negative_range_v: range.min(zero),
            samples: count,
            calibrated: true,
            last_calibrated_ms: Some(now_ms),
        };
        tracing::info!(channel = ch, zero_v = zero, spread, samples = count, "pressure calibration completed");
        CalibrationOutcome::Completed {
            channel: ch,
            zero_v: zero,
            samples: count,
        }
    }
}

fn eligible(view: &CalibrationView) -> bool {
    abort_reason(view).is_none()
}

fn abort_reason(view: &CalibrationView) -> Option<AbortReason> {
    if !view.presence_absent {
        Some(AbortReason::PresenceDetected)
    } else if !view.idle {
        Some(AbortReason::ChannelBusy)
    } else if !view.pull_healthy {
        Some(AbortReason::SensorUnhealthy)
    } else {
        None
    }
}
