//! Capability seams between the buffer control core and the outside world.
//!
//! Every trait returns `Box<dyn Error + Send + Sync>` at the boundary; the core
//! maps those into its own typed errors.
pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

use std::error::Error;

/// Number of filament channels on the unit.
pub const CHANNELS: usize = 4;
/// Number of raw analog lanes: one pull (pressure) and one presence lane per channel.
pub const RAW_LANES: usize = CHANNELS * 2;

/// Channel index, 0..CHANNELS.
pub type ChannelId = usize;

/// Lane index of the pull (pressure) sensor for a channel.
#[inline]
pub const fn pull_lane(ch: ChannelId) -> usize {
    ch
}

/// Lane index of the presence switch for a channel.
#[inline]
pub const fn presence_lane(ch: ChannelId) -> usize {
    CHANNELS + ch
}

/// One acquisition snapshot: a block of raw 12-bit frames plus its timestamp.
///
/// Each frame carries all eight lanes. A block holding a single frame is the
/// plain `(u16[8], timestamp)` form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChannelSample {
    pub frames: Vec<[u16; RAW_LANES]>,
    pub timestamp_ms: u64,
}

impl RawChannelSample {
    pub fn single(values: [u16; RAW_LANES], timestamp_ms: u64) -> Self {
        Self {
            frames: vec![values],
            timestamp_ms,
        }
    }
}

/// Rotary sensor snapshot for all channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RotaryReading {
    pub angles: [u16; CHANNELS],
    pub online: [bool; CHANNELS],
}

impl RotaryReading {
    /// Every sensor offline; used when the bus read itself fails.
    pub const fn offline() -> Self {
        Self {
            angles: [0; CHANNELS],
            online: [false; CHANNELS],
        }
    }
}

/// Motion the protocol layer currently requests for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestedMotion {
    #[default]
    Idle,
    NeedSendOut,
    NeedPullBack,
    BeforePullBack,
    OnUse,
}

/// Printer family the unit is emulating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceVariant {
    /// Full-size family: priority-gated retraction, full-speed feed.
    #[default]
    FamilyA,
    /// Compact family: ungated retraction, pressure-scaled feed.
    FamilyB,
}

/// Advisory per-channel indicator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indication {
    Off,
    Idle,
    Feeding,
    SlowFeeding,
    InUse,
    Retracting { progress_pct: u8 },
    PressureHigh,
    PressureLow,
    OuterSwitchOnly,
    InnerSwitchOnly,
    Calibrating,
    DirectionLearned,
    Degraded,
}

/// Raw analog acquisition (ADC + DMA upstream).
pub trait SampleSource {
    fn poll(&mut self) -> Result<RawChannelSample, Box<dyn Error + Send + Sync>>;

    /// Run the hardware self-calibration and return the code offset to apply.
    fn self_calibrate(&mut self) -> Result<i16, Box<dyn Error + Send + Sync>>;
}

/// Per-channel magnetic angle sensors.
pub trait RotarySensor {
    fn read_angles(&mut self) -> Result<RotaryReading, Box<dyn Error + Send + Sync>>;
}

/// Signed PWM sink, `value` in -1000..=1000.
pub trait MotorDrive {
    fn set_drive(
        &mut self,
        channel: ChannelId,
        value: i16,
    ) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// Read-only view of the printer bus state.
pub trait ProtocolLink {
    fn active_channel(&self) -> ChannelId;
    fn requested_motion(&self, channel: ChannelId) -> RequestedMotion;
    fn device_variant(&self) -> DeviceVariant;

    /// False while the bus is down; the core then parks every motor.
    fn link_ok(&self) -> bool {
        true
    }
}

/// Single-blob non-volatile store.
pub trait ConfigStore {
    /// `Ok(None)` when nothing was ever saved.
    fn load(&mut self) -> Result<Option<Vec<u8>>, Box<dyn Error + Send + Sync>>;
    fn save(&mut self, blob: &[u8]) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// LED sink. Advisory only, so it cannot fail.
pub trait IndicatorSink {
    fn indicate(&mut self, channel: ChannelId, indication: Indication);
}

impl<T: SampleSource + ?Sized> SampleSource for Box<T> {
    fn poll(&mut self) -> Result<RawChannelSample, Box<dyn Error + Send + Sync>> {
        (**self).poll()
    }

    fn self_calibrate(&mut self) -> Result<i16, Box<dyn Error + Send + Sync>> {
        (**self).self_calibrate()
    }
}

impl<T: RotarySensor + ?Sized> RotarySensor for Box<T> {
    fn read_angles(&mut self) -> Result<RotaryReading, Box<dyn Error + Send + Sync>> {
        (**self).read_angles()
    }
}

impl<T: MotorDrive + ?Sized> MotorDrive for Box<T> {
    fn set_drive(
        &mut self,
        channel: ChannelId,
        value: i16,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        (**self).set_drive(channel, value)
    }
}

impl<T: ProtocolLink + ?Sized> ProtocolLink for Box<T> {
    fn active_channel(&self) -> ChannelId {
        (**self).active_channel()
    }

    fn requested_motion(&self, channel: ChannelId) -> RequestedMotion {
        (**self).requested_motion(channel)
    }

    fn device_variant(&self) -> DeviceVariant {
        (**self).device_variant()
    }

    fn link_ok(&self) -> bool {
        (**self).link_ok()
    }
}

impl<T: ConfigStore + ?Sized> ConfigStore for Box<T> {
    fn load(&mut self) -> Result<Option<Vec<u8>>, Box<dyn Error + Send + Sync>> {
        (**self).load()
    }

    fn save(&mut self, blob: &[u8]) -> Result<(), Box<dyn Error + Send + Sync>> {
        (**self).save(blob)
    }
}

impl<T: IndicatorSink + ?Sized> IndicatorSink for Box<T> {
    fn indicate(&mut self, channel: ChannelId, indication: Indication) {
        (**self).indicate(channel, indication);
    }
}
