//! Shared bench rig for integration tests.
//!
//! One `Rig` owns the simulated world; the collaborator handles it hands out
//! all see the same state, so a test can move filament or change requests
//! after the handles were boxed into the buffer.
#![allow(dead_code)]

use std::error::Error;
use std::sync::{Arc, Mutex};

use filabuf_core::{BufferConfig, FilamentBuffer, TickReport};
use filabuf_traits::{
    CHANNELS, ChannelId, DeviceVariant, Indication, IndicatorSink, ManualClock, MotorDrive,
    ProtocolLink, RAW_LANES, RawChannelSample, RequestedMotion, RotaryReading, RotarySensor,
    SampleSource, presence_lane, pull_lane,
};

type BoxErr = Box<dyn Error + Send + Sync>;

/// ADC code for a voltage on the 3.3 V reference.
pub fn code(volts: f32) -> u16 {
    (volts / 3.3 * 4096.0).round() as u16
}

pub const LOADED: f32 = 3.0;
pub const EMPTY: f32 = 0.1;
pub const NEUTRAL: f32 = 1.65;

/// Drive magnitude that only overcomes static friction.
const STICTION: f32 = 480.0;
/// Filament travel in mm per tick at full drive.
const MM_PER_TICK_FULL: f32 = 1.0;
/// Angle counts per mm for a 7.5 mm roller and a 4096-count sensor.
const COUNTS_PER_MM: f32 = 4096.0 / (std::f32::consts::PI * 7.5);

#[derive(Debug)]
pub struct World {
    pub volts: [f32; RAW_LANES],
    pub angles: [u16; CHANNELS],
    pub rotary_online: bool,
    /// `true` where the motor is wired so positive drive retracts.
    pub reversed: [bool; CHANNELS],
    pub drives: [i16; CHANNELS],
    pub active: ChannelId,
    pub requests: [RequestedMotion; CHANNELS],
    pub variant: DeviceVariant,
    pub link_ok: bool,
    pub poll_fails: bool,
    pub drive_fails: bool,
    pub travelled_mm: [f32; CHANNELS],
    pub indications: Vec<(ChannelId, Indication)>,
}

impl Default for World {
    fn default() -> Self {
        let mut volts = [NEUTRAL; RAW_LANES];
        for ch in 0..CHANNELS {
            volts[presence_lane(ch)] = EMPTY;
        }
        Self {
            volts,
            angles: [2048; CHANNELS],
            rotary_online: true,
            reversed: [false; CHANNELS],
            drives: [0; CHANNELS],
            active: 0,
            requests: [RequestedMotion::Idle; CHANNELS],
            variant: DeviceVariant::FamilyA,
            link_ok: true,
            poll_fails: false,
            drive_fails: false,
            travelled_mm: [0.0; CHANNELS],
            indications: Vec::new(),
        }
    }
}

#[derive(Clone, Default)]
pub struct Rig {
    pub world: Arc<Mutex<World>>,
    pub clock: ManualClock,
}

impl Rig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut World) -> T) -> T {
        let mut w = self.world.lock().expect("rig poisoned");
        f(&mut w)
    }

    pub fn load(&self, ch: ChannelId) {
        self.with(|w| w.volts[presence_lane(ch)] = LOADED);
    }

    pub fn unload(&self, ch: ChannelId) {
        self.with(|w| w.volts[presence_lane(ch)] = EMPTY);
    }

    pub fn set_pull(&self, ch: ChannelId, volts: f32) {
        self.with(|w| w.volts[pull_lane(ch)] = volts);
    }

    pub fn request(&self, ch: ChannelId, motion: RequestedMotion) {
        self.with(|w| w.requests[ch] = motion);
    }

    pub fn select(&self, ch: ChannelId) {
        self.with(|w| w.active = ch);
    }

    pub fn buffer(&self, cfg: BufferConfig) -> filabuf_core::FilamentBufferBuilder<
        filabuf_core::Set,
        filabuf_core::Set,
        filabuf_core::Set,
        filabuf_core::Set,
    > {
        FilamentBuffer::builder()
            .with_source(RigSource(self.world.clone()))
            .with_rotary(RigRotary(self.world.clone()))
            .with_drive(RigDrive(self.world.clone()))
            .with_link(RigLink(self.world.clone()))
            .with_indicator(RigIndicator(self.world.clone()))
            .with_clock(Box::new(self.clock.clone()))
            .with_config(cfg)
    }

    /// Advance simulated time by one 10 ms tick and step the buffer.
    pub fn tick(&self, buffer: &mut FilamentBuffer) -> TickReport {
        self.clock.advance_ms(10);
        buffer.step()
    }

    /// Tick until `pred` holds or `max` ticks elapse; returns the matching report.
    pub fn tick_until(
        &self,
        buffer: &mut FilamentBuffer,
        max: usize,
        mut pred: impl FnMut(&TickReport) -> bool,
    ) -> Option<TickReport> {
        for _ in 0..max {
            let report = self.tick(buffer);
            if pred(&report) {
                return Some(report);
            }
        }
        None
    }
}

pub struct RigSource(Arc<Mutex<World>>);

impl SampleSource for RigSource {
    fn poll(&mut self) -> Result<RawChannelSample, BoxErr> {
        let w = self.0.lock().map_err(|_| "rig poisoned")?;
        if w.poll_fails {
            return Err("adc dma timeout".into());
        }
        let frame: [u16; RAW_LANES] = std::array::from_fn(|i| code(w.volts[i]));
        Ok(RawChannelSample {
            frames: vec![frame; 16],
            timestamp_ms: 0,
        })
    }

    fn self_calibrate(&mut self) -> Result<i16, BoxErr> {
        Ok(0)
    }
}

/// Rotary sensors that turn according to the last drive values.
pub struct RigRotary(Arc<Mutex<World>>);

impl RotarySensor for RigRotary {
    fn read_angles(&mut self) -> Result<RotaryReading, BoxErr> {
        let mut w = self.0.lock().map_err(|_| "rig poisoned")?;
        if !w.rotary_online {
            return Ok(RotaryReading::offline());
        }
        for ch in 0..CHANNELS {
            let polarity = if w.reversed[ch] { -1.0 } else { 1.0 };
            let d = f32::from(w.drives[ch]);
            let effective = (d.abs() - STICTION).max(0.0) / (1000.0 - STICTION);
            let mm = d.signum() * effective * MM_PER_TICK_FULL * polarity;
            w.travelled_mm[ch] += mm;
            // the sensor faces the magnet: forward travel lowers the angle
            let counts = (-mm * COUNTS_PER_MM).round() as i32;
            w.angles[ch] = (i32::from(w.angles[ch]) + counts).rem_euclid(4096) as u16;
        }
        Ok(RotaryReading {
            angles: w.angles,
            online: [true; CHANNELS],
        })
    }
}

pub struct RigDrive(Arc<Mutex<World>>);

impl MotorDrive for RigDrive {
    fn set_drive(&mut self, channel: ChannelId, value: i16) -> Result<(), BoxErr> {
        let mut w = self.0.lock().map_err(|_| "rig poisoned")?;
        if w.drive_fails {
            return Err("h-bridge fault".into());
        }
        w.drives[channel] = value;
        Ok(())
    }
}

pub struct RigLink(Arc<Mutex<World>>);

impl ProtocolLink for RigLink {
    fn active_channel(&self) -> ChannelId {
        self.0.lock().map(|w| w.active).unwrap_or(0)
    }

    fn requested_motion(&self, channel: ChannelId) -> RequestedMotion {
        self.0
            .lock()
            .map(|w| w.requests[channel])
            .unwrap_or_default()
    }

    fn device_variant(&self) -> DeviceVariant {
        self.0.lock().map(|w| w.variant).unwrap_or_default()
    }

    fn link_ok(&self) -> bool {
        self.0.lock().map(|w| w.link_ok).unwrap_or(false)
    }
}

pub struct RigIndicator(Arc<Mutex<World>>);

impl IndicatorSink for RigIndicator {
    fn indicate(&mut self, channel: ChannelId, indication: Indication) {
        if let Ok(mut w) = self.0.lock() {
            w.indications.push((channel, indication));
        }
    }
}
