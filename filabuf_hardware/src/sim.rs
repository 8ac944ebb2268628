//! Host-side model of a four-channel buffer unit.
//!
//! `SimBench` owns one shared physical state; the device handles it hands out
//! (`SimAdc`, `SimEncoders`, `SimDrives`, `SimProtocol`, `SimIndicator`) all
//! act on it, so the core can own the handles while a script keeps steering
//! the printer side through the bench.
//!
//! Physics advance whenever the encoders are read, using the injected clock.

use std::error::Error;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use filabuf_traits::{
    CHANNELS, ChannelId, Clock, DeviceVariant, Indication, IndicatorSink, MotorDrive,
    ProtocolLink, RAW_LANES, RawChannelSample, RequestedMotion, RotaryReading, RotarySensor,
    SampleSource, presence_lane, pull_lane,
};

use crate::error::{HwError, Result};
use crate::util::wait_until_with_timeout;

type BoxErr = Box<dyn Error + Send + Sync>;

const VREF: f32 = 3.3;
const ADC_MAX: u16 = 4095;
const COUNTS_PER_REV: f32 = 4096.0;
const ROLLER_DIAMETER_MM: f32 = 7.5;

/// Presence switch output with filament present / absent.
const SWITCH_CLOSED_V: f32 = 3.0;
const SWITCH_OPEN_V: f32 = 0.1;
/// Pull sensor output at spring rest and its slope per mm of slack.
const SPRING_REST_V: f32 = 1.65;
const SPRING_V_PER_MM: f32 = 0.15;
const SPRING_TRAVEL_MM: f32 = 8.0;
/// Drive magnitude needed to break static friction.
const STICTION: f32 = 480.0;
const FULL_DRIVE: f32 = 1000.0;
/// Filament speed at full drive.
const FULL_SPEED_MM_S: f32 = 100.0;
/// Polls of the calibration-busy flag before the simulated ADC reports done.
const CALIBRATION_CYCLES: u32 = 3;

#[derive(Debug, Clone)]
pub struct SimParams {
    pub frames_per_poll: usize,
    /// Peak uniform noise, in ADC codes.
    pub noise_codes: u16,
    /// Channels whose motor is wired so positive drive retracts.
    pub reversed: [bool; CHANNELS],
    /// Filament drawn by the printer while a channel is in use.
    pub consumption_mm_s: f32,
    pub seed: u32,
    /// Constant converter error the self-calibration cancels.
    pub adc_bias: i16,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            frames_per_poll: 16,
            noise_codes: 3,
            reversed: [false, true, false, false],
            consumption_mm_s: 8.0,
            seed: 0x2545_f491,
            adc_bias: 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ChannelModel {
    loaded: bool,
    drive: i16,
    /// Net filament travel out of the unit, mm.
    travelled_mm: f32,
    /// Spring deflection: positive when the buffer holds extra slack.
    slack_mm: f32,
    /// Roller angle in counts, unwrapped.
    angle_counts: f32,
    request: RequestedMotion,
    indication: Option<Indication>,
}

impl Default for ChannelModel {
    fn default() -> Self {
        Self {
            loaded: false,
            drive: 0,
            travelled_mm: 0.0,
            slack_mm: 0.0,
            angle_counts: 2048.0,
            request: RequestedMotion::Idle,
            indication: None,
        }
    }
}

impl ChannelModel {
    fn pull_v(&self) -> f32 {
        SPRING_REST_V + self.slack_mm * SPRING_V_PER_MM
    }

    fn presence_v(&self) -> f32 {
        if self.loaded { SWITCH_CLOSED_V } else { SWITCH_OPEN_V }
    }
}

#[derive(Debug)]
struct BenchState {
    params: SimParams,
    channels: [ChannelModel; CHANNELS],
    active: ChannelId,
    variant: DeviceVariant,
    link_ok: bool,
    rotary_online: bool,
    adc_fault: bool,
    rng: u32,
    last_advance: Option<Instant>,
}

impl BenchState {
    fn noise(&mut self) -> i32 {
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        let span = u32::from(self.params.noise_codes) * 2 + 1;
        (x % span) as i32 - i32::from(self.params.noise_codes)
    }

    fn code(&mut self, volts: f32) -> u16 {
        let ideal = (volts / VREF * 4096.0).round() as i32;
        let raw = ideal + i32::from(self.params.adc_bias) + self.noise();
        // keep off the rails so an idle lane never reads as saturated
        raw.clamp(1, i32::from(ADC_MAX) - 1) as u16
    }

    fn frame(&mut self) -> [u16; RAW_LANES] {
        let mut volts = [0.0; RAW_LANES];
        for (ch, model) in self.channels.iter().enumerate() {
            volts[pull_lane(ch)] = model.pull_v();
            volts[presence_lane(ch)] = model.presence_v();
        }
        std::array::from_fn(|lane| self.code(volts[lane]))
    }

    fn advance(&mut self, now: Instant) {
        let dt = self
            .last_advance
            .map_or(0.0, |prev| now.saturating_duration_since(prev).as_secs_f32());
        self.last_advance = Some(now);
        if dt <= 0.0 {
            return;
        }

        let counts_per_mm = COUNTS_PER_REV / (std::f32::consts::PI * ROLLER_DIAMETER_MM);
        let active = self.active;
        let consumption = self.params.consumption_mm_s;
        for (ch, model) in self.channels.iter_mut().enumerate() {
            let polarity = if self.params.reversed[ch] { -1.0 } else { 1.0 };
            let d = f32::from(model.drive);
            let effective = (d.abs() - STICTION).max(0.0) / (FULL_DRIVE - STICTION);
            let moved = if model.loaded {
                d.signum() * effective * FULL_SPEED_MM_S * dt * polarity
            } else {
                0.0
            };
            let drawn = if ch == active && model.loaded && model.request == RequestedMotion::OnUse
            {
                consumption * dt
            } else {
                0.0
            };

            model.travelled_mm += moved;
            model.slack_mm = (model.slack_mm + moved - drawn).clamp(-SPRING_TRAVEL_MM, SPRING_TRAVEL_MM);
            // the sensor faces the magnet: forward travel lowers the angle
            model.angle_counts -= moved * counts_per_mm;
        }
    }
}

/// Read-only view of the bench for scripts and reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BenchSnapshot {
    pub travelled_mm: [f32; CHANNELS],
    pub pull_v: [f32; CHANNELS],
    pub drives: [i16; CHANNELS],
    pub loaded: [bool; CHANNELS],
    pub indications: [Option<Indication>; CHANNELS],
}

/// Shared simulated unit. Clones refer to the same bench.
#[derive(Clone)]
pub struct SimBench {
    state: Arc<Mutex<BenchState>>,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
}

impl std::fmt::Debug for SimBench {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimBench").finish_non_exhaustive()
    }
}

impl SimBench {
    pub fn new(params: SimParams, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let rng = params.seed.max(1);
        let epoch = clock.now();
        Self {
            state: Arc::new(Mutex::new(BenchState {
                params,
                channels: [ChannelModel::default(); CHANNELS],
                active: 0,
                variant: DeviceVariant::FamilyA,
                link_ok: true,
                rotary_online: true,
                adc_fault: false,
                rng,
                last_advance: None,
            })),
            clock,
            epoch,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, BenchState>> {
        self.state
            .lock()
            .map_err(|_| HwError::Fault("bench state poisoned".into()))
    }

    /// Apply `f` to the bench; a poisoned bench is left untouched.
    fn update(&self, f: impl FnOnce(&mut BenchState)) {
        if let Ok(mut s) = self.state.lock() {
            f(&mut s);
        }
    }

    pub fn adc(&self) -> SimAdc {
        SimAdc { bench: self.clone() }
    }

    pub fn encoders(&self) -> SimEncoders {
        SimEncoders { bench: self.clone() }
    }

    pub fn drives(&self) -> SimDrives {
        SimDrives { bench: self.clone() }
    }

    pub fn protocol(&self) -> SimProtocol {
        SimProtocol { bench: self.clone() }
    }

    pub fn indicator(&self) -> SimIndicator {
        SimIndicator { bench: self.clone() }
    }

    /// Insert filament into a channel; both switches close.
    pub fn load(&self, ch: ChannelId) {
        self.update(|s| s.channels[ch].loaded = true);
    }

    pub fn unload(&self, ch: ChannelId) {
        self.update(|s| {
            s.channels[ch].loaded = false;
            s.channels[ch].slack_mm = 0.0;
        });
    }

    pub fn select(&self, ch: ChannelId) {
        self.update(|s| s.active = ch);
    }

    pub fn request(&self, ch: ChannelId, motion: RequestedMotion) {
        self.update(|s| s.channels[ch].request = motion);
    }

    pub fn set_variant(&self, variant: DeviceVariant) {
        self.update(|s| s.variant = variant);
    }

    pub fn set_link(&self, ok: bool) {
        self.update(|s| s.link_ok = ok);
    }

    pub fn set_rotary_online(&self, online: bool) {
        self.update(|s| s.rotary_online = online);
    }

    pub fn set_adc_fault(&self, fault: bool) {
        self.update(|s| s.adc_fault = fault);
    }

    pub fn snapshot(&self) -> Result<BenchSnapshot> {
        let s = self.lock()?;
        Ok(BenchSnapshot {
            travelled_mm: s.channels.map(|c| c.travelled_mm),
            pull_v: s.channels.map(|c| c.pull_v()),
            drives: s.channels.map(|c| c.drive),
            loaded: s.channels.map(|c| c.loaded),
            indications: s.channels.map(|c| c.indication),
        })
    }
}

/// Simulated analog front-end: eight lanes, block-averaged upstream.
pub struct SimAdc {
    bench: SimBench,
}

impl SampleSource for SimAdc {
    fn poll(&mut self) -> std::result::Result<RawChannelSample, BoxErr> {
        let timestamp_ms = self.bench.clock.ms_since(self.bench.epoch);
        let mut s = self.bench.lock()?;
        if s.adc_fault {
            return Err(HwError::Timeout.into());
        }
        let frames = (0..s.params.frames_per_poll.max(1))
            .map(|_| s.frame())
            .collect();
        tracing::trace!(lanes = RAW_LANES, "adc block acquired");
        Ok(RawChannelSample {
            frames,
            timestamp_ms,
        })
    }

    fn self_calibrate(&mut self) -> std::result::Result<i16, BoxErr> {
        if self.bench.lock()?.adc_fault {
            return Err(HwError::Disconnected("adc").into());
        }
        let mut busy = CALIBRATION_CYCLES;
        wait_until_with_timeout(
            self.bench.clock.as_ref(),
            || {
                busy = busy.saturating_sub(1);
                busy == 0
            },
            Duration::from_millis(50),
            Duration::from_millis(1),
        )?;
        let offset = -self.bench.lock()?.params.adc_bias;
        tracing::debug!(offset, "adc self-calibration done");
        Ok(offset)
    }
}

/// Per-channel magnetic angle sensors. Reading them advances the bench.
pub struct SimEncoders {
    bench: SimBench,
}

impl RotarySensor for SimEncoders {
    fn read_angles(&mut self) -> std::result::Result<RotaryReading, BoxErr> {
        let now = self.bench.clock.now();
        let mut s = self.bench.lock()?;
        s.advance(now);
        if !s.rotary_online {
            return Err(HwError::Disconnected("rotary bus").into());
        }
        let angles = s
            .channels
            .map(|c| c.angle_counts.round().rem_euclid(COUNTS_PER_REV) as u16);
        Ok(RotaryReading {
            angles,
            online: [true; CHANNELS],
        })
    }
}

pub struct SimDrives {
    bench: SimBench,
}

impl MotorDrive for SimDrives {
    fn set_drive(&mut self, channel: ChannelId, value: i16) -> std::result::Result<(), BoxErr> {
        if channel >= CHANNELS {
            return Err(HwError::Fault(format!("no motor on channel {channel}")).into());
        }
        let mut s = self.bench.lock()?;
        s.channels[channel].drive = value.clamp(-1000, 1000);
        Ok(())
    }
}

/// Printer bus as steered by the bench.
pub struct SimProtocol {
    bench: SimBench,
}

impl ProtocolLink for SimProtocol {
    fn active_channel(&self) -> ChannelId {
        self.bench.lock().map(|s| s.active).unwrap_or(0)
    }

    fn requested_motion(&self, channel: ChannelId) -> RequestedMotion {
        self.bench
            .lock()
            .ok()
            .and_then(|s| s.channels.get(channel).map(|c| c.request))
            .unwrap_or_default()
    }

    fn device_variant(&self) -> DeviceVariant {
        self.bench.lock().map(|s| s.variant).unwrap_or_default()
    }

    fn link_ok(&self) -> bool {
        self.bench.lock().map(|s| s.link_ok).unwrap_or(false)
    }
}

/// Records the latest indication per channel.
pub struct SimIndicator {
    bench: SimBench,
}

impl IndicatorSink for SimIndicator {
    fn indicate(&mut self, channel: ChannelId, indication: Indication) {
        tracing::debug!(channel, ?indication, "indicator");
        self.bench.update(|s| {
            if let Some(c) = s.channels.get_mut(channel) {
                c.indication = Some(indication);
            }
        });
    }
}
