//! Type-state builder for `FilamentBuffer` and the generic `build_buffer` constructor.
//!
//! The builder enforces at compile time that the sample source, rotary sensor,
//! motor drive and protocol link are provided before `build()` is available.
//! `try_build()` is always available for dynamic checks.

use std::marker::PhantomData;
use std::sync::Arc;

use filabuf_traits::clock::{Clock, MonotonicClock};
use filabuf_traits::{
    ChannelId, ConfigStore, IndicatorSink, MotorDrive, ProtocolLink, RotarySensor, SampleSource,
};

use crate::bringup::ProbeOutcome;
use crate::config::{BufferConfig, PresenceMode};
use crate::core::{BufferCore, FeatureGates};
use crate::error::{BuildError, Result};
use crate::persist::PersistedState;
use crate::pressure::ChannelCalibration;
use crate::sampler::SampledFrame;
use crate::status::{LearningStatus, TickReport};
use crate::types::Direction;

type DynSource = Box<dyn SampleSource + Send>;
type DynRotary = Box<dyn RotarySensor + Send>;
type DynDrive = Box<dyn MotorDrive + Send>;
type DynLink = Box<dyn ProtocolLink + Send>;

// ── Public dynamic-dispatch wrapper ──────────────────────────────────────────

/// Boxed buffer controller; the usual entry point for applications.
pub struct FilamentBuffer {
    pub(crate) inner: BufferCore<DynSource, DynRotary, DynDrive, DynLink>,
}

impl core::fmt::Debug for FilamentBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FilamentBuffer")
            .field("directions", &self.inner.directions)
            .field("learned", &self.inner.learned)
            .field("tick_hz", &self.inner.cfg.tick_hz)
            .finish()
    }
}

impl FilamentBuffer {
    /// Start building a buffer controller.
    pub fn builder() -> FilamentBufferBuilder<Missing, Missing, Missing, Missing> {
        FilamentBufferBuilder::default()
    }

    /// One control tick, polling the sample source directly.
    pub fn step(&mut self) -> TickReport {
        self.inner.step()
    }

    /// One control tick fed by a background sampler.
    pub fn step_from_frame(&mut self, frame: Option<SampledFrame>) -> TickReport {
        self.inner.step_from_frame(frame)
    }

    pub fn now_ms(&self) -> u64 {
        self.inner.now_ms()
    }

    pub fn config(&self) -> &BufferConfig {
        self.inner.config()
    }

    pub fn gates(&self) -> FeatureGates {
        self.inner.gates()
    }

    pub fn direction(&self, ch: ChannelId) -> Result<Direction> {
        self.inner.direction(ch)
    }

    pub fn is_learned(&self, ch: ChannelId) -> Result<bool> {
        self.inner.is_learned(ch)
    }

    pub fn direction_learning_status(&self, ch: ChannelId) -> Result<LearningStatus> {
        self.inner.direction_learning_status(ch)
    }

    pub fn calibration(&self, ch: ChannelId) -> Result<&ChannelCalibration> {
        self.inner.calibration(ch)
    }

    pub fn deadband(&self, ch: ChannelId) -> Result<(f32, f32)> {
        self.inner.deadband(ch)
    }

    pub fn reset_direction(&mut self, ch: ChannelId) -> Result<()> {
        self.inner.reset_direction(ch)
    }

    pub fn reset_all_directions(&mut self) -> Result<()> {
        self.inner.reset_all_directions()
    }

    pub fn reset_pressure_calibration(&mut self, ch: ChannelId) -> Result<()> {
        self.inner.reset_pressure_calibration(ch)
    }

    pub fn request_calibration(&mut self, ch: ChannelId) -> Result<()> {
        self.inner.request_calibration(ch)
    }

    /// Boot-time polarity probe; see `BufferCore::bring_up`.
    pub fn bring_up(&mut self) -> Vec<(ChannelId, ProbeOutcome)> {
        self.inner.bring_up()
    }

    /// Stop every motor (best-effort).
    pub fn stop_all(&mut self) -> Result<()> {
        self.inner.stop_all()
    }

    pub fn persisted_state(&self) -> PersistedState {
        self.inner.persisted_state()
    }

    pub fn has_unsaved_state(&self) -> bool {
        self.inner.has_unsaved_state()
    }

    pub fn flush_state(&mut self) -> Result<()> {
        self.inner.flush_state()
    }
}

// ── Type-state markers ───────────────────────────────────────────────────────

pub struct Missing;
pub struct Set;

/// Builder for `FilamentBuffer`. The configuration is validated on `build()`.
pub struct FilamentBufferBuilder<S, R, D, L> {
    source: Option<DynSource>,
    rotary: Option<DynRotary>,
    drive: Option<DynDrive>,
    link: Option<DynLink>,
    config: Option<BufferConfig>,
    store: Option<Box<dyn ConfigStore + Send>>,
    indicator: Option<Box<dyn IndicatorSink + Send>>,
    clock: Option<Box<dyn Clock + Send + Sync>>,
    _s: PhantomData<S>,
    _r: PhantomData<R>,
    _d: PhantomData<D>,
    _l: PhantomData<L>,
}

impl Default for FilamentBufferBuilder<Missing, Missing, Missing, Missing> {
    fn default() -> Self {
        Self {
            source: None,
            rotary: None,
            drive: None,
            link: None,
            config: None,
            store: None,
            indicator: None,
            clock: None,
            _s: PhantomData,
            _r: PhantomData,
            _d: PhantomData,
            _l: PhantomData,
        }
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

fn positive(v: f32) -> bool {
    v.is_finite() && v > 0.0
}

/// Reject configurations the control loop cannot run with.
///
/// Tunables that only affect an optional manager are not checked here; the
/// core disables that manager instead (see `FeatureGates`).
fn validate(cfg: &BufferConfig) -> Result<()> {
    if cfg.tick_hz == 0 {
        return Err(invalid("tick_hz must be > 0"));
    }
    if cfg.filter.window == 0 || !cfg.filter.window.is_power_of_two() {
        return Err(invalid("filter window must be a power of two"));
    }
    if cfg.filter.noise_history == 0 {
        return Err(invalid("noise_history must be >= 1"));
    }
    if !positive(cfg.filter.vref) {
        return Err(invalid("vref must be > 0"));
    }
    if cfg.filter.fault_threshold == 0 {
        return Err(invalid("fault_threshold must be >= 1"));
    }
    if cfg.position.counts_per_rev == 0 {
        return Err(invalid("counts_per_rev must be > 0"));
    }
    if !positive(cfg.position.roller_diameter_mm) {
        return Err(invalid("roller_diameter_mm must be > 0"));
    }
    if !positive(cfg.motor.drive_limit) || cfg.motor.drive_limit > 1000.0 {
        return Err(invalid("drive_limit must be in (0, 1000]"));
    }
    if cfg.motor.deadzone.is_sign_negative() || cfg.motor.deadzone >= cfg.motor.drive_limit {
        return Err(invalid("deadzone must be in [0, drive_limit)"));
    }
    if !positive(cfg.scheduler.retract_distance_mm) {
        return Err(invalid("retract_distance_mm must be > 0"));
    }
    if cfg.presence.mode == PresenceMode::DualSwitch {
        let p = &cfg.presence;
        if p.dual_absent_below_v >= p.dual_inner_below_v
            || p.dual_inner_below_v >= p.dual_outer_below_v
        {
            return Err(invalid("dual-switch thresholds must be increasing"));
        }
    }
    Ok(())
}

/// Validate configuration and construct a `BufferCore`.
///
/// Shared by `FilamentBufferBuilder::try_build()` and `build_buffer()`.
#[allow(clippy::too_many_arguments)]
fn validate_and_build<S, R, D, L>(
    source: S,
    rotary: R,
    drive: D,
    link: L,
    cfg: BufferConfig,
    store: Option<Box<dyn ConfigStore + Send>>,
    indicator: Option<Box<dyn IndicatorSink + Send>>,
    clock: Option<Box<dyn Clock + Send + Sync>>,
) -> Result<BufferCore<S, R, D, L>>
where
    S: SampleSource,
    R: RotarySensor,
    D: MotorDrive,
    L: ProtocolLink,
{
    validate(&cfg)?;

    let clock: Arc<dyn Clock + Send + Sync> = match clock {
        Some(b) => Arc::from(b),
        None => Arc::new(MonotonicClock::new()),
    };

    tracing::debug!(tick_hz = cfg.tick_hz, presence = ?cfg.presence.mode, "building buffer core");
    Ok(BufferCore::assemble(
        source, rotary, drive, link, cfg, store, indicator, clock,
    ))
}

impl<S, R, D, L> FilamentBufferBuilder<S, R, D, L> {
    /// Fallible build available in any type-state; returns detailed error for missing pieces.
    pub fn try_build(self) -> Result<FilamentBuffer> {
        let source = self
            .source
            .ok_or_else(|| eyre::Report::new(BuildError::MissingSource))?;
        let rotary = self
            .rotary
            .ok_or_else(|| eyre::Report::new(BuildError::MissingRotary))?;
        let drive = self
            .drive
            .ok_or_else(|| eyre::Report::new(BuildError::MissingDrive))?;
        let link = self
            .link
            .ok_or_else(|| eyre::Report::new(BuildError::MissingLink))?;

        let inner = validate_and_build(
            source,
            rotary,
            drive,
            link,
            self.config.unwrap_or_default(),
            self.store,
            self.indicator,
            self.clock,
        )?;
        Ok(FilamentBuffer { inner })
    }

    /// Move every field into a builder with different type-state markers.
    fn retype<S2, R2, D2, L2>(self) -> FilamentBufferBuilder<S2, R2, D2, L2> {
        FilamentBufferBuilder {
            source: self.source,
            rotary: self.rotary,
            drive: self.drive,
            link: self.link,
            config: self.config,
            store: self.store,
            indicator: self.indicator,
            clock: self.clock,
            _s: PhantomData,
            _r: PhantomData,
            _d: PhantomData,
            _l: PhantomData,
        }
    }
}

/// Chainable setters that do not affect type-state.
impl<S, R, D, L> FilamentBufferBuilder<S, R, D, L> {
    pub fn with_config(mut self, config: BufferConfig) -> Self {
        self.config = Some(config);
        self
    }
    /// Non-volatile store for directions and calibration; without one nothing persists.
    pub fn with_store(mut self, store: impl ConfigStore + Send + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }
    pub fn with_indicator(mut self, indicator: impl IndicatorSink + Send + 'static) -> Self {
        self.indicator = Some(Box::new(indicator));
        self
    }
    /// Provide a custom clock implementation; defaults to `MonotonicClock` when not provided.
    pub fn with_clock(mut self, clock: Box<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }
}

// Setters that advance type-state
impl<R, D, L> FilamentBufferBuilder<Missing, R, D, L> {
    pub fn with_source(
        self,
        source: impl SampleSource + Send + 'static,
    ) -> FilamentBufferBuilder<Set, R, D, L> {
        let mut next = self.retype();
        next.source = Some(Box::new(source));
        next
    }
}

impl<S, D, L> FilamentBufferBuilder<S, Missing, D, L> {
    pub fn with_rotary(
        self,
        rotary: impl RotarySensor + Send + 'static,
    ) -> FilamentBufferBuilder<S, Set, D, L> {
        let mut next = self.retype();
        next.rotary = Some(Box::new(rotary));
        next
    }
}

impl<S, R, L> FilamentBufferBuilder<S, R, Missing, L> {
    pub fn with_drive(
        self,
        drive: impl MotorDrive + Send + 'static,
    ) -> FilamentBufferBuilder<S, R, Set, L> {
        let mut next = self.retype();
        next.drive = Some(Box::new(drive));
        next
    }
}

impl<S, R, D> FilamentBufferBuilder<S, R, D, Missing> {
    pub fn with_link(
        self,
        link: impl ProtocolLink + Send + 'static,
    ) -> FilamentBufferBuilder<S, R, D, Set> {
        let mut next = self.retype();
        next.link = Some(Box::new(link));
        next
    }
}

impl FilamentBufferBuilder<Set, Set, Set, Set> {
    /// Validate and build. Only available once all four collaborators are set.
    pub fn build(self) -> Result<FilamentBuffer> {
        self.try_build()
    }
}

/// Generic, statically-dispatched alias using the unified core.
pub type FilamentBufferG<S, R, D, L> = BufferCore<S, R, D, L>;

/// Build a statically-dispatched `FilamentBufferG` from concrete collaborators.
#[allow(clippy::too_many_arguments)]
pub fn build_buffer<S, R, D, L>(
    source: S,
    rotary: R,
    drive: D,
    link: L,
    cfg: BufferConfig,
    store: Option<Box<dyn ConfigStore + Send>>,
    indicator: Option<Box<dyn IndicatorSink + Send>>,
    clock: Option<Box<dyn Clock + Send + Sync>>,
) -> Result<FilamentBufferG<S, R, D, L>>
where
    S: SampleSource + 'static,
    R: RotarySensor + 'static,
    D: MotorDrive + 'static,
    L: ProtocolLink + 'static,
{
    validate_and_build(source, rotary, drive, link, cfg, store, indicator, clock)
}
