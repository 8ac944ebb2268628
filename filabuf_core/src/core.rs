//! The buffer control loop (`BufferCore`).
//!
//! One tick: acquire, filter, track position, run calibration and learning,
//! schedule, drive motors, then report. Collaborator failures are absorbed
//! into the tick report; nothing here stops the loop.

use std::sync::Arc;
use std::time::Instant;

use filabuf_traits::clock::Clock;
use filabuf_traits::{
    CHANNELS, ChannelId, ConfigStore, Indication, IndicatorSink, MotorDrive, ProtocolLink,
    RawChannelSample, RotaryReading, RotarySensor, SampleSource, presence_lane, pull_lane,
};

use crate::bringup::{self, ProbeOutcome};
use crate::config::BufferConfig;
use crate::error::{BufferError, Result};
use crate::filter::FilterEngine;
use crate::hw_error::map_hw_error;
use crate::learning::{CorrelationLearner, LearnEvent, LearnerState, LoadingDetector, LoadingOutcome};
use crate::motor::{MotorController, MotorInputs};
use crate::persist::{self, PersistedCalibration, PersistedChannel, PersistedState};
use crate::position::{ChannelMotion, PositionBank};
use crate::presence;
use crate::pressure::{CalibrationOutcome, CalibrationView, ChannelCalibration, PressureManager};
use crate::sampler::SampledFrame;
use crate::scheduler::{ScheduleEvent, ScheduleInputs, Scheduler};
use crate::status::{BufferEvent, LearningStatus, TickReport};
use crate::types::{ChannelMotionState, Direction, FilamentMotionCommand, PresenceStatus, PressureStatus};
use crate::util::dt_seconds;

/// Managers that stay enabled for this session.
///
/// A manager whose tunables are inconsistent is switched off at startup
/// instead of failing the whole core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureGates {
    pub calibration: bool,
    pub learning: bool,
    pub loading: bool,
}

impl FeatureGates {
    pub fn from_config(cfg: &BufferConfig) -> Self {
        let p = &cfg.pressure;
        let calibration = if p.target_samples == 0
            || p.min_valid_v >= p.max_valid_v
            || p.static_low_v >= p.static_high_v
            || p.deadband_scale <= 0.0
        {
            tracing::warn!("pressure calibration tunables inconsistent; calibration disabled");
            false
        } else {
            p.auto_recalibration || p.adaptive
        };

        let l = &cfg.learning;
        let learning = if l.min_samples == 0
            || l.confidence_threshold <= 0.0
            || l.confidence_threshold > 1.0
            || l.min_movement_mm <= 0.0
        {
            tracing::warn!("direction learning tunables inconsistent; learning disabled");
            false
        } else {
            l.auto
        };

        let d = &cfg.loading;
        let loading = if d.settle_ms.saturating_add(d.hold_ms) > d.timeout_ms {
            tracing::warn!("loading detection tunables inconsistent; detection disabled");
            false
        } else {
            d.enabled && l.auto
        };

        Self {
            calibration,
            learning,
            loading,
        }
    }
}

/// Unified core for both dynamic (boxed) and generic (static dispatch) variants.
pub struct BufferCore<S, R, D, L>
where
    S: SampleSource,
    R: RotarySensor,
    D: MotorDrive,
    L: ProtocolLink,
{
    pub(crate) source: S,
    pub(crate) rotary: R,
    pub(crate) drive: D,
    pub(crate) link: L,
    pub(crate) store: Option<Box<dyn ConfigStore + Send>>,
    pub(crate) indicator: Option<Box<dyn IndicatorSink + Send>>,
    pub(crate) cfg: BufferConfig,
    pub(crate) gates: FeatureGates,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) epoch: Instant,

    pub(crate) filter: FilterEngine,
    pub(crate) positions: PositionBank,
    pub(crate) pressure: PressureManager,
    pub(crate) learners: [CorrelationLearner; CHANNELS],
    pub(crate) loaders: [LoadingDetector; CHANNELS],
    pub(crate) motors: [MotorController; CHANNELS],
    pub(crate) scheduler: Scheduler,

    pub(crate) directions: [Direction; CHANNELS],
    pub(crate) learned: [bool; CHANNELS],
    pub(crate) loading_confirmed: [bool; CHANNELS],
    pub(crate) last_tick_ms: Option<u64>,
    pub(crate) persist_dirty: bool,
    pub(crate) indications: [Option<Indication>; CHANNELS],
}

impl<S, R, D, L> core::fmt::Debug for BufferCore<S, R, D, L>
where
    S: SampleSource,
    R: RotarySensor,
    D: MotorDrive,
    L: ProtocolLink,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BufferCore")
            .field("directions", &self.directions)
            .field("learned", &self.learned)
            .field("loading_confirmed", &self.loading_confirmed)
            .field("gates", &self.gates)
            .finish_non_exhaustive()
    }
}

/// Per-tick sensor picture shared by the managers.
struct Observed {
    now: u64,
    dt_s: f32,
    presence: [PresenceStatus; CHANNELS],
    pull_v: [f32; CHANNELS],
    pull_healthy: [bool; CHANNELS],
    degraded: [bool; CHANNELS],
    motion: [ChannelMotion; CHANNELS],
}

impl<S, R, D, L> BufferCore<S, R, D, L>
where
    S: SampleSource,
    R: RotarySensor,
    D: MotorDrive,
    L: ProtocolLink,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn assemble(
        source: S,
        rotary: R,
        drive: D,
        link: L,
        cfg: BufferConfig,
        store: Option<Box<dyn ConfigStore + Send>>,
        indicator: Option<Box<dyn IndicatorSink + Send>>,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let gates = FeatureGates::from_config(&cfg);
        let epoch = clock.now();
        let motors = std::array::from_fn(|_| {
            MotorController::new(
                cfg.motor.clone(),
                cfg.assist.clone(),
                cfg.presence.mode,
                cfg.pressure.send_max_v,
            )
        });
        let mut core = Self {
            source,
            rotary,
            drive,
            link,
            store,
            indicator,
            filter: FilterEngine::new(cfg.filter.clone()),
            positions: PositionBank::new(cfg.position.clone()),
            pressure: PressureManager::new(cfg.pressure.clone(), cfg.filter.vref),
            learners: std::array::from_fn(|_| CorrelationLearner::new(cfg.learning.clone())),
            loaders: std::array::from_fn(|_| LoadingDetector::new(cfg.loading.clone())),
            motors,
            scheduler: Scheduler::new(cfg.scheduler.clone()),
            directions: [Direction::Forward; CHANNELS],
            learned: [false; CHANNELS],
            loading_confirmed: [false; CHANNELS],
            last_tick_ms: None,
            persist_dirty: false,
            indications: [None; CHANNELS],
            cfg,
            gates,
            clock,
            epoch,
        };
        core.load_persisted();
        core
    }

    /// Milliseconds since the core was built.
    pub fn now_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }

    pub fn config(&self) -> &BufferConfig {
        &self.cfg
    }

    pub fn gates(&self) -> FeatureGates {
        self.gates
    }

    pub fn filter(&self) -> &FilterEngine {
        &self.filter
    }

    /// One control tick, polling the sample source directly.
    pub fn step(&mut self) -> TickReport {
        let now = self.now_ms();
        let mut hw_errors = Vec::new();

        if self.filter.self_calibration_due(now) {
            match self.source.self_calibrate() {
                Ok(offset) => self.filter.apply_self_calibration(offset, now),
                Err(e) => {
                    let err = map_hw_error(e.as_ref());
                    tracing::warn!(error = %err, "adc self-calibration failed; keeping previous offset");
                    self.filter.defer_self_calibration(now);
                    hw_errors.push(err);
                }
            }
        }

        let sample = match self.source.poll() {
            Ok(s) => Some(s),
            Err(e) => {
                let err = map_hw_error(e.as_ref());
                tracing::warn!(error = %err, "sample poll failed");
                hw_errors.push(err);
                None
            }
        };
        self.process(sample.as_ref(), now, hw_errors)
    }

    /// One control tick fed by a background sampler; `None` means no frame arrived in time.
    pub fn step_from_frame(&mut self, frame: Option<SampledFrame>) -> TickReport {
        let now = self.now_ms();
        let sample = frame.map(|f| {
            if let Some(offset) = f.calibration_offset {
                if offset != self.filter.lane(0).offset() {
                    self.filter.apply_self_calibration(offset, now);
                }
            }
            f.sample
        });
        self.process(sample.as_ref(), now, Vec::new())
    }

    fn process(
        &mut self,
        sample: Option<&RawChannelSample>,
        now: u64,
        mut hw_errors: Vec<BufferError>,
    ) -> TickReport {
        let mut events = Vec::new();

        let filtered = match sample {
            Some(s) => self.filter.process(s),
            None => self.filter.process_missing(),
        };
        events.extend(filtered.transitions.iter().map(|t| BufferEvent::LaneHealthChanged {
            lane: t.lane,
            healthy: t.healthy,
        }));

        let reading = match self.rotary.read_angles() {
            Ok(r) => r,
            Err(e) => {
                let err = map_hw_error(e.as_ref());
                tracing::warn!(error = %err, "rotary read failed");
                hw_errors.push(err);
                RotaryReading::offline()
            }
        };
        let motion = self.positions.update(&reading, now);
        let dt_s = dt_seconds(self.last_tick_ms, now);
        self.last_tick_ms = Some(now);

        let obs = Observed {
            now,
            dt_s,
            presence: std::array::from_fn(|ch| {
                presence::classify(&self.cfg.presence, filtered.volts[presence_lane(ch)])
            }),
            pull_v: std::array::from_fn(|ch| filtered.volts[pull_lane(ch)]),
            pull_healthy: std::array::from_fn(|ch| filtered.healthy[pull_lane(ch)]),
            degraded: std::array::from_fn(|ch| {
                !filtered.healthy[pull_lane(ch)]
                    || !filtered.healthy[presence_lane(ch)]
                    || !reading.online[ch]
            }),
            motion,
        };

        let link_ok = self.link.link_ok();
        if link_ok {
            self.observe_learning(&obs, &mut events);
            let active = self.link.active_channel();
            if active >= CHANNELS {
                tracing::warn!(active, "protocol selected an invalid channel");
            }
            self.run_calibration(&obs, &mut events);
            self.schedule(&obs, active, &mut events);
            self.update_learning_sessions(active, now);
            self.update_loading_detection(active, now);
        } else {
            tracing::debug!("protocol link down; parking motors");
            self.scheduler.park_all();
        }

        let drives = self.drive_motors(&obs, &mut hw_errors);
        let online = std::array::from_fn(|ch| {
            link_ok && !obs.degraded[ch] && self.scheduler.reports_online(ch, obs.presence[ch])
        });
        self.update_indicators(&obs, &events);
        self.persist_on_completion(&mut events);

        TickReport {
            now_ms: now,
            drives,
            commands: self.scheduler.commands(),
            states: self.scheduler.states(),
            presence: obs.presence,
            pressure_v: obs.pull_v,
            online,
            degraded: obs.degraded,
            healthy: filtered.healthy,
            link_ok,
            events,
            hw_errors,
        }
    }

    /// Feed this tick's motion and presence to the running learners.
    fn observe_learning(&mut self, obs: &Observed, events: &mut Vec<BufferEvent>) {
        for ch in 0..CHANNELS {
            match self.learners[ch].observe(obs.motion[ch].delta_mm, obs.now) {
                Some(LearnEvent::Learned {
                    direction,
                    confidence,
                }) => {
                    let previous = self.directions[ch];
                    let updated = previous.compose(direction);
                    tracing::info!(channel = ch, ?updated, confidence, "motor direction learned");
                    self.directions[ch] = updated;
                    self.learned[ch] = true;
                    // a running insertion test was driven with the old polarity
                    if updated != previous && self.loaders[ch].is_active() {
                        self.loaders[ch].cancel();
                    }
                    events.push(BufferEvent::DirectionLearned {
                        channel: ch,
                        direction: updated,
                        confidence,
                    });
                }
                Some(LearnEvent::Abandoned(reason)) => {
                    tracing::debug!(channel = ch, ?reason, "direction learning abandoned");
                    events.push(BufferEvent::LearningAbandoned {
                        channel: ch,
                        reason,
                    });
                }
                None => {}
            }

            match self.loaders[ch].observe(obs.presence[ch].is_absent(), obs.now) {
                Some(LoadingOutcome::Confirmed(direction)) => {
                    tracing::info!(channel = ch, ?direction, "loading direction confirmed");
                    if direction != self.directions[ch] {
                        self.learners[ch].cancel();
                    }
                    self.directions[ch] = direction;
                    self.loading_confirmed[ch] = true;
                    events.push(BufferEvent::LoadingDirectionConfirmed {
                        channel: ch,
                        direction,
                    });
                }
                Some(LoadingOutcome::TimedOut) => {
                    tracing::debug!(channel = ch, "loading detection timed out");
                    events.push(BufferEvent::LoadingDetectionTimedOut { channel: ch });
                }
                None => {}
            }
        }
    }

    fn run_calibration(&mut self, obs: &Observed, events: &mut Vec<BufferEvent>) {
        if !self.gates.calibration {
            return;
        }
        let views = std::array::from_fn(|ch| CalibrationView {
            idle: self.scheduler.slot(ch).state == ChannelMotionState::Idle
                && self.link.requested_motion(ch) == filabuf_traits::RequestedMotion::Idle,
            presence_absent: obs.presence[ch].is_absent(),
            pull_healthy: obs.pull_healthy[ch],
            pull_v: obs.pull_v[ch],
        });
        for outcome in self.pressure.tick(obs.now, &views) {
            events.push(match outcome {
                CalibrationOutcome::Completed {
                    channel,
                    zero_v,
                    samples,
                } => BufferEvent::CalibrationCompleted {
                    channel,
                    zero_v,
                    samples,
                },
                CalibrationOutcome::Rejected { channel, samples } => {
                    BufferEvent::CalibrationRejected { channel, samples }
                }
                CalibrationOutcome::Aborted { channel, reason } => {
                    BufferEvent::CalibrationAborted { channel, reason }
                }
            });
        }
    }

    fn schedule(&mut self, obs: &Observed, active: ChannelId, events: &mut Vec<BufferEvent>) {
        let inputs = ScheduleInputs {
            now_ms: obs.now,
            active,
            variant: self.link.device_variant(),
            requests: std::array::from_fn(|ch| self.link.requested_motion(ch)),
            presence: obs.presence,
            delta_mm: std::array::from_fn(|ch| obs.motion[ch].delta_mm),
        };
        for event in self.scheduler.tick(&inputs) {
            match event {
                ScheduleEvent::FilamentInserted(ch) => {
                    events.push(BufferEvent::FilamentInserted { channel: ch });
                }
                ScheduleEvent::RetractionComplete(ch) => {
                    events.push(BufferEvent::RetractionComplete { channel: ch });
                }
            }
        }
    }

    /// Correlation learning runs only while the active channel is feeding.
    fn update_learning_sessions(&mut self, active: ChannelId, now: u64) {
        for ch in 0..CHANNELS {
            let feeding = ch == active && self.scheduler.slot(ch).command.is_feed();
            if self.gates.learning && !self.learned[ch] && feeding {
                self.learners[ch].begin(Direction::Forward, now);
            } else if self.learners[ch].is_active() {
                self.learners[ch].cancel();
            }
        }
    }

    /// Loading detection watches the active channel while it feeds with its
    /// current polarity, until one insertion has confirmed that polarity.
    fn update_loading_detection(&mut self, active: ChannelId, now: u64) {
        for ch in 0..CHANNELS {
            let sending = ch == active && self.scheduler.slot(ch).command == FilamentMotionCommand::Send;
            if self.gates.loading && !self.loading_confirmed[ch] && sending {
                if !self.loaders[ch].is_active() {
                    tracing::debug!(channel = ch, tested = ?self.directions[ch], "loading detection started");
                    self.loaders[ch].begin(self.directions[ch], now);
                }
            } else if self.loaders[ch].is_active() {
                self.loaders[ch].cancel();
            }
        }
    }

    fn drive_motors(&mut self, obs: &Observed, hw_errors: &mut Vec<BufferError>) -> [i16; CHANNELS] {
        let variant = self.link.device_variant();
        let mut drives = [0i16; CHANNELS];
        for (ch, out) in drives.iter_mut().enumerate() {
            let command = self.scheduler.slot(ch).command;
            let inputs = MotorInputs {
                presence: obs.presence[ch],
                pull_v: obs.pull_v[ch],
                speed_mm_s: obs.motion[ch].speed_mm_s,
                variant,
                zero_v: self.pressure.zero(ch),
                pressure: self.pressure.status(ch, obs.pull_v[ch]),
                calibrated: self.pressure.is_calibrated(ch),
                direction: self.directions[ch],
                dt_s: obs.dt_s,
                now_ms: obs.now,
            };
            let motor = &mut self.motors[ch];
            motor.set_command(command);
            *out = motor.step(&inputs);
            if let Err(e) = self.drive.set_drive(ch, *out) {
                let err = map_hw_error(e.as_ref());
                tracing::warn!(channel = ch, error = %err, "motor drive write failed");
                hw_errors.push(err);
            }
        }
        drives
    }

    fn update_indicators(&mut self, obs: &Observed, events: &[BufferEvent]) {
        let Some(sink) = self.indicator.as_mut() else {
            return;
        };
        for ch in 0..CHANNELS {
            let just_learned = events.iter().any(|e| {
                matches!(e,
                    BufferEvent::DirectionLearned { channel, .. }
                    | BufferEvent::LoadingDirectionConfirmed { channel, .. } if *channel == ch)
            });
            let slot = self.scheduler.slot(ch);
            let indication = if just_learned {
                Indication::DirectionLearned
            } else if obs.degraded[ch] {
                Indication::Degraded
            } else if self.pressure.is_running(ch) {
                Indication::Calibrating
            } else {
                match (slot.command, obs.presence[ch]) {
                    (FilamentMotionCommand::Send, _) => Indication::Feeding,
                    (FilamentMotionCommand::SlowSend, _) => Indication::SlowFeeding,
                    (FilamentMotionCommand::Pull, _) => {
                        let target = self.cfg.scheduler.retract_distance_mm.max(f32::EPSILON);
                        let pct = (slot.retract_mm / target * 100.0).clamp(0.0, 100.0);
                        Indication::Retracting {
                            progress_pct: pct as u8,
                        }
                    }
                    (FilamentMotionCommand::PressureCtrlOnUse, _) => Indication::InUse,
                    (_, PresenceStatus::Absent) => Indication::Off,
                    (_, PresenceStatus::OuterOnly) => Indication::OuterSwitchOnly,
                    (_, PresenceStatus::InnerOnly) => Indication::InnerSwitchOnly,
                    (_, PresenceStatus::Loaded) => match self.pressure.status(ch, obs.pull_v[ch]) {
                        PressureStatus::High => Indication::PressureHigh,
                        PressureStatus::Low => Indication::PressureLow,
                        PressureStatus::Normal => Indication::Idle,
                    },
                }
            };
            if self.indications[ch] != Some(indication) {
                self.indications[ch] = Some(indication);
                sink.indicate(ch, indication);
            }
        }
    }

    fn persist_on_completion(&mut self, events: &mut Vec<BufferEvent>) {
        if !events.iter().any(BufferEvent::completes_persisted_state) {
            return;
        }
        self.persist_dirty = true;
        if let Err(e) = self.save_state() {
            tracing::warn!(error = %e, "failed to persist state; will retry on next completion");
            events.push(BufferEvent::PersistFailed {
                reason: e.to_string(),
            });
        }
    }

    fn save_state(&mut self) -> std::result::Result<(), BufferError> {
        if self.store.is_none() {
            self.persist_dirty = false;
            return Ok(());
        }
        let blob = persist::encode(&self.persisted_state())
            .map_err(|e| BufferError::Persistence(e.to_string()))?;
        let Some(store) = self.store.as_mut() else {
            return Ok(());
        };
        store.save(&blob).map_err(|e| map_hw_error(e.as_ref()))?;
        self.persist_dirty = false;
        tracing::debug!(bytes = blob.len(), "state persisted");
        Ok(())
    }

    fn load_persisted(&mut self) {
        let Some(store) = self.store.as_mut() else {
            return;
        };
        let state = match store.load() {
            Ok(Some(blob)) => match persist::decode(&blob) {
                Ok(state) => state,
                Err(e) => {
                    tracing::warn!(error = %e, "stored state invalid; using defaults");
                    return;
                }
            },
            Ok(None) => {
                tracing::info!("no stored state; using defaults");
                return;
            }
            Err(e) => {
                tracing::warn!(error = %map_hw_error(e.as_ref()), "failed to load stored state; using defaults");
                return;
            }
        };

        let (min_v, max_v) = (self.cfg.pressure.min_valid_v, self.cfg.pressure.max_valid_v);
        for (ch, rec) in state.channels.iter().enumerate().take(CHANNELS) {
            self.directions[ch] = Direction::from_sign(rec.direction);
            self.learned[ch] = rec.learned;
            self.loading_confirmed[ch] = rec.loading_confirmed;
            let c = &rec.calibration;
            if c.calibrated && !c.is_plausible(min_v, max_v) {
                tracing::warn!(
                    channel = ch,
                    zero_v = c.zero_v,
                    positive_range_v = c.positive_range_v,
                    negative_range_v = c.negative_range_v,
                    "stored calibration out of range; channel stays uncalibrated"
                );
            } else if c.calibrated {
                self.pressure.restore(
                    ch,
                    ChannelCalibration {
                        zero_v: c.zero_v,
                        positive_range_v: c.positive_range_v,
                        negative_range_v: c.negative_range_v,
                        samples: c.samples,
                        calibrated: true,
                        last_calibrated_ms: None,
                    },
                );
            }
        }
        tracing::info!(
            directions = ?self.directions,
            learned = ?self.learned,
            loading_confirmed = ?self.loading_confirmed,
            "stored state loaded"
        );
    }

    /// The state blob contents as they would be saved now.
    pub fn persisted_state(&self) -> PersistedState {
        PersistedState {
            channels: (0..CHANNELS)
                .map(|ch| {
                    let c = self.pressure.calibration(ch);
                    PersistedChannel {
                        direction: self.directions[ch].sign(),
                        learned: self.learned[ch],
                        loading_confirmed: self.loading_confirmed[ch],
                        calibration: PersistedCalibration {
                            zero_v: c.zero_v,
                            positive_range_v: c.positive_range_v,
                            negative_range_v: c.negative_range_v,
                            samples: c.samples,
                            calibrated: c.calibrated,
                        },
                    }
                })
                .collect(),
        }
    }

    /// Whether a completed result has not reached the store yet.
    pub fn has_unsaved_state(&self) -> bool {
        self.persist_dirty
    }

    /// Save again if an earlier write failed; a no-op when nothing is pending.
    pub fn flush_state(&mut self) -> Result<()> {
        if !self.persist_dirty {
            return Ok(());
        }
        self.save_state().map_err(eyre::Report::new)
    }

    fn check_channel(ch: ChannelId) -> Result<()> {
        if ch < CHANNELS {
            Ok(())
        } else {
            Err(eyre::Report::new(BufferError::InvalidChannel(ch)))
        }
    }

    pub fn direction(&self, ch: ChannelId) -> Result<Direction> {
        Self::check_channel(ch)?;
        Ok(self.directions[ch])
    }

    pub fn is_learned(&self, ch: ChannelId) -> Result<bool> {
        Self::check_channel(ch)?;
        Ok(self.learned[ch])
    }

    pub fn direction_learning_status(&self, ch: ChannelId) -> Result<LearningStatus> {
        Self::check_channel(ch)?;
        let session = match self.learners[ch].state() {
            LearnerState::Active(s) => Some((s.samples(), s.confidence())),
            LearnerState::Idle | LearnerState::Complete { .. } => None,
        };
        Ok(LearningStatus {
            direction: self.directions[ch],
            learned: self.learned[ch],
            loading_confirmed: self.loading_confirmed[ch],
            session,
            loading: self.loaders[ch].phase(),
        })
    }

    pub fn calibration(&self, ch: ChannelId) -> Result<&ChannelCalibration> {
        Self::check_channel(ch)?;
        Ok(self.pressure.calibration(ch))
    }

    /// Effective `(low, high)` pressure deadband.
    pub fn deadband(&self, ch: ChannelId) -> Result<(f32, f32)> {
        Self::check_channel(ch)?;
        Ok(self.pressure.deadband(ch))
    }

    /// Forget the learned polarity of one channel and persist immediately.
    pub fn reset_direction(&mut self, ch: ChannelId) -> Result<()> {
        Self::check_channel(ch)?;
        self.clear_direction(ch);
        self.persist_now()
    }

    pub fn reset_all_directions(&mut self) -> Result<()> {
        for ch in 0..CHANNELS {
            self.clear_direction(ch);
        }
        self.persist_now()
    }

    fn clear_direction(&mut self, ch: ChannelId) {
        self.directions[ch] = Direction::Forward;
        self.learned[ch] = false;
        self.loading_confirmed[ch] = false;
        self.learners[ch].cancel();
        self.loaders[ch].cancel();
        tracing::info!(channel = ch, "motor direction reset");
    }

    pub fn reset_pressure_calibration(&mut self, ch: ChannelId) -> Result<()> {
        Self::check_channel(ch)?;
        self.pressure.reset(ch);
        self.persist_now()
    }

    /// Queue a calibration session for the next eligible tick.
    pub fn request_calibration(&mut self, ch: ChannelId) -> Result<()> {
        Self::check_channel(ch)?;
        self.pressure.request(ch);
        Ok(())
    }

    fn persist_now(&mut self) -> Result<()> {
        self.persist_dirty = true;
        self.save_state().map_err(eyre::Report::new)
    }

    /// Probe motor polarity on every channel that has not learned one.
    ///
    /// Runs only when bring-up is enabled and automatic learning is off. A
    /// failed probe falls back to the static correction table.
    pub fn bring_up(&mut self) -> Vec<(ChannelId, ProbeOutcome)> {
        if !self.cfg.bringup.enabled || self.cfg.learning.auto {
            tracing::debug!("polarity bring-up skipped");
            return Vec::new();
        }
        let mut results = Vec::new();
        for ch in (0..CHANNELS).filter(|&ch| !self.learned[ch] && !self.loading_confirmed[ch]) {
            let outcome = match bringup::probe_channel(
                &mut self.rotary,
                &mut self.drive,
                self.clock.as_ref(),
                &self.cfg.bringup,
                &self.cfg.position,
                ch,
            ) {
                Ok(o) => o,
                Err(e) => {
                    tracing::warn!(channel = ch, error = %e, "polarity probe failed; using correction table");
                    if let Err(e) = self.drive.set_drive(ch, 0) {
                        let err = map_hw_error(e.as_ref());
                        tracing::warn!(channel = ch, error = %err, "failed to stop motor after bring-up");
                    }
                    let applied = if self.cfg.bringup.correction[ch] {
                        Direction::Reverse
                    } else {
                        Direction::Forward
                    };
                    ProbeOutcome {
                        measured: None,
                        applied,
                    }
                }
            };
            self.directions[ch] = outcome.applied;
            results.push((ch, outcome));
        }
        if !results.is_empty() {
            if let Err(e) = self.persist_now() {
                tracing::warn!(error = %e, "failed to persist bring-up directions");
            }
        }
        results
    }

    /// Zero every drive output (best-effort) and park the motor loops.
    pub fn stop_all(&mut self) -> Result<()> {
        let mut first_err = None;
        for ch in 0..CHANNELS {
            self.motors[ch].set_command(FilamentMotionCommand::Stop);
            if let Err(e) = self.drive.set_drive(ch, 0) {
                let err = map_hw_error(e.as_ref());
                tracing::warn!(channel = ch, error = %err, "failed to stop motor");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(e) => Err(eyre::Report::new(e)),
            None => Ok(()),
        }
    }
}
