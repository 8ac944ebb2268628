#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the filament buffer.
//!
//! - `Config` and its sections are deserialized from TOML; every section has
//!   defaults, so an empty document is a valid configuration.
//! - `Config::validate` rejects structurally impossible values. Feature-level
//!   tunables are checked again by the owning manager in the core, which
//!   disables the feature instead of failing.
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Poll the sample source inside the control loop.
    #[default]
    Direct,
    /// Background sampler thread feeding the control loop.
    Sampler,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TickCfg {
    /// Control loop rate in Hz.
    pub rate_hz: u32,
    pub mode: RunMode,
}

impl Default for TickCfg {
    fn default() -> Self {
        Self {
            rate_hz: 100,
            mode: RunMode::Direct,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FilterCfg {
    /// Frames per acquisition block (power of two).
    pub window: usize,
    pub outlier_detection: bool,
    /// Reject samples further than `outlier_k` standard deviations from the block mean.
    pub outlier_k: f32,
    pub adaptive: bool,
    pub stability_threshold_v: f32,
    /// Stability count above which light smoothing applies.
    pub settled_count: u32,
    pub noise_history: usize,
    /// Mean recent noise above which heavy smoothing applies.
    pub max_noise_v: f32,
    pub fault_threshold: u32,
    pub recovery_threshold: u32,
    pub self_calibration_interval_ms: u64,
    pub vref: f32,
}

impl Default for FilterCfg {
    fn default() -> Self {
        Self {
            window: 256,
            outlier_detection: true,
            outlier_k: 2.0,
            adaptive: true,
            stability_threshold_v: 0.010,
            settled_count: 10,
            noise_history: 8,
            max_noise_v: 0.05,
            fault_threshold: 5,
            recovery_threshold: 3,
            self_calibration_interval_ms: 30_000,
            vref: 3.3,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PresenceMode {
    #[default]
    Single,
    Dual,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PresenceCfg {
    pub mode: PresenceMode,
    /// Single-switch: above this voltage filament is loaded.
    pub single_threshold_v: f32,
    /// Dual-switch: below this voltage both switches are open.
    pub dual_absent_below_v: f32,
    /// Dual-switch: below this voltage only the inner switch is closed.
    pub dual_inner_below_v: f32,
    /// Dual-switch: below this voltage only the outer switch is closed; above it both are.
    pub dual_outer_below_v: f32,
}

impl Default for PresenceCfg {
    fn default() -> Self {
        Self {
            mode: PresenceMode::Single,
            single_threshold_v: 1.65,
            dual_absent_below_v: 0.6,
            dual_inner_below_v: 1.4,
            dual_outer_below_v: 1.7,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PositionCfg {
    pub roller_diameter_mm: f32,
    pub counts_per_rev: u16,
    /// Sensor faces the magnet, so positive angle motion is negative filament motion.
    pub sensor_faces_magnet: bool,
}

impl Default for PositionCfg {
    fn default() -> Self {
        Self {
            roller_diameter_mm: 7.5,
            counts_per_rev: 4096,
            sensor_faces_magnet: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PressureCfg {
    /// Use learned zero points and deadbands when available.
    pub adaptive: bool,
    pub auto_recalibration: bool,
    pub static_low_v: f32,
    pub static_high_v: f32,
    pub default_zero_v: f32,
    pub default_range_v: f32,
    /// Family B feed slows above this voltage.
    pub send_max_v: f32,
    pub cadence_ms: u64,
    pub target_samples: u32,
    pub window_ms: u64,
    pub min_valid_v: f32,
    pub max_valid_v: f32,
    pub zero_tolerance_v: f32,
    pub fallback_range_v: f32,
    pub range_multiplier: f32,
    pub range_floor_v: f32,
    pub deadband_scale: f32,
    pub auto_interval_ms: u64,
    pub cooldown_ms: u64,
}

impl Default for PressureCfg {
    fn default() -> Self {
        Self {
            adaptive: true,
            auto_recalibration: true,
            static_low_v: 1.45,
            static_high_v: 1.85,
            default_zero_v: 1.65,
            default_range_v: 0.6,
            send_max_v: 1.7,
            cadence_ms: 50,
            target_samples: 40,
            window_ms: 3_000,
            min_valid_v: 0.1,
            max_valid_v: 3.2,
            zero_tolerance_v: 0.02,
            fallback_range_v: 0.8,
            range_multiplier: 4.0,
            range_floor_v: 0.5,
            deadband_scale: 0.25,
            auto_interval_ms: 30_000,
            cooldown_ms: 300_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LearningCfg {
    /// Learn motor polarity from commanded vs. measured movement.
    pub auto: bool,
    pub min_samples: u32,
    pub min_movement_mm: f32,
    pub timeout_ms: u64,
    pub confidence_threshold: f32,
    /// Per-tick noise allowance; single movements above ten times this are rejected.
    pub max_noise_mm: f32,
    pub sample_interval_ms: u64,
    pub significant_movement_mm: f32,
    /// Reject a sample when backwards travel exceeds this share of total travel.
    pub max_backtrack_ratio: f32,
}

impl Default for LearningCfg {
    fn default() -> Self {
        Self {
            auto: true,
            min_samples: 3,
            min_movement_mm: 2.0,
            timeout_ms: 5_000,
            confidence_threshold: 0.7,
            max_noise_mm: 0.5,
            sample_interval_ms: 100,
            significant_movement_mm: 0.1,
            max_backtrack_ratio: 0.3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoadingCfg {
    pub enabled: bool,
    pub settle_ms: u64,
    pub hold_ms: u64,
    pub timeout_ms: u64,
}

impl Default for LoadingCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            settle_ms: 500,
            hold_ms: 2_000,
            timeout_ms: 3_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct PidGains {
    pub p: f32,
    pub i: f32,
    pub d: f32,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PressureShaping {
    /// Signed square of the PID output divided by `square_divisor`.
    #[default]
    Square,
    /// Scaled PID output capped at `responsive_max_correction`.
    Responsive,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MotorCfg {
    pub speed_pid: PidGains,
    pub pressure_pid: PidGains,
    pub deadzone: f32,
    pub friction_offset: f32,
    pub drive_limit: f32,
    pub send_speed_family_a: f32,
    pub send_speed_family_b: f32,
    pub send_speed_family_b_full: f32,
    pub slow_send_speed: f32,
    /// Retract speed magnitude in mm/s.
    pub pull_speed: f32,
    pub on_use_tolerance_v: f32,
    pub on_use_calibrated_tolerance_v: f32,
    pub settle_release_v: f32,
    pub pressure_shaping: PressureShaping,
    pub square_divisor: f32,
    pub responsive_scale: f32,
    pub responsive_max_correction: f32,
}

impl Default for MotorCfg {
    fn default() -> Self {
        Self {
            speed_pid: PidGains {
                p: 2.0,
                i: 20.0,
                d: 0.0,
            },
            pressure_pid: PidGains {
                p: 1500.0,
                i: 0.0,
                d: 0.0,
            },
            deadzone: 10.0,
            friction_offset: 500.0,
            drive_limit: 1000.0,
            send_speed_family_a: 50.0,
            send_speed_family_b: 30.0,
            send_speed_family_b_full: 10.0,
            slow_send_speed: 3.0,
            pull_speed: 50.0,
            on_use_tolerance_v: 0.05,
            on_use_calibrated_tolerance_v: 0.03,
            settle_release_v: 1.55,
            pressure_shaping: PressureShaping::Square,
            square_divisor: 250.0,
            responsive_scale: 1.2,
            responsive_max_correction: 800.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AssistCfg {
    pub enabled: bool,
    pub drive: f32,
    /// Feed time after both switches trip.
    pub window_ms: u64,
    /// Hard cap on a single burst.
    pub max_burst_ms: u64,
}

impl Default for AssistCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            drive: 666.0,
            window_ms: 1_200,
            max_burst_ms: 5_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerCfg {
    pub retract_distance_mm: f32,
    pub using_grace_ms: u64,
}

impl Default for SchedulerCfg {
    fn default() -> Self {
        Self {
            retract_distance_mm: 200.0,
            using_grace_ms: 1_500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BringupCfg {
    /// Probe motor polarity at startup when automatic learning is off.
    pub enabled: bool,
    pub probe_drive: i16,
    pub probe_timeout_ms: u64,
    pub poll_ms: u64,
    pub movement_counts: u32,
    /// Static per-channel polarity inversion applied after probing.
    pub correction: [bool; 4],
}

impl Default for BringupCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_drive: 1000,
            probe_timeout_ms: 2_000,
            poll_ms: 10,
            movement_counts: 163,
            correction: [false, true, true, false],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StoreCfg {
    /// Path of the persisted state blob.
    pub path: String,
}

impl Default for StoreCfg {
    fn default() -> Self {
        Self {
            path: "var/filabuf.state".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimCfg {
    /// Frames per simulated acquisition block.
    pub frames_per_poll: usize,
    /// Peak ADC noise in codes.
    pub noise_codes: u16,
    /// Inverted motor wiring per channel.
    pub reversed: [bool; 4],
    /// Printer consumption while in use, mm/s.
    pub consumption_mm_s: f32,
    pub seed: u32,
}

impl Default for SimCfg {
    fn default() -> Self {
        Self {
            frames_per_poll: 16,
            noise_codes: 3,
            reversed: [false, true, false, false],
            consumption_mm_s: 8.0,
            seed: 0x2545_f491,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub tick: TickCfg,
    pub filter: FilterCfg,
    pub presence: PresenceCfg,
    pub position: PositionCfg,
    pub pressure: PressureCfg,
    pub learning: LearningCfg,
    pub loading: LoadingCfg,
    pub motor: MotorCfg,
    pub assist: AssistCfg,
    pub scheduler: SchedulerCfg,
    pub bringup: BringupCfg,
    pub store: StoreCfg,
    pub logging: Logging,
    pub sim: SimCfg,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Read, parse and validate a config file.
pub fn load_file(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| eyre::eyre!("read config {}: {e}", path.display()))?;
    let cfg = load_toml(&text).map_err(|e| eyre::eyre!("parse config {}: {e}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

fn positive(x: f32) -> bool {
    x.is_finite() && x > 0.0
}

fn ordered(values: &[f32]) -> bool {
    values.windows(2).all(|w| w[0] < w[1])
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Tick
        if self.tick.rate_hz == 0 {
            eyre::bail!("tick.rate_hz must be > 0");
        }
        if self.tick.rate_hz > 10_000 {
            eyre::bail!("tick.rate_hz is unreasonably large (>10kHz)");
        }

        // Filter
        if self.filter.window == 0 || !self.filter.window.is_power_of_two() {
            eyre::bail!("filter.window must be a power of two");
        }
        if !positive(self.filter.outlier_k) {
            eyre::bail!("filter.outlier_k must be > 0");
        }
        if !positive(self.filter.stability_threshold_v) {
            eyre::bail!("filter.stability_threshold_v must be > 0");
        }
        if self.filter.noise_history == 0 {
            eyre::bail!("filter.noise_history must be >= 1");
        }
        if self.filter.fault_threshold == 0 {
            eyre::bail!("filter.fault_threshold must be >= 1");
        }
        if !positive(self.filter.vref) {
            eyre::bail!("filter.vref must be > 0");
        }

        // Presence
        let p = &self.presence;
        if !ordered(&[
            p.dual_absent_below_v,
            p.dual_inner_below_v,
            p.dual_outer_below_v,
        ]) {
            eyre::bail!("presence dual thresholds must be strictly increasing (absent < inner < outer)");
        }
        if !positive(p.single_threshold_v) || p.single_threshold_v >= self.filter.vref {
            eyre::bail!("presence.single_threshold_v must be within (0, vref)");
        }

        // Position
        if !positive(self.position.roller_diameter_mm) {
            eyre::bail!("position.roller_diameter_mm must be > 0");
        }
        if self.position.counts_per_rev < 4 || !self.position.counts_per_rev.is_power_of_two() {
            eyre::bail!("position.counts_per_rev must be a power of two >= 4");
        }

        // Pressure
        let pr = &self.pressure;
        if !ordered(&[pr.static_low_v, pr.default_zero_v, pr.static_high_v]) {
            eyre::bail!("pressure static band must satisfy static_low_v < default_zero_v < static_high_v");
        }
        if !ordered(&[pr.min_valid_v, pr.max_valid_v]) {
            eyre::bail!("pressure.min_valid_v must be < pressure.max_valid_v");
        }
        if pr.cadence_ms == 0 {
            eyre::bail!("pressure.cadence_ms must be >= 1");
        }
        if pr.window_ms == 0 {
            eyre::bail!("pressure.window_ms must be >= 1");
        }

        // Loading
        if self.loading.settle_ms.saturating_add(self.loading.hold_ms) > self.loading.timeout_ms {
            eyre::bail!("loading.timeout_ms must cover settle_ms + hold_ms");
        }

        // Motor
        let m = &self.motor;
        if !positive(m.drive_limit) || m.drive_limit > 1000.0 {
            eyre::bail!("motor.drive_limit must be in (0, 1000]");
        }
        if m.deadzone < 0.0 || m.friction_offset < 0.0 {
            eyre::bail!("motor.deadzone and motor.friction_offset must be >= 0");
        }
        if !positive(m.square_divisor) {
            eyre::bail!("motor.square_divisor must be > 0");
        }
        for (name, g) in [("speed_pid", m.speed_pid), ("pressure_pid", m.pressure_pid)] {
            if !(g.p.is_finite() && g.i.is_finite() && g.d.is_finite()) {
                eyre::bail!("motor.{name} gains must be finite");
            }
        }

        // Assist
        if self.assist.window_ms > self.assist.max_burst_ms {
            eyre::bail!("assist.window_ms must be <= assist.max_burst_ms");
        }

        // Scheduler
        if !positive(self.scheduler.retract_distance_mm) {
            eyre::bail!("scheduler.retract_distance_mm must be > 0");
        }

        // Bring-up
        if self.bringup.poll_ms == 0 {
            eyre::bail!("bringup.poll_ms must be >= 1");
        }
        if self.bringup.probe_drive == 0 || self.bringup.probe_drive.unsigned_abs() > 1000 {
            eyre::bail!("bringup.probe_drive must be in [-1000, 1000] and non-zero");
        }

        // Sim
        if self.sim.frames_per_poll == 0 {
            eyre::bail!("sim.frames_per_poll must be >= 1");
        }

        Ok(())
    }
}
