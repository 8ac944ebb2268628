//! Runtime configuration for the buffer control core.
//!
//! These are the structs the managers are constructed from. They are separate
//! from the TOML-deserialized config in `filabuf_config`; `conversions` bridges
//! the two. One immutable `BufferConfig` is threaded through every constructor,
//! so feature toggles are plain booleans rather than build-time switches.

/// Sensor filtering engine tunables.
#[derive(Debug, Clone)]
pub struct FilterCfg {
    /// Frames per acquisition block (power of two).
    pub window: usize,
    pub outlier_detection: bool,
    pub outlier_k: f32,
    /// When false the unblended block voltage is reported.
    pub adaptive: bool,
    pub stability_threshold_v: f32,
    pub settled_count: u32,
    pub noise_history: usize,
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

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresenceMode {
    /// One micro-switch per channel.
    #[default]
    SingleSwitch,
    /// Outer and inner micro-switches sharing one analog lane.
    DualSwitch,
}

#[derive(Debug, Clone)]
pub struct PresenceCfg {
    pub mode: PresenceMode,
    pub single_threshold_v: f32,
    pub dual_absent_below_v: f32,
    pub dual_inner_below_v: f32,
    pub dual_outer_below_v: f32,
}

impl Default for PresenceCfg {
    fn default() -> Self {
        Self {
            mode: PresenceMode::SingleSwitch,
            single_threshold_v: 1.65,
            dual_absent_below_v: 0.6,
            dual_inner_below_v: 1.4,
            dual_outer_below_v: 1.7,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PositionCfg {
    pub roller_diameter_mm: f32,
    pub counts_per_rev: u16,
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

impl PositionCfg {
    /// Signed millimetres of filament per angle count.
    pub fn mm_per_count(&self) -> f32 {
        let k = std::f32::consts::PI * self.roller_diameter_mm / f32::from(self.counts_per_rev);
        if self.sensor_faces_magnet { -k } else { k }
    }
}

#[derive(Debug, Clone)]
pub struct PressureCfg {
    pub adaptive: bool,
    pub auto_recalibration: bool,
    pub static_low_v: f32,
    pub static_high_v: f32,
    pub default_zero_v: f32,
    pub default_range_v: f32,
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

#[derive(Debug, Clone)]
pub struct LearningCfg {
    pub auto: bool,
    pub min_samples: u32,
    pub min_movement_mm: f32,
    pub timeout_ms: u64,
    pub confidence_threshold: f32,
    pub max_noise_mm: f32,
    pub sample_interval_ms: u64,
    pub significant_movement_mm: f32,
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

#[derive(Debug, Clone)]
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

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    pub p: f32,
    pub i: f32,
    pub d: f32,
}

/// Post-processing applied to pressure-loop output while in use.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PressureShaping {
    Square { divisor: f32 },
    Responsive { scale: f32, max_correction: f32 },
}

#[derive(Debug, Clone)]
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
    pub pull_speed: f32,
    pub on_use_tolerance_v: f32,
    pub on_use_calibrated_tolerance_v: f32,
    pub settle_release_v: f32,
    pub shaping: PressureShaping,
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
            shaping: PressureShaping::Square { divisor: 250.0 },
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssistCfg {
    pub enabled: bool,
    pub drive: f32,
    pub window_ms: u64,
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

#[derive(Debug, Clone)]
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

#[derive(Debug, Clone)]
pub struct BringupCfg {
    pub enabled: bool,
    pub probe_drive: i16,
    pub probe_timeout_ms: u64,
    pub poll_ms: u64,
    pub movement_counts: u32,
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

/// Everything the core needs, bundled once at startup.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    pub tick_hz: u32,
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
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            tick_hz: 100,
            filter: FilterCfg::default(),
            presence: PresenceCfg::default(),
            position: PositionCfg::default(),
            pressure: PressureCfg::default(),
            learning: LearningCfg::default(),
            loading: LoadingCfg::default(),
            motor: MotorCfg::default(),
            assist: AssistCfg::default(),
            scheduler: SchedulerCfg::default(),
            bringup: BringupCfg::default(),
        }
    }
}
