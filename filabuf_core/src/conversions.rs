//! `From` implementations bridging `filabuf_config` types to `filabuf_core` types.

use crate::config::{
    AssistCfg, BringupCfg, BufferConfig, FilterCfg, LearningCfg, LoadingCfg, MotorCfg, PidGains,
    PositionCfg, PresenceCfg, PresenceMode, PressureCfg, PressureShaping, SchedulerCfg,
};

// ── FilterCfg ────────────────────────────────────────────────────────────────

impl From<&filabuf_config::FilterCfg> for FilterCfg {
    fn from(c: &filabuf_config::FilterCfg) -> Self {
        Self {
            window: c.window,
            outlier_detection: c.outlier_detection,
            outlier_k: c.outlier_k,
            adaptive: c.adaptive,
            stability_threshold_v: c.stability_threshold_v,
            settled_count: c.settled_count,
            noise_history: c.noise_history,
            max_noise_v: c.max_noise_v,
            fault_threshold: c.fault_threshold,
            recovery_threshold: c.recovery_threshold,
            self_calibration_interval_ms: c.self_calibration_interval_ms,
            vref: c.vref,
        }
    }
}

// ── PresenceCfg ──────────────────────────────────────────────────────────────

impl From<filabuf_config::PresenceMode> for PresenceMode {
    fn from(m: filabuf_config::PresenceMode) -> Self {
        match m {
            filabuf_config::PresenceMode::Single => Self::SingleSwitch,
            filabuf_config::PresenceMode::Dual => Self::DualSwitch,
        }
    }
}

impl From<&filabuf_config::PresenceCfg> for PresenceCfg {
    fn from(c: &filabuf_config::PresenceCfg) -> Self {
        Self {
            mode: c.mode.into(),
            single_threshold_v: c.single_threshold_v,
            dual_absent_below_v: c.dual_absent_below_v,
            dual_inner_below_v: c.dual_inner_below_v,
            dual_outer_below_v: c.dual_outer_below_v,
        }
    }
}

// ── PositionCfg ──────────────────────────────────────────────────────────────

impl From<&filabuf_config::PositionCfg> for PositionCfg {
    fn from(c: &filabuf_config::PositionCfg) -> Self {
        Self {
            roller_diameter_mm: c.roller_diameter_mm,
            counts_per_rev: c.counts_per_rev,
            sensor_faces_magnet: c.sensor_faces_magnet,
        }
    }
}

// ── PressureCfg ──────────────────────────────────────────────────────────────

impl From<&filabuf_config::PressureCfg> for PressureCfg {
    fn from(c: &filabuf_config::PressureCfg) -> Self {
        Self {
            adaptive: c.adaptive,
            auto_recalibration: c.auto_recalibration,
            static_low_v: c.static_low_v,
            static_high_v: c.static_high_v,
            default_zero_v: c.default_zero_v,
            default_range_v: c.default_range_v,
            send_max_v: c.send_max_v,
            cadence_ms: c.cadence_ms,
            target_samples: c.target_samples,
            window_ms: c.window_ms,
            min_valid_v: c.min_valid_v,
            max_valid_v: c.max_valid_v,
            zero_tolerance_v: c.zero_tolerance_v,
            fallback_range_v: c.fallback_range_v,
            range_multiplier: c.range_multiplier,
            range_floor_v: c.range_floor_v,
            deadband_scale: c.deadband_scale,
            auto_interval_ms: c.auto_interval_ms,
            cooldown_ms: c.cooldown_ms,
        }
    }
}

// ── Learning / loading ───────────────────────────────────────────────────────

impl From<&filabuf_config::LearningCfg> for LearningCfg {
    fn from(c: &filabuf_config::LearningCfg) -> Self {
        Self {
            auto: c.auto,
            min_samples: c.min_samples,
            min_movement_mm: c.min_movement_mm,
            timeout_ms: c.timeout_ms,
            confidence_threshold: c.confidence_threshold,
            max_noise_mm: c.max_noise_mm,
            sample_interval_ms: c.sample_interval_ms,
            significant_movement_mm: c.significant_movement_mm,
            max_backtrack_ratio: c.max_backtrack_ratio,
        }
    }
}

impl From<&filabuf_config::LoadingCfg> for LoadingCfg {
    fn from(c: &filabuf_config::LoadingCfg) -> Self {
        Self {
            enabled: c.enabled,
            settle_ms: c.settle_ms,
            hold_ms: c.hold_ms,
            timeout_ms: c.timeout_ms,
        }
    }
}

// ── MotorCfg ─────────────────────────────────────────────────────────────────

impl From<filabuf_config::PidGains> for PidGains {
    fn from(g: filabuf_config::PidGains) -> Self {
        Self {
            p: g.p,
            i: g.i,
            d: g.d,
        }
    }
}

impl From<&filabuf_config::MotorCfg> for MotorCfg {
    fn from(c: &filabuf_config::MotorCfg) -> Self {
        let shaping = match c.pressure_shaping {
            filabuf_config::PressureShaping::Square => PressureShaping::Square {
                divisor: c.square_divisor,
            },
            filabuf_config::PressureShaping::Responsive => PressureShaping::Responsive {
                scale: c.responsive_scale,
                max_correction: c.responsive_max_correction,
            },
        };
        Self {
            speed_pid: c.speed_pid.into(),
            pressure_pid: c.pressure_pid.into(),
            deadzone: c.deadzone,
            friction_offset: c.friction_offset,
            drive_limit: c.drive_limit,
            send_speed_family_a: c.send_speed_family_a,
            send_speed_family_b: c.send_speed_family_b,
            send_speed_family_b_full: c.send_speed_family_b_full,
            slow_send_speed: c.slow_send_speed,
            pull_speed: c.pull_speed,
            on_use_tolerance_v: c.on_use_tolerance_v,
            on_use_calibrated_tolerance_v: c.on_use_calibrated_tolerance_v,
            settle_release_v: c.settle_release_v,
            shaping,
        }
    }
}

impl From<&filabuf_config::AssistCfg> for AssistCfg {
    fn from(c: &filabuf_config::AssistCfg) -> Self {
        Self {
            enabled: c.enabled,
            drive: c.drive,
            window_ms: c.window_ms,
            max_burst_ms: c.max_burst_ms,
        }
    }
}

// ── Scheduler / bring-up ─────────────────────────────────────────────────────

impl From<&filabuf_config::SchedulerCfg> for SchedulerCfg {
    fn from(c: &filabuf_config::SchedulerCfg) -> Self {
        Self {
            retract_distance_mm: c.retract_distance_mm,
            using_grace_ms: c.using_grace_ms,
        }
    }
}

impl From<&filabuf_config::BringupCfg> for BringupCfg {
    fn from(c: &filabuf_config::BringupCfg) -> Self {
        Self {
            enabled: c.enabled,
            probe_drive: c.probe_drive,
            probe_timeout_ms: c.probe_timeout_ms,
            poll_ms: c.poll_ms,
            movement_counts: c.movement_counts,
            correction: c.correction,
        }
    }
}

// ── BufferConfig ─────────────────────────────────────────────────────────────

impl From<&filabuf_config::Config> for BufferConfig {
    fn from(c: &filabuf_config::Config) -> Self {
        Self {
            tick_hz: c.tick.rate_hz,
            filter: (&c.filter).into(),
            presence: (&c.presence).into(),
            position: (&c.position).into(),
            pressure: (&c.pressure).into(),
            learning: (&c.learning).into(),
            loading: (&c.loading).into(),
            motor: (&c.motor).into(),
            assist: (&c.assist).into(),
            scheduler: (&c.scheduler).into(),
            bringup: (&c.bringup).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_agree_across_layers() {
        let toml_side = filabuf_config::Config::default();
        let mapped = BufferConfig::from(&toml_side);
        let core_side = BufferConfig::default();
        assert_eq!(mapped.tick_hz, core_side.tick_hz);
        assert_eq!(mapped.filter.window, core_side.filter.window);
        assert_eq!(mapped.presence.mode, core_side.presence.mode);
        assert_eq!(mapped.motor.shaping, core_side.motor.shaping);
        assert_eq!(mapped.motor.speed_pid, core_side.motor.speed_pid);
        assert_eq!(mapped.bringup.correction, core_side.bringup.correction);
        assert!((mapped.pressure.deadband_scale - core_side.pressure.deadband_scale).abs() < 1e-6);
    }

    #[test]
    fn responsive_shaping_maps_both_knobs() {
        let mut c = filabuf_config::MotorCfg::default();
        c.pressure_shaping = filabuf_config::PressureShaping::Responsive;
        c.responsive_scale = 2.0;
        c.responsive_max_correction = 300.0;
        let m = MotorCfg::from(&c);
        assert_eq!(
            m.shaping,
            PressureShaping::Responsive {
                scale: 2.0,
                max_correction: 300.0
            }
        );
    }
}
