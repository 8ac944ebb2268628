//! Presence switch classification.

use crate::config::{PresenceCfg, PresenceMode};
use crate::types::PresenceStatus;

/// Classify a filtered presence voltage.
pub fn classify(cfg: &PresenceCfg, volts: f32) -> PresenceStatus {
    match cfg.mode {
        PresenceMode::SingleSwitch => {
            if volts > cfg.single_threshold_v {
                PresenceStatus::Loaded
            } else {
                PresenceStatus::Absent
            }
        }
        PresenceMode::DualSwitch => {
            if volts < cfg.dual_absent_below_v {
                PresenceStatus::Absent
            } else if volts < cfg.dual_inner_below_v {
                PresenceStatus::InnerOnly
            } else if volts < cfg.dual_outer_below_v {
                PresenceStatus::OuterOnly
            } else {
                PresenceStatus::Loaded
            }
        }
    }
}
