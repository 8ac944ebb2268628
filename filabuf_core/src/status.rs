//! What one control tick reports back to the caller.

use filabuf_traits::{CHANNELS, ChannelId, RAW_LANES};

use crate::error::BufferError;
use crate::learning::{AbandonReason, LoadingPhase};
use crate::pressure::AbortReason;
use crate::types::{ChannelMotionState, Direction, FilamentMotionCommand, PresenceStatus};

/// Notable state changes observed during a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum BufferEvent {
    FilamentInserted {
        channel: ChannelId,
    },
    RetractionComplete {
        channel: ChannelId,
    },
    CalibrationCompleted {
        channel: ChannelId,
        zero_v: f32,
        samples: u32,
    },
    CalibrationRejected {
        channel: ChannelId,
        samples: u32,
    },
    CalibrationAborted {
        channel: ChannelId,
        reason: AbortReason,
    },
    DirectionLearned {
        channel: ChannelId,
        direction: Direction,
        confidence: f32,
    },
    LoadingDirectionConfirmed {
        channel: ChannelId,
        direction: Direction,
    },
    LoadingDetectionTimedOut {
        channel: ChannelId,
    },
    LearningAbandoned {
        channel: ChannelId,
        reason: AbandonReason,
    },
    LaneHealthChanged {
        lane: usize,
        healthy: bool,
    },
    PersistFailed {
        reason: String,
    },
}

impl BufferEvent {
    /// Short machine-readable name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::FilamentInserted { .. } => "filament_inserted",
            Self::RetractionComplete { .. } => "retraction_complete",
            Self::CalibrationCompleted { .. } => "calibration_completed",
            Self::CalibrationRejected { .. } => "calibration_rejected",
            Self::CalibrationAborted { .. } => "calibration_aborted",
            Self::DirectionLearned { .. } => "direction_learned",
            Self::LoadingDirectionConfirmed { .. } => "loading_direction_confirmed",
            Self::LoadingDetectionTimedOut { .. } => "loading_detection_timed_out",
            Self::LearningAbandoned { .. } => "learning_abandoned",
            Self::LaneHealthChanged { .. } => "lane_health_changed",
            Self::PersistFailed { .. } => "persist_failed",
        }
    }

    /// True for events that change persisted state.
    pub(crate) fn completes_persisted_state(&self) -> bool {
        matches!(
            self,
            Self::CalibrationCompleted { .. }
                | Self::DirectionLearned { .. }
                | Self::LoadingDirectionConfirmed { .. }
        )
    }
}

/// Snapshot of every channel after one tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub now_ms: u64,
    pub drives: [i16; CHANNELS],
    pub commands: [FilamentMotionCommand; CHANNELS],
    pub states: [ChannelMotionState; CHANNELS],
    pub presence: [PresenceStatus; CHANNELS],
    pub pressure_v: [f32; CHANNELS],
    /// What the printer is told about each channel.
    pub online: [bool; CHANNELS],
    /// A lane or the rotary sensor of the channel is unusable.
    pub degraded: [bool; CHANNELS],
    pub healthy: [bool; RAW_LANES],
    pub link_ok: bool,
    pub events: Vec<BufferEvent>,
    /// Collaborator failures absorbed this tick.
    pub hw_errors: Vec<BufferError>,
}

/// Direction learning view of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct LearningStatus {
    pub direction: Direction,
    pub learned: bool,
    pub loading_confirmed: bool,
    /// `(samples, confidence)` of a running correlation session.
    pub session: Option<(u32, f32)>,
    pub loading: LoadingPhase,
}
