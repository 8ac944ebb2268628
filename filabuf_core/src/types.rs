//! Plain per-channel value types shared across the core.

/// Macro lifecycle of the filament occupying a channel. Owned by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelMotionState {
    #[default]
    Idle,
    SendingOut,
    Using,
    PullingBack,
    Redetect,
}

/// Instruction given to a channel's motor loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilamentMotionCommand {
    Send,
    SlowSend,
    Pull,
    #[default]
    Stop,
    PressureCtrlOnUse,
    PressureCtrlIdle,
}

impl FilamentMotionCommand {
    /// Commands that push filament toward the printer.
    pub const fn is_feed(self) -> bool {
        matches!(self, Self::Send | Self::SlowSend)
    }
}

/// Classified presence switch state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PresenceStatus {
    /// No switch closed.
    #[default]
    Absent,
    /// Filament seated (both switches, or the single switch).
    Loaded,
    /// Only the outer switch closed: filament just entering.
    OuterOnly,
    /// Only the inner switch closed: tail end passing through.
    InnerOnly,
}

impl PresenceStatus {
    pub const fn is_absent(self) -> bool {
        matches!(self, Self::Absent)
    }

    /// Numeric code used by the bus protocol (0 absent, 1 both, 2 outer, 3 inner).
    pub const fn code(self) -> u8 {
        match self {
            Self::Absent => 0,
            Self::Loaded => 1,
            Self::OuterOnly => 2,
            Self::InnerOnly => 3,
        }
    }
}

/// Pull sensor reading relative to the active deadband.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PressureStatus {
    Low,
    #[default]
    Normal,
    High,
}

/// Motor polarity: which drive sign moves filament toward the printer.
///
/// There is no zero polarity; undetermined inputs map to `Forward`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Forward,
    Reverse,
}

impl Direction {
    pub const fn sign(self) -> i8 {
        match self {
            Self::Forward => 1,
            Self::Reverse => -1,
        }
    }

    pub const fn factor(self) -> f32 {
        match self {
            Self::Forward => 1.0,
            Self::Reverse => -1.0,
        }
    }

    #[must_use]
    pub const fn flipped(self) -> Self {
        match self {
            Self::Forward => Self::Reverse,
            Self::Reverse => Self::Forward,
        }
    }

    /// Decode a persisted sign; zero and positive values are `Forward`.
    pub const fn from_sign(sign: i8) -> Self {
        if sign < 0 { Self::Reverse } else { Self::Forward }
    }

    /// Sign of a measured quantity; `None` when it is exactly zero.
    pub fn of(x: f32) -> Option<Self> {
        if x > 0.0 {
            Some(Self::Forward)
        } else if x < 0.0 {
            Some(Self::Reverse)
        } else {
            None
        }
    }

    /// Product of two polarities.
    #[must_use]
    pub const fn compose(self, other: Self) -> Self {
        if self.sign() * other.sign() > 0 {
            Self::Forward
        } else {
            Self::Reverse
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sign_decodes_forward() {
        assert_eq!(Direction::from_sign(0), Direction::Forward);
        assert_eq!(Direction::from_sign(-1), Direction::Reverse);
        assert_eq!(Direction::from_sign(1), Direction::Forward);
    }

    #[test]
    fn compose_is_sign_product() {
        use Direction::*;
        assert_eq!(Forward.compose(Forward), Forward);
        assert_eq!(Forward.compose(Reverse), Reverse);
        assert_eq!(Reverse.compose(Reverse), Forward);
        assert_eq!(Reverse.flipped(), Forward);
    }

    #[test]
    fn of_ignores_zero() {
        assert_eq!(Direction::of(0.0), None);
        assert_eq!(Direction::of(-0.3), Some(Direction::Reverse));
    }
}
