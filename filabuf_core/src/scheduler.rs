//! Channel scheduler.
//!
//! Owns every channel's lifecycle state and decides the motor command each
//! tick. Only the channel selected by the protocol layer gets feed or retract
//! commands; all others are held idle. On family A devices an unfinished
//! retraction anywhere pre-empts all other scheduling.

use filabuf_traits::{CHANNELS, ChannelId, DeviceVariant, RequestedMotion};

use crate::config::SchedulerCfg;
use crate::types::{ChannelMotionState, FilamentMotionCommand, PresenceStatus};

/// Scheduler-owned state of one channel.
#[derive(Debug, Clone, Default)]
pub struct ChannelSlot {
    pub state: ChannelMotionState,
    pub command: FilamentMotionCommand,
    /// Filament retracted since entering `PullingBack`.
    pub retract_mm: f32,
    using_deadline_ms: Option<u64>,
    pullback_latched: bool,
    last_request: RequestedMotion,
    last_presence: Option<PresenceStatus>,
}

impl ChannelSlot {
    fn set(&mut self, state: ChannelMotionState, command: FilamentMotionCommand) {
        self.state = state;
        self.command = command;
    }

    fn hold_idle(&mut self) {
        self.set(ChannelMotionState::Idle, FilamentMotionCommand::PressureCtrlIdle);
        self.using_deadline_ms = None;
    }
}

/// Inputs for one scheduling pass.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleInputs {
    pub now_ms: u64,
    pub active: ChannelId,
    pub variant: DeviceVariant,
    pub requests: [RequestedMotion; CHANNELS],
    pub presence: [PresenceStatus; CHANNELS],
    pub delta_mm: [f32; CHANNELS],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleEvent {
    FilamentInserted(ChannelId),
    RetractionComplete(ChannelId),
}

pub struct Scheduler {
    cfg: SchedulerCfg,
    slots: [ChannelSlot; CHANNELS],
}

impl Scheduler {
    pub fn new(cfg: SchedulerCfg) -> Self {
        Self {
            cfg,
            slots: Default::default(),
        }
    }

    pub fn slot(&self, ch: ChannelId) -> &ChannelSlot {
        &self.slots[ch]
    }

    pub fn commands(&self) -> [FilamentMotionCommand; CHANNELS] {
        std::array::from_fn(|ch| self.slots[ch].command)
    }

    pub fn states(&self) -> [ChannelMotionState; CHANNELS] {
        std::array::from_fn(|ch| self.slots[ch].state)
    }

    /// Bus down: park every motor until it returns.
    pub fn park_all(&mut self) {
        for slot in &mut self.slots {
            slot.command = FilamentMotionCommand::Stop;
        }
    }

    pub fn tick(&mut self, inp: &ScheduleInputs) -> Vec<ScheduleEvent> {
        let mut events = Vec::new();
        self.track(inp, &mut events);

        let gated = inp.variant == DeviceVariant::FamilyA;
        for ch in 0..CHANNELS {
            let slot = &mut self.slots[ch];
            if slot.state != ChannelMotionState::PullingBack {
                continue;
            }
            if slot.retract_mm >= self.cfg.retract_distance_mm {
                tracing::info!(channel = ch, retracted_mm = slot.retract_mm, "retraction complete");
                slot.set(ChannelMotionState::Idle, FilamentMotionCommand::Stop);
                slot.retract_mm = 0.0;
                slot.pullback_latched = true;
                events.push(ScheduleEvent::RetractionComplete(ch));
                if gated {
                    return events;
                }
            } else if gated {
                slot.command = FilamentMotionCommand::Pull;
                return events;
            }
        }

        for ch in (0..CHANNELS).filter(|&ch| ch != inp.active) {
            self.slots[ch].hold_idle();
        }
        if inp.active < CHANNELS {
            self.schedule_active(inp);
        }
        events
    }

    /// Bookkeeping that happens every tick regardless of gating.
    fn track(&mut self, inp: &ScheduleInputs, events: &mut Vec<ScheduleEvent>) {
        for (ch, slot) in self.slots.iter_mut().enumerate() {
            let request = inp.requests[ch];
            let presence = inp.presence[ch];

            if slot.state == ChannelMotionState::PullingBack {
                slot.retract_mm += inp.delta_mm[ch].abs();
            }
            if request != slot.last_request {
                slot.pullback_latched = false;
            }
            if slot.last_presence == Some(PresenceStatus::Absent)
                && presence == PresenceStatus::Loaded
                && request == RequestedMotion::Idle
            {
                tracing::info!(channel = ch, "filament inserted");
                events.push(ScheduleEvent::FilamentInserted(ch));
            }
            slot.last_request = request;
            slot.last_presence = Some(presence);
        }
    }

    fn schedule_active(&mut self, inp: &ScheduleInputs) {
        use ChannelMotionState as S;
        use FilamentMotionCommand as C;

        let ch = inp.active;
        let slot = &mut self.slots[ch];
        match inp.presence[ch] {
            PresenceStatus::Absent => slot.hold_idle(),
            PresenceStatus::OuterOnly => {}
            PresenceStatus::Loaded | PresenceStatus::InnerOnly => match inp.requests[ch] {
                RequestedMotion::NeedSendOut => slot.set(S::SendingOut, C::Send),
                RequestedMotion::NeedPullBack => {
                    if !slot.pullback_latched && slot.state != S::PullingBack {
                        tracing::info!(channel = ch, "retraction started");
                        slot.retract_mm = 0.0;
                        slot.set(S::PullingBack, C::Pull);
                    }
                }
                RequestedMotion::OnUse | RequestedMotion::BeforePullBack => {
                    if slot.state == S::Using {
                        let settling = slot.using_deadline_ms.is_some_and(|d| inp.now_ms < d);
                        slot.command = if settling { C::SlowSend } else { C::PressureCtrlOnUse };
                    } else {
                        slot.state = S::Using;
                        slot.using_deadline_ms = Some(inp.now_ms + self.cfg.using_grace_ms);
                    }
                    slot.retract_mm = 0.0;
                }
                RequestedMotion::Idle => slot.hold_idle(),
            },
        }
    }

    /// Whether the channel reports filament to the printer.
    pub fn reports_online(&self, ch: ChannelId, presence: PresenceStatus) -> bool {
        let state = self.slots[ch].state;
        match presence {
            PresenceStatus::Loaded => true,
            PresenceStatus::Absent => false,
            PresenceStatus::InnerOnly if state == ChannelMotionState::Using => true,
            _ => matches!(
                state,
                ChannelMotionState::PullingBack | ChannelMotionState::Redetect
            ),
        }
    }
}
