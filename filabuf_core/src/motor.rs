//! Per-channel motor control: speed loop, pressure loop, and drive shaping.

use filabuf_traits::DeviceVariant;

use crate::config::{AssistCfg, MotorCfg, PresenceMode, PressureShaping};
use crate::pid::Pid;
use crate::types::{Direction, FilamentMotionCommand, PresenceStatus, PressureStatus};

/// Everything one control step reads about its channel.
#[derive(Debug, Clone, Copy)]
pub struct MotorInputs {
    pub presence: PresenceStatus,
    pub pull_v: f32,
    /// Measured filament speed, positive toward the printer.
    pub speed_mm_s: f32,
    pub variant: DeviceVariant,
    pub zero_v: f32,
    pub pressure: PressureStatus,
    pub calibrated: bool,
    pub direction: Direction,
    pub dt_s: f32,
    pub now_ms: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct AssistState {
    armed: bool,
    burst_started_ms: Option<u64>,
    window_started_ms: Option<u64>,
}

impl AssistState {
    fn arm(&mut self) {
        *self = Self {
            armed: true,
            ..Self::default()
        };
    }

    fn disarm(&mut self) {
        *self = Self::default();
    }
}

/// Map a loop output to a PWM value: dead zone, friction compensation, clamp.
pub fn shape_drive(cfg: &MotorCfg, raw: f32) -> i16 {
    let out = if raw > cfg.deadzone {
        raw + cfg.friction_offset
    } else if raw < -cfg.deadzone {
        raw - cfg.friction_offset
    } else {
        0.0
    };
    out.clamp(-cfg.drive_limit, cfg.drive_limit).round() as i16
}

fn shape_pressure(shaping: PressureShaping, x: f32) -> f32 {
    match shaping {
        PressureShaping::Square { divisor } => x * x.abs() / divisor,
        PressureShaping::Responsive {
            scale,
            max_correction,
        } => (x * scale).clamp(-max_correction, max_correction),
    }
}

pub struct MotorController {
    cfg: MotorCfg,
    assist_cfg: AssistCfg,
    presence_mode: PresenceMode,
    send_max_v: f32,
    speed_pid: Pid,
    pressure_pid: Pid,
    command: FilamentMotionCommand,
    settle_armed: bool,
    assist: AssistState,
    last_drive: i16,
}

impl MotorController {
    pub fn new(cfg: MotorCfg, assist_cfg: AssistCfg, presence_mode: PresenceMode, send_max_v: f32) -> Self {
        let speed_pid = Pid::new(cfg.speed_pid, cfg.drive_limit);
        let pressure_pid = Pid::new(cfg.pressure_pid, cfg.drive_limit);
        Self {
            cfg,
            assist_cfg,
            presence_mode,
            send_max_v,
            speed_pid,
            pressure_pid,
            command: FilamentMotionCommand::Stop,
            settle_armed: false,
            assist: AssistState::default(),
            last_drive: 0,
        }
    }

    pub fn command(&self) -> FilamentMotionCommand {
        self.command
    }

    pub fn last_drive(&self) -> i16 {
        self.last_drive
    }

    /// Both loops restart from rest whenever the command changes.
    pub fn set_command(&mut self, command: FilamentMotionCommand) {
        if command == self.command {
            return;
        }
        self.speed_pid.reset();
        self.pressure_pid.reset();
        if command == FilamentMotionCommand::PressureCtrlOnUse {
            self.settle_armed = true;
        }
        tracing::trace!(from = ?self.command, to = ?command, "motor command");
        self.command = command;
    }

    pub fn step(&mut self, inp: &MotorInputs) -> i16 {
        let raw = self.raw_output(inp);
        self.last_drive = shape_drive(&self.cfg, raw);
        self.last_drive
    }

    fn raw_output(&mut self, inp: &MotorInputs) -> f32 {
        use FilamentMotionCommand as C;

        if self.command == C::Stop {
            self.speed_pid.reset();
            self.pressure_pid.reset();
            return 0.0;
        }
        if self.command != C::PressureCtrlIdle && inp.presence.is_absent() {
            return 0.0;
        }
        let dir = inp.direction.factor();

        match self.command {
            C::Send | C::SlowSend | C::Pull => {
                let target = self.speed_target(inp);
                dir * self.speed_pid.update(target - inp.speed_mm_s, inp.dt_s)
            }
            C::PressureCtrlOnUse => {
                if self.settle_armed {
                    if inp.pull_v >= self.cfg.settle_release_v {
                        return 0.0;
                    }
                    self.settle_armed = false;
                }
                let err = inp.zero_v - inp.pull_v;
                let tolerance = if inp.calibrated {
                    self.cfg.on_use_calibrated_tolerance_v
                } else {
                    self.cfg.on_use_tolerance_v
                };
                if err.abs() <= tolerance {
                    return 0.0;
                }
                let out = self.pressure_pid.update(err, inp.dt_s);
                dir * shape_pressure(self.cfg.shaping, out)
            }
            C::PressureCtrlIdle => self.idle_output(inp, dir),
            C::Stop => 0.0,
        }
    }

    fn speed_target(&self, inp: &MotorInputs) -> f32 {
        match self.command {
            FilamentMotionCommand::Send => match inp.variant {
                DeviceVariant::FamilyA => self.cfg.send_speed_family_a,
                DeviceVariant::FamilyB if inp.pull_v < self.send_max_v => self.cfg.send_speed_family_b,
                DeviceVariant::FamilyB => self.cfg.send_speed_family_b_full,
            },
            FilamentMotionCommand::SlowSend => self.cfg.slow_send_speed,
            FilamentMotionCommand::Pull => -self.cfg.pull_speed,
            _ => 0.0,
        }
    }

    fn idle_output(&mut self, inp: &MotorInputs, dir: f32) -> f32 {
        if self.presence_mode == PresenceMode::DualSwitch && self.assist_cfg.enabled {
            if let Some(out) = self.assist_output(inp) {
                return dir * out;
            }
        }

        if !inp.presence.is_absent() && inp.pressure != PressureStatus::Normal {
            dir * self.pressure_pid.update(inp.zero_v - inp.pull_v, inp.dt_s)
        } else {
            self.speed_pid.reset();
            self.pressure_pid.reset();
            0.0
        }
    }

    /// Feed-assist during insertion. `Some` overrides the pressure loop.
    fn assist_output(&mut self, inp: &MotorInputs) -> Option<f32> {
        let now = inp.now_ms;
        match inp.presence {
            PresenceStatus::Absent => {
                if !self.assist.armed {
                    self.assist.arm();
                }
                return None;
            }
            PresenceStatus::OuterOnly | PresenceStatus::Loaded if self.assist.armed => {}
            _ => return None,
        }

        let burst = *self.assist.burst_started_ms.get_or_insert(now);
        if now.saturating_sub(burst) >= self.assist_cfg.max_burst_ms {
            tracing::debug!("insertion assist burst limit reached");
            self.assist.disarm();
            return Some(0.0);
        }

        if inp.presence == PresenceStatus::Loaded {
            let window = *self.assist.window_started_ms.get_or_insert(now);
            if now.saturating_sub(window) >= self.assist_cfg.window_ms {
                self.assist.disarm();
                return Some(0.0);
            }
        }
        Some(self.assist_cfg.drive)
    }
}
