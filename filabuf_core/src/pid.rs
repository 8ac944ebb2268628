use crate::config::PidGains;

/// Discrete PID with a symmetric output limit.
///
/// The integral term is clamped to half the output limit so a long saturation
/// cannot wind it up past what the output could ever use.
#[derive(Debug, Clone)]
pub struct Pid {
    gains: PidGains,
    limit: f32,
    integral: f32,
    last_error: f32,
}

impl Pid {
    pub fn new(gains: PidGains, limit: f32) -> Self {
        Self {
            gains,
            limit: limit.abs(),
            integral: 0.0,
            last_error: 0.0,
        }
    }

    pub fn update(&mut self, error: f32, dt_s: f32) -> f32 {
        let half = self.limit / 2.0;
        self.integral = (self.integral + self.gains.i * error * dt_s).clamp(-half, half);

        let mut out = self.gains.p * error + self.integral;
        if dt_s > 0.0 {
            out += self.gains.d * (error - self.last_error) / dt_s;
        }
        self.last_error = error;
        out.clamp(-self.limit, self.limit)
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_error = 0.0;
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }
}
