//! Sensor filtering engine.
//!
//! Turns each acquisition block into one calibrated voltage and one health flag
//! per raw lane. Nothing here returns an error: an untrustworthy block reuses
//! the lane's previous value and bumps its fault counter, so sensor loss can
//! never stall the control loop.

use std::collections::VecDeque;

use filabuf_traits::{RAW_LANES, RawChannelSample};

use crate::config::FilterCfg;

/// ADC codes per volt reference (12-bit converter).
pub const ADC_FULL_SCALE: u16 = 4096;
const ADC_MAX_CODE: u16 = ADC_FULL_SCALE - 1;

#[inline]
fn in_range(code: u16) -> bool {
    code != 0 && code < ADC_MAX_CODE
}

/// A lane flipped health state this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthTransition {
    pub lane: usize,
    pub healthy: bool,
}

/// Filter state of one raw lane.
#[derive(Debug, Clone)]
pub struct FilteredLane {
    offset: i16,
    mean: f32,
    std_dev: f32,
    filtered_v: f32,
    primed: bool,
    fault_count: u32,
    stability_count: u32,
    healthy: bool,
    noise: VecDeque<f32>,
}

impl FilteredLane {
    fn new(noise_history: usize) -> Self {
        Self {
            offset: 0,
            mean: 0.0,
            std_dev: 0.0,
            filtered_v: 0.0,
            primed: false,
            fault_count: 0,
            stability_count: 0,
            healthy: true,
            noise: VecDeque::with_capacity(noise_history.max(1)),
        }
    }

    pub fn voltage(&self) -> f32 {
        self.filtered_v
    }

    pub fn fault_count(&self) -> u32 {
        self.fault_count
    }

    pub fn stability_count(&self) -> u32 {
        self.stability_count
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    pub fn offset(&self) -> i16 {
        self.offset
    }

    /// Mean and standard deviation (codes) of the last block's in-range samples.
    pub fn block_stats(&self) -> (f32, f32) {
        (self.mean, self.std_dev)
    }

    pub fn average_noise(&self) -> f32 {
        if self.noise.is_empty() {
            return 0.0;
        }
        self.noise.iter().sum::<f32>() / self.noise.len() as f32
    }

    fn ingest(&mut self, raw: &[u16], cfg: &FilterCfg) -> Option<bool> {
        match self.block_voltage(raw, cfg) {
            Some(v) => {
                self.fault_count = self.fault_count.saturating_sub(1);
                self.settle(v, cfg);
            }
            None => {
                // capped so a long outage does not delay recovery indefinitely
                self.fault_count = (self.fault_count + 1).min(cfg.fault_threshold.max(1));
                self.stability_count = 0;
            }
        }
        self.update_health(cfg)
    }

    /// Average of the accepted samples in volts, or `None` when under a quarter
    /// of the block survived rejection.
    fn block_voltage(&mut self, raw: &[u16], cfg: &FilterCfg) -> Option<f32> {
        if raw.is_empty() {
            return None;
        }

        let (mut n, mut sum, mut sum_sq) = (0u32, 0.0f64, 0.0f64);
        for &code in raw.iter().filter(|c| in_range(**c)) {
            let x = f64::from(code);
            n += 1;
            sum += x;
            sum_sq += x * x;
        }
        if n == 0 {
            return None;
        }
        let mean = sum / f64::from(n);
        let std_dev = (sum_sq / f64::from(n) - mean * mean).max(0.0).sqrt();
        self.mean = mean as f32;
        self.std_dev = std_dev as f32;

        let limit = f64::from(cfg.outlier_k) * std_dev;
        let (mut accepted, mut acc_sum) = (0usize, 0u64);
        for &code in raw.iter().filter(|c| in_range(**c)) {
            if cfg.outlier_detection && std_dev > 0.0 && (f64::from(code) - mean).abs() > limit {
                continue;
            }
            let corrected = (i32::from(code) + i32::from(self.offset)).clamp(0, i32::from(ADC_MAX_CODE));
            accepted += 1;
            acc_sum += corrected as u64;
        }

        if accepted == 0 || accepted * 4 < raw.len() {
            return None;
        }
        let avg = acc_sum as f32 / accepted as f32;
        Some(avg / f32::from(ADC_FULL_SCALE) * cfg.vref)
    }

    fn settle(&mut self, v: f32, cfg: &FilterCfg) {
        if !self.primed {
            self.filtered_v = v;
            self.primed = true;
            return;
        }

        let delta = (v - self.filtered_v).abs();
        if delta < cfg.stability_threshold_v {
            self.stability_count = self.stability_count.saturating_add(1);
        } else {
            self.stability_count = 0;
        }

        if self.noise.len() >= cfg.noise_history.max(1) {
            self.noise.pop_front();
        }
        self.noise.push_back(delta);

        if !cfg.adaptive {
            self.filtered_v = v;
            return;
        }

        let (keep, take) = if self.average_noise() > cfg.max_noise_v {
            (0.8, 0.2)
        } else if self.stability_count > cfg.settled_count {
            (0.3, 0.7)
        } else {
            (0.5, 0.5)
        };
        self.filtered_v = keep * self.filtered_v + take * v;
    }

    fn update_health(&mut self, cfg: &FilterCfg) -> Option<bool> {
        if self.healthy && self.fault_count >= cfg.fault_threshold {
            self.healthy = false;
            return Some(false);
        }
        if !self.healthy && self.fault_count == 0 && self.stability_count >= cfg.recovery_threshold
        {
            self.healthy = true;
            return Some(true);
        }
        None
    }
}

/// Filtered view of all lanes after one tick.
#[derive(Debug, Clone)]
pub struct FilterOutput {
    pub volts: [f32; RAW_LANES],
    pub healthy: [bool; RAW_LANES],
    pub transitions: Vec<HealthTransition>,
}

pub struct FilterEngine {
    cfg: FilterCfg,
    lanes: [FilteredLane; RAW_LANES],
    last_self_calibration_ms: Option<u64>,
    scratch: Vec<u16>,
}

impl FilterEngine {
    pub fn new(cfg: FilterCfg) -> Self {
        let lanes = std::array::from_fn(|_| FilteredLane::new(cfg.noise_history));
        let scratch = Vec::with_capacity(cfg.window);
        Self {
            cfg,
            lanes,
            last_self_calibration_ms: None,
            scratch,
        }
    }

    pub fn cfg(&self) -> &FilterCfg {
        &self.cfg
    }

    pub fn lane(&self, idx: usize) -> &FilteredLane {
        &self.lanes[idx]
    }

    /// Filter one acquisition block.
    pub fn process(&mut self, sample: &RawChannelSample) -> FilterOutput {
        let mut transitions = Vec::new();
        for idx in 0..RAW_LANES {
            self.scratch.clear();
            self.scratch.extend(sample.frames.iter().map(|f| f[idx]));
            if let Some(healthy) = self.lanes[idx].ingest(&self.scratch, &self.cfg) {
                log_transition(idx, healthy, &self.lanes[idx]);
                transitions.push(HealthTransition { lane: idx, healthy });
            }
        }
        self.output(transitions)
    }

    /// Account for a tick with no acquisition data at all.
    pub fn process_missing(&mut self) -> FilterOutput {
        let mut transitions = Vec::new();
        for idx in 0..RAW_LANES {
            if let Some(healthy) = self.lanes[idx].ingest(&[], &self.cfg) {
                log_transition(idx, healthy, &self.lanes[idx]);
                transitions.push(HealthTransition { lane: idx, healthy });
            }
        }
        self.output(transitions)
    }

    /// Current values without consuming a tick.
    pub fn snapshot(&self) -> FilterOutput {
        self.output(Vec::new())
    }

    fn output(&self, transitions: Vec<HealthTransition>) -> FilterOutput {
        FilterOutput {
            volts: std::array::from_fn(|i| self.lanes[i].voltage()),
            healthy: std::array::from_fn(|i| self.lanes[i].is_healthy()),
            transitions,
        }
    }

    /// True at boot and once per configured interval afterwards.
    pub fn self_calibration_due(&self, now_ms: u64) -> bool {
        match self.last_self_calibration_ms {
            None => true,
            Some(at) => now_ms.saturating_sub(at) >= self.cfg.self_calibration_interval_ms,
        }
    }

    /// Install a fresh hardware offset on every lane.
    pub fn apply_self_calibration(&mut self, offset: i16, now_ms: u64) {
        for lane in &mut self.lanes {
            lane.offset = offset;
        }
        self.last_self_calibration_ms = Some(now_ms);
        tracing::debug!(offset, "adc self-calibration applied");
    }

    /// Keep the existing offset and try again after the next interval.
    pub fn defer_self_calibration(&mut self, now_ms: u64) {
        self.last_self_calibration_ms = Some(now_ms);
    }
}

fn log_transition(lane: usize, healthy: bool, state: &FilteredLane) {
    if healthy {
        tracing::info!(lane, stability = state.stability_count, "sensor lane recovered");
    } else {
        tracing::warn!(lane, faults = state.fault_count, "sensor lane unhealthy");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> FilterCfg {
        FilterCfg::default()
    }

    fn block(code: u16, n: usize) -> Vec<u16> {
        vec![code; n]
    }

    #[test]
    fn converts_codes_to_volts() {
        let mut lane = FilteredLane::new(8);
        lane.ingest(&block(2048, 16), &cfg());
        assert!((lane.voltage() - 1.65).abs() < 1e-4);
    }

    #[test]
    fn saturated_and_zero_codes_are_rejected() {
        let mut lane = FilteredLane::new(8);
        lane.ingest(&block(2048, 4), &cfg());
        let before = lane.voltage();
        assert_eq!(lane.ingest(&[0, 4095, 4095, 0], &cfg()), None);
        assert!((lane.voltage() - before).abs() < f32::EPSILON);
        assert_eq!(lane.fault_count(), 1);
    }

    #[test]
    fn outliers_are_excluded_from_average() {
        let mut lane = FilteredLane::new(8);
        let mut raw = block(2000, 63);
        raw.push(3000);
        lane.ingest(&raw, &cfg());
        let expect = 2000.0 / 4096.0 * 3.3;
        assert!((lane.voltage() - expect).abs() < 1e-4, "got {}", lane.voltage());
    }

    #[test]
    fn outlier_detection_can_be_disabled() {
        let mut c = cfg();
        c.outlier_detection = false;
        let mut lane = FilteredLane::new(8);
        let mut raw = block(2000, 3);
        raw.push(3000);
        lane.ingest(&raw, &c);
        let expect = 2250.0 / 4096.0 * 3.3;
        assert!((lane.voltage() - expect).abs() < 1e-4);
    }

    #[test]
    fn under_quarter_accepted_reuses_previous() {
        let mut lane = FilteredLane::new(8);
        lane.ingest(&block(1000, 8), &cfg());
        let prev = lane.voltage();
        // 1 valid of 8 frames: 12.5% accepted
        let mut raw = block(4095, 7);
        raw.push(3000);
        lane.ingest(&raw, &cfg());
        assert!((lane.voltage() - prev).abs() < f32::EPSILON);
        assert_eq!(lane.fault_count(), 1);
    }

    #[test]
    fn offset_is_applied_and_clamped() {
        let mut lane = FilteredLane::new(8);
        lane.offset = 100;
        lane.ingest(&block(4000, 4), &cfg());
        let expect = 4095.0 / 4096.0 * 3.3;
        assert!((lane.voltage() - expect).abs() < 1e-4);
    }

    #[test]
    fn blend_weights_follow_policy() {
        let c = cfg();
        let mut lane = FilteredLane::new(8);
        lane.ingest(&block(2048, 4), &c);
        // even blend on a step change
        lane.ingest(&block(2088, 4), &c);
        let a = 2048.0 / 4096.0 * 3.3;
        let b = 2088.0 / 4096.0 * 3.3;
        assert!((lane.voltage() - (0.5 * a + 0.5 * b)).abs() < 1e-4);
    }

    #[test]
    fn heavy_smoothing_when_noisy() {
        let mut c = cfg();
        c.max_noise_v = 0.001;
        let mut lane = FilteredLane::new(8);
        lane.ingest(&block(2048, 4), &c);
        lane.ingest(&block(2448, 4), &c);
        let a = 2048.0 / 4096.0 * 3.3;
        let b = 2448.0 / 4096.0 * 3.3;
        assert!((lane.voltage() - (0.8 * a + 0.2 * b)).abs() < 1e-4);
    }

    #[test]
    fn raw_passthrough_when_not_adaptive() {
        let mut c = cfg();
        c.adaptive = false;
        let mut lane = FilteredLane::new(8);
        lane.ingest(&block(2048, 4), &c);
        lane.ingest(&block(3000, 4), &c);
        assert!((lane.voltage() - 3000.0 / 4096.0 * 3.3).abs() < 1e-4);
    }

    #[test]
    fn stability_counter_resets_on_jump() {
        let c = cfg();
        let mut lane = FilteredLane::new(8);
        lane.ingest(&block(2048, 4), &c);
        lane.ingest(&block(2048, 4), &c);
        lane.ingest(&block(2048, 4), &c);
        assert_eq!(lane.stability_count(), 2);
        lane.ingest(&block(2500, 4), &c);
        assert_eq!(lane.stability_count(), 0);
    }

    #[test]
    fn self_calibration_schedule() {
        let mut engine = FilterEngine::new(cfg());
        assert!(engine.self_calibration_due(0));
        engine.apply_self_calibration(-3, 0);
        assert_eq!(engine.lane(5).offset(), -3);
        assert!(!engine.self_calibration_due(29_999));
        assert!(engine.self_calibration_due(30_000));
        engine.defer_self_calibration(30_000);
        assert!(!engine.self_calibration_due(30_001));
        assert_eq!(engine.lane(0).offset(), -3);
    }
}
