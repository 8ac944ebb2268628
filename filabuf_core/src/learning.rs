//! Motor polarity learning.
//!
//! Two independent observers infer which drive sign moves filament toward the
//! printer:
//!
//! - [`CorrelationLearner`] compares commanded feed direction with measured
//!   roller motion across several samples.
//! - [`LoadingDetector`] watches what happens to the presence switch after a
//!   fresh insertion.
//!
//! The learner works in filament space and reports a *correction* to compose
//! with the current motor direction. The detector is started with the polarity
//! being driven and reports the absolute polarity that loads filament.

use crate::config::{LearningCfg, LoadingCfg};
use crate::types::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbandonReason {
    Timeout,
    TooNoisy,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LearnEvent {
    /// Enough agreeing samples; `direction` is the correction to compose.
    Learned { direction: Direction, confidence: f32 },
    Abandoned(AbandonReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LearnSession {
    commanded: Direction,
    started_ms: u64,
    last_sample_ms: u64,
    acc_mm: f32,
    backtrack_mm: f32,
    travel_mm: f32,
    agree: u32,
    disagree: u32,
    errors: u32,
    confidence: f32,
}

impl LearnSession {
    pub fn samples(&self) -> u32 {
        self.agree + self.disagree
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn errors(&self) -> u32 {
        self.errors
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum LearnerState {
    #[default]
    Idle,
    Active(LearnSession),
    Complete { direction: Direction, confidence: f32 },
}

pub struct CorrelationLearner {
    cfg: LearningCfg,
    state: LearnerState,
}

impl CorrelationLearner {
    pub fn new(cfg: LearningCfg) -> Self {
        Self {
            cfg,
            state: LearnerState::Idle,
        }
    }

    pub fn state(&self) -> &LearnerState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, LearnerState::Active(_))
    }

    /// Start a session unless one is already running.
    pub fn begin(&mut self, commanded: Direction, now_ms: u64) {
        if self.is_active() {
            return;
        }
        self.state = LearnerState::Active(LearnSession {
            commanded,
            started_ms: now_ms,
            last_sample_ms: now_ms,
            acc_mm: 0.0,
            backtrack_mm: 0.0,
            travel_mm: 0.0,
            agree: 0,
            disagree: 0,
            errors: 0,
            confidence: 0.0,
        });
    }

    pub fn cancel(&mut self) {
        self.state = LearnerState::Idle;
    }

    /// Feed one tick of measured motion.
    pub fn observe(&mut self, delta_mm: f32, now_ms: u64) -> Option<LearnEvent> {
        let LearnerState::Active(s) = &mut self.state else {
            return None;
        };
        let cfg = &self.cfg;

        if now_ms.saturating_sub(s.started_ms) >= cfg.timeout_ms {
            self.state = LearnerState::Idle;
            return Some(LearnEvent::Abandoned(AbandonReason::Timeout));
        }

        let magnitude = delta_mm.abs();
        if magnitude < cfg.significant_movement_mm {
            return None;
        }
        if magnitude > cfg.max_noise_mm * 10.0 {
            s.errors += 1;
            return self.abandon_if_noisy();
        }

        s.travel_mm += magnitude;
        if s.acc_mm != 0.0 && delta_mm.signum() != s.acc_mm.signum() {
            s.backtrack_mm += magnitude;
        }
        s.acc_mm += delta_mm;

        if s.acc_mm.abs() < cfg.min_movement_mm
            || now_ms.saturating_sub(s.last_sample_ms) < cfg.sample_interval_ms
        {
            return None;
        }

        let noisy = s.travel_mm > 0.0 && s.backtrack_mm / s.travel_mm > cfg.max_backtrack_ratio;
        if noisy {
            s.errors += 1;
        } else if Direction::of(s.acc_mm) == Some(s.commanded) {
            s.agree += 1;
        } else {
            s.disagree += 1;
        }
        s.acc_mm = 0.0;
        s.backtrack_mm = 0.0;
        s.travel_mm = 0.0;
        s.last_sample_ms = now_ms;

        if noisy {
            return self.abandon_if_noisy();
        }

        let total = s.samples();
        s.confidence = s.agree.max(s.disagree) as f32 / total as f32;
        tracing::trace!(agree = s.agree, disagree = s.disagree, confidence = s.confidence, "learning sample");

        if total >= cfg.min_samples && s.confidence >= cfg.confidence_threshold && s.agree != s.disagree {
            let direction = if s.agree > s.disagree {
                s.commanded
            } else {
                s.commanded.flipped()
            };
            let confidence = s.confidence;
            self.state = LearnerState::Complete {
                direction,
                confidence,
            };
            return Some(LearnEvent::Learned {
                direction,
                confidence,
            });
        }
        None
    }

    fn abandon_if_noisy(&mut self) -> Option<LearnEvent> {
        if let LearnerState::Active(s) = &self.state {
            if s.errors > self.cfg.min_samples {
                self.state = LearnerState::Idle;
                return Some(LearnEvent::Abandoned(AbandonReason::TooNoisy));
            }
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadingPhase {
    #[default]
    Idle,
    Settling { started_ms: u64, tested: Direction },
    Monitoring { started_ms: u64, monitor_ms: u64, tested: Direction },
    Complete(Direction),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingOutcome {
    /// Absolute motor polarity confirmed by the insertion.
    Confirmed(Direction),
    TimedOut,
}

/// Infers polarity from whether fresh filament stays seated.
pub struct LoadingDetector {
    cfg: LoadingCfg,
    phase: LoadingPhase,
}

impl LoadingDetector {
    pub fn new(cfg: LoadingCfg) -> Self {
        Self {
            cfg,
            phase: LoadingPhase::Idle,
        }
    }

    pub fn phase(&self) -> LoadingPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.phase,
            LoadingPhase::Settling { .. } | LoadingPhase::Monitoring { .. }
        )
    }

    /// Start watching an insertion driven with motor polarity `tested`.
    pub fn begin(&mut self, tested: Direction, now_ms: u64) {
        if !self.cfg.enabled || self.is_active() {
            return;
        }
        self.phase = LoadingPhase::Settling {
            started_ms: now_ms,
            tested,
        };
    }

    pub fn cancel(&mut self) {
        self.phase = LoadingPhase::Idle;
    }

    pub fn observe(&mut self, presence_absent: bool, now_ms: u64) -> Option<LoadingOutcome> {
        match self.phase {
            LoadingPhase::Idle | LoadingPhase::Complete(_) => None,
            LoadingPhase::Settling { started_ms, tested } => {
                if now_ms.saturating_sub(started_ms) >= self.cfg.settle_ms {
                    self.phase = LoadingPhase::Monitoring {
                        started_ms,
                        monitor_ms: now_ms,
                        tested,
                    };
                }
                None
            }
            LoadingPhase::Monitoring {
                started_ms,
                monitor_ms,
                tested,
            } => {
                let confirmed = if presence_absent {
                    Some(tested.flipped())
                } else if now_ms.saturating_sub(monitor_ms) >= self.cfg.hold_ms {
                    Some(tested)
                } else {
                    None
                };
                if let Some(dir) = confirmed {
                    self.phase = LoadingPhase::Complete(dir);
                    return Some(LoadingOutcome::Confirmed(dir));
                }
                if now_ms.saturating_sub(started_ms) >= self.cfg.timeout_ms {
                    self.phase = LoadingPhase::Idle;
                    return Some(LoadingOutcome::TimedOut);
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn learner() -> CorrelationLearner {
        CorrelationLearner::new(LearningCfg::default())
    }

    #[test]
    fn consistent_motion_completes() {
        let mut l = learner();
        l.begin(Direction::Forward, 0);
        let mut last = None;
        for i in 1..=5u64 {
            if let Some(ev) = l.observe(3.0, i * 150) {
                last = Some(ev);
            }
        }
        assert_eq!(
            last,
            Some(LearnEvent::Learned {
                direction: Direction::Forward,
                confidence: 1.0
            })
        );
    }

    #[test]
    fn reversed_motion_learns_flip() {
        let mut l = learner();
        l.begin(Direction::Forward, 0);
        let events: Vec<_> = (1..=3u64).filter_map(|i| l.observe(-3.0, i * 150)).collect();
        assert!(matches!(
            events.as_slice(),
            [LearnEvent::Learned {
                direction: Direction::Reverse,
                ..
            }]
        ));
    }

    #[test]
    fn balanced_motion_stays_inconclusive() {
        let mut l = learner();
        l.begin(Direction::Forward, 0);
        for i in 1..=20u64 {
            let delta = if i % 2 == 0 { -3.0 } else { 3.0 };
            assert_eq!(l.observe(delta, i * 150), None);
        }
        match l.state() {
            LearnerState::Active(s) => {
                assert_eq!(s.samples(), 20);
                assert!((s.confidence() - 0.5).abs() < f32::EPSILON);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn tiny_moves_are_ignored() {
        let mut l = learner();
        l.begin(Direction::Forward, 0);
        for i in 1..40u64 {
            assert_eq!(l.observe(0.05, i * 100), None);
        }
        assert!(l.is_active());
    }

    #[test]
    fn samples_need_interval() {
        let mut l = learner();
        l.begin(Direction::Forward, 0);
        l.observe(3.0, 50);
        match l.state() {
            LearnerState::Active(s) => assert_eq!(s.samples(), 0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn spikes_abandon_session() {
        let mut l = learner();
        l.begin(Direction::Forward, 0);
        let events: Vec<_> = (1..=4u64).filter_map(|i| l.observe(20.0, i * 10)).collect();
        assert_eq!(events, vec![LearnEvent::Abandoned(AbandonReason::TooNoisy)]);
        assert_eq!(*l.state(), LearnerState::Idle);
    }

    #[test]
    fn times_out() {
        let mut l = learner();
        l.begin(Direction::Forward, 0);
        assert_eq!(
            l.observe(0.0, 5_000),
            Some(LearnEvent::Abandoned(AbandonReason::Timeout))
        );
    }

    fn detector() -> LoadingDetector {
        LoadingDetector::new(LoadingCfg::default())
    }

    #[test]
    fn held_insertion_confirms_tested() {
        let mut d = detector();
        d.begin(Direction::Reverse, 0);
        assert_eq!(d.observe(false, 100), None);
        assert_eq!(d.observe(false, 500), None);
        assert_eq!(d.observe(false, 2_000), None);
        assert_eq!(
            d.observe(false, 2_500),
            Some(LoadingOutcome::Confirmed(Direction::Reverse))
        );
    }

    #[test]
    fn ejected_filament_confirms_opposite() {
        let mut d = detector();
        d.begin(Direction::Forward, 0);
        d.observe(false, 600);
        assert_eq!(
            d.observe(true, 700),
            Some(LoadingOutcome::Confirmed(Direction::Reverse))
        );
    }

    #[test]
    fn presence_loss_while_settling_is_ignored() {
        let mut d = detector();
        d.begin(Direction::Forward, 0);
        assert_eq!(d.observe(true, 100), None);
        assert!(d.is_active());
    }

    #[test]
    fn disabled_detector_never_starts() {
        let mut d = LoadingDetector::new(LoadingCfg {
            enabled: false,
            ..LoadingCfg::default()
        });
        d.begin(Direction::Forward, 0);
        assert_eq!(d.phase(), LoadingPhase::Idle);
    }

    #[test]
    fn slow_hold_times_out() {
        let mut d = LoadingDetector::new(LoadingCfg {
            hold_ms: 10_000,
            ..LoadingCfg::default()
        });
        d.begin(Direction::Forward, 0);
        d.observe(false, 500);
        assert_eq!(d.observe(false, 3_000), Some(LoadingOutcome::TimedOut));
    }
}
