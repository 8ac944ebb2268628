mod common;

use common::Rig;
use filabuf_core::error::BuildError;
use filabuf_core::{BufferConfig, FilamentBuffer};
use rstest::rstest;

#[rstest]
fn missing_source_yields_typed_build_error() {
    let err = FilamentBuffer::builder()
        .with_config(BufferConfig::default())
        .try_build()
        .expect_err("should fail without collaborators");
    match err.downcast_ref::<BuildError>() {
        Some(BuildError::MissingSource) => {}
        other => panic!("expected MissingSource, got: {other:?}"),
    }
}

#[rstest]
#[case::zero_rate(|c: &mut BufferConfig| c.tick_hz = 0, "tick_hz")]
#[case::odd_window(|c: &mut BufferConfig| c.filter.window = 48, "power of two")]
#[case::no_roller(|c: &mut BufferConfig| c.position.roller_diameter_mm = 0.0, "roller_diameter_mm")]
#[case::drive_over_range(|c: &mut BufferConfig| c.motor.drive_limit = 1500.0, "drive_limit")]
#[case::deadzone_swallows_drive(|c: &mut BufferConfig| c.motor.deadzone = 1000.0, "deadzone")]
#[case::no_retract(|c: &mut BufferConfig| c.scheduler.retract_distance_mm = -1.0, "retract_distance_mm")]
fn invalid_config_is_rejected(#[case] tweak: fn(&mut BufferConfig), #[case] needle: &str) {
    let mut cfg = BufferConfig::default();
    tweak(&mut cfg);
    let err = Rig::new()
        .buffer(cfg)
        .build()
        .expect_err("config should be rejected");
    match err.downcast_ref::<BuildError>() {
        Some(BuildError::InvalidConfig(msg)) => assert!(msg.contains(needle), "{msg}"),
        other => panic!("expected InvalidConfig, got: {other:?}"),
    }
}

#[test]
fn inconsistent_learning_tunables_disable_learning_only() {
    let mut cfg = BufferConfig::default();
    cfg.learning.confidence_threshold = 1.5;
    let buf = Rig::new().buffer(cfg).build().expect("soft misconfig must still build");
    let gates = buf.gates();
    assert!(!gates.learning);
    assert!(gates.calibration);
}
