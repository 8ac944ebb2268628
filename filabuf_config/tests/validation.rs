use filabuf_config::{PresenceMode, PressureShaping, RunMode, load_file, load_toml};
use rstest::rstest;
use std::fs;
use tempfile::tempdir;

#[test]
fn empty_document_is_a_valid_config() {
    let cfg = load_toml("").expect("parse empty TOML");
    cfg.validate().expect("defaults should validate");
    assert_eq!(cfg.tick.rate_hz, 100);
    assert_eq!(cfg.tick.mode, RunMode::Direct);
    assert_eq!(cfg.filter.window, 256);
    assert_eq!(cfg.presence.mode, PresenceMode::Single);
    assert_eq!(cfg.motor.pressure_shaping, PressureShaping::Square);
    assert_eq!(cfg.bringup.correction, [false, true, true, false]);
}

#[test]
fn sections_override_defaults() {
    let toml = r#"
[tick]
rate_hz = 50
mode = "sampler"

[presence]
mode = "dual"

[motor]
speed_pid = { p = 3.0, i = 10.0, d = 0.5 }
pressure_shaping = "responsive"

[scheduler]
retract_distance_mm = 700.0
"#;
    let cfg = load_toml(toml).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert_eq!(cfg.tick.mode, RunMode::Sampler);
    assert_eq!(cfg.presence.mode, PresenceMode::Dual);
    assert!((cfg.motor.speed_pid.d - 0.5).abs() < f32::EPSILON);
    assert_eq!(cfg.motor.pressure_shaping, PressureShaping::Responsive);
    assert!((cfg.scheduler.retract_distance_mm - 700.0).abs() < f32::EPSILON);
    // untouched sections keep defaults
    assert_eq!(cfg.learning.min_samples, 3);
}

#[rstest]
#[case("[tick]\nrate_hz = 0", "tick.rate_hz must be > 0")]
#[case("[filter]\nwindow = 100", "filter.window must be a power of two")]
#[case("[filter]\noutlier_k = 0.0", "filter.outlier_k must be > 0")]
#[case(
    "[presence]\ndual_inner_below_v = 0.5",
    "presence dual thresholds must be strictly increasing"
)]
#[case(
    "[pressure]\nstatic_low_v = 1.7",
    "pressure static band must satisfy"
)]
#[case(
    "[loading]\ntimeout_ms = 1000",
    "loading.timeout_ms must cover settle_ms + hold_ms"
)]
#[case("[motor]\ndrive_limit = 2000.0", "motor.drive_limit must be in (0, 1000]")]
#[case(
    "[assist]\nwindow_ms = 9000",
    "assist.window_ms must be <= assist.max_burst_ms"
)]
#[case("[bringup]\nprobe_drive = 0", "bringup.probe_drive must be")]
#[case("[position]\ncounts_per_rev = 1000", "position.counts_per_rev must be")]
fn rejects_impossible_values(#[case] toml: &str, #[case] needle: &str) {
    let cfg = load_toml(toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(
        format!("{err}").contains(needle),
        "unexpected error: {err}"
    );
}

#[test]
fn unknown_enum_values_fail_to_parse() {
    let err = load_toml("[presence]\nmode = \"triple\"").expect_err("should not parse");
    assert!(err.to_string().contains("triple") || err.to_string().contains("variant"));
}

#[test]
fn load_file_reports_path_on_parse_error() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[tick\nrate_hz = 1").expect("write");
    let err = load_file(&path).expect_err("should fail");
    assert!(err.to_string().contains("bad.toml"));
}

#[test]
fn load_file_validates() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("cfg.toml");
    fs::write(&path, "[tick]\nrate_hz = 0\n").expect("write");
    let err = load_file(&path).expect_err("should fail validation");
    assert!(err.to_string().contains("tick.rate_hz"));
}

#[test]
fn shipped_sample_config_validates() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../etc/filabuf.toml");
    let cfg = load_file(&path).expect("sample config must load");
    assert_eq!(cfg.tick.rate_hz, 100);
    assert_eq!(cfg.sim.reversed, [false, true, false, false]);
}
