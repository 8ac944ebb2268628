use std::time::Duration;

use filabuf_hardware::error::HwError;
use filabuf_hardware::util::wait_until_with_timeout;
use filabuf_traits::{Clock, ManualClock, MonotonicClock};

#[test]
fn wait_succeeds_once_predicate_holds() {
    let clock = ManualClock::new();
    let start = clock.now();
    let mut polls = 0;
    let res = wait_until_with_timeout(
        &clock,
        || {
            polls += 1;
            polls >= 4
        },
        Duration::from_millis(50),
        Duration::from_millis(2),
    );
    assert!(res.is_ok(), "expected success, got {res:?}");
    // three sleeps of simulated time, no real waiting
    assert_eq!(clock.ms_since(start), 6);
}

#[test]
fn wait_times_out_on_manual_clock() {
    let clock = ManualClock::new();
    let err = wait_until_with_timeout(
        &clock,
        || false,
        Duration::from_millis(20),
        Duration::from_millis(5),
    )
    .expect_err("expected timeout error");
    match err {
        HwError::Timeout => {}
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn wait_times_out_in_real_time() {
    let clock = MonotonicClock::new();
    let started = std::time::Instant::now();
    let err = wait_until_with_timeout(
        &clock,
        || false,
        Duration::from_millis(5),
        Duration::from_micros(200),
    );
    assert!(matches!(err, Err(HwError::Timeout)));
    assert!(started.elapsed() < Duration::from_millis(500));
}
