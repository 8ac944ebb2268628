use std::time::Duration;

use filabuf_traits::Clock;

use crate::error::{HwError, Result};

/// Poll `done` until it returns true or `timeout` expires on `clock`.
/// Sleeps `poll_interval` between checks so a manual clock advances too.
pub fn wait_until_with_timeout(
    clock: &dyn Clock,
    mut done: impl FnMut() -> bool,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<()> {
    let deadline = clock.now() + timeout;
    while !done() {
        if clock.now() >= deadline {
            return Err(HwError::Timeout);
        }
        clock.sleep(poll_interval);
    }
    Ok(())
}
