//! Background acquisition.
//!
//! Spawns a thread that owns the `SampleSource`, runs its self-calibration on
//! schedule, and hands the newest block to the control loop through a bounded
//! channel. The thread is shut down and joined when the `Sampler` is dropped.
use crossbeam_channel as xch;
use filabuf_traits::clock::Clock;
use filabuf_traits::{RawChannelSample, SampleSource};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// One acquisition block plus the offset the source is currently calibrated to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampledFrame {
    pub sample: RawChannelSample,
    /// `None` until a self-calibration has succeeded.
    pub calibration_offset: Option<i16>,
}

pub struct Sampler {
    rx: xch::Receiver<SampledFrame>,
    last_ok: Arc<AtomicU64>,
    errors: Arc<AtomicU64>,
    epoch: Instant,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<std::thread::JoinHandle<()>>,
}

impl Sampler {
    pub fn spawn<S, C>(mut source: S, hz: u32, self_calibration_interval_ms: u64, clock: C) -> Self
    where
        S: SampleSource + Send + 'static,
        C: Clock + Send + Sync + 'static,
    {
        let (tx, rx) = xch::bounded(1);
        let stale_rx = rx.clone();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = shutdown.clone();
        let last_ok = Arc::new(AtomicU64::new(0));
        let last_ok_clone = last_ok.clone();
        let errors = Arc::new(AtomicU64::new(0));
        let errors_clone = errors.clone();
        let period = Duration::from_micros(crate::util::period_us(hz));
        let epoch = clock.now();

        let join_handle = std::thread::spawn(move || {
            let mut offset: Option<i16> = None;
            let mut last_cal_ms: Option<u64> = None;
            loop {
                if shutdown_clone.load(Ordering::Relaxed) {
                    tracing::debug!("sampler thread received shutdown signal");
                    break;
                }

                let now = clock.ms_since(epoch);
                let cal_due = last_cal_ms
                    .is_none_or(|at| now.saturating_sub(at) >= self_calibration_interval_ms);
                if cal_due {
                    last_cal_ms = Some(now);
                    match source.self_calibrate() {
                        Ok(o) => offset = Some(o),
                        Err(e) => tracing::warn!(error = %e, "adc self-calibration failed; keeping previous offset"),
                    }
                }

                match source.poll() {
                    Ok(sample) => {
                        let frame = SampledFrame {
                            sample,
                            calibration_offset: offset,
                        };
                        // bounded(1): an untaken frame is replaced by the newer one
                        let sent = match tx.try_send(frame) {
                            Err(xch::TrySendError::Full(frame)) => {
                                let _ = stale_rx.try_recv();
                                tx.try_send(frame)
                            }
                            other => other,
                        };
                        match sent {
                            Ok(()) | Err(xch::TrySendError::Full(_)) => {}
                            Err(xch::TrySendError::Disconnected(_)) => {
                                tracing::debug!("sampler consumer disconnected, exiting thread");
                                break;
                            }
                        }
                        last_ok_clone.store(clock.ms_since(epoch), Ordering::Relaxed);
                    }
                    Err(e) => {
                        errors_clone.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(error = %e, "sample poll failed");
                    }
                }

                if shutdown_clone.load(Ordering::Relaxed) {
                    break;
                }
                clock.sleep(period);
            }
            tracing::trace!("sampler thread exiting cleanly");
        });

        Self {
            rx,
            last_ok,
            errors,
            epoch,
            shutdown,
            join_handle: Some(join_handle),
        }
    }

    /// Newest frame, if one arrived since the last call.
    pub fn latest(&self) -> Option<SampledFrame> {
        self.rx.try_iter().last()
    }

    /// Wait up to `timeout` for the next frame.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<SampledFrame> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn stalled_for(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.last_ok.load(Ordering::Relaxed))
    }

    /// Stall measured against this sampler's epoch on the real monotonic clock.
    pub fn stalled_for_now(&self) -> u64 {
        let ms = Instant::now().saturating_duration_since(self.epoch).as_millis();
        self.stalled_for(u64::try_from(ms).unwrap_or(u64::MAX))
    }

    /// Failed polls since spawn.
    pub fn poll_errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.join_handle.take() {
            match handle.join() {
                Ok(()) => tracing::trace!("sampler thread joined"),
                Err(e) => tracing::warn!(?e, "sampler thread panicked during shutdown"),
            }
        }
    }
}
