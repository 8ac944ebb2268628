use crate::config::BufferConfig;
use crate::error::Result as CoreResult;
use crate::sampler::Sampler;
use crate::status::TickReport;
use filabuf_traits::clock::MonotonicClock;
use filabuf_traits::{ConfigStore, IndicatorSink, MotorDrive, ProtocolLink, RotarySensor, SampleSource};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// How sampling should be orchestrated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    /// Poll the source inside the control tick
    Direct,
    /// Background sampler thread acquiring at the given Hz
    Paced(u32),
}

/// Knobs for one `run` invocation.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub mode: SamplingMode,
    /// Stop after this many ticks; `None` runs until shutdown.
    pub max_ticks: Option<u64>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: SamplingMode::Direct,
            max_ticks: None,
        }
    }
}

/// Counters collected over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub events: u64,
    pub hw_errors: u64,
    /// Ticks that saw no fresh acquisition block.
    pub missed_samples: u64,
    /// Times the sample stream was declared stalled.
    pub stalls: u64,
}

impl RunSummary {
    fn record(&mut self, report: &TickReport) {
        self.ticks += 1;
        self.events += report.events.len() as u64;
        self.hw_errors += report.hw_errors.len() as u64;
    }
}

/// Compute the stall threshold in milliseconds.
///
/// A stall is declared when no block arrived for four sampler periods, and
/// never sooner than two control ticks, so one late block does not trip it.
#[inline]
fn compute_stall_threshold_ms(sample_period_ms: u64, tick_period_ms: u64) -> u64 {
    debug_assert!((1..=crate::util::MILLIS_PER_SEC).contains(&tick_period_ms));
    std::cmp::max(
        fast_threshold_ms(sample_period_ms),
        two_periods_ms(tick_period_ms),
    )
    .max(1)
}

#[inline]
fn fast_threshold_ms(sample_period_ms: u64) -> u64 {
    sample_period_ms.saturating_mul(4)
}

#[inline]
fn two_periods_ms(period_ms: u64) -> u64 {
    period_ms.saturating_mul(2)
}

#[inline]
fn stalled_now(elapsed_ms: u64, stalled_ms: u64, threshold_ms: u64) -> bool {
    elapsed_ms >= threshold_ms && stalled_ms > threshold_ms
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn done(shutdown: &AtomicBool, summary: &RunSummary, max_ticks: Option<u64>) -> bool {
    shutdown.load(Ordering::Relaxed) || max_ticks.is_some_and(|n| summary.ticks >= n)
}

/// Run the control loop until `shutdown` is raised or `max_ticks` is reached.
///
/// Performs the boot-time polarity probe first when configured. Unsaved state
/// is flushed and every motor is stopped before returning.
#[allow(clippy::too_many_arguments)]
pub fn run<S, R, D, L, F>(
    source: S,
    rotary: R,
    drive: D,
    link: L,
    cfg: BufferConfig,
    store: Option<Box<dyn ConfigStore + Send>>,
    indicator: Option<Box<dyn IndicatorSink + Send>>,
    opts: RunOptions,
    shutdown: &AtomicBool,
    on_tick: F,
) -> CoreResult<RunSummary>
where
    S: SampleSource + Send + 'static,
    R: RotarySensor + 'static,
    D: MotorDrive + 'static,
    L: ProtocolLink + 'static,
    F: FnMut(&TickReport),
{
    match opts.mode {
        SamplingMode::Direct => run_direct(
            source, rotary, drive, link, cfg, store, indicator, opts, shutdown, on_tick,
        ),
        SamplingMode::Paced(hz) => run_with_sampler(
            source, rotary, drive, link, cfg, store, indicator, hz, opts, shutdown, on_tick,
        ),
    }
}

#[allow(clippy::too_many_arguments)]
fn run_direct<S, R, D, L, F>(
    source: S,
    rotary: R,
    drive: D,
    link: L,
    cfg: BufferConfig,
    store: Option<Box<dyn ConfigStore + Send>>,
    indicator: Option<Box<dyn IndicatorSink + Send>>,
    opts: RunOptions,
    shutdown: &AtomicBool,
    mut on_tick: F,
) -> CoreResult<RunSummary>
where
    S: SampleSource + 'static,
    R: RotarySensor + 'static,
    D: MotorDrive + 'static,
    L: ProtocolLink + 'static,
    F: FnMut(&TickReport),
{
    let period = Duration::from_micros(crate::util::period_us(cfg.tick_hz));
    let mut buffer = crate::build_buffer(source, rotary, drive, link, cfg, store, indicator, None)?;
    buffer.bring_up();
    tracing::info!(mode = "direct", "control loop start");

    let mut summary = RunSummary::default();
    let mut next = Instant::now();
    while !done(shutdown, &summary, opts.max_ticks) {
        let report = buffer.step();
        on_tick(&report);
        summary.record(&report);

        next += period;
        let now = Instant::now();
        if next > now {
            std::thread::sleep(next - now);
        } else {
            // fell behind; do not try to catch up with a burst of ticks
            next = now;
        }
    }

    if let Err(e) = buffer.flush_state() {
        tracing::warn!(error = %e, "unsaved state could not be persisted at shutdown");
    }
    let _ = buffer.stop_all();
    tracing::info!(?summary, "control loop stopped");
    Ok(summary)
}

#[allow(clippy::too_many_arguments)]
fn run_with_sampler<S, R, D, L, F>(
    source: S,
    rotary: R,
    drive: D,
    link: L,
    cfg: BufferConfig,
    store: Option<Box<dyn ConfigStore + Send>>,
    indicator: Option<Box<dyn IndicatorSink + Send>>,
    sample_hz: u32,
    opts: RunOptions,
    shutdown: &AtomicBool,
    mut on_tick: F,
) -> CoreResult<RunSummary>
where
    S: SampleSource + Send + 'static,
    R: RotarySensor + 'static,
    D: MotorDrive + 'static,
    L: ProtocolLink + 'static,
    F: FnMut(&TickReport),
{
    // The sampler thread owns the real source; the core only sees its frames.
    use crate::mocks::DetachedSource;

    let tick_period_ms = crate::util::period_ms(cfg.tick_hz);
    let stall_threshold_ms =
        compute_stall_threshold_ms(crate::util::period_ms(sample_hz), tick_period_ms);
    let frame_wait = Duration::from_millis(tick_period_ms);

    let sampler = Sampler::spawn(
        source,
        sample_hz,
        cfg.filter.self_calibration_interval_ms,
        MonotonicClock::new(),
    );
    let mut buffer =
        crate::build_buffer(DetachedSource, rotary, drive, link, cfg, store, indicator, None)?;
    buffer.bring_up();
    tracing::info!(mode = "sampler", sample_hz, stall_threshold_ms, "control loop start");

    let start = Instant::now();
    let mut stalled = false;
    let mut summary = RunSummary::default();
    while !done(shutdown, &summary, opts.max_ticks) {
        let is_stalled = stalled_now(
            elapsed_ms(start),
            sampler.stalled_for_now(),
            stall_threshold_ms,
        );
        if is_stalled && !stalled {
            summary.stalls += 1;
            tracing::warn!(
                stalled_ms = sampler.stalled_for_now(),
                poll_errors = sampler.poll_errors(),
                "sample stream stalled"
            );
        } else if !is_stalled && stalled {
            tracing::info!("sample stream recovered");
        }
        stalled = is_stalled;

        let frame = sampler.recv_timeout(frame_wait);
        if frame.is_none() {
            summary.missed_samples += 1;
        }
        let report = buffer.step_from_frame(frame);
        on_tick(&report);
        summary.record(&report);
    }

    if let Err(e) = buffer.flush_state() {
        tracing::warn!(error = %e, "unsaved state could not be persisted at shutdown");
    }
    let _ = buffer.stop_all();
    tracing::info!(?summary, "control loop stopped");
    Ok(summary)
}
