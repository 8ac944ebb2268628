//! Command bodies: simulated bench assembly, the control loop and the
//! persisted-state tools.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use eyre::WrapErr;
use filabuf_core::persist::{self, PersistedState};
use filabuf_core::runner::{RunOptions, RunSummary, SamplingMode};
use filabuf_core::{BufferConfig, BufferEvent, FilamentBuffer, TickReport};
use filabuf_hardware::{FileStore, SimBench, SimParams};
use filabuf_traits::{CHANNELS, ChannelId, ConfigStore, IndicatorSink, MonotonicClock, RequestedMotion};
use serde_json::json;

use crate::cli::{Script, Variant};

/// Ticks a scripted feed spends loading before the printer starts drawing.
const FEED_TICKS: u64 = 100;
/// Ticks a scripted retraction prints before asking for the unload.
const PRINT_TICKS: u64 = 50;

pub fn sim_params(c: &filabuf_config::SimCfg) -> SimParams {
    SimParams {
        frames_per_poll: c.frames_per_poll,
        noise_codes: c.noise_codes,
        reversed: c.reversed,
        consumption_mm_s: c.consumption_mm_s,
        seed: c.seed,
        ..SimParams::default()
    }
}

pub fn sim_bench(cfg: &filabuf_config::Config, variant: Variant) -> SimBench {
    let bench = SimBench::new(sim_params(&cfg.sim), Arc::new(MonotonicClock::new()));
    bench.set_variant(variant.into());
    bench
}

fn build_on_bench(
    bench: &SimBench,
    cfg: &filabuf_config::Config,
    store: Option<FileStore>,
) -> eyre::Result<FilamentBuffer> {
    let builder = FilamentBuffer::builder()
        .with_source(bench.adc())
        .with_rotary(bench.encoders())
        .with_drive(bench.drives())
        .with_link(bench.protocol())
        .with_indicator(bench.indicator())
        .with_config(BufferConfig::from(cfg));
    let builder = match store {
        Some(s) => builder.with_store(s),
        None => builder,
    };
    builder.build()
}

/// Steers the printer side of the bench tick by tick.
struct ScriptPlayer {
    script: Option<Script>,
    bench: SimBench,
    ticks: u64,
}

impl ScriptPlayer {
    fn new(script: Option<Script>, bench: SimBench) -> Self {
        Self {
            script,
            bench,
            ticks: 0,
        }
    }

    fn prepare(&self) {
        let Some(script) = self.script else {
            return;
        };
        self.bench.select(0);
        self.bench.load(0);
        match script {
            Script::Insert => {}
            Script::Feed => self.bench.request(0, RequestedMotion::NeedSendOut),
            Script::Retract => self.bench.request(0, RequestedMotion::OnUse),
        }
    }

    fn on_tick(&mut self, report: &TickReport) {
        self.ticks += 1;
        match self.script {
            Some(Script::Feed) if self.ticks == FEED_TICKS => {
                tracing::info!(channel = 0, "printer starts drawing");
                self.bench.request(0, RequestedMotion::OnUse);
            }
            Some(Script::Retract) => {
                if self.ticks == PRINT_TICKS {
                    tracing::info!(channel = 0, "printer requests unload");
                    self.bench.request(0, RequestedMotion::NeedPullBack);
                }
                if report
                    .events
                    .contains(&BufferEvent::RetractionComplete { channel: 0 })
                {
                    self.bench.request(0, RequestedMotion::Idle);
                    self.bench.unload(0);
                }
            }
            _ => {}
        }
    }
}

fn event_json(report: &TickReport, ev: &BufferEvent) -> serde_json::Value {
    let channel = match ev {
        BufferEvent::FilamentInserted { channel }
        | BufferEvent::RetractionComplete { channel }
        | BufferEvent::CalibrationCompleted { channel, .. }
        | BufferEvent::CalibrationRejected { channel, .. }
        | BufferEvent::CalibrationAborted { channel, .. }
        | BufferEvent::DirectionLearned { channel, .. }
        | BufferEvent::LoadingDirectionConfirmed { channel, .. }
        | BufferEvent::LoadingDetectionTimedOut { channel }
        | BufferEvent::LearningAbandoned { channel, .. } => Some(*channel),
        BufferEvent::LaneHealthChanged { .. } | BufferEvent::PersistFailed { .. } => None,
    };
    json!({
        "t_ms": report.now_ms,
        "event": ev.kind(),
        "channel": channel,
        "detail": format!("{ev:?}"),
    })
}

fn channel_json(ch: ChannelId, report: Option<&TickReport>, bench: &SimBench) -> serde_json::Value {
    let snap = bench.snapshot().ok();
    json!({
        "channel": ch,
        "state": report.map(|r| format!("{:?}", r.states[ch])),
        "command": report.map(|r| format!("{:?}", r.commands[ch])),
        "presence": report.map(|r| format!("{:?}", r.presence[ch])),
        "pressure_v": report.map(|r| r.pressure_v[ch]),
        "online": report.map(|r| r.online[ch]),
        "travelled_mm": snap.map(|s| s.travelled_mm[ch]),
    })
}

pub fn run(
    cfg: &filabuf_config::Config,
    ticks: Option<u64>,
    sampler: bool,
    variant: Variant,
    script: Option<Script>,
    json_mode: bool,
    shutdown: &AtomicBool,
) -> eyre::Result<RunSummary> {
    let bench = sim_bench(cfg, variant);
    let mut player = ScriptPlayer::new(script, bench.clone());
    player.prepare();

    let buffer_cfg = BufferConfig::from(cfg);
    let mode = if sampler || cfg.tick.mode == filabuf_config::RunMode::Sampler {
        SamplingMode::Paced(buffer_cfg.tick_hz)
    } else {
        SamplingMode::Direct
    };
    tracing::info!(?mode, ?variant, ?script, ticks, "starting simulated run");

    let store: Box<dyn ConfigStore + Send> = Box::new(FileStore::new(&cfg.store.path));
    let indicator: Box<dyn IndicatorSink + Send> = Box::new(bench.indicator());
    let mut last: Option<TickReport> = None;
    let summary = filabuf_core::runner::run(
        bench.adc(),
        bench.encoders(),
        bench.drives(),
        bench.protocol(),
        buffer_cfg,
        Some(store),
        Some(indicator),
        RunOptions {
            mode,
            max_ticks: ticks,
        },
        shutdown,
        |report| {
            player.on_tick(report);
            for ev in &report.events {
                if json_mode {
                    println!("{}", event_json(report, ev));
                } else {
                    tracing::info!(t_ms = report.now_ms, event = ?ev, "buffer event");
                }
            }
            last = Some(report.clone());
        },
    )
    .wrap_err("control loop")?;

    if json_mode {
        let channels: Vec<_> = (0..CHANNELS)
            .map(|ch| channel_json(ch, last.as_ref(), &bench))
            .collect();
        println!(
            "{}",
            json!({
                "ticks": summary.ticks,
                "events": summary.events,
                "hw_errors": summary.hw_errors,
                "missed_samples": summary.missed_samples,
                "stalls": summary.stalls,
                "channels": channels,
            })
        );
    } else {
        println!(
            "run complete: {} ticks, {} events, {} hardware errors, {} missed samples",
            summary.ticks, summary.events, summary.hw_errors, summary.missed_samples
        );
        let snap = bench.snapshot().ok();
        for ch in 0..CHANNELS {
            let travelled = snap.map_or(0.0, |s| s.travelled_mm[ch]);
            match &last {
                Some(r) => println!(
                    "  ch{ch}: {:?} / {:?}, presence {:?}, {:.2} V, travelled {travelled:.1} mm",
                    r.states[ch], r.commands[ch], r.presence[ch], r.pressure_v[ch]
                ),
                None => println!("  ch{ch}: no ticks run"),
            }
        }
    }
    Ok(summary)
}

fn load_state(store: &mut FileStore) -> eyre::Result<Option<PersistedState>> {
    let blob = store
        .load()
        .map_err(|e| eyre::Report::new(filabuf_core::hw_error::map_hw_error(e.as_ref())))
        .wrap_err("read persisted state")?;
    blob.map(|b| {
        persist::decode(&b)
            .map_err(eyre::Report::new)
            .wrap_err_with(|| format!("decode {}", store.path().display()))
    })
    .transpose()
}

fn print_state(state: &PersistedState, saved: bool, json_mode: bool) {
    if json_mode {
        let channels: Vec<_> = state
            .channels
            .iter()
            .enumerate()
            .map(|(ch, c)| {
                json!({
                    "channel": ch,
                    "direction": c.direction,
                    "learned": c.learned,
                    "loading_confirmed": c.loading_confirmed,
                    "zero_v": c.calibration.zero_v,
                    "positive_range_v": c.calibration.positive_range_v,
                    "negative_range_v": c.calibration.negative_range_v,
                    "samples": c.calibration.samples,
                    "calibrated": c.calibration.calibrated,
                })
            })
            .collect();
        println!("{}", json!({ "saved": saved, "channels": channels }));
        return;
    }
    if !saved {
        println!("no saved state; showing defaults");
    }
    for (ch, c) in state.channels.iter().enumerate() {
        let sign = if c.direction < 0 { '-' } else { '+' };
        let provenance = match (c.learned, c.loading_confirmed) {
            (true, true) => " (learned, loading confirmed)",
            (true, false) => " (learned)",
            (false, true) => " (loading confirmed)",
            (false, false) => "",
        };
        println!(
            "ch{ch}: direction {sign}1{provenance}, zero {:.3} V (+{:.3}/-{:.3}), {}",
            c.calibration.zero_v,
            c.calibration.positive_range_v,
            c.calibration.negative_range_v,
            if c.calibration.calibrated {
                format!("calibrated from {} samples", c.calibration.samples)
            } else {
                "uncalibrated".to_string()
            },
        );
    }
}

pub fn status(cfg: &filabuf_config::Config, json_mode: bool) -> eyre::Result<()> {
    let mut store = FileStore::new(&cfg.store.path);
    match load_state(&mut store)? {
        Some(state) => print_state(&state.normalized(), true, json_mode),
        None => print_state(&PersistedState::defaults(), false, json_mode),
    }
    Ok(())
}

pub fn reset_directions(
    cfg: &filabuf_config::Config,
    channel: Option<usize>,
    json_mode: bool,
) -> eyre::Result<()> {
    let bench = sim_bench(cfg, Variant::default());
    let mut buffer = build_on_bench(&bench, cfg, Some(FileStore::new(&cfg.store.path)))?;
    match channel {
        Some(ch) => buffer.reset_direction(ch)?,
        None => buffer.reset_all_directions()?,
    }
    tracing::info!(?channel, "directions reset");
    print_state(&buffer.persisted_state(), true, json_mode);
    Ok(())
}

pub fn self_check(cfg: &filabuf_config::Config, json_mode: bool) -> eyre::Result<bool> {
    let bench = sim_bench(cfg, Variant::default());
    let mut buffer = build_on_bench(&bench, cfg, None)?;
    let report = buffer.step();
    let gates = buffer.gates();
    let ok = report.link_ok && report.hw_errors.is_empty() && report.healthy.iter().all(|h| *h);

    if json_mode {
        println!(
            "{}",
            json!({
                "ok": ok,
                "link_ok": report.link_ok,
                "healthy_lanes": report.healthy.iter().filter(|h| **h).count(),
                "hw_errors": report.hw_errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "calibration": gates.calibration,
                "learning": gates.learning,
                "loading": gates.loading,
            })
        );
    } else {
        println!(
            "lanes healthy: {}/{}",
            report.healthy.iter().filter(|h| **h).count(),
            report.healthy.len()
        );
        for e in &report.hw_errors {
            println!("hardware: {e}");
        }
        println!(
            "features: calibration={} learning={} loading={}",
            gates.calibration, gates.learning, gates.loading
        );
        println!("{}", if ok { "self-check ok" } else { "self-check FAILED" });
    }
    Ok(ok)
}
