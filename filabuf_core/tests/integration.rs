mod common;

use common::{NEUTRAL, Rig};
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use filabuf_core::learning::LoadingPhase;
use filabuf_core::mocks::MemoryStore;
use filabuf_core::persist::{self, PersistedState};
use filabuf_core::{
    BufferConfig, BufferError, BufferEvent, ChannelMotionState, Direction, FilamentMotionCommand,
};
use filabuf_traits::{CHANNELS, ConfigStore, Indication, RequestedMotion};

fn stored(store: &MemoryStore) -> PersistedState {
    let blob = store.contents().expect("nothing was persisted");
    persist::decode(&blob).expect("persisted blob must decode")
}

#[test]
fn feed_request_drives_only_the_active_channel() {
    let rig = Rig::new();
    rig.load(0);
    rig.load(1);
    rig.select(0);
    rig.request(0, RequestedMotion::NeedSendOut);
    let mut buf = rig.buffer(BufferConfig::default()).build().unwrap();

    let mut last = None;
    for _ in 0..20 {
        last = Some(rig.tick(&mut buf));
    }
    let r = last.unwrap();
    assert_eq!(r.states[0], ChannelMotionState::SendingOut);
    assert_eq!(r.commands[0], FilamentMotionCommand::Send);
    assert!(r.drives[0] > 0, "drive {}", r.drives[0]);
    assert_eq!(r.commands[1], FilamentMotionCommand::PressureCtrlIdle);
    assert_eq!(r.drives[1], 0);
    assert_eq!(r.online, [true, true, false, false]);
    assert!(rig.with(|w| w.travelled_mm[0] > 1.0));
    assert!(rig.with(|w| w.indications.contains(&(0, Indication::Feeding))));
}

#[test]
fn unfinished_retraction_preempts_scheduling_on_family_a() {
    let rig = Rig::new();
    rig.load(0);
    rig.load(1);
    rig.select(0);
    rig.request(0, RequestedMotion::NeedPullBack);
    let mut buf = rig.buffer(BufferConfig::default()).build().unwrap();

    rig.tick_until(&mut buf, 10, |r| r.states[0] == ChannelMotionState::PullingBack)
        .expect("retraction never started");

    // printer moves on to channel 1 before channel 0 is clear
    rig.select(1);
    rig.request(1, RequestedMotion::NeedSendOut);
    for _ in 0..5 {
        let r = rig.tick(&mut buf);
        assert_eq!(r.commands[0], FilamentMotionCommand::Pull);
        assert_ne!(r.commands[1], FilamentMotionCommand::Send);
        assert!(r.drives[0] < 0);
    }

    let done = rig
        .tick_until(&mut buf, 3_000, |r| {
            r.events
                .contains(&BufferEvent::RetractionComplete { channel: 0 })
        })
        .expect("retraction never completed");
    assert_eq!(done.commands[0], FilamentMotionCommand::Stop);
    assert!(rig.with(|w| w.travelled_mm[0] <= -190.0));

    let next = rig.tick(&mut buf);
    assert_eq!(next.commands[1], FilamentMotionCommand::Send);
}

#[test]
fn link_loss_parks_every_motor() {
    let rig = Rig::new();
    rig.load(0);
    rig.request(0, RequestedMotion::NeedSendOut);
    let mut buf = rig.buffer(BufferConfig::default()).build().unwrap();
    for _ in 0..10 {
        rig.tick(&mut buf);
    }

    rig.with(|w| w.link_ok = false);
    let r = rig.tick(&mut buf);
    assert!(!r.link_ok);
    assert_eq!(r.commands, [FilamentMotionCommand::Stop; CHANNELS]);
    assert_eq!(r.drives, [0; CHANNELS]);
    assert_eq!(r.online, [false; CHANNELS]);
    assert_eq!(rig.with(|w| w.drives), [0; CHANNELS]);
}

#[test]
fn learned_direction_is_persisted_and_restored() {
    let rig = Rig::new();
    rig.with(|w| w.reversed[2] = true);
    rig.load(2);
    rig.select(2);
    rig.request(2, RequestedMotion::NeedSendOut);
    let store = MemoryStore::new();
    let mut buf = rig
        .buffer(BufferConfig::default())
        .with_store(store.clone())
        .build()
        .unwrap();

    let r = rig
        .tick_until(&mut buf, 500, |r| {
            r.events.iter().any(|e| {
                matches!(e, BufferEvent::DirectionLearned { channel: 2, .. })
            })
        })
        .expect("direction was never learned");
    assert!(r.events.iter().any(|e| matches!(
        e,
        BufferEvent::DirectionLearned {
            channel: 2,
            direction: Direction::Reverse,
            ..
        }
    )));
    assert_eq!(buf.direction(2).unwrap(), Direction::Reverse);
    assert!(buf.is_learned(2).unwrap());
    let status = buf.direction_learning_status(2).unwrap();
    assert_eq!(status.direction, Direction::Reverse);
    assert!(status.learned);
    assert_eq!(status.session, None);
    assert!(!buf.direction_learning_status(0).unwrap().learned);

    let state = stored(&store);
    assert_eq!(state.channels[2].direction, -1);
    assert!(state.channels[2].learned);

    // the corrected polarity now feeds forward
    let before = rig.with(|w| w.travelled_mm[2]);
    for _ in 0..50 {
        rig.tick(&mut buf);
    }
    assert!(rig.with(|w| w.travelled_mm[2]) > before);

    let rebooted = Rig::new()
        .buffer(BufferConfig::default())
        .with_store(store.clone())
        .build()
        .unwrap();
    assert_eq!(rebooted.direction(2).unwrap(), Direction::Reverse);
    assert!(rebooted.is_learned(2).unwrap());
    assert!(!rebooted.is_learned(0).unwrap());
}

#[test]
fn reset_direction_forgets_and_persists() {
    let mut state = PersistedState::defaults();
    state.channels[1].direction = -1;
    state.channels[1].learned = true;
    let store = MemoryStore::with_blob(persist::encode(&state).unwrap());

    let rig = Rig::new();
    let mut buf = rig
        .buffer(BufferConfig::default())
        .with_store(store.clone())
        .build()
        .unwrap();
    assert_eq!(buf.direction(1).unwrap(), Direction::Reverse);

    buf.reset_direction(1).unwrap();
    assert_eq!(buf.direction(1).unwrap(), Direction::Forward);
    assert!(!buf.is_learned(1).unwrap());
    let after = stored(&store);
    assert_eq!(after.channels[1].direction, 1);
    assert!(!after.channels[1].learned);
}

#[test]
fn corrupt_store_falls_back_to_defaults() {
    let store = MemoryStore::with_blob(vec![0xde, 0xad, 0xbe, 0xef, 0, 0, 1]);
    let buf = Rig::new()
        .buffer(BufferConfig::default())
        .with_store(store)
        .build()
        .unwrap();
    for ch in 0..CHANNELS {
        assert_eq!(buf.direction(ch).unwrap(), Direction::Forward);
        assert!(!buf.calibration(ch).unwrap().calibrated);
    }
}

#[test]
fn out_of_range_channel_is_a_typed_error() {
    let buf = Rig::new().buffer(BufferConfig::default()).build().unwrap();
    let err = buf.direction(CHANNELS).unwrap_err();
    match err.downcast_ref::<BufferError>() {
        Some(BufferError::InvalidChannel(4)) => {}
        other => panic!("expected InvalidChannel, got {other:?}"),
    }
}

#[test]
fn offline_rotary_degrades_channels() {
    let rig = Rig::new();
    rig.load(0);
    rig.with(|w| w.rotary_online = false);
    let mut buf = rig.buffer(BufferConfig::default()).build().unwrap();
    let r = rig.tick(&mut buf);
    assert_eq!(r.degraded, [true; CHANNELS]);
    assert_eq!(r.online, [false; CHANNELS]);
    assert!(rig.with(|w| w.indications.contains(&(0, Indication::Degraded))));
}

#[test]
fn idle_empty_channels_calibrate_and_persist() {
    let rig = Rig::new();
    rig.set_pull(3, 1.60);
    let store = MemoryStore::new();
    let mut buf = rig
        .buffer(BufferConfig::default())
        .with_store(store.clone())
        .build()
        .unwrap();

    rig.tick_until(&mut buf, 400, |r| {
        r.events.iter().any(|e| {
            matches!(e, BufferEvent::CalibrationCompleted { channel: 3, .. })
        })
    })
    .expect("calibration never completed");

    let cal = buf.calibration(3).unwrap();
    assert!(cal.calibrated);
    assert!((cal.zero_v - 1.60).abs() < 0.01, "zero {}", cal.zero_v);
    let (low, high) = buf.deadband(3).unwrap();
    assert!(low < cal.zero_v && cal.zero_v < high);

    let state = stored(&store);
    assert!(state.channels[3].calibration.calibrated);
}

#[test]
fn loaded_channel_is_never_calibrated() {
    let rig = Rig::new();
    rig.load(1);
    rig.set_pull(1, NEUTRAL);
    let mut buf = rig.buffer(BufferConfig::default()).build().unwrap();
    for _ in 0..400 {
        let r = rig.tick(&mut buf);
        assert!(!r.events.iter().any(|e| matches!(
            e,
            BufferEvent::CalibrationCompleted { channel: 1, .. }
        )));
    }
    assert!(!buf.calibration(1).unwrap().calibrated);
}

#[test]
fn acquisition_failures_are_absorbed() {
    let rig = Rig::new();
    rig.load(0);
    let mut buf = rig.buffer(BufferConfig::default()).build().unwrap();
    rig.tick(&mut buf);

    rig.with(|w| w.poll_fails = true);
    let mut saw_unhealthy = false;
    for _ in 0..10 {
        let r = rig.tick(&mut buf);
        assert!(!r.hw_errors.is_empty());
        saw_unhealthy |= r.events.iter().any(|e| {
            matches!(e, BufferEvent::LaneHealthChanged { healthy: false, .. })
        });
    }
    assert!(saw_unhealthy);
    let r = rig.tick(&mut buf);
    assert_eq!(r.degraded, [true; CHANNELS]);

    // recovery needs clean blocks again
    rig.with(|w| w.poll_fails = false);
    let healed = rig.tick_until(&mut buf, 50, |r| r.degraded == [false; CHANNELS]);
    assert!(healed.is_some());
}

#[test]
fn stop_all_zeroes_outputs() {
    let rig = Rig::new();
    rig.load(0);
    rig.request(0, RequestedMotion::NeedSendOut);
    let mut buf = rig.buffer(BufferConfig::default()).build().unwrap();
    for _ in 0..10 {
        rig.tick(&mut buf);
    }
    assert_ne!(rig.with(|w| w.drives[0]), 0);
    buf.stop_all().unwrap();
    assert_eq!(rig.with(|w| w.drives), [0; CHANNELS]);
}

fn loading_confirmation(r: &filabuf_core::TickReport, ch: usize) -> Option<Direction> {
    r.events.iter().find_map(|e| match e {
        BufferEvent::LoadingDirectionConfirmed { channel, direction } if *channel == ch => {
            Some(*direction)
        }
        _ => None,
    })
}

#[test]
fn idle_insertion_does_not_confirm_loading_direction() {
    let rig = Rig::new();
    rig.with(|w| w.reversed[0] = true);
    let mut buf = rig.buffer(BufferConfig::default()).build().unwrap();
    for _ in 0..10 {
        rig.tick(&mut buf);
    }
    rig.load(0);
    rig.select(0);
    for _ in 0..400 {
        let r = rig.tick(&mut buf);
        assert_eq!(loading_confirmation(&r, 0), None);
        assert_eq!(r.drives[0], 0);
    }
    let status = buf.direction_learning_status(0).unwrap();
    assert_eq!(status.loading, LoadingPhase::Idle);
    assert!(!status.loading_confirmed);
    assert!(!status.learned);
}

#[test]
fn reversed_motor_is_corrected_before_loading_is_confirmed() {
    let rig = Rig::new();
    rig.with(|w| w.reversed[0] = true);
    let store = MemoryStore::new();
    let mut buf = rig
        .buffer(BufferConfig::default())
        .with_store(store.clone())
        .build()
        .unwrap();
    rig.load(0);
    rig.select(0);
    for _ in 0..400 {
        rig.tick(&mut buf);
    }
    rig.request(0, RequestedMotion::NeedSendOut);

    let r = rig
        .tick_until(&mut buf, 1000, |r| loading_confirmation(r, 0).is_some())
        .expect("loading direction never confirmed");
    assert_eq!(loading_confirmation(&r, 0), Some(Direction::Reverse));
    assert_eq!(buf.direction(0).unwrap(), Direction::Reverse);
    let status = buf.direction_learning_status(0).unwrap();
    assert!(status.learned);
    assert!(status.loading_confirmed);

    let state = stored(&store);
    assert_eq!(state.channels[0].direction, -1);
    assert!(state.channels[0].learned);
    assert!(state.channels[0].loading_confirmed);

    let before = rig.with(|w| w.travelled_mm[0]);
    for _ in 0..100 {
        rig.tick(&mut buf);
    }
    assert!(rig.with(|w| w.travelled_mm[0]) > before + 10.0);
}

/// Correlation learning that never gathers enough samples to finish.
fn slow_learning() -> BufferConfig {
    let mut cfg = BufferConfig::default();
    cfg.learning.min_samples = 10_000;
    cfg.learning.timeout_ms = 60_000;
    cfg
}

#[test]
fn ejected_filament_flips_loading_direction() {
    let rig = Rig::new();
    rig.with(|w| w.reversed[0] = true);
    rig.load(0);
    rig.select(0);
    rig.request(0, RequestedMotion::NeedSendOut);
    let store = MemoryStore::new();
    let mut buf = rig
        .buffer(slow_learning())
        .with_store(store.clone())
        .build()
        .unwrap();

    let mut monitoring = false;
    for _ in 0..200 {
        rig.tick(&mut buf);
        let phase = buf.direction_learning_status(0).unwrap().loading;
        if matches!(phase, LoadingPhase::Monitoring { tested: Direction::Forward, .. }) {
            monitoring = true;
            break;
        }
    }
    assert!(monitoring, "detection never reached monitoring");

    // the wrong polarity drags the filament back out of the buffer
    rig.unload(0);
    let r = rig
        .tick_until(&mut buf, 50, |r| loading_confirmation(r, 0).is_some())
        .expect("ejection was not detected");
    assert_eq!(loading_confirmation(&r, 0), Some(Direction::Reverse));
    assert_eq!(buf.direction(0).unwrap(), Direction::Reverse);
    let status = buf.direction_learning_status(0).unwrap();
    assert!(status.loading_confirmed);
    assert!(!status.learned);

    let state = stored(&store);
    assert_eq!(state.channels[0].direction, -1);
    assert!(state.channels[0].loading_confirmed);
    assert!(!state.channels[0].learned);

    // reinserted filament now feeds, and correlation learning still runs
    rig.load(0);
    let before = rig.with(|w| w.travelled_mm[0]);
    for _ in 0..100 {
        rig.tick(&mut buf);
    }
    assert!(rig.with(|w| w.travelled_mm[0]) > before + 10.0);
    let status = buf.direction_learning_status(0).unwrap();
    assert!(status.session.is_some(), "correlation learning stopped");
    assert_eq!(status.loading, LoadingPhase::Complete(Direction::Reverse));

    let rebooted = Rig::new()
        .buffer(slow_learning())
        .with_store(store.clone())
        .build()
        .unwrap();
    let status = rebooted.direction_learning_status(0).unwrap();
    assert_eq!(status.direction, Direction::Reverse);
    assert!(status.loading_confirmed);
}

#[test]
fn held_insertion_keeps_tested_direction() {
    let rig = Rig::new();
    rig.load(1);
    rig.select(1);
    rig.request(1, RequestedMotion::NeedSendOut);
    let mut buf = rig.buffer(slow_learning()).build().unwrap();

    let r = rig
        .tick_until(&mut buf, 400, |r| loading_confirmation(r, 1).is_some())
        .expect("loading direction never confirmed");
    assert_eq!(loading_confirmation(&r, 1), Some(Direction::Forward));
    assert_eq!(buf.direction(1).unwrap(), Direction::Forward);
    assert!(buf.direction_learning_status(1).unwrap().loading_confirmed);
    assert!(!buf.is_learned(1).unwrap());
}

#[test]
fn implausible_stored_calibration_is_ignored() {
    let mut blob = Vec::new();
    blob.extend_from_slice(&persist::STATE_MAGIC.to_le_bytes());
    blob.extend_from_slice(&persist::STATE_VERSION.to_le_bytes());
    blob.extend_from_slice(
        br#"
[[channels]]
direction = 1
[channels.calibration]
zero_v = 1.65
positive_range_v = 0.0
negative_range_v = 0.6
samples = 40
calibrated = true

[[channels]]
direction = 1
[channels.calibration]
zero_v = nan
positive_range_v = 0.6
negative_range_v = 0.6
samples = 40
calibrated = true

[[channels]]
direction = -1
[channels.calibration]
zero_v = 1.58
positive_range_v = 0.8
negative_range_v = 0.8
samples = 40
calibrated = true
"#,
    );
    let buf = Rig::new()
        .buffer(BufferConfig::default())
        .with_store(MemoryStore::with_blob(blob))
        .build()
        .unwrap();

    for ch in 0..CHANNELS {
        let zero = buf.calibration(ch).unwrap().zero_v;
        let (low, high) = buf.deadband(ch).unwrap();
        assert!(low < zero && zero < high, "ch{ch}: {low} < {zero} < {high}");
    }
    assert!(!buf.calibration(0).unwrap().calibrated);
    assert!(!buf.calibration(1).unwrap().calibrated);
    let kept = buf.calibration(2).unwrap();
    assert!(kept.calibrated);
    assert!((kept.zero_v - 1.58).abs() < 1e-6);
    assert_eq!(buf.direction(2).unwrap(), Direction::Reverse);
}

/// Store whose writes fail while `failing` is raised.
#[derive(Clone, Default)]
struct FlakyStore {
    inner: MemoryStore,
    failing: Arc<AtomicBool>,
}

impl ConfigStore for FlakyStore {
    fn load(&mut self) -> Result<Option<Vec<u8>>, Box<dyn Error + Send + Sync>> {
        self.inner.load()
    }

    fn save(&mut self, blob: &[u8]) -> Result<(), Box<dyn Error + Send + Sync>> {
        if self.failing.load(Ordering::Relaxed) {
            return Err("flash busy".into());
        }
        self.inner.save(blob)
    }
}

#[test]
fn failed_write_is_flushed_later() {
    let rig = Rig::new();
    let store = FlakyStore::default();
    store.failing.store(true, Ordering::Relaxed);
    let mut buf = rig
        .buffer(BufferConfig::default())
        .with_store(store.clone())
        .build()
        .unwrap();
    buf.flush_state().unwrap();
    assert!(!buf.has_unsaved_state());

    rig.tick_until(&mut buf, 400, |r| {
        r.events
            .iter()
            .any(|e| matches!(e, BufferEvent::PersistFailed { .. }))
    })
    .expect("calibration never tried to persist");
    assert!(buf.has_unsaved_state());
    assert!(store.inner.contents().is_none());
    assert!(buf.flush_state().is_err());

    store.failing.store(false, Ordering::Relaxed);
    buf.flush_state().unwrap();
    assert!(!buf.has_unsaved_state());
    let state = stored(&store.inner);
    assert!(state.channels.iter().any(|c| c.calibration.calibrated));
}

#[test]
fn failed_bringup_falls_back_to_correction_table() {
    let rig = Rig::new();
    rig.with(|w| w.drive_fails = true);
    let mut cfg = BufferConfig::default();
    cfg.learning.auto = false;
    let mut buf = rig.buffer(cfg).build().unwrap();

    let results = buf.bring_up();
    assert_eq!(results.len(), CHANNELS);
    let expected = [
        Direction::Forward,
        Direction::Reverse,
        Direction::Reverse,
        Direction::Forward,
    ];
    for (ch, outcome) in results {
        assert_eq!(outcome.measured, None);
        assert_eq!(outcome.applied, expected[ch]);
        assert_eq!(buf.direction(ch).unwrap(), expected[ch]);
    }
    assert!(buf.stop_all().is_err());
}
