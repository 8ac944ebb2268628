#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Control core for a four-channel filament buffer (hardware-agnostic).
//!
//! All hardware interactions go through the traits in `filabuf_traits`:
//! `SampleSource`, `RotarySensor`, `MotorDrive`, `ProtocolLink`, and the
//! optional `ConfigStore` and `IndicatorSink`.
//!
//! ## Architecture
//!
//! - **Filtering**: block averaging, outlier rejection, health tracking (`filter`)
//! - **Presence**: switch voltage classification (`presence`)
//! - **Position**: wrap-aware roller displacement (`position`)
//! - **Pressure**: zero-point calibration and deadband (`pressure`)
//! - **Learning**: motor polarity discovery (`learning`, `bringup`)
//! - **Motors**: per-channel speed/pressure PID loops (`motor`, `pid`)
//! - **Scheduling**: per-channel lifecycle from printer requests (`scheduler`)
//! - **Persistence**: versioned state blob (`persist`)
//!
//! `BufferCore` ties these together in one deterministic tick; `FilamentBuffer`
//! is its boxed form and `runner::run` drives either at a fixed rate.

pub mod bringup;
pub mod builder;
pub mod config;
pub mod conversions;
pub mod core;
pub mod error;
pub mod filter;
pub mod hw_error;
pub mod learning;
pub mod mocks;
pub mod motor;
pub mod persist;
pub mod pid;
pub mod position;
pub mod presence;
pub mod pressure;
pub mod runner;
pub mod sampler;
pub mod scheduler;
pub mod status;
pub mod types;
pub mod util;

pub use crate::builder::{
    FilamentBuffer, FilamentBufferBuilder, FilamentBufferG, Missing, Set, build_buffer,
};
pub use crate::config::{
    AssistCfg, BringupCfg, BufferConfig, FilterCfg, LearningCfg, LoadingCfg, MotorCfg, PidGains,
    PositionCfg, PresenceCfg, PresenceMode, PressureCfg, PressureShaping, SchedulerCfg,
};
pub use crate::core::{BufferCore, FeatureGates};
pub use crate::error::{BufferError, BuildError, PersistError, Report, Result};
pub use crate::status::{BufferEvent, LearningStatus, TickReport};
pub use crate::types::{
    ChannelMotionState, Direction, FilamentMotionCommand, PresenceStatus, PressureStatus,
};
