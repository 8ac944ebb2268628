#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Devices behind the capability traits: a simulated bench for host runs and
//! a file-backed store for the persisted state blob.
pub mod error;
pub mod sim;
pub mod store;
pub mod util;

pub use error::HwError;
pub use sim::{BenchSnapshot, SimAdc, SimBench, SimDrives, SimEncoders, SimIndicator, SimParams, SimProtocol};
pub use store::FileStore;
