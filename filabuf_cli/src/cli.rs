//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use filabuf_traits::DeviceVariant;
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "filabuf", version, about = "Filament buffer controller")]
pub struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE", default_value = "etc/filabuf.toml")]
    pub config: PathBuf,

    /// Log and report as JSON lines instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Printer family emulated by the simulated bus.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum Variant {
    #[default]
    FamilyA,
    FamilyB,
}

impl From<Variant> for DeviceVariant {
    fn from(v: Variant) -> Self {
        match v {
            Variant::FamilyA => Self::FamilyA,
            Variant::FamilyB => Self::FamilyB,
        }
    }
}

/// Canned printer behaviour played against the simulated bench.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum Script {
    /// Insert filament into channel 0 and leave it idle
    Insert,
    /// Feed channel 0 to the toolhead, then print from it
    Feed,
    /// Print from channel 0, then unload it
    Retract,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the control loop against the simulated bench
    Run {
        /// Stop after this many ticks (default: until Ctrl-C)
        #[arg(long, value_name = "N")]
        ticks: Option<u64>,
        /// Acquire samples on a background thread
        #[arg(long, action = ArgAction::SetTrue)]
        sampler: bool,
        /// Printer family to emulate
        #[arg(long, value_enum, default_value_t = Variant::FamilyA)]
        variant: Variant,
        /// Printer behaviour to simulate
        #[arg(long, value_enum)]
        script: Option<Script>,
    },
    /// Print the persisted directions and calibrations
    Status,
    /// Forget learned motor directions and persist
    ResetDirections {
        /// Only reset this channel
        #[arg(long, value_name = "N")]
        channel: Option<usize>,
    },
    /// Build against the simulator, run one tick and report health
    SelfCheck,
}
