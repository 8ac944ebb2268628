//! Human-readable error descriptions, structured JSON errors and exit codes.

use filabuf_core::error::{BufferError, BuildError, PersistError};

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingSource
            | BuildError::MissingRotary
            | BuildError::MissingDrive
            | BuildError::MissingLink => format!(
                "What happened: The controller was assembled without a device ({be}).\nLikely causes: A simulated or hardware device failed to initialize.\nHow to fix: Re-run with --log-level=debug and check the device setup messages."
            ),
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/filabuf.toml for a sample."
            ),
        };
    }

    if let Some(pe) = err.downcast_ref::<PersistError>() {
        return format!(
            "What happened: The saved state could not be decoded ({pe}).\nLikely causes: The state file was written by another tool or is damaged.\nHow to fix: Delete the file named in [store] path; the controller starts unlearned and relearns directions."
        );
    }

    if let Some(de) = err.downcast_ref::<BufferError>() {
        return match de {
            BufferError::InvalidChannel(ch) => format!(
                "What happened: Channel {ch} does not exist.\nHow to fix: Use a channel between 0 and {}.",
                filabuf_traits::CHANNELS - 1
            ),
            BufferError::Persistence(msg) => format!(
                "What happened: The state store failed ({msg}).\nLikely causes: Missing directory permissions or a full disk.\nHow to fix: Check the [store] path in the config."
            ),
            BufferError::Config(msg) if msg.starts_with("read config") => format!(
                "What happened: The config file could not be read ({msg}).\nHow to fix: Pass an existing file with --config FILE."
            ),
            BufferError::Config(msg) => format!(
                "What happened: Configuration is invalid ({msg}).\nLikely causes: A wrong type or out-of-range value in the TOML.\nHow to fix: Fix the reported key and try again."
            ),
            BufferError::Timeout => "What happened: A device did not answer in time.\nLikely causes: Wiring, power or bus contention.\nHow to fix: Check the device connections and rerun.".to_string(),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // Generic fallback
    let msg = err.to_string();
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes; clap already uses 2 for usage errors.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if err.downcast_ref::<BuildError>().is_some() {
        return 3;
    }
    if err.downcast_ref::<PersistError>().is_some() {
        return 4;
    }
    if let Some(de) = err.downcast_ref::<BufferError>() {
        return match de {
            BufferError::InvalidChannel(_) => 2,
            BufferError::Config(_) => 3,
            BufferError::Persistence(_) => 4,
            BufferError::Hardware(_) | BufferError::HardwareFault(_) | BufferError::Timeout => 5,
        };
    }
    1
}

/// Name of the error class reported in JSON mode.
fn reason_name(err: &eyre::Report) -> &'static str {
    match exit_code_for_error(err) {
        2 => "InvalidChannel",
        3 => "Config",
        4 => "Persistence",
        5 => "Hardware",
        _ => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    serde_json::json!({
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    })
    .to_string()
}
