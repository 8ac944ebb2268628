//! Maps `Box<dyn Error>` from trait boundaries to typed `BufferError`.
//!
//! The traits in `filabuf_traits` use `Box<dyn Error + Send + Sync>`; this
//! module converts those to our typed error enum, with an optional
//! feature-gated path for `filabuf_hardware::HwError` downcasting.

use crate::error::BufferError;

/// Map a trait-boundary error to a typed `BufferError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> BufferError {
    #[cfg(feature = "hardware-errors")]
    {
        use filabuf_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Timeout => BufferError::Timeout,
                HwError::Store(msg) => BufferError::Persistence(msg.clone()),
                other => BufferError::HardwareFault(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        BufferError::Timeout
    } else {
        BufferError::Hardware(s)
    }
}
