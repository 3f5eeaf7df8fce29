//! Maps `Box<dyn Error>` from trait boundaries to typed scale and motion errors.
//!
//! The traits in `trickler_traits` use `Box<dyn Error + Send + Sync>`; this
//! module converts those, with a feature-gated path for
//! `trickler_hardware::HwError` downcasting.

use crate::error::{MotionError, ScaleError};

/// Map a serial-port error to a typed `ScaleError`.
pub fn map_link_error(e: &(dyn std::error::Error + 'static)) -> ScaleError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<trickler_hardware::error::HwError>() {
            return match hw {
                trickler_hardware::error::HwError::Timeout => ScaleError::Timeout,
                other => ScaleError::Link(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        ScaleError::Timeout
    } else {
        ScaleError::Link(s)
    }
}

/// Map a motor-driver error to `MotionError::Driver`.
pub fn map_driver_error(e: &(dyn std::error::Error + 'static)) -> MotionError {
    MotionError::Driver(e.to_string())
}
