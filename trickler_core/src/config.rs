//! Runtime configuration structs used by the state machine.
//!
//! These are separate from the TOML-deserialized config in `trickler_config`;
//! see `conversions.rs` for the bridge.

/// Serial protocol timing for the balance.
#[derive(Debug, Clone)]
pub struct ScaleCfg {
    /// Give up on a `PRT` response after this long.
    pub response_timeout_ms: u64,
    /// A response is complete once this many bytes are buffered.
    pub min_response_bytes: usize,
    /// Pause after the re-zero command.
    pub zero_settle_ms: u64,
    /// Number of `?ID` probes before identification gives up.
    pub id_attempts: u32,
    /// Poll interval while waiting on the port.
    pub poll_ms: u64,
}

impl Default for ScaleCfg {
    fn default() -> Self {
        Self {
            response_timeout_ms: 500,
            min_response_bytes: 10,
            zero_settle_ms: 50,
            id_attempts: 100,
            poll_ms: 1,
        }
    }
}

/// Motion sequencing parameters.
#[derive(Debug, Clone)]
pub struct MotionCfg {
    /// Bulk retraction after each throw (steps).
    pub retract_steps: i64,
    /// Forward re-advance after retraction (steps).
    pub recovery_steps: i64,
    /// Bulk requests above this are refused.
    pub max_bulk_grains: f32,
    /// Poll interval while waiting on a motor.
    pub poll_ms: u64,
}

impl Default for MotionCfg {
    fn default() -> Self {
        Self {
            retract_steps: 250,
            recovery_steps: 50,
            max_bulk_grains: 250.0,
            poll_ms: 1,
        }
    }
}

/// Stability windows and operator timings (ms).
#[derive(Debug, Clone)]
pub struct TimingCfg {
    pub long_ms: u64,
    pub short_ms: u64,
    pub ready_ms: u64,
    pub calibration_ms: u64,
    /// Upper bound on the post-trickle settle poll.
    pub settle_max_ms: u64,
    /// Window used for in-motion and settle checks.
    pub settle_window_ms: u64,
    pub debounce_ms: u64,
    pub evaluate_debounce_ms: u64,
    pub recalibrate_hold_ms: u64,
    /// Pause between calibration bulk throws.
    pub bulk_settle_ms: u64,
    /// Run-loop period between state steps.
    pub tick_ms: u64,
}

impl Default for TimingCfg {
    fn default() -> Self {
        Self {
            long_ms: 500,
            short_ms: 350,
            ready_ms: 750,
            calibration_ms: 2000,
            settle_max_ms: 1500,
            settle_window_ms: 50,
            debounce_ms: 250,
            evaluate_debounce_ms: 100,
            recalibrate_hold_ms: 2000,
            bulk_settle_ms: 500,
            tick_ms: 10,
        }
    }
}
