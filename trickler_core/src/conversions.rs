//! `From` implementations bridging `trickler_config` types to `trickler_core` types.

use crate::calibration::CalibrationModel;
use crate::config::{MotionCfg, ScaleCfg, TimingCfg};

// ── ScaleCfg ─────────────────────────────────────────────────────────────────

impl From<&trickler_config::SerialCfg> for ScaleCfg {
    fn from(c: &trickler_config::SerialCfg) -> Self {
        Self {
            response_timeout_ms: c.response_timeout_ms,
            min_response_bytes: c.min_response_bytes,
            zero_settle_ms: c.zero_settle_ms,
            id_attempts: c.id_attempts,
            poll_ms: 1,
        }
    }
}

// ── MotionCfg ────────────────────────────────────────────────────────────────

impl From<&trickler_config::MotionCfg> for MotionCfg {
    fn from(c: &trickler_config::MotionCfg) -> Self {
        Self {
            retract_steps: c.retract_steps,
            recovery_steps: c.recovery_steps,
            max_bulk_grains: c.max_bulk_grains,
            poll_ms: c.poll_ms,
        }
    }
}

// ── TimingCfg ────────────────────────────────────────────────────────────────

impl From<&trickler_config::TimingCfg> for TimingCfg {
    fn from(c: &trickler_config::TimingCfg) -> Self {
        Self {
            long_ms: c.long_ms,
            short_ms: c.short_ms,
            ready_ms: c.ready_ms,
            calibration_ms: c.calibration_ms,
            settle_max_ms: c.settle_max_ms,
            settle_window_ms: c.settle_window_ms,
            debounce_ms: c.debounce_ms,
            evaluate_debounce_ms: c.evaluate_debounce_ms,
            recalibrate_hold_ms: c.recalibrate_hold_ms,
            bulk_settle_ms: c.bulk_settle_ms,
            tick_ms: c.tick_ms,
        }
    }
}

// ── CalibrationModel ─────────────────────────────────────────────────────────

impl From<&trickler_config::CalibrationCfg> for CalibrationModel {
    fn from(c: &trickler_config::CalibrationCfg) -> Self {
        CalibrationModel::new(
            c.grains_per_rev,
            c.kernel_weight,
            c.second_bulk_fraction,
            c.error_margin,
        )
    }
}
