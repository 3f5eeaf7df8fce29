//! Bench calibration: measure the bulk auger's yield per revolution and the
//! trickler's weight per kernel, committing only plausible results.

use trickler_traits::{Lights, Screen};

use crate::calibration::{CalibrationModel, calibrated_estimate};
use crate::config::TimingCfg;
use crate::error::MotionError;
use crate::rig::Rig;

/// Kernels dropped to fill the trickler tube before measuring.
pub const PRIME_KERNELS: i64 = 40;
/// Bulk throws averaged for the yield estimate.
pub const BULK_THROWS: u32 = 4;
/// Kernels averaged for the kernel-weight estimate.
pub const TRICKLE_KERNELS: i64 = 200;

const BULK_RESULT_HOLD_MS: (u64, u64) = (1000, 2000);
const TRICKLE_RESULT_HOLD_MS: (u64, u64) = (2500, 2000);

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationReport {
    pub bulk_estimate: f32,
    pub bulk_committed: bool,
    pub kernel_estimate: f32,
    pub kernel_committed: bool,
}

/// Run the full bulk + trickle calibration for `target` grains per bulk throw.
///
/// Any motion or scale failure aborts the run; whatever had already been
/// committed stays.
pub fn run_calibration(
    rig: &mut Rig,
    model: &mut CalibrationModel,
    timing: &TimingCfg,
    target: f32,
) -> Result<CalibrationReport, MotionError> {
    rig.show(Screen::Calibrating);
    tracing::info!(target_gr = target, "calibration started");

    // prime both paths so the first measured throw is representative
    rig.start_trickle(PRIME_KERNELS)?;
    rig.bulk_throw(0.5 * model.grains_per_rev(), model.grains_per_rev())?;
    rig.wait_for_trickle(timing.settle_window_ms)?;

    rig.lights(Lights::YELLOW);
    let initial = rig.stable_weight(timing.calibration_ms)?;
    let grains_per_rev = model.grains_per_rev();
    for _ in 0..BULK_THROWS {
        rig.bulk_throw(target, grains_per_rev)?;
        rig.sleep_ms(timing.bulk_settle_ms);
    }
    let after_bulk = rig.stable_weight(timing.calibration_ms)?;
    let revs = target / grains_per_rev * BULK_THROWS as f32;
    let bulk_estimate = calibrated_estimate(after_bulk - initial, revs);
    let bulk_committed = model.commit_bulk_yield(bulk_estimate);
    tracing::info!(
        thrown = after_bulk - initial,
        revs,
        estimate = bulk_estimate,
        committed = bulk_committed,
        "bulk calibration"
    );
    rig.lights(if bulk_committed { Lights::GREEN } else { Lights::RED });
    rig.show(Screen::BulkCalibration {
        measured: bulk_estimate,
        grains_per_rev: model.grains_per_rev(),
    });
    rig.sleep_ms(if bulk_committed {
        BULK_RESULT_HOLD_MS.0
    } else {
        BULK_RESULT_HOLD_MS.1
    });

    rig.lights(Lights::YELLOW);
    rig.start_trickle(TRICKLE_KERNELS)?;
    rig.wait_for_trickle(timing.settle_window_ms)?;
    let after_trickle = rig.stable_weight(timing.calibration_ms)?;
    let kernel_estimate = calibrated_estimate(after_trickle - after_bulk, TRICKLE_KERNELS as f32);
    let kernel_committed = model.commit_kernel_weight(kernel_estimate);
    tracing::info!(
        thrown = after_trickle - after_bulk,
        estimate = kernel_estimate,
        committed = kernel_committed,
        margin = model.error_margin(),
        "trickle calibration"
    );
    rig.lights(if kernel_committed { Lights::GREEN } else { Lights::OFF });
    rig.show(Screen::TrickleCalibration {
        measured: kernel_estimate,
        kernel_weight: model.kernel_weight(),
    });
    rig.sleep_ms(if kernel_committed {
        TRICKLE_RESULT_HOLD_MS.0
    } else {
        TRICKLE_RESULT_HOLD_MS.1
    });
    rig.lights(Lights::OFF);

    Ok(CalibrationReport {
        bulk_estimate,
        bulk_committed,
        kernel_estimate,
        kernel_committed,
    })
}
