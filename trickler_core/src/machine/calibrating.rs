use trickler_traits::{Lights, Screen};

use super::{Context, State};
use crate::calibrate::run_calibration;
use crate::config::TimingCfg;
use crate::error::{FaultCode, MotionError};
use crate::rig::Rig;
use crate::target::{TARGET_RANGE_CG, cg_to_grains, grains_to_cg};

fn restore_target(ctx: &mut Context, rig: &mut Rig) {
    let Some(stored) = rig.load_target() else {
        return;
    };
    let (lo, hi) = TARGET_RANGE_CG;
    if (cg_to_grains(lo)..=cg_to_grains(hi)).contains(&stored) {
        ctx.target_cg = grains_to_cg(stored);
        tracing::info!(target_gr = stored, "target restored");
    } else {
        tracing::warn!(stored, "ignoring out of range stored target");
    }
}

pub(super) fn step(ctx: &mut Context, rig: &mut Rig, timing: &TimingCfg) -> State {
    if !ctx.calibration_entered {
        ctx.calibration_entered = true;
        rig.lights(Lights::OFF);
        rig.show(Screen::WaitingToCalibrate);
        if ctx.recalibrate {
            ctx.recalibrate = false;
        } else {
            restore_target(ctx, rig);
        }
    }
    if !rig.enabled() {
        return State::Calibration;
    }
    rig.sleep_ms(timing.debounce_ms);

    let target = ctx.target();
    match run_calibration(rig, &mut ctx.model, timing, target) {
        Ok(report) => tracing::info!(?report, "calibration finished"),
        Err(e) => {
            rig.halt();
            rig.lights(Lights::OFF);
            return match e {
                MotionError::Scale(se) => {
                    tracing::error!(error = %se, "scale failed during calibration");
                    ctx.fault = Some(FaultCode::from(&se));
                    State::ErrorIdentification
                }
                MotionError::Driver(msg) => {
                    tracing::error!(error = %msg, "motor driver failed during calibration");
                    ctx.fault = Some(FaultCode::MotorDriver);
                    State::ErrorIdentification
                }
                other => {
                    tracing::warn!(reason = %other, "calibration aborted");
                    State::Idle
                }
            };
        }
    }

    rig.show(Screen::CalibrationComplete {
        grains_per_rev: ctx.model.grains_per_rev(),
        kernel_weight: ctx.model.kernel_weight(),
    });
    while rig.enabled() {
        rig.sleep_ms(timing.tick_ms);
    }
    rig.halt();
    State::Idle
}
