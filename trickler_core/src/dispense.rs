//! One charge, from the first stable reading to the last trickled kernel.
//!
//! Stage 1 throws 92% of the shortfall with the bulk auger, stage 2 throws a
//! learned fraction of what is left, and the trickler closes the gap kernel
//! by kernel. Every stage feeds its error back into the [`CalibrationModel`].

use std::ops::ControlFlow;

use trickler_traits::Screen;

use crate::calibration::CalibrationModel;
use crate::config::TimingCfg;
use crate::error::{FaultCode, MotionError};
use crate::rig::Rig;
use crate::session::DispenseSession;

/// Shortfalls above this are not attempted.
pub const MAX_DISPENSE_GRAINS: f32 = 250.0;
/// Stage 1 runs only when more than this is missing.
pub const STAGE_ONE_ABOVE: f32 = 10.0;
/// Fraction of the shortfall thrown by stage 1.
pub const STAGE_ONE_FRACTION: f32 = 0.92;
/// Without stage 1, stage 2 runs only when more than this is missing.
pub const STAGE_TWO_ABOVE: f32 = 2.0;
/// The trickler hands back to the bulk stages above this shortfall.
pub const TRICKLE_CEILING: f32 = 5.0;
/// A reading within this of the target counts as done.
pub const PERFECT_BAND: f32 = 0.01;
/// Overthrow threshold, as a multiple of the error margin.
pub const OVERTHROW_MARGINS: f32 = 1.2;

/// How the trickler should close the remaining gap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelPlan {
    /// Drop a single kernel and evaluate without waiting.
    Single,
    /// Drop this many kernels and measure.
    Batch(i64),
}

/// `floor(remaining / kernel_weight)`, plus one when the leftover is at
/// least 49% of the error margin.
pub fn kernel_count(remaining: f32, kernel_weight: f32, error_margin: f32) -> i64 {
    let ratio = remaining / kernel_weight;
    let whole = ratio as i64;
    let leftover = (ratio - whole as f32) * kernel_weight;
    if leftover >= 0.49 * error_margin {
        whole + 1
    } else {
        whole
    }
}

/// Kernel count with the single-kernel shortcut and the undershoot shave
/// for larger gaps.
pub fn plan_trickle(remaining: f32, kernel_weight: f32, error_margin: f32) -> KernelPlan {
    let mut kernels = kernel_count(remaining, kernel_weight, error_margin);
    if remaining > 0.0 && kernels <= 1 {
        return KernelPlan::Single;
    }
    if remaining > 0.75 {
        kernels -= 3;
    } else if remaining > 0.4 {
        kernels -= 1;
    }
    KernelPlan::Batch(kernels.max(1))
}

/// Where the state machine goes after a throw.
#[derive(Debug, Clone, PartialEq)]
pub enum DispenseExit {
    /// Charge finished (or overthrown); grade it.
    Evaluate,
    /// Something ate the powder; back to Ready for a fresh throw.
    ExtremeUnderthrow,
    /// Trickler found more than it should handle; start over.
    Restart,
    /// Enable released, pan lifted or throw refused.
    Aborted(MotionError),
    Fault(FaultCode),
}

pub struct DispenseController<'a> {
    rig: &'a mut Rig,
    model: &'a mut CalibrationModel,
    timing: &'a TimingCfg,
    session: DispenseSession,
}

impl<'a> DispenseController<'a> {
    pub fn new(rig: &'a mut Rig, model: &'a mut CalibrationModel, timing: &'a TimingCfg, target: f32) -> Self {
        let now = rig.now_ms();
        Self {
            rig,
            model,
            timing,
            session: DispenseSession::begin(target, now),
        }
    }

    /// Run the throw to completion. Motors are stopped exactly once on every
    /// abnormal exit.
    pub fn run(mut self) -> (DispenseExit, DispenseSession) {
        let exit = match self.throw() {
            Ok(exit) => exit,
            Err(e) => {
                self.rig.halt();
                match e {
                    MotionError::Scale(ref se) => {
                        tracing::error!(error = %se, "scale failed during dispense");
                        DispenseExit::Fault(FaultCode::from(se))
                    }
                    MotionError::Driver(ref msg) => {
                        tracing::error!(error = %msg, "motor driver failed during dispense");
                        DispenseExit::Fault(FaultCode::MotorDriver)
                    }
                    other => {
                        tracing::warn!(reason = %other, "dispense aborted");
                        DispenseExit::Aborted(other)
                    }
                }
            }
        };
        (exit, self.session)
    }

    fn overthrow_limit(&self) -> f32 {
        -OVERTHROW_MARGINS * self.model.error_margin()
    }

    fn measure(&mut self, window_ms: u64) -> Result<f32, MotionError> {
        let weight = self.rig.stable_weight(window_ms)?;
        Ok(self.session.record(weight))
    }

    fn mark_end(&mut self) {
        let now = self.rig.now_ms();
        self.session.mark_end(now);
    }

    fn ensure_enabled(&mut self) -> Result<(), MotionError> {
        if self.rig.enabled() {
            Ok(())
        } else {
            Err(MotionError::Cancelled)
        }
    }

    fn throw(&mut self) -> Result<DispenseExit, MotionError> {
        self.ensure_enabled()?;
        let target = self.session.target();
        let mut diff = self.measure(self.timing.long_ms)?;
        let now = self.rig.now_ms();
        self.session.restart_clock(now);
        let starting_diff = diff;
        tracing::info!(target_gr = target, remaining = diff, "dispense started");

        if diff <= 0.0 || diff > MAX_DISPENSE_GRAINS {
            return Ok(DispenseExit::Evaluate);
        }

        if diff > STAGE_ONE_ABOVE {
            self.show_bulk(target);
            self.rig
                .bulk_throw(diff * STAGE_ONE_FRACTION, self.model.grains_per_rev())?;
            self.mark_end();
            diff = self.measure(self.timing.short_ms)?;
            let thrown = starting_diff - diff;
            tracing::debug!(thrown, remaining = diff, "stage 1 done");

            if thrown < 1.0 {
                // auger empty or jammed; grade what is there
                return Ok(DispenseExit::Evaluate);
            } else if diff < 0.02 * target {
                self.model.small_increase_bulk();
            } else if diff < self.overthrow_limit() {
                self.model.increase_bulk();
                return Ok(DispenseExit::Evaluate);
            } else if diff < PERFECT_BAND {
                return Ok(DispenseExit::Evaluate);
            } else if diff <= 1.0 {
                diff = self.measure(self.timing.short_ms)?;
            } else {
                if diff > target * 0.5 {
                    return Ok(DispenseExit::ExtremeUnderthrow);
                }
                if diff > target * 0.15 {
                    self.model.decrease_bulk();
                } else if diff > target * 0.1 {
                    self.model.small_decrease_bulk();
                }
                match self.second_bulk(diff, starting_diff, 0.2)? {
                    ControlFlow::Break(exit) => return Ok(exit),
                    ControlFlow::Continue(d) => diff = d,
                }
            }
        } else if diff > STAGE_TWO_ABOVE {
            self.show_bulk(target);
            match self.second_bulk(diff, starting_diff, 0.1)? {
                ControlFlow::Break(exit) => return Ok(exit),
                ControlFlow::Continue(d) => diff = d,
            }
        }

        self.rig.show(Screen::Trickle {
            target,
            margin: self.model.error_margin(),
        });
        self.trickle(diff)
    }

    fn show_bulk(&mut self, target: f32) {
        self.rig.show(Screen::Bulk {
            target,
            margin: self.model.error_margin(),
        });
    }

    /// Throw `second_bulk_fraction` of `diff` and tune the fraction from the
    /// result. `close_band` is the shortfall below which the throw counts as
    /// slightly too generous.
    fn second_bulk(
        &mut self,
        diff: f32,
        starting_diff: f32,
        close_band: f32,
    ) -> Result<ControlFlow<DispenseExit, f32>, MotionError> {
        let grains = diff * self.model.second_bulk_fraction();
        self.rig.bulk_throw(grains, self.model.grains_per_rev())?;
        self.mark_end();
        let mut diff = self.measure(self.timing.short_ms)?;
        if diff.abs() < 0.1 {
            diff = self.measure(self.timing.long_ms)?;
        }
        tracing::debug!(grains, remaining = diff, "stage 2 done");

        let flow = if diff < self.overthrow_limit() {
            self.model.adjust_second_bulk_fraction(-0.02);
            ControlFlow::Break(DispenseExit::Evaluate)
        } else if diff < PERFECT_BAND {
            self.model.adjust_second_bulk_fraction(-0.005);
            ControlFlow::Break(DispenseExit::Evaluate)
        } else if diff < close_band {
            self.model.adjust_second_bulk_fraction(-0.005);
            ControlFlow::Continue(diff)
        } else if diff > starting_diff * 0.5 {
            ControlFlow::Break(DispenseExit::ExtremeUnderthrow)
        } else if diff > 0.7 {
            self.model.adjust_second_bulk_fraction(0.01);
            ControlFlow::Continue(diff)
        } else {
            ControlFlow::Continue(diff)
        };
        Ok(flow)
    }

    fn trickle(&mut self, mut diff: f32) -> Result<DispenseExit, MotionError> {
        loop {
            self.ensure_enabled()?;
            if diff > TRICKLE_CEILING {
                return Ok(DispenseExit::Restart);
            }
            let margin = self.model.error_margin();
            if diff < OVERTHROW_MARGINS * margin {
                diff = self.measure(self.timing.long_ms)?;
                if diff <= PERFECT_BAND {
                    return Ok(DispenseExit::Evaluate);
                }
            }

            let kernels = match plan_trickle(diff, self.model.kernel_weight(), margin) {
                KernelPlan::Single => {
                    self.rig.start_trickle(1)?;
                    self.mark_end();
                    return Ok(DispenseExit::Evaluate);
                }
                KernelPlan::Batch(k) => k,
            };
            self.rig.start_trickle(kernels)?;
            self.rig.wait_for_trickle(self.timing.settle_window_ms)?;
            self.mark_end();
            self.settle(diff)?;

            diff = self.measure(self.timing.long_ms)?;
            tracing::debug!(kernels, remaining = diff, "trickle pass");
            let limit = self.overthrow_limit();
            if diff < limit {
                if kernels > 15 && diff > limit - 0.02 {
                    self.model.small_increase_trickle();
                } else {
                    self.model.increase_trickle();
                }
                return Ok(DispenseExit::Evaluate);
            } else if diff < PERFECT_BAND {
                return Ok(DispenseExit::Evaluate);
            } else if diff > STAGE_TWO_ABOVE {
                return Ok(DispenseExit::ExtremeUnderthrow);
            } else if diff > 3.0 * margin {
                self.model.decrease_trickle();
            } else if diff > OVERTHROW_MARGINS * margin {
                self.model.small_decrease_trickle();
            }
        }
    }

    /// Let falling kernels land: poll until the pan shows at least 75% of the
    /// last pass, or give up after `settle_max_ms`.
    fn settle(&mut self, diff: f32) -> Result<(), MotionError> {
        let expected = self.session.dispense_weight() + 0.75 * diff;
        let start = self.rig.now_ms();
        while self.rig.stable_weight(self.timing.settle_window_ms)? <= expected {
            self.ensure_enabled()?;
            if self.rig.now_ms().saturating_sub(start) > self.timing.settle_max_ms {
                tracing::debug!(expected, "settle timed out");
                break;
            }
        }
        Ok(())
    }
}
