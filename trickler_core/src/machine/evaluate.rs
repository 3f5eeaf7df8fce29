use trickler_traits::{ChargeKind, Lights, Screen};

use super::{Context, State};
use crate::config::TimingCfg;
use crate::dispense::OVERTHROW_MARGINS;
use crate::error::FaultCode;
use crate::rig::Rig;

/// Shortfall still graded as a good charge (one default kernel).
pub const GOOD_CHARGE_BAND: f32 = 0.021;
/// Shortfall beyond which the throw is considered broken.
pub const EXTREME_UNDERTHROW: f32 = 1.0;
/// Readings outside this window mean the pan is off the balance.
const PAN_PRESENT: (f32, f32) = (-200.0, 500.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeOutcome {
    Overthrow,
    Good,
    ExtremeUnderthrow,
    /// Short by no more than about one kernel.
    StaleUnderthrow,
    Underthrow,
}

impl ChargeOutcome {
    pub fn is_underthrow(self) -> bool {
        matches!(
            self,
            Self::ExtremeUnderthrow | Self::StaleUnderthrow | Self::Underthrow
        )
    }

    pub fn lights(self) -> Lights {
        match self {
            Self::Overthrow => Lights::RED,
            Self::Good => Lights::GREEN,
            Self::ExtremeUnderthrow => Lights::YELLOW_RED,
            Self::StaleUnderthrow => Lights::GREEN_YELLOW,
            Self::Underthrow => Lights::YELLOW,
        }
    }

    pub fn kind(self) -> ChargeKind {
        match self {
            Self::Overthrow => ChargeKind::Over,
            Self::Good => ChargeKind::Good,
            Self::ExtremeUnderthrow | Self::Underthrow => ChargeKind::Low,
            Self::StaleUnderthrow => ChargeKind::Stale,
        }
    }
}

/// Grade a charge by its remaining shortfall (`target - measured`).
pub fn classify(diff: f32, error_margin: f32, kernel_weight: f32) -> ChargeOutcome {
    if diff < -OVERTHROW_MARGINS * error_margin {
        ChargeOutcome::Overthrow
    } else if diff < GOOD_CHARGE_BAND {
        ChargeOutcome::Good
    } else if diff > EXTREME_UNDERTHROW {
        ChargeOutcome::ExtremeUnderthrow
    } else if diff <= OVERTHROW_MARGINS * kernel_weight {
        ChargeOutcome::StaleUnderthrow
    } else {
        ChargeOutcome::Underthrow
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub outcome: ChargeOutcome,
    pub target: f32,
    pub measured: f32,
    pub elapsed_ms: u64,
}

fn scale_fault(ctx: &mut Context, e: &crate::error::ScaleError) -> State {
    tracing::error!(error = %e, "scale failed during evaluation");
    ctx.fault = Some(FaultCode::from(e));
    State::ErrorIdentification
}

pub(super) fn step(ctx: &mut Context, rig: &mut Rig, timing: &TimingCfg) -> State {
    if !rig.enabled() {
        rig.lights(Lights::OFF);
        return State::Idle;
    }

    if ctx.top_up_armed && rig.up() && !rig.down() {
        rig.sleep_ms(timing.evaluate_debounce_ms);
        if !rig.up() || rig.down() {
            return State::Evaluate;
        }
        ctx.top_up_armed = false;
        tracing::info!("manual top-up: one kernel");
        if let Err(e) = rig.start_trickle(1) {
            tracing::error!(error = %e, "top-up failed");
            rig.halt();
            ctx.fault = Some(FaultCode::MotorDriver);
            return State::ErrorIdentification;
        }
        return State::Evaluate;
    }

    let Some(session) = ctx.session.as_ref() else {
        tracing::warn!("evaluate entered without a dispense session");
        return State::Ready;
    };
    let target = session.target();
    let elapsed_ms = session.elapsed_ms();
    let dispense_weight = session.dispense_weight();

    let measured = match ctx.evaluated_weight {
        None => dispense_weight,
        Some(previous) => {
            let w = match rig.stable_weight(timing.long_ms) {
                Ok(w) => w,
                Err(e) => return scale_fault(ctx, &e),
            };
            if w == previous {
                return State::Evaluate;
            }
            if w > PAN_PRESENT.1 || w < PAN_PRESENT.0 {
                tracing::info!(weight = w, "pan removed");
                rig.lights(Lights::OFF);
                return State::Ready;
            }
            match rig.stable_weight(timing.long_ms) {
                Ok(confirm) if confirm == w => w,
                Ok(_) => return State::Evaluate,
                Err(e) => return scale_fault(ctx, &e),
            }
        }
    };
    let first = ctx.evaluated_weight.is_none();
    ctx.evaluated_weight = Some(measured);
    ctx.top_up_armed = false;

    if !rig.enabled() {
        rig.lights(Lights::OFF);
        return State::Idle;
    }

    let diff = target - measured;
    let outcome = classify(diff, ctx.model.error_margin(), ctx.model.kernel_weight());
    if first {
        ctx.charges += 1;
    }
    tracing::info!(
        outcome = ?outcome,
        target_gr = target,
        measured,
        diff,
        elapsed_ms,
        "charge evaluated"
    );
    rig.lights(outcome.lights());
    rig.show(Screen::Charge {
        kind: outcome.kind(),
        target,
        measured,
        elapsed_ms,
        margin: ctx.model.error_margin(),
    });
    if outcome.is_underthrow() {
        ctx.top_up_armed = true;
    }
    ctx.last_evaluation = Some(Evaluation {
        outcome,
        target,
        measured,
        elapsed_ms,
    });
    State::Evaluate
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(-0.03, ChargeOutcome::Overthrow)]
    #[case(-0.02, ChargeOutcome::Good)]
    #[case(0.02, ChargeOutcome::Good)]
    #[case(0.021, ChargeOutcome::StaleUnderthrow)]
    #[case(0.025, ChargeOutcome::StaleUnderthrow)]
    #[case(0.03, ChargeOutcome::Underthrow)]
    #[case(1.0, ChargeOutcome::Underthrow)]
    #[case(1.01, ChargeOutcome::ExtremeUnderthrow)]
    fn grades(#[case] diff: f32, #[case] outcome: ChargeOutcome) {
        assert_eq!(classify(diff, 0.02, 0.021), outcome);
    }

    #[test]
    fn underthrows_show_low_or_stale() {
        assert!(ChargeOutcome::StaleUnderthrow.is_underthrow());
        assert_eq!(ChargeOutcome::ExtremeUnderthrow.lights(), Lights::YELLOW_RED);
        assert_eq!(ChargeOutcome::Overthrow.kind(), ChargeKind::Over);
        assert!(!ChargeOutcome::Good.is_underthrow());
    }
}
