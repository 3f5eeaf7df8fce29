use trickler_traits::{Lights, Screen};

use super::{Context, State};
use crate::config::TimingCfg;
use crate::error::FaultCode;
use crate::rig::Rig;

/// A pan reading must sit within this of zero to be re-zeroed.
const ZERO_BAND: f32 = 0.5;

pub(super) fn step(ctx: &mut Context, rig: &mut Rig, timing: &TimingCfg) -> State {
    rig.lights(Lights::OFF);
    if !rig.enabled() {
        return State::Idle;
    }
    if !ctx.ready_drawn {
        rig.show(Screen::Ready {
            target: ctx.target(),
            margin: ctx.model.error_margin(),
        });
        ctx.ready_drawn = true;
    }

    let weight = match rig.stable_weight(timing.ready_ms) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!(error = %e, "scale failed while waiting for pan");
            ctx.fault = Some(FaultCode::from(&e));
            return State::ErrorIdentification;
        }
    };
    if weight > -ZERO_BAND && weight < ctx.target() + ZERO_BAND {
        if weight.abs() < ZERO_BAND {
            rig.zero_scale();
        }
        State::Dispense
    } else {
        State::Ready
    }
}
