use trickler_traits::{Lights, Screen};

use super::{Context, State};
use crate::rig::Rig;

/// Stop everything, present the latched fault and route it by severity.
pub(super) fn identify(ctx: &mut Context, rig: &mut Rig) -> State {
    rig.halt();
    let Some(code) = ctx.fault else {
        tracing::warn!("error identification without a latched fault");
        return State::Idle;
    };
    let recoverable = code.is_recoverable();
    tracing::error!(code = code.code(), fault = %code, recoverable, "fault latched");
    rig.lights(Lights::RED);
    rig.show(Screen::Fault {
        code: code.code(),
        recoverable,
    });
    if recoverable {
        State::RecoverableError
    } else {
        State::UnrecoverableError
    }
}

/// Cleared by one enable on/off cycle.
pub(super) fn recoverable(ctx: &mut Context, rig: &mut Rig) -> State {
    if rig.enabled() {
        ctx.enable_seen = true;
        State::RecoverableError
    } else if ctx.enable_seen {
        tracing::info!(fault = ?ctx.fault, "fault cleared by operator");
        rig.lights(Lights::OFF);
        State::Idle
    } else {
        State::RecoverableError
    }
}
