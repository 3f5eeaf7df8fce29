use trickler_traits::{Lights, Screen};

use super::{Context, State};
use crate::config::TimingCfg;
use crate::rig::Rig;
use crate::target::{Direction, step_target};

fn draw(ctx: &Context, rig: &mut Rig) {
    rig.show(Screen::Idle {
        target: ctx.target(),
        margin: ctx.model.error_margin(),
    });
}

pub(super) fn step(ctx: &mut Context, rig: &mut Rig, timing: &TimingCfg) -> State {
    rig.lights(Lights::OFF);
    ctx.recalibrate = false;
    if !ctx.idle_drawn {
        draw(ctx, rig);
        ctx.idle_drawn = true;
    }

    if rig.enabled() {
        let target = ctx.target();
        if rig.load_target() != Some(target) {
            rig.save_target(target);
        }
        return State::Ready;
    }

    let up = rig.up();
    let down = rig.down();
    match (up, down) {
        (true, true) => {
            ctx.presses = 0;
            let start = rig.now_ms();
            while rig.now_ms().saturating_sub(start) < timing.recalibrate_hold_ms {
                if !(rig.up() && rig.down()) {
                    return State::Idle;
                }
                rig.sleep_ms(timing.tick_ms);
            }
            tracing::info!("recalibration requested");
            ctx.recalibrate = true;
            State::Calibration
        }
        (true, false) | (false, true) => {
            rig.sleep_ms(timing.debounce_ms);
            if rig.up() != up || rig.down() != down {
                ctx.presses = 0;
                return State::Idle;
            }
            ctx.presses += 1;
            let dir = if up { Direction::Up } else { Direction::Down };
            ctx.target_cg = step_target(ctx.target_cg, ctx.presses, dir);
            tracing::debug!(target_gr = ctx.target(), presses = ctx.presses, "target adjusted");
            draw(ctx, rig);
            State::Idle
        }
        (false, false) => {
            ctx.presses = 0;
            State::Idle
        }
    }
}
