//! Top-level control loop.
//!
//! `StateMachine::step` runs the current state once and returns the next one.
//! States that need multiple passes (waiting for enable, holding a result on
//! screen) return themselves; flags they own are cleared when the machine
//! leaves them, so every state starts fresh on entry.

mod calibrating;
mod evaluate;
mod faults;
mod idle;
mod ready;

use trickler_traits::Lights;

use crate::calibration::CalibrationModel;
use crate::config::TimingCfg;
use crate::dispense::{DispenseController, DispenseExit};
use crate::error::FaultCode;
use crate::rig::Rig;
use crate::session::DispenseSession;
use crate::target::cg_to_grains;

pub use evaluate::{ChargeOutcome, Evaluation, classify};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Calibration,
    Idle,
    Ready,
    Dispense,
    Evaluate,
    ErrorIdentification,
    RecoverableError,
    UnrecoverableError,
}

/// Everything the states share between steps.
#[derive(Debug, Default)]
pub(crate) struct Context {
    pub model: CalibrationModel,
    pub target_cg: i32,
    pub presses: u32,
    pub recalibrate: bool,
    pub idle_drawn: bool,
    pub ready_drawn: bool,
    pub calibration_entered: bool,
    pub session: Option<DispenseSession>,
    pub evaluated_weight: Option<f32>,
    pub top_up_armed: bool,
    pub last_evaluation: Option<Evaluation>,
    pub charges: u32,
    pub fault: Option<FaultCode>,
    pub enable_seen: bool,
}

impl Context {
    pub fn target(&self) -> f32 {
        cg_to_grains(self.target_cg)
    }

    fn leave(&mut self, state: State) {
        match state {
            State::Idle => {
                self.presses = 0;
                self.idle_drawn = false;
            }
            State::Ready => self.ready_drawn = false,
            State::Calibration => self.calibration_entered = false,
            State::Evaluate => {
                self.session = None;
                self.evaluated_weight = None;
                self.top_up_armed = false;
            }
            State::RecoverableError => {
                self.fault = None;
                self.enable_seen = false;
            }
            State::Dispense | State::ErrorIdentification | State::UnrecoverableError => {}
        }
    }
}

pub struct StateMachine {
    rig: Rig,
    ctx: Context,
    timing: TimingCfg,
    state: State,
}

impl StateMachine {
    pub fn builder() -> crate::builder::StateMachineBuilder {
        crate::builder::StateMachineBuilder::default()
    }

    pub(crate) fn from_parts(
        rig: Rig,
        model: CalibrationModel,
        timing: TimingCfg,
        target_cg: i32,
        initial: State,
    ) -> Self {
        Self {
            rig,
            ctx: Context {
                model,
                target_cg,
                ..Context::default()
            },
            timing,
            state: initial,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Current target charge, grains.
    pub fn target(&self) -> f32 {
        self.ctx.target()
    }

    pub fn model(&self) -> &CalibrationModel {
        &self.ctx.model
    }

    /// Grade of the most recent charge, if any.
    pub fn last_evaluation(&self) -> Option<&Evaluation> {
        self.ctx.last_evaluation.as_ref()
    }

    /// Charges graded since start-up.
    pub fn charges(&self) -> u32 {
        self.ctx.charges
    }

    pub fn fault(&self) -> Option<FaultCode> {
        self.ctx.fault
    }

    pub fn rig_mut(&mut self) -> &mut Rig {
        &mut self.rig
    }

    /// Run the current state once.
    pub fn step(&mut self) -> State {
        let current = self.state;
        let next = match current {
            State::Calibration => calibrating::step(&mut self.ctx, &mut self.rig, &self.timing),
            State::Idle => idle::step(&mut self.ctx, &mut self.rig, &self.timing),
            State::Ready => ready::step(&mut self.ctx, &mut self.rig, &self.timing),
            State::Dispense => self.dispense(),
            State::Evaluate => evaluate::step(&mut self.ctx, &mut self.rig, &self.timing),
            State::ErrorIdentification => faults::identify(&mut self.ctx, &mut self.rig),
            State::RecoverableError => faults::recoverable(&mut self.ctx, &mut self.rig),
            State::UnrecoverableError => State::UnrecoverableError,
        };
        if next != current {
            tracing::debug!(from = ?current, to = ?next, "state change");
            self.ctx.leave(current);
        }
        self.state = next;
        next
    }

    /// Step until `stop` says otherwise, pausing one tick between steps.
    pub fn run_until(&mut self, mut stop: impl FnMut(&Self) -> bool) {
        while !stop(self) {
            self.step();
            self.rig.sleep_ms(self.timing.tick_ms);
        }
    }

    fn dispense(&mut self) -> State {
        self.rig.lights(Lights::YELLOW);
        let target = self.ctx.target();
        let controller = DispenseController::new(&mut self.rig, &mut self.ctx.model, &self.timing, target);
        let (exit, session) = controller.run();
        self.ctx.session = Some(session);
        match exit {
            DispenseExit::Evaluate => State::Evaluate,
            DispenseExit::ExtremeUnderthrow => {
                tracing::warn!(target_gr = target, "extreme underthrow, rearming");
                State::Ready
            }
            DispenseExit::Restart => State::Dispense,
            DispenseExit::Aborted(_) => State::Idle,
            DispenseExit::Fault(code) => {
                self.ctx.fault = Some(code);
                State::ErrorIdentification
            }
        }
    }
}
