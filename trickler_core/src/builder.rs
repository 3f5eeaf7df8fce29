//! Builder for `StateMachine`.
//!
//! Serial port, motor driver and operator inputs are required; everything else
//! has a default so a bench or test can wire up only what it exercises.

use std::sync::Arc;

use trickler_traits::{
    Clock, Display, Indicators, Inputs, Lights, MonotonicClock, MotorDriver, Screen, SerialPort,
    TargetStore,
};

use crate::calibration::CalibrationModel;
use crate::config::{MotionCfg, ScaleCfg, TimingCfg};
use crate::error::{BuildError, Result};
use crate::machine::{State, StateMachine};
use crate::rig::Rig;
use crate::scale::ScaleLink;
use crate::target::{TARGET_RANGE_CG, grains_to_cg};

/// Default target charge, grains.
pub const DEFAULT_TARGET: f32 = 32.0;

/// Outputs that only log; used when no display or LEDs are wired.
struct Unattended;

impl Indicators for Unattended {
    fn set_lights(&mut self, lights: Lights) {
        tracing::debug!(?lights, "lights");
    }
}

impl Display for Unattended {
    fn show(&mut self, screen: &Screen) {
        tracing::debug!(?screen, "screen");
    }
}

#[derive(Default)]
pub struct StateMachineBuilder {
    serial: Option<Box<dyn SerialPort>>,
    motors: Option<Box<dyn MotorDriver>>,
    inputs: Option<Box<dyn Inputs>>,
    indicators: Option<Box<dyn Indicators>>,
    display: Option<Box<dyn Display>>,
    store: Option<Box<dyn TargetStore>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    scale_cfg: Option<ScaleCfg>,
    motion: Option<MotionCfg>,
    timing: Option<TimingCfg>,
    model: Option<CalibrationModel>,
    target: Option<f32>,
    initial: Option<State>,
}

impl StateMachineBuilder {
    pub fn with_serial(mut self, port: impl SerialPort + 'static) -> Self {
        self.serial = Some(Box::new(port));
        self
    }

    pub fn with_motors(mut self, motors: impl MotorDriver + 'static) -> Self {
        self.motors = Some(Box::new(motors));
        self
    }

    pub fn with_inputs(mut self, inputs: impl Inputs + 'static) -> Self {
        self.inputs = Some(Box::new(inputs));
        self
    }

    pub fn with_indicators(mut self, indicators: impl Indicators + 'static) -> Self {
        self.indicators = Some(Box::new(indicators));
        self
    }

    pub fn with_display(mut self, display: impl Display + 'static) -> Self {
        self.display = Some(Box::new(display));
        self
    }

    pub fn with_target_store(mut self, store: impl TargetStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_scale_cfg(mut self, cfg: ScaleCfg) -> Self {
        self.scale_cfg = Some(cfg);
        self
    }

    pub fn with_motion(mut self, cfg: MotionCfg) -> Self {
        self.motion = Some(cfg);
        self
    }

    pub fn with_timing(mut self, cfg: TimingCfg) -> Self {
        self.timing = Some(cfg);
        self
    }

    pub fn with_model(mut self, model: CalibrationModel) -> Self {
        self.model = Some(model);
        self
    }

    /// Target used until a stored one is restored.
    pub fn with_target(mut self, grains: f32) -> Self {
        self.target = Some(grains);
        self
    }

    /// Start somewhere other than `Calibration` (e.g. `Idle` to skip the bench run).
    pub fn start_in(mut self, state: State) -> Self {
        self.initial = Some(state);
        self
    }

    /// Take protocol, motion, timing and calibration values from a loaded config.
    pub fn apply_config(mut self, cfg: &trickler_config::Config) -> Self {
        self.scale_cfg = Some(ScaleCfg::from(&cfg.serial));
        self.motion = Some(MotionCfg::from(&cfg.motion));
        self.timing = Some(TimingCfg::from(&cfg.timing));
        self.model = Some(CalibrationModel::from(&cfg.calibration));
        self.target = Some(cfg.calibration.default_target);
        self
    }

    pub fn try_build(self) -> Result<StateMachine> {
        let serial = self
            .serial
            .ok_or_else(|| eyre::Report::new(BuildError::MissingSerial))?;
        let motors = self
            .motors
            .ok_or_else(|| eyre::Report::new(BuildError::MissingMotors))?;
        let inputs = self
            .inputs
            .ok_or_else(|| eyre::Report::new(BuildError::MissingInputs))?;

        let timing = self.timing.unwrap_or_default();
        if timing.short_ms == 0 || timing.long_ms < timing.short_ms {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "stability windows must satisfy 0 < short <= long",
            )));
        }
        let motion = self.motion.unwrap_or_default();
        if motion.retract_steps < 0 || motion.recovery_steps < 0 {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "retract and recovery steps must be non-negative",
            )));
        }
        if motors.kernels_per_rev() == 0 || motors.steps_per_rev() % motors.kernels_per_rev() != 0 {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "steps per revolution must be a multiple of kernels per revolution",
            )));
        }
        let target_cg = grains_to_cg(self.target.unwrap_or(DEFAULT_TARGET));
        if !(TARGET_RANGE_CG.0..=TARGET_RANGE_CG.1).contains(&target_cg) {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "target out of range",
            )));
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let scale = ScaleLink::new(serial, clock.clone(), self.scale_cfg.unwrap_or_default());
        let rig = Rig::new(
            scale,
            motors,
            inputs,
            self.indicators.unwrap_or_else(|| Box::new(Unattended)),
            self.display.unwrap_or_else(|| Box::new(Unattended)),
            self.store
                .unwrap_or_else(|| Box::new(trickler_config::MemoryTargetStore::default())),
            clock,
            motion,
        );
        Ok(StateMachine::from_parts(
            rig,
            self.model.unwrap_or_default(),
            timing,
            target_cg,
            self.initial.unwrap_or(State::Calibration),
        ))
    }
}
