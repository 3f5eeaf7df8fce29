//! The instrument as the state machine sees it: scale, motors, operator
//! controls and outputs, plus the motion sequences built on top of them.

use std::sync::Arc;
use std::time::Instant;

use trickler_traits::{
    Clock, Display, Indicators, Inputs, Lights, MotorDriver, Screen, TargetStore,
};

use crate::config::MotionCfg;
use crate::error::{MotionError, ScaleError};
use crate::hw_error::map_driver_error;
use crate::scale::ScaleLink;
use crate::stability;

/// Bulk steps for `grains` at `grains_per_rev`, plus the allowance that the
/// retract/re-advance pair eats.
pub fn bulk_steps(grains: f32, grains_per_rev: f32, steps_per_rev: u32, recovery_steps: i64) -> i64 {
    let forward = grains / grains_per_rev * steps_per_rev as f32;
    (forward + 1.5 * recovery_steps as f32) as i64
}

/// Trickler steps for a whole number of kernels.
pub fn trickle_steps(kernels: i64, steps_per_rev: u32, kernels_per_rev: u32) -> i64 {
    i64::from(steps_per_rev / kernels_per_rev) * kernels
}

pub struct Rig {
    scale: ScaleLink,
    motors: Box<dyn MotorDriver>,
    inputs: Box<dyn Inputs>,
    indicators: Box<dyn Indicators>,
    display: Box<dyn Display>,
    store: Box<dyn TargetStore>,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    motion: MotionCfg,
    lights: Option<Lights>,
}

impl Rig {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        scale: ScaleLink,
        motors: Box<dyn MotorDriver>,
        inputs: Box<dyn Inputs>,
        indicators: Box<dyn Indicators>,
        display: Box<dyn Display>,
        store: Box<dyn TargetStore>,
        clock: Arc<dyn Clock + Send + Sync>,
        motion: MotionCfg,
    ) -> Self {
        let epoch = clock.now();
        Self {
            scale,
            motors,
            inputs,
            indicators,
            display,
            store,
            clock,
            epoch,
            motion,
            lights: None,
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }

    pub fn sleep_ms(&self, ms: u64) {
        self.clock.sleep_ms(ms);
    }

    pub fn enabled(&mut self) -> bool {
        self.inputs.enabled()
    }

    pub fn up(&mut self) -> bool {
        self.inputs.up_pressed()
    }

    pub fn down(&mut self) -> bool {
        self.inputs.down_pressed()
    }

    /// Drive the LEDs; repeated identical requests are not forwarded.
    pub fn lights(&mut self, lights: Lights) {
        if self.lights != Some(lights) {
            self.indicators.set_lights(lights);
            self.lights = Some(lights);
        }
    }

    pub fn show(&mut self, screen: Screen) {
        self.display.show(&screen);
    }

    pub fn scale(&mut self) -> &mut ScaleLink {
        &mut self.scale
    }

    pub fn stable_weight(&mut self, window_ms: u64) -> Result<f32, ScaleError> {
        stability::stable_weight(&mut self.scale, &*self.clock, window_ms)
    }

    /// Re-zero the balance; failures are logged, not fatal.
    pub fn zero_scale(&mut self) {
        if let Err(e) = self.scale.zero() {
            tracing::warn!(error = %e, "scale zero failed");
        }
    }

    pub fn load_target(&mut self) -> Option<f32> {
        match self.store.load() {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "target load failed");
                None
            }
        }
    }

    pub fn save_target(&mut self, grains: f32) {
        match self.store.save(grains) {
            Ok(()) => tracing::info!(target_gr = grains, "target saved"),
            Err(e) => tracing::warn!(error = %e, "target save failed"),
        }
    }

    /// Stop both motors. A driver that cannot stop is only logged; callers are
    /// already on their way out.
    pub fn halt(&mut self) {
        if let Err(e) = self.motors.stop_all() {
            tracing::error!(error = %e, "motor stop failed");
        }
    }

    /// Throw `grains` with the bulk auger: forward, retract, re-advance,
    /// waiting out each leg.
    pub fn bulk_throw(&mut self, grains: f32, grains_per_rev: f32) -> Result<(), MotionError> {
        if grains > self.motion.max_bulk_grains {
            tracing::warn!(grains, limit = self.motion.max_bulk_grains, "bulk throw refused");
            return Err(MotionError::OverLimit(grains));
        }
        let steps = bulk_steps(
            grains,
            grains_per_rev,
            self.motors.steps_per_rev(),
            self.motion.recovery_steps,
        );
        tracing::debug!(grains, steps, "bulk throw");
        for leg in [steps, -self.motion.retract_steps, self.motion.recovery_steps] {
            self.motors
                .move_bulk(leg)
                .map_err(|e| map_driver_error(&*e))?;
            self.wait_for_bulk()?;
        }
        Ok(())
    }

    /// Command the trickler; does not wait.
    pub fn start_trickle(&mut self, kernels: i64) -> Result<(), MotionError> {
        let steps = trickle_steps(
            kernels,
            self.motors.steps_per_rev(),
            self.motors.kernels_per_rev(),
        );
        tracing::debug!(kernels, steps, "trickle");
        self.motors
            .move_trickle(steps)
            .map_err(|e| map_driver_error(&*e))
    }

    pub fn wait_for_bulk(&mut self) -> Result<(), MotionError> {
        loop {
            if !self.motors.is_bulk_moving().map_err(|e| map_driver_error(&*e))? {
                return Ok(());
            }
            if !self.inputs.enabled() {
                return Err(MotionError::Cancelled);
            }
            self.clock.sleep_ms(self.motion.poll_ms);
        }
    }

    /// Wait for the trickler, also watching for the pan being lifted.
    pub fn wait_for_trickle(&mut self, window_ms: u64) -> Result<(), MotionError> {
        loop {
            if !self
                .motors
                .is_trickle_moving()
                .map_err(|e| map_driver_error(&*e))?
            {
                return Ok(());
            }
            if !self.inputs.enabled() {
                return Err(MotionError::Cancelled);
            }
            if self.stable_weight(window_ms)? < 0.0 {
                return Err(MotionError::PanRemoved);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bulk_steps_include_recovery_allowance() {
        // 29.44 gr at 65 gr/rev = 2898.7 steps, + 75
        assert_eq!(bulk_steps(29.44, 65.0, 6400, 50), 2973);
        assert_eq!(bulk_steps(0.0, 65.0, 6400, 50), 75);
    }

    #[test]
    fn trickle_steps_are_whole_kernel_slots() {
        assert_eq!(trickle_steps(1, 6400, 64), 100);
        assert_eq!(trickle_steps(23, 6400, 64), 2300);
    }
}
