#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and persisted state for the powder trickler.
//!
//! - `Config` and its sections are deserialized from TOML and validated.
//!   Every section has defaults matching the reference build, so an empty
//!   file describes a working instrument.
//! - `target` keeps the operator's target charge weight across power cycles.
use serde::Deserialize;

pub mod target;

pub use target::{FileTargetStore, MemoryTargetStore};

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SerialCfg {
    /// Device path of the balance's serial port
    pub path: String,
    pub baud: u32,
    /// How long to wait for a print response before reporting a timeout
    pub response_timeout_ms: u64,
    /// A response is complete once at least this many bytes are buffered
    pub min_response_bytes: usize,
    /// Settle delay after the re-zero command
    pub zero_settle_ms: u64,
    /// Identification query retries at startup (50 ms apart)
    pub id_attempts: u32,
}

impl Default for SerialCfg {
    fn default() -> Self {
        Self {
            path: "/dev/ttyAMA0".to_string(),
            baud: 19_200,
            response_timeout_ms: 500,
            min_response_bytes: 10,
            zero_settle_ms: 50,
            id_attempts: 100,
        }
    }
}

/// BCM pin numbers, only consulted by the hardware backend.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct Pins {
    pub enable: u8,
    pub up: u8,
    pub down: u8,
    pub green_led: u8,
    pub yellow_led: u8,
    pub red_led: u8,
    pub bulk_step: u8,
    pub bulk_dir: u8,
    pub bulk_enable: u8,
    pub trickle_step: u8,
    pub trickle_dir: u8,
    pub trickle_enable: u8,
}

impl Default for Pins {
    fn default() -> Self {
        Self {
            enable: 5,
            up: 9,
            down: 10,
            green_led: 14,
            yellow_led: 15,
            red_led: 16,
            bulk_step: 7,
            bulk_dir: 6,
            bulk_enable: 8,
            trickle_step: 3,
            trickle_dir: 2,
            trickle_enable: 4,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MotionCfg {
    pub steps_per_rev: u32,
    pub kernels_per_rev: u32,
    /// Backwards travel after a bulk dispense
    pub retract_steps: i64,
    /// Forward shimmy after the retract to take up backlash
    pub recovery_steps: i64,
    /// Largest single bulk throw the controller will command (grains)
    pub max_bulk_grains: f32,
    pub steps_per_sec: u32,
    /// Interval between "still moving?" polls
    pub poll_ms: u64,
}

impl Default for MotionCfg {
    fn default() -> Self {
        Self {
            steps_per_rev: trickler_traits::STEPS_PER_REV,
            kernels_per_rev: trickler_traits::KERNELS_PER_REV,
            retract_steps: 250,
            recovery_steps: 50,
            max_bulk_grains: 250.0,
            steps_per_sec: 1995,
            poll_ms: 1,
        }
    }
}

/// Stability windows and operator-facing delays, all in milliseconds.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TimingCfg {
    pub long_ms: u64,
    pub short_ms: u64,
    pub ready_ms: u64,
    pub calibration_ms: u64,
    pub settle_max_ms: u64,
    pub settle_window_ms: u64,
    pub debounce_ms: u64,
    pub evaluate_debounce_ms: u64,
    pub recalibrate_hold_ms: u64,
    pub bulk_settle_ms: u64,
    pub tick_ms: u64,
}

impl Default for TimingCfg {
    fn default() -> Self {
        Self {
            long_ms: 500,
            short_ms: 350,
            ready_ms: 750,
            calibration_ms: 2000,
            settle_max_ms: 1500,
            settle_window_ms: 50,
            debounce_ms: 250,
            evaluate_debounce_ms: 100,
            recalibrate_hold_ms: 2000,
            bulk_settle_ms: 500,
            tick_ms: 10,
        }
    }
}

/// Starting coefficients; the controller tunes them at runtime.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CalibrationCfg {
    pub grains_per_rev: f32,
    pub kernel_weight: f32,
    pub second_bulk_fraction: f32,
    pub error_margin: f32,
    /// Target used when nothing valid has been persisted yet
    pub default_target: f32,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            grains_per_rev: 65.0,
            kernel_weight: 0.021,
            second_bulk_fraction: 0.7,
            error_margin: 0.02,
            default_target: 32.0,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct StorageCfg {
    /// Where the target weight is persisted; in-memory only when absent
    pub target_file: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub serial: SerialCfg,
    pub pins: Pins,
    pub motion: MotionCfg,
    pub timing: TimingCfg,
    pub calibration: CalibrationCfg,
    pub storage: StorageCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Serial
        if self.serial.baud == 0 {
            eyre::bail!("serial.baud must be > 0");
        }
        if self.serial.response_timeout_ms == 0 {
            eyre::bail!("serial.response_timeout_ms must be >= 1");
        }
        if self.serial.min_response_bytes < 9 {
            eyre::bail!("serial.min_response_bytes must be >= 9 (sign + 8 digits)");
        }
        if self.serial.id_attempts == 0 {
            eyre::bail!("serial.id_attempts must be >= 1");
        }

        // Motion
        if self.motion.steps_per_rev == 0 {
            eyre::bail!("motion.steps_per_rev must be > 0");
        }
        if self.motion.kernels_per_rev == 0 {
            eyre::bail!("motion.kernels_per_rev must be > 0");
        }
        if self.motion.steps_per_rev % self.motion.kernels_per_rev != 0 {
            eyre::bail!("motion.steps_per_rev must be a multiple of motion.kernels_per_rev");
        }
        if self.motion.retract_steps < 0 || self.motion.recovery_steps < 0 {
            eyre::bail!("motion.retract_steps and motion.recovery_steps must be >= 0");
        }
        if !(self.motion.max_bulk_grains > 0.0 && self.motion.max_bulk_grains <= 1000.0) {
            eyre::bail!("motion.max_bulk_grains must be in (0, 1000]");
        }
        if self.motion.steps_per_sec == 0 {
            eyre::bail!("motion.steps_per_sec must be > 0");
        }
        if self.motion.poll_ms == 0 {
            eyre::bail!("motion.poll_ms must be >= 1");
        }

        // Timing
        let t = &self.timing;
        for (key, v) in [
            ("timing.long_ms", t.long_ms),
            ("timing.short_ms", t.short_ms),
            ("timing.ready_ms", t.ready_ms),
            ("timing.calibration_ms", t.calibration_ms),
            ("timing.settle_window_ms", t.settle_window_ms),
            ("timing.tick_ms", t.tick_ms),
        ] {
            if v == 0 {
                eyre::bail!("{key} must be >= 1");
            }
            if v > 60 * 1000 {
                eyre::bail!("{key} is unreasonably large (>60s)");
            }
        }
        if t.short_ms > t.long_ms {
            eyre::bail!("timing.short_ms must not exceed timing.long_ms");
        }

        // Calibration
        let c = &self.calibration;
        if !(c.grains_per_rev > 20.0 && c.grains_per_rev < 150.0) {
            eyre::bail!("calibration.grains_per_rev must be in (20, 150)");
        }
        if !(c.kernel_weight > 0.01 && c.kernel_weight < 0.10) {
            eyre::bail!("calibration.kernel_weight must be in (0.01, 0.10)");
        }
        if !(c.second_bulk_fraction > 0.0 && c.second_bulk_fraction <= 1.0) {
            eyre::bail!("calibration.second_bulk_fraction must be in (0.0, 1.0]");
        }
        if !(c.error_margin > 0.0 && c.error_margin <= 0.5) {
            eyre::bail!("calibration.error_margin must be in (0.0, 0.5]");
        }
        if !(0.0..=250.0).contains(&c.default_target) {
            eyre::bail!("calibration.default_target must be in [0, 250]");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_the_reference_build() {
        let cfg = load_toml("").expect("parse");
        cfg.validate().expect("defaults valid");
        assert_eq!(cfg.serial.baud, 19_200);
        assert_eq!(cfg.timing.long_ms, 500);
        assert_eq!(cfg.timing.short_ms, 350);
        assert_eq!(cfg.motion.retract_steps, 250);
        assert!((cfg.calibration.grains_per_rev - 65.0).abs() < f32::EPSILON);
    }
}
