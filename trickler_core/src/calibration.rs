//! Calibration values learned on the bench and nudged after every charge.

/// Accepted bulk yield, grains per auger revolution (exclusive bounds).
pub const BULK_YIELD_RANGE: (f32, f32) = (20.0, 150.0);
/// Accepted trickler kernel weight, grains (exclusive bounds).
pub const KERNEL_WEIGHT_RANGE: (f32, f32) = (0.01, 0.10);
/// Calibration estimates are inflated by this factor before commit.
pub const CALIBRATION_INFLATION: f32 = 1.05;

pub const DEFAULT_BULK_YIELD: f32 = 65.0;
pub const DEFAULT_KERNEL_WEIGHT: f32 = 0.021;
pub const DEFAULT_SECOND_BULK_FRACTION: f32 = 0.7;
pub const DEFAULT_ERROR_MARGIN: f32 = 0.02;

pub fn nudge_up(v: f32) -> f32 {
    v * 1.03
}

pub fn small_nudge_up(v: f32) -> f32 {
    v * 1.01
}

pub fn nudge_down(v: f32) -> f32 {
    v * 0.98
}

pub fn small_nudge_down(v: f32) -> f32 {
    v * 0.99
}

/// Overthrow tolerance implied by a kernel weight: heavier kernels cannot
/// land as precisely.
pub fn error_margin_for(kernel_weight: f32) -> f32 {
    if kernel_weight > 0.05 {
        0.06
    } else if kernel_weight > 0.03 {
        0.04
    } else {
        DEFAULT_ERROR_MARGIN
    }
}

/// Per-unit yield from a calibration run, inflated by [`CALIBRATION_INFLATION`].
pub fn calibrated_estimate(total_weight: f32, units: f32) -> f32 {
    total_weight / units * CALIBRATION_INFLATION
}

fn within(v: f32, (lo, hi): (f32, f32)) -> bool {
    v > lo && v < hi
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationModel {
    grains_per_rev: f32,
    kernel_weight: f32,
    second_bulk_fraction: f32,
    error_margin: f32,
}

impl Default for CalibrationModel {
    fn default() -> Self {
        Self::new(
            DEFAULT_BULK_YIELD,
            DEFAULT_KERNEL_WEIGHT,
            DEFAULT_SECOND_BULK_FRACTION,
            DEFAULT_ERROR_MARGIN,
        )
    }
}

impl CalibrationModel {
    pub fn new(grains_per_rev: f32, kernel_weight: f32, second_bulk_fraction: f32, error_margin: f32) -> Self {
        Self {
            grains_per_rev,
            kernel_weight,
            second_bulk_fraction,
            error_margin,
        }
    }

    pub fn grains_per_rev(&self) -> f32 {
        self.grains_per_rev
    }

    pub fn kernel_weight(&self) -> f32 {
        self.kernel_weight
    }

    pub fn second_bulk_fraction(&self) -> f32 {
        self.second_bulk_fraction
    }

    pub fn error_margin(&self) -> f32 {
        self.error_margin
    }

    // Bulk yield nudges. A bulk throw that came up short means the auger
    // delivers less than modelled, so the yield estimate goes down; an
    // overthrow pushes it up.

    pub fn increase_bulk(&mut self) {
        self.grains_per_rev = nudge_up(self.grains_per_rev);
    }

    pub fn small_increase_bulk(&mut self) {
        self.grains_per_rev = small_nudge_up(self.grains_per_rev);
    }

    pub fn decrease_bulk(&mut self) {
        self.grains_per_rev = nudge_down(self.grains_per_rev);
    }

    pub fn small_decrease_bulk(&mut self) {
        self.grains_per_rev = small_nudge_down(self.grains_per_rev);
    }

    pub fn increase_trickle(&mut self) {
        self.kernel_weight = nudge_up(self.kernel_weight);
    }

    pub fn small_increase_trickle(&mut self) {
        self.kernel_weight = small_nudge_up(self.kernel_weight);
    }

    pub fn decrease_trickle(&mut self) {
        self.kernel_weight = nudge_down(self.kernel_weight);
    }

    pub fn small_decrease_trickle(&mut self) {
        self.kernel_weight = small_nudge_down(self.kernel_weight);
    }

    pub fn adjust_second_bulk_fraction(&mut self, delta: f32) {
        self.second_bulk_fraction += delta;
    }

    /// Adopt a measured bulk yield if it is plausible. Returns whether it was
    /// committed.
    pub fn commit_bulk_yield(&mut self, estimate: f32) -> bool {
        if within(estimate, BULK_YIELD_RANGE) {
            self.grains_per_rev = estimate;
            true
        } else {
            tracing::warn!(estimate, kept = self.grains_per_rev, "bulk calibration out of range");
            false
        }
    }

    /// Adopt a measured kernel weight if it is plausible, re-deriving the
    /// error margin from it. A rejected estimate leaves both untouched.
    pub fn commit_kernel_weight(&mut self, estimate: f32) -> bool {
        if within(estimate, KERNEL_WEIGHT_RANGE) {
            self.kernel_weight = estimate;
            self.error_margin = error_margin_for(estimate);
            true
        } else {
            tracing::warn!(estimate, kept = self.kernel_weight, "trickle calibration out of range");
            false
        }
    }
}
