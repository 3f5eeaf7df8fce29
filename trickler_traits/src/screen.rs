//! Operator-facing output: indicator lights and display screens.

/// State of the three indicator LEDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lights {
    pub green: bool,
    pub yellow: bool,
    pub red: bool,
}

impl Lights {
    pub const OFF: Lights = Lights::new(false, false, false);
    pub const GREEN: Lights = Lights::new(true, false, false);
    pub const YELLOW: Lights = Lights::new(false, true, false);
    pub const RED: Lights = Lights::new(false, false, true);
    /// Sub-kernel underthrow: acceptable with caution.
    pub const GREEN_YELLOW: Lights = Lights::new(true, true, false);
    /// Underthrow far beyond anything the trickler should leave behind.
    pub const YELLOW_RED: Lights = Lights::new(false, true, true);

    pub const fn new(green: bool, yellow: bool, red: bool) -> Self {
        Self { green, yellow, red }
    }
}

/// How an evaluated charge is presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeKind {
    Good,
    Over,
    Low,
    Stale,
}

/// Screens rendered by the display collaborator. Numbers only; layout is the
/// display's business.
#[derive(Debug, Clone, PartialEq)]
pub enum Screen {
    WaitingToCalibrate,
    Calibrating,
    BulkCalibration {
        measured: f32,
        grains_per_rev: f32,
    },
    TrickleCalibration {
        measured: f32,
        kernel_weight: f32,
    },
    CalibrationComplete {
        grains_per_rev: f32,
        kernel_weight: f32,
    },
    Idle {
        target: f32,
        margin: f32,
    },
    Ready {
        target: f32,
        margin: f32,
    },
    Bulk {
        target: f32,
        margin: f32,
    },
    Trickle {
        target: f32,
        margin: f32,
    },
    Charge {
        kind: ChargeKind,
        target: f32,
        measured: f32,
        elapsed_ms: u64,
        margin: f32,
    },
    Fault {
        code: u8,
        recoverable: bool,
    },
}
