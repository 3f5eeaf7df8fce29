//! Hardware seams for the powder trickler.
//!
//! The control stack in `trickler_core` only talks to the instrument through
//! these traits, so it runs unchanged against the Raspberry Pi backends, the
//! simulated bench, or scripted test doubles.

pub mod clock;
pub mod screen;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use screen::{ChargeKind, Lights, Screen};

/// Microsteps per auger/disk revolution (200 full steps at 1/32 microstepping).
pub const STEPS_PER_REV: u32 = 6400;
/// Slots in the trickler kernel disk, so kernels dropped per revolution.
pub const KERNELS_PER_REV: u32 = 64;

/// Byte-level link to the balance.
pub trait SerialPort {
    fn write(&mut self, bytes: &[u8]) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    /// Number of received bytes waiting in the buffer.
    fn available(&mut self) -> Result<usize, Box<dyn std::error::Error + Send + Sync>>;
    fn read_byte(&mut self) -> Result<Option<u8>, Box<dyn std::error::Error + Send + Sync>>;
}

/// Fire-and-forget step/dir driver for the bulk auger and the trickler disk.
///
/// Moves are relative; a negative step count turns the motor backwards.
/// Completion is observed only by polling `is_*_moving`.
pub trait MotorDriver {
    fn move_bulk(&mut self, steps: i64) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn move_trickle(&mut self, steps: i64)
    -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn is_bulk_moving(&mut self) -> Result<bool, Box<dyn std::error::Error + Send + Sync>>;
    fn is_trickle_moving(&mut self) -> Result<bool, Box<dyn std::error::Error + Send + Sync>>;
    /// Halt both motors and drop any remaining steps.
    fn stop_all(&mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    fn steps_per_rev(&self) -> u32 {
        STEPS_PER_REV
    }

    fn kernels_per_rev(&self) -> u32 {
        KERNELS_PER_REV
    }
}

/// Operator controls. Implementations report logical state: `true` means
/// asserted/pressed regardless of the electrical polarity.
pub trait Inputs {
    fn enabled(&mut self) -> bool;
    fn up_pressed(&mut self) -> bool;
    fn down_pressed(&mut self) -> bool;
}

pub trait Indicators {
    fn set_lights(&mut self, lights: Lights);
}

/// One-way operator display.
pub trait Display {
    fn show(&mut self, screen: &Screen);
}

/// Persistent home of the target charge weight (grains).
pub trait TargetStore {
    fn load(&mut self) -> Result<Option<f32>, Box<dyn std::error::Error + Send + Sync>>;
    fn save(&mut self, grains: f32) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
