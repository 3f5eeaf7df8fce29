//! Instrument backends for the powder trickler.
//!
//! - `sim`: a simulated balance, motors and operator, always available.
//! - `pi` (feature `hardware`, Linux): UART, GPIO and stepper drivers on a
//!   Raspberry Pi via `rppal`.

pub mod error;
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod pi;
pub mod sim;

use trickler_traits::{Display, Screen};

pub use error::HwError;
pub use sim::{SimBench, SimParams};

/// Display that writes each screen to the log. Used when no panel is fitted.
#[derive(Debug, Default)]
pub struct TracingDisplay;

impl Display for TracingDisplay {
    fn show(&mut self, screen: &Screen) {
        match screen {
            Screen::Charge {
                kind,
                target,
                measured,
                elapsed_ms,
                ..
            } => tracing::info!(?kind, target, measured, elapsed_ms, "charge"),
            Screen::Fault { code, recoverable } => {
                tracing::error!(code, recoverable, "fault");
            }
            other => tracing::info!(screen = ?other, "display"),
        }
    }
}
