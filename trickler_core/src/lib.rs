#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Control logic for the powder trickler (hardware-agnostic).
//!
//! All instrument access goes through the traits in `trickler_traits`; this
//! crate owns the protocol, the algorithms and the state machine.
//!
//! ## Architecture
//!
//! - **Scale**: `PRT` request/response framing (`scale`)
//! - **Stability**: two-cluster settle detection over instant reads (`stability`)
//! - **Calibration**: learned bulk yield and kernel weight with nudges (`calibration`)
//! - **Dispense**: bulk stage 1, bulk stage 2, kernel trickle (`dispense`)
//! - **Bench calibration**: measured yield/kernel estimates (`calibrate`)
//! - **State machine**: calibration, idle, ready, dispense, evaluate, faults (`machine`)
//!
//! Targets are edited in **centigrains** (`i32`) so the button accelerator's
//! digit arithmetic is exact; everything measured stays in grains (`f32`),
//! matching the balance's output.

pub mod builder;
pub mod calibrate;
pub mod calibration;
pub mod config;
pub mod conversions;
pub mod dispense;
pub mod error;
pub mod hw_error;
pub mod machine;
pub mod rig;
pub mod scale;
pub mod session;
pub mod stability;
pub mod target;

pub use builder::{DEFAULT_TARGET, StateMachineBuilder};
pub use calibrate::{CalibrationReport, run_calibration};
pub use calibration::CalibrationModel;
pub use config::{MotionCfg, ScaleCfg, TimingCfg};
pub use dispense::{DispenseController, DispenseExit, KernelPlan, kernel_count, plan_trickle};
pub use error::{BuildError, FaultCode, MotionError, Result, ScaleError};
pub use machine::{ChargeOutcome, Evaluation, State, StateMachine, classify};
pub use rig::Rig;
pub use scale::{InstantWeight, ScaleLink, decode_frame};
pub use session::DispenseSession;
pub use stability::{StabilityFilter, stable_weight};
