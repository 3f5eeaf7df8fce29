//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "trickler", version, about = "Powder trickler controller")]
pub struct Cli {
    /// Path to config TOML; built-in defaults when omitted
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log and report as JSON lines instead of pretty text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Use the simulated bench even when built with hardware support
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pub sim: bool,

    /// Run the simulation on a virtual clock (implies --sim)
    #[arg(long = "sim-fast", global = true, action = ArgAction::SetTrue)]
    pub sim_fast: bool,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

impl Cli {
    pub fn simulated(&self) -> bool {
        self.sim || self.sim_fast || !cfg!(all(feature = "hardware", target_os = "linux"))
    }
}

/// Memory locking mode for real-time operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RtLock {
    /// Do not lock memory
    None,
    /// Lock currently resident pages
    Current,
    /// Lock current and future pages
    All,
}

impl RtLock {
    #[inline]
    pub fn os_default() -> Self {
        #[cfg(target_os = "linux")]
        {
            return RtLock::Current;
        }
        #[allow(unreachable_code)]
        RtLock::None
    }
}

#[derive(clap::Args, Debug, Default, Clone)]
pub struct RtArgs {
    /// Enable real-time mode (SCHED_FIFO, affinity, mlockall)
    #[arg(
        long,
        action = ArgAction::SetTrue,
        long_help = "Enable real-time mode (Linux, built with the `rt` feature).\n\nAttempts SCHED_FIFO priority, pins to one CPU and calls mlockall to lock the process address space into RAM. Step pulse timing on the stepper threads benefits most. May require elevated privileges or ulimits (e.g., memlock)."
    )]
    pub rt: bool,
    /// Real-time priority for SCHED_FIFO (1..=max)
    #[arg(
        long,
        value_name = "PRIO",
        long_help = "SCHED_FIFO priority when --rt is enabled. Higher values run before lower ones. Range is platform-defined (usually 1..=99). Defaults to the maximum."
    )]
    pub rt_prio: Option<i32>,
    /// Select memory locking mode for --rt: none, current, or all
    #[arg(
        long,
        value_enum,
        value_name = "MODE",
        long_help = "Select memory locking mode when --rt is enabled.\n- none: do not lock memory.\n- current: lock currently resident pages (mlockall(MCL_CURRENT)).\n- all: lock current and future pages (mlockall(MCL_CURRENT|MCL_FUTURE)).\nDefault: current."
    )]
    pub rt_lock: Option<RtLock>,
    /// CPU index to pin the process to. Defaults to 0.
    #[arg(
        long,
        value_name = "CPU",
        long_help = "Select the CPU index to pin the process to when --rt is enabled. Defaults to 0. The value must be allowed by the current affinity mask; otherwise affinity is left unchanged and a warning is logged."
    )]
    pub rt_cpu: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the instrument: calibrate, then dispense and grade charges
    Run {
        /// Exit after this many graded charges
        #[arg(long, value_name = "N")]
        charges: Option<u32>,
        /// Start in Idle with the configured coefficients instead of calibrating
        #[arg(long, action = ArgAction::SetTrue)]
        skip_calibration: bool,
        /// Stop after this much instrument time, in ms
        #[arg(long, value_name = "MS")]
        max_run_ms: Option<u64>,
        #[command(flatten)]
        rt: RtArgs,
    },
    /// Print one settled weight
    Weigh {
        /// Stability window in ms (defaults to timing.long_ms)
        #[arg(long, value_name = "MS")]
        window_ms: Option<u64>,
    },
    /// Re-zero the balance
    Zero,
    /// Identify the balance and take one instant reading
    SelfCheck,
}
