//! Instrument assembly (simulated or Raspberry Pi) and the commands that drive it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use eyre::{Result, WrapErr};
use trickler_config::{Config, FileTargetStore};
use trickler_core::{Evaluation, State, StateMachine, StateMachineBuilder};
use trickler_hardware::{SimBench, SimParams};
use trickler_traits::{Clock, Lights, ManualClock, MonotonicClock};

use crate::cli::{Cli, RtArgs};
use crate::rt::setup_rt_once;

/// What `run` should do besides stepping the machine.
#[derive(Debug, Default)]
pub struct RunOpts {
    pub charges: Option<u32>,
    pub skip_calibration: bool,
    pub max_run_ms: Option<u64>,
    pub rt: RtArgs,
}

fn sim_params(cfg: &Config) -> SimParams {
    SimParams {
        steps_per_sec: cfg.motion.steps_per_sec,
        steps_per_rev: cfg.motion.steps_per_rev,
        kernels_per_rev: cfg.motion.kernels_per_rev,
        ..SimParams::default()
    }
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
fn with_hardware(builder: StateMachineBuilder, cfg: &Config) -> Result<StateMachineBuilder> {
    use trickler_hardware::TracingDisplay;
    use trickler_hardware::pi::{PiIndicators, PiPanel, PiSerial, PiSteppers, StepperPins};

    let p = &cfg.pins;
    let serial = PiSerial::open(&cfg.serial.path, cfg.serial.baud)
        .wrap_err_with(|| format!("open uart {}", cfg.serial.path))?;
    let motors = PiSteppers::new(
        StepperPins {
            step: p.bulk_step,
            dir: p.bulk_dir,
            enable: p.bulk_enable,
        },
        StepperPins {
            step: p.trickle_step,
            dir: p.trickle_dir,
            enable: p.trickle_enable,
        },
        cfg.motion.steps_per_sec,
        cfg.motion.steps_per_rev,
        cfg.motion.kernels_per_rev,
    )
    .wrap_err("open stepper gpio")?;
    let panel = PiPanel::new(p.enable, p.up, p.down).wrap_err("open panel gpio")?;
    let leds =
        PiIndicators::new(p.green_led, p.yellow_led, p.red_led).wrap_err("open led gpio")?;
    Ok(builder
        .with_serial(serial)
        .with_motors(motors)
        .with_inputs(panel)
        .with_indicators(leds)
        .with_display(TracingDisplay))
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn with_hardware(_builder: StateMachineBuilder, _cfg: &Config) -> Result<StateMachineBuilder> {
    eyre::bail!("built without hardware support; rebuild with --features hardware or pass --sim")
}

/// A configured machine plus the handles the commands need alongside it.
pub struct Instrument {
    pub machine: StateMachine,
    pub clock: Arc<dyn Clock + Send + Sync>,
    /// Present when running against the simulator.
    pub sim: Option<SimBench>,
}

pub fn assemble(cfg: &Config, cli: &Cli, start_in: State) -> Result<Instrument> {
    let clock: Arc<dyn Clock + Send + Sync> = if cli.sim_fast {
        Arc::new(ManualClock::new())
    } else {
        Arc::new(MonotonicClock::new())
    };

    let mut builder = StateMachine::builder()
        .apply_config(cfg)
        .with_clock(clock.clone())
        .start_in(start_in);
    if let Some(path) = cfg.storage.target_file.as_deref() {
        builder = builder.with_target_store(FileTargetStore::new(path));
    }

    let (builder, sim) = if cli.simulated() {
        let bench = SimBench::new(sim_params(cfg), clock.clone());
        let builder = builder
            .with_serial(bench.serial())
            .with_motors(bench.motors())
            .with_inputs(bench.operator())
            .with_indicators(bench.indicators())
            .with_display(bench.display());
        tracing::info!(fast = cli.sim_fast, "using simulated bench");
        (builder, Some(bench))
    } else {
        (with_hardware(builder, cfg)?, None)
    };

    Ok(Instrument {
        machine: builder.try_build()?,
        clock,
        sim,
    })
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn report_charge(n: u32, eval: &Evaluation, machine: &StateMachine, json: bool) {
    let model = machine.model();
    if json {
        let line = serde_json::json!({
            "timestamp": unix_ms(),
            "charge": n,
            "outcome": format!("{:?}", eval.outcome),
            "target_gr": eval.target,
            "measured_gr": eval.measured,
            "elapsed_ms": eval.elapsed_ms,
            "grains_per_rev": model.grains_per_rev(),
            "kernel_weight": model.kernel_weight(),
            "error_margin": model.error_margin(),
        });
        println!("{line}");
    } else {
        println!(
            "charge {n}: {:?} {:.2} gr (target {:.2}) in {:.1} s",
            eval.outcome,
            eval.measured,
            eval.target,
            eval.elapsed_ms as f64 / 1000.0
        );
    }
}

fn is_terminal(state: State, simulated: bool) -> bool {
    // nobody is there to cycle the enable switch on the simulator
    state == State::UnrecoverableError || (simulated && state == State::RecoverableError)
}

/// Run the instrument until the charge budget, the time budget, ctrl-c or a fault.
pub fn run(cfg: &Config, cli: &Cli, opts: &RunOpts, shutdown: &Arc<AtomicBool>) -> Result<()> {
    setup_rt_once(&opts.rt);
    let start_in = if opts.skip_calibration {
        State::Idle
    } else {
        State::Calibration
    };
    let Instrument {
        mut machine,
        clock,
        sim,
    } = assemble(cfg, cli, start_in)?;

    let id = machine
        .rig_mut()
        .scale()
        .identify()
        .wrap_err("identify balance")?;
    tracing::info!(id = %id, target_gr = machine.target(), "trickler started");

    let started = clock.now();
    let mut reported = 0;
    machine.run_until(|m| {
        if m.charges() > reported {
            reported = m.charges();
            if let Some(eval) = m.last_evaluation() {
                report_charge(reported, eval, m, cli.json);
            }
        }
        shutdown.load(Ordering::Relaxed)
            || opts.charges.is_some_and(|n| m.charges() >= n)
            || opts.max_run_ms.is_some_and(|ms| clock.ms_since(started) >= ms)
            || is_terminal(m.state(), sim.is_some())
    });

    machine.rig_mut().halt();
    machine.rig_mut().lights(Lights::OFF);

    if let Some(fault) = machine.fault()
        && is_terminal(machine.state(), sim.is_some())
    {
        return Err(eyre::Report::new(fault));
    }

    let model = machine.model();
    tracing::info!(
        charges = machine.charges(),
        grains_per_rev = model.grains_per_rev(),
        kernel_weight = model.kernel_weight(),
        elapsed_ms = clock.ms_since(started),
        "trickler stopped"
    );
    if !cli.json {
        println!(
            "{} charges; grains/rev {:.2}, kernel {:.4} gr",
            machine.charges(),
            model.grains_per_rev(),
            model.kernel_weight()
        );
    }
    Ok(())
}

pub fn weigh(cfg: &Config, cli: &Cli, window_ms: Option<u64>) -> Result<()> {
    let mut inst = assemble(cfg, cli, State::Idle)?;
    let window = window_ms.unwrap_or(cfg.timing.long_ms);
    let weight = inst
        .machine
        .rig_mut()
        .stable_weight(window)
        .wrap_err("stable reading")?;
    if cli.json {
        println!(
            "{}",
            serde_json::json!({ "timestamp": unix_ms(), "weight_gr": weight, "window_ms": window })
        );
    } else {
        println!("{weight:.2} gr");
    }
    Ok(())
}

pub fn zero(cfg: &Config, cli: &Cli) -> Result<()> {
    let mut inst = assemble(cfg, cli, State::Idle)?;
    inst.machine.rig_mut().scale().zero().wrap_err("re-zero")?;
    if cli.json {
        println!("{}", serde_json::json!({ "timestamp": unix_ms(), "zeroed": true }));
    } else {
        println!("zeroed");
    }
    Ok(())
}

pub fn self_check(cfg: &Config, cli: &Cli) -> Result<()> {
    let mut inst = assemble(cfg, cli, State::Idle)?;
    let scale = inst.machine.rig_mut().scale();
    let id = scale.identify().wrap_err("identify balance")?;
    let weight = scale.read_instant().wrap_err("instant reading")?;
    if cli.json {
        println!(
            "{}",
            serde_json::json!({
                "timestamp": unix_ms(),
                "id": id,
                "weight_gr": weight,
                "simulated": inst.sim.is_some(),
            })
        );
    } else {
        println!("ok: {id}, {weight:.2} gr");
    }
    Ok(())
}
