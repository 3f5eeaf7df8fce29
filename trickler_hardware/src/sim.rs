//! Simulated bench: a balance on a serial link, two step/dir motors that
//! drop powder onto the pan, and an operator who empties the pan after each
//! graded charge.
//!
//! All parts share one world and one clock, so the simulation runs equally
//! well on the wall clock or on a `ManualClock` for fast, deterministic runs.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use trickler_traits::{
    Clock, Display, Indicators, Inputs, KERNELS_PER_REV, Lights, MotorDriver, STEPS_PER_REV,
    Screen, SerialPort,
};

type BoxErr = Box<dyn std::error::Error + Send + Sync>;

/// Physical parameters of the simulated instrument.
#[derive(Debug, Clone)]
pub struct SimParams {
    pub response_latency_ms: u64,
    pub grains_per_rev: f32,
    pub kernel_weight: f32,
    /// Relative spread applied to each delivery, e.g. 0.02 for +-2%.
    pub jitter: f32,
    pub steps_per_sec: u32,
    pub steps_per_rev: u32,
    pub kernels_per_rev: u32,
    /// Mass of the empty pan; lifting it reads this much below zero.
    pub pan_mass: f32,
    /// Operator lifts the pan this long after a charge is graded...
    pub remove_after_ms: u64,
    /// ...and puts it back, empty, this long after that.
    pub replace_after_ms: u64,
    /// After calibration the operator switches off, empties the pan and
    /// switches back on once this long has passed since the pan returned.
    pub rearm_after_ms: u64,
    pub seed: u32,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            response_latency_ms: 40,
            grains_per_rev: 62.0,
            kernel_weight: 0.022,
            jitter: 0.02,
            steps_per_sec: 1995,
            steps_per_rev: STEPS_PER_REV,
            kernels_per_rev: KERNELS_PER_REV,
            pan_mass: 250.0,
            remove_after_ms: 1500,
            replace_after_ms: 1500,
            rearm_after_ms: 1000,
            seed: 0x5eed,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Move {
    ends_at: u64,
    deposit: f32,
}

#[derive(Debug, Clone, Copy)]
enum PanSwap {
    RemoveAt(u64),
    ReplaceAt(u64),
}

struct World {
    params: SimParams,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    rng: u32,

    powder: f32,
    pan_on: bool,
    tare: f32,
    swap: Option<PanSwap>,
    pans_emptied: u32,

    rx: VecDeque<u8>,
    pending: Option<(u64, Request)>,

    bulk: Option<Move>,
    trickle: Option<Move>,
    /// Auger steps retracted and not yet re-advanced.
    auger_debt: i64,

    enabled: bool,
    rearm_at: Option<u64>,
    lights: Lights,
}

#[derive(Debug, Clone, Copy)]
enum Request {
    Print,
    Identify,
}

impl World {
    fn now(&self) -> u64 {
        self.clock.ms_since(self.epoch)
    }

    fn gross(&self) -> f32 {
        if self.pan_on {
            self.params.pan_mass + self.powder
        } else {
            0.0
        }
    }

    fn jittered(&mut self, v: f32) -> f32 {
        // xorshift32
        let mut x = self.rng;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.rng = x;
        let unit = x as f32 / u32::MAX as f32;
        v * (1.0 + self.params.jitter * (2.0 * unit - 1.0))
    }

    fn pump(&mut self) {
        let now = self.now();
        if let Some(m) = self.bulk
            && now >= m.ends_at
        {
            self.powder += m.deposit;
            self.bulk = None;
        }
        if let Some(m) = self.trickle
            && now >= m.ends_at
        {
            self.powder += m.deposit;
            self.trickle = None;
        }
        match self.swap {
            Some(PanSwap::RemoveAt(t)) if now >= t => {
                tracing::debug!(powder = self.powder, "operator lifts pan");
                self.pan_on = false;
                self.swap = Some(PanSwap::ReplaceAt(now + self.params.replace_after_ms));
            }
            Some(PanSwap::ReplaceAt(t)) if now >= t => {
                tracing::debug!("operator returns empty pan");
                self.powder = 0.0;
                self.pan_on = true;
                self.swap = None;
                self.pans_emptied += 1;
            }
            _ => {}
        }
        if let Some(t) = self.rearm_at
            && now >= t
            && self.swap.is_none()
        {
            tracing::debug!("operator switches back on");
            self.enabled = true;
            self.rearm_at = None;
        }
        if let Some((t0, req)) = self.pending
            && now.saturating_sub(t0) >= self.params.response_latency_ms
        {
            self.pending = None;
            let frame = match req {
                Request::Print => {
                    let w = self.gross() - self.tare;
                    let sign = if w < 0.0 { '-' } else { '+' };
                    format!("{sign}{:08.2} GN\r\n", w.abs())
                }
                Request::Identify => "ID,SIMULATED\r\n".to_string(),
            };
            self.rx.extend(frame.bytes());
        }
    }

    fn duration_ms(&self, steps: i64) -> u64 {
        let sps = u64::from(self.params.steps_per_sec.max(1));
        (steps.unsigned_abs() * 1000).div_ceil(sps).max(1)
    }
}

/// Handle to the shared simulated instrument.
#[derive(Clone)]
pub struct SimBench {
    world: Rc<RefCell<World>>,
}

impl SimBench {
    pub fn new(params: SimParams, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let epoch = clock.now();
        let tare = params.pan_mass;
        let rng = params.seed.max(1);
        Self {
            world: Rc::new(RefCell::new(World {
                params,
                clock,
                epoch,
                rng,
                powder: 0.0,
                pan_on: true,
                tare,
                swap: None,
                pans_emptied: 0,
                rx: VecDeque::new(),
                pending: None,
                bulk: None,
                trickle: None,
                auger_debt: 0,
                enabled: true,
                rearm_at: None,
                lights: Lights::OFF,
            })),
        }
    }

    pub fn serial(&self) -> SimSerial {
        SimSerial(self.world.clone())
    }

    pub fn motors(&self) -> SimMotors {
        SimMotors(self.world.clone())
    }

    pub fn operator(&self) -> SimOperator {
        SimOperator(self.world.clone())
    }

    pub fn display(&self) -> SimDisplay {
        SimDisplay(self.world.clone())
    }

    pub fn indicators(&self) -> SimIndicators {
        SimIndicators(self.world.clone())
    }

    pub fn set_enabled(&self, on: bool) {
        self.world.borrow_mut().enabled = on;
    }

    /// Net powder on the pan, grains.
    pub fn powder(&self) -> f32 {
        self.world.borrow().powder
    }

    pub fn pans_emptied(&self) -> u32 {
        self.world.borrow().pans_emptied
    }

    pub fn lights(&self) -> Lights {
        self.world.borrow().lights
    }
}

pub struct SimSerial(Rc<RefCell<World>>);

impl SerialPort for SimSerial {
    fn write(&mut self, bytes: &[u8]) -> Result<(), BoxErr> {
        let mut w = self.0.borrow_mut();
        let now = w.now();
        match bytes {
            b"PRT\r" => w.pending = Some((now, Request::Print)),
            b"?ID\r" => w.pending = Some((now, Request::Identify)),
            b"R\r" => w.tare = w.gross(),
            other => tracing::debug!(bytes = ?other, "sim scale ignored command"),
        }
        Ok(())
    }

    fn available(&mut self) -> Result<usize, BoxErr> {
        let mut w = self.0.borrow_mut();
        w.pump();
        Ok(w.rx.len())
    }

    fn read_byte(&mut self) -> Result<Option<u8>, BoxErr> {
        let mut w = self.0.borrow_mut();
        w.pump();
        Ok(w.rx.pop_front())
    }
}

pub struct SimMotors(Rc<RefCell<World>>);

impl MotorDriver for SimMotors {
    fn move_bulk(&mut self, steps: i64) -> Result<(), BoxErr> {
        let mut w = self.0.borrow_mut();
        w.pump();
        let forward = if steps < 0 {
            w.auger_debt += -steps;
            0
        } else {
            let repaid = steps.min(w.auger_debt);
            w.auger_debt -= repaid;
            steps - repaid
        };
        let nominal = forward as f32 / w.params.steps_per_rev as f32 * w.params.grains_per_rev;
        let deposit = w.jittered(nominal);
        let ends_at = w.now() + w.duration_ms(steps);
        w.bulk = Some(Move { ends_at, deposit });
        Ok(())
    }

    fn move_trickle(&mut self, steps: i64) -> Result<(), BoxErr> {
        let mut w = self.0.borrow_mut();
        w.pump();
        let per_kernel = i64::from(w.params.steps_per_rev / w.params.kernels_per_rev.max(1)).max(1);
        let kernels = (steps / per_kernel).max(0);
        let nominal = kernels as f32 * w.params.kernel_weight;
        let deposit = w.jittered(nominal);
        let ends_at = w.now() + w.duration_ms(steps);
        w.trickle = Some(Move { ends_at, deposit });
        Ok(())
    }

    fn is_bulk_moving(&mut self) -> Result<bool, BoxErr> {
        let mut w = self.0.borrow_mut();
        w.pump();
        Ok(w.bulk.is_some())
    }

    fn is_trickle_moving(&mut self) -> Result<bool, BoxErr> {
        let mut w = self.0.borrow_mut();
        w.pump();
        Ok(w.trickle.is_some())
    }

    fn stop_all(&mut self) -> Result<(), BoxErr> {
        let mut w = self.0.borrow_mut();
        w.bulk = None;
        w.trickle = None;
        tracing::debug!("sim motors stopped");
        Ok(())
    }

    fn steps_per_rev(&self) -> u32 {
        self.0.borrow().params.steps_per_rev
    }

    fn kernels_per_rev(&self) -> u32 {
        self.0.borrow().params.kernels_per_rev
    }
}

/// Enable switch held on, apart from the post-calibration cycle; buttons untouched.
pub struct SimOperator(Rc<RefCell<World>>);

impl Inputs for SimOperator {
    fn enabled(&mut self) -> bool {
        let mut w = self.0.borrow_mut();
        w.pump();
        w.enabled
    }

    fn up_pressed(&mut self) -> bool {
        false
    }

    fn down_pressed(&mut self) -> bool {
        false
    }
}

/// Logs every screen; a graded charge prompts the operator to empty the pan,
/// a finished calibration to switch off, empty the pan and switch back on.
pub struct SimDisplay(Rc<RefCell<World>>);

impl Display for SimDisplay {
    fn show(&mut self, screen: &Screen) {
        tracing::info!(?screen, "display");
        let mut w = self.0.borrow_mut();
        match screen {
            Screen::Charge { .. } if w.swap.is_none() => {
                let at = w.now() + w.params.remove_after_ms;
                w.swap = Some(PanSwap::RemoveAt(at));
            }
            Screen::CalibrationComplete { .. } => {
                let now = w.now();
                let remove = now + w.params.remove_after_ms;
                w.enabled = false;
                w.swap = Some(PanSwap::RemoveAt(remove));
                w.rearm_at =
                    Some(remove + w.params.replace_after_ms + w.params.rearm_after_ms);
            }
            _ => {}
        }
    }
}

pub struct SimIndicators(Rc<RefCell<World>>);

impl Indicators for SimIndicators {
    fn set_lights(&mut self, lights: Lights) {
        tracing::debug!(
            green = lights.green,
            yellow = lights.yellow,
            red = lights.red,
            "lights"
        );
        self.0.borrow_mut().lights = lights;
    }
}
