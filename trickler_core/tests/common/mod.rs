//! Scripted bench shared by the integration tests: a balance that answers
//! `PRT` after a fixed latency, step/dir motors that drop powder when a move
//! finishes, and an operator panel, all on one virtual clock.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::error::Error;
use std::rc::Rc;
use std::sync::Arc;

use trickler_config::MemoryTargetStore;
use trickler_core::{State, StateMachine, TimingCfg};
use trickler_traits::{
    Display, Indicators, Inputs, Lights, ManualClock, MotorDriver, Screen, SerialPort,
};

type BoxErr = Box<dyn Error + Send + Sync>;

/// Virtual steps per millisecond for both motors.
const STEPS_PER_MS: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleMode {
    Normal,
    Silent,
    Garbage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Bulk,
    Trickle,
}

#[derive(Debug, Clone, Copy)]
struct Motion {
    ends_at: u64,
    deposit: f32,
}

pub struct World {
    pub clock: ManualClock,
    pub pan: f32,
    tare: f32,
    pub scale_mode: ScaleMode,
    latency_ms: u64,
    pending_since: Option<u64>,
    pending_is_print: bool,
    rx: VecDeque<u8>,

    /// Grains actually delivered per auger revolution.
    pub true_grains_per_rev: f32,
    /// Grains actually delivered per kernel.
    pub true_kernel_weight: f32,
    /// Overrides for the next forward bulk throws, grains each.
    pub bulk_script: VecDeque<f32>,
    /// Overrides for the next trickle moves, grains each.
    pub trickle_script: VecDeque<f32>,
    bulk: Option<Motion>,
    trickle: Option<Motion>,
    pub moves: Vec<(Axis, i64)>,
    pub stops: u32,

    pub enabled: bool,
    pub up: bool,
    pub down: bool,
    pub enable_polls: u32,
    /// Enable reads false from this poll number on.
    pub drop_enable_at_poll: Option<u32>,
    /// Enable reads false from this virtual time on.
    pub drop_enable_at_ms: Option<u64>,
    /// Both buttons read released from this virtual time on.
    pub release_buttons_at_ms: Option<u64>,

    pub lights: Vec<Lights>,
    pub screens: Vec<Screen>,
}

impl World {
    fn now(&self) -> u64 {
        self.clock.elapsed_ms()
    }

    fn pump(&mut self) {
        let now = self.now();
        for slot in [&mut self.bulk, &mut self.trickle] {
            if let Some(m) = *slot
                && now >= m.ends_at
            {
                self.pan += m.deposit;
                *slot = None;
            }
        }
        if let Some(t0) = self.pending_since
            && now - t0 >= self.latency_ms
        {
            self.pending_since = None;
            let frame = if !self.pending_is_print {
                "ID,FX-120i\r\n".to_string()
            } else {
                match self.scale_mode {
                    ScaleMode::Normal => {
                        let w = self.pan - self.tare;
                        let sign = if w < 0.0 { '-' } else { '+' };
                        format!("{sign}{:08.2} GN\r\n", w.abs())
                    }
                    ScaleMode::Garbage => "+000A2.00 GN\r\n".to_string(),
                    ScaleMode::Silent => String::new(),
                }
            };
            self.rx.extend(frame.bytes());
        }
    }

    fn begin_move(&mut self, axis: Axis, steps: i64) {
        self.moves.push((axis, steps));
        let ends_at = self.now() + (steps.abs() / STEPS_PER_MS).max(1) as u64;
        let deposit = match axis {
            // the 50-step re-advance after a retract never reaches the chute
            Axis::Bulk if steps > 50 => self
                .bulk_script
                .pop_front()
                .unwrap_or(steps as f32 / 6400.0 * self.true_grains_per_rev),
            Axis::Bulk => 0.0,
            Axis::Trickle => self
                .trickle_script
                .pop_front()
                .unwrap_or((steps / 100) as f32 * self.true_kernel_weight),
        };
        let m = Some(Motion { ends_at, deposit });
        match axis {
            Axis::Bulk => self.bulk = m,
            Axis::Trickle => self.trickle = m,
        }
    }

    fn buttons_released(&self) -> bool {
        self.release_buttons_at_ms.is_some_and(|t| self.now() >= t)
    }

    pub fn trickle_moves(&self) -> Vec<i64> {
        self.moves
            .iter()
            .filter(|(a, _)| *a == Axis::Trickle)
            .map(|(_, s)| *s)
            .collect()
    }
}

pub type Shared = Rc<RefCell<World>>;

struct Balance(Shared);

impl SerialPort for Balance {
    fn write(&mut self, bytes: &[u8]) -> Result<(), BoxErr> {
        let mut w = self.0.borrow_mut();
        match bytes {
            b"PRT\r" | b"?ID\r" => {
                w.pending_since = Some(w.now());
                w.pending_is_print = bytes == b"PRT\r";
            }
            b"R\r" => w.tare = w.pan,
            _ => {}
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

struct Motors(Shared);

impl MotorDriver for Motors {
    fn move_bulk(&mut self, steps: i64) -> Result<(), BoxErr> {
        self.0.borrow_mut().begin_move(Axis::Bulk, steps);
        Ok(())
    }

    fn move_trickle(&mut self, steps: i64) -> Result<(), BoxErr> {
        self.0.borrow_mut().begin_move(Axis::Trickle, steps);
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
        w.stops += 1;
        w.bulk = None;
        w.trickle = None;
        Ok(())
    }
}

struct Panel(Shared);

impl Inputs for Panel {
    fn enabled(&mut self) -> bool {
        let mut w = self.0.borrow_mut();
        w.enable_polls += 1;
        if w.drop_enable_at_poll.is_some_and(|n| w.enable_polls >= n) {
            return false;
        }
        if w.drop_enable_at_ms.is_some_and(|t| w.now() >= t) {
            return false;
        }
        w.enabled
    }

    fn up_pressed(&mut self) -> bool {
        let w = self.0.borrow();
        w.up && !w.buttons_released()
    }

    fn down_pressed(&mut self) -> bool {
        let w = self.0.borrow();
        w.down && !w.buttons_released()
    }
}

struct Outputs(Shared);

impl Indicators for Outputs {
    fn set_lights(&mut self, lights: Lights) {
        self.0.borrow_mut().lights.push(lights);
    }
}

impl Display for Outputs {
    fn show(&mut self, screen: &Screen) {
        self.0.borrow_mut().screens.push(screen.clone());
    }
}

pub struct Bench {
    pub world: Shared,
    pub store: MemoryTargetStore,
    pub machine: StateMachine,
}

impl Bench {
    pub fn new(start: State) -> Self {
        Self::configured(start, TimingCfg::default(), MemoryTargetStore::default())
    }

    pub fn with_store(start: State, store: MemoryTargetStore) -> Self {
        Self::configured(start, TimingCfg::default(), store)
    }

    pub fn configured(start: State, timing: TimingCfg, store: MemoryTargetStore) -> Self {
        let clock = ManualClock::new();
        let world = Rc::new(RefCell::new(World {
            clock: clock.clone(),
            pan: 0.0,
            tare: 0.0,
            scale_mode: ScaleMode::Normal,
            latency_ms: 20,
            pending_since: None,
            pending_is_print: true,
            rx: VecDeque::new(),
            true_grains_per_rev: 65.0,
            true_kernel_weight: 0.021,
            bulk_script: VecDeque::new(),
            trickle_script: VecDeque::new(),
            bulk: None,
            trickle: None,
            moves: Vec::new(),
            stops: 0,
            enabled: true,
            up: false,
            down: false,
            enable_polls: 0,
            drop_enable_at_poll: None,
            drop_enable_at_ms: None,
            release_buttons_at_ms: None,
            lights: Vec::new(),
            screens: Vec::new(),
        }));
        let machine = StateMachine::builder()
            .with_serial(Balance(world.clone()))
            .with_motors(Motors(world.clone()))
            .with_inputs(Panel(world.clone()))
            .with_indicators(Outputs(world.clone()))
            .with_display(Outputs(world.clone()))
            .with_target_store(store.clone())
            .with_clock(Arc::new(clock))
            .with_timing(timing)
            .with_target(32.0)
            .start_in(start)
            .try_build()
            .expect("bench builds");
        Self {
            world,
            store,
            machine,
        }
    }

    pub fn w(&self) -> std::cell::RefMut<'_, World> {
        self.world.borrow_mut()
    }

    pub fn now_ms(&self) -> u64 {
        self.world.borrow().clock.elapsed_ms()
    }

    /// Step until the machine leaves `state`, or panic after `limit` steps.
    pub fn step_while(&mut self, state: State, limit: usize) -> State {
        for _ in 0..limit {
            let next = self.machine.step();
            if next != state {
                return next;
            }
        }
        panic!("still in {state:?} after {limit} steps");
    }

    pub fn last_lights(&self) -> Option<Lights> {
        self.world.borrow().lights.last().copied()
    }
}
