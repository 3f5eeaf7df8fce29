//! Raspberry Pi backends: UART balance link, GPIO panel and LEDs, and
//! step/dir drivers pulsed from worker threads.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use rppal::gpio::{Gpio, InputPin, OutputPin};
use rppal::uart::{Parity, Uart};
use trickler_traits::{Indicators, Inputs, Lights, MotorDriver, SerialPort};

use crate::error::{HwError, Result};

type BoxErr = Box<dyn std::error::Error + Send + Sync>;

fn uart_err(e: rppal::uart::Error) -> HwError {
    HwError::Uart(e.to_string())
}

fn gpio_err(e: rppal::gpio::Error) -> HwError {
    HwError::Gpio(e.to_string())
}

pub struct PiSerial {
    uart: Uart,
}

impl PiSerial {
    /// Open the balance link, 8N1, non-blocking reads.
    pub fn open(path: &str, baud: u32) -> Result<Self> {
        let mut uart = Uart::with_path(path, baud, Parity::None, 8, 1).map_err(uart_err)?;
        uart.set_read_mode(0, Duration::ZERO).map_err(uart_err)?;
        uart.set_write_mode(true).map_err(uart_err)?;
        tracing::info!(path, baud, "uart open");
        Ok(Self { uart })
    }
}

impl SerialPort for PiSerial {
    fn write(&mut self, bytes: &[u8]) -> std::result::Result<(), BoxErr> {
        let mut sent = 0;
        while sent < bytes.len() {
            sent += self.uart.write(&bytes[sent..]).map_err(uart_err)?;
        }
        Ok(())
    }

    fn available(&mut self) -> std::result::Result<usize, BoxErr> {
        Ok(self.uart.input_len().map_err(uart_err)?)
    }

    fn read_byte(&mut self) -> std::result::Result<Option<u8>, BoxErr> {
        let mut b = [0u8; 1];
        let n = self.uart.read(&mut b).map_err(uart_err)?;
        Ok((n == 1).then_some(b[0]))
    }
}

/// Enable switch (active high) and up/down buttons (active low, pulled up).
pub struct PiPanel {
    enable: InputPin,
    up: InputPin,
    down: InputPin,
}

impl PiPanel {
    pub fn new(enable: u8, up: u8, down: u8) -> Result<Self> {
        let gpio = Gpio::new().map_err(gpio_err)?;
        Ok(Self {
            enable: gpio.get(enable).map_err(gpio_err)?.into_input_pulldown(),
            up: gpio.get(up).map_err(gpio_err)?.into_input_pullup(),
            down: gpio.get(down).map_err(gpio_err)?.into_input_pullup(),
        })
    }
}

impl Inputs for PiPanel {
    fn enabled(&mut self) -> bool {
        self.enable.is_high()
    }

    fn up_pressed(&mut self) -> bool {
        self.up.is_low()
    }

    fn down_pressed(&mut self) -> bool {
        self.down.is_low()
    }
}

pub struct PiIndicators {
    green: OutputPin,
    yellow: OutputPin,
    red: OutputPin,
}

impl PiIndicators {
    pub fn new(green: u8, yellow: u8, red: u8) -> Result<Self> {
        let gpio = Gpio::new().map_err(gpio_err)?;
        Ok(Self {
            green: gpio.get(green).map_err(gpio_err)?.into_output_low(),
            yellow: gpio.get(yellow).map_err(gpio_err)?.into_output_low(),
            red: gpio.get(red).map_err(gpio_err)?.into_output_low(),
        })
    }
}

fn drive(pin: &mut OutputPin, on: bool) {
    if on {
        pin.set_high();
    } else {
        pin.set_low();
    }
}

impl Indicators for PiIndicators {
    fn set_lights(&mut self, lights: Lights) {
        drive(&mut self.green, lights.green);
        drive(&mut self.yellow, lights.yellow);
        drive(&mut self.red, lights.red);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StepperPins {
    pub step: u8,
    pub dir: u8,
    /// Driver enable, active low.
    pub enable: u8,
}

enum Command {
    Move(i64),
    Stop,
}

struct Axis {
    name: &'static str,
    tx: Sender<Command>,
    moving: Arc<AtomicBool>,
}

impl Axis {
    fn spawn(name: &'static str, gpio: &Gpio, pins: StepperPins, steps_per_sec: u32) -> Result<Self> {
        let mut pulses = Pulses {
            step: gpio.get(pins.step).map_err(gpio_err)?.into_output_low(),
            dir: gpio.get(pins.dir).map_err(gpio_err)?.into_output_low(),
            enable: gpio.get(pins.enable).map_err(gpio_err)?.into_output_high(),
            half_period: Duration::from_micros(500_000 / u64::from(steps_per_sec.max(1))),
        };
        let (tx, rx) = crossbeam_channel::unbounded();
        let moving = Arc::new(AtomicBool::new(false));
        let flag = moving.clone();
        thread::Builder::new()
            .name(format!("stepper-{name}"))
            .spawn(move || pulses.run(&rx, &flag))?;
        Ok(Self { name, tx, moving })
    }

    fn command(&self, cmd: Command) -> Result<()> {
        self.tx.send(cmd).map_err(|_| HwError::WorkerGone(self.name))
    }

    fn start(&self, steps: i64) -> Result<()> {
        if steps == 0 {
            return Ok(());
        }
        // flag first so a poll right after this call never sees "idle"
        self.moving.store(true, Ordering::Release);
        self.command(Command::Move(steps))
    }
}

struct Pulses {
    step: OutputPin,
    dir: OutputPin,
    enable: OutputPin,
    half_period: Duration,
}

impl Pulses {
    fn run(&mut self, rx: &Receiver<Command>, moving: &AtomicBool) {
        let mut queue = VecDeque::new();
        loop {
            let Some(steps) = queue.pop_front() else {
                moving.store(false, Ordering::Release);
                self.enable.set_high();
                match rx.recv() {
                    Ok(Command::Move(n)) => queue.push_back(n),
                    Ok(Command::Stop) => {}
                    Err(_) => return,
                }
                continue;
            };
            moving.store(true, Ordering::Release);
            self.enable.set_low();
            drive(&mut self.dir, steps > 0);
            for _ in 0..steps.unsigned_abs() {
                match rx.try_recv() {
                    Ok(Command::Stop) => {
                        queue.clear();
                        break;
                    }
                    Ok(Command::Move(n)) => queue.push_back(n),
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => return,
                }
                self.step.set_high();
                thread::sleep(self.half_period);
                self.step.set_low();
                thread::sleep(self.half_period);
            }
        }
    }
}

/// Bulk auger and trickler disk drivers.
pub struct PiSteppers {
    bulk: Axis,
    trickle: Axis,
    steps_per_rev: u32,
    kernels_per_rev: u32,
}

impl PiSteppers {
    pub fn new(
        bulk: StepperPins,
        trickle: StepperPins,
        steps_per_sec: u32,
        steps_per_rev: u32,
        kernels_per_rev: u32,
    ) -> Result<Self> {
        let gpio = Gpio::new().map_err(gpio_err)?;
        Ok(Self {
            bulk: Axis::spawn("bulk", &gpio, bulk, steps_per_sec)?,
            trickle: Axis::spawn("trickle", &gpio, trickle, steps_per_sec)?,
            steps_per_rev,
            kernels_per_rev,
        })
    }
}

impl MotorDriver for PiSteppers {
    fn move_bulk(&mut self, steps: i64) -> std::result::Result<(), BoxErr> {
        Ok(self.bulk.start(steps)?)
    }

    fn move_trickle(&mut self, steps: i64) -> std::result::Result<(), BoxErr> {
        Ok(self.trickle.start(steps)?)
    }

    fn is_bulk_moving(&mut self) -> std::result::Result<bool, BoxErr> {
        Ok(self.bulk.moving.load(Ordering::Acquire))
    }

    fn is_trickle_moving(&mut self) -> std::result::Result<bool, BoxErr> {
        Ok(self.trickle.moving.load(Ordering::Acquire))
    }

    fn stop_all(&mut self) -> std::result::Result<(), BoxErr> {
        self.bulk.command(Command::Stop)?;
        self.trickle.command(Command::Stop)?;
        Ok(())
    }

    fn steps_per_rev(&self) -> u32 {
        self.steps_per_rev
    }

    fn kernels_per_rev(&self) -> u32 {
        self.kernels_per_rev
    }
}
