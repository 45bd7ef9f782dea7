//! In-memory mount simulator for hardware-out-of-the-loop runs.
//!
//! Conforms to the same operation set as the real adapters: rate commands
//! integrate forward in time, absolute slews converge at a fixed rate, and
//! position reads are quantized to the 24-bit resolution of the real
//! devices. Time is advanced explicitly with [`SimMount::advance`] so tests
//! are deterministic; binaries attach a wall-clock pump thread with
//! [`SimMount::start_clock`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::mount::{Attitude, Axis, FrameKind, MountError, TrackingMode};
use shared::angle::wrap_rad;

/// Simulated absolute slews move at this rate, radians per second.
const GOTO_RATE: f64 = 45.0_f64 * std::f64::consts::PI / 180.0;

/// Position reads quantize to 24-bit fractions of a turn, like the real
/// protocols.
const QUANTUM: f64 = std::f64::consts::TAU / (1 << 24) as f64;

/// Everything a test might want to observe about commanded motion.
#[derive(Debug, Clone, Default)]
pub struct CommandLog {
    pub rates: Vec<(Axis, f64)>,
    pub cancels: u64,
    pub gotos: u64,
}

#[derive(Debug)]
struct SimState {
    axis: [f64; 2],
    rate: [f64; 2],
    goto_target: [Option<f64>; 2],
    tracking: TrackingMode,
    log: CommandLog,
}

/// The simulated mount. Clones share state, so a test can hold one handle
/// while the controller drives another.
#[derive(Clone)]
pub struct SimMount {
    frame: FrameKind,
    state: Arc<Mutex<SimState>>,
}

impl SimMount {
    /// The simulator accepts any rate a controller is likely to ask for.
    pub const MAX_SLEW_RATE: f64 = 3.5;

    pub fn new(frame: FrameKind) -> Self {
        Self {
            frame,
            state: Arc::new(Mutex::new(SimState {
                axis: [0.0, 0.0],
                rate: [0.0, 0.0],
                goto_target: [None, None],
                tracking: TrackingMode::Off,
                log: CommandLog::default(),
            })),
        }
    }

    /// Place the mount at an exact attitude, for test setup.
    pub fn set_attitude(&self, axis1: f64, axis2: f64) {
        let mut state = self.state.lock().unwrap();
        state.axis = [axis1, axis2];
    }

    /// Integrate `dt` seconds of motion.
    pub fn advance(&self, dt: f64) {
        let mut state = self.state.lock().unwrap();
        for i in 0..2 {
            if let Some(target) = state.goto_target[i] {
                let error = shared::angle::wrap_signed(target - state.axis[i]);
                let step = GOTO_RATE * dt;
                if error.abs() <= step {
                    state.axis[i] = target;
                    state.goto_target[i] = None;
                } else {
                    state.axis[i] = wrap_rad(state.axis[i] + step * error.signum(), 0.0);
                }
            } else {
                state.axis[i] = wrap_rad(state.axis[i] + state.rate[i] * dt, 0.0);
            }
        }
    }

    /// Drive [`advance`](Self::advance) from the wall clock on a background
    /// thread until the returned guard is dropped.
    pub fn start_clock(&self) -> SimClock {
        let mount = self.clone();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = stop.clone();
        let thread = std::thread::spawn(move || {
            let mut last = Instant::now();
            while !stop_thread.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(20));
                let now = Instant::now();
                mount.advance((now - last).as_secs_f64());
                last = now;
            }
        });
        SimClock {
            stop,
            thread: Some(thread),
        }
    }

    /// Snapshot of every command the simulator has received.
    pub fn command_log(&self) -> CommandLog {
        self.state.lock().unwrap().log.clone()
    }

    pub fn read_attitude(&mut self) -> Result<Attitude, MountError> {
        let state = self.state.lock().unwrap();
        let quantize = |x: f64| (wrap_rad(x, 0.0) / QUANTUM).round() * QUANTUM;
        Ok(Attitude {
            axis1: quantize(state.axis[0]),
            axis2: quantize(state.axis[1]),
        })
    }

    pub fn slew_rate(&mut self, axis: Axis, rate: f64) -> Result<(), MountError> {
        let mut state = self.state.lock().unwrap();
        let rate = rate.clamp(-Self::MAX_SLEW_RATE, Self::MAX_SLEW_RATE);
        state.log.rates.push((axis, rate));
        let i = axis_index(axis);
        state.rate[i] = rate;
        state.goto_target[i] = None;
        Ok(())
    }

    pub fn slew_to(&mut self, axis: Axis, angle: f64) -> Result<(), MountError> {
        let mut state = self.state.lock().unwrap();
        state.log.gotos += 1;
        let i = axis_index(axis);
        state.goto_target[i] = Some(wrap_rad(angle, 0.0));
        state.rate[i] = 0.0;
        Ok(())
    }

    pub fn set_tracking_mode(&mut self, mode: TrackingMode) -> Result<(), MountError> {
        self.state.lock().unwrap().tracking = mode;
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), MountError> {
        let mut state = self.state.lock().unwrap();
        state.log.cancels += 1;
        state.rate = [0.0, 0.0];
        state.goto_target = [None, None];
        Ok(())
    }

    pub fn frame_kind(&self) -> FrameKind {
        self.frame
    }
}

/// Stops the wall-clock pump when dropped.
pub struct SimClock {
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Drop for SimClock {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn axis_index(axis: Axis) -> usize {
    match axis {
        Axis::Primary => 0,
        Axis::Secondary => 1,
    }
}
