//! Shared state between the control loop and the operator's display.
//!
//! The display is a separate concern (and process boundary, eventually);
//! what crosses it is small: a status snapshot going out once per cycle,
//! and the operator's inputs (selection, manual bias, gains) coming in.
//! Both are read-mostly and fit comfortably behind a mutex.

use std::sync::{Arc, Mutex};

use shared::config::Gains;
use shared::target::TargetId;

use crate::fusion::TargetInfo;

/// Small manual bias step, one keypress.
pub const NUDGE_SMALL: f64 = 0.05 * std::f64::consts::PI / 180.0;
/// Large manual bias step.
pub const NUDGE_LARGE: f64 = 0.5 * std::f64::consts::PI / 180.0;

/// Full-screen warnings the display must show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Banner {
    #[default]
    None,
    /// The mount has not answered for over a second.
    CommFailure,
    /// The boresight or the target strayed inside the Sun keep-out circle.
    SunLockout,
}

/// The pointing controller's externally visible state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlMode {
    #[default]
    Idle,
    Slewing,
    Tracking,
    SunLockout,
}

/// One frame of display state.
#[derive(Debug, Clone, Default)]
pub struct Status {
    /// Where the mount is pointing, world frame az/el.
    pub mount_azel: Option<(f64, f64)>,
    pub sun_azel: Option<(f64, f64)>,
    pub moon_azel: Option<(f64, f64)>,
    pub targets: Vec<TargetInfo>,
    pub selected: Option<TargetId>,
    pub mode: ControlMode,
    pub banner: Banner,
}

/// Snapshot store the controller writes and the display reads.
#[derive(Clone, Default)]
pub struct StatusBoard {
    inner: Arc<Mutex<Status>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, f: impl FnOnce(&mut Status)) {
        let mut status = self.inner.lock().unwrap();
        f(&mut status);
    }

    pub fn snapshot(&self) -> Status {
        self.inner.lock().unwrap().clone()
    }
}

#[derive(Debug, Clone)]
struct Inputs {
    selected: Option<TargetId>,
    bias_az: f64,
    bias_el: f64,
    gains: Gains,
    /// Bumped on every gain change so the controller knows to reset.
    gain_epoch: u64,
}

/// Snapshot of the operator inputs for one controller tick.
#[derive(Debug, Clone)]
pub struct InputSnapshot {
    pub selected: Option<TargetId>,
    pub bias_az: f64,
    pub bias_el: f64,
    pub gains: Gains,
    pub gain_epoch: u64,
}

/// The operator's input state, written by the display, read by the
/// controller. Selection can also be cleared by the controller itself on
/// target loss and Sun lockout.
#[derive(Clone)]
pub struct InputState {
    inner: Arc<Mutex<Inputs>>,
}

impl InputState {
    pub fn new(gains: Gains) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inputs {
                selected: None,
                bias_az: 0.0,
                bias_el: 0.0,
                gains,
                gain_epoch: 0,
            })),
        }
    }

    pub fn snapshot(&self) -> InputSnapshot {
        let inputs = self.inner.lock().unwrap();
        InputSnapshot {
            selected: inputs.selected.clone(),
            bias_az: inputs.bias_az,
            bias_el: inputs.bias_el,
            gains: inputs.gains,
            gain_epoch: inputs.gain_epoch,
        }
    }

    /// Select a target to track. Resets the manual bias.
    pub fn select(&self, id: TargetId) {
        let mut inputs = self.inner.lock().unwrap();
        inputs.selected = Some(id);
        inputs.bias_az = 0.0;
        inputs.bias_el = 0.0;
    }

    /// Stop tracking; also clears the manual bias.
    pub fn clear_selection(&self) {
        let mut inputs = self.inner.lock().unwrap();
        inputs.selected = None;
        inputs.bias_az = 0.0;
        inputs.bias_el = 0.0;
    }

    /// Apply a manual az/el bias step from the keyboard.
    pub fn nudge(&self, d_az: f64, d_el: f64) {
        let mut inputs = self.inner.lock().unwrap();
        inputs.bias_az += d_az;
        inputs.bias_el += d_el;
    }

    pub fn set_gains(&self, gains: Gains) {
        let mut inputs = self.inner.lock().unwrap();
        inputs.gains = gains;
        inputs.gain_epoch += 1;
    }
}
