//! The mount I/O task.
//!
//! The transport under a mount (serial port, UDP socket, bridge stream) is
//! half-duplex and stateful, so exactly one thread owns the device and all
//! traffic is serialized through it. Requests travel over a channel and are
//! executed strictly in order, which also guarantees that rate commands
//! reach the hardware in the order the controller emitted them.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::mount::{Attitude, Axis, FrameKind, MountDevice, MountError, TrackingMode};

enum IoRequest {
    ReadAttitude(Sender<Result<Attitude, MountError>>),
    SlewRate(Axis, f64, Sender<Result<(), MountError>>),
    SlewTo(Axis, f64, Sender<Result<(), MountError>>),
    SetTrackingMode(TrackingMode, Sender<Result<(), MountError>>),
    Cancel(Sender<Result<(), MountError>>),
    Shutdown,
}

/// Cheap cloneable handle to the mount I/O task. Every method is a
/// synchronous round trip through the task's queue.
#[derive(Clone)]
pub struct MountHandle {
    tx: Sender<IoRequest>,
    frame: FrameKind,
    max_slew_rate: f64,
}

impl MountHandle {
    fn round_trip<T>(
        &self,
        build: impl FnOnce(Sender<Result<T, MountError>>) -> IoRequest,
    ) -> Result<T, MountError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(build(reply_tx))
            .map_err(|_| MountError::Transport("mount task is gone".to_string()))?;
        reply_rx
            .recv()
            .map_err(|_| MountError::Transport("mount task is gone".to_string()))?
    }

    pub fn read_attitude(&self) -> Result<Attitude, MountError> {
        self.round_trip(IoRequest::ReadAttitude)
    }

    pub fn slew_rate(&self, axis: Axis, rate: f64) -> Result<(), MountError> {
        self.round_trip(|reply| IoRequest::SlewRate(axis, rate, reply))
    }

    pub fn slew_to(&self, axis: Axis, angle: f64) -> Result<(), MountError> {
        self.round_trip(|reply| IoRequest::SlewTo(axis, angle, reply))
    }

    pub fn set_tracking_mode(&self, mode: TrackingMode) -> Result<(), MountError> {
        self.round_trip(|reply| IoRequest::SetTrackingMode(mode, reply))
    }

    pub fn cancel(&self) -> Result<(), MountError> {
        self.round_trip(IoRequest::Cancel)
    }

    /// Ask the task to halt the mount and exit. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.tx.send(IoRequest::Shutdown);
    }

    /// Constant for the session; cached at spawn, no device round trip.
    pub fn frame_kind(&self) -> FrameKind {
        self.frame
    }

    pub fn max_slew_rate(&self) -> f64 {
        self.max_slew_rate
    }
}

/// Move the device onto its own thread and return the handle.
pub fn spawn(device: MountDevice) -> (MountHandle, JoinHandle<()>) {
    let frame = device.frame_kind();
    let max_slew_rate = device.max_slew_rate();
    let (tx, rx) = mpsc::channel();
    let thread = std::thread::Builder::new()
        .name("mount-io".to_string())
        .spawn(move || run(device, rx))
        .expect("spawn mount-io thread");
    (
        MountHandle {
            tx,
            frame,
            max_slew_rate,
        },
        thread,
    )
}

fn run(mut device: MountDevice, rx: Receiver<IoRequest>) {
    loop {
        match rx.recv() {
            Ok(IoRequest::ReadAttitude(reply)) => {
                let _ = reply.send(device.read_attitude());
            }
            Ok(IoRequest::SlewRate(axis, rate, reply)) => {
                let _ = reply.send(device.slew_rate(axis, rate));
            }
            Ok(IoRequest::SlewTo(axis, angle, reply)) => {
                let _ = reply.send(device.slew_to(axis, angle));
            }
            Ok(IoRequest::SetTrackingMode(mode, reply)) => {
                let _ = reply.send(device.set_tracking_mode(mode));
            }
            Ok(IoRequest::Cancel(reply)) => {
                let _ = reply.send(device.cancel());
            }
            Ok(IoRequest::Shutdown) | Err(_) => break,
        }
    }
    // Last act before releasing the transport: leave the mount stopped.
    debug!("mount task stopping");
    if let Err(e) = device.cancel() {
        warn!("final cancel failed: {e}");
    }
}
