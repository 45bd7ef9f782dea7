//! The uniform mount interface and its error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::nexstar::NexStar;
use crate::remote::RemoteMount;
use crate::sim::SimMount;
use crate::skywatcher::SkyWatcher;

/// The two mechanical axes of a mount. Primary is azimuth on an alt-az
/// mount and right ascension on an equatorial one; secondary is elevation
/// or declination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Primary,
    Secondary,
}

/// How a mount's axes are oriented relative to the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameKind {
    #[serde(rename = "altaz")]
    AltAz,
    #[serde(rename = "eq")]
    Equatorial,
}

/// Built-in sky tracking modes. Only NexStar mounts act on this; the
/// Sky-Watcher motor protocol has no equivalent and treats it as a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackingMode {
    Off,
    AltAz,
}

/// A mount-frame attitude reading: both axis angles in radians. Not yet
/// corrected by the alignment offset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Attitude {
    pub axis1: f64,
    pub axis2: f64,
}

#[derive(Error, Debug)]
pub enum MountError {
    /// The transport under the mount (serial port, UDP socket, bridge
    /// connection) failed.
    #[error("mount transport: {0}")]
    Transport(String),

    /// The mount answered, but with something that does not decode.
    #[error("mount protocol: {0}")]
    Protocol(String),

    /// The mount reported an error of its own.
    #[error("mount device: {0}")]
    Device(String),

    /// The operation does not exist on this protocol.
    #[error("operation not supported by this mount")]
    Unsupported,

    /// The mount is busy with a conflicting operation.
    #[error("mount busy")]
    Busy,
}

impl From<std::io::Error> for MountError {
    fn from(e: std::io::Error) -> Self {
        MountError::Transport(e.to_string())
    }
}

/// Every mount the system can drive, one variant per protocol.
pub enum MountDevice {
    NexStar(NexStar),
    SkyWatcher(SkyWatcher),
    Sim(SimMount),
    Remote(RemoteMount),
}

impl MountDevice {
    /// Current mount-frame attitude. Fresh: every call is a round trip to
    /// the device.
    pub fn read_attitude(&mut self) -> Result<Attitude, MountError> {
        match self {
            MountDevice::NexStar(m) => m.read_attitude(),
            MountDevice::SkyWatcher(m) => m.read_attitude(),
            MountDevice::Sim(m) => m.read_attitude(),
            MountDevice::Remote(m) => m.read_attitude(),
        }
    }

    /// Command a signed slew rate in radians per second on one axis. The
    /// rate persists until superseded. Magnitude is clamped to
    /// [`max_slew_rate`](Self::max_slew_rate).
    pub fn slew_rate(&mut self, axis: Axis, rate: f64) -> Result<(), MountError> {
        match self {
            MountDevice::NexStar(m) => m.slew_rate(axis, rate),
            MountDevice::SkyWatcher(m) => m.slew_rate(axis, rate),
            MountDevice::Sim(m) => m.slew_rate(axis, rate),
            MountDevice::Remote(m) => m.slew_rate(axis, rate),
        }
    }

    /// Start an absolute slew of one axis to a mount-frame angle.
    /// Returns once motion has begun, not when it completes. Protocols
    /// without an absolute slew return [`MountError::Unsupported`].
    pub fn slew_to(&mut self, axis: Axis, angle: f64) -> Result<(), MountError> {
        match self {
            MountDevice::NexStar(m) => m.slew_to(axis, angle),
            MountDevice::SkyWatcher(_) => Err(MountError::Unsupported),
            MountDevice::Sim(m) => m.slew_to(axis, angle),
            MountDevice::Remote(m) => m.slew_to(axis, angle),
        }
    }

    pub fn set_tracking_mode(&mut self, mode: TrackingMode) -> Result<(), MountError> {
        match self {
            MountDevice::NexStar(m) => m.set_tracking_mode(mode),
            MountDevice::SkyWatcher(m) => m.set_tracking_mode(mode),
            MountDevice::Sim(m) => m.set_tracking_mode(mode),
            MountDevice::Remote(m) => m.set_tracking_mode(mode),
        }
    }

    /// Halt all motion: rates to zero, any absolute slew abandoned.
    pub fn cancel(&mut self) -> Result<(), MountError> {
        match self {
            MountDevice::NexStar(m) => m.cancel(),
            MountDevice::SkyWatcher(m) => m.cancel(),
            MountDevice::Sim(m) => m.cancel(),
            MountDevice::Remote(m) => m.cancel(),
        }
    }

    /// Which frame the axes are in. Constant for the session.
    pub fn frame_kind(&self) -> FrameKind {
        match self {
            MountDevice::NexStar(m) => m.frame_kind(),
            MountDevice::SkyWatcher(m) => m.frame_kind(),
            MountDevice::Sim(m) => m.frame_kind(),
            MountDevice::Remote(m) => m.frame_kind(),
        }
    }

    /// Largest rate magnitude the protocol can command, radians per second.
    pub fn max_slew_rate(&self) -> f64 {
        match self {
            MountDevice::NexStar(_) => NexStar::MAX_SLEW_RATE,
            MountDevice::SkyWatcher(_) => SkyWatcher::MAX_SLEW_RATE,
            MountDevice::Sim(_) => SimMount::MAX_SLEW_RATE,
            MountDevice::Remote(m) => m.max_slew_rate(),
        }
    }
}
