//! Mount operations over the RPC bridge.
//!
//! [`RemoteMount`] is the tracker-side client: it forwards each mount
//! operation to the bridge process as an RPC method. [`dispatch`] is the
//! bridge-side half, translating the same methods back into calls on a
//! [`MountHandle`]. Both halves share the little wire structs here, so the
//! encoding cannot drift between them.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use rpc::{ErrorKind, RpcClient, RpcError, ServiceError};

use crate::io::MountHandle;
use crate::mount::{Attitude, Axis, FrameKind, MountError, TrackingMode};

#[derive(Debug, Serialize, Deserialize)]
struct AxisRate {
    axis: Axis,
    rate: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct AxisAngle {
    axis: Axis,
    angle: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct Mode {
    mode: TrackingMode,
}

/// A mount that lives on the far side of a bridge connection.
pub struct RemoteMount {
    client: RpcClient,
    frame: FrameKind,
    max_slew_rate: f64,
}

impl RemoteMount {
    /// Connect to a bridge at `host:port` and interrogate its constants.
    pub fn connect(addr: &str) -> Result<Self, MountError> {
        let mut client = RpcClient::new(addr);
        let hello = call(&mut client, "hello", Value::Null)?;
        if hello != json!("hello") {
            return Err(MountError::Protocol(format!(
                "bridge hello returned {hello}"
            )));
        }

        let frame: FrameKind = decode(call(&mut client, "frame_kind", Value::Null)?)?;
        let max_slew_rate: f64 = decode(call(&mut client, "max_slew_rate", Value::Null)?)?;
        debug!(addr, ?frame, max_slew_rate, "bridge connected");
        Ok(Self {
            client,
            frame,
            max_slew_rate,
        })
    }

    pub fn read_attitude(&mut self) -> Result<Attitude, MountError> {
        decode(call(&mut self.client, "read_attitude", Value::Null)?)
    }

    pub fn slew_rate(&mut self, axis: Axis, rate: f64) -> Result<(), MountError> {
        let params = serde_json::to_value(AxisRate { axis, rate }).expect("serializable");
        call(&mut self.client, "slew_rate", params).map(|_| ())
    }

    pub fn slew_to(&mut self, axis: Axis, angle: f64) -> Result<(), MountError> {
        let params = serde_json::to_value(AxisAngle { axis, angle }).expect("serializable");
        call(&mut self.client, "slew_to", params).map(|_| ())
    }

    pub fn set_tracking_mode(&mut self, mode: TrackingMode) -> Result<(), MountError> {
        let params = serde_json::to_value(Mode { mode }).expect("serializable");
        call(&mut self.client, "set_tracking_mode", params).map(|_| ())
    }

    pub fn cancel(&mut self) -> Result<(), MountError> {
        call(&mut self.client, "cancel", Value::Null).map(|_| ())
    }

    pub fn frame_kind(&self) -> FrameKind {
        self.frame
    }

    pub fn max_slew_rate(&self) -> f64 {
        self.max_slew_rate
    }
}

fn call(client: &mut RpcClient, method: &str, params: Value) -> Result<Value, MountError> {
    client.call(method, params).map_err(|e| match e {
        RpcError::TransportLost(reason) => MountError::Transport(reason),
        RpcError::Protocol(reason) => MountError::Protocol(reason),
        RpcError::Remote { kind, message } => match kind {
            ErrorKind::Unsupported => MountError::Unsupported,
            ErrorKind::Busy => MountError::Busy,
            ErrorKind::TransportLost => MountError::Transport(message),
            ErrorKind::DeviceError => MountError::Device(message),
        },
    })
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, MountError> {
    serde_json::from_value(value).map_err(|e| MountError::Protocol(e.to_string()))
}

/// Bridge-side dispatch: execute one RPC method against the mount I/O task.
pub fn dispatch(handle: &MountHandle, method: &str, params: Value) -> Result<Value, ServiceError> {
    match method {
        "hello" => Ok(json!("hello")),
        "frame_kind" => Ok(serde_json::to_value(handle.frame_kind()).expect("serializable")),
        "max_slew_rate" => Ok(json!(handle.max_slew_rate())),
        "read_attitude" => {
            let attitude = handle.read_attitude().map_err(service_error)?;
            Ok(serde_json::to_value(attitude).expect("serializable"))
        }
        "slew_rate" => {
            let AxisRate { axis, rate } = parse(params)?;
            handle.slew_rate(axis, rate).map_err(service_error)?;
            Ok(Value::Null)
        }
        "slew_to" => {
            let AxisAngle { axis, angle } = parse(params)?;
            handle.slew_to(axis, angle).map_err(service_error)?;
            Ok(Value::Null)
        }
        "set_tracking_mode" => {
            let Mode { mode } = parse(params)?;
            handle.set_tracking_mode(mode).map_err(service_error)?;
            Ok(Value::Null)
        }
        "cancel" => {
            handle.cancel().map_err(service_error)?;
            Ok(Value::Null)
        }
        other => Err(ServiceError::unsupported(other)),
    }
}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, ServiceError> {
    serde_json::from_value(params)
        .map_err(|e| ServiceError::new(ErrorKind::DeviceError, format!("bad params: {e}")))
}

fn service_error(e: MountError) -> ServiceError {
    match e {
        MountError::Unsupported => ServiceError::new(ErrorKind::Unsupported, e.to_string()),
        MountError::Busy => ServiceError::new(ErrorKind::Busy, e.to_string()),
        MountError::Transport(_) | MountError::Protocol(_) | MountError::Device(_) => {
            ServiceError::new(ErrorKind::DeviceError, e.to_string())
        }
    }
}
