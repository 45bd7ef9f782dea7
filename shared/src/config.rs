//! Layered YAML configuration.
//!
//! Three layers, later winning per-key: built-in defaults compiled into the
//! binary, an optional `config.yaml` in the working directory, and any number
//! of `--config` override files. Layers are deep-merged as YAML mappings
//! before the final typed deserialization, so an override file can set a
//! single nested key without restating its siblings.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::geodesy::Geodetic;

/// Compiled-in defaults, lowest-priority layer.
const DEFAULT_CONFIG: &str = include_str!("../config_default.yaml");

/// Name of the optional site config read from the working directory.
const SITE_CONFIG: &str = "config.yaml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("configuration does not match the expected schema: {0}")]
    Schema(#[from] serde_yaml::Error),

    #[error("unknown location {0:?} (not present under `locations`)")]
    UnknownLocation(String),
}

/// A named geodetic position from the `locations` table.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct Location {
    pub lat_degrees: f64,
    pub lon_degrees: f64,
    pub alt_meters: f64,
}

impl Location {
    pub fn to_geodetic(self) -> Geodetic {
        Geodetic::from_degrees(self.lat_degrees, self.lon_degrees, self.alt_meters)
    }
}

/// PID gains for the pointing controller.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
pub struct Gains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

/// Which wire protocol the mount speaks.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub enum MountProtocol {
    #[serde(rename = "nexstar-hand-control")]
    NexStarHandControl,
    #[serde(rename = "skywatcher-mount-head-usb")]
    SkyWatcherUsb,
    #[serde(rename = "skywatcher-mount-head-eqmod")]
    SkyWatcherEqmod,
    #[serde(rename = "skywatcher-mount-head-wifi")]
    SkyWatcherWifi,
}

impl std::str::FromStr for MountProtocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nexstar-hand-control" => Ok(MountProtocol::NexStarHandControl),
            "skywatcher-mount-head-usb" => Ok(MountProtocol::SkyWatcherUsb),
            "skywatcher-mount-head-eqmod" => Ok(MountProtocol::SkyWatcherEqmod),
            "skywatcher-mount-head-wifi" => Ok(MountProtocol::SkyWatcherWifi),
            other => Err(format!("unknown telescope protocol {other:?}")),
        }
    }
}

impl MountProtocol {
    /// Serial baud rate for the serial-attached protocols.
    pub fn baud_rate(self) -> u32 {
        match self {
            MountProtocol::NexStarHandControl => 9_600,
            MountProtocol::SkyWatcherEqmod => 9_600,
            MountProtocol::SkyWatcherUsb => 115_200,
            MountProtocol::SkyWatcherWifi => 0,
        }
    }
}

/// How the mount's axes are oriented.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub enum MountMode {
    #[serde(rename = "altaz")]
    AltAz,
    #[serde(rename = "eq")]
    Eq,
}

impl std::str::FromStr for MountMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "altaz" => Ok(MountMode::AltAz),
            "eq" => Ok(MountMode::Eq),
            other => Err(format!("unknown mount mode {other:?}, expected altaz or eq")),
        }
    }
}

/// The merged configuration consumed by all three binaries.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub hootl: bool,
    pub location: String,
    pub landmark: Option<String>,
    pub telescope_server: String,
    pub telescope_protocol: MountProtocol,
    pub mount_mode: MountMode,
    pub serial_port: String,
    pub gains: Gains,
    pub silence_timeout_seconds: f64,
    pub sbs1_servers: Vec<String>,
    pub tle_files: Vec<String>,
    pub locations: BTreeMap<String, Location>,
}

impl Config {
    /// Load the defaults, the optional site file, and the given override
    /// files, in that order.
    pub fn load(overrides: &[String]) -> Result<Config, ConfigError> {
        let mut merged: serde_yaml::Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        if Path::new(SITE_CONFIG).exists() {
            merged = merge(merged, load_value(SITE_CONFIG)?);
        }
        for path in overrides {
            merged = merge(merged, load_value(path)?);
        }

        Ok(serde_yaml::from_value(merged)?)
    }

    /// The observer position named by the `location` key.
    pub fn observer(&self) -> Result<Geodetic, ConfigError> {
        self.named_location(&self.location)
    }

    /// Look up any named location, for landmarks and the observer.
    pub fn named_location(&self, name: &str) -> Result<Geodetic, ConfigError> {
        self.locations
            .get(name)
            .map(|loc| loc.to_geodetic())
            .ok_or_else(|| ConfigError::UnknownLocation(name.to_string()))
    }
}

fn load_value(path: &str) -> Result<serde_yaml::Value, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_string(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
        path: path.to_string(),
        source,
    })
}

/// Deep-merge two YAML values, preferring `over` wherever both are present.
fn merge(under: serde_yaml::Value, over: serde_yaml::Value) -> serde_yaml::Value {
    match (under, over) {
        (serde_yaml::Value::Mapping(mut base), serde_yaml::Value::Mapping(top)) => {
            for (key, value) in top {
                let merged = match base.remove(&key) {
                    Some(existing) => merge(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            serde_yaml::Value::Mapping(base)
        }
        (_, over) => over,
    }
}
