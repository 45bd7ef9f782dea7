//! SGP4 propagation to geodetic coordinates.
//!
//! SGP4 produces positions in the TEME inertial frame. Rotating about the
//! pole by Greenwich mean sidereal time gives an earth-fixed position,
//! which Bowring's inversion turns into latitude, longitude, and altitude.
//! That skips polar motion and nutation, a few hundred meters at orbital
//! distance, which is far below what pointing a telescope at a satellite
//! needs. Velocity comes from differencing positions one second apart, the
//! same way the aircraft feed reports velocity as an observed quantity.

use chrono::{DateTime, Utc};
use nalgebra::Vector3;
use thiserror::Error;

use shared::astro;
use shared::geodesy::{ecef_to_geodetic, Geodetic};

use crate::tle::{TleEntry, TleError};

#[derive(Error, Debug)]
pub enum PropagationError {
    #[error("sgp4 propagation failed for {name:?}: {reason}")]
    Sgp4 { name: String, reason: String },
}

/// A satellite ready to propagate.
pub struct Satellite {
    pub name: String,
    pub catalog_number: u64,
    constants: sgp4::Constants,
    epoch: DateTime<Utc>,
}

impl Satellite {
    pub fn from_tle(entry: &TleEntry) -> Result<Self, TleError> {
        let catalog_number = entry.catalog_number()?;
        let elements = sgp4::Elements::from_tle(
            Some(entry.name.clone()),
            entry.line1.as_bytes(),
            entry.line2.as_bytes(),
        )
        .map_err(|e| TleError::Elements {
            name: entry.name.clone(),
            reason: format!("{:?}", e),
        })?;
        let epoch = elements.datetime.and_utc();
        let constants = sgp4::Constants::from_elements(&elements).map_err(|e| {
            TleError::Elements {
                name: entry.name.clone(),
                reason: format!("{:?}", e),
            }
        })?;
        Ok(Self {
            name: entry.name.clone(),
            catalog_number,
            constants,
            epoch,
        })
    }

    /// Earth-fixed position at `t`, in meters.
    pub fn ecef_at(&self, t: DateTime<Utc>) -> Result<Vector3<f64>, PropagationError> {
        let minutes = (t - self.epoch).num_milliseconds() as f64 / 60_000.0;
        let prediction =
            self.constants
                .propagate(minutes)
                .map_err(|e| PropagationError::Sgp4 {
                    name: self.name.clone(),
                    reason: format!("{:?}", e),
                })?;

        let teme = Vector3::new(
            prediction.position[0] * 1000.0,
            prediction.position[1] * 1000.0,
            prediction.position[2] * 1000.0,
        );
        let theta = astro::gmst(astro::julian_date(t));
        Ok(Vector3::new(
            theta.cos() * teme.x + theta.sin() * teme.y,
            -theta.sin() * teme.x + theta.cos() * teme.y,
            teme.z,
        ))
    }

    /// Geodetic position at `t`.
    pub fn geodetic_at(&self, t: DateTime<Utc>) -> Result<Geodetic, PropagationError> {
        Ok(ecef_to_geodetic(self.ecef_at(t)?))
    }
}
