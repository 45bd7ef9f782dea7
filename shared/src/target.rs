//! The target store: last-known state per target plus linear extrapolation.
//!
//! Each target keeps the position and velocity from its latest report, in
//! the observer's NED frame, where straight-line extrapolation over a few
//! seconds is a good model for both aircraft and satellites. No filtering:
//! the last report is authoritative, and the only reports ever refused are
//! ones that would move a target backward in time or carry non-finite
//! numbers.

use std::collections::HashMap;
use std::fmt;

use nalgebra::Vector3;
use tracing::debug;

use crate::geodesy::{self, Geodetic};
use crate::sbs1::{self, Accumulator};

/// Identity of a target: the SBS-1 hex ident prefixed with the index of the
/// feed that produced it, so two feeds reusing an ident cannot collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(source: usize, hex: &str) -> Self {
        Self(format!("{source:x}:{hex}"))
    }

    /// The bare hex ident, without the source prefix.
    pub fn hex(&self) -> &str {
        self.0.split_once(':').map(|(_, hex)| hex).unwrap_or(&self.0)
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One fused position/velocity report, ready for the target store.
#[derive(Debug, Clone)]
pub struct Report {
    pub id: TargetId,
    pub callsign: String,
    /// Position in the observer NED frame, meters.
    pub pos_ned: Vector3<f64>,
    /// Velocity in the observer NED frame, meters per second.
    pub vel_ned: Vector3<f64>,
    /// Monotonic seconds of the position fix.
    pub t: f64,
    pub in_space: bool,
}

/// Last accepted state for one target.
#[derive(Debug, Clone)]
pub struct Target {
    pub callsign: String,
    pub pos_ned: Vector3<f64>,
    pub vel_ned: Vector3<f64>,
    pub t0: f64,
    pub in_space: bool,
}

impl Target {
    /// Extrapolated azimuth, elevation, and range at time `t`.
    pub fn azel_range(&self, t: f64) -> (f64, f64, f64) {
        let pos = self.pos_ned + self.vel_ned * (t - self.t0);
        geodesy::ned_to_aer(pos)
    }
}

/// What became of an applied report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accepted,
    DroppedOutOfOrder,
    DroppedNonFinite,
}

/// The single-owner map of targets. Reports go in, predictions come out,
/// silence eventually evicts.
#[derive(Debug)]
pub struct TargetMap {
    targets: HashMap<TargetId, Target>,
    /// Seconds of silence after which a target is shown stale.
    silence_timeout: f64,
    pub dropped_out_of_order: u64,
    pub dropped_non_finite: u64,
}

impl TargetMap {
    pub fn new(silence_timeout: f64) -> Self {
        Self {
            targets: HashMap::new(),
            silence_timeout,
            dropped_out_of_order: 0,
            dropped_non_finite: 0,
        }
    }

    pub fn get(&self, id: &TargetId) -> Option<&Target> {
        self.targets.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TargetId, &Target)> {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// A target with no report for the silence timeout is shown stale but
    /// remains selectable until evicted.
    pub fn is_stale(&self, id: &TargetId, now: f64) -> bool {
        self.targets
            .get(id)
            .is_some_and(|target| now - target.t0 > self.silence_timeout)
    }

    /// Fold one report into the map.
    pub fn apply(&mut self, report: Report) -> Outcome {
        if !(report.pos_ned.iter().all(|v| v.is_finite())
            && report.vel_ned.iter().all(|v| v.is_finite())
            && report.t.is_finite())
        {
            debug!(id = %report.id, "dropping report with non-finite state");
            self.dropped_non_finite += 1;
            return Outcome::DroppedNonFinite;
        }

        // The only ordering rule: never go backward in time. No content
        // filtering beyond that; whatever the feed said last is the truth,
        // and replaying the same reports in any order lands on the one with
        // the latest timestamp.
        if let Some(existing) = self.targets.get(&report.id) {
            if report.t < existing.t0 {
                self.dropped_out_of_order += 1;
                return Outcome::DroppedOutOfOrder;
            }
        }

        self.targets.insert(
            report.id,
            Target {
                callsign: report.callsign,
                pos_ned: report.pos_ned,
                vel_ned: report.vel_ned,
                t0: report.t,
                in_space: report.in_space,
            },
        );
        Outcome::Accepted
    }

    /// Evict targets silent for twice the stale timeout. Returns how many.
    pub fn sweep(&mut self, now: f64) -> usize {
        let evict_after = 2.0 * self.silence_timeout;
        let before = self.targets.len();
        self.targets.retain(|_, target| now - target.t0 <= evict_after);
        before - self.targets.len()
    }
}

/// Build a report from a completed aircraft accumulator.
///
/// Returns `None` until the accumulator is complete, and for the transponders
/// that report a (useless) altitude of exactly zero.
pub fn report_from_aircraft(
    observer: &Geodetic,
    id: TargetId,
    acc: &Accumulator,
) -> Option<Report> {
    if !acc.complete() {
        return None;
    }
    let (altitude_ft, _) = acc.altitude_ft?;
    if altitude_ft == 0.0 {
        return None;
    }
    let altitude_m = altitude_ft * sbs1::METERS_PER_FOOT;

    let (lat_deg, t) = acc.lat_deg?;
    let (lon_deg, _) = acc.lon_deg?;
    let position = Geodetic::from_degrees(lat_deg, lon_deg, altitude_m);
    let pos_ned = geodesy::ned_between(&position, observer);

    // Velocity is reported in the aircraft's own local frame: ground speed
    // along the track azimuth plus vertical rate. Carry it through ECEF into
    // the observer's NED frame so extrapolation happens in one frame.
    let (ground_speed_kn, _) = acc.ground_speed_kn?;
    let (track_deg, _) = acc.track_deg?;
    let (vertical_rate_fpm, _) = acc.vertical_rate_fpm?;

    let speed = ground_speed_kn * sbs1::MPS_PER_KNOT;
    let track = track_deg.to_radians();
    let vel_local = Vector3::new(
        track.cos() * speed,
        track.sin() * speed,
        -vertical_rate_fpm * sbs1::MPS_PER_FOOT_PER_MINUTE,
    );

    let (n_plane, e_plane, d_plane) = geodesy::ned_unit_vectors(&position);
    let vel_ecef = vel_local.x * n_plane + vel_local.y * e_plane + vel_local.z * d_plane;
    let (n_obs, e_obs, d_obs) = geodesy::ned_unit_vectors(observer);
    let vel_ned = Vector3::new(
        vel_ecef.dot(&n_obs),
        vel_ecef.dot(&e_obs),
        vel_ecef.dot(&d_obs),
    );

    Some(Report {
        id,
        callsign: acc.callsign.clone().unwrap_or_else(|| "?".to_string()),
        pos_ned,
        vel_ned,
        t,
        in_space: altitude_m > sbs1::EDGE_OF_SPACE_M,
    })
}
