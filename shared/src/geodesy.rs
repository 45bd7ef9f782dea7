//! WGS-84 geodesy and local-level frames.
//!
//! Positions come in three flavors: geodetic (latitude, longitude, height),
//! ECEF (earth-centered, earth-fixed cartesian), and NED (north-east-down
//! relative to an observer). Targets are tracked in the observer's NED frame
//! because linear extrapolation is valid there over the seconds-long horizons
//! we care about.

use nalgebra::Vector3;

use crate::angle::wrap_rad;

/// WGS-84 semi-major axis in meters.
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS-84 flattening.
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// A geodetic position on the WGS-84 ellipsoid.
///
/// Latitude and longitude in radians, height in meters above the ellipsoid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geodetic {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

impl Geodetic {
    pub fn new(lat: f64, lon: f64, alt: f64) -> Self {
        Self { lat, lon, alt }
    }

    /// Build from the degree-valued fields used in config files and SBS-1.
    pub fn from_degrees(lat_deg: f64, lon_deg: f64, alt_m: f64) -> Self {
        Self {
            lat: lat_deg.to_radians(),
            lon: lon_deg.to_radians(),
            alt: alt_m,
        }
    }

    /// Convert to ECEF cartesian coordinates in meters.
    pub fn to_ecef(&self) -> Vector3<f64> {
        let e2 = WGS84_F * (2.0 - WGS84_F);
        let sin_lat = self.lat.sin();
        let cos_lat = self.lat.cos();
        // Prime vertical radius of curvature.
        let n = WGS84_A / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        Vector3::new(
            (n + self.alt) * cos_lat * self.lon.cos(),
            (n + self.alt) * cos_lat * self.lon.sin(),
            (n * (1.0 - e2) + self.alt) * sin_lat,
        )
    }
}

/// Convert an ECEF position in meters to geodetic coordinates.
///
/// Bowring's closed-form first guess refined with two fixed-point steps,
/// good to well under a millimeter for anything in Earth orbit or below.
pub fn ecef_to_geodetic(ecef: Vector3<f64>) -> Geodetic {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let b = WGS84_A * (1.0 - WGS84_F);
    let ep2 = (WGS84_A * WGS84_A - b * b) / (b * b);

    let p = (ecef.x * ecef.x + ecef.y * ecef.y).sqrt();
    let lon = ecef.y.atan2(ecef.x);

    let theta = (ecef.z * WGS84_A).atan2(p * b);
    let mut lat = (ecef.z + ep2 * b * theta.sin().powi(3))
        .atan2(p - e2 * WGS84_A * theta.cos().powi(3));

    let mut n = WGS84_A;
    for _ in 0..2 {
        let sin_lat = lat.sin();
        n = WGS84_A / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        lat = (ecef.z + e2 * n * sin_lat).atan2(p);
    }

    let cos_lat = lat.cos();
    let alt = if cos_lat.abs() > 1e-8 {
        p / cos_lat - n
    } else {
        ecef.z.abs() - b
    };

    Geodetic { lat, lon, alt }
}

/// Unit vectors of the north, east, and down directions at a location,
/// expressed in the ECEF frame.
pub fn ned_unit_vectors(at: &Geodetic) -> (Vector3<f64>, Vector3<f64>, Vector3<f64>) {
    let (sin_lat, cos_lat) = at.lat.sin_cos();
    let (sin_lon, cos_lon) = at.lon.sin_cos();
    let north = Vector3::new(-sin_lat * cos_lon, -sin_lat * sin_lon, cos_lat);
    let east = Vector3::new(-sin_lon, cos_lon, 0.0);
    let down = Vector3::new(-cos_lat * cos_lon, -cos_lat * sin_lon, -sin_lat);
    (north, east, down)
}

/// Position of `to` in the NED frame of `from`, in meters.
pub fn ned_between(to: &Geodetic, from: &Geodetic) -> Vector3<f64> {
    let rel = to.to_ecef() - from.to_ecef();
    let (n, e, d) = ned_unit_vectors(from);
    Vector3::new(rel.dot(&n), rel.dot(&e), rel.dot(&d))
}

/// Convert a NED vector to azimuth, elevation, and range.
///
/// Azimuth is wrapped to `[0, 2*pi)`.
pub fn ned_to_aer(ned: Vector3<f64>) -> (f64, f64, f64) {
    let az = wrap_rad(ned.y.atan2(ned.x), 0.0);
    let el = (-ned.z).atan2((ned.x * ned.x + ned.y * ned.y).sqrt());
    (az, el, ned.norm())
}

/// Convert azimuth, elevation, and range to a NED vector.
pub fn aer_to_ned(az: f64, el: f64, range: f64) -> Vector3<f64> {
    Vector3::new(
        range * el.cos() * az.cos(),
        range * el.cos() * az.sin(),
        -range * el.sin(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::f64::consts::PI;

    #[test]
    fn ecef_of_reference_points() {
        // Equator at the prime meridian sits on the +X axis.
        let p = Geodetic::from_degrees(0.0, 0.0, 0.0).to_ecef();
        assert_relative_eq!(p.x, WGS84_A, epsilon = 1e-6);
        assert_relative_eq!(p.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(p.z, 0.0, epsilon = 1e-6);

        // North pole is on the +Z axis at the semi-minor axis.
        let p = Geodetic::from_degrees(90.0, 0.0, 0.0).to_ecef();
        assert_relative_eq!(p.z, WGS84_A * (1.0 - WGS84_F), epsilon = 1e-6);
    }

    #[test]
    fn geodetic_round_trip() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..1000 {
            let g = Geodetic::from_degrees(
                rng.gen_range(-89.0..89.0),
                rng.gen_range(-180.0..180.0),
                rng.gen_range(-100.0..500_000.0),
            );
            let back = ecef_to_geodetic(g.to_ecef());
            assert_relative_eq!(back.lat, g.lat, epsilon = 1e-9);
            assert_relative_eq!(back.lon, g.lon, epsilon = 1e-9);
            assert_relative_eq!(back.alt, g.alt, epsilon = 1e-3);
        }
    }

    #[test]
    fn aer_round_trip() {
        let mut rng = StdRng::seed_from_u64(13);
        for _ in 0..1000 {
            let az = rng.gen_range(0.0..2.0 * PI);
            let el = rng.gen_range(-PI / 2.0 + 0.01..PI / 2.0 - 0.01);
            let range = rng.gen_range(1.0..1e7);
            let (az2, el2, r2) = ned_to_aer(aer_to_ned(az, el, range));
            assert_relative_eq!(az2, az, epsilon = 1e-9);
            assert_relative_eq!(el2, el, epsilon = 1e-9);
            assert_relative_eq!(r2, range, max_relative = 1e-9);
        }
    }

    #[test]
    fn ned_between_points_north() {
        let obs = Geodetic::from_degrees(38.0, -77.0, 0.0);
        let north = Geodetic::from_degrees(38.01, -77.0, 0.0);
        let ned = ned_between(&north, &obs);
        assert!(ned.x > 1000.0, "north component {}", ned.x);
        assert!(ned.y.abs() < 1.0);
        let (az, el, range) = ned_to_aer(ned);
        assert!(az < 0.01 || az > 2.0 * PI - 0.01);
        assert!(el < 0.0, "target on the ellipsoid drops below the horizon");
        assert!(range > 1000.0 && range < 2000.0);
    }

    #[test]
    fn aircraft_overhead_has_high_elevation() {
        let obs = Geodetic::from_degrees(38.0, -77.0, 0.0);
        let plane = Geodetic::from_degrees(38.0, -77.0, 10_000.0);
        let (_, el, range) = ned_to_aer(ned_between(&plane, &obs));
        assert_relative_eq!(el, PI / 2.0, epsilon = 1e-6);
        assert_relative_eq!(range, 10_000.0, max_relative = 1e-6);
    }
}
