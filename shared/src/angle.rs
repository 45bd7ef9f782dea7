//! Angle wrapping and unit conversions.
//!
//! All angles in this workspace are radians unless a name says otherwise.
//! Azimuth is measured from north, increasing toward east. Elevation is
//! positive above the horizon.

use std::f64::consts::{PI, TAU};

/// Arcseconds in one radian.
pub const ARCSEC_PER_RAD: f64 = 3600.0 * 180.0 / PI;

/// The sidereal rotation rate of the Earth.
pub const SIDEREAL_RATE_RAD_PER_SEC: f64 = 7.292_115_0e-5;

/// Add or subtract multiples of 2*pi until `theta` lies in
/// `[minimum, minimum + 2*pi)`.
///
/// Constant-time even for the very large angles sidereal-time arithmetic
/// produces. Rounding at the upper boundary folds back to the lower one so
/// the half-open interval is honored exactly.
pub fn wrap_rad(theta: f64, minimum: f64) -> f64 {
    let mut wrapped = minimum + (theta - minimum).rem_euclid(TAU);
    if wrapped >= minimum + TAU {
        wrapped -= TAU;
    }
    wrapped
}

/// Wrap an angular difference to `(-pi, pi]`, the short way around.
pub fn wrap_signed(theta: f64) -> f64 {
    let wrapped = wrap_rad(theta, -PI);
    if wrapped == -PI {
        PI
    } else {
        wrapped
    }
}

/// Angular separation between two azimuth/elevation directions.
///
/// Spherical law of cosines; adequate for the separations that matter here
/// (the Sun keep-out check and goto-vs-rate thresholds).
pub fn angular_separation(az1: f64, el1: f64, az2: f64, el2: f64) -> f64 {
    let c = el1.sin() * el2.sin() + el1.cos() * el2.cos() * (az1 - az2).cos();
    c.clamp(-1.0, 1.0).acos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn wrap_rad_basic() {
        assert_relative_eq!(wrap_rad(3.0 * PI, 0.0), PI);
        assert_relative_eq!(wrap_rad(-0.5, 0.0), TAU - 0.5);
        assert_relative_eq!(wrap_rad(0.0, -PI), 0.0);
    }

    #[test]
    fn wrap_signed_takes_short_way() {
        // 350 degrees ahead is 10 degrees behind.
        let d = wrap_signed(350.0_f64.to_radians());
        assert_relative_eq!(d, -10.0_f64.to_radians(), epsilon = 1e-12);
        // Exactly half a turn maps to +pi, not -pi.
        assert_relative_eq!(wrap_signed(-PI), PI);
        assert_relative_eq!(wrap_signed(PI), PI);
    }

    #[test]
    fn wrap_signed_bounded_for_random_inputs() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..10_000 {
            let target: f64 = rng.gen_range(-4.0 * TAU..4.0 * TAU);
            let actual: f64 = rng.gen_range(-4.0 * TAU..4.0 * TAU);
            let err = wrap_signed(target - actual);
            assert!(err > -PI && err <= PI, "error {err} out of range");
            assert!(err.abs() <= PI);
        }
    }

    #[test]
    fn separation_examples() {
        assert_relative_eq!(angular_separation(0.0, 0.0, PI, 0.0), PI);
        assert_relative_eq!(
            angular_separation(0.0, 0.0, 0.0, 0.3),
            0.3,
            epsilon = 1e-12
        );
        // Azimuth differences shrink with elevation.
        let near_zenith = angular_separation(0.0, 1.5, PI, 1.5);
        assert!(near_zenith < 0.2);
    }
}
