//! Low-precision astronomy: sidereal time, equatorial/horizontal frame
//! conversions, and ephemerides for the Sun, Moon, and planets.
//!
//! Accuracy targets are modest on purpose. The Sun position feeds a 20 degree
//! keep-out circle, and the solar-system ephemerides feed one-point landmark
//! alignment, so a few hundredths of a degree for the Sun and a few tenths
//! for the Moon and planets are plenty. Formulas follow the Astronomical
//! Almanac low-precision series and the JPL approximate Keplerian elements
//! (valid 1800-2050).

use chrono::{DateTime, Utc};
use std::str::FromStr;

use crate::angle::{wrap_rad, wrap_signed};
use crate::geodesy::Geodetic;

/// Julian date of the Unix epoch.
const JD_UNIX_EPOCH: f64 = 2_440_587.5;
/// Julian date of the J2000.0 epoch.
const JD_J2000: f64 = 2_451_545.0;

/// Julian date for a UTC instant.
pub fn julian_date(t: DateTime<Utc>) -> f64 {
    let seconds = t.timestamp() as f64 + f64::from(t.timestamp_subsec_nanos()) * 1e-9;
    JD_UNIX_EPOCH + seconds / 86_400.0
}

/// Greenwich mean sidereal time in radians.
pub fn gmst(jd: f64) -> f64 {
    let days = jd - JD_J2000;
    wrap_rad((280.460_618_37 + 360.985_647_366_29 * days).to_radians(), 0.0)
}

/// Local mean sidereal time in radians for an observer at `lon` (east positive).
pub fn local_sidereal_time(jd: f64, lon: f64) -> f64 {
    wrap_rad(gmst(jd) + lon, 0.0)
}

/// Convert equatorial (RA, Dec) to horizontal (azimuth, elevation).
///
/// Azimuth is measured from north through east and wrapped to `[0, 2*pi)`.
pub fn equatorial_to_horizontal(ra: f64, dec: f64, observer: &Geodetic, jd: f64) -> (f64, f64) {
    let lst = local_sidereal_time(jd, observer.lon);
    let ha = lst - ra;
    let (sin_lat, cos_lat) = observer.lat.sin_cos();
    let (sin_dec, cos_dec) = dec.sin_cos();
    let (sin_ha, cos_ha) = ha.sin_cos();

    let sin_el = sin_lat * sin_dec + cos_lat * cos_dec * cos_ha;
    let el = sin_el.clamp(-1.0, 1.0).asin();
    let az = (-sin_ha * cos_dec).atan2(cos_lat * sin_dec - sin_lat * cos_dec * cos_ha);
    (wrap_rad(az, 0.0), el)
}

/// Convert horizontal (azimuth, elevation) to equatorial (RA, Dec).
///
/// Exact inverse of [`equatorial_to_horizontal`] for the same observer and
/// instant. RA is wrapped to `[0, 2*pi)`.
pub fn horizontal_to_equatorial(az: f64, el: f64, observer: &Geodetic, jd: f64) -> (f64, f64) {
    let lst = local_sidereal_time(jd, observer.lon);
    let (sin_lat, cos_lat) = observer.lat.sin_cos();
    let (sin_el, cos_el) = el.sin_cos();
    let (sin_az, cos_az) = az.sin_cos();

    let sin_dec = sin_lat * sin_el + cos_lat * cos_el * cos_az;
    let dec = sin_dec.clamp(-1.0, 1.0).asin();
    let ha = (-sin_az * cos_el).atan2(sin_el * cos_lat - cos_el * sin_lat * cos_az);
    (wrap_rad(lst - ha, 0.0), dec)
}

/// Parallactic angle for an object at hour angle `ha` and declination `dec`
/// seen from latitude `lat`: the position angle of the local vertical
/// measured at the object, eastward from north.
pub fn parallactic_angle(ha: f64, dec: f64, lat: f64) -> f64 {
    ha.sin()
        .atan2(lat.tan() * dec.cos() - dec.sin() * ha.cos())
}

/// Mean obliquity of the ecliptic in radians.
fn obliquity(jd: f64) -> f64 {
    (23.439 - 4.0e-7 * (jd - JD_J2000)).to_radians()
}

fn ecliptic_to_equatorial(lambda: f64, beta: f64, jd: f64) -> (f64, f64) {
    let eps = obliquity(jd);
    let (sin_l, cos_l) = lambda.sin_cos();
    let (sin_b, cos_b) = beta.sin_cos();
    let ra = (sin_l * cos_b * eps.cos() - sin_b * eps.sin()).atan2(cos_l * cos_b);
    let dec = (sin_b * eps.cos() + cos_b * eps.sin() * sin_l)
        .clamp(-1.0, 1.0)
        .asin();
    (wrap_rad(ra, 0.0), dec)
}

/// Geocentric (RA, Dec) of the Sun. Good to about 0.01 degrees.
pub fn sun_radec(jd: f64) -> (f64, f64) {
    let n = jd - JD_J2000;
    let g = (357.528 + 0.985_600_3 * n).to_radians();
    let lambda = (280.460 + 0.985_647_4 * n).to_radians()
        + (1.915 * g.sin() + 0.020 * (2.0 * g).sin()).to_radians();
    ecliptic_to_equatorial(lambda, 0.0, jd)
}

/// Horizontal coordinates of the Sun for an observer.
pub fn sun_horizontal(observer: &Geodetic, t: DateTime<Utc>) -> (f64, f64) {
    let jd = julian_date(t);
    let (ra, dec) = sun_radec(jd);
    equatorial_to_horizontal(ra, dec, observer, jd)
}

/// Topocentric (RA, Dec) of the Moon, with parallax applied. Good to a few
/// tenths of a degree, which is what one-point alignment needs.
pub fn moon_radec(observer: &Geodetic, jd: f64) -> (f64, f64) {
    let t = (jd - JD_J2000) / 36_525.0;
    let term = |deg: f64, rate: f64| (deg + rate * t).to_radians();

    let lambda = (218.32 + 481_267.881 * t
        + 6.29 * term(135.0, 477_198.87).sin()
        - 1.27 * term(259.3, -413_335.36).sin()
        + 0.66 * term(235.7, 890_534.22).sin()
        + 0.21 * term(269.9, 954_397.74).sin()
        - 0.19 * term(357.5, 35_999.05).sin()
        - 0.11 * term(186.5, 966_404.03).sin())
    .to_radians();
    let beta = (5.13 * term(93.3, 483_202.02).sin() + 0.28 * term(228.2, 960_400.89).sin()
        - 0.28 * term(318.3, 6_003.15).sin()
        - 0.17 * term(217.6, -407_332.21).sin())
    .to_radians();
    let parallax = (0.9508
        + 0.0518 * term(134.9, 477_198.85).cos()
        + 0.0095 * term(259.2, -413_335.38).cos()
        + 0.0078 * term(235.7, 890_534.23).cos()
        + 0.0028 * term(269.9, 954_397.70).cos())
    .to_radians();

    let distance = crate::geodesy::WGS84_A / parallax.sin();
    let (ra_geo, dec_geo) = ecliptic_to_equatorial(lambda, beta, jd);

    // Shift the geocentric direction by the observer's geocentric position to
    // get the topocentric direction. At lunar distance this moves the Moon by
    // up to about a degree.
    let geo = nalgebra::Vector3::new(
        distance * dec_geo.cos() * ra_geo.cos(),
        distance * dec_geo.cos() * ra_geo.sin(),
        distance * dec_geo.sin(),
    );
    // Observer position in the equatorial frame: rotate ECEF east by GMST.
    let obs_ecef = observer.to_ecef();
    let theta = gmst(jd);
    let obs_eq = nalgebra::Vector3::new(
        obs_ecef.x * theta.cos() - obs_ecef.y * theta.sin(),
        obs_ecef.x * theta.sin() + obs_ecef.y * theta.cos(),
        obs_ecef.z,
    );
    let topo = geo - obs_eq;
    let ra = wrap_rad(topo.y.atan2(topo.x), 0.0);
    let dec = (topo.z / topo.norm()).clamp(-1.0, 1.0).asin();
    (ra, dec)
}

/// JPL approximate Keplerian elements at J2000 and per-century rates:
/// semi-major axis (au), eccentricity, inclination, mean longitude,
/// longitude of perihelion, longitude of ascending node (degrees).
#[rustfmt::skip]
const PLANET_ELEMENTS: [([f64; 6], [f64; 6]); 8] = [
    // Mercury
    ([0.387_099_27, 0.205_635_93, 7.004_979_02, 252.250_323_50, 77.457_796_28, 48.330_765_93],
     [0.000_000_37, 0.000_019_06, -0.005_947_49, 149_472.674_111_75, 0.160_476_89, -0.125_340_81]),
    // Venus
    ([0.723_335_66, 0.006_776_72, 3.394_676_05, 181.979_099_50, 131.602_467_18, 76.679_842_55],
     [0.000_003_90, -0.000_041_07, -0.000_788_90, 58_517.815_387_29, 0.002_683_29, -0.277_694_18]),
    // Earth-Moon barycenter
    ([1.000_002_61, 0.016_711_23, -0.000_015_31, 100.464_571_66, 102.937_681_93, 0.0],
     [0.000_005_62, -0.000_043_92, -0.012_946_68, 35_999.372_449_81, 0.323_273_64, 0.0]),
    // Mars
    ([1.523_710_34, 0.093_394_10, 1.849_691_42, -4.553_432_05, -23.943_629_59, 49.559_538_91],
     [0.000_018_47, 0.000_078_82, -0.008_131_31, 19_140.302_684_99, 0.444_410_88, -0.292_573_43]),
    // Jupiter
    ([5.202_887_00, 0.048_386_24, 1.304_396_95, 34.396_440_51, 14.728_479_83, 100.473_909_09],
     [-0.000_116_07, -0.000_132_53, -0.001_837_14, 3_034.746_127_75, 0.212_526_68, 0.204_691_06]),
    // Saturn
    ([9.536_675_94, 0.053_861_79, 2.485_991_87, 49.954_244_23, 92.598_878_31, 113.662_424_48],
     [-0.001_250_60, -0.000_509_91, 0.001_936_09, 1_222.493_622_01, -0.418_972_16, -0.288_677_94]),
    // Uranus
    ([19.189_164_64, 0.047_257_44, 0.772_637_83, 313.238_104_51, 170.954_276_30, 74.016_925_03],
     [-0.001_961_76, -0.000_043_97, -0.002_429_39, 428.482_027_85, 0.408_052_81, 0.042_405_89]),
    // Neptune
    ([30.069_922_76, 0.008_590_48, 1.770_043_47, -55.120_029_69, 44.964_762_27, 131.784_225_74],
     [0.000_262_91, 0.000_051_05, 0.000_353_72, 218.459_453_25, -0.322_414_64, -0.005_086_64]),
];

/// Heliocentric ecliptic position of a planet in au.
fn heliocentric(index: usize, jd: f64) -> nalgebra::Vector3<f64> {
    let t = (jd - JD_J2000) / 36_525.0;
    let (e0, rate) = PLANET_ELEMENTS[index];
    let a = e0[0] + rate[0] * t;
    let ecc = e0[1] + rate[1] * t;
    let incl = (e0[2] + rate[2] * t).to_radians();
    let mean_lon = (e0[3] + rate[3] * t).to_radians();
    let peri = (e0[4] + rate[4] * t).to_radians();
    let node = (e0[5] + rate[5] * t).to_radians();

    let m = wrap_signed(mean_lon - peri);
    // Kepler's equation by Newton iteration; converges in a handful of steps
    // for planetary eccentricities.
    let mut big_e = m + ecc * m.sin();
    for _ in 0..10 {
        let delta = (big_e - ecc * big_e.sin() - m) / (1.0 - ecc * big_e.cos());
        big_e -= delta;
        if delta.abs() < 1e-12 {
            break;
        }
    }

    let xp = a * (big_e.cos() - ecc);
    let yp = a * (1.0 - ecc * ecc).sqrt() * big_e.sin();

    let omega = peri - node;
    let (sin_o, cos_o) = omega.sin_cos();
    let (sin_n, cos_n) = node.sin_cos();
    let (sin_i, cos_i) = incl.sin_cos();

    nalgebra::Vector3::new(
        (cos_o * cos_n - sin_o * sin_n * cos_i) * xp + (-sin_o * cos_n - cos_o * sin_n * cos_i) * yp,
        (cos_o * sin_n + sin_o * cos_n * cos_i) * xp + (-sin_o * sin_n + cos_o * cos_n * cos_i) * yp,
        sin_o * sin_i * xp + cos_o * sin_i * yp,
    )
}

/// Solar-system bodies the alignment and display code can resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Body {
    Sun,
    Moon,
    Mercury,
    Venus,
    Mars,
    Jupiter,
    Saturn,
    Uranus,
    Neptune,
}

impl FromStr for Body {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "sun" => Body::Sun,
            "moon" => Body::Moon,
            "mercury" => Body::Mercury,
            "venus" => Body::Venus,
            "mars" => Body::Mars,
            "jupiter" => Body::Jupiter,
            "saturn" => Body::Saturn,
            "uranus" => Body::Uranus,
            "neptune" => Body::Neptune,
            _ => return Err(()),
        })
    }
}

/// Geocentric or topocentric (RA, Dec) of a body, as appropriate for its
/// distance.
pub fn body_radec(body: Body, observer: &Geodetic, jd: f64) -> (f64, f64) {
    match body {
        Body::Sun => sun_radec(jd),
        Body::Moon => moon_radec(observer, jd),
        planet => {
            let index = match planet {
                Body::Mercury => 0,
                Body::Venus => 1,
                Body::Mars => 3,
                Body::Jupiter => 4,
                Body::Saturn => 5,
                Body::Uranus => 6,
                Body::Neptune => 7,
                Body::Sun | Body::Moon => unreachable!(),
            };
            let earth = heliocentric(2, jd);
            let rel = heliocentric(index, jd) - earth;
            let lambda = rel.y.atan2(rel.x);
            let beta = (rel.z / rel.norm()).clamp(-1.0, 1.0).asin();
            ecliptic_to_equatorial(lambda, beta, jd)
        }
    }
}

/// Horizontal coordinates of a body for an observer at an instant.
pub fn body_horizontal(body: Body, observer: &Geodetic, t: DateTime<Utc>) -> (f64, f64) {
    let jd = julian_date(t);
    let (ra, dec) = body_radec(body, observer, jd);
    equatorial_to_horizontal(ra, dec, observer, jd)
}
