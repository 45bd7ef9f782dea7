//! Landmark alignment.
//!
//! A one-point calibration: point the mount at something whose direction is
//! known, read what the mount thinks it is pointing at, and store the
//! difference. The offset is added to every subsequent mount reading and
//! subtracted from every absolute slew target. This assumes the mount and
//! world frames share their vertical axis, so pointing accuracy degrades
//! with angular distance from the landmark; that is the accepted cost of
//! aligning without a clear sky.
//!
//! Three landmark kinds resolve to a world direction: configured
//! terrestrial positions (WGS-84 geodesy), solar-system bodies (the
//! low-precision ephemerides), and named stars (one HTTP lookup against the
//! CDS Sesame resolver, the only networked step in the whole system).

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

use hardware::mount::{Attitude, FrameKind};
use shared::angle::wrap_rad;
use shared::astro::{self, Body};
use shared::config::Config;
use shared::geodesy::{ned_between, ned_to_aer, Geodetic};

/// Prefix selecting a celestial landmark rather than a terrestrial one.
const SKY_PREFIX: &str = "sky:";

#[derive(Error, Debug)]
pub enum AlignError {
    #[error("landmark {0:?} is not a configured location")]
    UnknownLandmark(String),

    #[error("star lookup for {name:?} failed: {reason}")]
    StarLookup { name: String, reason: String },
}

/// The constant per-axis offsets mapping mount frame to world frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Alignment {
    pub frame: FrameKind,
    offset1: f64,
    offset2: f64,
}

impl Alignment {
    /// Trust the mount's own alignment: zero offsets.
    pub fn identity(frame: FrameKind) -> Self {
        Self {
            frame,
            offset1: 0.0,
            offset2: 0.0,
        }
    }

    /// Derive the offsets from one reading taken while the mount points at
    /// a landmark with world direction `(az, el)`. For equatorial mounts
    /// the landmark direction is converted to RA/Dec first, so the offsets
    /// live in the mount's own frame.
    pub fn from_landmark(
        landmark_az: f64,
        landmark_el: f64,
        reading: Attitude,
        frame: FrameKind,
        observer: &Geodetic,
        t: DateTime<Utc>,
    ) -> Self {
        let (world1, world2) = match frame {
            FrameKind::AltAz => (landmark_az, landmark_el),
            FrameKind::Equatorial => {
                let jd = astro::julian_date(t);
                astro::horizontal_to_equatorial(landmark_az, landmark_el, observer, jd)
            }
        };
        let alignment = Self {
            frame,
            offset1: wrap_rad(world1 - reading.axis1, 0.0),
            offset2: wrap_rad(world2 - reading.axis2, 0.0),
        };
        info!(?alignment, "landmark alignment established");
        alignment
    }

    /// Mount frame to world frame: applied to every attitude read.
    pub fn apply(&self, reading: Attitude) -> Attitude {
        Attitude {
            axis1: wrap_rad(reading.axis1 + self.offset1, 0.0),
            axis2: wrap_rad(reading.axis2 + self.offset2, 0.0),
        }
    }

    /// World frame to mount frame: applied to every slew target.
    pub fn unapply(&self, world: Attitude) -> Attitude {
        Attitude {
            axis1: wrap_rad(world.axis1 - self.offset1, 0.0),
            axis2: wrap_rad(world.axis2 - self.offset2, 0.0),
        }
    }
}

/// Resolve a landmark name to a world-frame (azimuth, elevation).
pub fn resolve_landmark(
    name: &str,
    config: &Config,
    observer: &Geodetic,
    t: DateTime<Utc>,
) -> Result<(f64, f64), AlignError> {
    if let Some(object) = name.strip_prefix(SKY_PREFIX) {
        if let Ok(body) = object.parse::<Body>() {
            debug!(object, "resolving solar-system landmark");
            return Ok(astro::body_horizontal(body, observer, t));
        }
        let (ra, dec) = lookup_star(object)?;
        let jd = astro::julian_date(t);
        return Ok(astro::equatorial_to_horizontal(ra, dec, observer, jd));
    }

    let landmark = config
        .named_location(name)
        .map_err(|_| AlignError::UnknownLandmark(name.to_string()))?;
    let (az, el, _) = ned_to_aer(ned_between(&landmark, observer));
    Ok((az, el))
}

/// Resolve a star name to J2000 (RA, Dec) in radians via the CDS Sesame
/// service.
fn lookup_star(name: &str) -> Result<(f64, f64), AlignError> {
    let url = format!(
        "https://cds.unistra.fr/cgi-bin/nph-sesame/-op/SNV?{}",
        name.replace(' ', "+")
    );
    debug!(%url, "star lookup");
    let text = ureq::get(&url)
        .call()
        .map_err(|e| AlignError::StarLookup {
            name: name.to_string(),
            reason: e.to_string(),
        })?
        .body_mut()
        .read_to_string()
        .map_err(|e| AlignError::StarLookup {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

    parse_sesame(&text).ok_or_else(|| AlignError::StarLookup {
        name: name.to_string(),
        reason: "no position in resolver response".to_string(),
    })
}

/// Pull the `%J <ra_deg> <dec_deg>` line out of a Sesame plain-text
/// response.
fn parse_sesame(text: &str) -> Option<(f64, f64)> {
    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("%J ") {
            let mut fields = rest.split_whitespace();
            let ra_deg: f64 = fields.next()?.parse().ok()?;
            let dec_deg: f64 = fields.next()?.parse().ok()?;
            return Some((ra_deg.to_radians(), dec_deg.to_radians()));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::f64::consts::TAU;

    #[test]
    fn apply_then_unapply_is_identity() {
        let mut rng = StdRng::seed_from_u64(41);
        for _ in 0..1000 {
            let alignment = Alignment {
                frame: FrameKind::AltAz,
                offset1: rng.gen_range(0.0..TAU),
                offset2: rng.gen_range(0.0..TAU),
            };
            let reading = Attitude {
                axis1: rng.gen_range(0.0..TAU),
                axis2: rng.gen_range(0.0..TAU),
            };
            let round_trip = alignment.unapply(alignment.apply(reading));
            assert_relative_eq!(round_trip.axis1, reading.axis1, epsilon = 1e-12);
            assert_relative_eq!(round_trip.axis2, reading.axis2, epsilon = 1e-12);
        }
    }

    #[test]
    fn landmark_offset_maps_reads_to_world() {
        // The mount reports (10, 5) degrees while physically pointed at a
        // landmark known to sit at (12, 6): every subsequent read gains the
        // (2, 1) degree correction.
        let observer = Geodetic::from_degrees(38.879_084, -77.036_531, 18.0);
        let t = Utc.with_ymd_and_hms(2026, 1, 15, 4, 0, 0).unwrap();
        let reading = Attitude {
            axis1: 10.0_f64.to_radians(),
            axis2: 5.0_f64.to_radians(),
        };
        let alignment = Alignment::from_landmark(
            12.0_f64.to_radians(),
            6.0_f64.to_radians(),
            reading,
            FrameKind::AltAz,
            &observer,
            t,
        );

        let corrected = alignment.apply(reading);
        assert_relative_eq!(corrected.axis1, 12.0_f64.to_radians(), epsilon = 1e-9);
        assert_relative_eq!(corrected.axis2, 6.0_f64.to_radians(), epsilon = 1e-9);

        // And slew targets go the other way.
        let target = alignment.unapply(Attitude {
            axis1: 12.0_f64.to_radians(),
            axis2: 6.0_f64.to_radians(),
        });
        assert_relative_eq!(target.axis1, reading.axis1, epsilon = 1e-9);
    }

    #[test]
    fn equatorial_alignment_offsets_live_in_radec() {
        let observer = Geodetic::from_degrees(38.879_084, -77.036_531, 18.0);
        let t = Utc.with_ymd_and_hms(2026, 1, 15, 4, 0, 0).unwrap();
        let jd = astro::julian_date(t);

        // Mount reading happens to agree with the landmark exactly: zero
        // offsets, in RA/Dec.
        let (landmark_az, landmark_el) = (2.0, 0.6);
        let (ra, dec) = astro::horizontal_to_equatorial(landmark_az, landmark_el, &observer, jd);
        let reading = Attitude {
            axis1: ra,
            axis2: wrap_rad(dec, 0.0),
        };
        let alignment = Alignment::from_landmark(
            landmark_az,
            landmark_el,
            reading,
            FrameKind::Equatorial,
            &observer,
            t,
        );
        let applied = alignment.apply(reading);
        assert_relative_eq!(applied.axis1, reading.axis1, epsilon = 1e-9);
        assert_relative_eq!(applied.axis2, reading.axis2, epsilon = 1e-9);
    }

    #[test]
    fn terrestrial_landmark_resolution() {
        let config = Config::load(&[]).unwrap();
        let observer = config.observer().unwrap();
        let t = Utc.with_ymd_and_hms(2026, 1, 15, 4, 0, 0).unwrap();

        // The monument is north of the configured observer and, being 169m
        // taller at 1.2km range, well above its horizon.
        let (az, el) = resolve_landmark("washington_monument", &config, &observer, t).unwrap();
        assert!(az < 0.2 || az > TAU - 0.2, "azimuth {az}");
        assert!(el > 0.05, "elevation {el}");

        assert!(matches!(
            resolve_landmark("atlantis", &config, &observer, t),
            Err(AlignError::UnknownLandmark(_))
        ));
    }

    #[test]
    fn solar_system_landmark_resolution() {
        let config = Config::load(&[]).unwrap();
        let observer = config.observer().unwrap();
        // Local noon: the Sun is up.
        let t = Utc.with_ymd_and_hms(2026, 1, 15, 17, 10, 0).unwrap();
        let (_, el) = resolve_landmark("sky:sun", &config, &observer, t).unwrap();
        assert!(el > 0.0);
    }

    #[test]
    fn sesame_response_parsing() {
        let body = "\
# Vega\n\
#=Simbad: 1\n\
%C.0 PulsV*delSct\n\
%J 279.23473479 +38.78368896 = 18:36:56.33, +38:47:01.2\n\
%J.E [ 1.73 2.01 0] A 2007A&A...474..653V\n";
        let (ra, dec) = parse_sesame(body).unwrap();
        assert_relative_eq!(ra.to_degrees(), 279.234_734_79, epsilon = 1e-9);
        assert_relative_eq!(dec.to_degrees(), 38.783_688_96, epsilon = 1e-9);

        assert!(parse_sesame("#!Nothing found").is_none());
    }
}
