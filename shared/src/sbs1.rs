//! SBS-1 (BaseStation) message codec.
//!
//! The format is a CSV stream of CRLF-terminated lines, 22 fields per line.
//! Only `MSG` lines with transmission types 1 (identification), 3 (airborne
//! position), and 4 (airborne velocity) carry data we use; everything else is
//! skipped. Fields may be empty, and no single message carries a full state,
//! so receivers accumulate per-aircraft pictures from several messages.
//!
//! The ephemeris server emits the same schema for satellites, packing
//! position and velocity into one MSG,3-shaped line, so the tracker ingests
//! aircraft and satellites identically.

use thiserror::Error;

pub const METERS_PER_FOOT: f64 = 0.3048;
pub const MPS_PER_KNOT: f64 = 0.514_444_444_444_444_4;
pub const MPS_PER_FOOT_PER_MINUTE: f64 = METERS_PER_FOOT / 60.0;

/// Altitude of the McDowell line, the boundary we use for "is in space".
pub const EDGE_OF_SPACE_M: f64 = 80_000.0;

const FIELD_COUNT: usize = 22;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("expected {FIELD_COUNT} fields, got {0}")]
    FieldCount(usize),

    #[error("field {field} is not a number: {value:?}")]
    BadNumber { field: usize, value: String },

    #[error("latitude/longitude out of range: {0}, {1}")]
    CoordinateRange(f64, f64),

    #[error("message has no hex ident")]
    MissingHex,
}

/// One decoded SBS-1 message of an interesting transmission type.
///
/// Absent CSV fields decode to `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub hex: String,
    pub callsign: Option<String>,
    pub altitude_ft: Option<f64>,
    pub ground_speed_kn: Option<f64>,
    pub track_deg: Option<f64>,
    pub lat_deg: Option<f64>,
    pub lon_deg: Option<f64>,
    pub vertical_rate_fpm: Option<f64>,
}

/// Decode one line. Returns `Ok(None)` for lines that are well-formed but
/// carry nothing we use (non-MSG records, surface and surveillance types).
pub fn parse(line: &str) -> Result<Option<Message>, ParseError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != FIELD_COUNT {
        return Err(ParseError::FieldCount(fields.len()));
    }
    if fields[0] != "MSG" {
        return Ok(None);
    }
    let ttype: u32 = fields[1]
        .parse()
        .map_err(|_| ParseError::BadNumber {
            field: 1,
            value: fields[1].to_string(),
        })?;
    if !matches!(ttype, 1 | 3 | 4) {
        return Ok(None);
    }

    let number = |index: usize| -> Result<Option<f64>, ParseError> {
        let raw = fields[index].trim();
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse::<f64>()
            .map(Some)
            .map_err(|_| ParseError::BadNumber {
                field: index,
                value: raw.to_string(),
            })
    };

    let hex = fields[4].trim();
    if hex.is_empty() {
        return Err(ParseError::MissingHex);
    }

    let message = Message {
        hex: hex.to_string(),
        callsign: match fields[10].trim() {
            "" => None,
            callsign => Some(callsign.to_string()),
        },
        altitude_ft: number(11)?,
        ground_speed_kn: number(12)?,
        track_deg: number(13)?,
        lat_deg: number(14)?,
        lon_deg: number(15)?,
        vertical_rate_fpm: number(16)?,
    };

    if let (Some(lat), lon) = (message.lat_deg, message.lon_deg.unwrap_or(0.0)) {
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            return Err(ParseError::CoordinateRange(lat, lon));
        }
    }

    Ok(Some(message))
}

/// Accumulates the per-aircraft picture from partial messages, remembering
/// when each piece of state was last refreshed (monotonic seconds).
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    pub callsign: Option<String>,
    pub altitude_ft: Option<(f64, f64)>,
    pub ground_speed_kn: Option<(f64, f64)>,
    pub track_deg: Option<(f64, f64)>,
    pub lat_deg: Option<(f64, f64)>,
    pub lon_deg: Option<(f64, f64)>,
    pub vertical_rate_fpm: Option<(f64, f64)>,
}

impl Accumulator {
    /// Fold one message in, stamping every updated field with `t`.
    pub fn apply(&mut self, message: &Message, t: f64) {
        if let Some(callsign) = &message.callsign {
            self.callsign = Some(callsign.clone());
        }
        let mut set = |slot: &mut Option<(f64, f64)>, value: Option<f64>| {
            if let Some(value) = value {
                *slot = Some((value, t));
            }
        };
        set(&mut self.altitude_ft, message.altitude_ft);
        set(&mut self.ground_speed_kn, message.ground_speed_kn);
        set(&mut self.track_deg, message.track_deg);
        set(&mut self.lat_deg, message.lat_deg);
        set(&mut self.lon_deg, message.lon_deg);
        set(&mut self.vertical_rate_fpm, message.vertical_rate_fpm);
    }

    /// True once every field needed to point a telescope is present.
    pub fn complete(&self) -> bool {
        self.altitude_ft.is_some()
            && self.ground_speed_kn.is_some()
            && self.track_deg.is_some()
            && self.lat_deg.is_some()
            && self.lon_deg.is_some()
            && self.vertical_rate_fpm.is_some()
    }

    /// Timestamp of the latest position (latitude) refresh.
    pub fn position_time(&self) -> Option<f64> {
        self.lat_deg.map(|(_, t)| t)
    }
}

/// Compose the MSG,3-shaped line the ephemeris server emits for a satellite.
///
/// Positions the same fields the aircraft decoder reads, leaves the rest
/// empty, and terminates with CRLF.
#[allow(clippy::too_many_arguments)]
pub fn satellite_message(
    catalog_number: u64,
    name: &str,
    altitude_ft: f64,
    ground_speed_kn: f64,
    track_deg: f64,
    lat_deg: f64,
    lon_deg: f64,
    vertical_rate_fpm: f64,
) -> String {
    format!(
        "MSG,3,,,{catalog_number:06X},,,,,,{name},{altitude_ft:.0},{ground_speed_kn:.1},{track_deg:.1},{lat_deg:.5},{lon_deg:.5},{vertical_rate_fpm:.0},,,,,\r\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const POSITION_LINE: &str =
        "MSG,3,111,11111,A12345,111111,2026/01/15,12:00:00.000,2026/01/15,12:00:00.000,,37000,,,38.97245,-77.12353,,,,,,0";
    const VELOCITY_LINE: &str =
        "MSG,4,111,11111,A12345,111111,2026/01/15,12:00:00.000,2026/01/15,12:00:00.000,,,452.0,91.3,,,-64,,,,,";
    const IDENT_LINE: &str =
        "MSG,1,111,11111,A12345,111111,2026/01/15,12:00:00.000,2026/01/15,12:00:00.000,UAL123  ,,,,,,,,,,,";

    #[test]
    fn parses_airborne_position() {
        let message = parse(POSITION_LINE).unwrap().unwrap();
        assert_eq!(message.hex, "A12345");
        assert_relative_eq!(message.altitude_ft.unwrap(), 37_000.0);
        assert_relative_eq!(message.lat_deg.unwrap(), 38.97245);
        assert_relative_eq!(message.lon_deg.unwrap(), -77.12353);
        assert!(message.ground_speed_kn.is_none());
    }

    #[test]
    fn parses_airborne_velocity() {
        let message = parse(VELOCITY_LINE).unwrap().unwrap();
        assert_relative_eq!(message.ground_speed_kn.unwrap(), 452.0);
        assert_relative_eq!(message.track_deg.unwrap(), 91.3);
        assert_relative_eq!(message.vertical_rate_fpm.unwrap(), -64.0);
        assert!(message.lat_deg.is_none());
    }

    #[test]
    fn skips_uninteresting_types() {
        let surveillance =
            "MSG,5,111,11111,A12345,111111,2026/01/15,12:00:00.000,2026/01/15,12:00:00.000,,37000,,,,,,,,,,";
        assert!(parse(surveillance).unwrap().is_none());
        assert!(parse("STA,,111,11111,A12345,111111,2026/01/15,12:00:00.000,2026/01/15,12:00:00.000,,,,,,,,,,,,").unwrap().is_none());
        assert!(parse("").unwrap().is_none());
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(matches!(
            parse("MSG,3,truncated"),
            Err(ParseError::FieldCount(3))
        ));
        let bad_lat =
            "MSG,3,111,11111,A12345,111111,2026/01/15,12:00:00.000,2026/01/15,12:00:00.000,,37000,,,123.0,-77.1,,,,,,0";
        assert!(matches!(
            parse(bad_lat),
            Err(ParseError::CoordinateRange(..))
        ));
    }

    #[test]
    fn accumulator_completes_from_both_halves() {
        let mut acc = Accumulator::default();
        acc.apply(&parse(IDENT_LINE).unwrap().unwrap(), 1.0);
        assert!(!acc.complete());
        acc.apply(&parse(POSITION_LINE).unwrap().unwrap(), 2.0);
        assert!(!acc.complete());
        acc.apply(&parse(VELOCITY_LINE).unwrap().unwrap(), 3.0);
        assert!(acc.complete());
        assert_eq!(acc.callsign.as_deref(), Some("UAL123"));
        assert_relative_eq!(acc.position_time().unwrap(), 2.0);
    }

    #[test]
    fn satellite_emission_round_trips() {
        let line = satellite_message(25544, "ISS (ZARYA)", 1_350_000.0, 14_800.0, 241.5, 51.6, -33.4, -120.0);
        assert!(line.ends_with("\r\n"));
        let message = parse(&line).unwrap().unwrap();
        assert_eq!(message.hex, "0063C8");
        assert_eq!(message.callsign.as_deref(), Some("ISS (ZARYA)"));
        assert_relative_eq!(message.altitude_ft.unwrap(), 1_350_000.0);
        assert_relative_eq!(message.ground_speed_kn.unwrap(), 14_800.0);
        assert_relative_eq!(message.track_deg.unwrap(), 241.5);
        assert_relative_eq!(message.lat_deg.unwrap(), 51.6);
        assert_relative_eq!(message.lon_deg.unwrap(), -33.4);
        assert_relative_eq!(message.vertical_rate_fpm.unwrap(), -120.0);
    }
}
