//! Celestron NexStar hand-control serial protocol.
//!
//! Documented in Celestron's "NexStar Communication Protocol" note. Commands
//! are short ASCII strings framed by single-byte opcodes; replies end with
//! `#`. Angles travel as 24-bit fractions of a revolution, hex-encoded as
//! four digits (coarse) or eight digits with the low byte zeroed (precise).
//! Variable-rate slews use the `P` pass-through opcode with a direction
//! sub-code and a big-endian magnitude in quarter-arcseconds per second.
//!
//! The hand controller runs the alignment model, so a NexStar mount can
//! report world-aligned coordinates on its own; landmark alignment remains
//! available for cloudy-day setups where the built-in alignment was skipped.

use tracing::debug;

use crate::channel::Channel;
use crate::mount::{Attitude, Axis, FrameKind, MountError, TrackingMode};

/// One revolution in the protocol's 24-bit angle units.
const B24_TURN: i64 = 1 << 24;

/// Quarter-arcseconds in one revolution, the unit of variable slew rates.
const QAS_PER_TURN: f64 = 360.0 * 60.0 * 60.0 * 4.0;

/// Wrap a 24-bit angle into `[minimum, minimum + 2^24)`.
fn wrap_b24(theta: i64, minimum: i64) -> i64 {
    let mut theta = theta;
    while theta >= minimum + B24_TURN {
        theta -= B24_TURN;
    }
    while theta < minimum {
        theta += B24_TURN;
    }
    theta
}

/// Radians to the 24-bit representation, clamped to one turn.
pub fn rad_to_b24(radians: f64) -> i64 {
    let turns = shared::angle::wrap_rad(radians, 0.0) / std::f64::consts::TAU;
    ((turns * B24_TURN as f64) as i64).clamp(0, B24_TURN - 1)
}

/// The 24-bit representation to radians.
pub fn b24_to_rad(b24: i64) -> f64 {
    b24 as f64 / B24_TURN as f64 * std::f64::consts::TAU
}

fn rad_to_quarter_arcsec(rad: f64) -> i64 {
    (rad / std::f64::consts::TAU * QAS_PER_TURN) as i64
}

fn to_hex(digits: usize, value: i64) -> String {
    format!("{value:0width$X}", width = digits)
}

fn from_hex(text: &str) -> Result<i64, MountError> {
    i64::from_str_radix(text, 16)
        .map_err(|_| MountError::Protocol(format!("bad hex field {text:?}")))
}

/// Encode a 24-bit angle as the 8-digit precise form (low byte zero).
fn b24_to_hex8(b24: i64) -> String {
    to_hex(8, wrap_b24(b24, 0) << 8)
}

/// Decode an 8-digit precise angle field.
fn hex8_to_b24(text: &str) -> Result<i64, MountError> {
    Ok(from_hex(text)? >> 8)
}

/// Driver for a NexStar mount behind any [`Channel`].
pub struct NexStar {
    channel: Box<dyn Channel>,
    frame: FrameKind,
    /// Both-axis target of the absolute slew in progress, if any. The
    /// protocol GOTOs both axes at once, so per-axis requests are merged
    /// through this cache.
    goto_target: Option<(f64, f64)>,
}

impl NexStar {
    /// The largest variable slew rate the protocol can express.
    pub const MAX_SLEW_RATE: f64 = 0.079_121;

    /// Wrap a channel and verify the link with the echo command.
    pub fn connect(mut channel: Box<dyn Channel>, frame: FrameKind) -> Result<Self, MountError> {
        let reply = channel.speak("Kx")?;
        if reply != "x" {
            return Err(MountError::Protocol(format!(
                "echo returned {reply:?}, expected \"x\""
            )));
        }
        debug!("nexstar link verified");
        Ok(Self {
            channel,
            frame,
            goto_target: None,
        })
    }

    fn speak(&mut self, command: &str, reply_len: usize) -> Result<String, MountError> {
        let reply = self.channel.speak(command)?;
        if reply.len() != reply_len {
            return Err(MountError::Protocol(format!(
                "reply to {:?} has length {}, expected {reply_len}",
                &command[..1],
                reply.len()
            )));
        }
        Ok(reply)
    }

    fn read_pair(&mut self, opcode: &str) -> Result<(f64, f64), MountError> {
        let reply = self.speak(opcode, 17)?;
        if !reply.is_ascii() || reply.as_bytes()[8] != b',' {
            return Err(MountError::Protocol(format!("malformed reply {reply:?}")));
        }
        Ok((
            b24_to_rad(hex8_to_b24(&reply[0..8])?),
            b24_to_rad(hex8_to_b24(&reply[9..17])?),
        ))
    }

    pub fn read_attitude(&mut self) -> Result<Attitude, MountError> {
        // The mount only reports accurately in its native frame: `z` is not
        // valid in EQ mode and `e` is unaligned in alt-az mode.
        let opcode = match self.frame {
            FrameKind::AltAz => "z",
            FrameKind::Equatorial => "e",
        };
        let (axis1, axis2) = self.read_pair(opcode)?;
        Ok(Attitude { axis1, axis2 })
    }

    pub fn slew_rate(&mut self, axis: Axis, rate: f64) -> Result<(), MountError> {
        self.goto_target = None;

        // RA motion runs opposite to azimuth motion through the same motor.
        let rate = match (self.frame, axis) {
            (FrameKind::Equatorial, Axis::Primary) => -rate,
            _ => rate,
        };

        let magnitude = rad_to_quarter_arcsec(rate.abs().min(Self::MAX_SLEW_RATE)).min(0xffff);
        let axis_code = match axis {
            Axis::Primary => 16u8,
            Axis::Secondary => 17u8,
        };
        let direction = if rate >= 0.0 { 6u8 } else { 7u8 };
        let command: String = [
            b'P',
            3,
            axis_code,
            direction,
            (magnitude / 256) as u8,
            (magnitude % 256) as u8,
            0,
            0,
        ]
        .iter()
        .map(|&b| b as char)
        .collect();
        self.speak(&command, 0)?;
        Ok(())
    }

    pub fn slew_to(&mut self, axis: Axis, angle: f64) -> Result<(), MountError> {
        let mut target = match self.goto_target {
            Some(target) => target,
            None => {
                let attitude = self.read_attitude()?;
                (attitude.axis1, attitude.axis2)
            }
        };
        match axis {
            Axis::Primary => target.0 = angle,
            Axis::Secondary => target.1 = angle,
        }
        self.goto_target = Some(target);

        let opcode = match self.frame {
            FrameKind::AltAz => 'b',
            FrameKind::Equatorial => 'r',
        };
        let command = format!(
            "{opcode}{},{}",
            b24_to_hex8(rad_to_b24(target.0)),
            b24_to_hex8(rad_to_b24(target.1))
        );
        self.speak(&command, 0)?;
        Ok(())
    }

    pub fn set_tracking_mode(&mut self, mode: TrackingMode) -> Result<(), MountError> {
        let value = match mode {
            TrackingMode::Off => 0u8,
            TrackingMode::AltAz => 1u8,
        };
        let command: String = ['T', value as char].iter().collect();
        self.speak(&command, 0)?;
        Ok(())
    }

    /// True while an absolute slew is still moving.
    pub fn is_goto_in_progress(&mut self) -> Result<bool, MountError> {
        let reply = self.speak("L", 1)?;
        match reply.as_str() {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(MountError::Protocol(format!("bad goto status {other:?}"))),
        }
    }

    pub fn cancel(&mut self) -> Result<(), MountError> {
        self.speak("M", 0)?;
        self.goto_target = None;
        self.slew_rate(Axis::Primary, 0.0)?;
        self.slew_rate(Axis::Secondary, 0.0)?;
        Ok(())
    }

    pub fn frame_kind(&self) -> FrameKind {
        self.frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedChannel;
    use approx::assert_relative_eq;
    use std::f64::consts::{PI, TAU};

    fn pass_through(axis_code: u8, direction: u8, hi: u8, lo: u8) -> String {
        [b'P', 3, axis_code, direction, hi, lo, 0, 0]
            .iter()
            .map(|&b| b as char)
            .collect()
    }

    fn connect(frame: FrameKind, script: &[(&str, &str)]) -> NexStar {
        let mut full = vec![("Kx", "x")];
        full.extend_from_slice(script);
        NexStar::connect(Box::new(ScriptedChannel::new(&full)), frame).unwrap()
    }

    #[test]
    fn b24_round_trip() {
        for rad in [0.0, 0.1, PI, TAU - 1e-6, -0.5, 7.0] {
            let b24 = rad_to_b24(rad);
            assert!((0..B24_TURN).contains(&b24));
            assert_relative_eq!(
                b24_to_rad(b24),
                shared::angle::wrap_rad(rad, 0.0),
                epsilon = 1e-6
            );
        }
        assert_eq!(rad_to_b24(PI), 0x800000);
    }

    #[test]
    fn precise_angle_encoding() {
        assert_eq!(b24_to_hex8(0x800000), "80000000");
        assert_eq!(hex8_to_b24("80000000").unwrap(), 0x800000);
        assert_eq!(hex8_to_b24("12AB0000").unwrap(), 0x12AB00);
        assert!(hex8_to_b24("12AB00ZZ").is_err());
    }

    #[test]
    fn reads_altaz_attitude() {
        let mut mount = connect(FrameKind::AltAz, &[("z", "80000000,20000000")]);
        let attitude = mount.read_attitude().unwrap();
        assert_relative_eq!(attitude.axis1, PI, epsilon = 1e-6);
        assert_relative_eq!(attitude.axis2, PI / 4.0, epsilon = 1e-6);
    }

    #[test]
    fn reads_radec_in_eq_frame() {
        let mut mount = connect(FrameKind::Equatorial, &[("e", "00000000,40000000")]);
        let attitude = mount.read_attitude().unwrap();
        assert_relative_eq!(attitude.axis1, 0.0, epsilon = 1e-6);
        assert_relative_eq!(attitude.axis2, PI / 2.0, epsilon = 1e-6);
    }

    #[test]
    fn variable_rate_encoding() {
        // 0.01 rad/s is 8250 quarter-arcseconds/s, 0x203A.
        let mut mount = connect(
            FrameKind::AltAz,
            &[
                (&pass_through(16, 6, 32, 58), ""),
                (&pass_through(17, 7, 32, 58), ""),
            ],
        );
        mount.slew_rate(Axis::Primary, 0.01).unwrap();
        mount.slew_rate(Axis::Secondary, -0.01).unwrap();
    }

    #[test]
    fn rates_clamp_at_protocol_maximum() {
        let magnitude = rad_to_quarter_arcsec(NexStar::MAX_SLEW_RATE).min(0xffff);
        let mut mount = connect(
            FrameKind::AltAz,
            &[(
                &pass_through(16, 6, (magnitude / 256) as u8, (magnitude % 256) as u8),
                "",
            )],
        );
        mount.slew_rate(Axis::Primary, 10.0).unwrap();
    }

    #[test]
    fn ra_rates_are_reversed() {
        let mut mount = connect(
            FrameKind::Equatorial,
            &[
                (&pass_through(16, 7, 32, 58), ""),
                (&pass_through(17, 6, 32, 58), ""),
            ],
        );
        mount.slew_rate(Axis::Primary, 0.01).unwrap();
        mount.slew_rate(Axis::Secondary, 0.01).unwrap();
    }

    #[test]
    fn per_axis_goto_merges_through_the_cache() {
        let mut mount = connect(
            FrameKind::AltAz,
            &[
                // First request reads the current attitude to fill the other
                // axis, then GOTOs.
                ("z", "00000000,20000000"),
                ("b80000000,20000000", ""),
                // Second request reuses the cached pair.
                ("b80000000,40000000", ""),
            ],
        );
        mount.slew_to(Axis::Primary, PI).unwrap();
        mount.slew_to(Axis::Secondary, PI / 2.0).unwrap();
    }

    #[test]
    fn cancel_stops_goto_and_rates() {
        let mut mount = connect(
            FrameKind::AltAz,
            &[
                ("M", ""),
                (&pass_through(16, 6, 0, 0), ""),
                (&pass_through(17, 6, 0, 0), ""),
            ],
        );
        mount.cancel().unwrap();
    }

    #[test]
    fn tracking_mode_and_goto_status() {
        let mut mount = connect(
            FrameKind::AltAz,
            &[
                (&['T', '\u{0}'].iter().collect::<String>(), ""),
                ("L", "1"),
                ("L", "0"),
            ],
        );
        mount.set_tracking_mode(TrackingMode::Off).unwrap();
        assert!(mount.is_goto_in_progress().unwrap());
        assert!(!mount.is_goto_in_progress().unwrap());
    }
}
