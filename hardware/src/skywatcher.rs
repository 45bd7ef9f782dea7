//! Sky-Watcher motor controller protocol.
//!
//! This is the binary motor-controller language spoken by the mount head
//! itself (over the USB or EQMOD serial port, or UDP when the head bridges
//! Wi-Fi), not the SynScan hand-controller language. Commands are a letter,
//! an axis digit, and hex arguments; multi-byte integers travel as
//! little-endian byte pairs of hex digits, so `0x123456` is written
//! `"563412"`.
//!
//! Unlike the NexStar hand control there is no alignment model on the other
//! end: position reads are raw encoder counts, which is why landmark
//! alignment is mandatory for these mounts. Rates are commanded indirectly
//! by writing a step period (timer ticks per microstep), so continuous rate
//! updates are cheap period writes, while starting, stopping, and reversing
//! require the motion-mode/start/stop command sequence. The driver caches
//! the per-axis commanded rate to know which sequence a new rate requires.

use tracing::debug;

use crate::channel::Channel;
use crate::mount::{Attitude, Axis, FrameKind, MountError, TrackingMode};

/// Encode an integer as two hex digits.
pub(crate) fn encode_int_2(value: i64) -> String {
    format!("{value:02X}")
}

/// Encode an integer as little-endian byte-swapped hex, six digits.
pub(crate) fn encode_int_6(value: i64) -> String {
    let h = format!("{value:06X}");
    format!("{}{}{}", &h[4..6], &h[2..4], &h[0..2])
}

pub(crate) fn decode_int_2(text: &str) -> Result<i64, MountError> {
    if text.len() != 2 {
        return Err(MountError::Protocol(format!("bad 2-digit field {text:?}")));
    }
    i64::from_str_radix(text, 16)
        .map_err(|_| MountError::Protocol(format!("bad hex field {text:?}")))
}

pub(crate) fn decode_int_6(text: &str) -> Result<i64, MountError> {
    if text.len() != 6 || !text.is_ascii() {
        return Err(MountError::Protocol(format!("bad 6-digit field {text:?}")));
    }
    let reordered = format!("{}{}{}", &text[4..6], &text[2..4], &text[0..2]);
    i64::from_str_radix(&reordered, 16)
        .map_err(|_| MountError::Protocol(format!("bad hex field {text:?}")))
}

/// Decoded per-axis status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AxisStatus {
    pub tracking: bool,
    pub ccw: bool,
    pub fast: bool,
    pub running: bool,
    pub blocked: bool,
    pub init_done: bool,
    pub level_switch_on: bool,
}

impl AxisStatus {
    fn from_word(value: i64) -> Self {
        Self {
            tracking: value & 0x100 != 0,
            ccw: value & 0x200 != 0,
            fast: value & 0x400 != 0,
            running: value & 0x010 != 0,
            blocked: value & 0x020 != 0,
            init_done: value & 0x001 != 0,
            level_switch_on: value & 0x002 != 0,
        }
    }
}

/// Driver for a Sky-Watcher mount head behind any [`Channel`].
pub struct SkyWatcher {
    channel: Box<dyn Channel>,
    frame: FrameKind,
    /// Counts per revolution, per axis.
    cpr: [i64; 2],
    /// High speed ratio, per axis.
    hsr: [i64; 2],
    timer_freq: i64,
    /// Last commanded rate per axis, rad/s. Decides whether a new rate is a
    /// period update or needs the stop/mode/start sequence.
    rate: [f64; 2],
}

impl SkyWatcher {
    /// Fast mode tops out around 800x sidereal on these motor controllers.
    pub const MAX_SLEW_RATE: f64 = 800.0 * shared::angle::SIDEREAL_RATE_RAD_PER_SEC;

    /// Interrogate the controller's scaling constants and check that both
    /// axes initialized cleanly.
    pub fn connect(mut channel: Box<dyn Channel>, frame: FrameKind) -> Result<Self, MountError> {
        let cpr = [
            decode_int_6(&channel.speak("a1")?)?,
            decode_int_6(&channel.speak("a2")?)?,
        ];
        let hsr = [
            decode_int_2(&channel.speak("g1")?)?,
            decode_int_2(&channel.speak("g2")?)?,
        ];
        let timer_freq = decode_int_6(&channel.speak("b1")?)?;

        channel.speak("F1")?;
        channel.speak("F2")?;

        let mut mount = Self {
            channel,
            frame,
            cpr,
            hsr,
            timer_freq,
            rate: [0.0, 0.0],
        };
        for axis in [0, 1] {
            let status = mount.inquire_status(axis)?;
            if status.running || status.blocked || !status.init_done {
                return Err(MountError::Device(format!(
                    "axis {} not ready: {status:?}",
                    axis + 1
                )));
            }
        }
        debug!(?cpr, ?hsr, timer_freq, "skywatcher link initialized");
        Ok(mount)
    }

    fn speak(&mut self, command: &str, reply_len: usize) -> Result<String, MountError> {
        let reply = self.channel.speak(command)?;
        if reply.len() != reply_len {
            return Err(MountError::Protocol(format!(
                "reply to {command:?} has length {}, expected {reply_len}",
                reply.len()
            )));
        }
        Ok(reply)
    }

    fn inquire_status(&mut self, axis: usize) -> Result<AxisStatus, MountError> {
        let reply = self.speak(&format!("f{}", axis + 1), 3)?;
        let value = i64::from_str_radix(&reply, 16)
            .map_err(|_| MountError::Protocol(format!("bad status word {reply:?}")))?;
        Ok(AxisStatus::from_word(value))
    }

    fn inquire_position(&mut self, axis: usize) -> Result<f64, MountError> {
        let reply = self.speak(&format!("j{}", axis + 1), 6)?;
        let counts = decode_int_6(&reply)?;
        Ok(counts as f64 / self.cpr[axis] as f64 * std::f64::consts::TAU)
    }

    fn set_motion_mode(&mut self, axis: usize, fast: bool, ccw: bool) -> Result<(), MountError> {
        let mut value = 0x10;
        if fast {
            value |= 0x20;
        }
        if ccw {
            value |= 0x01;
        }
        self.speak(&format!("G{}{}", axis + 1, encode_int_2(value)), 0)?;
        Ok(())
    }

    fn set_step_period(&mut self, axis: usize, period: f64) -> Result<(), MountError> {
        let period = (period as i64).clamp(0, 0xffffff);
        self.speak(&format!("I{}{}", axis + 1, encode_int_6(period)), 0)?;
        Ok(())
    }

    fn slew_axis(&mut self, axis: usize, rate: f64) -> Result<(), MountError> {
        // Zero and direction reversals stop the axis; a reversal starts in
        // the new direction on the caller's next cycle. This keeps every
        // transition a plain stop from the motor controller's perspective.
        if rate == 0.0 || self.rate[axis] * rate < 0.0 {
            self.speak(&format!("K{}", axis + 1), 0)?;
            self.rate[axis] = 0.0;
            return Ok(());
        }

        if self.rate[axis] == 0.0 {
            // Can't change motion mode while the motor is still spinning
            // down from the stop we just issued.
            if self.inquire_status(axis)?.running {
                return Ok(());
            }
            self.set_motion_mode(axis, true, rate < 0.0)?;
        }

        let period = self.hsr[axis] as f64 * self.timer_freq as f64 * std::f64::consts::TAU
            / rate.abs().min(Self::MAX_SLEW_RATE)
            / self.cpr[axis] as f64;
        self.set_step_period(axis, period)?;

        if self.rate[axis] == 0.0 {
            self.speak(&format!("J{}", axis + 1), 0)?;
        }
        self.rate[axis] = rate;
        Ok(())
    }

    pub fn read_attitude(&mut self) -> Result<Attitude, MountError> {
        Ok(Attitude {
            axis1: self.inquire_position(0)?,
            axis2: self.inquire_position(1)?,
        })
    }

    pub fn slew_rate(&mut self, axis: Axis, rate: f64) -> Result<(), MountError> {
        match (self.frame, axis) {
            // RA motion runs opposite to the raw axis direction.
            (FrameKind::Equatorial, Axis::Primary) => self.slew_axis(0, -rate),
            (_, Axis::Primary) => self.slew_axis(0, rate),
            (_, Axis::Secondary) => self.slew_axis(1, rate),
        }
    }

    /// The motor protocol has no tracking model; nothing to do.
    pub fn set_tracking_mode(&mut self, _mode: TrackingMode) -> Result<(), MountError> {
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), MountError> {
        self.speak("K1", 0)?;
        self.speak("K2", 0)?;
        self.rate = [0.0, 0.0];
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
    use std::f64::consts::TAU;

    const CPR: i64 = 9_024_000;
    const HSR: i64 = 16;
    const TIMER_FREQ: i64 = 64_935;

    fn init_script() -> Vec<(String, String)> {
        vec![
            ("a1".into(), encode_int_6(CPR)),
            ("a2".into(), encode_int_6(CPR)),
            ("g1".into(), encode_int_2(HSR)),
            ("g2".into(), encode_int_2(HSR)),
            ("b1".into(), encode_int_6(TIMER_FREQ)),
            ("F1".into(), "".into()),
            ("F2".into(), "".into()),
            ("f1".into(), "001".into()),
            ("f2".into(), "001".into()),
        ]
    }

    fn connect(frame: FrameKind, extra: Vec<(String, String)>) -> SkyWatcher {
        let mut script = init_script();
        script.extend(extra);
        SkyWatcher::connect(Box::new(ScriptedChannel::owned(script)), frame).unwrap()
    }

    fn period_for(rate: f64) -> String {
        let period =
            (HSR as f64 * TIMER_FREQ as f64 * TAU / rate / CPR as f64) as i64;
        encode_int_6(period)
    }

    #[test]
    fn integer_encodings_swap_bytes() {
        assert_eq!(encode_int_6(0x123456), "563412");
        assert_eq!(decode_int_6("563412").unwrap(), 0x123456);
        assert_eq!(encode_int_2(0x30), "30");
        assert_eq!(decode_int_2("30").unwrap(), 0x30);
        for value in [0, 1, 0x89, 0xABCD, 0xFFFFFF] {
            assert_eq!(decode_int_6(&encode_int_6(value)).unwrap(), value);
        }
        assert!(decode_int_6("12345").is_err());
        assert!(decode_int_6("12345G").is_err());
    }

    #[test]
    fn status_word_decoding() {
        let status = AxisStatus::from_word(0x001);
        assert!(status.init_done && !status.running && !status.blocked);
        let status = AxisStatus::from_word(0x713);
        assert!(status.running && status.fast && status.ccw && !status.blocked);
        assert!(status.tracking && status.level_switch_on && status.init_done);
    }

    #[test]
    fn connect_fails_if_axis_not_ready() {
        let mut script = init_script();
        // Axis 1 reports blocked.
        script[7].1 = "021".into();
        let result = SkyWatcher::connect(
            Box::new(ScriptedChannel::owned(script)),
            FrameKind::AltAz,
        );
        assert!(matches!(result, Err(MountError::Device(_))));
    }

    #[test]
    fn position_reads_scale_by_counts_per_revolution() {
        let quarter_turn = CPR / 4;
        let mut mount = connect(
            FrameKind::AltAz,
            vec![
                ("j1".into(), encode_int_6(quarter_turn)),
                ("j2".into(), encode_int_6(0)),
            ],
        );
        let attitude = mount.read_attitude().unwrap();
        assert_relative_eq!(attitude.axis1, TAU / 4.0, epsilon = 1e-9);
        assert_relative_eq!(attitude.axis2, 0.0);
    }

    #[test]
    fn starting_an_axis_issues_the_full_sequence() {
        let rate = 0.01;
        let mut mount = connect(
            FrameKind::AltAz,
            vec![
                ("f1".into(), "001".into()),
                ("G130".into(), "".into()),
                (format!("I1{}", period_for(rate)), "".into()),
                ("J1".into(), "".into()),
            ],
        );
        mount.slew_rate(Axis::Primary, rate).unwrap();
    }

    #[test]
    fn continuous_updates_only_rewrite_the_period() {
        let mut mount = connect(
            FrameKind::AltAz,
            vec![
                ("f1".into(), "001".into()),
                ("G130".into(), "".into()),
                (format!("I1{}", period_for(0.01)), "".into()),
                ("J1".into(), "".into()),
                // Same direction, new magnitude: just a period write.
                (format!("I1{}", period_for(0.02)), "".into()),
                (format!("I1{}", period_for(0.015)), "".into()),
            ],
        );
        mount.slew_rate(Axis::Primary, 0.01).unwrap();
        mount.slew_rate(Axis::Primary, 0.02).unwrap();
        mount.slew_rate(Axis::Primary, 0.015).unwrap();
    }

    #[test]
    fn reversal_stops_first_then_restarts() {
        let mut mount = connect(
            FrameKind::AltAz,
            vec![
                ("f1".into(), "001".into()),
                ("G130".into(), "".into()),
                (format!("I1{}", period_for(0.01)), "".into()),
                ("J1".into(), "".into()),
                // Sign change: stop only.
                ("K1".into(), "".into()),
                // Next cycle starts counterclockwise.
                ("f1".into(), "001".into()),
                ("G131".into(), "".into()),
                (format!("I1{}", period_for(0.01)), "".into()),
                ("J1".into(), "".into()),
            ],
        );
        mount.slew_rate(Axis::Primary, 0.01).unwrap();
        mount.slew_rate(Axis::Primary, -0.01).unwrap();
        mount.slew_rate(Axis::Primary, -0.01).unwrap();
    }

    #[test]
    fn restart_waits_for_spin_down() {
        let mut mount = connect(
            FrameKind::AltAz,
            vec![
                ("f1".into(), "001".into()),
                ("G130".into(), "".into()),
                (format!("I1{}", period_for(0.01)), "".into()),
                ("J1".into(), "".into()),
                ("K1".into(), "".into()),
                // Still running: the driver must not touch the motion mode.
                ("f1".into(), "011".into()),
            ],
        );
        mount.slew_rate(Axis::Primary, 0.01).unwrap();
        mount.slew_rate(Axis::Primary, 0.0).unwrap();
        mount.slew_rate(Axis::Primary, -0.01).unwrap();
    }

    #[test]
    fn ra_rates_are_reversed_in_eq_frame() {
        let mut mount = connect(
            FrameKind::Equatorial,
            vec![
                ("f1".into(), "001".into()),
                // Positive RA rate becomes a counterclockwise axis slew.
                ("G131".into(), "".into()),
                (format!("I1{}", period_for(0.01)), "".into()),
                ("J1".into(), "".into()),
            ],
        );
        mount.slew_rate(Axis::Primary, 0.01).unwrap();
    }

    #[test]
    fn slew_to_is_unsupported() {
        use crate::mount::MountDevice;
        let mount = connect(FrameKind::AltAz, vec![]);
        let mut device = MountDevice::SkyWatcher(mount);
        assert!(matches!(
            device.slew_to(Axis::Primary, 1.0),
            Err(MountError::Unsupported)
        ));
    }
}
