//! Per-axis PID on angular error.

use shared::config::Gains;

/// One axis of rate control. Feed it the pointing error every cycle; it
/// returns the slew rate to command.
#[derive(Debug, Clone)]
pub struct Pid {
    gains: Gains,
    /// Output saturation, radians per second. The integrator is clamped so
    /// its contribution alone can never exceed this.
    output_limit: f64,
    integral: f64,
    last_error: Option<f64>,
    last_time: Option<f64>,
}

impl Pid {
    pub fn new(gains: Gains, output_limit: f64) -> Self {
        Self {
            gains,
            output_limit,
            integral: 0.0,
            last_error: None,
            last_time: None,
        }
    }

    /// Replace the gains and reset all controller memory.
    pub fn set_gains(&mut self, gains: Gains) {
        self.gains = gains;
        self.reset();
    }

    /// Forget the integrator and derivative memory. Called on target
    /// change, gain change, and lockout.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_error = None;
        self.last_time = None;
    }

    /// One control step at monotonic time `now` seconds.
    pub fn update(&mut self, error: f64, now: f64) -> f64 {
        let mut output = self.gains.kp * error;

        if let (Some(last_error), Some(last_time)) = (self.last_error, self.last_time) {
            let dt = now - last_time;
            if dt > 0.0 {
                self.integral += error * dt;
                // Anti-windup: bound the integral term at output saturation
                // so a long slew does not bank minutes of correction.
                if self.gains.ki > 0.0 {
                    let bound = self.output_limit / self.gains.ki;
                    self.integral = self.integral.clamp(-bound, bound);
                }
                output += self.gains.ki * self.integral;
                output += self.gains.kd * (error - last_error) / dt;
            }
        }

        self.last_error = Some(error);
        self.last_time = Some(now);
        output.clamp(-self.output_limit, self.output_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn gains(kp: f64, ki: f64, kd: f64) -> Gains {
        Gains { kp, ki, kd }
    }

    #[test]
    fn first_step_is_proportional_only() {
        let mut pid = Pid::new(gains(2.0, 5.0, 5.0), 10.0);
        assert_relative_eq!(pid.update(0.3, 0.0), 0.6);
    }

    #[test]
    fn integrator_contribution_is_zero_after_reset() {
        let mut pid = Pid::new(gains(1.0, 1.0, 0.0), 10.0);
        for i in 0..100 {
            pid.update(0.5, f64::from(i) * 0.05);
        }
        // The integral has accumulated; a gain change wipes it.
        pid.set_gains(gains(1.0, 1.0, 0.0));
        assert_relative_eq!(pid.update(0.5, 100.0), 0.5);

        for i in 0..100 {
            pid.update(0.5, 101.0 + f64::from(i) * 0.05);
        }
        pid.reset();
        assert_relative_eq!(pid.update(0.5, 200.0), 0.5);
    }

    #[test]
    fn integrator_is_clamped_at_saturation() {
        let mut pid = Pid::new(gains(0.0, 1.0, 0.0), 1.0);
        // Hold a large error for a long time.
        for i in 0..10_000 {
            pid.update(5.0, f64::from(i) * 0.05);
        }
        // Flip the error sign: a wound-up integrator would take ~ forever
        // to unwind. Clamped at the saturation bound, it recovers within
        // (2 * bound / |error| / ki) seconds of integration.
        let mut out = 0.0;
        for i in 0..100 {
            out = pid.update(-5.0, 500.0 + f64::from(i) * 0.05);
        }
        assert!(out < 0.0, "controller still saturated positive: {out}");
    }

    #[test]
    fn output_saturates_at_the_limit() {
        let mut pid = Pid::new(gains(10.0, 0.0, 0.0), 0.08);
        assert_relative_eq!(pid.update(3.0, 0.0), 0.08);
        assert_relative_eq!(pid.update(-3.0, 0.1), -0.08);
    }

    #[test]
    fn converges_on_a_rate_driven_plant() {
        // The command is a rate and the mount integrates it. With ki > 0
        // the steady-state error goes to zero.
        let mut pid = Pid::new(gains(1.0, 0.1, 0.1), 3.5);
        let target = 1.0;
        let mut position = 0.0;
        let dt = 0.05;
        for i in 0..4000 {
            let rate = pid.update(target - position, f64::from(i) * dt);
            position += rate * dt;
        }
        assert_relative_eq!(position, target, epsilon = 1e-4);
    }

    #[test]
    fn derivative_damps_a_step() {
        let mut kd_zero = Pid::new(gains(1.0, 0.0, 0.0), 10.0);
        let mut kd_big = Pid::new(gains(1.0, 0.0, 1.0), 10.0);
        kd_zero.update(1.0, 0.0);
        kd_big.update(1.0, 0.0);
        // Error shrinking: the derivative term pulls the output down.
        let undamped = kd_zero.update(0.8, 0.05);
        let damped = kd_big.update(0.8, 0.05);
        assert!(damped < undamped);
    }
}
