//! The pointing control loop.
//!
//! Ticks at 20 Hz. Every tick: read the mount, predict the selected target,
//! check the Sun keep-out circle, and either command an absolute slew (when
//! far off), run the per-axis PIDs (when close), or stop. The Sun check sits
//! between prediction and emission, so no command can race past it.
//!
//! Failure posture: nothing that goes wrong on the periphery stops the loop.
//! Device errors are logged and ridden through; transport loss degrades to
//! `Idle` with a banner until readings come back.

use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use hardware::mount::{Attitude, Axis, FrameKind, MountError, TrackingMode};
use hardware::MountHandle;
use shared::angle::{angular_separation, wrap_rad, wrap_signed};
use shared::astro::{self, Body};
use shared::clock;
use shared::geodesy::Geodetic;

use crate::align::Alignment;
use crate::fusion::{FusionHandle, TargetInfo};
use crate::pid::Pid;
use crate::status::{Banner, ControlMode, InputState, StatusBoard};

/// Radius of the keep-out circle around the Sun.
pub const SUN_EXCLUSION: f64 = 20.0 * PI / 180.0;

/// Controller cadence.
pub const CADENCE: Duration = Duration::from_millis(50);

/// An attitude older than this means the mount link is down.
const ATTITUDE_MAX_AGE: f64 = 1.0;

/// Pointing error beyond which an absolute slew is requested.
const SLEW_ENGAGE: f64 = 20.0 * PI / 180.0;

/// Pointing error below which the rate loop takes over from a slew.
const SLEW_DONE: f64 = 2.0 * PI / 180.0;

/// Minimum spacing between absolute slew requests.
const GOTO_REISSUE: f64 = 2.0;

/// Elevation band near the poles where azimuth becomes meaningless.
const ZENITH_GUARD: f64 = 0.1 * PI / 180.0;

/// How often the display's target list is refreshed.
const TARGET_REFRESH: f64 = 0.5;

/// Per-axis pointing error from a desired to an actual mount attitude,
/// each wrapped the short way around.
fn pointing_errors(desired: Attitude, actual: Attitude) -> (f64, f64) {
    (
        wrap_signed(desired.axis1 - actual.axis1),
        wrap_signed(desired.axis2 - actual.axis2),
    )
}

pub struct Controller {
    mount: MountHandle,
    fusion: FusionHandle,
    alignment: Alignment,
    observer: Geodetic,
    input: InputState,
    status: StatusBoard,

    mode: ControlMode,
    pid1: Pid,
    pid2: Pid,
    gain_epoch: u64,
    /// Latest finite attitude and when it was read.
    last_attitude: Option<(Attitude, f64)>,
    /// Azimuth held over while the target rides through the zenith.
    last_good_azimuth: f64,
    /// Whether the mount is known to be commanded stopped.
    stopped: bool,
    goto_supported: bool,
    last_goto: f64,
    last_target_refresh: f64,
    cached_targets: Vec<TargetInfo>,
    consecutive_read_failures: u32,
}

impl Controller {
    pub fn new(
        mount: MountHandle,
        fusion: FusionHandle,
        alignment: Alignment,
        observer: Geodetic,
        input: InputState,
        status: StatusBoard,
    ) -> Self {
        let gains = input.snapshot().gains;
        let limit = mount.max_slew_rate();
        Self {
            mount,
            fusion,
            alignment,
            observer,
            input,
            status,
            mode: ControlMode::Idle,
            pid1: Pid::new(gains, limit),
            pid2: Pid::new(gains, limit),
            gain_epoch: 0,
            last_attitude: None,
            last_good_azimuth: 0.0,
            stopped: false,
            goto_supported: true,
            last_goto: f64::NEG_INFINITY,
            last_target_refresh: f64::NEG_INFINITY,
            cached_targets: Vec::new(),
            consecutive_read_failures: 0,
        }
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    /// One control cycle at monotonic time `now`.
    pub fn tick(&mut self, now: f64, now_utc: DateTime<Utc>) {
        let input = self.input.snapshot();
        if input.gain_epoch != self.gain_epoch {
            self.gain_epoch = input.gain_epoch;
            info!(?input.gains, "gains changed, controllers reset");
            self.pid1.set_gains(input.gains);
            self.pid2.set_gains(input.gains);
        }

        // A NaN attitude is a lying transport, not a position.
        match self.mount.read_attitude() {
            Ok(attitude) if attitude.axis1.is_finite() && attitude.axis2.is_finite() => {
                self.last_attitude = Some((attitude, now));
                self.consecutive_read_failures = 0;
            }
            Ok(attitude) => {
                self.consecutive_read_failures += 1;
                warn!(?attitude, "non-finite attitude reading discarded");
            }
            Err(e) => {
                self.consecutive_read_failures += 1;
                if self.consecutive_read_failures == 1 {
                    debug!("attitude read failed: {e}");
                }
            }
        }

        let attitude = match self.last_attitude {
            Some((attitude, read_at)) if now - read_at <= ATTITUDE_MAX_AGE => attitude,
            _ => {
                // Mount link is down: degrade, warn, keep ticking.
                if self.mode != ControlMode::Idle {
                    warn!("mount attitude lost, tracking stopped");
                }
                self.mode = ControlMode::Idle;
                self.stopped = false;
                self.pid1.reset();
                self.pid2.reset();
                self.publish(None, now, now_utc, Banner::CommFailure);
                return;
            }
        };

        let jd = astro::julian_date(now_utc);
        let aligned = self.alignment.apply(attitude);
        let boresight = match self.frame() {
            FrameKind::AltAz => (aligned.axis1, wrap_signed(aligned.axis2)),
            FrameKind::Equatorial => astro::equatorial_to_horizontal(
                aligned.axis1,
                wrap_signed(aligned.axis2),
                &self.observer,
                jd,
            ),
        };
        let sun = astro::sun_horizontal(&self.observer, now_utc);

        let prediction = input
            .selected
            .as_ref()
            .and_then(|id| self.fusion.predict(id, now));

        // The safety interlock sits between prediction and emission: a
        // boresight or a target inside the circle stops everything, and
        // only the operator walking the mount out with the hand controller
        // clears it.
        let boresight_near_sun =
            angular_separation(boresight.0, boresight.1, sun.0, sun.1) < SUN_EXCLUSION;
        let target_near_sun = prediction
            .map(|p| angular_separation(p.az, p.el, sun.0, sun.1) < SUN_EXCLUSION)
            .unwrap_or(false);
        if boresight_near_sun || target_near_sun {
            if self.mode != ControlMode::SunLockout {
                warn!("sun keep-out circle violated, all motion stopped");
                self.halt();
            }
            self.mode = ControlMode::SunLockout;
            self.input.clear_selection();
            self.publish(Some(boresight), now, now_utc, Banner::SunLockout);
            return;
        }
        if self.mode == ControlMode::SunLockout {
            info!("clear of the sun keep-out circle");
            self.mode = ControlMode::Idle;
        }

        let Some(prediction) = prediction else {
            if input.selected.is_some() {
                debug!("selected target has no data, deselecting");
                self.input.clear_selection();
            }
            self.stop_tracking();
            self.publish(Some(boresight), now, now_utc, Banner::None);
            return;
        };

        // Boundary policy: clamp elevation into the mechanical range, and
        // hold the last sensible azimuth while crossing the zenith, where
        // azimuth is undefined.
        let mut az = prediction.az;
        let mut el = prediction.el;
        if el.abs() >= PI / 2.0 - ZENITH_GUARD {
            el = el.clamp(-PI / 2.0 + ZENITH_GUARD, PI / 2.0 - ZENITH_GUARD);
            az = self.last_good_azimuth;
            debug!("target at zenith boundary, azimuth held");
        } else {
            self.last_good_azimuth = az;
        }

        // The manual bias is always an az/el nudge; in the equatorial frame
        // it is folded in before conversion, so "up" on the display stays
        // up in the sky wherever the mount points.
        let az = wrap_rad(az + input.bias_az, 0.0);
        let el = el + input.bias_el;

        let desired_world = match self.frame() {
            FrameKind::AltAz => Attitude {
                axis1: az,
                axis2: wrap_rad(el, 0.0),
            },
            FrameKind::Equatorial => {
                let (ra, dec) = astro::horizontal_to_equatorial(az, el, &self.observer, jd);
                Attitude {
                    axis1: ra,
                    axis2: wrap_rad(dec, 0.0),
                }
            }
        };
        let desired = self.alignment.unapply(desired_world);
        let (e1, e2) = pointing_errors(desired, attitude);
        let worst = e1.abs().max(e2.abs());

        // Far off target: let the mount's own slew cover the distance.
        if self.goto_supported && worst > SLEW_ENGAGE && now - self.last_goto > GOTO_REISSUE {
            let result = self
                .mount
                .slew_to(Axis::Primary, desired.axis1)
                .and_then(|()| self.mount.slew_to(Axis::Secondary, desired.axis2));
            match result {
                Ok(()) => {
                    debug!(axis1 = desired.axis1, axis2 = desired.axis2, "absolute slew");
                    self.mode = ControlMode::Slewing;
                    self.stopped = false;
                    self.last_goto = now;
                }
                Err(MountError::Unsupported) => {
                    debug!("mount has no absolute slew, rate loop only");
                    self.goto_supported = false;
                }
                Err(e) => warn!("absolute slew rejected: {e}"),
            }
        }
        if self.mode == ControlMode::Slewing {
            if worst < SLEW_DONE || now - self.last_goto > GOTO_REISSUE {
                self.mode = ControlMode::Tracking;
                self.pid1.reset();
                self.pid2.reset();
            } else {
                // Slew still in progress; no rate commands on top of it.
                self.publish(Some(boresight), now, now_utc, Banner::None);
                return;
            }
        }

        let u1 = self.pid1.update(e1, now);
        let u2 = self.pid2.update(e2, now);
        let result = self
            .mount
            .slew_rate(Axis::Primary, u1)
            .and_then(|()| self.mount.slew_rate(Axis::Secondary, u2));
        match result {
            Ok(()) => {
                self.mode = ControlMode::Tracking;
                self.stopped = false;
            }
            // Device-level rejections: log and keep the loop alive.
            Err(e) => warn!("rate command rejected: {e}"),
        }

        self.publish(Some(boresight), now, now_utc, Banner::None);
    }

    /// Best-effort stop on shutdown.
    pub fn shutdown(&mut self) {
        if let Err(e) = self.mount.cancel() {
            debug!("final cancel failed: {e}");
        }
    }

    fn frame(&self) -> FrameKind {
        self.mount.frame_kind()
    }

    /// Stop tracking: a best-effort cancel (which also aborts a slew in
    /// progress), then reset the controllers.
    fn stop_tracking(&mut self) {
        if !self.stopped {
            let result = self
                .mount
                .cancel()
                .and_then(|()| self.mount.set_tracking_mode(TrackingMode::Off));
            match result {
                Ok(()) => self.stopped = true,
                Err(e) => debug!("stop failed: {e}"),
            }
        }
        self.pid1.reset();
        self.pid2.reset();
        if self.mode != ControlMode::SunLockout {
            self.mode = ControlMode::Idle;
        }
    }

    /// Emergency halt: abandon any slew in progress as well.
    fn halt(&mut self) {
        if let Err(e) = self.mount.cancel() {
            warn!("emergency cancel failed: {e}");
        }
        if let Err(e) = self.mount.set_tracking_mode(TrackingMode::Off) {
            debug!("tracking-off failed: {e}");
        }
        self.stopped = true;
        self.pid1.reset();
        self.pid2.reset();
    }

    fn publish(
        &mut self,
        boresight: Option<(f64, f64)>,
        now: f64,
        now_utc: DateTime<Utc>,
        banner: Banner,
    ) {
        if now - self.last_target_refresh > TARGET_REFRESH {
            self.cached_targets = self.fusion.snapshot(now);
            self.last_target_refresh = now;
        }
        let sun = astro::sun_horizontal(&self.observer, now_utc);
        let moon = astro::body_horizontal(Body::Moon, &self.observer, now_utc);
        let selected = self.input.snapshot().selected;
        let mode = self.mode;
        let targets = self.cached_targets.clone();
        self.status.update(move |status| {
            status.mount_azel = boresight;
            status.sun_azel = Some(sun);
            status.moon_azel = Some(moon);
            status.targets = targets;
            status.selected = selected;
            status.mode = mode;
            status.banner = banner;
        });
    }
}

/// Run the controller at its cadence until `stop` is set, then halt the
/// mount.
pub fn run(mut controller: Controller, stop: Arc<AtomicBool>) {
    let mut next = Instant::now();
    while !stop.load(Ordering::Relaxed) {
        next += CADENCE;
        let now = Instant::now();
        if next > now {
            std::thread::sleep(next - now);
        } else {
            // Fell behind (a slow mount round trip); reset the cadence
            // rather than bursting to catch up.
            next = now;
        }
        controller.tick(clock::monotonic_seconds(), Utc::now());
    }
    controller.shutdown();
}
