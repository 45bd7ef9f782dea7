//! The main tracking application, headless.
//!
//! Wires together the SBS-1 ingest tasks, the fusion task, the mount
//! connection (simulator, Wi-Fi mount head, or remote bridge), landmark
//! alignment, and the 20 Hz pointing controller. The display consumes the
//! status board; until one is attached, a one-line summary is logged each
//! second and `--track` selects a target by hex ident at startup.
//!
//! Exit codes: 0 on clean shutdown, 1 for configuration problems, 2 when
//! the mount transport cannot be established at startup.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use hardware::channel::UdpChannel;
use hardware::mount::{FrameKind, MountDevice};
use hardware::remote::RemoteMount;
use hardware::sim::SimMount;
use hardware::skywatcher::SkyWatcher;
use shared::config::{Config, MountMode, MountProtocol};
use shared::{clock, Geodetic};
use tracker::align::{self, Alignment};
use tracker::control::Controller;
use tracker::status::{Banner, ControlMode, InputState, StatusBoard};

/// Tracks airplanes and satellites with a telescope mount.
#[derive(Parser, Debug)]
#[command(name = "tracker")]
#[command(about = "Drives a telescope mount to follow aircraft and satellites")]
#[command(version)]
struct Args {
    /// Additional config files, later ones winning per-key.
    #[arg(long)]
    config: Vec<String>,

    /// Run against the internal mount simulator instead of hardware.
    #[arg(long, overrides_with = "no_hootl")]
    hootl: bool,

    /// Opposite of --hootl.
    #[arg(long, overrides_with = "hootl")]
    no_hootl: bool,

    /// Observer location name from the config.
    #[arg(long)]
    location: Option<String>,

    /// Landmark to align against: a location name or sky:<body or star>.
    #[arg(long)]
    landmark: Option<String>,

    /// host:port of the mount bridge (or of the Wi-Fi mount head).
    #[arg(long)]
    telescope: Option<String>,

    /// Which protocol the mount speaks.
    #[arg(long)]
    telescope_protocol: Option<MountProtocol>,

    /// Mount orientation, altaz or eq.
    #[arg(long)]
    mount_mode: Option<MountMode>,

    /// host:port of an SBS-1 feed; repeat for several feeds.
    #[arg(long = "sbs1")]
    sbs1: Vec<String>,

    /// Select this hex ident as soon as it appears.
    #[arg(long)]
    track: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(1);
        }
    };

    let location = args.location.as_ref().unwrap_or(&config.location);
    let observer = match config.named_location(location) {
        Ok(observer) => observer,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(1);
        }
    };

    let hootl = if args.hootl {
        true
    } else if args.no_hootl {
        false
    } else {
        config.hootl
    };
    let protocol = args.telescope_protocol.unwrap_or(config.telescope_protocol);
    let mode = args.mount_mode.unwrap_or(config.mount_mode);
    let frame = match mode {
        MountMode::AltAz => FrameKind::AltAz,
        MountMode::Eq => FrameKind::Equatorial,
    };
    let telescope = args
        .telescope
        .clone()
        .unwrap_or_else(|| config.telescope_server.clone());

    // Keep the simulator's clock alive for the whole run.
    let mut _sim_clock = None;
    let device = if hootl {
        info!("running against the mount simulator");
        let sim = SimMount::new(frame);
        _sim_clock = Some(sim.start_clock());
        MountDevice::Sim(sim)
    } else if protocol == MountProtocol::SkyWatcherWifi {
        info!(addr = %telescope, "connecting to the mount head over wifi");
        let channel = match UdpChannel::connect(&telescope) {
            Ok(channel) => Box::new(channel),
            Err(e) => {
                eprintln!("wifi connection to {telescope} failed: {e}");
                return ExitCode::from(2);
            }
        };
        match SkyWatcher::connect(channel, frame) {
            Ok(mount) => MountDevice::SkyWatcher(mount),
            Err(e) => {
                eprintln!("mount head at {telescope} did not respond: {e}");
                return ExitCode::from(2);
            }
        }
    } else {
        info!(addr = %telescope, "connecting to the mount bridge");
        match RemoteMount::connect(&telescope) {
            Ok(mount) => MountDevice::Remote(mount),
            Err(e) => {
                eprintln!("bridge at {telescope} unreachable: {e}");
                return ExitCode::from(2);
            }
        }
    };
    let (mount, io_thread) = hardware::io::spawn(device);

    // Landmark alignment happens before anything moves.
    let landmark = args.landmark.clone().or_else(|| config.landmark.clone());
    let alignment = match landmark {
        Some(name) => {
            let world = match align::resolve_landmark(&name, &config, &observer, chrono::Utc::now())
            {
                Ok(world) => world,
                Err(e) => {
                    eprintln!("landmark error: {e}");
                    return ExitCode::from(1);
                }
            };
            let reading = match mount.read_attitude() {
                Ok(reading) => reading,
                Err(e) => {
                    eprintln!("could not read the mount for alignment: {e}");
                    return ExitCode::from(2);
                }
            };
            Alignment::from_landmark(world.0, world.1, reading, frame, &observer, chrono::Utc::now())
        }
        None => {
            info!("no landmark configured, trusting the mount's own alignment");
            Alignment::identity(frame)
        }
    };

    let stop = Arc::new(AtomicBool::new(false));
    let (fusion, reports, fusion_thread) = tracker::fusion::spawn(config.silence_timeout_seconds);

    let feeds = if args.sbs1.is_empty() {
        config.sbs1_servers.clone()
    } else {
        args.sbs1.clone()
    };
    let mut ingest_threads = Vec::new();
    for (source, server) in feeds.iter().enumerate() {
        ingest_threads.push(tracker::ingest::spawn(
            server.clone(),
            source,
            observer,
            reports.clone(),
            stop.clone(),
        ));
    }
    drop(reports);

    let input = InputState::new(config.gains);
    let status = StatusBoard::new();
    let controller = Controller::new(
        mount.clone(),
        fusion.clone(),
        alignment,
        observer,
        input.clone(),
        status.clone(),
    );
    let controller_stop = stop.clone();
    let controller_thread = std::thread::Builder::new()
        .name("controller".to_string())
        .spawn(move || tracker::control::run(controller, controller_stop))
        .expect("spawn controller thread");

    info!(%location, ?protocol, ?mode, "tracker running");
    supervise(&args, &fusion, &input, &status, &observer);

    // Not reached in normal operation; kept for the day the supervisor
    // learns to exit on its own.
    stop.store(true, Ordering::Relaxed);
    let _ = controller_thread.join();
    mount.shutdown();
    let _ = io_thread.join();
    for thread in ingest_threads {
        let _ = thread.join();
    }
    let _ = fusion_thread.join();
    ExitCode::SUCCESS
}

/// The stand-in for the display process: log a status line every second
/// and handle `--track` auto-selection.
fn supervise(
    args: &Args,
    fusion: &tracker::fusion::FusionHandle,
    input: &InputState,
    status: &StatusBoard,
    _observer: &Geodetic,
) {
    let mut last_banner = Banner::None;
    loop {
        std::thread::sleep(Duration::from_secs(1));
        let now = clock::monotonic_seconds();
        let snapshot = status.snapshot();

        if let Some(wanted) = &args.track {
            if snapshot.selected.is_none() && snapshot.mode != ControlMode::SunLockout {
                if let Some(target) = fusion
                    .snapshot(now)
                    .into_iter()
                    .find(|t| t.id.hex().eq_ignore_ascii_case(wanted))
                {
                    info!(id = %target.id, callsign = %target.callsign, "selecting target");
                    input.select(target.id);
                }
            }
        }

        if snapshot.banner != last_banner {
            match snapshot.banner {
                Banner::None => info!("banner cleared"),
                Banner::CommFailure => warn!("MOUNT COMMUNICATION FAILURE"),
                Banner::SunLockout => warn!("SUN LOCKOUT - use the hand controller to move clear"),
            }
            last_banner = snapshot.banner;
        }

        match snapshot.mount_azel {
            Some((az, el)) => info!(
                az = %format!("{:.2}", az.to_degrees()),
                el = %format!("{:.2}", el.to_degrees()),
                mode = ?snapshot.mode,
                targets = snapshot.targets.len(),
                tracking = %snapshot
                    .selected
                    .as_ref()
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                "status"
            ),
            None => info!(mode = ?snapshot.mode, targets = snapshot.targets.len(), "status"),
        }
    }
}
