//! The mount bridge.
//!
//! Runs on the machine physically wired to the mount, owns the serial port,
//! and exposes the mount operations as an RPC service on TCP port 45345 so
//! the tracker can run anywhere on the network. With `--hootl` it serves the
//! simulator instead of hardware.
//!
//! Exit codes: 0 on clean shutdown, 1 for configuration problems, 2 when
//! the serial device or the listening socket cannot be opened.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use hardware::channel::{auto_detect_serial, SerialChannel};
use hardware::mount::{FrameKind, MountDevice};
use hardware::nexstar::NexStar;
use hardware::remote;
use hardware::sim::SimMount;
use hardware::skywatcher::SkyWatcher;
use shared::config::{Config, MountMode, MountProtocol};

/// Exposes the telescope mount on the network.
#[derive(Parser, Debug)]
#[command(name = "bridge")]
#[command(about = "Serves the mount's serial interface over TCP")]
#[command(version)]
struct Args {
    /// Additional config files, later ones winning per-key.
    #[arg(long)]
    config: Vec<String>,

    /// Serve the internal mount simulator instead of hardware.
    #[arg(long, overrides_with = "no_hootl")]
    hootl: bool,

    /// Opposite of --hootl.
    #[arg(long, overrides_with = "hootl")]
    no_hootl: bool,

    /// Serial device, or "auto" to probe for one.
    #[arg(long)]
    serial_port: Option<String>,

    /// TCP port to serve on.
    #[arg(long, default_value_t = rpc::DEFAULT_PORT)]
    network_port: u16,

    /// Which protocol the attached mount speaks.
    #[arg(long)]
    telescope_protocol: Option<MountProtocol>,

    /// Mount orientation, altaz or eq.
    #[arg(long)]
    mount_mode: Option<MountMode>,
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

    if protocol == MountProtocol::SkyWatcherWifi {
        eprintln!(
            "configuration error: the Wi-Fi mount head is its own bridge; \
             point the tracker at it directly"
        );
        return ExitCode::from(1);
    }

    // The sim clock guard has to outlive the server.
    let mut _sim_clock = None;
    let device = if hootl {
        info!("serving the mount simulator");
        let sim = SimMount::new(frame);
        _sim_clock = Some(sim.start_clock());
        MountDevice::Sim(sim)
    } else {
        let port = match args
            .serial_port
            .clone()
            .unwrap_or_else(|| config.serial_port.clone())
        {
            path if path == "auto" => match auto_detect_serial() {
                Some(path) => path,
                None => {
                    eprintln!("unable to find a serial port for the telescope");
                    return ExitCode::from(2);
                }
            },
            path => path,
        };
        info!(%port, ?protocol, "opening serial device");
        let channel = match SerialChannel::open(&port, protocol) {
            Ok(channel) => Box::new(channel),
            Err(e) => {
                eprintln!("failed to open {port}: {e}");
                return ExitCode::from(2);
            }
        };
        let connected = match protocol {
            MountProtocol::NexStarHandControl => {
                NexStar::connect(channel, frame).map(MountDevice::NexStar)
            }
            _ => SkyWatcher::connect(channel, frame).map(MountDevice::SkyWatcher),
        };
        match connected {
            Ok(device) => device,
            Err(e) => {
                eprintln!("mount did not respond on {port}: {e}");
                return ExitCode::from(2);
            }
        }
    };

    let (handle, io_thread) = hardware::io::spawn(device);

    let server = match rpc::RpcServer::bind(("0.0.0.0", args.network_port)) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("failed to bind port {}: {e}", args.network_port);
            return ExitCode::from(2);
        }
    };
    info!(port = args.network_port, "bridge ready");

    let dispatch_handle = handle.clone();
    let result = server.serve(Arc::new(move |method: &str, params| {
        remote::dispatch(&dispatch_handle, method, params)
    }));

    handle.shutdown();
    let _ = io_thread.join();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("server failed: {e}");
            ExitCode::from(2)
        }
    }
}
