//! The ephemeris server.
//!
//! Reads TLE files, propagates every satellite, and serves SBS-1 position
//! lines over TCP so the tracker can treat satellites as aircraft. Exit
//! codes: 1 for configuration problems, 2 if the port cannot be bound.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use rand::Rng;
use tracing::{info, warn};

use ephemeris::sat::Satellite;
use ephemeris::server::BroadcastServer;
use ephemeris::tle;
use shared::angle::wrap_rad;
use shared::config::Config;
use shared::geodesy::{ecef_to_geodetic, ned_between, ned_to_aer, Geodetic};
use shared::sbs1;

/// How often the propagation loop wakes up.
const CYCLE: Duration = Duration::from_millis(500);

/// Satellites this far below the horizon plane (meters) are postponed.
const DEEP_BELOW_HORIZON_M: f64 = 200_000.0;

/// Serves satellite positions from TLE files in SBS-1 format.
#[derive(Parser, Debug)]
#[command(name = "ephemeris")]
#[command(about = "Propagates TLE files and emits SBS-1 position messages")]
#[command(version)]
struct Args {
    /// Additional config files, later ones winning per-key.
    #[arg(long)]
    config: Vec<String>,

    /// Observer location name from the config.
    #[arg(long)]
    location: Option<String>,

    /// TCP port to serve SBS-1 data on.
    #[arg(long, default_value_t = 40_004)]
    port: u16,

    /// TLE files to serve; defaults to the config's `tle_files`.
    tle_files: Vec<String>,
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

    let files = if args.tle_files.is_empty() {
        config.tle_files.clone()
    } else {
        args.tle_files.clone()
    };
    if files.is_empty() {
        eprintln!("no TLE files given on the command line or in the config");
        return ExitCode::from(1);
    }

    // Last file wins when two files carry the same catalog number.
    let mut by_catalog = BTreeMap::new();
    for file in &files {
        let entries = match tle::parse_file(Path::new(file)) {
            Ok(entries) => entries,
            Err(e) => {
                eprintln!("{e}");
                return ExitCode::from(1);
            }
        };
        for entry in entries {
            match Satellite::from_tle(&entry) {
                Ok(sat) => {
                    by_catalog.insert(sat.catalog_number, sat);
                }
                Err(e) => warn!("skipping {}: {e}", entry.name),
            }
        }
    }
    let sats: Vec<Satellite> = by_catalog.into_values().collect();
    info!(count = sats.len(), "satellites loaded");

    let server = match BroadcastServer::bind(&format!("0.0.0.0:{}", args.port)) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("failed to bind port {}: {e}", args.port);
            return ExitCode::from(2);
        }
    };

    run(&sats, &observer, &server)
}

fn run(sats: &[Satellite], observer: &Geodetic, server: &BroadcastServer) -> ExitCode {
    let mut rng = rand::thread_rng();
    // When each satellite is next worth propagating.
    let mut next_predict: Vec<Instant> = vec![Instant::now(); sats.len()];

    loop {
        std::thread::sleep(CYCLE);
        let cycle_start = Instant::now();

        for (i, sat) in sats.iter().enumerate() {
            if next_predict[i] > cycle_start {
                continue;
            }

            let now = chrono::Utc::now();
            let ecef = match sat.ecef_at(now) {
                Ok(ecef) => ecef,
                Err(e) => {
                    // A decayed or malformed orbit will not get better;
                    // retire it for the rest of the run.
                    warn!("{e}");
                    next_predict[i] = cycle_start + Duration::from_secs(u32::MAX as u64);
                    continue;
                }
            };

            let geo = ecef_to_geodetic(ecef);
            let ned = ned_between(&geo, observer);

            // Deep below the horizon plane: not worth another look for a
            // while. The jitter spreads the recheck load out.
            if ned.z > DEEP_BELOW_HORIZON_M {
                let delay = 15.0 + 45.0 * rng.gen::<f64>();
                next_predict[i] = cycle_start + Duration::from_secs_f64(delay);
            }
            if ned.z > 0.0 {
                continue;
            }

            // Velocity by differencing one second ahead, in the satellite's
            // local frame: heading and ground speed fall straight out.
            let ecef_next = match sat.ecef_at(now + chrono::Duration::seconds(1)) {
                Ok(ecef) => ecef,
                Err(e) => {
                    warn!("{e}");
                    next_predict[i] = cycle_start + Duration::from_secs(u32::MAX as u64);
                    continue;
                }
            };
            let vel = ned_between(&ecef_to_geodetic(ecef_next), &geo);
            let (track, _, _) = ned_to_aer(vel);
            let ground_speed = (vel.x * vel.x + vel.y * vel.y).sqrt();

            let line = sbs1::satellite_message(
                sat.catalog_number,
                &sat.name,
                geo.alt / sbs1::METERS_PER_FOOT,
                ground_speed / sbs1::MPS_PER_KNOT,
                wrap_rad(track, 0.0).to_degrees(),
                geo.lat.to_degrees(),
                geo.lon.to_degrees(),
                -vel.z / sbs1::MPS_PER_FOOT_PER_MINUTE,
            );
            server.write(&line);
        }
    }
}
