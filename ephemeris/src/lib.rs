//! Satellite ephemerides: TLE files in, SBS-1 position lines out.
//!
//! The `ephemeris` binary propagates every satellite from its two-line
//! element set and broadcasts the results as SBS-1 messages on a TCP port,
//! pretending each satellite is a very fast, very high-altitude airplane.
//! The tracker ingests them exactly like aircraft.

pub mod sat;
pub mod server;
pub mod tle;

pub use sat::Satellite;
pub use tle::TleEntry;
