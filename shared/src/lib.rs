//! Core domain types and math shared by the tracker, bridge, and ephemeris
//! processes: angle wrapping, WGS-84 geodesy, low-precision astronomy,
//! layered configuration, the SBS-1 codec, and the target store.

pub mod angle;
pub mod astro;
pub mod clock;
pub mod config;
pub mod geodesy;
pub mod sbs1;
pub mod target;

pub use config::Config;
pub use geodesy::Geodetic;
