//! Monotonic process clock.
//!
//! Report timestamps and controller ticks use seconds on a monotonic clock
//! anchored at the first call, so timestamps are small, comparable floats
//! that never run backward.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Seconds since the process clock epoch.
pub fn monotonic_seconds() -> f64 {
    let epoch = *EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_decreases() {
        let a = monotonic_seconds();
        let b = monotonic_seconds();
        assert!(b >= a);
    }
}
