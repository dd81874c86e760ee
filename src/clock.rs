//! Timestamps for entry headers.
//!
//! Producers stamp entries on the hot path, so reading the clock must be
//! cheap and monotonic. The wall clock is sampled once and paired with a
//! monotonic `Instant`; every later timestamp is that anchor plus the
//! monotonic elapsed time. Wall clock adjustments after the anchor is taken
//! are therefore not observed, which keeps timestamps from the same thread
//! non-decreasing.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use lazy_static::lazy_static;

struct Anchor {
    wall_ns: u64,
    mono: Instant,
}

lazy_static! {
    static ref ANCHOR: Anchor = Anchor {
        wall_ns: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_nanos() as u64,
        mono: Instant::now(),
    };
}

/// Returns nanoseconds since the UNIX epoch, monotonic within the process.
#[inline]
pub fn get_timestamp() -> u64 {
    let anchor = &*ANCHOR;
    anchor
        .wall_ns
        .saturating_add(anchor.mono.elapsed().as_nanos() as u64)
}

/// Splits a header timestamp into whole seconds and the nanosecond remainder.
#[inline]
pub const fn split_timestamp(ns: u64) -> (u64, u32) {
    (ns / 1_000_000_000, (ns % 1_000_000_000) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic() {
        let mut prev = get_timestamp();
        for _ in 0..1000 {
            let now = get_timestamp();
            assert!(now >= prev);
            prev = now;
        }
    }

    #[test]
    fn test_close_to_wall_clock() {
        let wall = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos() as u64;
        let ts = get_timestamp();
        let diff = ts.abs_diff(wall);
        assert!(diff < 5_000_000_000, "clock drifted {diff}ns from wall time");
    }

    #[test]
    fn test_split() {
        assert_eq!(split_timestamp(1_500_000_123), (1, 500_000_123));
        assert_eq!(split_timestamp(0), (0, 0));
    }
}
