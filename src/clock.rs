//! Monotonic clock shared by the receivers, the rings and the frame
//! processor. All timestamps in the crate are nanoseconds (or microseconds
//! inside the ring slots) since a process-wide epoch.

use std::time::Instant;

use lazy_static::lazy_static;

lazy_static! {
    static ref EPOCH: Instant = Instant::now();
}

/// Monotonic nanoseconds since the process epoch.
pub fn now_ns() -> u64 {
    EPOCH.elapsed().as_nanos() as u64
}

/// Monotonic microseconds since the process epoch.
pub fn now_us() -> u64 {
    EPOCH.elapsed().as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic() {
        let a = now_ns();
        let b = now_ns();
        assert!(b >= a);
    }

    #[test]
    fn test_units_agree() {
        let us = now_us();
        let ns = now_ns();
        // ns sampled after us, so ns / 1000 can only be ahead
        assert!(ns / 1000 >= us);
    }
}
