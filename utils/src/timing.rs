// Monotonic clock helpers
//
// Frame timestamps and log prefixes both come from here so that
// they can be compared against each other.
//
// Austin Shafer - 2024
extern crate nix;

use nix::time::{clock_gettime, ClockId};

/// Get the current monotonic clock reading in milliseconds
pub fn get_current_millis() -> u64 {
    let ts = clock_gettime(ClockId::CLOCK_MONOTONIC).expect("clock_gettime(CLOCK_MONOTONIC)");

    ts.tv_sec() as u64 * 1000 + ts.tv_nsec() as u64 / 1_000_000
}

/// Millisecond timestamp truncated to the 32 bits the wire protocol
/// carries. Wraps roughly every 50 days, which callers must tolerate.
pub fn get_current_millis32() -> u32 {
    get_current_millis() as u32
}
