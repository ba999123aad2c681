use std::time::{SystemTime, UNIX_EPOCH};

pub const NSEC_PER_USEC: u64 = 1_000;
pub const NSEC_PER_MSEC: u64 = 1_000_000;
pub const NSEC_PER_SEC: u64 = 1_000_000_000;
pub const USEC_PER_MSEC: u64 = 1_000;
pub const USEC_PER_SEC: u64 = 1_000_000;
pub const MSEC_PER_SEC: u64 = 1_000;

/// Sensor timestamps arrive in nanoseconds, frames carry microseconds.
pub fn nsec_to_usec(nsec: u64) -> u64 {
    nsec / NSEC_PER_USEC
}

/// Frame period in microseconds for a frame rate, zero when the rate is zero.
pub fn frame_duration_usec(frame_rate: u32) -> u64 {
    if frame_rate == 0 {
        0
    } else {
        USEC_PER_SEC / frame_rate as u64
    }
}

pub fn unix_timestamp_msec() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or_default()
}
