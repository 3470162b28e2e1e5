//! Metric helpers for `relaywire`.
//!
//! This module defines metric names and thin helpers over the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! every helper compiles to a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking allocated channels.
pub const CHANNELS_ALLOCATED: &str = "relaywire_channels_allocated";
/// Name of the counter tracking frames handled per direction.
pub const FRAMES_TOTAL: &str = "relaywire_frames_total";
/// Name of the counter tracking discarded input, labelled by reason.
pub const FRAMES_DROPPED: &str = "relaywire_frames_dropped_total";
/// Name of the counter tracking outbound connect attempts.
pub const CONNECT_ATTEMPTS: &str = "relaywire_connect_attempts_total";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug)]
pub enum Direction {
    /// Frames received from the relay.
    Inbound,
    /// Responses written back to the relay.
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Increment the allocated channels gauge.
pub fn inc_allocated() {
    #[cfg(feature = "metrics")]
    gauge!(CHANNELS_ALLOCATED).increment(1.0);
}

/// Decrement the allocated channels gauge.
pub fn dec_allocated() {
    #[cfg(feature = "metrics")]
    gauge!(CHANNELS_ALLOCATED).decrement(1.0);
}

/// Record a frame handled in the given direction.
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_TOTAL, "direction" => direction.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = direction;
}

/// Record input discarded for `reason`.
pub fn inc_dropped(reason: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_DROPPED, "reason" => reason).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = reason;
}

/// Record an outbound connect attempt.
pub fn inc_connect_attempts() {
    #[cfg(feature = "metrics")]
    counter!(CONNECT_ATTEMPTS).increment(1);
}
