//! Tunnel configuration.
//!
//! Wire limits are protocol constants (see [`crate::codec`]); only timers and
//! socket behaviour are configurable.

use std::time::Duration;

use crate::socket::SocketOptions;

/// Timers and socket settings for a pool and its channels.
///
/// # Default Values
/// - `allocation_timeout`: 30 seconds
/// - `idle_timeout`: 600 seconds
/// - `top_up_interval`: 90 seconds
/// - `first_top_up_delay`: 40 seconds
/// - `connect_timeout`: 30 seconds
/// - `socket_options`: keepalive after 60 seconds of inactivity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TunnelConfig {
    /// Time a new channel may wait for the relay's allocation reply.
    pub allocation_timeout: Duration,
    /// Inactivity after which a channel is closed.
    pub idle_timeout: Duration,
    /// Delay between pool top-up ticks.
    pub top_up_interval: Duration,
    /// Delay before the first top-up tick after start.
    pub first_top_up_delay: Duration,
    /// Limit on a single outbound connect.
    pub connect_timeout: Duration,
    /// Options applied to every relay socket.
    pub socket_options: SocketOptions,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            allocation_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            top_up_interval: Duration::from_secs(90),
            first_top_up_delay: Duration::from_secs(40),
            connect_timeout: Duration::from_secs(30),
            socket_options: SocketOptions::default().keepalive(Some(Duration::from_secs(60))),
        }
    }
}

const MIN_DELAY: Duration = Duration::from_millis(1);

impl TunnelConfig {
    /// Set the allocation timeout.
    #[must_use]
    pub fn allocation_timeout(mut self, value: Duration) -> Self {
        self.allocation_timeout = value;
        self
    }

    /// Set the idle timeout.
    #[must_use]
    pub fn idle_timeout(mut self, value: Duration) -> Self {
        self.idle_timeout = value;
        self
    }

    /// Set the top-up interval.
    #[must_use]
    pub fn top_up_interval(mut self, value: Duration) -> Self {
        self.top_up_interval = value;
        self
    }

    /// Set the delay before the first top-up.
    #[must_use]
    pub fn first_top_up_delay(mut self, value: Duration) -> Self {
        self.first_top_up_delay = value;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn connect_timeout(mut self, value: Duration) -> Self {
        self.connect_timeout = value;
        self
    }

    /// Set the socket options.
    #[must_use]
    pub fn socket_options(mut self, value: SocketOptions) -> Self {
        self.socket_options = value;
        self
    }

    /// Clamp every duration to at least one millisecond.
    ///
    /// A zero interval would turn the top-up loop into a busy loop.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use relaywire::TunnelConfig;
    ///
    /// let cfg = TunnelConfig::default().top_up_interval(Duration::ZERO).normalized();
    /// assert_eq!(cfg.top_up_interval, Duration::from_millis(1));
    /// ```
    #[must_use]
    pub fn normalized(mut self) -> Self {
        for value in [
            &mut self.allocation_timeout,
            &mut self.idle_timeout,
            &mut self.top_up_interval,
            &mut self.first_top_up_delay,
            &mut self.connect_timeout,
        ] {
            *value = (*value).max(MIN_DELAY);
        }
        self
    }
}
