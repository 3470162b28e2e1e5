//! Socket options applied to relay connections before connecting.

use std::{io, time::Duration};

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpSocket;

/// Socket options applied before connecting to the relay.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use relaywire::socket::SocketOptions;
///
/// let options = SocketOptions::default()
///     .nodelay(true)
///     .keepalive(Some(Duration::from_secs(30)));
/// assert_eq!(options.keepalive_time(), Some(Duration::from_secs(30)));
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SocketOptions {
    nodelay: Option<bool>,
    keepalive: Option<KeepAliveSetting>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum KeepAliveSetting {
    Disabled,
    Duration(Duration),
}

impl SocketOptions {
    /// Configure `TCP_NODELAY` behaviour on the socket.
    #[must_use]
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = Some(enabled);
        self
    }

    /// Configure `SO_KEEPALIVE`. `Some(time)` enables probes after `time` of
    /// inactivity; `None` disables keepalive.
    #[must_use]
    pub fn keepalive(mut self, duration: Option<Duration>) -> Self {
        self.keepalive = Some(match duration {
            Some(value) => KeepAliveSetting::Duration(value),
            None => KeepAliveSetting::Disabled,
        });
        self
    }

    /// Keepalive idle time, if keepalive is enabled.
    #[must_use]
    pub fn keepalive_time(&self) -> Option<Duration> {
        match self.keepalive {
            Some(KeepAliveSetting::Duration(value)) => Some(value),
            Some(KeepAliveSetting::Disabled) | None => None,
        }
    }

    pub(crate) fn apply(&self, socket: &TcpSocket) -> io::Result<()> {
        if let Some(enabled) = self.nodelay {
            socket.set_nodelay(enabled)?;
        }
        match self.keepalive {
            Some(KeepAliveSetting::Duration(duration)) => {
                socket.set_keepalive(true)?;
                let config = TcpKeepalive::new().with_time(duration);
                SockRef::from(socket).set_tcp_keepalive(&config)?;
            }
            Some(KeepAliveSetting::Disabled) => socket.set_keepalive(false)?,
            None => {}
        }
        Ok(())
    }
}
