//! Pool of relay channels.
//!
//! The pool knows how many channels the relay granted (the *desired size*)
//! and which channels are currently allocated (the *live set*). A periodic
//! tick calls [`Pool::open_more`], which opens at most one new connection per
//! call; lost channels are therefore replaced gradually, one per tick.

use std::{
    fmt,
    sync::{
        Arc,
        Mutex,
        PoisonError,
        RwLock,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use dashmap::DashSet;
use tokio::{
    net::{TcpSocket, TcpStream, lookup_host},
    time::timeout,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::Instrument;

use crate::{
    channel::{Channel, ChannelRuntime, run_channel},
    config::TunnelConfig,
    credentials::Credentials,
    error::TunnelError,
    gateway::Gateway,
    metrics,
    schedule::{TimerHandle, schedule},
};

/// Identifier assigned to a channel by its pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ConnectionId {
    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "channel-{}", self.0) }
}

/// Shared handle to a channel pool. Clones refer to the same pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    relay_address: String,
    credentials: Credentials,
    desired: AtomicUsize,
    entry: RwLock<String>,
    live: DashSet<ConnectionId>,
    next_id: AtomicU64,
    config: TunnelConfig,
    gateway: Arc<dyn Gateway>,
    tick_timer: Mutex<Option<TimerHandle>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("relay_address", &self.inner.relay_address)
            .field("desired_size", &self.desired_size())
            .field("live", &self.live_count())
            .finish_non_exhaustive()
    }
}

impl Pool {
    /// Create an idle pool. Nothing connects until [`open_more`](Self::open_more)
    /// or [`tick`](Self::tick) is called.
    #[must_use]
    pub fn new(
        relay_address: impl Into<String>,
        credentials: Credentials,
        desired_size: usize,
        gateway: Arc<dyn Gateway>,
        config: TunnelConfig,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                relay_address: relay_address.into(),
                credentials,
                desired: AtomicUsize::new(desired_size),
                entry: RwLock::new(String::new()),
                live: DashSet::new(),
                next_id: AtomicU64::new(1),
                config: config.normalized(),
                gateway,
                tick_timer: Mutex::new(None),
                shutdown: CancellationToken::new(),
                tracker: TaskTracker::new(),
            }),
        }
    }

    /// Relay address as configured.
    #[must_use]
    pub fn relay_address(&self) -> &str { &self.inner.relay_address }

    /// Credentials presented on every new connection.
    #[must_use]
    pub fn credentials(&self) -> &Credentials { &self.inner.credentials }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &TunnelConfig { &self.inner.config }

    /// Number of channels the relay asked for in its latest allocation reply.
    #[must_use]
    pub fn desired_size(&self) -> usize { self.inner.desired.load(Ordering::SeqCst) }

    /// Public entry label from the latest allocation reply.
    #[must_use]
    pub fn entry(&self) -> String {
        self.inner
            .entry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of allocated channels.
    #[must_use]
    pub fn live_count(&self) -> usize { self.inner.live.len() }

    /// Returns `true` if `id` is in the live set.
    #[must_use]
    pub fn is_live(&self, id: ConnectionId) -> bool { self.inner.live.contains(&id) }

    pub(crate) fn gateway(&self) -> Arc<dyn Gateway> { Arc::clone(&self.inner.gateway) }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool { self.inner.shutdown.is_cancelled() }

    /// Allocate the next channel identifier.
    pub(crate) fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Record the desired size and entry announced by an allocation reply.
    pub(crate) fn apply_allocation(&self, desired_size: usize, entry: String) {
        self.inner.desired.store(desired_size, Ordering::SeqCst);
        *self
            .inner
            .entry
            .write()
            .unwrap_or_else(PoisonError::into_inner) = entry;
    }

    /// Add `id` to the live set.
    pub(crate) fn register(&self, id: ConnectionId) {
        if self.inner.live.insert(id) {
            metrics::inc_allocated();
        }
    }

    /// Remove `id` from the live set. Returns `true` if it was present;
    /// repeated calls are no-ops.
    pub fn on_channel_lost(&self, id: ConnectionId) -> bool {
        let removed = self.inner.live.remove(&id).is_some();
        if removed {
            metrics::dec_allocated();
        }
        removed
    }

    /// Start one new connection if the live set is below the desired size.
    ///
    /// Returns `true` if a connection attempt was started. At most one
    /// attempt is started per call, however large the deficit. Connections
    /// still handshaking are not counted, so back-to-back calls may overshoot
    /// until their allocation replies arrive.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open_more(&self) -> bool {
        if self.is_shut_down() || self.live_count() >= self.desired_size() {
            return false;
        }
        let id = self.next_connection_id();
        let span = tracing::info_span!("channel", connection.id = %id);
        self.inner.tracker.spawn(self.clone().connect_and_serve(id).instrument(span));
        true
    }

    /// One top-up step: call [`open_more`](Self::open_more) and schedule the
    /// next tick after the configured interval.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn tick(&self) {
        self.open_more();
        self.schedule_tick(self.inner.config.top_up_interval);
    }

    pub(crate) fn schedule_tick(&self, delay: std::time::Duration) {
        if self.is_shut_down() {
            return;
        }
        let pool = self.clone();
        let timer = schedule(delay, move || pool.tick());
        let mut slot = self.inner.tick_timer.lock().unwrap_or_else(PoisonError::into_inner);
        // Replacing the previous handle drops it, which cancels it if pending.
        *slot = Some(timer);
    }

    /// Stop ticking, abort every channel and wait for their tasks to finish.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        if let Some(timer) = self
            .inner
            .tick_timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            timer.cancel();
        }
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        log::info!("channel pool stopped: relay={}", self.inner.relay_address);
    }

    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    async fn connect_and_serve(self, id: ConnectionId) {
        let abort = self.inner.shutdown.child_token();
        metrics::inc_connect_attempts();
        let connected = tokio::select! {
            () = abort.cancelled() => return,
            result = connect(&self.inner.relay_address, &self.inner.config) => result,
        };
        let stream = match connected {
            Ok(stream) => stream,
            Err(error) => {
                tracing::info!(%error, "connect to relay failed");
                return;
            }
        };
        tracing::debug!(relay = %self.inner.relay_address, "connected to relay");

        let runtime = ChannelRuntime {
            gateway: self.gateway(),
            allocation_timeout: self.inner.config.allocation_timeout,
            idle_timeout: self.inner.config.idle_timeout,
            abort,
        };
        run_channel(stream, Channel::new(id, self), runtime).await;
    }
}

async fn connect(address: &str, config: &TunnelConfig) -> Result<TcpStream, TunnelError> {
    let attempt = async {
        let addr = lookup_host(address)
            .await?
            .next()
            .ok_or_else(|| TunnelError::Resolve {
                address: address.to_owned(),
            })?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        config.socket_options.apply(&socket)?;
        Ok::<_, TunnelError>(socket.connect(addr).await?)
    };
    timeout(config.connect_timeout, attempt)
        .await
        .map_err(|_| TunnelError::ConnectTimeout {
            address: address.to_owned(),
            timeout: config.connect_timeout,
        })?
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use rstest::{fixture, rstest};

    use super::*;
    use crate::{
        Response,
        gateway::{FnGateway, GatewayError},
    };

    #[fixture]
    fn pool() -> Pool {
        let credentials = Credentials {
            public_id: Bytes::from_static(b"p"),
            str1: Bytes::new(),
            str2: Bytes::new(),
            signature: Bytes::new(),
        };
        let gateway = FnGateway::new(|_| async { Ok::<_, GatewayError>(Response::new(204)) });
        Pool::new("127.0.0.1:9", credentials, 2, Arc::new(gateway), TunnelConfig::default())
    }

    #[rstest]
    fn connection_ids_are_unique(pool: Pool) {
        let first = pool.next_connection_id();
        let second = pool.next_connection_id();
        assert_ne!(first, second);
        assert_eq!(first.to_string(), "channel-1");
    }

    #[rstest]
    fn channel_lost_is_idempotent(pool: Pool) {
        let id = pool.next_connection_id();
        pool.register(id);
        assert!(pool.is_live(id));

        assert!(pool.on_channel_lost(id));
        assert!(!pool.on_channel_lost(id));
        assert_eq!(pool.live_count(), 0);
    }

    #[rstest]
    fn allocation_overwrites_desired_size_and_entry(pool: Pool) {
        pool.apply_allocation(7, "https://demo.example".into());
        assert_eq!(pool.desired_size(), 7);
        assert_eq!(pool.entry(), "https://demo.example");

        pool.apply_allocation(0, String::new());
        assert_eq!(pool.desired_size(), 0);
        assert_eq!(pool.entry(), "");
    }

    #[rstest]
    #[tokio::test]
    async fn open_more_does_nothing_when_full(pool: Pool) {
        pool.register(pool.next_connection_id());
        pool.register(pool.next_connection_id());
        assert!(!pool.open_more());
    }

    #[rstest]
    #[tokio::test]
    async fn open_more_refuses_after_shutdown(pool: Pool) {
        pool.shutdown().await;
        assert!(pool.is_shut_down());
        assert!(!pool.open_more());
    }

    #[tokio::test]
    async fn refused_connect_is_reported() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("addr").to_string();
        drop(listener);

        let error = connect(&address, &TunnelConfig::default())
            .await
            .expect_err("nothing listens on the port");
        assert!(matches!(error, TunnelError::Io(_)));
        assert!(error.is_fatal_to_channel());
    }
}
