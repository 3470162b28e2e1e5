//! Starting a pool from a credential source.

use std::sync::Arc;

use crate::{
    config::TunnelConfig,
    credentials::CredentialSource,
    error::Result,
    gateway::Gateway,
    pool::Pool,
};

/// Handle to a running pool returned by [`start_pool`].
#[derive(Clone, Debug)]
pub struct PoolHandle {
    pool: Pool,
}

impl PoolHandle {
    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &Pool { &self.pool }

    /// Desired size from the latest allocation reply.
    #[must_use]
    pub fn desired_size(&self) -> usize { self.pool.desired_size() }

    /// Public entry label from the latest allocation reply.
    #[must_use]
    pub fn entry(&self) -> String { self.pool.entry() }

    /// Number of allocated channels.
    #[must_use]
    pub fn live_count(&self) -> usize { self.pool.live_count() }

    /// Stop topping up and close every channel.
    pub async fn shutdown(&self) { self.pool.shutdown().await; }
}

/// Start a pool with default timers.
///
/// See [`start_pool_with_config`].
///
/// # Errors
///
/// Returns an error if `source` cannot be resolved into credentials.
pub fn start_pool<G>(relay_address: impl Into<String>, source: &CredentialSource, gateway: G) -> Result<PoolHandle>
where
    G: Gateway,
{
    start_pool_with_config(relay_address, source, gateway, TunnelConfig::default())
}

/// Resolve `source`, open the first channel immediately and schedule the
/// top-up ticks.
///
/// The first tick runs after `config.first_top_up_delay`, later ticks every
/// `config.top_up_interval`. Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns an error if `source` cannot be resolved into credentials.
///
/// # Examples
///
/// ```no_run
/// use relaywire::{
///     CredentialSource,
///     Response,
///     gateway::{FnGateway, GatewayError},
///     start_pool,
/// };
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), relaywire::TunnelError> {
/// let source = CredentialSource::Debug {
///     app_name: "demo".into(),
///     connection_count: 2,
/// };
/// let gateway = FnGateway::new(|_request| async { Ok::<_, GatewayError>(Response::new(200)) });
/// let handle = start_pool("relay.example:8080", &source, gateway)?;
/// tokio::signal::ctrl_c().await?;
/// handle.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub fn start_pool_with_config<G>(
    relay_address: impl Into<String>,
    source: &CredentialSource,
    gateway: G,
    config: TunnelConfig,
) -> Result<PoolHandle>
where
    G: Gateway,
{
    let (credentials, desired_size) = source.resolve()?;
    let pool = Pool::new(relay_address, credentials, desired_size, Arc::new(gateway), config);
    log::info!(
        "starting channel pool: relay={}, desired_size={desired_size}",
        pool.relay_address()
    );
    pool.open_more();
    pool.schedule_tick(pool.config().first_top_up_delay);
    Ok(PoolHandle { pool })
}
