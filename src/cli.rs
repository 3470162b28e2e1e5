//! Command line interface for the `relaywire` binary.
//!
//! Kept free of library imports so `build.rs` can include it to render the
//! man page.

use std::net::SocketAddr;

use clap::Parser;

/// Command line arguments for the `relaywire` binary.
#[derive(Debug, Parser)]
#[command(
    name = "relaywire",
    version,
    about = "Expose a local service through a relay server"
)]
pub struct Cli {
    /// Relay address as `host:port`.
    #[arg(long, env = "RELAY_SERVER")]
    pub relay: String,

    /// Application name announced to the relay.
    #[arg(long)]
    pub app_name: String,

    /// Channels to request with a debug identity.
    #[arg(long, default_value_t = 1, conflicts_with = "nonce")]
    pub connections: usize,

    /// Hex-encoded nonce for a signed single-connection identity.
    #[arg(long)]
    pub nonce: Option<String>,

    /// Serve Prometheus metrics on this address.
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}
