#![doc(html_root_url = "https://docs.rs/relaywire/latest")]
//! Public API for the `relaywire` library.
//!
//! `relaywire` exposes a local application to the public internet through a
//! relay server. The client keeps a pool of outbound TCP connections to the
//! relay; the relay pushes HTTP-style requests down those connections and the
//! client answers them on the same socket.
//!
//! The building blocks, bottom-up:
//!
//! - [`codec`] cuts frames out of the byte stream.
//! - [`channel`] runs the allocation handshake and sequence echo for one
//!   connection.
//! - [`pool`] keeps the number of allocated channels at the size the relay
//!   asks for.
//! - [`bootstrap`] resolves credentials and starts a pool.

pub mod bootstrap;
pub mod channel;
pub mod codec;
pub mod config;
pub mod credentials;
pub mod error;
pub mod frame;
pub mod gateway;
pub mod metrics;
pub mod pool;
pub mod response;
pub mod schedule;
pub mod socket;

pub use bootstrap::{PoolHandle, start_pool, start_pool_with_config};
pub use channel::{Channel, ChannelClose, ChannelHooks, ChannelState, Disposition};
pub use codec::{Framer, HttpFrameCodec};
pub use config::TunnelConfig;
pub use credentials::{CredentialSource, Credentials, LicenseGrant};
pub use error::{Result, TunnelError};
pub use frame::Frame;
pub use gateway::{FnGateway, Gateway};
pub use metrics::{CHANNELS_ALLOCATED, CONNECT_ATTEMPTS, Direction, FRAMES_DROPPED, FRAMES_TOTAL};
pub use pool::{ConnectionId, Pool};
pub use response::Response;
pub use socket::SocketOptions;
