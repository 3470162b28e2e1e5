//! Test doubles for exercising `relaywire` over real sockets.
//!
//! [`FakeRelay`] listens on loopback and plays the relay's side of the
//! protocol: it reads allocation requests, grants or refuses them, pushes
//! sequence-tagged requests and reads back the responses.
//!
//! ```rust,no_run
//! use relaywire_testing::FakeRelay;
//!
//! # async fn example() -> std::io::Result<()> {
//! let relay = FakeRelay::bind().await?;
//! let mut conn = relay.accept().await?;
//! conn.read_allocation().await?;
//! conn.grant(2, "demo.example").await?;
//! let response = conn.request(1, "GET", "/demo/is_alive", "").await?;
//! assert_eq!(&response.body()[..], b"OK");
//! # Ok(())
//! # }
//! ```

pub mod logging;
pub mod relay;

pub use logging::{LoggerHandle, logger};
pub use relay::{FakeRelay, RelayConnection, request_bytes};
