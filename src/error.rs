//! Error taxonomy for the tunnel.
//!
//! None of these errors is fatal to the process. Malformed frames reset the
//! framer, handler faults are logged and swallowed, allocation refusals and
//! lost channels drop one connection which the pool restores on its next
//! top-up.

use std::{io, time::Duration};

use thiserror::Error;

pub use crate::codec::FramingError;

/// Reasons the relay's first reply did not allocate the channel.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AllocationRejected {
    /// The start-line did not split into exactly three tokens.
    #[error("malformed allocation reply: {tokens} start-line tokens")]
    MalformedStartLine {
        /// Number of tokens found.
        tokens: usize,
    },

    /// The relay answered with a target other than the success path.
    #[error("allocation denied by relay: {reason}")]
    Denied {
        /// Reply target without its leading `/`.
        reason: String,
    },

    /// The connection-count header was not an integer.
    #[error("invalid connection count in allocation reply: {value:?}")]
    InvalidConnectionCount {
        /// Raw header value.
        value: String,
    },
}

/// Faults raised while processing a well-formed frame.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum HandlerFault {
    /// The sequence header was present but not an integer.
    #[error("invalid sequence number: {value:?}")]
    InvalidSequence {
        /// Raw header value.
        value: String,
    },

    /// The gateway returned an error.
    #[error("gateway failed: {0}")]
    Gateway(String),

    /// The gateway panicked.
    #[error("gateway panicked: {0}")]
    Panicked(String),
}

/// Invalid input to a credential source.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    /// Application names must be non-empty.
    #[error("application name must not be empty")]
    EmptyAppName,

    /// Connection nonces must carry enough entropy.
    #[error("nonce too short: {len} bytes, need at least {min}")]
    NonceTooShort {
        /// Supplied nonce length.
        len: usize,
        /// Minimum accepted length.
        min: usize,
    },
}

/// Top-level error type exposed by `relaywire`.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Malformed inbound frame.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[from] FramingError),

    /// The relay refused to allocate the channel.
    #[error(transparent)]
    AllocationRejected(#[from] AllocationRejected),

    /// Processing a well-formed frame failed.
    #[error("handler fault: {0}")]
    HandlerFault(#[from] HandlerFault),

    /// The transport failed or the peer closed the connection.
    #[error("channel lost: {0}")]
    ChannelLost(#[source] io::Error),

    /// Transport error outside an established channel.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// The relay address did not resolve to any socket address.
    #[error("relay address {address:?} did not resolve")]
    Resolve {
        /// Address as configured.
        address: String,
    },

    /// Connecting to the relay did not complete in time.
    #[error("connect to {address} timed out after {timeout:?}")]
    ConnectTimeout {
        /// Address as configured.
        address: String,
        /// Configured connect timeout.
        timeout: Duration,
    },

    /// A credential source was misconfigured.
    #[error("invalid credentials: {0}")]
    Credentials(#[from] CredentialError),
}

impl TunnelError {
    /// Returns `true` when the affected connection must be dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use relaywire::error::{AllocationRejected, FramingError, TunnelError};
    ///
    /// let err = TunnelError::from(FramingError::HeaderTooLarge { size: 5000, max: 4096 });
    /// assert!(!err.is_fatal_to_channel());
    ///
    /// let err = TunnelError::from(AllocationRejected::MalformedStartLine { tokens: 2 });
    /// assert!(err.is_fatal_to_channel());
    /// ```
    #[must_use]
    pub fn is_fatal_to_channel(&self) -> bool {
        match self {
            Self::MalformedFrame(_) | Self::HandlerFault(_) | Self::Credentials(_) => false,
            Self::AllocationRejected(_)
            | Self::ChannelLost(_)
            | Self::Io(_)
            | Self::Resolve { .. }
            | Self::ConnectTimeout { .. } => true,
        }
    }
}

/// Canonical result alias used by `relaywire` public APIs.
pub type Result<T> = std::result::Result<T, TunnelError>;
