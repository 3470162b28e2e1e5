//! Error types for the framing layer.
//!
//! Every variant here describes a malformed frame. Malformed frames are never
//! fatal to the connection: the framer discards its whole backlog and the next
//! read starts from a clean slate.

use thiserror::Error;

/// Malformed input detected while locating frame boundaries.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// No header terminator was found within the header size limit.
    #[error("header block exceeds max length: {size} > {max}")]
    HeaderTooLarge {
        /// Bytes buffered without a header terminator.
        size: usize,
        /// Maximum header block size.
        max: usize,
    },

    /// The `Content-Length` value is not a non-negative integer.
    #[error("invalid content length: {value:?}")]
    InvalidContentLength {
        /// Raw header value as received (lossily decoded).
        value: String,
    },

    /// The declared body exceeds the maximum body size.
    #[error("body exceeds max length: {size} > {max}")]
    BodyTooLarge {
        /// Declared body length.
        size: u64,
        /// Maximum body size.
        max: usize,
    },
}

impl FramingError {
    /// Stable label for logs and metrics.
    ///
    /// # Examples
    ///
    /// ```
    /// use relaywire::codec::FramingError;
    ///
    /// let err = FramingError::HeaderTooLarge { size: 5000, max: 4096 };
    /// assert_eq!(err.error_type(), "header_too_large");
    /// ```
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::HeaderTooLarge { .. } => "header_too_large",
            Self::InvalidContentLength { .. } => "invalid_content_length",
            Self::BodyTooLarge { .. } => "body_too_large",
        }
    }
}
