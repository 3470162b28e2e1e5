//! Parsed pseudo-HTTP frames and the wire constants shared by both directions.
//!
//! A [`Frame`] is one complete unit cut from the inbound byte stream: the
//! start-line, the header list and the raw bytes including the body. Frames
//! are ephemeral; they are handed to the channel state machine and then to the
//! gateway, and never persisted.

use bytes::Bytes;

/// Header terminator separating the header block from the body.
pub const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Header key carrying the body length (stored uppercased).
pub const CONTENT_LENGTH: &[u8] = b"CONTENT-LENGTH";

/// Header key carrying the per-channel sequence number (stored uppercased).
pub const SEQUENCE_HEADER: &[u8] = b"X-NBC-SN";

/// Spelling used when the sequence header is written on outbound frames.
pub const SEQUENCE_HEADER_OUTBOUND: &[u8] = b"X-Nbc-Sn";

/// Header in the allocation reply announcing the allowed connection count.
pub const CONNECTION_NUM_HEADER: &[u8] = b"X-CONNECTION-NUM";

/// Header in the allocation reply carrying the public entry label.
pub const ENTRY_HEADER: &[u8] = b"X-ENTRY";

/// Request target of the allocation request sent after connecting.
pub const ALLOCATE_PATH: &[u8] = b"/allocate";

/// Request target of a successful allocation reply.
pub const ALLOCATION_SUCCESS_PATH: &[u8] = b"/SUCC";

/// A single header as `(KEY, value)`. Keys are uppercased ASCII, values are
/// trimmed of surrounding whitespace.
pub type Header = (Bytes, Bytes);

/// One complete frame extracted from the byte stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    start_line: Bytes,
    headers: Vec<Header>,
    header_len: usize,
    raw: Bytes,
}

impl Frame {
    pub(crate) fn new(start_line: Bytes, headers: Vec<Header>, header_len: usize, raw: Bytes) -> Self {
        debug_assert!(header_len <= raw.len());
        Self {
            start_line,
            headers,
            header_len,
            raw,
        }
    }

    /// The raw start-line without its line ending.
    #[must_use]
    pub fn start_line(&self) -> &Bytes { &self.start_line }

    /// All headers in wire order, duplicates included.
    #[must_use]
    pub fn headers(&self) -> &[Header] { &self.headers }

    /// Length of the header block including the terminator.
    #[must_use]
    pub fn header_len(&self) -> usize { self.header_len }

    /// The full frame as received, header block and body.
    #[must_use]
    pub fn raw(&self) -> &Bytes { &self.raw }

    /// Consume the frame and return its raw bytes.
    #[must_use]
    pub fn into_raw(self) -> Bytes { self.raw }

    /// The body following the header block.
    #[must_use]
    pub fn body(&self) -> Bytes { self.raw.slice(self.header_len..) }

    /// Value of the first header whose key matches `key`, compared without
    /// regard to ASCII case.
    ///
    /// # Examples
    ///
    /// ```
    /// use relaywire::codec::Framer;
    ///
    /// let mut framer = Framer::new();
    /// let frames = framer.feed_collect(b"GET / HTTP/1.1\r\nX-Entry:  foo \r\n\r\n");
    /// assert_eq!(frames[0].header(b"x-entry").map(|v| &v[..]), Some(&b"foo"[..]));
    /// ```
    #[must_use]
    pub fn header<'a>(&'a self, key: &'a [u8]) -> Option<&'a Bytes> { self.headers_named(key).next() }

    /// Every value whose key matches `key`, in wire order.
    pub fn headers_named<'a>(&'a self, key: &'a [u8]) -> impl Iterator<Item = &'a Bytes> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    /// Start-line split on single spaces.
    ///
    /// Consecutive spaces yield empty tokens, so a start-line is only
    /// well-shaped when it has exactly three tokens.
    #[must_use]
    pub fn start_line_tokens(&self) -> Vec<&[u8]> { self.start_line.split(|b| *b == b' ').collect() }

    /// Request target (second token) of a well-shaped start-line.
    #[must_use]
    pub fn target(&self) -> Option<&[u8]> {
        let tokens = self.start_line_tokens();
        (tokens.len() == 3).then(|| tokens[1])
    }

    /// Method (first token) of a well-shaped start-line.
    #[must_use]
    pub fn method(&self) -> Option<&[u8]> {
        let tokens = self.start_line_tokens();
        (tokens.len() == 3).then(|| tokens[0])
    }

    /// Third token of a well-shaped start-line: the protocol version of a
    /// request, the reason phrase of a response.
    #[must_use]
    pub fn version(&self) -> Option<&[u8]> {
        let tokens = self.start_line_tokens();
        (tokens.len() == 3).then(|| tokens[2])
    }
}
