//! Incremental framing of the pseudo-HTTP byte stream.
//!
//! The relay multiplexes HTTP traffic onto long-lived sockets, so frames
//! arrive split across reads or concatenated in one read. [`Framer`] keeps the
//! unconsumed tail between calls and dispatches every complete frame it can
//! cut from the backlog. [`HttpFrameCodec`] exposes the same parser as a
//! `tokio_util` decoder for use with `FramedRead`.
//!
//! # Malformed input
//!
//! Any [`FramingError`] discards the *entire* backlog, including complete
//! frames that happened to follow the malformed one in the same read. The
//! connection stays open and the next read starts clean.

use std::{fmt, io, ops::Range};

use bytes::{Bytes, BytesMut};
use tokio_util::codec::Decoder;

use crate::frame::{CONTENT_LENGTH, Frame, HEADER_TERMINATOR};

pub mod error;

pub use error::FramingError;

/// Maximum bytes buffered while waiting for a header terminator.
pub const MAX_HEADER_LENGTH: usize = 4096;

/// Maximum declared body length (16 MiB).
pub const MAX_BODY_LENGTH: usize = 16 * 1024 * 1024;

/// Outcome of one attempt to cut a frame from the front of a buffer.
#[derive(Debug)]
enum Step {
    Frame(Frame),
    Incomplete,
    Malformed(FramingError),
}

struct HeadLayout {
    start_line: Range<usize>,
    headers: Vec<(Bytes, Range<usize>)>,
    body_len: usize,
}

/// Stream framer retaining incomplete input across calls.
///
/// # Examples
///
/// ```
/// use relaywire::codec::Framer;
///
/// let mut framer = Framer::new();
/// assert!(framer.feed_collect(b"GET /x HTTP/1.1\r\nContent-").is_empty());
/// let frames = framer.feed_collect(b"Length: 0\r\n\r\n");
/// assert_eq!(&frames[0].start_line()[..], b"GET /x HTTP/1.1");
/// assert!(frames[0].body().is_empty());
/// ```
#[derive(Debug, Default)]
pub struct Framer {
    backlog: BytesMut,
}

impl Framer {
    /// Create a framer with an empty backlog.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Number of buffered bytes not yet consumed by a complete frame.
    #[must_use]
    pub fn backlog_len(&self) -> usize { self.backlog.len() }

    /// Discard everything buffered.
    pub fn clear(&mut self) { self.backlog.clear(); }

    /// Append `data` and dispatch every complete frame to `handler`.
    ///
    /// An error returned by `handler` is logged and parsing continues with the
    /// remaining backlog. Never blocks; incomplete input is retained.
    pub fn feed<F, E>(&mut self, data: &[u8], mut handler: F)
    where
        F: FnMut(Frame) -> Result<(), E>,
        E: fmt::Display,
    {
        self.backlog.extend_from_slice(data);
        loop {
            match decode_step(&mut self.backlog) {
                Step::Frame(frame) => {
                    if let Err(error) = handler(frame) {
                        tracing::debug!(%error, "frame handler failed");
                    }
                }
                Step::Incomplete => return,
                Step::Malformed(error) => {
                    discard_backlog(&mut self.backlog, &error);
                    return;
                }
            }
        }
    }

    /// Append `data` and return the complete frames in arrival order.
    pub fn feed_collect(&mut self, data: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        self.feed(data, |frame| {
            frames.push(frame);
            Ok::<_, std::convert::Infallible>(())
        });
        frames
    }
}

/// `tokio_util` decoder over the relay framing.
///
/// Malformed input clears the read buffer and yields `Ok(None)`, so a
/// `FramedRead` keeps reading instead of terminating the stream.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpFrameCodec;

impl HttpFrameCodec {
    /// Construct a new codec.
    #[must_use]
    pub fn new() -> Self { Self }
}

impl Decoder for HttpFrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match decode_step(src) {
            Step::Frame(frame) => Ok(Some(frame)),
            Step::Incomplete => Ok(None),
            Step::Malformed(error) => {
                discard_backlog(src, &error);
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            tracing::debug!(bytes_received = src.len(), "stream closed mid-frame");
            src.clear();
        }
        Ok(None)
    }
}

fn discard_backlog(backlog: &mut BytesMut, error: &FramingError) {
    tracing::debug!(
        %error,
        error_type = error.error_type(),
        dropped = backlog.len(),
        "drop package"
    );
    crate::metrics::inc_dropped(error.error_type());
    backlog.clear();
}

fn decode_step(src: &mut BytesMut) -> Step {
    if src.is_empty() {
        return Step::Incomplete;
    }

    let Some(head_end) = find_terminator(src) else {
        if src.len() > MAX_HEADER_LENGTH {
            return Step::Malformed(FramingError::HeaderTooLarge {
                size: src.len(),
                max: MAX_HEADER_LENGTH,
            });
        }
        return Step::Incomplete;
    };

    let layout = match parse_head(&src[..head_end]) {
        Ok(layout) => layout,
        Err(error) => return Step::Malformed(error),
    };

    let header_len = head_end + HEADER_TERMINATOR.len();
    let total = header_len + layout.body_len;
    if src.len() < total {
        return Step::Incomplete;
    }

    let raw = src.split_to(total).freeze();
    let headers = layout
        .headers
        .into_iter()
        .map(|(key, value)| (key, raw.slice(value)))
        .collect();
    Step::Frame(Frame::new(
        raw.slice(layout.start_line),
        headers,
        header_len,
        raw,
    ))
}

fn find_terminator(src: &[u8]) -> Option<usize> {
    src.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
}

fn parse_head(head: &[u8]) -> Result<HeadLayout, FramingError> {
    let mut lines = line_ranges(head).into_iter();
    let start_line = lines.next().unwrap_or(0..0);
    let mut headers = Vec::new();
    let mut body_len = 0;

    for line in lines {
        let Some(colon) = head[line.clone()].iter().position(|b| *b == b':') else {
            continue;
        };
        let key = trim(head, line.start..line.start + colon);
        let value = trim(head, line.start + colon + 1..line.end);
        let key = Bytes::from(head[key].to_ascii_uppercase());
        if key.as_ref() == CONTENT_LENGTH {
            body_len = parse_content_length(&head[value.clone()])?;
        }
        headers.push((key, value));
    }

    Ok(HeadLayout {
        start_line,
        headers,
        body_len,
    })
}

fn parse_content_length(value: &[u8]) -> Result<usize, FramingError> {
    let invalid = || FramingError::InvalidContentLength {
        value: String::from_utf8_lossy(value).into_owned(),
    };
    let declared = std::str::from_utf8(value)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or_else(invalid)?;
    let declared = u64::try_from(declared).map_err(|_| invalid())?;
    match usize::try_from(declared) {
        Ok(len) if len <= MAX_BODY_LENGTH => Ok(len),
        _ => Err(FramingError::BodyTooLarge {
            size: declared,
            max: MAX_BODY_LENGTH,
        }),
    }
}

/// Split on `\r\n`, `\n` or a lone `\r`, returning byte ranges without the
/// line endings.
fn line_ranges(head: &[u8]) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < head.len() {
        match head[i] {
            b'\r' => {
                ranges.push(start..i);
                i += if head.get(i + 1) == Some(&b'\n') { 2 } else { 1 };
                start = i;
            }
            b'\n' => {
                ranges.push(start..i);
                i += 1;
                start = i;
            }
            _ => i += 1,
        }
    }
    if start < head.len() {
        ranges.push(start..head.len());
    }
    ranges
}

fn trim(buf: &[u8], mut range: Range<usize>) -> Range<usize> {
    while range.start < range.end && buf[range.start].is_ascii_whitespace() {
        range.start += 1;
    }
    while range.end > range.start && buf[range.end - 1].is_ascii_whitespace() {
        range.end -= 1;
    }
    range
}
