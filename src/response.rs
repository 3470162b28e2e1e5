//! Responses produced by the gateway and written back onto the channel.
//!
//! The channel inserts its sequence header before encoding (see
//! [`crate::channel::ChannelHooks::on_write_headers`]). `Content-Length` is
//! always derived from the body so the relay can frame the reply.

use bytes::{BufMut, Bytes, BytesMut};

use crate::frame::{CONTENT_LENGTH, Header};

/// An HTTP/1.1 response ready to be framed onto a relay socket.
///
/// # Examples
///
/// ```
/// use relaywire::Response;
///
/// let response = Response::new(200).with_header("Content-Type", "text/plain").with_body("OK");
/// assert_eq!(
///     &response.to_bytes()[..],
///     b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\n\r\nOK"
/// );
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    status: u16,
    reason: Bytes,
    headers: Vec<Header>,
    body: Bytes,
}

impl Response {
    /// Create an empty response with the IANA-registered reason phrase for
    /// `status`. Unregistered codes get an empty phrase; set one with
    /// [`with_reason`](Self::with_reason).
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: Bytes::from_static(canonical_reason(status).as_bytes()),
            headers: Vec::new(),
            body: Bytes::new(),
        }
    }

    /// Override the reason phrase.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<Bytes>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Append a header. Keys keep the spelling given here.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Replace the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Status code.
    #[must_use]
    pub fn status(&self) -> u16 { self.status }

    /// Headers in write order.
    #[must_use]
    pub fn headers(&self) -> &[Header] { &self.headers }

    /// Mutable access to the headers, used by the channel to inject its own.
    pub fn headers_mut(&mut self) -> &mut Vec<Header> { &mut self.headers }

    /// Response body.
    #[must_use]
    pub fn body(&self) -> &Bytes { &self.body }

    /// Serialise into `dst`. Any caller-supplied `Content-Length` is replaced
    /// by the actual body length.
    pub fn encode(&self, dst: &mut BytesMut) {
        let length = self.body.len().to_string();
        dst.reserve(64 + self.body.len());
        dst.put_slice(b"HTTP/1.1 ");
        dst.put_slice(self.status.to_string().as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(&self.reason);
        dst.put_slice(b"\r\n");
        for (key, value) in self
            .headers
            .iter()
            .filter(|(key, _)| !key.eq_ignore_ascii_case(CONTENT_LENGTH))
        {
            put_header(dst, key, value);
        }
        put_header(dst, b"Content-Length", length.as_bytes());
        dst.put_slice(b"\r\n");
        dst.put_slice(&self.body);
    }

    /// Serialise into a fresh buffer.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        let mut dst = BytesMut::new();
        self.encode(&mut dst);
        dst.freeze()
    }
}

fn put_header(dst: &mut BytesMut, key: &[u8], value: &[u8]) {
    dst.put_slice(key);
    dst.put_slice(b": ");
    dst.put_slice(value);
    dst.put_slice(b"\r\n");
}

fn canonical_reason(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        102 => "Processing",
        103 => "Early Hints",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        203 => "Non-Authoritative Information",
        204 => "No Content",
        205 => "Reset Content",
        206 => "Partial Content",
        207 => "Multi-Status",
        208 => "Already Reported",
        226 => "IM Used",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        305 => "Use Proxy",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        409 => "Conflict",
        410 => "Gone",
        411 => "Length Required",
        412 => "Precondition Failed",
        413 => "Content Too Large",
        414 => "URI Too Long",
        415 => "Unsupported Media Type",
        416 => "Range Not Satisfiable",
        417 => "Expectation Failed",
        421 => "Misdirected Request",
        422 => "Unprocessable Content",
        423 => "Locked",
        424 => "Failed Dependency",
        425 => "Too Early",
        426 => "Upgrade Required",
        428 => "Precondition Required",
        429 => "Too Many Requests",
        431 => "Request Header Fields Too Large",
        451 => "Unavailable For Legal Reasons",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        505 => "HTTP Version Not Supported",
        506 => "Variant Also Negotiates",
        507 => "Insufficient Storage",
        508 => "Loop Detected",
        510 => "Not Extended",
        511 => "Network Authentication Required",
        _ => "",
    }
}
