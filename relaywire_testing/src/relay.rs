//! Scripted relay server.

use std::{io, net::SocketAddr, time::Duration};

use futures::StreamExt;
use relaywire::{Frame, HttpFrameCodec, frame::ALLOCATE_PATH};
use tokio::{
    io::AsyncWriteExt,
    net::{
        TcpListener,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    time::timeout,
};
use tokio_util::codec::FramedRead;

/// Loopback listener standing in for a relay server.
pub struct FakeRelay {
    listener: TcpListener,
    addr: SocketAddr,
}

impl FakeRelay {
    /// Bind to an ephemeral loopback port.
    ///
    /// # Errors
    ///
    /// Returns any error from binding the listener.
    pub async fn bind() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        Ok(Self { listener, addr })
    }

    /// Address to hand to the pool, as `host:port`.
    #[must_use]
    pub fn address(&self) -> String { self.addr.to_string() }

    /// Accept the next channel connection.
    ///
    /// # Errors
    ///
    /// Returns any error from accepting.
    pub async fn accept(&self) -> io::Result<RelayConnection> {
        let (stream, _) = self.listener.accept().await?;
        let (read, writer) = stream.into_split();
        Ok(RelayConnection {
            frames: FramedRead::new(read, HttpFrameCodec::new()),
            writer,
        })
    }

    /// Accept the next connection unless none arrives within `limit`.
    ///
    /// # Errors
    ///
    /// Returns any error from accepting.
    pub async fn accept_within(&self, limit: Duration) -> io::Result<Option<RelayConnection>> {
        match timeout(limit, self.accept()).await {
            Ok(conn) => conn.map(Some),
            Err(_) => Ok(None),
        }
    }
}

/// The relay's end of one channel.
pub struct RelayConnection {
    frames: FramedRead<OwnedReadHalf, HttpFrameCodec>,
    writer: OwnedWriteHalf,
}

impl RelayConnection {
    /// Read the next frame written by the client. `None` once the client
    /// closed the socket.
    ///
    /// # Errors
    ///
    /// Returns any read error.
    pub async fn next_frame(&mut self) -> io::Result<Option<Frame>> { self.frames.next().await.transpose() }

    /// Read the allocation request that opens every channel.
    ///
    /// # Errors
    ///
    /// Fails if the socket closes first or the frame is not an allocation
    /// request.
    pub async fn read_allocation(&mut self) -> io::Result<Frame> {
        let frame = self.next_frame().await?.ok_or_else(closed)?;
        if frame.target() != Some(ALLOCATE_PATH) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected allocation request, got {:?}", frame.start_line()),
            ));
        }
        Ok(frame)
    }

    /// Allocate the channel, announcing `connections` and `entry`.
    ///
    /// # Errors
    ///
    /// Returns any write error.
    pub async fn grant(&mut self, connections: usize, entry: &str) -> io::Result<()> {
        let reply = format!("GET /SUCC HTTP/1.1\r\nX-CONNECTION-NUM: {connections}\r\nX-ENTRY: {entry}\r\n\r\n");
        self.send(reply.as_bytes()).await
    }

    /// Refuse the channel with `reason` as the reply target.
    ///
    /// # Errors
    ///
    /// Returns any write error.
    pub async fn reject(&mut self, reason: &str) -> io::Result<()> {
        self.send(format!("GET /{reason} HTTP/1.1\r\n\r\n").as_bytes()).await
    }

    /// Write raw bytes to the client.
    ///
    /// # Errors
    ///
    /// Returns any write error.
    pub async fn send(&mut self, bytes: &[u8]) -> io::Result<()> { self.writer.write_all(bytes).await }

    /// Push a request tagged with `sequence` and read the response.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors or if the client closes before answering.
    pub async fn request(&mut self, sequence: u64, method: &str, path: &str, body: &str) -> io::Result<Frame> {
        self.send(&request_bytes(Some(sequence), method, path, body)).await?;
        self.next_frame().await?.ok_or_else(closed)
    }

    /// Wait until the client closes the socket, discarding anything it
    /// writes. Returns `false` if it is still open after `limit`.
    pub async fn closed_within(&mut self, limit: Duration) -> bool {
        timeout(limit, async {
            while let Ok(Some(_)) = self.next_frame().await {}
        })
        .await
        .is_ok()
    }
}

/// Encode a relayed request, optionally tagged with a sequence number.
#[must_use]
pub fn request_bytes(sequence: Option<u64>, method: &str, path: &str, body: &str) -> Vec<u8> {
    let mut out = format!("{method} {path} HTTP/1.1\r\n");
    if let Some(sequence) = sequence {
        out.push_str(&format!("X-NBC-SN: {sequence}\r\n"));
    }
    out.push_str(&format!("Content-Length: {}\r\n\r\n{body}", body.len()));
    out.into_bytes()
}

fn closed() -> io::Error { io::Error::new(io::ErrorKind::UnexpectedEof, "client closed the channel") }
