//! Per-connection state machine.
//!
//! A channel is one long-lived TCP connection to the relay. Its first inbound
//! frame is the relay's answer to the allocation request; every later frame
//! is a relayed request tagged with a sequence number, which the channel
//! echoes on the response it writes next.
//!
//! [`Channel`] holds no socket. It reacts to the callbacks of
//! [`ChannelHooks`] and reports what the transport should do through
//! [`Disposition`]s; [`run_channel`] owns the socket and the timers.

use bytes::Bytes;

use crate::{
    codec::Framer,
    error::{AllocationRejected, HandlerFault},
    frame::{
        ALLOCATION_SUCCESS_PATH,
        CONNECTION_NUM_HEADER,
        ENTRY_HEADER,
        Frame,
        Header,
        SEQUENCE_HEADER,
        SEQUENCE_HEADER_OUTBOUND,
    },
    metrics::{self, Direction},
    pool::{ConnectionId, Pool},
};

mod driver;

pub use driver::{ChannelClose, ChannelRuntime, run_channel};

/// Lifecycle of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelState {
    /// Connected, allocation request sent, reply not yet received.
    Unallocated,
    /// The relay accepted the channel; frames are forwarded to the gateway.
    Allocated,
    /// Rejected, timed out or lost. Terminal.
    Closed,
}

/// What the transport must do after a read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Hand a sequence-tagged request to the gateway.
    Forward(Frame),
    /// Drop the connection immediately.
    Abort(AllocationRejected),
}

/// Callbacks through which a transport drives a channel.
pub trait ChannelHooks: Send {
    /// Called once the connection is established. Returns the bytes to write
    /// before anything else.
    fn on_connect(&mut self) -> Bytes;

    /// Called with every chunk read from the socket.
    fn on_data(&mut self, data: &[u8]) -> Vec<Disposition>;

    /// Called with the headers of every outbound response before encoding.
    fn on_write_headers(&self, headers: &mut Vec<Header>);

    /// Called exactly once when the connection ends for any reason.
    fn on_channel_lost(&mut self);

    /// Current lifecycle state.
    fn state(&self) -> ChannelState;
}

/// Allocation handshake and sequence tracking for one relay connection.
#[derive(Debug)]
pub struct Channel {
    id: ConnectionId,
    state: ChannelState,
    sequence: u64,
    framer: Framer,
    pool: Pool,
}

impl Channel {
    /// Create an unallocated channel owned by `pool`.
    #[must_use]
    pub fn new(id: ConnectionId, pool: Pool) -> Self {
        Self {
            id,
            state: ChannelState::Unallocated,
            sequence: 0,
            framer: Framer::new(),
            pool,
        }
    }

    /// Identifier of this channel within its pool.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.id }

    /// Sequence number of the most recent inbound request.
    #[must_use]
    pub fn sequence(&self) -> u64 { self.sequence }

    /// Bytes buffered towards an incomplete frame.
    #[must_use]
    pub fn backlog_len(&self) -> usize { self.framer.backlog_len() }

    fn handle_frame(&mut self, frame: Frame, out: &mut Vec<Disposition>) -> Result<(), HandlerFault> {
        match self.state {
            ChannelState::Unallocated => {
                if let Err(rejection) = self.allocate(&frame) {
                    self.state = ChannelState::Closed;
                    out.push(Disposition::Abort(rejection));
                }
                Ok(())
            }
            ChannelState::Allocated => {
                let Some(value) = frame.header(SEQUENCE_HEADER) else {
                    tracing::debug!(connection.id = %self.id, "drop package without sequence number");
                    metrics::inc_dropped("missing_sequence");
                    return Ok(());
                };
                let sequence = parse_decimal::<u64>(value).ok_or_else(|| {
                    metrics::inc_dropped("invalid_sequence");
                    HandlerFault::InvalidSequence {
                        value: lossy(value),
                    }
                })?;
                self.sequence = sequence;
                metrics::inc_frames(Direction::Inbound);
                out.push(Disposition::Forward(frame));
                Ok(())
            }
            ChannelState::Closed => Ok(()),
        }
    }

    fn allocate(&mut self, reply: &Frame) -> Result<(), AllocationRejected> {
        let tokens = reply.start_line_tokens();
        if tokens.len() != 3 {
            return Err(AllocationRejected::MalformedStartLine {
                tokens: tokens.len(),
            });
        }
        let target = tokens[1];
        if target != ALLOCATION_SUCCESS_PATH {
            let reason = target.strip_prefix(b"/").unwrap_or(target);
            return Err(AllocationRejected::Denied {
                reason: lossy(reason),
            });
        }

        // The relay may repeat headers; the last occurrence wins.
        let connection_count = match reply.headers_named(CONNECTION_NUM_HEADER).last() {
            Some(value) => parse_decimal::<usize>(value).ok_or_else(|| {
                AllocationRejected::InvalidConnectionCount {
                    value: lossy(value),
                }
            })?,
            None => 1,
        };
        let entry = reply
            .headers_named(ENTRY_HEADER)
            .last()
            .map(|value| lossy(value))
            .unwrap_or_default();

        self.pool.apply_allocation(connection_count, entry.clone());
        self.pool.register(self.id);
        self.state = ChannelState::Allocated;
        tracing::info!(connection.id = %self.id, num = connection_count, %entry, "tcp channel is allocated");
        Ok(())
    }
}

impl ChannelHooks for Channel {
    fn on_connect(&mut self) -> Bytes {
        tracing::debug!(connection.id = %self.id, "connected to relay, requesting allocation");
        self.pool.credentials().allocation_request()
    }

    fn on_data(&mut self, data: &[u8]) -> Vec<Disposition> {
        let mut out = Vec::new();
        if self.state == ChannelState::Closed {
            return out;
        }
        let mut framer = std::mem::take(&mut self.framer);
        framer.feed(data, |frame| self.handle_frame(frame, &mut out));
        if self.state == ChannelState::Closed {
            framer.clear();
        }
        self.framer = framer;
        out
    }

    fn on_write_headers(&self, headers: &mut Vec<Header>) {
        headers.insert(
            0,
            (
                Bytes::from_static(SEQUENCE_HEADER_OUTBOUND),
                Bytes::from(self.sequence.to_string()),
            ),
        );
    }

    fn on_channel_lost(&mut self) {
        self.state = ChannelState::Closed;
        self.framer.clear();
        if self.pool.on_channel_lost(self.id) {
            tracing::debug!(connection.id = %self.id, "channel left the live set");
        }
    }

    fn state(&self) -> ChannelState { self.state }
}

fn parse_decimal<T: std::str::FromStr>(value: &[u8]) -> Option<T> {
    std::str::from_utf8(value).ok()?.parse().ok()
}

fn lossy(value: &[u8]) -> String { String::from_utf8_lossy(value).into_owned() }

#[cfg(test)]
mod tests;
