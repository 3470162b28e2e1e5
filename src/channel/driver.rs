//! Socket-owning task that drives a [`ChannelHooks`] implementation.
//!
//! The driver writes the greeting returned by `on_connect`, then multiplexes
//! four event sources in a biased `select!` loop: the abort token, the
//! allocation and idle timers, responses coming back from the gateway worker,
//! and socket reads. Requests are answered one at a time, in arrival order,
//! by a worker task so a slow gateway never stalls reads.

use std::{any::Any, io, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{ChannelHooks, ChannelState, Disposition};
use crate::{
    error::{AllocationRejected, HandlerFault, TunnelError},
    frame::Frame,
    gateway::Gateway,
    metrics::{self, Direction},
    response::Response,
    schedule::{TimerHandle, schedule},
};

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Collaborators and timers for one [`run_channel`] invocation.
#[derive(Clone)]
pub struct ChannelRuntime {
    /// Application answering forwarded requests.
    pub gateway: Arc<dyn Gateway>,
    /// Time allowed for the allocation reply.
    pub allocation_timeout: Duration,
    /// Inactivity after which the channel closes.
    pub idle_timeout: Duration,
    /// Cancelling this token hard-closes the channel.
    pub abort: CancellationToken,
}

/// Why a channel ended.
#[derive(Debug)]
pub enum ChannelClose {
    /// The relay closed the connection.
    PeerClosed,
    /// The allocation reply refused the channel.
    Rejected(AllocationRejected),
    /// No allocation reply arrived in time.
    AllocationTimeout,
    /// Nothing was read for the idle timeout.
    IdleTimeout,
    /// The abort token was cancelled.
    Aborted,
    /// Reading or writing the socket failed.
    Lost(io::Error),
}

enum TimerEvent {
    AllocationDeadline,
    Idle,
}

/// Drive `hooks` over `stream` until the channel ends.
///
/// `on_channel_lost` is called exactly once before returning and the stream
/// is dropped without a graceful shutdown.
pub async fn run_channel<S, H>(stream: S, mut hooks: H, runtime: ChannelRuntime) -> ChannelClose
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    H: ChannelHooks,
{
    let ChannelRuntime {
        gateway,
        allocation_timeout,
        idle_timeout,
        abort,
    } = runtime;

    let (timer_tx, timers) = mpsc::unbounded_channel();
    let allocation_timer = {
        let tx = timer_tx.clone();
        schedule(allocation_timeout, move || {
            let _ = tx.send(TimerEvent::AllocationDeadline);
        })
    };
    let idle_timer = schedule(idle_timeout, move || {
        let _ = timer_tx.send(TimerEvent::Idle);
    });

    let (requests, request_rx) = mpsc::unbounded_channel();
    let (response_tx, responses) = mpsc::unbounded_channel();
    let worker = tokio::spawn(gateway_worker(gateway, request_rx, response_tx).in_current_span());

    let mut driver = Driver {
        stream,
        abort,
        timers,
        idle_timer,
        idle_timeout,
        requests,
        responses,
    };
    let greeting = hooks.on_connect();
    let close = driver.serve(&mut hooks, &greeting).await.unwrap_or_else(ChannelClose::Lost);

    allocation_timer.cancel();
    driver.idle_timer.cancel();
    worker.abort();
    log_close(&close);
    hooks.on_channel_lost();
    drop(driver);
    close
}

impl ChannelClose {
    /// The error that ended the channel, if it ended abnormally.
    #[must_use]
    pub fn into_error(self) -> Option<TunnelError> {
        match self {
            Self::Rejected(reason) => Some(reason.into()),
            Self::Lost(error) => Some(TunnelError::ChannelLost(error)),
            Self::PeerClosed | Self::AllocationTimeout | Self::IdleTimeout | Self::Aborted => None,
        }
    }
}

struct Driver<S> {
    stream: S,
    abort: CancellationToken,
    timers: mpsc::UnboundedReceiver<TimerEvent>,
    idle_timer: TimerHandle,
    idle_timeout: Duration,
    requests: mpsc::UnboundedSender<Frame>,
    responses: mpsc::UnboundedReceiver<Response>,
}

impl<S> Driver<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    #[expect(
        clippy::integer_division_remainder_used,
        reason = "tokio::select! expands to modulus internally"
    )]
    async fn serve<H: ChannelHooks>(&mut self, hooks: &mut H, greeting: &[u8]) -> io::Result<ChannelClose> {
        if !greeting.is_empty() {
            self.stream.write_all(greeting).await?;
        }
        let mut buf = vec![0_u8; READ_BUFFER_SIZE];
        loop {
            tokio::select! {
                biased;

                () = self.abort.cancelled() => return Ok(ChannelClose::Aborted),

                Some(event) = self.timers.recv() => match event {
                    TimerEvent::AllocationDeadline if hooks.state() == ChannelState::Unallocated => {
                        return Ok(ChannelClose::AllocationTimeout);
                    }
                    TimerEvent::AllocationDeadline => {}
                    TimerEvent::Idle => return Ok(ChannelClose::IdleTimeout),
                },

                Some(mut response) = self.responses.recv() => {
                    hooks.on_write_headers(response.headers_mut());
                    self.stream.write_all(&response.to_bytes()).await?;
                    metrics::inc_frames(Direction::Outbound);
                }

                read = self.stream.read(&mut buf) => {
                    let n = read?;
                    if n == 0 {
                        return Ok(ChannelClose::PeerClosed);
                    }
                    self.idle_timer.reset(self.idle_timeout);
                    for disposition in hooks.on_data(&buf[..n]) {
                        match disposition {
                            Disposition::Forward(frame) => {
                                // The worker outlives `requests` unless aborted.
                                let _ = self.requests.send(frame);
                            }
                            Disposition::Abort(reason) => return Ok(ChannelClose::Rejected(reason)),
                        }
                    }
                }
            }
        }
    }
}

fn log_close(close: &ChannelClose) {
    match close {
        ChannelClose::PeerClosed => tracing::info!("inner connection lost: closed by relay"),
        ChannelClose::Rejected(reason) => tracing::warn!(%reason, "allocate tcp channel failed"),
        ChannelClose::AllocationTimeout => tracing::info!("allocation reply timed out"),
        ChannelClose::IdleTimeout => tracing::info!("channel idle, closing"),
        ChannelClose::Aborted => tracing::debug!("channel aborted"),
        ChannelClose::Lost(error) => tracing::info!(%error, "inner connection broken"),
    }
}

async fn gateway_worker(
    gateway: Arc<dyn Gateway>,
    mut requests: mpsc::UnboundedReceiver<Frame>,
    responses: mpsc::UnboundedSender<Response>,
) {
    while let Some(request) = requests.recv().await {
        let response = match AssertUnwindSafe(gateway.handle(request)).catch_unwind().await {
            Ok(Ok(response)) => response,
            Ok(Err(error)) => {
                let fault = HandlerFault::Gateway(error.to_string());
                tracing::debug!(%fault, "request failed");
                Response::new(500)
            }
            Err(panic) => {
                let fault = HandlerFault::Panicked(panic_message(panic.as_ref()));
                tracing::error!(%fault, "request handler panicked");
                continue;
            }
        };
        if responses.send(response).is_err() {
            break;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else {
        format!("{payload:?}")
    }
}
