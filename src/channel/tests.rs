//! Tests for the channel state machine and its driver.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures::StreamExt;
use rstest::{fixture, rstest};
use tokio::io::{AsyncWriteExt, DuplexStream, duplex};
use tokio_util::{codec::FramedRead, sync::CancellationToken};
use tracing::Instrument;
use tracing_test::traced_test;

use super::*;
use crate::{
    codec::HttpFrameCodec,
    config::TunnelConfig,
    credentials::CredentialSource,
    gateway::{FnGateway, Gateway, GatewayError},
    response::Response,
};

const GRANT: &[u8] = b"GET /SUCC HTTP/1.1\r\nX-Connection-Num: 5\r\nX-Entry: demo.example\r\n\r\n";

fn request(sequence: u64, body: &str) -> Vec<u8> {
    format!(
        "POST /api HTTP/1.1\r\nX-Nbc-Sn: {sequence}\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
    .into_bytes()
}

fn echo_gateway() -> Arc<dyn Gateway> {
    Arc::new(FnGateway::new(|frame: Frame| async move {
        Ok::<_, GatewayError>(Response::new(200).with_body(frame.body()))
    }))
}

fn pool_with(gateway: Arc<dyn Gateway>) -> Pool {
    let (credentials, desired) = CredentialSource::Debug {
        app_name: "demo".into(),
        connection_count: 1,
    }
    .resolve()
    .expect("debug credentials");
    Pool::new("127.0.0.1:9", credentials, desired, gateway, TunnelConfig::default())
}

#[fixture]
fn pool() -> Pool { pool_with(echo_gateway()) }

fn channel(pool: &Pool) -> Channel { Channel::new(pool.next_connection_id(), pool.clone()) }

#[rstest]
fn connect_produces_allocation_request(pool: Pool) {
    let mut channel = channel(&pool);
    let greeting = channel.on_connect();

    assert!(greeting.starts_with(b"GET /allocate HTTP/1.1\r\nX-Cred0: BUILTIN\r\n"));
    assert_eq!(channel.state(), ChannelState::Unallocated);
}

#[rstest]
fn successful_reply_allocates_and_updates_pool(pool: Pool) {
    let mut channel = channel(&pool);
    let out = channel.on_data(GRANT);

    assert!(out.is_empty());
    assert_eq!(channel.state(), ChannelState::Allocated);
    assert_eq!(pool.desired_size(), 5);
    assert_eq!(pool.entry(), "demo.example");
    assert!(pool.is_live(channel.id()));
}

#[rstest]
fn reply_without_headers_uses_defaults(pool: Pool) {
    pool.apply_allocation(9, "stale".into());
    let mut channel = channel(&pool);
    channel.on_data(b"HTTP/1.1 /SUCC OK\r\n\r\n");

    assert_eq!(channel.state(), ChannelState::Allocated);
    assert_eq!(pool.desired_size(), 1);
    assert_eq!(pool.entry(), "");
}

#[rstest]
#[case::denied(
    b"GET /FULL HTTP/1.1\r\n\r\n",
    AllocationRejected::Denied { reason: "FULL".into() }
)]
#[case::two_tokens(
    b"GET /SUCC\r\n\r\n",
    AllocationRejected::MalformedStartLine { tokens: 2 }
)]
#[case::double_space(
    b"GET  /SUCC HTTP/1.1\r\n\r\n",
    AllocationRejected::MalformedStartLine { tokens: 4 }
)]
#[case::bad_count(
    b"GET /SUCC HTTP/1.1\r\nX-CONNECTION-NUM: many\r\n\r\n",
    AllocationRejected::InvalidConnectionCount { value: "many".into() }
)]
fn rejected_reply_aborts_without_touching_live_set(
    pool: Pool,
    #[case] reply: &[u8],
    #[case] expected: AllocationRejected,
) {
    let mut channel = channel(&pool);
    let out = channel.on_data(reply);

    assert_eq!(out, vec![Disposition::Abort(expected)]);
    assert_eq!(channel.state(), ChannelState::Closed);
    assert_eq!(pool.live_count(), 0);
    assert_eq!(pool.desired_size(), 1);
}

#[rstest]
fn frames_after_rejection_are_ignored(pool: Pool) {
    let mut channel = channel(&pool);
    let mut input = b"GET /FULL HTTP/1.1\r\n\r\n".to_vec();
    input.extend_from_slice(&request(1, "late"));

    let out = channel.on_data(&input);
    assert_eq!(out.len(), 1);
    assert!(channel.on_data(&request(2, "later")).is_empty());
    assert_eq!(channel.backlog_len(), 0);
}

#[rstest]
fn grant_and_request_in_one_read(pool: Pool) {
    let mut channel = channel(&pool);
    let mut input = GRANT.to_vec();
    input.extend_from_slice(&request(42, "hi"));

    let out = channel.on_data(&input);
    assert_eq!(out.len(), 1);
    assert!(matches!(&out[0], Disposition::Forward(frame) if &frame.body()[..] == b"hi"));
    assert_eq!(channel.sequence(), 42);
}

#[rstest]
fn only_the_first_frame_allocates(pool: Pool) {
    let mut channel = channel(&pool);
    channel.on_data(GRANT);
    let out = channel.on_data(b"GET /SUCC HTTP/1.1\r\nX-Connection-Num: 9\r\nX-Nbc-Sn: 1\r\n\r\n");

    assert_eq!(out.len(), 1, "later /SUCC frames are ordinary requests");
    assert_eq!(pool.desired_size(), 5);
}

#[rstest]
#[traced_test]
fn request_without_sequence_is_dropped(pool: Pool) {
    let mut channel = channel(&pool);
    channel.on_data(GRANT);
    let out = channel.on_data(b"GET / HTTP/1.1\r\n\r\n");

    assert!(out.is_empty());
    assert_eq!(channel.sequence(), 0);
    assert!(logs_contain("drop package without sequence number"));
}

#[rstest]
#[traced_test]
fn invalid_sequence_is_a_handler_fault(pool: Pool) {
    let mut channel = channel(&pool);
    channel.on_data(GRANT);
    channel.on_data(&request(3, ""));
    let out = channel.on_data(b"GET / HTTP/1.1\r\nX-NBC-SN: abc\r\n\r\n");

    assert!(out.is_empty());
    assert_eq!(channel.sequence(), 3);
    assert!(logs_contain("frame handler failed"));
    assert!(logs_contain("invalid sequence number"));
}

#[rstest]
fn sequence_follows_the_latest_request(pool: Pool) {
    let mut channel = channel(&pool);
    channel.on_data(GRANT);
    channel.on_data(&request(7, ""));
    channel.on_data(&request(3, ""));

    assert_eq!(channel.sequence(), 3);
}

#[rstest]
fn write_headers_prepends_sequence(pool: Pool) {
    let mut channel = channel(&pool);
    channel.on_data(GRANT);
    channel.on_data(&request(11, ""));

    let mut headers = vec![(Bytes::from_static(b"Content-Type"), Bytes::from_static(b"text/plain"))];
    channel.on_write_headers(&mut headers);

    assert_eq!(&headers[0].0[..], b"X-Nbc-Sn");
    assert_eq!(&headers[0].1[..], b"11");
    assert_eq!(&headers[1].0[..], b"Content-Type");
}

#[rstest]
fn channel_lost_is_idempotent(pool: Pool) {
    let mut channel = channel(&pool);
    channel.on_data(GRANT);
    assert_eq!(pool.live_count(), 1);

    channel.on_channel_lost();
    channel.on_channel_lost();

    assert_eq!(channel.state(), ChannelState::Closed);
    assert_eq!(pool.live_count(), 0);
}

struct Relay {
    frames: FramedRead<tokio::io::ReadHalf<DuplexStream>, HttpFrameCodec>,
    writer: tokio::io::WriteHalf<DuplexStream>,
}

impl Relay {
    async fn next_frame(&mut self) -> Frame {
        self.frames
            .next()
            .await
            .expect("stream ended")
            .expect("read frame")
    }

    async fn send(&mut self, bytes: &[u8]) { self.writer.write_all(bytes).await.expect("write to channel"); }
}

fn spawn_channel(
    pool: &Pool,
    config: TunnelConfig,
    abort: CancellationToken,
) -> (Relay, tokio::task::JoinHandle<ChannelClose>, ConnectionId) {
    let (local, remote) = duplex(64 * 1024);
    let channel = channel(pool);
    let id = channel.id();
    let runtime = ChannelRuntime {
        gateway: pool.gateway(),
        allocation_timeout: config.allocation_timeout,
        idle_timeout: config.idle_timeout,
        abort,
    };
    let task = tokio::spawn(run_channel(local, channel, runtime).in_current_span());
    let (read, writer) = tokio::io::split(remote);
    (
        Relay {
            frames: FramedRead::new(read, HttpFrameCodec::new()),
            writer,
        },
        task,
        id,
    )
}

#[rstest]
#[tokio::test]
async fn driver_answers_requests_with_echoed_sequence(pool: Pool) {
    let (mut relay, task, id) = spawn_channel(&pool, TunnelConfig::default(), CancellationToken::new());

    let allocation = relay.next_frame().await;
    assert_eq!(allocation.target(), Some(&b"/allocate"[..]));

    relay.send(GRANT).await;
    relay.send(&request(42, "ping")).await;
    let response = relay.next_frame().await;

    assert_eq!(&response.start_line()[..], b"HTTP/1.1 200 OK");
    assert_eq!(&response.headers()[0].0[..], b"X-NBC-SN");
    assert_eq!(&response.headers()[0].1[..], b"42");
    assert_eq!(&response.body()[..], b"ping");
    assert!(pool.is_live(id));

    drop(relay);
    assert!(matches!(task.await.expect("join"), ChannelClose::PeerClosed));
    assert!(!pool.is_live(id));
}

#[rstest]
#[tokio::test]
async fn connection_close_does_not_end_the_channel(pool: Pool) {
    let (mut relay, _task, _) = spawn_channel(&pool, TunnelConfig::default(), CancellationToken::new());
    relay.next_frame().await;
    relay.send(GRANT).await;

    for sequence in [1, 2] {
        relay
            .send(format!("GET / HTTP/1.1\r\nConnection: close\r\nX-Nbc-Sn: {sequence}\r\n\r\n").as_bytes())
            .await;
        let response = relay.next_frame().await;
        assert_eq!(response.header(b"X-NBC-SN").map(|v| &v[..]), Some(sequence.to_string().as_bytes()));
    }
}

#[tokio::test]
async fn gateway_error_becomes_internal_server_error() {
    let gateway: Arc<dyn Gateway> = Arc::new(FnGateway::new(|_: Frame| async {
        Err::<Response, GatewayError>("backend down".into())
    }));
    let pool = pool_with(gateway);
    let (mut relay, _task, _) = spawn_channel(&pool, TunnelConfig::default(), CancellationToken::new());
    relay.next_frame().await;
    relay.send(GRANT).await;
    relay.send(&request(5, "")).await;

    let response = relay.next_frame().await;
    assert_eq!(&response.start_line()[..], b"HTTP/1.1 500 Internal Server Error");
    assert_eq!(response.header(b"X-NBC-SN").map(|v| &v[..]), Some(&b"5"[..]));
}

#[traced_test]
#[tokio::test]
async fn gateway_panic_is_logged_and_unanswered() {
    let gateway: Arc<dyn Gateway> = Arc::new(FnGateway::new(|frame: Frame| async move {
        assert!(!frame.body().starts_with(b"boom"), "gateway exploded");
        Ok::<_, GatewayError>(Response::new(204))
    }));
    let pool = pool_with(gateway);
    let (mut relay, _task, _) = spawn_channel(&pool, TunnelConfig::default(), CancellationToken::new());
    relay.next_frame().await;
    relay.send(GRANT).await;
    relay.send(&request(1, "boom")).await;
    relay.send(&request(2, "fine")).await;

    let response = relay.next_frame().await;
    assert_eq!(&response.start_line()[..], b"HTTP/1.1 204 No Content");
    assert_eq!(response.header(b"X-NBC-SN").map(|v| &v[..]), Some(&b"2"[..]));
    assert!(logs_contain("request handler panicked"));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn silent_relay_hits_allocation_timeout(pool: Pool) {
    let config = TunnelConfig::default();
    let (mut relay, task, _) = spawn_channel(&pool, config, CancellationToken::new());
    relay.next_frame().await;

    let start = tokio::time::Instant::now();
    assert!(matches!(task.await.expect("join"), ChannelClose::AllocationTimeout));
    assert!(start.elapsed() >= Duration::from_secs(29));
    assert_eq!(pool.live_count(), 0);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn allocated_channel_survives_allocation_deadline_then_idles_out(pool: Pool) {
    let config = TunnelConfig::default().idle_timeout(Duration::from_secs(120));
    let (mut relay, task, id) = spawn_channel(&pool, config, CancellationToken::new());
    relay.next_frame().await;
    relay.send(GRANT).await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(pool.is_live(id), "allocation deadline must not close an allocated channel");

    assert!(matches!(task.await.expect("join"), ChannelClose::IdleTimeout));
    assert!(!pool.is_live(id));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn received_bytes_push_back_the_idle_deadline(pool: Pool) {
    let config = TunnelConfig::default().idle_timeout(Duration::from_secs(120));
    let start = tokio::time::Instant::now();
    let (mut relay, task, id) = spawn_channel(&pool, config, CancellationToken::new());
    relay.next_frame().await;
    relay.send(GRANT).await;

    tokio::time::sleep_until(start + Duration::from_secs(100)).await;
    relay.send(&request(1, "")).await;
    relay.next_frame().await;

    tokio::time::sleep_until(start + Duration::from_secs(150)).await;
    assert!(pool.is_live(id), "traffic at 100 s must keep the channel past 120 s");

    assert!(matches!(task.await.expect("join"), ChannelClose::IdleTimeout));
    assert!(start.elapsed() >= Duration::from_secs(220));
    assert!(!pool.is_live(id));
}

#[rstest]
#[tokio::test]
async fn rejected_channel_is_closed(pool: Pool) {
    let (mut relay, task, _) = spawn_channel(&pool, TunnelConfig::default(), CancellationToken::new());
    relay.next_frame().await;
    relay.send(b"GET /DENIED HTTP/1.1\r\n\r\n").await;

    let close = task.await.expect("join");
    assert!(matches!(
        close.into_error(),
        Some(crate::error::TunnelError::AllocationRejected(AllocationRejected::Denied { .. }))
    ));
    assert_eq!(pool.live_count(), 0);
    assert!(relay.frames.next().await.is_none(), "socket closed after rejection");
}

#[rstest]
#[tokio::test]
async fn abort_token_hard_closes(pool: Pool) {
    let abort = CancellationToken::new();
    let (mut relay, task, id) = spawn_channel(&pool, TunnelConfig::default(), abort.clone());
    relay.next_frame().await;
    relay.send(GRANT).await;
    while !pool.is_live(id) {
        tokio::task::yield_now().await;
    }

    abort.cancel();
    assert!(matches!(task.await.expect("join"), ChannelClose::Aborted));
    assert!(!pool.is_live(id));
}
