//! Blind bidirectional byte relay between the forged client session and the
//! authenticated backend link.
//!
//! Each direction runs in its own task and copies until EOF or error, then
//! shuts down the write side of its destination so the peer sees a half-close.
//! The relay returns only after both directions are done.
//!
//! The idle timeout is shared: a session counts as idle only while neither
//! direction moves bytes, so a long result stream toward a silent client
//! keeps both directions open.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, split};
use tokio::time::{Instant, timeout};
use tracing::{debug, trace, warn};

use crate::errors::ProxyError;

// -----------------------------------------------------------------------------
// ----- Constants -------------------------------------------------------------

const COPY_BUFFER_SIZE: usize = 16 * 1024;

pub const CLIENT_TO_BACKEND: &str = "client->backend";
pub const BACKEND_TO_CLIENT: &str = "backend->client";

// -----------------------------------------------------------------------------
// ----- RelayStats ------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_backend: u64,
    pub backend_to_client: u64,
}

// -----------------------------------------------------------------------------
// ----- Relay -----------------------------------------------------------------

/// Copy bytes both ways until both directions finish. Errors are logged
/// per direction and never returned.
pub async fn relay<C, B>(client: C, backend: B, idle_timeout: Option<Duration>) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    B: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (client_read, client_write) = split(client);
    let (backend_read, backend_write) = split(backend);

    let idle = idle_timeout.map(|limit| (limit, Arc::new(Activity::new())));

    let upstream = tokio::spawn(copy_direction(
        client_read,
        backend_write,
        CLIENT_TO_BACKEND,
        idle.clone(),
    ));
    let downstream = tokio::spawn(copy_direction(
        backend_read,
        client_write,
        BACKEND_TO_CLIENT,
        idle,
    ));

    let (upstream, downstream) = tokio::join!(upstream, downstream);

    RelayStats {
        client_to_backend: settle(CLIENT_TO_BACKEND, upstream),
        backend_to_client: settle(BACKEND_TO_CLIENT, downstream),
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Activity ----------------------------------------------------

/// Last time either direction moved bytes, as nanos since `origin`.
#[derive(Debug)]
struct Activity {
    origin: Instant,
    last: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            last: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let now = self.origin.elapsed().as_nanos() as u64;
        self.last.fetch_max(now, Ordering::Relaxed);
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_nanos(self.last.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }
}

// -----------------------------------------------------------------------------
// ----- Internal: Copy --------------------------------------------------------

#[derive(Debug)]
struct Copied {
    bytes: u64,
    error: Option<ProxyError>,
}

async fn copy_direction<R, W>(
    mut reader: R,
    mut writer: W,
    direction: &'static str,
    idle: Option<(Duration, Arc<Activity>)>,
) -> Copied
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut bytes = 0u64;

    let error = loop {
        let read = match &idle {
            Some((limit, activity)) => {
                read_until_idle(&mut reader, &mut buf, *limit, activity, direction).await
            }
            None => reader.read(&mut buf).await,
        };

        let n = match read {
            Ok(0) => break None,
            Ok(n) => n,
            Err(e) => break Some(e),
        };

        trace!(direction, n, "relayed");
        if let Err(e) = writer.write_all(&buf[..n]).await {
            break Some(e);
        }
        if let Err(e) = writer.flush().await {
            break Some(e);
        }
        bytes += n as u64;
        if let Some((_, activity)) = &idle {
            activity.touch();
        }
    };

    // Propagate EOF (or failure) as a half-close toward the other peer.
    let _ = writer.shutdown().await;

    debug!(direction, bytes, "relay direction finished");
    Copied {
        bytes,
        error: error.map(|source| ProxyError::Relay { direction, source }),
    }
}

/// Read once, giving up only after the whole session has been quiet for
/// `limit`. `read` is cancel safe, so re-arming the timer loses nothing.
async fn read_until_idle<R>(
    reader: &mut R,
    buf: &mut [u8],
    limit: Duration,
    activity: &Activity,
    direction: &'static str,
) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    loop {
        let remaining = limit.saturating_sub(activity.idle_for());
        if remaining.is_zero() {
            debug!(direction, ?limit, "relay idle timeout");
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("idle for {limit:?}"),
            ));
        }

        if let Ok(read) = timeout(remaining, reader.read(buf)).await {
            if matches!(read, Ok(n) if n > 0) {
                activity.touch();
            }
            return read;
        }
    }
}

fn settle(direction: &'static str, joined: Result<Copied, tokio::task::JoinError>) -> u64 {
    match joined {
        Ok(Copied { bytes, error: None }) => bytes,
        Ok(Copied {
            bytes,
            error: Some(err),
        }) => {
            debug!(error = %err, bytes, "relay direction ended with error");
            bytes
        }
        Err(join_err) => {
            warn!(direction, error = %join_err, "relay task aborted");
            0
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Tests -----------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn lossless_in_both_directions() {
        let (client_far, client_near) = duplex(1024);
        let (backend_near, backend_far) = duplex(1024);

        let relay = tokio::spawn(relay(client_near, backend_near, None));

        let upstream: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let downstream: Vec<u8> = (0..150_000u32).map(|i| (i % 241) as u8).collect();

        let (mut client_read, mut client_write) = split(client_far);
        let (mut backend_read, mut backend_write) = split(backend_far);

        let up = upstream.clone();
        let client_writer = tokio::spawn(async move {
            client_write.write_all(&up).await.unwrap();
            client_write.shutdown().await.unwrap();
        });
        let down = downstream.clone();
        let backend_writer = tokio::spawn(async move {
            backend_write.write_all(&down).await.unwrap();
            backend_write.shutdown().await.unwrap();
        });

        let backend_reader = tokio::spawn(async move {
            let mut got = Vec::new();
            backend_read.read_to_end(&mut got).await.unwrap();
            got
        });
        let mut got_down = Vec::new();
        client_read.read_to_end(&mut got_down).await.unwrap();
        let got_up = backend_reader.await.unwrap();

        client_writer.await.unwrap();
        backend_writer.await.unwrap();

        assert_eq!(got_up, upstream);
        assert_eq!(got_down, downstream);

        let stats = relay.await.unwrap();
        assert_eq!(stats.client_to_backend, upstream.len() as u64);
        assert_eq!(stats.backend_to_client, downstream.len() as u64);
    }

    #[tokio::test]
    async fn half_close_drains_the_other_direction() {
        let (client_far, client_near) = duplex(1024);
        let (backend_near, backend_far) = duplex(1024);

        let relay = tokio::spawn(relay(client_near, backend_near, None));

        let (mut client_read, mut client_write) = split(client_far);
        let (mut backend_read, mut backend_write) = split(backend_far);

        // Client sends a request and half-closes.
        client_write.write_all(b"SELECT 1").await.unwrap();
        client_write.shutdown().await.unwrap();

        // Backend sees the request followed by EOF.
        let mut request = Vec::new();
        backend_read.read_to_end(&mut request).await.unwrap();
        assert_eq!(request, b"SELECT 1");

        // Backend can still answer after the client's half-close.
        backend_write.write_all(b"result-set").await.unwrap();
        backend_write.shutdown().await.unwrap();

        let mut response = Vec::new();
        client_read.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"result-set");

        let stats = relay.await.unwrap();
        assert_eq!(stats.client_to_backend, 8);
        assert_eq!(stats.backend_to_client, 10);
    }

    #[tokio::test]
    async fn backend_half_close_still_delivers_client_bytes() {
        let (client_far, client_near) = duplex(1024);
        let (backend_near, backend_far) = duplex(1024);

        let relay = tokio::spawn(relay(client_near, backend_near, None));

        let (mut client_read, mut client_write) = split(client_far);
        let (mut backend_read, mut backend_write) = split(backend_far);

        // Backend finishes its side first.
        backend_write.write_all(b"bye").await.unwrap();
        backend_write.shutdown().await.unwrap();

        let mut tail = Vec::new();
        client_read.read_to_end(&mut tail).await.unwrap();
        assert_eq!(tail, b"bye");

        // The client keeps sending well past the pipe capacity.
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 199) as u8).collect();
        let sent = payload.clone();
        let client_writer = tokio::spawn(async move {
            client_write.write_all(&sent).await.unwrap();
            client_write.shutdown().await.unwrap();
        });

        let mut got = Vec::new();
        backend_read.read_to_end(&mut got).await.unwrap();
        client_writer.await.unwrap();
        assert_eq!(got, payload);

        let stats = relay.await.unwrap();
        assert_eq!(stats.client_to_backend, 10_000);
        assert_eq!(stats.backend_to_client, 3);
    }

    #[tokio::test]
    async fn streaming_backend_keeps_silent_client_session_open() {
        let (client_far, client_near) = duplex(1024);
        let (backend_near, backend_far) = duplex(1024);

        let relay = tokio::spawn(relay(
            client_near,
            backend_near,
            Some(Duration::from_millis(100)),
        ));

        let (mut client_read, _client_write) = split(client_far);
        let (mut backend_read, mut backend_write) = split(backend_far);

        // Resolves once the relay half-closes toward the backend.
        let backend_eof = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            backend_read.read(&mut buf).await.unwrap()
        });

        // 600ms of rows, well past the idle limit, while the client says nothing.
        let streamer = tokio::spawn(async move {
            for _ in 0..30 {
                backend_write.write_all(&[7u8; 100]).await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            backend_write
        });

        let mut received = 0;
        let mut buf = [0u8; 4096];
        while received < 3000 {
            let n = client_read.read(&mut buf).await.unwrap();
            assert!(n > 0, "client saw EOF mid-stream");
            received += n;
        }
        let _backend_write = streamer.await.unwrap();
        assert!(!backend_eof.is_finished(), "backend was closed while still streaming");

        // Once both directions go quiet the session is torn down.
        let stats = relay.await.unwrap();
        assert_eq!(stats.backend_to_client, 3000);
        assert_eq!(stats.client_to_backend, 0);
        assert_eq!(backend_eof.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn idle_timeout_closes_both_sides() {
        let (client_far, client_near) = duplex(64);
        let (backend_near, backend_far) = duplex(64);

        let stats = relay(client_near, backend_near, Some(Duration::from_millis(50))).await;
        assert_eq!(stats, RelayStats::default());

        // Both far ends observe EOF once the relay gave up.
        let (mut client_read, _client_write) = split(client_far);
        let (mut backend_read, _backend_write) = split(backend_far);
        let mut buf = Vec::new();
        assert_eq!(client_read.read_to_end(&mut buf).await.unwrap(), 0);
        assert_eq!(backend_read.read_to_end(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn peer_failure_is_not_propagated() {
        let (client_far, client_near) = duplex(64);
        let (backend_near, backend_far) = duplex(64);

        // Backend vanishes entirely; the client hangs up too.
        drop(backend_far);
        drop(client_far);

        let stats = relay(client_near, backend_near, None).await;
        assert_eq!(stats, RelayStats::default());
    }
}

// -----------------------------------------------------------------------------
// -----------------------------------------------------------------------------
