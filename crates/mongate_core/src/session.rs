//! Per-client serve loop.
//!
//! One task per client session. The loop waits for a header, acquires an
//! upstream from the pool, forwards the exchange, and on mutation ops keeps
//! the same upstream bound to the client until the `getLastError` follow-up
//! window closes. The upstream is never held while the client is idle.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use mongate_pool::{ConnectionPool, Connector, PoolError};
use mongate_stats::{Stats, StatsTimer};
use mongate_wire::{FrameError, read_header};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ClientStream;
use crate::admission::ClientAdmission;
use crate::collab::QueryProxy;
use crate::forward::{ForwardError, proxy_message};
use crate::last_error::LastErrorWindow;

/// Everything a serve task needs, shared across all sessions.
pub(crate) struct SessionContext<C: Connector> {
    pub(crate) pool: ConnectionPool<C>,
    pub(crate) admission: ClientAdmission,
    pub(crate) query: Arc<dyn QueryProxy>,
    pub(crate) stats: Arc<dyn Stats>,
    pub(crate) closed: CancellationToken,
    pub(crate) client_idle_timeout: Duration,
    pub(crate) message_timeout: Duration,
    pub(crate) get_last_error_timeout: Duration,
}

/// How a session ended. Every variant closes the client socket.
enum SessionEnd {
    /// Clean end of stream while idle, or proxy shutdown.
    NormalClose,
    /// No client header within `client_idle_timeout`.
    IdleTimeout,
    /// Client-side read failed with something other than a clean close.
    ClientError(FrameError),
    /// The pool could not produce an upstream.
    AcquireFailed(PoolError),
    /// A forward failed; the upstream entry was discarded.
    ForwardFailed(ForwardError),
}

struct AdmissionGuard<'a> {
    admission: &'a ClientAdmission,
    ip: IpAddr,
}

impl Drop for AdmissionGuard<'_> {
    fn drop(&mut self) {
        self.admission.depart(self.ip);
    }
}

/// Entry point for one client session.
pub(crate) async fn serve<C: Connector>(
    ctx: Arc<SessionContext<C>>,
    mut client: Box<dyn ClientStream>,
    peer: SocketAddr,
) {
    if !ctx.admission.try_admit(peer.ip()) {
        ctx.stats.bump("client.rejected.max.connections");
        debug!(
            target: "mongate::session",
            client = %peer,
            "Rejected client over the per-IP connection cap"
        );
        return;
    }
    let _admission = AdmissionGuard {
        admission: &ctx.admission,
        ip: peer.ip(),
    };

    ctx.stats.bump("client.connected");
    debug!(target: "mongate::session", client = %peer, "Client session started");

    match serve_loop(&ctx, client.as_mut()).await {
        SessionEnd::NormalClose => {
            debug!(target: "mongate::session", client = %peer, "Client session closed");
        }
        SessionEnd::IdleTimeout => {
            ctx.stats.bump("client.idle.timeout");
            info!(target: "mongate::session", client = %peer, "Client idle timeout");
        }
        SessionEnd::ClientError(e) => {
            ctx.stats.bump("client.error.disconnect");
            warn!(
                target: "mongate::session",
                client = %peer,
                error = ?e,
                "Client read failed"
            );
        }
        SessionEnd::AcquireFailed(e) => {
            ctx.stats.bump("client.error.disconnect");
            warn!(
                target: "mongate::session",
                client = %peer,
                error = ?e,
                "Could not acquire an upstream connection"
            );
        }
        SessionEnd::ForwardFailed(e) => {
            ctx.stats.bump("client.error.disconnect");
            warn!(
                target: "mongate::session",
                client = %peer,
                error = ?e,
                "Forwarding failed; upstream connection discarded"
            );
        }
    }
    // Client socket closes when the box drops.
}

async fn serve_loop<C: Connector>(
    ctx: &SessionContext<C>,
    client: &mut dyn ClientStream,
) -> SessionEnd {
    let mut last_error = LastErrorWindow::default();

    loop {
        // IDLE: wait for the next client header, or shutdown.
        let header = tokio::select! {
            _ = ctx.closed.cancelled() => return SessionEnd::NormalClose,
            read = timeout(ctx.client_idle_timeout, read_header(client)) => match read {
                Err(_) => return SessionEnd::IdleTimeout,
                Ok(Err(e)) if e.is_normal_close() => return SessionEnd::NormalClose,
                Ok(Err(e)) => return SessionEnd::ClientError(e),
                Ok(Ok(header)) => header,
            },
        };

        let mut server = match ctx.pool.acquire().await {
            Ok(server) => server,
            Err(e) => return SessionEnd::AcquireFailed(e),
        };
        let held_timer = StatsTimer::start(ctx.stats.clone(), "server.conn.held.time");

        // FORWARD; mutations keep this upstream bound for their follow-ups.
        let mut current = header;
        loop {
            let proxy_timer = StatsTimer::start(ctx.stats.clone(), "message.proxy.time");
            let result = proxy_message(
                &current,
                client,
                &mut *server,
                &mut last_error,
                ctx.query.as_ref(),
                ctx.message_timeout,
            )
            .await;
            proxy_timer.stop();

            match result {
                Ok(()) => ctx.stats.bump("message.proxy.success"),
                Err(e) => {
                    if e.is_timeout() {
                        ctx.stats.bump("message.proxy.timeout");
                    } else {
                        ctx.stats.bump("message.proxy.error");
                    }
                    server.discard();
                    held_timer.stop();
                    return SessionEnd::ForwardFailed(e);
                }
            }

            if !current.op_code.is_mutation() {
                break;
            }
            ctx.stats.bump("message.with.mutation");

            // AWAIT_FOLLOWUP: the getLastError window on the same upstream.
            let followup = tokio::select! {
                _ = ctx.closed.cancelled() => None,
                read = timeout(ctx.get_last_error_timeout, read_header(client)) => match read {
                    Err(_) => {
                        ctx.stats.bump("client.gle.timeout");
                        None
                    }
                    Ok(Ok(header)) => Some(header),
                    Ok(Err(e)) if e.is_normal_close() => {
                        server.release();
                        held_timer.stop();
                        return SessionEnd::NormalClose;
                    }
                    Ok(Err(e)) => {
                        server.discard();
                        held_timer.stop();
                        return SessionEnd::ClientError(e);
                    }
                },
            };

            match followup {
                Some(header) => current = header,
                None => break,
            }
        }

        // Back to IDLE: release the upstream, the client keeps its session.
        server.release();
        held_timer.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::PassthroughQuery;
    use mongate_pool::PoolOptions;
    use mongate_stats::MemoryStats;
    use mongate_wire::{HEADER_LEN, MessageHeader, OpCode, write_header};
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    /// Connector whose "server" side behaves like a minimal mongod: it reads
    /// whole messages and answers ops that expect a response with an OpReply.
    struct MockUpstream {
        dialed: AtomicUsize,
    }

    impl MockUpstream {
        fn new() -> Self {
            Self {
                dialed: AtomicUsize::new(0),
            }
        }
    }

    async fn run_mock_server(mut conn: DuplexStream) -> io::Result<()> {
        loop {
            let header = match read_header(&mut conn).await {
                Ok(header) => header,
                Err(FrameError::Closed) => return Ok(()),
                Err(FrameError::Io(e)) => return Err(e),
                Err(FrameError::BadLength(_)) => return Ok(()),
            };
            let mut body = vec![0u8; header.body_len() as usize];
            conn.read_exact(&mut body).await?;

            if header.op_code.has_response() {
                let reply = MessageHeader {
                    message_length: (HEADER_LEN + 4) as u32,
                    request_id: 1,
                    response_to: header.request_id,
                    op_code: OpCode::Reply,
                };
                write_header(&mut conn, &reply).await.map_err(io_of)?;
                conn.write_all(b"okay").await?;
            }
        }
    }

    fn io_of(e: FrameError) -> io::Error {
        match e {
            FrameError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::Other, other.to_string()),
        }
    }

    #[async_trait::async_trait]
    impl Connector for MockUpstream {
        type Conn = DuplexStream;

        async fn connect(&self) -> io::Result<DuplexStream> {
            self.dialed.fetch_add(1, Ordering::SeqCst);
            let (near, far) = tokio::io::duplex(4096);
            tokio::spawn(run_mock_server(far));
            Ok(near)
        }

        fn addr(&self) -> &str {
            "mock:27017"
        }
    }

    struct Harness {
        ctx: Arc<SessionContext<Arc<MockUpstream>>>,
        upstream: Arc<MockUpstream>,
        stats: Arc<MemoryStats>,
    }

    fn harness(get_last_error_timeout: Duration) -> Harness {
        let upstream = Arc::new(MockUpstream::new());
        let stats = Arc::new(MemoryStats::new());
        let pool = ConnectionPool::new(
            upstream.clone(),
            PoolOptions {
                max_connections: 4,
                ..PoolOptions::default()
            },
            stats.clone(),
            None,
        );
        let ctx = Arc::new(SessionContext {
            pool,
            admission: ClientAdmission::new(2),
            query: Arc::new(PassthroughQuery),
            stats: stats.clone(),
            closed: CancellationToken::new(),
            client_idle_timeout: Duration::from_secs(30),
            message_timeout: Duration::from_secs(5),
            get_last_error_timeout,
        });
        Harness {
            ctx,
            upstream,
            stats,
        }
    }

    fn peer(last: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, last], 40000 + last as u16))
    }

    fn message(op: OpCode, request_id: u32, body: &[u8]) -> Vec<u8> {
        let header = MessageHeader {
            message_length: (HEADER_LEN + body.len()) as u32,
            request_id,
            response_to: 0,
            op_code: op,
        };
        let mut out = header.encode().to_vec();
        out.extend_from_slice(body);
        out
    }

    #[tokio::test]
    async fn mutation_and_followup_share_one_upstream() {
        let h = harness(Duration::from_secs(5));
        let (client_side, far) = tokio::io::duplex(4096);
        let mut driver = far;

        let task = tokio::spawn(serve(h.ctx.clone(), Box::new(client_side), peer(1)));

        // OpInsert (no response), then the getLastError query on its heels.
        driver
            .write_all(&message(OpCode::Insert, 1, b"doc-bytes"))
            .await
            .unwrap();
        driver
            .write_all(&message(OpCode::Query, 2, b"$cmd.getLastError"))
            .await
            .unwrap();

        let mut reply = vec![0u8; HEADER_LEN + 4];
        driver.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply[HEADER_LEN..], b"okay");

        drop(driver);
        task.await.unwrap();

        // Both exchanges rode one upstream connection.
        assert_eq!(h.upstream.dialed.load(Ordering::SeqCst), 1);
        assert_eq!(h.stats.counter("message.with.mutation"), 1);
        assert_eq!(h.stats.counter("message.proxy.success"), 2);
        // Session over: entry back in the pool, admission empty.
        assert_eq!(h.ctx.pool.idle_count(), 1);
        assert_eq!(h.ctx.pool.outstanding(), 1);
        assert!(h.ctx.admission.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn gle_timeout_releases_the_upstream_gracefully() {
        let h = harness(Duration::from_millis(200));
        let (client_side, far) = tokio::io::duplex(4096);
        let mut driver = far;

        let task = tokio::spawn(serve(h.ctx.clone(), Box::new(client_side), peer(2)));

        driver
            .write_all(&message(OpCode::Insert, 1, b"doc"))
            .await
            .unwrap();

        // No follow-up arrives; the sticky window must close on its own.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(h.stats.counter("client.gle.timeout"), 1);
        assert_eq!(h.ctx.pool.idle_count(), 1);

        // The session is back in IDLE and still healthy.
        driver
            .write_all(&message(OpCode::GetMore, 2, b"more"))
            .await
            .unwrap();
        let mut reply = vec![0u8; HEADER_LEN + 4];
        driver.read_exact(&mut reply).await.unwrap();

        drop(driver);
        task.await.unwrap();
        assert!(h.ctx.admission.is_empty());
    }

    #[tokio::test]
    async fn over_cap_client_is_rejected_before_any_read() {
        let h = harness(Duration::from_secs(5));

        let (first, _first_driver) = tokio::io::duplex(64);
        let (second, _second_driver) = tokio::io::duplex(64);
        let (third, _third_driver) = tokio::io::duplex(64);

        let same_ip = peer(3);
        tokio::spawn(serve(h.ctx.clone(), Box::new(first), same_ip));
        tokio::spawn(serve(h.ctx.clone(), Box::new(second), same_ip));
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Third concurrent session from the same IP: refused immediately.
        serve(h.ctx.clone(), Box::new(third), same_ip).await;
        assert_eq!(h.stats.counter("client.rejected.max.connections"), 1);
        assert_eq!(h.ctx.admission.active(same_ip.ip()), 2);

        h.ctx.closed.cancel();
    }

    #[tokio::test]
    async fn forward_failure_discards_the_upstream() {
        let h = harness(Duration::from_secs(5));

        // An upstream that dies before answering: replace the mock's far end
        // with one that drops instantly.
        struct DeadUpstream;

        #[async_trait::async_trait]
        impl Connector for DeadUpstream {
            type Conn = DuplexStream;

            async fn connect(&self) -> io::Result<DuplexStream> {
                let (near, far) = tokio::io::duplex(4096);
                drop(far);
                Ok(near)
            }

            fn addr(&self) -> &str {
                "dead:27017"
            }
        }

        let stats = Arc::new(MemoryStats::new());
        let pool = ConnectionPool::new(
            DeadUpstream,
            PoolOptions {
                max_connections: 2,
                ..PoolOptions::default()
            },
            stats.clone(),
            None,
        );
        let ctx = Arc::new(SessionContext {
            pool,
            admission: ClientAdmission::new(2),
            query: Arc::new(PassthroughQuery),
            stats: stats.clone(),
            closed: CancellationToken::new(),
            client_idle_timeout: Duration::from_secs(30),
            message_timeout: Duration::from_secs(5),
            get_last_error_timeout: Duration::from_secs(5),
        });

        let (client_side, far) = tokio::io::duplex(4096);
        let mut driver = far;
        let task = tokio::spawn(serve(ctx.clone(), Box::new(client_side), peer(4)));

        // GetMore expects a reply, but the upstream is gone.
        driver
            .write_all(&message(OpCode::GetMore, 1, b"more"))
            .await
            .unwrap();

        task.await.unwrap();
        assert_eq!(stats.counter("message.proxy.error"), 1);
        assert_eq!(stats.counter("client.error.disconnect"), 1);
        // The suspect entry was discarded, not pooled.
        assert_eq!(ctx.pool.idle_count(), 0);
        assert_eq!(ctx.pool.outstanding(), 0);
        assert!(ctx.admission.is_empty());
    }

    #[tokio::test]
    async fn shutdown_wakes_an_idle_session() {
        let h = harness(Duration::from_secs(5));
        let (client_side, _driver) = tokio::io::duplex(64);

        let task = tokio::spawn(serve(h.ctx.clone(), Box::new(client_side), peer(5)));
        tokio::time::sleep(Duration::from_millis(50)).await;

        h.ctx.closed.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("idle session must terminate promptly on shutdown")
            .unwrap();

        assert!(h.ctx.admission.is_empty());
        assert_eq!(h.stats.counter("client.connected"), 1);
    }
}
