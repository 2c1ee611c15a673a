//! Proxy lifecycle: bind, accept, spawn serve tasks, shut down.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mongate_config::ProxyConfig;
use mongate_pool::{ConnectionPool, Connector, PoolOptions};
use mongate_stats::Stats;
use mongate_wire::{Tee, tee_enabled};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::ClientStream;
use crate::admission::ClientAdmission;
use crate::collab::{NoAuth, PassthroughQuery, QueryProxy};
use crate::connector::MongoConnector;
use crate::session::{self, SessionContext};

/// The proxy server: owns the upstream pool, the admission counter, and the
/// accept loop. Sessions are tracked so a graceful stop can drain them.
pub struct Proxy<C: Connector> {
    cfg: Arc<ProxyConfig>,
    ctx: Arc<SessionContext<C>>,
    tracker: TaskTracker,
}

impl Proxy<MongoConnector> {
    /// Build a proxy for the configured MongoDB address, forwarding queries
    /// byte-exact. When credentials are configured the dialer runs the
    /// placeholder handshake; plug a real [`crate::AuthHandshake`] through
    /// [`Proxy::with_parts`] to enable authentication.
    pub fn new(cfg: ProxyConfig, stats: Arc<dyn Stats>) -> Self {
        let connector = match cfg.mongo.credentials() {
            Some(credentials) => {
                MongoConnector::with_auth(cfg.mongo.addr(), credentials, Arc::new(NoAuth))
            }
            None => MongoConnector::new(cfg.mongo.addr()),
        };
        Self::with_parts(cfg, connector, Arc::new(PassthroughQuery), stats)
    }
}

impl<C: Connector> Proxy<C> {
    /// Build a proxy from explicit collaborators.
    pub fn with_parts(
        cfg: ProxyConfig,
        connector: C,
        query: Arc<dyn QueryProxy>,
        stats: Arc<dyn Stats>,
    ) -> Self {
        let options = PoolOptions {
            max_connections: cfg.pool.max_connections,
            min_idle_connections: cfg.pool.min_idle_connections,
            idle_timeout: Duration::from_secs(cfg.pool.idle_timeout_secs),
            close_pool_size: cfg.pool.close_pool_size,
            ..PoolOptions::default()
        };
        let pool = ConnectionPool::new(connector, options, stats.clone(), None);
        let ctx = Arc::new(SessionContext {
            pool,
            admission: ClientAdmission::new(cfg.proxy.max_client_connections_per_ip),
            query,
            stats,
            closed: CancellationToken::new(),
            client_idle_timeout: Duration::from_secs(cfg.proxy.client_idle_timeout_secs),
            message_timeout: Duration::from_secs(cfg.proxy.message_timeout_secs),
            get_last_error_timeout: Duration::from_secs(cfg.proxy.get_last_error_timeout_secs),
        });
        Self {
            cfg: Arc::new(cfg),
            ctx,
            tracker: TaskTracker::new(),
        }
    }

    /// Validate the configuration, bind the listener, and spawn the accept
    /// loop. Returns the bound address.
    pub async fn start(&self) -> anyhow::Result<SocketAddr> {
        let report = self.cfg.validate();
        if report.has_errors() {
            anyhow::bail!("invalid configuration:\n{}", report.format());
        }

        let listener = bind_listener(self.cfg.proxy.listen()).await?;
        let local_addr = listener.local_addr()?;

        self.ctx.pool.start_maintenance();

        info!(
            target: "mongate::master",
            listen = %local_addr,
            upstream = %self.cfg.mongo.addr(),
            max_connections = self.cfg.pool.max_connections,
            max_per_ip = self.cfg.proxy.max_client_connections_per_ip,
            "Proxy started"
        );

        let ctx = self.ctx.clone();
        let tracker = self.tracker.clone();
        tokio::spawn(accept_loop(listener, ctx, tracker));

        Ok(local_addr)
    }

    /// Stop the proxy: close the listener, wake idle sessions, and (unless
    /// `hard`) wait for in-flight sessions to drain before closing the pool.
    pub async fn stop(&self, hard: bool) -> anyhow::Result<()> {
        info!(target: "mongate::master", hard, "Stopping proxy");
        self.ctx.closed.cancel();
        self.tracker.close();
        if !hard {
            self.tracker.wait().await;
        }
        self.ctx.pool.close().await;
        info!(target: "mongate::master", "Proxy stopped");
        Ok(())
    }

    /// Outstanding upstream entries, idle plus held.
    pub fn pool_outstanding(&self) -> usize {
        self.ctx.pool.outstanding()
    }

    /// Upstream entries currently idle in the pool.
    pub fn pool_idle_count(&self) -> usize {
        self.ctx.pool.idle_count()
    }

    /// True when no client IP has a live session.
    pub fn admission_is_empty(&self) -> bool {
        self.ctx.admission.is_empty()
    }
}

async fn bind_listener(listen_addr: &str) -> anyhow::Result<TcpListener> {
    info!(
        target: "mongate::master",
        listen = %listen_addr,
        "Binding listener"
    );

    match TcpListener::bind(listen_addr).await {
        Ok(listener) => Ok(listener),
        Err(e) => {
            error!(
                target: "mongate::master",
                listen = %listen_addr,
                error = ?e,
                "Failed to bind listener"
            );
            Err(e.into())
        }
    }
}

async fn accept_loop<C: Connector>(
    listener: TcpListener,
    ctx: Arc<SessionContext<C>>,
    tracker: TaskTracker,
) {
    loop {
        let accepted = tokio::select! {
            _ = ctx.closed.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                error!(
                    target: "mongate::master",
                    error = ?e,
                    "Failed to accept connection"
                );
                continue;
            }
        };

        configure_keepalive(&stream);

        let client: Box<dyn ClientStream> = if tee_enabled() {
            Box::new(Tee::new(stream, format!("client {peer}")))
        } else {
            Box::new(stream)
        };

        debug!(
            target: "mongate::master",
            client = %peer,
            "Connection accepted"
        );

        let ctx = ctx.clone();
        tracker.spawn(session::serve(ctx, client, peer));
    }

    // Dropping the listener here closes it.
    debug!(target: "mongate::master", "Accept loop exited");
}

/// Enable TCP keep-alive with a 2-minute probe period so half-dead clients
/// are noticed between exchanges.
fn configure_keepalive(stream: &TcpStream) {
    let sock_ref = socket2::SockRef::from(stream);
    let keepalive = socket2::TcpKeepalive::new().with_time(Duration::from_secs(120));
    if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
        warn!(
            target: "mongate::master",
            error = ?e,
            "Failed to enable TCP keep-alive on client socket"
        );
    }
}
