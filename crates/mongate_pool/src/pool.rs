use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use mongate_stats::{Stats, StatsTimer};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinSet;
use tokio::time::{Instant, interval, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::conn::{Connector, PooledConn};
use crate::{CloseErrorHandler, PoolError, PoolOptions};

/// One idle upstream connection. The capacity permit travels with the entry,
/// so `idle + held` can never exceed `max_connections`.
struct IdleConn<T> {
    conn: T,
    released_at: Instant,
    permit: OwnedSemaphorePermit,
}

pub(crate) struct PoolShared<C: Connector> {
    connector: C,
    options: PoolOptions,
    semaphore: Arc<Semaphore>,
    idle: Mutex<Vec<IdleConn<C::Conn>>>,
    slot_free: Notify,
    closed: CancellationToken,
    stats: Arc<dyn Stats>,
    close_error_handler: CloseErrorHandler,
}

fn unpoisoned<'a, T>(result: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>) -> MutexGuard<'a, T> {
    result.unwrap_or_else(PoisonError::into_inner)
}

impl<C: Connector> PoolShared<C> {
    fn lock_idle(&self) -> MutexGuard<'_, Vec<IdleConn<C::Conn>>> {
        unpoisoned(self.idle.lock())
    }

    pub(crate) fn notify_slot(&self) {
        self.slot_free.notify_one();
    }

    /// Return a healthy connection to the idle set. During draining the
    /// release degrades to a discard.
    pub(crate) fn release(&self, conn: C::Conn, permit: Option<OwnedSemaphorePermit>) {
        let Some(permit) = permit else {
            drop(conn);
            return;
        };

        {
            let mut idle = self.lock_idle();
            if self.closed.is_cancelled() {
                drop(conn);
                drop(permit);
            } else {
                idle.push(IdleConn {
                    conn,
                    released_at: Instant::now(),
                    permit,
                });
            }
        }
        self.slot_free.notify_one();
    }

    /// Pop the freshest usable idle entry; stale entries found on the way
    /// are closed in the background.
    fn pop_idle(&self) -> Option<(C::Conn, OwnedSemaphorePermit)> {
        loop {
            let entry = self.lock_idle().pop()?;
            if entry.released_at.elapsed() <= self.options.idle_timeout {
                return Some((entry.conn, entry.permit));
            }
            debug!(
                target: "mongate::pool",
                upstream = %self.connector.addr(),
                "Dropping idle upstream connection past its idle timeout"
            );
            self.stats.bump("server.pool.conn.evicted");
            self.close_in_background(entry.conn);
            drop(entry.permit);
        }
    }

    fn close_in_background(&self, mut conn: C::Conn) {
        let handler = self.close_error_handler.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.shutdown().await {
                (handler)(e);
            }
        });
    }
}

/// Bounded pool of upstream connections. Cheap to clone; all clones share
/// the same idle set and capacity.
pub struct ConnectionPool<C: Connector> {
    shared: Arc<PoolShared<C>>,
}

impl<C: Connector> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<C: Connector> ConnectionPool<C> {
    pub fn new(
        connector: C,
        options: PoolOptions,
        stats: Arc<dyn Stats>,
        close_error_handler: Option<CloseErrorHandler>,
    ) -> Self {
        let close_error_handler = close_error_handler.unwrap_or_else(|| {
            Arc::new(|e: std::io::Error| {
                warn!(target: "mongate::pool", error = ?e, "Error closing upstream connection");
            })
        });
        let semaphore = Arc::new(Semaphore::new(options.max_connections));
        Self {
            shared: Arc::new(PoolShared {
                connector,
                options,
                semaphore,
                idle: Mutex::new(Vec::new()),
                slot_free: Notify::new(),
                closed: CancellationToken::new(),
                stats,
                close_error_handler,
            }),
        }
    }

    /// Acquire an exclusive upstream connection.
    ///
    /// Blocks until an idle entry is available or there is room to dial a
    /// new one; fails once the pool is closing or the upstream cannot be
    /// reached within the retry budget.
    pub async fn acquire(&self) -> Result<PooledConn<C>, PoolError> {
        let timer = StatsTimer::start(self.shared.stats.clone(), "server.pool.acquire.time");
        loop {
            if self.shared.closed.is_cancelled() {
                return Err(PoolError::Closed);
            }

            if let Some((conn, permit)) = self.shared.pop_idle() {
                // Forward the wakeup if more resources remain for other waiters.
                if !self.shared.lock_idle().is_empty()
                    || self.shared.semaphore.available_permits() > 0
                {
                    self.shared.slot_free.notify_one();
                }
                self.shared.stats.bump("server.pool.conn.reused");
                timer.stop();
                return Ok(self.guard(conn, permit));
            }

            match self.shared.semaphore.clone().try_acquire_owned() {
                Ok(permit) => {
                    let conn = match self.dial_with_retry().await {
                        Ok(conn) => conn,
                        Err(e) => {
                            drop(permit);
                            self.shared.slot_free.notify_one();
                            return Err(e);
                        }
                    };
                    self.shared.stats.bump("server.pool.conn.new");
                    timer.stop();
                    return Ok(self.guard(conn, permit));
                }
                Err(TryAcquireError::Closed) => return Err(PoolError::Closed),
                Err(TryAcquireError::NoPermits) => {}
            }

            tokio::select! {
                _ = self.shared.slot_free.notified() => {}
                _ = self.shared.closed.cancelled() => return Err(PoolError::Closed),
            }
        }
    }

    fn guard(&self, conn: C::Conn, permit: OwnedSemaphorePermit) -> PooledConn<C> {
        PooledConn {
            conn: Some(conn),
            permit: Some(permit),
            shared: self.shared.clone(),
        }
    }

    async fn dial_with_retry(&self) -> Result<C::Conn, PoolError> {
        let shared = &self.shared;
        let mut backoff = shared.options.dial_backoff_start;

        for attempt in 1..=shared.options.dial_attempts {
            match timeout(shared.options.connect_timeout, shared.connector.connect()).await {
                Ok(Ok(conn)) => {
                    debug!(
                        target: "mongate::pool",
                        upstream = %shared.connector.addr(),
                        attempt,
                        "Dialed new upstream connection"
                    );
                    return Ok(conn);
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "mongate::pool",
                        upstream = %shared.connector.addr(),
                        attempt,
                        error = ?e,
                        "Dial attempt failed"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "mongate::pool",
                        upstream = %shared.connector.addr(),
                        attempt,
                        "Dial attempt timed out"
                    );
                }
            }

            shared.stats.bump("server.pool.dial.retry");
            sleep(backoff).await;
            backoff *= 2;
        }

        Err(PoolError::CouldNotConnect {
            addr: shared.connector.addr().to_string(),
        })
    }

    /// Spawn the background sweeper: evicts idle entries past the idle
    /// timeout (never below the warm floor) and re-dials the floor while
    /// capacity allows. Sweeps every `idle_timeout / 2`, minimum one second.
    pub fn start_maintenance(&self) {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let period = (shared.options.idle_timeout / 2).max(Duration::from_secs(1));
            let mut ticker = interval(period);
            loop {
                tokio::select! {
                    _ = shared.closed.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                sweep(&shared).await;
            }
        });
    }

    /// Drain and close the pool. New acquisitions fail immediately; idle
    /// entries are closed with `close_pool_size` concurrent workers. Entries
    /// still held by sessions are discarded when their holders finish.
    pub async fn close(&self) {
        self.shared.closed.cancel();
        self.shared.slot_free.notify_waiters();

        let drained: Vec<IdleConn<C::Conn>> = self.shared.lock_idle().drain(..).collect();
        if drained.is_empty() {
            return;
        }

        info!(
            target: "mongate::pool",
            idle = drained.len(),
            workers = self.shared.options.close_pool_size.max(1),
            "Draining idle upstream connections"
        );

        let queue = Arc::new(Mutex::new(drained));
        let workers = self.shared.options.close_pool_size.max(1);
        let mut set = JoinSet::new();
        for _ in 0..workers {
            let queue = queue.clone();
            let handler = self.shared.close_error_handler.clone();
            set.spawn(async move {
                loop {
                    let entry = unpoisoned(queue.lock()).pop();
                    let Some(entry) = entry else { break };
                    let IdleConn {
                        mut conn, permit, ..
                    } = entry;
                    if let Err(e) = conn.shutdown().await {
                        (handler)(e);
                    }
                    drop(permit);
                }
            });
        }
        while set.join_next().await.is_some() {}
    }

    /// Outstanding entries: idle plus held.
    pub fn outstanding(&self) -> usize {
        self.shared.options.max_connections - self.shared.semaphore.available_permits()
    }

    /// Entries currently idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.shared.lock_idle().len()
    }
}

async fn sweep<C: Connector>(shared: &Arc<PoolShared<C>>) {
    let min_idle = shared.options.min_idle_connections;

    // Oldest entries sit at the front of the vec; evict while stale and
    // above the warm floor.
    let mut evicted = Vec::new();
    {
        let mut idle = shared.lock_idle();
        while idle.len() > min_idle {
            let stale = idle
                .first()
                .map(|e| e.released_at.elapsed() > shared.options.idle_timeout)
                .unwrap_or(false);
            if !stale {
                break;
            }
            evicted.push(idle.remove(0));
        }
    }

    for entry in evicted {
        let IdleConn {
            mut conn, permit, ..
        } = entry;
        shared.stats.bump("server.pool.conn.evicted");
        if let Err(e) = conn.shutdown().await {
            (shared.close_error_handler)(e);
        }
        drop(permit);
        shared.slot_free.notify_one();
    }

    // Warm floor: keep min_idle entries ready while capacity allows.
    loop {
        if shared.closed.is_cancelled() || shared.lock_idle().len() >= min_idle {
            break;
        }
        let Ok(permit) = shared.semaphore.clone().try_acquire_owned() else {
            break;
        };
        match timeout(shared.options.connect_timeout, shared.connector.connect()).await {
            Ok(Ok(conn)) => {
                shared.stats.bump("server.pool.conn.new");
                let mut idle = shared.lock_idle();
                if shared.closed.is_cancelled() {
                    drop(permit);
                    break;
                }
                idle.push(IdleConn {
                    conn,
                    released_at: Instant::now(),
                    permit,
                });
            }
            _ => {
                // Upstream unreachable; leave the floor for the next sweep.
                drop(permit);
                break;
            }
        }
    }
}
