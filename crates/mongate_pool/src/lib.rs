//! Bounded pool of upstream server connections.
//!
//! Every outstanding connection is either idle in the pool or exclusively
//! held by one caller through a [`PooledConn`] guard; the guard's drop path
//! counts as a discard, so partial failures cannot leak entries. Dialing
//! retries with exponential backoff and runs the configured authentication
//! handshake before an entry ever enters the pool.

mod conn;
mod pool;

pub use conn::{Connector, PooledConn};
pub use pool::ConnectionPool;

use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Hook invoked with errors observed while closing entries during idle
/// eviction or shutdown drain. Never propagated to callers.
pub type CloseErrorHandler = Arc<dyn Fn(io::Error) + Send + Sync>;

/// Errors surfaced by [`ConnectionPool::acquire`].
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("pool is closed")]
    Closed,

    #[error("could not connect to {addr}")]
    CouldNotConnect { addr: String },
}

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Maximum outstanding connections, idle plus held.
    pub max_connections: usize,

    /// Idle connections kept warm while capacity allows.
    pub min_idle_connections: usize,

    /// Idle entries older than this are closed by the sweeper.
    pub idle_timeout: Duration,

    /// Concurrency used to close idle entries during shutdown drain.
    pub close_pool_size: usize,

    /// Per-attempt connect deadline.
    pub connect_timeout: Duration,

    /// Dial attempts before acquire gives up.
    pub dial_attempts: u32,

    /// First backoff sleep; doubles after every failed attempt.
    pub dial_backoff_start: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: 100,
            min_idle_connections: 0,
            idle_timeout: Duration::from_secs(3600),
            close_pool_size: 16,
            connect_timeout: Duration::from_secs(1),
            dial_attempts: 7,
            dial_backoff_start: Duration::from_millis(50),
        }
    }
}
