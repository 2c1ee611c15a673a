use std::io;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::OwnedSemaphorePermit;

use crate::pool::PoolShared;

/// Dials and authenticates one upstream connection.
///
/// The pool drives retry, backoff, and the per-attempt connect timeout;
/// implementations only perform a single dial (plus handshake) per call.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
    type Conn: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn connect(&self) -> io::Result<Self::Conn>;

    /// Upstream address, used in logs and in the terminal acquire error.
    fn addr(&self) -> &str;
}

#[async_trait::async_trait]
impl<C: Connector> Connector for Arc<C> {
    type Conn = C::Conn;

    async fn connect(&self) -> io::Result<Self::Conn> {
        self.as_ref().connect().await
    }

    fn addr(&self) -> &str {
        self.as_ref().addr()
    }
}

/// Exclusive handle on one pooled upstream connection.
///
/// Callers must finish with [`PooledConn::release`] when the entry is healthy
/// or [`PooledConn::discard`] after observing any I/O error on it. Dropping
/// the guard without releasing counts as a discard: the socket is closed and
/// the capacity slot freed, so no exit path can leak an entry.
pub struct PooledConn<C: Connector> {
    pub(crate) conn: Option<C::Conn>,
    pub(crate) permit: Option<OwnedSemaphorePermit>,
    pub(crate) shared: Arc<PoolShared<C>>,
}

impl<C: Connector> std::fmt::Debug for PooledConn<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConn").finish_non_exhaustive()
    }
}

impl<C: Connector> PooledConn<C> {
    /// Return a healthy entry to the idle set, timestamped now.
    ///
    /// If the pool is draining the entry is discarded instead.
    pub fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            let permit = self.permit.take();
            self.shared.release(conn, permit);
        }
    }

    /// Close the entry and free its capacity slot.
    pub fn discard(mut self) {
        self.drop_entry();
    }

    fn drop_entry(&mut self) {
        if self.conn.take().is_some() {
            // Dropping the connection closes it; dropping the permit frees
            // the slot for the next acquirer.
            self.permit.take();
            self.shared.notify_slot();
        }
    }
}

impl<C: Connector> Drop for PooledConn<C> {
    fn drop(&mut self) {
        self.drop_entry();
    }
}

impl<C: Connector> Deref for PooledConn<C> {
    type Target = C::Conn;

    fn deref(&self) -> &C::Conn {
        self.conn.as_ref().expect("pooled connection already consumed")
    }
}

impl<C: Connector> DerefMut for PooledConn<C> {
    fn deref_mut(&mut self) -> &mut C::Conn {
        self.conn.as_mut().expect("pooled connection already consumed")
    }
}
