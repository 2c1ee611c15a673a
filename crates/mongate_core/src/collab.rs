use std::io;

use async_trait::async_trait;
use mongate_config::Credentials;
use mongate_wire::{MessageHeader, copy_message, copy_n, write_header};

use crate::forward::ForwardError;
use crate::last_error::LastErrorWindow;
use crate::ClientStream;

/// Handles the `OpQuery` path of a forwarded exchange.
///
/// This is the only component allowed to inspect or populate the session's
/// [`LastErrorWindow`]; the query-rewriting proxy of a full deployment plugs
/// in here. Implementations must honor message framing: exactly one request
/// consumed from `client`, exactly one reply delivered back.
#[async_trait]
pub trait QueryProxy: Send + Sync {
    async fn proxy(
        &self,
        header: &MessageHeader,
        client: &mut dyn ClientStream,
        server: &mut dyn ClientStream,
        last_error: &mut LastErrorWindow,
    ) -> Result<(), ForwardError>;
}

/// Forwards queries byte-exact without rewriting and without touching the
/// last-error window. The default when no query rewriter is plugged in.
#[derive(Debug, Default)]
pub struct PassthroughQuery;

#[async_trait]
impl QueryProxy for PassthroughQuery {
    async fn proxy(
        &self,
        header: &MessageHeader,
        client: &mut dyn ClientStream,
        server: &mut dyn ClientStream,
        _last_error: &mut LastErrorWindow,
    ) -> Result<(), ForwardError> {
        write_header(server, header).await?;
        copy_n(server, client, header.body_len()).await?;
        copy_message(client, server).await?;
        Ok(())
    }
}

/// Runs the MongoDB authentication handshake on a freshly dialed upstream
/// connection. The byte-level exchange lives outside the core; a failed
/// handshake counts as a failed dial attempt.
#[async_trait]
pub trait AuthHandshake: Send + Sync {
    async fn authenticate(
        &self,
        conn: &mut dyn ClientStream,
        credentials: &Credentials,
    ) -> io::Result<()>;
}

/// Placeholder handshake that accepts every connection without exchanging
/// bytes. Stands in until a real handshake implementation is wired up.
#[derive(Debug, Default)]
pub struct NoAuth;

#[async_trait]
impl AuthHandshake for NoAuth {
    async fn authenticate(
        &self,
        _conn: &mut dyn ClientStream,
        _credentials: &Credentials,
    ) -> io::Result<()> {
        Ok(())
    }
}
