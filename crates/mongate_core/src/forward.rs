use std::time::Duration;

use mongate_wire::{FrameError, MessageHeader, OpCode, copy_message, copy_n, write_header};
use tokio::time::{Instant, timeout_at};

use crate::ClientStream;
use crate::collab::QueryProxy;
use crate::last_error::LastErrorWindow;

/// Outcome of one failed forward.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    /// The unified message deadline expired on either socket.
    #[error("forwarding timed out")]
    Timeout,

    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl ForwardError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// Forward one client→server exchange whose header has already been read.
///
/// A single deadline of `message_timeout` from now covers every read and
/// write on both sockets, including the response for ops that expect one.
/// Any error aborts the step; the caller must discard the upstream entry on
/// failure, since the exchange may have left it mid-message.
pub async fn proxy_message(
    header: &MessageHeader,
    client: &mut dyn ClientStream,
    server: &mut dyn ClientStream,
    last_error: &mut LastErrorWindow,
    query: &dyn QueryProxy,
    message_timeout: Duration,
) -> Result<(), ForwardError> {
    let deadline = Instant::now() + message_timeout;
    match timeout_at(deadline, forward(header, client, server, last_error, query)).await {
        Ok(result) => result,
        Err(_) => Err(ForwardError::Timeout),
    }
}

async fn forward(
    header: &MessageHeader,
    client: &mut dyn ClientStream,
    server: &mut dyn ClientStream,
    last_error: &mut LastErrorWindow,
    query: &dyn QueryProxy,
) -> Result<(), ForwardError> {
    if header.op_code == OpCode::Query {
        return query.proxy(header, client, server, last_error).await;
    }

    // Any non-query op invalidates a pending getLastError context.
    if last_error.exists() {
        last_error.reset();
    }

    write_header(server, header).await?;
    copy_n(server, client, header.body_len()).await?;

    if header.op_code.has_response() {
        copy_message(client, server).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::PassthroughQuery;
    use bytes::Bytes;
    use mongate_wire::HEADER_LEN;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn header(op: OpCode, body_len: usize) -> MessageHeader {
        MessageHeader {
            message_length: (HEADER_LEN + body_len) as u32,
            request_id: 11,
            response_to: 0,
            op_code: op,
        }
    }

    #[tokio::test]
    async fn forwards_mutation_one_way_and_clears_last_error() {
        let (mut client_near, mut client_far) = tokio::io::duplex(256);
        let (mut server_near, mut server_far) = tokio::io::duplex(256);

        let h = header(OpCode::Insert, 8);
        client_far.write_all(b"12345678").await.unwrap();

        let mut last_error = LastErrorWindow::default();
        last_error.set(Bytes::from_static(b"stale"));

        proxy_message(
            &h,
            &mut client_near,
            &mut server_near,
            &mut last_error,
            &PassthroughQuery,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert!(!last_error.exists());

        let mut seen = vec![0u8; HEADER_LEN + 8];
        server_far.read_exact(&mut seen).await.unwrap();
        assert_eq!(&seen[..HEADER_LEN], &h.encode());
        assert_eq!(&seen[HEADER_LEN..], b"12345678");
    }

    #[tokio::test]
    async fn relays_the_response_for_ops_that_expect_one() {
        let (mut client_near, mut client_far) = tokio::io::duplex(256);
        let (mut server_near, mut server_far) = tokio::io::duplex(256);

        let h = header(OpCode::GetMore, 4);
        client_far.write_all(b"body").await.unwrap();

        let reply = header(OpCode::Reply, 6);
        let server_task = tokio::spawn(async move {
            let mut request = vec![0u8; HEADER_LEN + 4];
            server_far.read_exact(&mut request).await.unwrap();
            server_far.write_all(&reply.encode()).await.unwrap();
            server_far.write_all(b"cursor").await.unwrap();
            server_far
        });

        let mut last_error = LastErrorWindow::default();
        proxy_message(
            &h,
            &mut client_near,
            &mut server_near,
            &mut last_error,
            &PassthroughQuery,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        server_task.await.unwrap();

        let mut delivered = vec![0u8; HEADER_LEN + 6];
        client_far.read_exact(&mut delivered).await.unwrap();
        assert_eq!(&delivered[..HEADER_LEN], &reply.encode());
        assert_eq!(&delivered[HEADER_LEN..], b"cursor");
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_body_hits_the_message_deadline() {
        let (mut client_near, _client_far) = tokio::io::duplex(256);
        let (mut server_near, _server_far) = tokio::io::duplex(256);

        // Header promises a body that never arrives.
        let h = header(OpCode::Insert, 1024 * 1024);
        let mut last_error = LastErrorWindow::default();

        let err = proxy_message(
            &h,
            &mut client_near,
            &mut server_near,
            &mut last_error,
            &PassthroughQuery,
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();

        assert!(err.is_timeout());
    }
}
