use std::fmt::Write as _;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Whether the diagnostic tee is switched on for this process.
pub fn tee_enabled() -> bool {
    std::env::var("MONGATE_TEE").map(|v| v == "1").unwrap_or(false)
}

/// Wraps a stream and prints every transferred byte to stdout with a context
/// tag. Development aid only; with the tee on, throughput drops.
pub struct Tee<S> {
    inner: S,
    tag: String,
}

impl<S> Tee<S> {
    pub fn new(inner: S, tag: impl Into<String>) -> Self {
        Self {
            inner,
            tag: tag.into(),
        }
    }
}

fn dump(tag: &str, direction: &str, chunk: &[u8]) {
    let mut hex = String::with_capacity(chunk.len() * 2);
    for byte in chunk {
        let _ = write!(hex, "{byte:02x}");
    }
    println!("[tee {tag}] {direction} {} bytes: {hex}", chunk.len());
}

impl<S: AsyncRead + Unpin> AsyncRead for Tee<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let chunk = &buf.filled()[before..];
                if !chunk.is_empty() {
                    dump(&this.tag, "read", chunk);
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Tee<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                if n > 0 {
                    dump(&this.tag, "write", &buf[..n]);
                }
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
