use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::header::{HEADER_LEN, MessageHeader};

/// Errors surfaced by the framing helpers.
///
/// [`FrameError::Closed`] is the normal-close case: end of stream before any
/// header byte arrived. A stream that dies mid-header or mid-body surfaces as
/// an I/O error instead.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("connection closed")]
    Closed,

    #[error("message length {0} is shorter than the header")]
    BadLength(u32),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FrameError {
    pub fn is_normal_close(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Read exactly one 16-byte header and decode it.
pub async fn read_header<R>(src: &mut R) -> Result<MessageHeader, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut raw = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let n = src.read(&mut raw[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Err(FrameError::Closed);
            }
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        filled += n;
    }

    let header = MessageHeader::decode(&raw);
    if header.message_length < HEADER_LEN as u32 {
        return Err(FrameError::BadLength(header.message_length));
    }
    Ok(header)
}

/// Write the 16 header bytes unchanged.
pub async fn write_header<W>(dst: &mut W, header: &MessageHeader) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    dst.write_all(&header.encode()).await?;
    Ok(())
}

/// Copy exactly `n` bytes from `src` to `dst`.
pub async fn copy_n<R, W>(dst: &mut W, src: &mut R, n: u64) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut scratch = [0u8; 8192];
    let mut remaining = n;
    while remaining > 0 {
        let want = scratch.len().min(usize::try_from(remaining).unwrap_or(scratch.len()));
        let got = src.read(&mut scratch[..want]).await?;
        if got == 0 {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        dst.write_all(&scratch[..got]).await?;
        remaining -= got as u64;
    }
    dst.flush().await?;
    Ok(())
}

/// Copy one full message (header plus body) from `src` to `dst`, preserving
/// every byte. Returns the forwarded header.
pub async fn copy_message<R, W>(dst: &mut W, src: &mut R) -> Result<MessageHeader, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let header = read_header(src).await?;
    write_header(dst, &header).await?;
    copy_n(dst, src, header.body_len()).await?;
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::OpCode;

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
    async fn read_header_classifies_clean_eof() {
        let (mut client, server) = tokio::io::duplex(64);
        drop(server);
        let err = read_header(&mut client).await.unwrap_err();
        assert!(err.is_normal_close());
    }

    #[tokio::test]
    async fn read_header_rejects_truncated_header() {
        let (mut client, mut server) = tokio::io::duplex(64);
        server.write_all(&[1, 2, 3]).await.unwrap();
        drop(server);
        let err = read_header(&mut client).await.unwrap_err();
        assert!(!err.is_normal_close());
        assert!(matches!(err, FrameError::Io(_)));
    }

    #[tokio::test]
    async fn read_header_rejects_undersized_length() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let raw = MessageHeader {
            message_length: 8,
            request_id: 1,
            response_to: 0,
            op_code: OpCode::Query,
        }
        .encode();
        server.write_all(&raw).await.unwrap();
        let err = read_header(&mut client).await.unwrap_err();
        assert!(matches!(err, FrameError::BadLength(8)));
    }

    #[tokio::test]
    async fn copy_message_is_byte_exact() {
        let wire = message(OpCode::Insert, 42, b"opaque-bson-bytes");

        let (mut src_read, mut src_write) = tokio::io::duplex(256);
        let (mut dst_read, mut dst_write) = tokio::io::duplex(256);
        src_write.write_all(&wire).await.unwrap();

        let header = copy_message(&mut dst_write, &mut src_read).await.unwrap();
        assert_eq!(header.op_code, OpCode::Insert);
        assert_eq!(header.request_id, 42);

        let mut forwarded = vec![0u8; wire.len()];
        dst_read.read_exact(&mut forwarded).await.unwrap();
        assert_eq!(forwarded, wire);
    }

    #[tokio::test]
    async fn copy_n_fails_on_short_body() {
        let (mut src_read, mut src_write) = tokio::io::duplex(64);
        let (_dst_read, mut dst_write) = tokio::io::duplex(64);
        src_write.write_all(b"only-9-by").await.unwrap();
        drop(src_write);

        let err = copy_n(&mut dst_write, &mut src_read, 32).await.unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
    }
}
