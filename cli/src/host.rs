//! Request loop: reads protocol lines, writes replies.

use std::sync::Arc;

use ktimer_core::protocol::{self, MAX_LINE_LEN, Response};
use ktimer_core::{ProtocolError, Registry, Subscription};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Output shared by request replies and expiration notices, so blocks
/// from the two never interleave.
pub type SharedWriter<W> = Arc<Mutex<W>>;

/// Outcome of reading one request line.
enum Frame {
    Eof,
    Line,
    TooLong,
}

/// Read up to and including the next `\n` into `buf`, holding at most
/// `MAX_LINE_LEN` bytes. The rest of an oversized line is skipped.
async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = (MAX_LINE_LEN + 1) as u64;
    if (&mut *reader).take(limit).read_until(b'\n', buf).await? == 0 {
        return Ok(Frame::Eof);
    }
    if buf.len() <= MAX_LINE_LEN {
        return Ok(Frame::Line);
    }
    if !buf.ends_with(b"\n") {
        skip_line(reader).await?;
    }
    Ok(Frame::TooLong)
}

async fn skip_line<R>(reader: &mut R) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                reader.consume(pos + 1);
                return Ok(());
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
}

/// Serve requests from `reader` until EOF or `QUIT`.
///
/// Returns the number of requests answered. Lines that cannot be decoded
/// are answered with `ERR EINVAL` and the session goes on.
pub async fn serve<R, W>(
    registry: &Registry,
    mut reader: R,
    writer: SharedWriter<W>,
) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut served = 0;
    let mut buf = Vec::new();

    loop {
        let response = match read_frame(&mut reader, &mut buf).await? {
            Frame::Eof => break,
            Frame::TooLong => {
                tracing::debug!(max = MAX_LINE_LEN, "request line too long");
                Response::Malformed(ProtocolError::LineTooLong { max: MAX_LINE_LEN })
            }
            Frame::Line => match std::str::from_utf8(&buf) {
                Err(e) => {
                    tracing::debug!(error = %e, "request is not valid UTF-8");
                    Response::Malformed(ProtocolError::InvalidUtf8)
                }
                Ok(line) => {
                    let request = line.trim_end_matches(['\n', '\r']);
                    if request.trim().is_empty() {
                        continue;
                    }
                    if request.trim() == "QUIT" {
                        break;
                    }
                    let response = protocol::serve_line(registry, line).await;
                    if response.is_error() {
                        tracing::debug!(request, reply = %response, "request failed");
                    }
                    response
                }
            },
        };

        reply(&writer, &response).await?;
        served += 1;
    }

    Ok(served)
}

async fn reply<W>(writer: &SharedWriter<W>, response: &Response) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut out = writer.lock().await;
    out.write_all(response.to_string().as_bytes()).await?;
    out.flush().await
}

/// Forward expirations to `writer` as `EXPIRED <key>` lines.
pub fn spawn_notifier<W>(mut subscription: Subscription, writer: SharedWriter<W>) -> JoinHandle<()>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(expiration) = subscription.recv().await {
            let mut out = writer.lock().await;
            let notice = format!("EXPIRED {}\n", expiration.key);
            if let Err(e) = out.write_all(notice.as_bytes()).await {
                tracing::warn!(error = %e, "failed to write expiration notice");
                break;
            }
            let _ = out.flush().await;
        }
    })
}
