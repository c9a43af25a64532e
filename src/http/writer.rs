use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::http::headers::Headers;
use crate::http::request::Version;
use crate::http::response::StatusCode;

/// Terminal frame of a chunked body.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// A unit of output handed from a response to the connection's writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Status line and headers, followed by a fully buffered body (possibly
    /// empty). Written back to back.
    Message { head: Bytes, body: Bytes },
    /// An already framed piece of a chunked body.
    Chunk(Bytes),
    /// Shut the connection down once everything queued before it is written.
    Close,
}

/// Sending side of a connection's output queue.
///
/// Cheap to clone and usable from any task, which is what lets a suspended
/// response finish from outside the connection's own task. Once the writer is
/// gone, sends are silently dropped.
#[derive(Debug, Clone)]
pub struct FrameSink {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl FrameSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queues a frame. Returns `false` if the connection is already gone.
    pub fn send(&self, frame: Outbound) -> bool {
        self.tx.send(frame).is_ok()
    }

    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Resolves once the writer has stopped taking frames.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Serializes the status line and header block, including the blank line.
pub fn encode_head(version: Version, status: StatusCode, headers: &Headers) -> Bytes {
    let mut buf = BytesMut::with_capacity(128 + headers.len() * 32);

    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        version.as_str(),
        status.as_u16(),
        status.reason_phrase()
    );
    buf.put_slice(status_line.as_bytes());

    // Headers
    for (k, v) in headers.iter() {
        buf.put_slice(k.as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(v.as_bytes());
        buf.put_slice(b"\r\n");
    }

    // Header/body separator
    buf.put_slice(b"\r\n");

    buf.freeze()
}

/// Frames `data` as one chunk: hex size line, data, CRLF.
pub fn encode_chunk(data: &[u8]) -> Bytes {
    let size_line = format!("{:x}\r\n", data.len());
    let mut buf = BytesMut::with_capacity(size_line.len() + data.len() + 2);
    buf.put_slice(size_line.as_bytes());
    buf.put_slice(data);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Drains a connection's output queue into the socket.
pub struct ResponseWriter {
    rx: mpsc::UnboundedReceiver<Outbound>,
    written: u64,
}

impl ResponseWriter {
    pub fn new(rx: mpsc::UnboundedReceiver<Outbound>) -> Self {
        Self { rx, written: 0 }
    }

    /// Writes frames in queue order until a `Close` frame arrives or every
    /// sender is dropped. Returns the number of bytes written.
    pub async fn run<W>(mut self, mut stream: W) -> anyhow::Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        while let Some(frame) = self.rx.recv().await {
            match frame {
                Outbound::Message { head, body } => {
                    self.write_all(&mut stream, &head).await?;
                    self.write_all(&mut stream, &body).await?;
                }
                Outbound::Chunk(chunk) => {
                    self.write_all(&mut stream, &chunk).await?;
                }
                Outbound::Close => {
                    tracing::trace!(bytes = self.written, "closing connection after flush");
                    break;
                }
            }
            stream.flush().await?;
        }

        // Refuse anything a late finish() might still try to queue.
        self.rx.close();
        stream.shutdown().await?;

        Ok(self.written)
    }

    async fn write_all<W>(&mut self, stream: &mut W, buf: &[u8]) -> anyhow::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let mut offset = 0;
        while offset < buf.len() {
            let n = stream.write(&buf[offset..]).await?;

            if n == 0 {
                return Err(anyhow::anyhow!("connection closed while writing"));
            }

            offset += n;
        }
        self.written += buf.len() as u64;
        Ok(())
    }
}
