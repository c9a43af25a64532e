use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadHalf};
use tokio::sync::watch;

use crate::http::parser::{ParseError, parse_with_limit};
use crate::http::request::RequestFrame;
use crate::http::response::StatusCode;
use crate::http::writer::{FrameSink, ResponseWriter};
use crate::server::dispatch::{Dispatcher, Outcome};
use crate::server::pool::SlotId;

/// How long a connection turned away at admission gets to send its request
/// before it is closed without an answer.
const REJECT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// One client connection.
///
/// The reading side runs the state machine below; the writing side is a
/// [`ResponseWriter`] draining the connection's output queue. Both live in
/// the same task, so aborting the task closes the socket.
pub struct Connection<S> {
    stream: S,
    peer: Option<SocketAddr>,
    dispatcher: Arc<Dispatcher>,
    shutdown: watch::Receiver<bool>,
    admitted: bool,
}

pub enum ConnectionState {
    Reading,
    Dispatching(RequestFrame),
    /// Answer with this status and close.
    Rejecting(StatusCode),
    Closed,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    pub fn new(stream: S, dispatcher: Arc<Dispatcher>) -> Self {
        // The sender is dropped at once, so this receiver never signals.
        let (_, shutdown) = watch::channel(false);
        Self {
            stream,
            peer: None,
            dispatcher,
            shutdown,
            admitted: true,
        }
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Idle connections close once `shutdown` turns `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// A connection that was not admitted reads one request, answers
    /// `503 Service Unavailable` and closes.
    pub fn admitted(mut self, admitted: bool) -> Self {
        self.admitted = admitted;
        self
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let max_request_size = self.dispatcher.config().request_size_limit();
        let (reader, writer) = tokio::io::split(self.stream);
        let (sink, rx) = FrameSink::channel();

        let session = Session {
            reader,
            buffer: BytesMut::with_capacity(4096),
            max_request_size,
            state: ConnectionState::Reading,
            slot: SlotId::new(),
            peer: self.peer,
            dispatcher: self.dispatcher,
            shutdown: self.shutdown,
            admitted: self.admitted,
            sink,
        };

        let (served, written) = tokio::join!(session.run(), ResponseWriter::new(rx).run(writer));

        match written {
            Ok(bytes) => tracing::trace!(peer = ?self.peer, bytes, "connection output drained"),
            Err(e) => tracing::debug!(peer = ?self.peer, error = %e, "connection write failed"),
        }

        served
    }
}

enum ReadError {
    Parse(ParseError),
    Io(std::io::Error),
}

impl From<std::io::Error> for ReadError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Reading half of a running connection.
struct Session<S> {
    reader: ReadHalf<S>,
    buffer: BytesMut,
    max_request_size: usize,
    state: ConnectionState,
    slot: SlotId,
    peer: Option<SocketAddr>,
    dispatcher: Arc<Dispatcher>,
    shutdown: watch::Receiver<bool>,
    admitted: bool,
    sink: FrameSink,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Send,
{
    async fn run(mut self) -> anyhow::Result<()> {
        let result = self.drive().await;

        // Drop the slot's pooled pair, which still holds a sink clone, so the
        // writer sees every sender gone.
        self.dispatcher.pool().free_after_keep_alive(self.slot);
        self.sink.close();

        result
    }

    async fn drive(&mut self) -> anyhow::Result<()> {
        loop {
            let state = std::mem::replace(&mut self.state, ConnectionState::Closed);

            self.state = match state {
                ConnectionState::Reading => {
                    let read = if self.admitted {
                        self.read_request().await
                    } else {
                        tokio::time::timeout(REJECT_READ_TIMEOUT, self.read_request())
                            .await
                            .unwrap_or(Ok(None))
                    };

                    match read {
                        Ok(Some(frame)) if self.admitted => ConnectionState::Dispatching(frame),
                        Ok(Some(_)) => ConnectionState::Rejecting(StatusCode::ServiceUnavailable),
                        // Client closed the connection
                        Ok(None) => ConnectionState::Closed,
                        Err(ReadError::Parse(e)) => {
                            tracing::debug!(peer = ?self.peer, error = ?e, "malformed request");
                            ConnectionState::Rejecting(status_for(e))
                        }
                        Err(ReadError::Io(e)) => return Err(e.into()),
                    }
                }

                ConnectionState::Dispatching(frame) => {
                    let dispatch = self.dispatcher.dispatch(self.slot, frame, &self.sink, self.peer);
                    tokio::pin!(dispatch);

                    // Keep reading while a response is pending so a client
                    // that goes away is noticed. Bytes that arrive belong to
                    // the next request.
                    let mut client_gone = false;
                    let outcome = loop {
                        tokio::select! {
                            biased;

                            outcome = &mut dispatch => break outcome,

                            read = self.reader.read_buf(&mut self.buffer),
                                if !client_gone && self.buffer.len() < self.max_request_size =>
                            {
                                match read {
                                    Ok(0) => {
                                        tracing::debug!(peer = ?self.peer, "client closed during dispatch");
                                        client_gone = true;
                                    }
                                    Err(e) => {
                                        tracing::debug!(peer = ?self.peer, error = %e, "read failed during dispatch");
                                        client_gone = true;
                                    }
                                    Ok(_) => {}
                                }
                                if client_gone {
                                    // Stops the writer, which closes the
                                    // output queue for the pending response.
                                    self.sink.close();
                                }
                            }
                        }
                    };

                    match outcome {
                        Outcome::KeepAlive if !client_gone => ConnectionState::Reading,
                        _ => ConnectionState::Closed,
                    }
                }

                ConnectionState::Rejecting(status) => {
                    self.dispatcher.reject(&self.sink, status);
                    ConnectionState::Closed
                }

                ConnectionState::Closed => break,
            };
        }

        Ok(())
    }

    /// Reads until one complete request is buffered. `None` means the client
    /// went away, or shutdown was requested while no request was in progress.
    async fn read_request(&mut self) -> Result<Option<RequestFrame>, ReadError> {
        loop {
            if !self.buffer.is_empty() {
                match parse_with_limit(&self.buffer, self.max_request_size) {
                    Ok((frame, consumed)) => {
                        self.buffer.advance(consumed);
                        return Ok(Some(frame));
                    }
                    Err(ParseError::Incomplete) => {}
                    Err(e) => return Err(ReadError::Parse(e)),
                }
            }

            let idle = self.buffer.is_empty();

            tokio::select! {
                read = self.reader.read_buf(&mut self.buffer) => {
                    if read? == 0 {
                        return Ok(None);
                    }
                }
                () = shutdown_requested(&mut self.shutdown), if idle => {
                    tracing::debug!(peer = ?self.peer, "closing idle connection for shutdown");
                    return Ok(None);
                }
            }
        }
    }
}

fn status_for(error: ParseError) -> StatusCode {
    match error {
        ParseError::TooLarge => StatusCode::PayloadTooLarge,
        ParseError::UnsupportedTransferEncoding => StatusCode::NotImplemented,
        _ => StatusCode::BadRequest,
    }
}

/// Resolves once the flag is `true`. Never resolves if the sender is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_map_to_statuses() {
        assert_eq!(status_for(ParseError::TooLarge), StatusCode::PayloadTooLarge);
        assert_eq!(
            status_for(ParseError::UnsupportedTransferEncoding),
            StatusCode::NotImplemented
        );
        assert_eq!(status_for(ParseError::InvalidHeader), StatusCode::BadRequest);
    }
}
