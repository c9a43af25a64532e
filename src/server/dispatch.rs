//! Request dispatch pipeline.
//!
//! For each decoded request on an admitted connection:
//!
//! ```text
//!   acquire pooled pair ─► route lookup ──miss──► 404, finish
//!                              │
//!                              ▼
//!                        authorization ──deny──► 401 + challenge, finish
//!                              │
//!                              ▼
//!                        handler.handle() ──fault──► error handler
//!                              │
//!                  ┌───────────┴───────────┐
//!              suspended              not finished
//!          await hand-back           finish() on the
//!                  │                 handler's behalf
//!                  └───────────┬───────────┘
//!                              ▼
//!              access log, on_complete, recycle/discard
//! ```

use std::any::Any;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::config::ServerConfig;
use crate::error::ResponseError;
use crate::http::request::{Request, RequestFrame, Version};
use crate::http::response::{Response, StatusCode};
use crate::http::writer::FrameSink;
use crate::server::auth::Authorization;
use crate::server::handler::RequestHandler;
use crate::server::pool::{ContextPool, Release, SlotId};

/// What the connection should do after a request has been dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Wait for the next request on the same connection.
    KeepAlive,
    /// Close the connection once queued output is written.
    Close,
}

pub struct Dispatcher {
    config: Arc<ServerConfig>,
    pool: Arc<ContextPool>,
}

impl Dispatcher {
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            config,
            pool: Arc::new(ContextPool::new()),
        }
    }

    pub fn config(&self) -> &Arc<ServerConfig> {
        &self.config
    }

    pub fn pool(&self) -> &Arc<ContextPool> {
        &self.pool
    }

    /// Serves one request and drives its response to completion.
    ///
    /// Returns once the response has finished, or has been abandoned by a
    /// suspended handler. Handler faults never escape this call.
    pub async fn dispatch(
        &self,
        slot: SlotId,
        frame: RequestFrame,
        sink: &FrameSink,
        peer: Option<SocketAddr>,
    ) -> Outcome {
        let (mut request, mut response) = match self.pool.acquire(slot) {
            Ok(pair) => pair,
            Err(e) => {
                error!(slot = %slot, error = %e, "Failed to acquire pooled exchange");
                return Outcome::Close;
            }
        };

        request.load(frame);
        request.set_remote_addr(peer);
        response.bind(sink.clone(), request.version(), request.keep_alive());

        let handler = self.serve(&mut request, &mut response);

        if response.is_suspended() {
            let Some(handoff) = response.take_handoff() else {
                error!(slot = %slot, "Suspended response without hand-off");
                self.pool.free_after_keep_alive(slot);
                return Outcome::Close;
            };

            // Later requests on this connection wait for the suspended one.
            tokio::select! {
                biased;

                live = handoff => match live {
                    Ok(live) => response = live,
                    Err(_) => {
                        warn!(slot = %slot, uri = %request.uri(), "Suspended response was lost");
                        self.pool.free_after_keep_alive(slot);
                        return Outcome::Close;
                    }
                },

                () = sink.closed() => {
                    warn!(
                        slot = %slot,
                        uri = %request.uri(),
                        "Connection closed while response was suspended"
                    );
                    self.pool.free_after_keep_alive(slot);
                    return Outcome::Close;
                }
            }

            if !response.is_finished() {
                warn!(
                    slot = %slot,
                    uri = %request.uri(),
                    "Suspended response dropped before finishing"
                );
            }
        } else if !response.is_finished() {
            if let Err(e) = response.finish() {
                error!(slot = %slot, error = %e, "Failed to finish response");
            }
        }

        self.complete(slot, request, response, handler)
    }

    /// Routing, authorization and handler invocation. Returns the handler
    /// that served the request, if one was reached.
    fn serve(
        &self,
        request: &mut Request,
        response: &mut Response,
    ) -> Option<Arc<dyn RequestHandler>> {
        let Some(route) = self.config.routes().resolve(request.uri()) else {
            debug!(uri = %request.uri(), "No route");
            respond_with_status(response, StatusCode::NotFound);
            return None;
        };

        if let Authorization::Deny { status, challenges } = self.config.auth().check(request) {
            debug!(uri = %request.uri(), status = status.as_u16(), "Authorization denied");
            for challenge in challenges {
                let _ = response.add_header("WWW-Authenticate", challenge);
            }
            respond_with_status(response, status);
            return None;
        }

        let handler = route.target.handler_for(request);

        let result = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(request, response)));
        let fault = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(payload) => Some(anyhow::anyhow!(
                "handler panicked: {}",
                panic_message(payload.as_ref())
            )),
        };

        if let Some(error) = fault {
            error!(
                method = %request.method(),
                uri = %request.uri(),
                prefix = %route.prefix,
                error = %error,
                "Request handler failed"
            );
            self.config.error_reporter().on_error(request, response, &error);

            // A body already on the wire must not end like a success.
            if response.is_started() && !response.is_finished() && !response.is_suspended() {
                warn!(uri = %request.uri(), "Aborting partially sent response");
                if let Err(e) = response.abort() {
                    debug!(error = %e, "Failed to abort response");
                }
            }
        }

        Some(handler)
    }

    fn complete(
        &self,
        slot: SlotId,
        request: Request,
        response: Response,
        handler: Option<Arc<dyn RequestHandler>>,
    ) -> Outcome {
        if response.is_finished() {
            self.config
                .request_logger()
                .access(&request, &response, response.elapsed());
        }

        if let Some(handler) = &handler {
            handler.on_complete(&request, &response);
        }

        match self.pool.release(slot, request, response) {
            Release::Recycled => Outcome::KeepAlive,
            Release::Discarded => Outcome::Close,
        }
    }

    /// Answers a connection that will not be dispatched (over capacity or
    /// malformed) and closes it.
    pub fn reject(&self, sink: &FrameSink, status: StatusCode) {
        let mut response = Response::new();
        response.bind(sink.clone(), Version::Http11, false);
        respond_with_status(&mut response, status);
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("pool", &self.pool)
            .finish()
    }
}

/// Sends a plain-text status page and finishes the response.
fn respond_with_status(response: &mut Response, status: StatusCode) {
    fn write(response: &mut Response, status: StatusCode) -> Result<(), ResponseError> {
        response.set_status(status)?;
        response.set_content_type("text/plain; charset=utf-8")?;
        response.write_str(&status.to_string())?;
        response.finish()
    }

    if let Err(e) = write(response, status) {
        warn!(status = status.as_u16(), error = %e, "Failed to send status response");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
