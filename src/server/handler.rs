//! Capabilities supplied by the embedding application.
//!
//! Request handlers, handler factories, the error handler and the access-log
//! hook are all trait objects shared across connection tasks.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};

/// Serves requests for a registered path prefix.
///
/// `handle` runs synchronously on the connection's task. A handler that needs
/// to complete later calls [`Response::suspend`] and finishes the returned
/// capability from wherever the work ends up.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, request: &mut Request, response: &mut Response) -> anyhow::Result<()>;

    /// Called once the response has finished, including responses that were
    /// suspended and finished later.
    fn on_complete(&self, _request: &Request, _response: &Response) {}
}

impl<F> RequestHandler for F
where
    F: Fn(&mut Request, &mut Response) -> anyhow::Result<()> + Send + Sync,
{
    fn handle(&self, request: &mut Request, response: &mut Response) -> anyhow::Result<()> {
        self(request, response)
    }
}

/// Produces a handler per request, for handlers that carry request-scoped
/// state. Paired with [`RequestHandler::on_complete`] a factory can keep its
/// own bounded pool of handlers.
pub trait HandlerFactory: Send + Sync {
    fn new_handler(&self, request: &Request) -> Arc<dyn RequestHandler>;
}

/// What a route prefix resolves to.
#[derive(Clone)]
pub enum RouteTarget {
    /// One handler instance shared by every request.
    Direct(Arc<dyn RequestHandler>),
    /// A factory asked for a fresh handler on each request.
    Factory(Arc<dyn HandlerFactory>),
}

impl RouteTarget {
    pub fn handler<H: RequestHandler + 'static>(handler: H) -> Self {
        RouteTarget::Direct(Arc::new(handler))
    }

    pub fn factory<F: HandlerFactory + 'static>(factory: F) -> Self {
        RouteTarget::Factory(Arc::new(factory))
    }

    /// Resolves the handler that serves `request`.
    pub fn handler_for(&self, request: &Request) -> Arc<dyn RequestHandler> {
        match self {
            RouteTarget::Direct(handler) => Arc::clone(handler),
            RouteTarget::Factory(factory) => factory.new_handler(request),
        }
    }
}

impl fmt::Debug for RouteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteTarget::Direct(_) => f.write_str("RouteTarget::Direct(..)"),
            RouteTarget::Factory(_) => f.write_str("RouteTarget::Factory(..)"),
        }
    }
}

/// Turns a handler fault into a response.
pub trait ErrorHandler: Send + Sync {
    fn on_error(&self, request: &Request, response: &mut Response, error: &anyhow::Error);
}

/// Replies `500 Internal Server Error` with a plain-text body.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultErrorHandler;

impl ErrorHandler for DefaultErrorHandler {
    fn on_error(&self, _request: &Request, response: &mut Response, _error: &anyhow::Error) {
        if response.is_started() || response.is_finished() {
            return;
        }
        let status = StatusCode::InternalServerError;
        let _ = response.clear_buffer();
        let _ = response.set_status(status);
        let _ = response.set_content_type("text/plain; charset=utf-8");
        let _ = response.write_str(&status.to_string());
    }
}

/// Access-log hook, called once per finished response.
pub trait RequestLogger: Send + Sync {
    fn access(&self, request: &Request, response: &Response, elapsed: Duration);
}

/// Discards access records.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRequestLogger;

impl RequestLogger for NullRequestLogger {
    fn access(&self, _request: &Request, _response: &Response, _elapsed: Duration) {}
}

/// Emits one `tracing` event per finished response.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRequestLogger;

impl RequestLogger for TracingRequestLogger {
    fn access(&self, request: &Request, response: &Response, elapsed: Duration) {
        tracing::info!(
            method = %request.method(),
            uri = %request.uri(),
            status = response.status().as_u16(),
            bytes = response.written_bytes(),
            elapsed_ms = elapsed.as_millis() as u64,
            "request served"
        );
    }
}
