//! Server engine: admission, routing, authorization and request dispatch.
//!
//! # Request flow
//!
//! ```text
//!   accept ─► admission ──full──► 503, close
//!                │
//!                ▼
//!          connection task ─► parse ──bad──► 400 / 413 / 501, close
//!                │
//!                ▼
//!           dispatcher ─► route ─► auth ─► handler
//!                │
//!                ▼
//!        finish / suspended hand-back ─► keep-alive or close
//! ```
//!
//! - **`listener`**: [`HttpServer`], the accept loop and lifecycle control
//! - **`admission`**: live connection ceiling
//! - **`routes`**: prefix route table, longest prefix wins
//! - **`auth`**: scheme-keyed authorization handlers
//! - **`pool`**: reusable request/response pairs per connection slot
//! - **`dispatch`**: the per-request pipeline
//! - **`handler`**: traits implemented by the embedding application

pub mod admission;
pub mod auth;
pub mod dispatch;
pub mod handler;
pub mod listener;
pub mod pool;
pub mod routes;

pub use auth::{AuthorizationHandler, BasicAuthorizationHandler};
pub use handler::{ErrorHandler, HandlerFactory, RequestHandler, RequestLogger};
pub use listener::HttpServer;
