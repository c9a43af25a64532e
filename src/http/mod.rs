//! HTTP protocol implementation.
//!
//! This module implements the HTTP/1.1 wire side of the server: request
//! parsing, response framing and the per-connection state machine.
//!
//! # Architecture
//!
//! - **`connection`**: The connection state machine, reader and writer halves
//! - **`parser`**: Parses incoming HTTP requests from byte buffers
//! - **`request`**: Reusable request object plus the decoded wire frame
//! - **`response`**: Reusable response with buffered, chunked and suspended modes
//! - **`headers`**: Case-insensitive, order-preserving header list
//! - **`writer`**: Output queue and the task half that writes it to the socket
//!
//! # Connection State Machine
//!
//! Each client connection goes through a state machine:
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for incoming request data
//!        └──────┬──────┘
//!               │ Request received
//!               ├─ Malformed / not admitted ─► Rejecting ─► Closed
//!               ▼
//!        ┌──────────────────┐
//!        │   Dispatching    │ ← Route, authorize, run handler
//!        └──────┬───────────┘
//!               │ Response finished (possibly from another task)
//!               ├─ Keep-Alive → Reading (same connection)
//!               └─ Close → Closed
//! ```
//!
//! Responses never write to the socket directly. They queue frames on a
//! [`writer::FrameSink`]; the connection's [`writer::ResponseWriter`] drains
//! the queue in order.

pub mod connection;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
