//! Harbor - embeddable HTTP/1.1 server engine
//!
//! Applications register handlers by path prefix on a [`config::ServerConfig`]
//! and start a [`server::HttpServer`]. Handlers may answer inline or suspend
//! their response and finish it later from another task.

pub mod config;
pub mod error;
pub mod http;
pub mod server;
