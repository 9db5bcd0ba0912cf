//! Network layer for pactproxy
//!
//! Accepts HTTP/1.1 clients with bounded concurrency and forwards to the
//! backend over HTTP or HTTPS.

mod client;
mod connection_pool;
mod http;
mod server;

pub use client::{HttpsClient, UpstreamClient};
pub use connection_pool::{ConnectionGuard, ConnectionPool};
pub use http::HttpHandler;
pub use server::ProxyServer;

/// Graceful shutdown timeout
pub const SHUTDOWN_TIMEOUT_MS: u64 = 5000;
