//! portico, an embeddable HTTP/1.1 server engine.
//!
//! # Architecture Overview
//!
//! ```text
//!   Client ──▶ Server (accept worker)
//!                │  wrap socket per mode (plain | TLS)
//!                ├─▶ Dispatcher loop ──▶ handler chain ──▶ response
//!                │        (keep-alive while verdicts allow)
//!                └─▶ ProxyRelay pump ◀──▶ plain backend ("surrogate")
//! ```
//!
//! The engine accepts TCP connections, optionally terminates TLS, parses
//! HTTP/1.1 requests, and dispatches each one through an ordered chain of
//! [`Handler`]s. The first handler returning a non-`NotProcessed`
//! [`Verdict`] wins; a connection is kept alive only after a
//! `ProcessedAndReusable` verdict with a `Content-Length` response header.
//! The [`relay`] pump bridges two connections byte-for-byte, which lets a
//! TLS-terminating front end stand in front of a plain-HTTP backend.
//!
//! One accept worker runs per server; every accepted connection gets its own
//! worker. There are no timeouts, no admission control, and no shutdown
//! primitive: connections end on socket closure or I/O error, and servers
//! live until the process exits.

// Core subsystems
pub mod config;
pub mod dispatch;
pub mod net;
pub mod relay;
pub mod server;

// Built-in relay-triggering handler
pub mod proxy;

// Cross-cutting concerns
pub mod error;

pub use crate::config::EngineConfig;
pub use crate::dispatch::{Dispatcher, Handler, Verdict};
pub use crate::error::ServerError;
pub use crate::net::{BindScope, Connection, ReadOutcome, TlsIdentity};
pub use crate::proxy::ForwardProxy;
pub use crate::relay::{relay, tracing_sink, DiagnosticSink};
pub use crate::server::{Server, ServerMode};
