//! Server construction errors.
//!
//! Each variant names the listener setup step that failed; construction is
//! all-or-nothing, so exactly one of these comes back from a failed
//! [`Server::start`](crate::Server::start).

use std::io;

use thiserror::Error;

/// Why a server could not be constructed.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Creating the IPv4 stream socket failed.
    #[error("failed to create listening socket")]
    Create(#[source] io::Error),

    /// Setting socket options (address reuse) failed.
    #[error("failed to set listening socket options")]
    Options(#[source] io::Error),

    /// Binding the requested port failed, e.g. because it is in use.
    #[error("failed to bind port {port}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    /// Switching the bound socket into listening mode failed.
    #[error("failed to listen on bound socket")]
    Listen(#[source] io::Error),

    /// Reading the bound address back from the socket failed.
    #[error("failed to read back bound address")]
    ReadBack(#[source] io::Error),
}
