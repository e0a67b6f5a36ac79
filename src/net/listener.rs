//! TCP listener setup.
//!
//! # Responsibilities
//! - Create the IPv4 stream socket and enable address reuse
//! - Bind to the requested port (port 0 asks the OS for an ephemeral one)
//! - Listen with a fixed backlog and read back the actual bound port
//!
//! Every setup step that fails maps to its own [`ServerError`] variant so a
//! caller can tell exactly which stage of construction broke.

use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::{TcpListener, TcpSocket, TcpStream};

use crate::error::ServerError;

/// Listen backlog for the accept queue.
const LISTEN_BACKLOG: u32 = 100;

/// Which interfaces the listening socket binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindScope {
    /// Bind to all interfaces (`0.0.0.0`).
    Any,
    /// Bind to the loopback interface only. Used for backends that must be
    /// reachable solely through an in-process TLS-terminating relay.
    Loopback,
}

/// A bound, listening IPv4 socket.
///
/// The listener is exclusively owned by its [`Server`](crate::Server); the
/// accept worker is its sole reader.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    local_addr: SocketAddr,
}

impl Listener {
    /// Bind `port` within `scope` and start listening.
    ///
    /// Any failing step (create, set-options, bind, listen, read-back) is
    /// fatal: the error names the step and no listener is returned.
    pub fn bind(port: u16, scope: BindScope) -> Result<Self, ServerError> {
        let socket = TcpSocket::new_v4().map_err(ServerError::Create)?;
        socket.set_reuseaddr(true).map_err(ServerError::Options)?;

        let ip = match scope {
            BindScope::Any => Ipv4Addr::UNSPECIFIED,
            BindScope::Loopback => Ipv4Addr::LOCALHOST,
        };
        socket
            .bind(SocketAddr::from((ip, port)))
            .map_err(|source| ServerError::Bind { port, source })?;

        let inner = socket.listen(LISTEN_BACKLOG).map_err(ServerError::Listen)?;
        let local_addr = inner.local_addr().map_err(ServerError::ReadBack)?;

        tracing::info!(address = %local_addr, "listener bound");
        Ok(Self { inner, local_addr })
    }

    /// Accept one client connection.
    pub async fn accept(&self) -> std::io::Result<(TcpStream, SocketAddr)> {
        self.inner.accept().await
    }

    /// The actual bound address, read back from the socket.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The actual bound port (nonzero even when port 0 was requested).
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }
}
