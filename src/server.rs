//! Server lifecycle: bind once, accept forever.
//!
//! # Responsibilities
//! - Construct the listener and fail loudly on any setup step
//! - Run one dedicated accept worker for the server's lifetime
//! - Spawn one worker per accepted connection: dispatch loop or relay
//!
//! There is deliberately no shutdown primitive and no cap on concurrent
//! connections: a server lives until the process exits, and termination of
//! individual connections is driven solely by socket closure or I/O error.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;

use crate::dispatch::{Dispatcher, Handler};
use crate::error::ServerError;
use crate::net::conn::Connection;
use crate::net::listener::{BindScope, Listener};
use crate::net::tls::{self, TlsIdentity};
use crate::relay::{relay, tracing_sink, DiagnosticSink};

/// Fixed pause after a failed accept. Accept failures are never fatal.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// How accepted connections are wrapped and driven.
pub enum ServerMode {
    /// Plain HTTP, dispatched through the handler chain.
    Direct,
    /// TLS-terminated HTTP, dispatched through the handler chain.
    TlsDirect(TlsIdentity),
    /// TLS-terminated byte relay toward a plain-HTTP backend that has no
    /// TLS material of its own.
    TlsSurrogate {
        identity: TlsIdentity,
        /// Dialable backend address, e.g. `127.0.0.1:8081`.
        backend: String,
    },
}

/// Mode with its per-server TLS state prebuilt.
enum ModeRuntime {
    Direct,
    TlsDirect(TlsAcceptor),
    TlsSurrogate { acceptor: TlsAcceptor, backend: String },
}

/// A running HTTP/HTTPS server engine.
///
/// Owns the listening socket exclusively. Dropping the handle does not stop
/// the accept worker; the server runs for the life of the process (or, in
/// tests, the runtime).
pub struct Server {
    local_addr: SocketAddr,
}

impl Server {
    /// Binds `port` and starts accepting.
    ///
    /// `handlers` are tried in the given order for every request. Port 0
    /// requests an OS-assigned port; read the result back via
    /// [`port`](Self::port). Construction failure returns the failing step;
    /// no partial server is produced.
    pub async fn start(
        port: u16,
        handlers: Vec<Arc<dyn Handler>>,
        mode: ServerMode,
        scope: BindScope,
    ) -> Result<Self, ServerError> {
        let listener = Listener::bind(port, scope)?;
        let local_addr = listener.local_addr();

        let runtime = match mode {
            ServerMode::Direct => ModeRuntime::Direct,
            ServerMode::TlsDirect(identity) => ModeRuntime::TlsDirect(identity.acceptor()),
            ServerMode::TlsSurrogate { identity, backend } => ModeRuntime::TlsSurrogate {
                acceptor: identity.acceptor(),
                backend,
            },
        };

        let dispatcher = Arc::new(Dispatcher::new(handlers));
        let runtime = Arc::new(runtime);
        let sink = tracing_sink();

        tokio::spawn(accept_loop(listener, dispatcher, runtime, sink));
        Ok(Self { local_addr })
    }

    /// The actual bound port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// The actual bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

/// The dedicated accept worker. Loops for the life of the process.
async fn accept_loop(
    listener: Listener,
    dispatcher: Arc<Dispatcher>,
    runtime: Arc<ModeRuntime>,
    sink: DiagnosticSink,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let dispatcher = Arc::clone(&dispatcher);
                let runtime = Arc::clone(&runtime);
                let sink = Arc::clone(&sink);
                tokio::spawn(async move {
                    serve_connection(stream, peer, &dispatcher, &runtime, &sink).await;
                });
            }
            Err(err) => {
                tracing::warn!(error = %err, "accept failed, retrying");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
            }
        }
    }
}

/// Runs one accepted socket to completion. Errors stay inside this worker.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: &Dispatcher,
    runtime: &ModeRuntime,
    sink: &DiagnosticSink,
) {
    match runtime {
        ModeRuntime::Direct => {
            let mut conn = Connection::from_stream(stream, peer.to_string());
            dispatcher.run(&mut conn).await;
        }
        ModeRuntime::TlsDirect(acceptor) => {
            match tls::accept(acceptor, stream, peer).await {
                Ok(mut conn) => dispatcher.run(&mut conn).await,
                Err(err) => {
                    tracing::debug!(peer = %peer, error = %err, "tls handshake failed");
                }
            }
        }
        ModeRuntime::TlsSurrogate { acceptor, backend } => {
            let mut client = match tls::accept(acceptor, stream, peer).await {
                Ok(conn) => conn,
                Err(err) => {
                    tracing::debug!(peer = %peer, error = %err, "tls handshake failed");
                    return;
                }
            };
            let mut leg = match Connection::open(backend).await {
                Ok(conn) => conn,
                Err(err) => {
                    tracing::warn!(backend = %backend, error = %err, "surrogate unreachable");
                    let _ = client.shutdown().await;
                    return;
                }
            };
            if let Err(err) = relay("surrogate", &mut client, &mut leg, sink).await {
                tracing::debug!(peer = %peer, error = %err, "surrogate relay ended with error");
            }
        }
    }
}
