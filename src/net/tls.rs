//! TLS identity and handshake-gated secure connections.
//!
//! # Responsibilities
//! - Load a server identity (certificate chain + private key) once per server
//! - Perform the server-side handshake before any bytes reach a Connection
//!
//! The identity is supplied when a TLS-capable server is constructed and is
//! never re-derived per connection. A failed handshake drops the socket; no
//! request from it ever reaches the dispatch chain.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;

use crate::net::conn::Connection;

/// Errors while assembling a server identity.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read identity material: {0}")]
    Io(#[from] std::io::Error),

    #[error("no private key found in {0}")]
    MissingKey(PathBuf),

    #[error("identity rejected: {0}")]
    Rejected(#[from] rustls::Error),
}

/// A server-side TLS identity: certificate chain plus private key.
#[derive(Clone)]
pub struct TlsIdentity {
    config: Arc<rustls::ServerConfig>,
}

impl TlsIdentity {
    /// Builds an identity from DER-encoded material.
    pub fn from_der(
        chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Result<Self, TlsError> {
        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(chain, key)?;
        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Builds an identity from PEM files on disk.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self, TlsError> {
        let chain = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
            .collect::<Result<Vec<_>, _>>()?;
        let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
            .ok_or_else(|| TlsError::MissingKey(key_path.to_path_buf()))?;
        Self::from_der(chain, key)
    }

    pub(crate) fn acceptor(&self) -> TlsAcceptor {
        TlsAcceptor::from(Arc::clone(&self.config))
    }
}

impl std::fmt::Debug for TlsIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsIdentity").finish_non_exhaustive()
    }
}

/// Runs the server-side handshake and wraps the result as a secure
/// [`Connection`]. Raw pre-handshake bytes never escape this function.
pub(crate) async fn accept(
    acceptor: &TlsAcceptor,
    stream: TcpStream,
    peer: SocketAddr,
) -> std::io::Result<Connection> {
    let tls = acceptor.accept(stream).await?;
    Ok(Connection::from_secure_stream(tls, format!("tls:{peer}")))
}
