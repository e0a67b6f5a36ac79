//! Shared utilities for integration tests: raw HTTP clients, capture
//! backends, scripted handlers, and throwaway TLS identities.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use portico::{Connection, Handler, TlsIdentity, Verdict};

/// A parsed response: status code, raw head text, body bytes.
pub struct Response {
    pub status: u16,
    pub head: String,
    pub body: Vec<u8>,
}

impl Response {
    pub fn body_text(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap()
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.head.lines().find_map(|line| {
            let (n, v) = line.split_once(':')?;
            n.eq_ignore_ascii_case(name).then(|| v.trim().to_string())
        })
    }
}

fn find_blank_line(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Reads one response, framing the body by `Content-Length`.
pub async fn read_response<S: AsyncRead + Unpin>(stream: &mut S) -> Response {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];
    let head_end = loop {
        if let Some(end) = find_blank_line(&buf) {
            break end;
        }
        let n = stream.read(&mut tmp).await.unwrap();
        assert!(n > 0, "stream ended before response head");
        buf.extend_from_slice(&tmp[..n]);
    };
    let head = String::from_utf8(buf[..head_end].to_vec()).unwrap();
    let status: u16 = head
        .split_whitespace()
        .nth(1)
        .expect("status line")
        .parse()
        .expect("numeric status");
    let content_length: usize = head
        .lines()
        .find_map(|line| {
            let (n, v) = line.split_once(':')?;
            if n.eq_ignore_ascii_case("content-length") {
                v.trim().parse().ok()
            } else {
                None
            }
        })
        .unwrap_or(0);
    let mut body = buf[head_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut tmp).await.unwrap();
        assert!(n > 0, "stream ended before full body");
        body.extend_from_slice(&tmp[..n]);
    }
    body.truncate(content_length);
    Response { status, head, body }
}

/// Writes a request and reads the response off the same stream.
pub async fn roundtrip<S: AsyncRead + AsyncWrite + Unpin>(
    stream: &mut S,
    request: &[u8],
) -> Response {
    stream.write_all(request).await.unwrap();
    read_response(stream).await
}

/// Asserts the peer has closed the stream.
pub async fn assert_closed<S: AsyncRead + Unpin>(stream: &mut S) {
    let mut tmp = [0u8; 64];
    let n = stream.read(&mut tmp).await.unwrap_or(0);
    assert_eq!(n, 0, "expected closed connection, read {n} bytes");
}

/// Handler answering every request with `200 OK`, `Content-Length: 2`,
/// body `OK`, verdict reusable.
pub struct OkHandler;

impl Handler for OkHandler {
    fn process<'a>(&'a self, conn: &'a mut Connection) -> BoxFuture<'a, Verdict> {
        Box::pin(async move {
            conn.add_header("Content-Length", "2");
            conn.respond("OK");
            Verdict::ProcessedAndReusable
        })
    }
}

/// Handler claiming one exact path, recording its name when invoked.
pub struct PathHandler {
    pub claim_path: &'static str,
    pub name: &'static str,
    pub verdict: Verdict,
    pub log: Arc<Mutex<Vec<&'static str>>>,
}

impl Handler for PathHandler {
    fn process<'a>(&'a self, conn: &'a mut Connection) -> BoxFuture<'a, Verdict> {
        Box::pin(async move {
            self.log.lock().unwrap().push(self.name);
            if conn.path() != self.claim_path {
                return Verdict::NotProcessed;
            }
            if self.verdict != Verdict::NotProcessed {
                let body = self.name;
                conn.add_header("Content-Length", &body.len().to_string());
                conn.respond(body);
            }
            self.verdict
        })
    }
}

/// Starts a raw backend that captures each request head and answers with a
/// fixed response, then closes. Returns the bound address and the captures.
pub async fn start_capture_backend(
    response: &'static str,
) -> (SocketAddr, Arc<Mutex<Vec<Vec<u8>>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let captured = Arc::new(Mutex::new(Vec::new()));
    let cap = Arc::clone(&captured);
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let cap = Arc::clone(&cap);
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut tmp = [0u8; 1024];
                while find_blank_line(&buf).is_none() {
                    match socket.read(&mut tmp).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&tmp[..n]),
                    }
                }
                cap.lock().unwrap().push(buf);
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    (addr, captured)
}

/// A fresh self-signed identity for `localhost`.
pub fn test_identity() -> TlsIdentity {
    let ck = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert = ck.cert.der().clone();
    let key = rustls::pki_types::PrivateKeyDer::Pkcs8(ck.signing_key.serialize_der().into());
    TlsIdentity::from_der(vec![cert], key).unwrap()
}

/// Certificate verifier that accepts anything. Test client only.
#[derive(Debug)]
struct AcceptAll(rustls::crypto::CryptoProvider);

impl rustls::client::danger::ServerCertVerifier for AcceptAll {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Opens a TLS client connection to `addr` with SNI `localhost` and no
/// certificate verification.
pub async fn tls_client(
    addr: SocketAddr,
) -> tokio_rustls::client::TlsStream<TcpStream> {
    let provider = rustls::crypto::aws_lc_rs::default_provider();
    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAll(provider)))
        .with_no_client_auth();
    let connector = tokio_rustls::TlsConnector::from(Arc::new(config));
    let stream = TcpStream::connect(addr).await.unwrap();
    let sni = rustls::pki_types::ServerName::try_from("localhost")
        .unwrap()
        .to_owned();
    connector.connect(sni, stream).await.unwrap()
}
