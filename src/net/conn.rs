//! HTTP/1.1 connection over an owned transport.
//!
//! # Responsibilities
//! - Parse one request head at a time (request line + header block)
//! - Accumulate and write responses, tracking keep-alive eligibility
//! - Expose an attempt-read/attempt-write surface for the relay pump
//!
//! A connection owns its socket exclusively and is driven by exactly one
//! task. Plain TCP and TLS are two transports behind the same type; request
//! parsing is shared rather than duplicated per transport.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;

/// Upper bound on a request head before the connection is dropped.
const MAX_HEAD_BYTES: usize = 16 * 1024;

/// Note httparse requires a preallocated header array of this size.
const MAX_HEADERS: usize = 64;

/// Byte stream a [`Connection`] can run over.
pub(crate) trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// Outcome of [`Connection::read_request`].
///
/// `Closed` and `Malformed` both end the caller's request loop, but they are
/// distinct end conditions: a clean end-of-stream versus bytes that do not
/// form an HTTP request head. Neither produces a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A complete request head was parsed and is ready for dispatch.
    Request,
    /// The peer closed the stream before sending another request.
    Closed,
    /// The stream carried bytes that could not be parsed as a request head.
    Malformed,
}

#[derive(Debug, Default)]
struct RequestHead {
    method: String,
    target: String,
    path: String,
    query: Option<String>,
    version: String,
    headers: HeaderMap,
}

/// One accepted (or outbound) HTTP/1.1 connection.
pub struct Connection {
    io: Box<dyn Transport>,
    label: String,
    secure: bool,
    /// Received bytes not yet consumed by parsing.
    rd: BytesMut,
    /// Response bytes not yet written to the transport.
    wr: Vec<u8>,
    head: RequestHead,
    /// Announced request-body bytes not yet consumed by `read_body`.
    body_remaining: usize,
    status: u16,
    resp_headers: Vec<(String, String)>,
    resp_has_length: bool,
}

impl Connection {
    fn new(io: Box<dyn Transport>, label: String, secure: bool) -> Self {
        Self {
            io,
            label,
            secure,
            rd: BytesMut::with_capacity(4 * 1024),
            wr: Vec::new(),
            head: RequestHead::default(),
            body_remaining: 0,
            status: 200,
            resp_headers: Vec::new(),
            resp_has_length: false,
        }
    }

    /// Wraps an already-established plain byte stream.
    ///
    /// This is the embedding surface: anything satisfying the transport
    /// bounds (a `TcpStream`, an in-memory duplex, a unix socket) works.
    pub fn from_stream<S>(io: S, label: impl Into<String>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::new(Box::new(io), label.into(), false)
    }

    /// Wraps a handshake-completed secure stream.
    pub(crate) fn from_secure_stream<S>(io: S, label: impl Into<String>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::new(Box::new(io), label.into(), true)
    }

    /// Opens an outbound plain connection, e.g. a proxy or surrogate leg.
    pub async fn open(addr: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_stream(stream, format!("out:{addr}")))
    }

    /// Whether reads and writes route through a TLS layer.
    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// Diagnostic label, e.g. the peer address.
    pub fn label(&self) -> &str {
        &self.label
    }

    // --- request side -----------------------------------------------------

    /// Reads and parses the next request line and header block.
    ///
    /// Any unread body bytes of the previous request are discarded first so
    /// they are never mistaken for the next head, then all per-cycle request
    /// and response state is reset. Blocks (the owning task only) until a
    /// complete head arrives, the peer closes, or the bytes turn out not to
    /// be HTTP.
    pub async fn read_request(&mut self) -> ReadOutcome {
        if let Err(err) = self.discard_unread_body().await {
            tracing::debug!(conn = %self.label, error = %err, "discarding unread body failed");
            return ReadOutcome::Closed;
        }
        self.reset_cycle();
        loop {
            match self.parse_head() {
                Ok(true) => return ReadOutcome::Request,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(conn = %self.label, error = %err, "unparseable request head");
                    return ReadOutcome::Malformed;
                }
            }
            if self.rd.len() >= MAX_HEAD_BYTES {
                tracing::warn!(conn = %self.label, "request head exceeds size limit");
                return ReadOutcome::Malformed;
            }
            match self.io.read_buf(&mut self.rd).await {
                Ok(0) if self.rd.is_empty() => {
                    tracing::trace!(conn = %self.label, "peer closed between requests");
                    return ReadOutcome::Closed;
                }
                Ok(0) => {
                    tracing::warn!(conn = %self.label, "stream ended mid request head");
                    return ReadOutcome::Malformed;
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(conn = %self.label, error = %err, "read failed");
                    return ReadOutcome::Closed;
                }
            }
        }
    }

    /// Attempts to parse a complete head out of the read buffer.
    ///
    /// `Ok(false)` means more bytes are needed.
    fn parse_head(&mut self) -> Result<bool, httparse::Error> {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);
        let (len, head) = match req.parse(&self.rd)? {
            httparse::Status::Partial => return Ok(false),
            httparse::Status::Complete(len) => {
                let method = req.method.unwrap_or_default().to_string();
                let target = req.path.unwrap_or_default().to_string();
                let version = format!("HTTP/1.{}", req.version.unwrap_or(1));
                let mut map = HeaderMap::new();
                for h in req.headers.iter() {
                    let name = HeaderName::from_bytes(h.name.as_bytes());
                    let value = HeaderValue::from_bytes(h.value);
                    if let (Ok(name), Ok(value)) = (name, value) {
                        map.append(name, value);
                    }
                }
                let (path, query) = match target.split_once('?') {
                    Some((p, q)) => (p.to_string(), Some(q.to_string())),
                    None => (target.clone(), None),
                };
                (
                    len,
                    RequestHead {
                        method,
                        target,
                        path,
                        query,
                        version,
                        headers: map,
                    },
                )
            }
        };
        self.head = head;
        self.body_remaining = self
            .head
            .headers
            .get("content-length")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0);
        self.rd.advance(len);
        Ok(true)
    }

    /// Skips whatever remains of the previous request's announced body.
    async fn discard_unread_body(&mut self) -> std::io::Result<()> {
        while self.body_remaining > 0 {
            if self.rd.is_empty() && self.io.read_buf(&mut self.rd).await? == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream ended inside unread request body",
                ));
            }
            let n = self.body_remaining.min(self.rd.len());
            self.rd.advance(n);
            self.body_remaining -= n;
        }
        Ok(())
    }

    /// HTTP method of the current request.
    pub fn method(&self) -> &str {
        &self.head.method
    }

    /// Raw request target as received.
    pub fn target(&self) -> &str {
        &self.head.target
    }

    /// Path component of the request target.
    pub fn path(&self) -> &str {
        &self.head.path
    }

    /// Query component, when present.
    pub fn query(&self) -> Option<&str> {
        self.head.query.as_deref()
    }

    /// Protocol version, e.g. `HTTP/1.1`.
    pub fn version(&self) -> &str {
        &self.head.version
    }

    /// Case-insensitive request-header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// All request headers of the current request.
    pub fn request_headers(&self) -> &HeaderMap {
        &self.head.headers
    }

    /// Reads the request body as announced by `Content-Length`.
    ///
    /// Bytes already buffered past the head are consumed first. An absent or
    /// unparseable length reads as an empty body.
    pub async fn read_body(&mut self) -> std::io::Result<Bytes> {
        let len = self.body_remaining;
        while self.rd.len() < len {
            if self.io.read_buf(&mut self.rd).await? == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream ended before announced body length",
                ));
            }
        }
        self.body_remaining = 0;
        Ok(self.rd.split_to(len).freeze())
    }

    // --- response side ----------------------------------------------------

    /// Sets the response status code for the current cycle. Defaults to 200.
    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    /// Queues a response header to be written ahead of the body.
    pub fn add_header(&mut self, name: &str, value: &str) {
        if name.eq_ignore_ascii_case("content-length") {
            self.resp_has_length = true;
        }
        self.resp_headers.push((name.to_string(), value.to_string()));
    }

    /// Serializes the status line, queued headers, and a text body.
    pub fn respond(&mut self, body: &str) {
        self.respond_bytes(body.as_bytes());
    }

    /// Serializes the status line, queued headers, and a byte body.
    ///
    /// Output is buffered; call [`flush`](Self::flush) to push it out.
    pub fn respond_bytes(&mut self, body: &[u8]) {
        let reason = http::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("");
        self.wr
            .extend_from_slice(format!("HTTP/1.1 {} {}\r\n", self.status, reason).as_bytes());
        for (name, value) in self.resp_headers.drain(..) {
            self.wr
                .extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        self.wr.extend_from_slice(b"\r\n");
        self.wr.extend_from_slice(body);
    }

    /// Queues a request head for an outbound leg (proxy replay).
    pub fn write_request_head(
        &mut self,
        method: &str,
        target: &str,
        version: &str,
        headers: &HeaderMap,
    ) {
        self.wr
            .extend_from_slice(format!("{method} {target} {version}\r\n").as_bytes());
        for (name, value) in headers {
            self.wr.extend_from_slice(name.as_str().as_bytes());
            self.wr.extend_from_slice(b": ");
            self.wr.extend_from_slice(value.as_bytes());
            self.wr.extend_from_slice(b"\r\n");
        }
        self.wr.extend_from_slice(b"\r\n");
    }

    /// Whether a `Content-Length` response header was queued this cycle.
    /// Keep-alive reuse is gated on this.
    pub fn response_has_length(&self) -> bool {
        self.resp_has_length
    }

    /// Forces buffered output onto the transport.
    pub async fn flush(&mut self) -> std::io::Result<()> {
        if !self.wr.is_empty() {
            self.io.write_all(&self.wr).await?;
            self.wr.clear();
        }
        self.io.flush().await
    }

    /// Flushes pending output, then closes both directions of the transport.
    /// On secure legs this also sends the TLS close notification.
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.flush().await?;
        self.io.shutdown().await
    }

    // --- relay surface ----------------------------------------------------

    /// Attempts a read without waiting: `Poll::Pending` means "no data right
    /// now". Parse leftovers buffered past the last head are drained first.
    pub fn poll_receive(
        &mut self,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        if !self.rd.is_empty() {
            let n = self.rd.len().min(buf.len());
            buf[..n].copy_from_slice(&self.rd[..n]);
            self.rd.advance(n);
            return Poll::Ready(Ok(n));
        }
        let mut rb = ReadBuf::new(buf);
        match Pin::new(&mut self.io).poll_read(cx, &mut rb) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(rb.filled().len())),
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
            Poll::Pending => Poll::Pending,
        }
    }

    /// Attempts a write without waiting: `Poll::Pending` means "no space
    /// right now".
    pub fn poll_forward(
        &mut self,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    /// Attempts to flush the transport's send side.
    pub fn poll_flush_io(&mut self, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn reset_cycle(&mut self) {
        self.head = RequestHead::default();
        self.status = 200;
        self.resp_headers.clear();
        self.resp_has_length = false;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("label", &self.label)
            .field("secure", &self.secure)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    async fn conn_with_input(input: &[u8]) -> Connection {
        let (mut client, server) = duplex(64 * 1024);
        client.write_all(input).await.unwrap();
        client.shutdown().await.unwrap();
        Connection::from_stream(server, "test")
    }

    #[tokio::test]
    async fn parses_request_line_and_headers() {
        let mut conn =
            conn_with_input(b"GET /search?q=rust HTTP/1.1\r\nHost: example\r\nX-Trace: 7\r\n\r\n")
                .await;
        assert_eq!(conn.read_request().await, ReadOutcome::Request);
        assert_eq!(conn.method(), "GET");
        assert_eq!(conn.target(), "/search?q=rust");
        assert_eq!(conn.path(), "/search");
        assert_eq!(conn.query(), Some("q=rust"));
        assert_eq!(conn.version(), "HTTP/1.1");
        assert_eq!(conn.header("host"), Some("example"));
        assert_eq!(conn.header("X-TRACE"), Some("7"));
        assert_eq!(conn.header("missing"), None);
    }

    #[tokio::test]
    async fn clean_eof_is_closed() {
        let mut conn = conn_with_input(b"").await;
        assert_eq!(conn.read_request().await, ReadOutcome::Closed);
    }

    #[tokio::test]
    async fn garbage_is_malformed() {
        let mut conn = conn_with_input(b"\x16\x03\x01\x02\x00garbage\r\n\r\n").await;
        assert_eq!(conn.read_request().await, ReadOutcome::Malformed);
    }

    #[tokio::test]
    async fn truncated_head_is_malformed() {
        let mut conn = conn_with_input(b"GET / HTTP/1.1\r\nHost: exa").await;
        assert_eq!(conn.read_request().await, ReadOutcome::Malformed);
    }

    #[tokio::test]
    async fn sequential_requests_reset_state() {
        let mut conn = conn_with_input(
            b"GET /one HTTP/1.1\r\nHost: a\r\n\r\nPOST /two HTTP/1.1\r\nHost: b\r\n\r\n",
        )
        .await;
        assert_eq!(conn.read_request().await, ReadOutcome::Request);
        conn.add_header("Content-Length", "0");
        assert!(conn.response_has_length());

        assert_eq!(conn.read_request().await, ReadOutcome::Request);
        assert_eq!(conn.method(), "POST");
        assert_eq!(conn.path(), "/two");
        assert_eq!(conn.header("host"), Some("b"));
        // Response bookkeeping starts fresh each cycle.
        assert!(!conn.response_has_length());
    }

    #[tokio::test]
    async fn unread_body_is_skipped_before_next_request() {
        let mut conn = conn_with_input(
            b"POST /u HTTP/1.1\r\nContent-Length: 5\r\n\r\nhelloGET /next HTTP/1.1\r\nHost: a\r\n\r\n",
        )
        .await;
        assert_eq!(conn.read_request().await, ReadOutcome::Request);
        assert_eq!(conn.method(), "POST");
        // Body intentionally not read; it must not leak into the next head.
        assert_eq!(conn.read_request().await, ReadOutcome::Request);
        assert_eq!(conn.method(), "GET");
        assert_eq!(conn.path(), "/next");
    }

    #[tokio::test]
    async fn unread_body_containing_crlf_is_skipped() {
        let mut conn = conn_with_input(
            b"POST /u HTTP/1.1\r\nContent-Length: 6\r\n\r\nab\r\ncdGET /next HTTP/1.1\r\nHost: a\r\n\r\n",
        )
        .await;
        assert_eq!(conn.read_request().await, ReadOutcome::Request);
        assert_eq!(conn.read_request().await, ReadOutcome::Request);
        assert_eq!(conn.path(), "/next");
    }

    #[tokio::test]
    async fn read_body_honors_content_length() {
        let mut conn =
            conn_with_input(b"POST /u HTTP/1.1\r\nContent-Length: 5\r\n\r\nhellotrailing").await;
        assert_eq!(conn.read_request().await, ReadOutcome::Request);
        let body = conn.read_body().await.unwrap();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn respond_serializes_status_headers_body() {
        let (mut client, server) = duplex(64 * 1024);
        let mut conn = Connection::from_stream(server, "test");
        conn.set_status(404);
        conn.add_header("Content-Length", "9");
        conn.add_header("Content-Type", "text/plain");
        conn.respond("not found");
        conn.flush().await.unwrap();
        drop(conn);

        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Content-Length: 9\r\n"));
        assert!(text.contains("Content-Type: text/plain\r\n"));
        assert!(text.ends_with("\r\n\r\nnot found"));
    }

    #[tokio::test]
    async fn content_length_flag_is_case_insensitive() {
        let (_client, server) = duplex(1024);
        let mut conn = Connection::from_stream(server, "test");
        conn.add_header("content-LENGTH", "2");
        assert!(conn.response_has_length());
    }
}
