//! Forward-proxy request handler.
//!
//! # Responsibilities
//! - Claim absolute-form requests (`GET http://host[:port]/path HTTP/1.1`)
//! - Open the upstream leg and replay the request head in origin form
//! - Hand both connections to the relay until either side closes
//!
//! Origin-form requests are left for the rest of the chain. The verdict is
//! always closing: a relayed session never re-enters the keep-alive loop.

use futures_util::future::BoxFuture;

use crate::dispatch::{Handler, Verdict};
use crate::net::conn::Connection;
use crate::relay::{relay, tracing_sink, DiagnosticSink};

/// Handler that relays absolute-form HTTP requests to their origin.
pub struct ForwardProxy {
    sink: DiagnosticSink,
}

impl ForwardProxy {
    /// Builds a forward proxy reporting through `sink`.
    pub fn new(sink: DiagnosticSink) -> Self {
        Self { sink }
    }

    /// Builds a forward proxy reporting through the `tracing` subscriber.
    pub fn with_tracing() -> Self {
        Self::new(tracing_sink())
    }
}

impl Default for ForwardProxy {
    fn default() -> Self {
        Self::with_tracing()
    }
}

impl Handler for ForwardProxy {
    fn process<'a>(&'a self, conn: &'a mut Connection) -> BoxFuture<'a, Verdict> {
        Box::pin(async move {
            let Some((addr, origin_form)) = split_absolute(conn.target()) else {
                return Verdict::NotProcessed;
            };

            let mut upstream = match Connection::open(&addr).await {
                Ok(upstream) => upstream,
                Err(err) => {
                    tracing::warn!(upstream = %addr, error = %err, "upstream connect failed");
                    let body = format!("Upstream unreachable: {addr}");
                    conn.set_status(502);
                    conn.add_header("Content-Type", "text/plain");
                    conn.add_header("Content-Length", &body.len().to_string());
                    conn.respond(&body);
                    return Verdict::Processed;
                }
            };

            // Replay the head in origin form. Proxy-Connection is hop-by-hop
            // and must not reach the origin.
            let mut headers = conn.request_headers().clone();
            headers.remove("proxy-connection");
            let method = conn.method().to_string();
            let version = conn.version().to_string();
            upstream.write_request_head(&method, &origin_form, &version, &headers);

            if let Err(err) = relay("proxy", conn, &mut upstream, &self.sink).await {
                tracing::debug!(upstream = %addr, error = %err, "proxy relay ended with error");
            }
            Verdict::Processed
        })
    }
}

/// Splits an absolute-form `http://` target into a dialable address and the
/// origin-form request target. Anything else is not proxy traffic.
fn split_absolute(target: &str) -> Option<(String, String)> {
    let rest = target.strip_prefix("http://")?;
    let (authority, origin_form) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    if authority.is_empty() {
        return None;
    }
    let addr = if authority.contains(':') {
        authority.to_string()
    } else {
        format!("{authority}:80")
    };
    Some((addr, origin_form.to_string()))
}
