//! Bidirectional byte relay between two connections.
//!
//! # Responsibilities
//! - Pump bytes both ways until either side closes or errors
//! - Never lose a partial read: a received unit is written out completely
//!   before the next read attempt on that direction
//! - Report progress through an injected diagnostic sink
//!
//! This is the mechanism that puts TLS termination in front of a backend
//! with no TLS material of its own, and that carries forward-proxy traffic
//! after the request head has been replayed upstream.

use std::future::poll_fn;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::net::conn::Connection;

/// Receives human-readable relay trace lines. Sinks must not block; the
/// default forwards to `tracing` at trace level.
pub type DiagnosticSink = Arc<dyn Fn(&str) + Send + Sync>;

/// A sink that forwards relay traces to the `tracing` subscriber.
pub fn tracing_sink() -> DiagnosticSink {
    Arc::new(|line: &str| tracing::trace!(target: "portico::relay", "{line}"))
}

/// One read unit. Nothing beyond a single unit is buffered per direction.
const READ_UNIT: usize = 16 * 1024;

/// Per-direction pump state: at most one in-flight read unit.
struct Direction {
    buf: Box<[u8]>,
    start: usize,
    end: usize,
    eof: bool,
    label: &'static str,
}

impl Direction {
    fn new(label: &'static str) -> Self {
        Self {
            buf: vec![0u8; READ_UNIT].into_boxed_slice(),
            start: 0,
            end: 0,
            eof: false,
            label,
        }
    }

    /// Pumps `src` into `dst` until the direction would block, closes, or
    /// errors. `Ready(Ok(()))` means the direction saw end-of-stream and its
    /// last unit is fully written and flushed.
    fn poll_pump(
        &mut self,
        cx: &mut Context<'_>,
        src: &mut Connection,
        dst: &mut Connection,
        tag: &str,
        sink: &DiagnosticSink,
    ) -> Poll<std::io::Result<()>> {
        loop {
            // Drain the pending unit completely before reading again.
            while self.start < self.end {
                match dst.poll_forward(cx, &self.buf[self.start..self.end]) {
                    Poll::Ready(Ok(0)) => {
                        return Poll::Ready(Err(std::io::Error::new(
                            std::io::ErrorKind::WriteZero,
                            "relay destination stopped accepting bytes",
                        )))
                    }
                    Poll::Ready(Ok(n)) => self.start += n,
                    Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                    Poll::Pending => return Poll::Pending,
                }
            }

            if self.eof {
                return match dst.poll_flush_io(cx) {
                    Poll::Ready(Ok(())) => Poll::Ready(Ok(())),
                    Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
                    Poll::Pending => Poll::Pending,
                };
            }

            match src.poll_receive(cx, &mut self.buf) {
                Poll::Ready(Ok(0)) => {
                    sink(&format!("{tag}: {} end of stream", self.label));
                    self.eof = true;
                }
                Poll::Ready(Ok(n)) => {
                    sink(&format!("{tag}: {} {n} bytes", self.label));
                    self.start = 0;
                    self.end = n;
                }
                Poll::Ready(Err(err)) => return Poll::Ready(Err(err)),
                Poll::Pending => {
                    // No data right now; let the destination see what it has.
                    let _ = dst.poll_flush_io(cx);
                    return Poll::Pending;
                }
            }
        }
    }
}

/// Pairs two connections and pumps bytes bidirectionally until either side
/// reports a definitive close or error. Both connections are shut down
/// before returning.
///
/// Queued output on either connection (such as a replayed request head) is
/// flushed before the pump starts.
pub async fn relay(
    tag: &str,
    client: &mut Connection,
    backend: &mut Connection,
    sink: &DiagnosticSink,
) -> std::io::Result<()> {
    client.flush().await?;
    backend.flush().await?;
    sink(&format!(
        "{tag}: relay started ({} <-> {})",
        client.label(),
        backend.label()
    ));

    let mut up = Direction::new("up");
    let mut down = Direction::new("down");
    let result = poll_fn(|cx| {
        if let Poll::Ready(done) = up.poll_pump(cx, client, backend, tag, sink) {
            return Poll::Ready(done);
        }
        if let Poll::Ready(done) = down.poll_pump(cx, backend, client, tag, sink) {
            return Poll::Ready(done);
        }
        Poll::Pending
    })
    .await;

    let _ = client.shutdown().await;
    let _ = backend.shutdown().await;
    match &result {
        Ok(()) => sink(&format!("{tag}: relay finished")),
        Err(err) => sink(&format!("{tag}: relay failed: {err}")),
    }
    result
}
