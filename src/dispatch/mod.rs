//! Request dispatch chain.
//!
//! # Responsibilities
//! - Drive the per-connection request/response loop
//! - Try handlers in registration order, first non-NotProcessed verdict wins
//! - Enforce the keep-alive contract (reusable verdict + Content-Length)
//! - Reject well-formed but unmatched requests with a 400
//!
//! An unparseable stream is closed silently with no response; an unmatched
//! but well-formed request gets an explicit 400. The asymmetry is part of
//! the engine's contract.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::net::conn::{Connection, ReadOutcome};

/// Outcome of one handler's attempt at a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The handler did not recognize the request; try the next one.
    NotProcessed,
    /// The handler wrote a complete response; the connection closes.
    Processed,
    /// The handler wrote a complete response with `Content-Length`; the
    /// connection may serve another request.
    ProcessedAndReusable,
}

/// A pluggable request processor.
///
/// Handlers are tried in registration order against each parsed request and
/// write their response through the [`Connection`] they are given. The
/// dispatcher treats them as stateless; any state they keep is their own
/// concern.
pub trait Handler: Send + Sync {
    fn process<'a>(&'a self, conn: &'a mut Connection) -> BoxFuture<'a, Verdict>;
}

/// Drives the request loop of one connection through an ordered handler
/// chain.
pub struct Dispatcher {
    handlers: Vec<Arc<dyn Handler>>,
}

impl Dispatcher {
    /// Builds a dispatcher over handlers in priority order.
    pub fn new(handlers: Vec<Arc<dyn Handler>>) -> Self {
        Self { handlers }
    }

    /// Runs the connection until it terminates.
    ///
    /// Requests on one connection are strictly sequential: each fully
    /// completes (or the connection dies) before the next head is read.
    pub async fn run(&self, conn: &mut Connection) {
        loop {
            match conn.read_request().await {
                ReadOutcome::Request => {}
                // Silent close: no response is attempted for a stream that
                // could not even be parsed.
                ReadOutcome::Closed | ReadOutcome::Malformed => break,
            }

            tracing::debug!(
                conn = %conn.label(),
                method = %conn.method(),
                target = %conn.target(),
                "request received"
            );

            match self.dispatch_one(conn).await {
                Verdict::NotProcessed => {
                    reject(conn);
                    let _ = conn.flush().await;
                    break;
                }
                Verdict::Processed => {
                    let _ = conn.flush().await;
                    break;
                }
                Verdict::ProcessedAndReusable => {
                    if !conn.response_has_length() {
                        // Without a length the client cannot frame the body;
                        // closure is the only correct framing.
                        let _ = conn.flush().await;
                        break;
                    }
                    if let Err(err) = conn.flush().await {
                        tracing::debug!(conn = %conn.label(), error = %err, "flush failed");
                        break;
                    }
                }
            }
        }
        let _ = conn.shutdown().await;
    }

    /// Tries handlers in order; stops at the first non-NotProcessed verdict.
    async fn dispatch_one(&self, conn: &mut Connection) -> Verdict {
        for handler in &self.handlers {
            match handler.process(conn).await {
                Verdict::NotProcessed => continue,
                verdict => return verdict,
            }
        }
        Verdict::NotProcessed
    }
}

/// Writes the 400 response for a well-formed request no handler claimed.
fn reject(conn: &mut Connection) {
    let body = format!(
        "Invalid request: {} {} {}",
        conn.method(),
        conn.target(),
        conn.version()
    );
    tracing::debug!(conn = %conn.label(), target = %conn.target(), "no handler matched");
    conn.set_status(400);
    conn.add_header("Content-Type", "text/plain");
    conn.add_header("Content-Length", &body.len().to_string());
    conn.respond(&body);
}
