//! Network layer: listener setup, connections, TLS.

pub mod conn;
pub mod listener;
pub mod tls;

pub use conn::{Connection, ReadOutcome};
pub use listener::{BindScope, Listener};
pub use tls::{TlsError, TlsIdentity};
