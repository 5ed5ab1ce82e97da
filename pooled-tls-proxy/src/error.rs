//! Typed errors for the core. Glue code at the binary edges still uses
//! `anyhow`; these exist so callers of [`crate::dialer::Dialer`] and
//! [`crate::pool::Pool`] can match on the kind of failure.

use std::io;

/// The three outcomes a dial attempt can have: success, timeout, or some
/// other failure along the way.
#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("connect/handshake to upstream timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("failed to connect to upstream: {0}")]
    Connect(#[source] io::Error),

    #[error("TLS handshake with upstream failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("upstream address is not a valid TLS server name: {0}")]
    InvalidServerName(String),
}

/// Errors surfaced by [`crate::pool::Pool::get`]. The pool itself never
/// produces these in steady operation — upstream failure is absorbed and
/// `get()` simply keeps waiting — this only fires once the pool has
/// already been torn down.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("pool is shutting down")]
    Stopped,
}
