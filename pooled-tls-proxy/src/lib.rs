//! Pooling TLS wrapper: a local TCP relay that forwards plaintext client
//! connections onto a pre-warmed reserve of established upstream TLS
//! connections, eliminating handshake latency from the client's critical
//! path.
//!
//! The core is the pair of tightly coupled subsystems in [`pool`] and
//! [`relay`]; everything else in this crate is the external collaborator
//! plumbing around them (CLI, TLS material loading, logging, signals,
//! readiness notification).

pub mod cli;
pub mod dialer;
pub mod error;
pub mod pool;
pub mod readiness;
pub mod relay;
pub mod shutdown;
pub mod tls;
