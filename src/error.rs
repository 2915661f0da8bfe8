//! Fatal errors reported by the stream lifecycle.
//!
//! Hot-path anomalies (malformed packets, sequence gaps, ring overflow) never
//! surface here; they bump counters and the stream keeps running. Only socket
//! and thread setup failures abort a `start()`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to resolve device host '{host}': {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to bind UDP socket on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("stream is already running")]
    AlreadyRunning,
}
