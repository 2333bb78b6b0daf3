//! Transport error types

use thiserror::Error;

/// Errors from peer transports
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Timed out after {timeout_ms}ms")]
    Timeout { peer: Option<usize>, timeout_ms: u64 },

    #[error("Peer {0} disconnected")]
    Disconnected(usize),

    #[error("Unknown peer {peer} (world size {world_size})")]
    UnknownPeer { peer: usize, world_size: usize },

    #[error("No free port in range {min}..{max}")]
    NoFreePort { min: u16, max: u16 },
}
