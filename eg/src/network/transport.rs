//! PeerTransport trait and the single-process transport

use std::time::Duration;

use super::error::TransportError;

/// Blocking point-to-point transport between the workers of one job
pub trait PeerTransport: Send + Sync {
    /// This worker's rank in `0..world_size()`
    fn rank(&self) -> usize;

    /// Number of workers in the job
    fn world_size(&self) -> usize;

    /// Send a blob to `peer`, returning once it is accepted for delivery
    fn send(&self, peer: usize, blob: Vec<u8>, timeout: Duration) -> Result<(), TransportError>;

    /// Receive the next blob from any peer, with the sender's rank
    fn receive(&self, timeout: Duration) -> Result<(usize, Vec<u8>), TransportError>;
}

/// Transport for a job with a single worker; there is nobody to talk to
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTransport;

impl PeerTransport for LocalTransport {
    fn rank(&self) -> usize {
        0
    }

    fn world_size(&self) -> usize {
        1
    }

    fn send(&self, peer: usize, _blob: Vec<u8>, _timeout: Duration) -> Result<(), TransportError> {
        Err(TransportError::UnknownPeer { peer, world_size: 1 })
    }

    fn receive(&self, timeout: Duration) -> Result<(usize, Vec<u8>), TransportError> {
        Err(TransportError::Timeout {
            peer: None,
            timeout_ms: timeout.as_millis() as u64,
        })
    }
}
