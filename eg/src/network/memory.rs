//! In-process transport mesh
//!
//! Every endpoint holds a sender to every other endpoint's inbox. Delivery is
//! FIFO per sender, which is all the broadcast protocol relies on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::debug;

use super::error::TransportError;
use super::transport::PeerTransport;

type Frame = (usize, Vec<u8>);

/// One endpoint of a fully-connected in-process mesh
pub struct MemoryTransport {
    rank: usize,
    peers: Vec<Sender<Frame>>,
    inbox: Mutex<Receiver<Frame>>,
    alive: Arc<Vec<AtomicBool>>,
}

impl MemoryTransport {
    /// Build `world_size` connected endpoints, indexed by rank
    pub fn mesh(world_size: usize) -> Vec<MemoryTransport> {
        debug!(world_size, "MemoryTransport::mesh: called");
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..world_size).map(|_| mpsc::channel::<Frame>()).unzip();
        let alive = Arc::new((0..world_size).map(|_| AtomicBool::new(true)).collect::<Vec<_>>());

        receivers
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| MemoryTransport {
                rank,
                peers: senders.clone(),
                inbox: Mutex::new(inbox),
                alive: Arc::clone(&alive),
            })
            .collect()
    }

    /// Mark this endpoint dead; its peers see it as disconnected from now on
    pub fn fail(&self) {
        debug!(rank = self.rank, "MemoryTransport::fail: called");
        self.alive[self.rank].store(false, Ordering::SeqCst);
    }

    /// True until `fail()` is called on this endpoint
    pub fn is_alive(&self) -> bool {
        self.alive[self.rank].load(Ordering::SeqCst)
    }

    fn peer_alive(&self, peer: usize) -> bool {
        self.alive[peer].load(Ordering::SeqCst)
    }
}

impl PeerTransport for MemoryTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, peer: usize, blob: Vec<u8>, _timeout: Duration) -> Result<(), TransportError> {
        if !self.is_alive() {
            return Err(TransportError::Disconnected(self.rank));
        }
        let tx = self.peers.get(peer).ok_or(TransportError::UnknownPeer {
            peer,
            world_size: self.peers.len(),
        })?;
        if !self.peer_alive(peer) {
            return Err(TransportError::Disconnected(peer));
        }
        tx.send((self.rank, blob)).map_err(|_| TransportError::Disconnected(peer))
    }

    fn receive(&self, timeout: Duration) -> Result<(usize, Vec<u8>), TransportError> {
        if !self.is_alive() {
            return Err(TransportError::Disconnected(self.rank));
        }
        let inbox = self.inbox.lock().map_err(|_| TransportError::Disconnected(self.rank))?;
        loop {
            let (from, blob) = inbox.recv_timeout(timeout).map_err(|e| match e {
                RecvTimeoutError::Timeout => TransportError::Timeout {
                    peer: None,
                    timeout_ms: timeout.as_millis() as u64,
                },
                RecvTimeoutError::Disconnected => TransportError::Disconnected(self.rank),
            })?;
            // Frames a peer sent before it died are dropped
            if self.peer_alive(from) {
                return Ok((from, blob));
            }
            debug!(rank = self.rank, from, "MemoryTransport::receive: dropping frame from failed peer");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Duration = Duration::from_millis(200);

    #[test]
    fn test_mesh_delivers_with_sender_rank() {
        let mesh = MemoryTransport::mesh(3);
        mesh[0].send(2, b"hello".to_vec(), T).unwrap();

        let (from, blob) = mesh[2].receive(T).unwrap();
        assert_eq!(from, 0);
        assert_eq!(blob, b"hello");
    }

    #[test]
    fn test_fifo_per_sender() {
        let mesh = MemoryTransport::mesh(2);
        for i in 0..5u8 {
            mesh[1].send(0, vec![i], T).unwrap();
        }
        for i in 0..5u8 {
            assert_eq!(mesh[0].receive(T).unwrap().1, vec![i]);
        }
    }

    #[test]
    fn test_receive_times_out() {
        let mesh = MemoryTransport::mesh(2);
        let err = mesh[1].receive(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, TransportError::Timeout { timeout_ms: 20, .. }));
    }

    #[test]
    fn test_unknown_peer() {
        let mesh = MemoryTransport::mesh(2);
        assert!(matches!(
            mesh[0].send(5, vec![], T),
            Err(TransportError::UnknownPeer { peer: 5, world_size: 2 })
        ));
    }

    #[test]
    fn test_failed_peer_is_disconnected() {
        let mesh = MemoryTransport::mesh(2);
        mesh[1].fail();

        assert!(!mesh[1].is_alive());
        assert!(matches!(mesh[0].send(1, vec![], T), Err(TransportError::Disconnected(1))));
        assert!(matches!(mesh[1].receive(T), Err(TransportError::Disconnected(1))));
    }

    #[test]
    fn test_frames_from_failed_peer_are_dropped() {
        let mesh = MemoryTransport::mesh(2);
        mesh[1].send(0, vec![1], T).unwrap();
        mesh[1].fail();

        assert!(matches!(
            mesh[0].receive(Duration::from_millis(20)),
            Err(TransportError::Timeout { .. })
        ));
    }
}
