//! Broadcast from an authoritative rank

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::error::TransportError;
use super::transport::PeerTransport;
use crate::state::StateError;

/// One keyed piece of state on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncFrame {
    /// Sync round the frame belongs to; every worker counts rounds the same way
    pub round: u64,
    pub key: String,
    pub body: Value,
}

/// Broadcast the value for `key` from `root` to every other rank.
///
/// `local` is only evaluated on the root. The root gets `None` back (its live
/// value already is the agreed one); every other rank gets the root's value.
///
/// The root skips peers that are already gone and keeps sending to the rest.
/// Non-root ranks drop frames left over from earlier rounds. A frame from the
/// wrong sender, from a later round or for the wrong key is a `SyncMismatch`,
/// which means the workers disagree about what is being synced.
pub fn broadcast(
    transport: &dyn PeerTransport,
    root: usize,
    round: u64,
    key: &str,
    local: impl FnOnce() -> Result<Value, StateError>,
    timeout: Duration,
) -> Result<Option<Value>, StateError> {
    let rank = transport.rank();
    let world_size = transport.world_size();
    debug!(%key, rank, root, round, world_size, "broadcast: called");

    if world_size <= 1 {
        return Ok(None);
    }

    if rank == root {
        let frame = SyncFrame {
            round,
            key: key.to_string(),
            body: local()?,
        };
        let blob = serde_json::to_vec(&frame)?;
        for peer in (0..world_size).filter(|&p| p != root) {
            match transport.send(peer, blob.clone(), timeout) {
                Ok(()) => {}
                Err(TransportError::Disconnected(gone)) if gone == peer => {
                    warn!(%key, peer, round, "broadcast: skipping disconnected peer");
                }
                Err(e) => return Err(e.into()),
            }
        }
        debug!(%key, round, bytes = blob.len(), "broadcast: sent");
        return Ok(None);
    }

    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let (from, blob) = transport.receive(remaining)?;
        let frame: SyncFrame = serde_json::from_slice(&blob)?;

        if from == root && frame.round < round {
            debug!(%key, stale = frame.round, round, "broadcast: dropping frame from earlier round");
            continue;
        }
        if from != root || frame.round != round || frame.key != key {
            return Err(StateError::SyncMismatch {
                expected: format!("{}@{}#{}", key, root, round),
                found: format!("{}@{}#{}", frame.key, from, frame.round),
            });
        }
        debug!(%key, from, round, "broadcast: received");
        return Ok(Some(frame.body));
    }
}
