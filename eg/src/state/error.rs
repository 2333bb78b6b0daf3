//! State error types

use thiserror::Error;

use crate::domain::ValueKind;
use crate::network::TransportError;

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Cannot restore '{key}': nothing has been committed")]
    UncommittedRestore { key: String },

    #[error("Key '{key}' is tracked as {expected} state but was given a {found} value")]
    PartitionMiss {
        key: String,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("No registered handler claims {kind} value '{key}'")]
    UnclaimedValue { key: String, kind: ValueKind },

    #[error("Key '{0}' given more than once")]
    DuplicateKey(String),

    #[error("Unknown key: {0}")]
    UnknownKey(String),

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("Snapshot for '{key}' does not match its handler")]
    SnapshotMismatch { key: String },

    #[error("Peer timeout after {timeout_ms}ms")]
    PeerTimeout { peer: Option<usize>, timeout_ms: u64 },

    #[error("Peer failure: {0}")]
    PeerFailure(String),

    #[error("Sync mismatch: expected {expected}, got {found}")]
    SyncMismatch { expected: String, found: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Reset callback failed: {0}")]
    Callback(String),

    #[error("Channel error")]
    ChannelError,
}

impl StateError {
    /// True for failures of a remote worker rather than of this process.
    ///
    /// These are recovered through the fault-tolerance path (restore).
    pub fn is_peer_failure(&self) -> bool {
        matches!(self, StateError::PeerTimeout { .. } | StateError::PeerFailure(_))
    }
}

impl From<TransportError> for StateError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout { peer, timeout_ms } => StateError::PeerTimeout { peer, timeout_ms },
            other => StateError::PeerFailure(other.to_string()),
        }
    }
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;
