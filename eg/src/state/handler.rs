//! StateHandler trait and the special-state handlers
//!
//! A handler wraps exactly one special value. Its snapshot is produced only by
//! `commit()`; replacing the live value with `set_value()` never touches it, so
//! the last commit stays the durable fallback until the next explicit commit.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::error::StateError;
use crate::domain::{Model, NamedTensors, Optimizer, OptimizerState, Shared, StateValue, Tensor, ValueKind};
use crate::network::{PeerTransport, broadcast};

/// Everything a handler needs to reconcile with its peers
pub struct SyncContext<'a> {
    pub transport: &'a dyn PeerTransport,
    /// Rank whose live values are authoritative
    pub root: usize,
    /// Frames from earlier rounds are stale and dropped
    pub round: u64,
    pub timeout: Duration,
}

impl<'a> SyncContext<'a> {
    pub fn new(transport: &'a dyn PeerTransport, root: usize, timeout: Duration) -> Self {
        Self {
            transport,
            root,
            round: 0,
            timeout,
        }
    }

    pub fn with_round(mut self, round: u64) -> Self {
        self.round = round;
        self
    }

    /// Broadcast `key` from the root; non-root ranks get the root's value back
    pub fn broadcast(
        &self,
        key: &str,
        local: impl FnOnce() -> Result<Value, StateError>,
    ) -> Result<Option<Value>, StateError> {
        broadcast(self.transport, self.root, self.round, key, local, self.timeout)
    }
}

/// A captured, not yet published, commit of one handler
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerSnapshot {
    Model(NamedTensors),
    Optimizer(OptimizerState),
}

/// Commit/restore/sync over one piece of special state
pub trait StateHandler: Send + fmt::Debug {
    /// Key this handler is tracked under
    fn key(&self) -> &str;

    fn kind(&self) -> ValueKind;

    /// The live value (a shared handle, not a copy)
    fn value(&self) -> StateValue;

    /// Replace the live value. Does not commit.
    fn set_value(&mut self, value: StateValue) -> Result<(), StateError>;

    /// Deep copy the live value without publishing it
    fn capture(&self) -> Result<HandlerSnapshot, StateError>;

    /// Make a captured snapshot the committed one
    fn publish(&mut self, snapshot: HandlerSnapshot) -> Result<(), StateError>;

    fn is_committed(&self) -> bool;

    /// Copy the committed snapshot back into the live value
    fn restore(&mut self) -> Result<(), StateError>;

    /// Reconcile the live value with the root rank
    fn sync(&mut self, ctx: &SyncContext<'_>) -> Result<(), StateError>;

    fn reset(&mut self) -> Result<(), StateError> {
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StateError> {
        let snapshot = self.capture()?;
        self.publish(snapshot)
    }
}

/// Special state that lives behind a `Shared` handle
pub trait SpecialState: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: ValueKind;

    fn wrap(handle: Shared<Self>) -> StateValue;

    /// Take the handle back out, or return the value untouched if it is another kind
    fn unwrap(value: StateValue) -> Result<Shared<Self>, StateValue>;

    /// Overwrite `live` with `saved`, reusing live storage where possible
    fn restore_into(live: &mut Self, saved: &Self);

    /// Every tensor's element count matches its shape
    fn is_well_formed(&self) -> bool;

    fn into_snapshot(self) -> HandlerSnapshot;

    fn from_snapshot(snapshot: HandlerSnapshot) -> Option<Self>;
}

impl SpecialState for NamedTensors {
    const KIND: ValueKind = ValueKind::Model;

    fn wrap(handle: Model) -> StateValue {
        StateValue::Model(handle)
    }

    fn unwrap(value: StateValue) -> Result<Model, StateValue> {
        match value {
            StateValue::Model(m) => Ok(m),
            other => Err(other),
        }
    }

    fn restore_into(live: &mut Self, saved: &Self) {
        crate::domain::copy_tensors(live, saved);
    }

    fn is_well_formed(&self) -> bool {
        self.values().all(Tensor::is_consistent)
    }

    fn into_snapshot(self) -> HandlerSnapshot {
        HandlerSnapshot::Model(self)
    }

    fn from_snapshot(snapshot: HandlerSnapshot) -> Option<Self> {
        match snapshot {
            HandlerSnapshot::Model(t) => Some(t),
            _ => None,
        }
    }
}

impl SpecialState for OptimizerState {
    const KIND: ValueKind = ValueKind::Optimizer;

    fn wrap(handle: Optimizer) -> StateValue {
        StateValue::Optimizer(handle)
    }

    fn unwrap(value: StateValue) -> Result<Optimizer, StateValue> {
        match value {
            StateValue::Optimizer(o) => Ok(o),
            other => Err(other),
        }
    }

    fn restore_into(live: &mut Self, saved: &Self) {
        live.copy_from(saved);
    }

    fn is_well_formed(&self) -> bool {
        self.buffers.values().flat_map(|b| b.values()).all(Tensor::is_consistent)
    }

    fn into_snapshot(self) -> HandlerSnapshot {
        HandlerSnapshot::Optimizer(self)
    }

    fn from_snapshot(snapshot: HandlerSnapshot) -> Option<Self> {
        match snapshot {
            HandlerSnapshot::Optimizer(o) => Some(o),
            _ => None,
        }
    }
}

/// Handler over a shared special value
pub struct SharedHandler<T: SpecialState> {
    key: String,
    value: Shared<T>,
    snapshot: Option<T>,
    committed_at: Option<DateTime<Utc>>,
}

/// Handler for model parameters
pub type ModelStateHandler = SharedHandler<NamedTensors>;

/// Handler for optimizer buffers and step counters
pub type OptimizerStateHandler = SharedHandler<OptimizerState>;

impl<T: SpecialState> SharedHandler<T> {
    pub fn new(key: impl Into<String>, value: Shared<T>) -> Self {
        let key = key.into();
        debug!(%key, kind = %T::KIND, "SharedHandler::new: called");
        Self {
            key,
            value,
            snapshot: None,
            committed_at: None,
        }
    }

    /// Build from a `StateValue`, failing if it is the wrong kind
    pub fn from_value(key: &str, value: StateValue) -> Result<Self, StateError> {
        match T::unwrap(value) {
            Ok(handle) => Ok(Self::new(key, handle)),
            Err(other) => Err(StateError::PartitionMiss {
                key: key.to_string(),
                expected: T::KIND,
                found: other.kind(),
            }),
        }
    }

    /// The committed copy, if any
    pub fn snapshot(&self) -> Option<&T> {
        self.snapshot.as_ref()
    }

    pub fn committed_at(&self) -> Option<DateTime<Utc>> {
        self.committed_at
    }
}

impl<T: SpecialState> fmt::Debug for SharedHandler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedHandler")
            .field("key", &self.key)
            .field("kind", &T::KIND)
            .field("committed_at", &self.committed_at)
            .finish()
    }
}

impl<T: SpecialState> StateHandler for SharedHandler<T> {
    fn key(&self) -> &str {
        &self.key
    }

    fn kind(&self) -> ValueKind {
        T::KIND
    }

    fn value(&self) -> StateValue {
        T::wrap(self.value.clone())
    }

    fn set_value(&mut self, value: StateValue) -> Result<(), StateError> {
        debug!(key = %self.key, "set_value: called");
        match T::unwrap(value) {
            Ok(handle) => {
                self.value = handle;
                Ok(())
            }
            Err(other) => Err(StateError::PartitionMiss {
                key: self.key.clone(),
                expected: T::KIND,
                found: other.kind(),
            }),
        }
    }

    fn capture(&self) -> Result<HandlerSnapshot, StateError> {
        Ok(self.value.get()?.into_snapshot())
    }

    fn publish(&mut self, snapshot: HandlerSnapshot) -> Result<(), StateError> {
        let saved = T::from_snapshot(snapshot).ok_or_else(|| StateError::SnapshotMismatch { key: self.key.clone() })?;
        self.snapshot = Some(saved);
        self.committed_at = Some(Utc::now());
        debug!(key = %self.key, "publish: committed");
        Ok(())
    }

    fn is_committed(&self) -> bool {
        self.snapshot.is_some()
    }

    fn restore(&mut self) -> Result<(), StateError> {
        debug!(key = %self.key, "restore: called");
        let saved = self
            .snapshot
            .as_ref()
            .ok_or_else(|| StateError::UncommittedRestore { key: self.key.clone() })?;
        self.value.update(|live| T::restore_into(live, saved))
    }

    fn sync(&mut self, ctx: &SyncContext<'_>) -> Result<(), StateError> {
        debug!(key = %self.key, rank = ctx.transport.rank(), "sync: called");
        let received = ctx.broadcast(&self.key, || Ok(self.value.read(|v| serde_json::to_value(v))??))?;
        if let Some(body) = received {
            let incoming: T = serde_json::from_value(body)?;
            if !incoming.is_well_formed() {
                return Err(StateError::SyncMismatch {
                    expected: format!("{} '{}' with tensors matching their shapes", T::KIND, self.key),
                    found: format!("malformed {} from rank {}", T::KIND, ctx.root),
                });
            }
            self.value.update(|live| T::restore_into(live, &incoming))?;
        }
        Ok(())
    }
}
