//! RegularState - all plain values of a State
//!
//! Keys are fixed at construction. `saved` always holds a full copy of the
//! live map from the last commit, so the two key sets never diverge.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use super::error::StateError;
use super::handler::SyncContext;

/// Name reported for the plain values as a whole
const REGULAR_LABEL: &str = "regular";

/// Key used on the wire when plain values are broadcast
const REGULAR_SYNC_KEY: &str = "__regular__";

/// Live and committed plain values
#[derive(Debug, Clone, Default)]
pub struct RegularState {
    live: BTreeMap<String, Value>,
    saved: Option<BTreeMap<String, Value>>,
    broadcast_on_sync: bool,
}

impl RegularState {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        debug!(keys = values.len(), "RegularState::new: called");
        Self {
            live: values,
            saved: None,
            broadcast_on_sync: false,
        }
    }

    /// Make `sync()` broadcast plain values from the root instead of doing nothing
    pub fn with_broadcast_on_sync(mut self, enabled: bool) -> Self {
        self.broadcast_on_sync = enabled;
        self
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.live.keys()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.live.contains_key(key)
    }

    /// Live value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.live.get(key)
    }

    /// Last committed value
    pub fn saved(&self, key: &str) -> Option<&Value> {
        self.saved.as_ref().and_then(|s| s.get(key))
    }

    /// Overwrite a tracked live value. Does not commit.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), StateError> {
        match self.live.get_mut(key) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(StateError::UnknownKey(key.to_string())),
        }
    }

    pub fn is_committed(&self) -> bool {
        self.saved.is_some()
    }

    /// Owned copy of every live value, not yet published
    pub fn capture(&self) -> BTreeMap<String, Value> {
        self.live.clone()
    }

    /// Make a captured copy the committed one
    pub fn publish(&mut self, saved: BTreeMap<String, Value>) {
        self.saved = Some(saved);
    }

    pub fn commit(&mut self) {
        debug!(keys = self.live.len(), "RegularState::commit: called");
        let saved = self.capture();
        self.publish(saved);
    }

    pub fn restore(&mut self) -> Result<(), StateError> {
        debug!("RegularState::restore: called");
        let saved = self.saved.as_ref().ok_or_else(|| StateError::UncommittedRestore {
            key: REGULAR_LABEL.to_string(),
        })?;
        self.live = saved.clone();
        Ok(())
    }

    /// No-op unless broadcasting was enabled
    pub fn sync(&mut self, ctx: &SyncContext<'_>) -> Result<(), StateError> {
        if !self.broadcast_on_sync {
            return Ok(());
        }
        debug!(rank = ctx.transport.rank(), "RegularState::sync: called");

        let received = ctx.broadcast(REGULAR_SYNC_KEY, || Ok(serde_json::to_value(&self.live)?))?;
        if let Some(body) = received {
            let incoming: BTreeMap<String, Value> = serde_json::from_value(body)?;
            if !incoming.keys().eq(self.live.keys()) {
                return Err(StateError::SyncMismatch {
                    expected: format!("{:?}", self.live.keys().collect::<Vec<_>>()),
                    found: format!("{:?}", incoming.keys().collect::<Vec<_>>()),
                });
            }
            self.live = incoming;
        }
        Ok(())
    }

    /// Extension point; plain values have nothing to reset
    pub fn reset(&mut self) -> Result<(), StateError> {
        Ok(())
    }
}
