//! State - the unit an application holds
//!
//! Aggregates the special-state handlers and one RegularState behind a single
//! commit/restore/sync/reset contract. Every tracked key is readable and
//! writable through `get`/`set`.
//!
//! Commit and restore are all-or-nothing: commit captures every source into
//! temporaries before publishing any of them, and restore checks that every
//! source has a snapshot before touching live values.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use super::error::StateError;
use super::handler::{StateHandler, SyncContext};
use super::registry::HandlerRegistry;
use super::regular::RegularState;
use crate::domain::{Model, Optimizer, StateValue, ValueKind};

/// Callback run at the end of `State::reset`
pub type ResetCallback = Box<dyn FnMut(&mut State) -> Result<(), StateError> + Send>;

/// Special handlers plus regular values, committed and restored together
pub struct State {
    handlers: BTreeMap<String, Box<dyn StateHandler>>,
    regular: RegularState,
    reset_callbacks: Vec<ResetCallback>,
    commit_count: u64,
    last_commit: Option<DateTime<Utc>>,
}

impl State {
    pub fn builder() -> StateBuilder {
        StateBuilder::default()
    }

    /// Build from an optional model, an optional optimizer and named plain values.
    ///
    /// The model and optimizer are tracked as "model" and "optimizer".
    pub fn new<K: Into<String>>(
        registry: &HandlerRegistry,
        model: Option<Model>,
        optimizer: Option<Optimizer>,
        values: impl IntoIterator<Item = (K, Value)>,
    ) -> Result<Self, StateError> {
        let mut named: Vec<(String, StateValue)> = Vec::new();
        if let Some(model) = model {
            named.push(("model".to_string(), model.into()));
        }
        if let Some(optimizer) = optimizer {
            named.push(("optimizer".to_string(), optimizer.into()));
        }
        named.extend(values.into_iter().map(|(k, v)| (k.into(), StateValue::Plain(v))));
        Self::from_values(registry, named)
    }

    /// Classify every value with `registry` and build the state
    pub fn from_values<K: Into<String>>(
        registry: &HandlerRegistry,
        values: impl IntoIterator<Item = (K, StateValue)>,
    ) -> Result<Self, StateError> {
        let partition = registry.partition(values)?;
        info!(
            handlers = partition.handlers.len(),
            regular = partition.remainders.len(),
            "State created"
        );
        Ok(Self {
            handlers: partition.handlers,
            regular: RegularState::new(partition.remainders),
            reset_callbacks: Vec::new(),
            commit_count: 0,
            last_commit: None,
        })
    }

    /// Replace the regular-state container's sync behavior
    pub fn set_regular_broadcast(&mut self, enabled: bool) {
        self.regular = std::mem::take(&mut self.regular).with_broadcast_on_sync(enabled);
    }

    // === Attribute access ===

    /// Every tracked key, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.handlers.keys().chain(self.regular.keys()).cloned().collect();
        keys.sort();
        keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.handlers.contains_key(key) || self.regular.contains(key)
    }

    /// How `key` was classified at construction
    pub fn kind(&self, key: &str) -> Option<ValueKind> {
        match self.handlers.get(key) {
            Some(handler) => Some(handler.kind()),
            None if self.regular.contains(key) => Some(ValueKind::Plain),
            None => None,
        }
    }

    /// Current live value of `key`
    pub fn get(&self, key: &str) -> Result<StateValue, StateError> {
        if let Some(handler) = self.handlers.get(key) {
            return Ok(handler.value());
        }
        self.regular
            .get(key)
            .map(|v| StateValue::Plain(v.clone()))
            .ok_or_else(|| StateError::UnknownKey(key.to_string()))
    }

    /// Current live plain value of `key`, deserialized
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, StateError> {
        match self.get(key)? {
            StateValue::Plain(v) => Ok(serde_json::from_value(v)?),
            other => Err(StateError::PartitionMiss {
                key: key.to_string(),
                expected: ValueKind::Plain,
                found: other.kind(),
            }),
        }
    }

    /// Replace the live value of `key`. Never commits.
    ///
    /// The value must be of the kind `key` was classified as.
    pub fn set(&mut self, key: &str, value: impl Into<StateValue>) -> Result<(), StateError> {
        let value = value.into();
        debug!(%key, kind = %value.kind(), "State::set: called");
        if let Some(handler) = self.handlers.get_mut(key) {
            return handler.set_value(value);
        }
        if !self.regular.contains(key) {
            return Err(StateError::UnknownKey(key.to_string()));
        }
        match value {
            StateValue::Plain(v) => self.regular.set(key, v),
            other => Err(StateError::PartitionMiss {
                key: key.to_string(),
                expected: ValueKind::Plain,
                found: other.kind(),
            }),
        }
    }

    /// Serialize `value` and store it as the live plain value of `key`
    pub fn set_as<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StateError> {
        let value = serde_json::to_value(value)?;
        self.set(key, value)
    }

    /// Live model handle tracked under `key`
    pub fn model(&self, key: &str) -> Option<Model> {
        self.handlers.get(key).and_then(|h| h.value().as_model().cloned())
    }

    /// Live optimizer handle tracked under `key`
    pub fn optimizer(&self, key: &str) -> Option<Optimizer> {
        self.handlers.get(key).and_then(|h| h.value().as_optimizer().cloned())
    }

    pub fn handler(&self, key: &str) -> Option<&dyn StateHandler> {
        self.handlers.get(key).map(|h| h.as_ref())
    }

    pub fn regular(&self) -> &RegularState {
        &self.regular
    }

    // === Commit / restore / sync / reset ===

    /// Snapshot every tracked key.
    ///
    /// All sources are captured before any is published, so a failure leaves
    /// the previous commit fully in place.
    pub fn commit(&mut self) -> Result<(), StateError> {
        debug!(commit = self.commit_count + 1, "State::commit: called");

        let mut captured = Vec::with_capacity(self.handlers.len());
        for (key, handler) in &self.handlers {
            captured.push((key.clone(), handler.capture()?));
        }
        let regular = self.regular.capture();

        for (key, snapshot) in captured {
            if let Some(handler) = self.handlers.get_mut(&key) {
                handler.publish(snapshot)?;
            }
        }
        self.regular.publish(regular);

        self.commit_count += 1;
        self.last_commit = Some(Utc::now());
        debug!(commit = self.commit_count, "State::commit: done");
        Ok(())
    }

    /// Roll every tracked key back to its last committed value.
    ///
    /// Fails with `UncommittedRestore` without touching anything if any source
    /// has never been committed.
    pub fn restore(&mut self) -> Result<(), StateError> {
        debug!(commit = self.commit_count, "State::restore: called");

        if let Some(handler) = self.handlers.values().find(|h| !h.is_committed()) {
            return Err(StateError::UncommittedRestore {
                key: handler.key().to_string(),
            });
        }
        if !self.regular.is_committed() {
            return self.regular.restore();
        }

        for handler in self.handlers.values_mut() {
            handler.restore()?;
        }
        self.regular.restore()?;

        info!(commit = self.commit_count, "State restored");
        Ok(())
    }

    /// Reconcile live values with the root rank, handlers in key order then regular values
    pub fn sync(&mut self, ctx: &SyncContext<'_>) -> Result<(), StateError> {
        debug!(rank = ctx.transport.rank(), root = ctx.root, "State::sync: called");
        for handler in self.handlers.values_mut() {
            handler.sync(ctx)?;
        }
        self.regular.sync(ctx)
    }

    /// Reset every source, then run the registered reset callbacks in order
    pub fn reset(&mut self) -> Result<(), StateError> {
        debug!(callbacks = self.reset_callbacks.len(), "State::reset: called");
        for handler in self.handlers.values_mut() {
            handler.reset()?;
        }
        self.regular.reset()?;

        let mut callbacks = std::mem::take(&mut self.reset_callbacks);
        let result = callbacks.iter_mut().try_for_each(|cb| cb(self));
        // Callbacks registered during reset go after the existing ones
        callbacks.append(&mut self.reset_callbacks);
        self.reset_callbacks = callbacks;
        result
    }

    pub fn register_reset_callback(
        &mut self,
        callback: impl FnMut(&mut State) -> Result<(), StateError> + Send + 'static,
    ) {
        self.reset_callbacks.push(Box::new(callback));
    }

    pub fn is_committed(&self) -> bool {
        self.commit_count > 0
    }

    pub fn commit_count(&self) -> u64 {
        self.commit_count
    }

    pub fn last_commit(&self) -> Option<DateTime<Utc>> {
        self.last_commit
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("State")
            .field("handlers", &self.handlers)
            .field("regular", &self.regular)
            .field("reset_callbacks", &self.reset_callbacks.len())
            .field("commit_count", &self.commit_count)
            .finish()
    }
}

/// Builder for `State`
#[derive(Default)]
pub struct StateBuilder {
    registry: Option<HandlerRegistry>,
    values: Vec<(String, StateValue)>,
    broadcast_regular: bool,
}

impl StateBuilder {
    /// Use `registry` instead of `HandlerRegistry::standard()`
    pub fn registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Track `model` under "model"
    pub fn model(self, model: Model) -> Self {
        self.value("model", model)
    }

    /// Track `optimizer` under "optimizer"
    pub fn optimizer(self, optimizer: Optimizer) -> Self {
        self.value("optimizer", optimizer)
    }

    pub fn value(mut self, key: impl Into<String>, value: impl Into<StateValue>) -> Self {
        self.values.push((key.into(), value.into()));
        self
    }

    /// Broadcast plain values from the root on sync
    pub fn broadcast_regular(mut self, enabled: bool) -> Self {
        self.broadcast_regular = enabled;
        self
    }

    pub fn build(self) -> Result<State, StateError> {
        let registry = self.registry.unwrap_or_default();
        let mut state = State::from_values(&registry, self.values)?;
        state.set_regular_broadcast(self.broadcast_regular);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NamedTensors, OptimizerState, Tensor};
    use crate::network::{LocalTransport, MemoryTransport};
    use serde_json::json;
    use std::time::Duration;

    fn model(fill: f32) -> Model {
        let mut p = NamedTensors::new();
        p.insert("w".to_string(), Tensor::filled(vec![3], fill));
        Model::new(p)
    }

    fn weight(m: &Model) -> Vec<f32> {
        m.read(|p| p["w"].data.clone()).unwrap()
    }

    fn training_state(m: &Model) -> State {
        State::builder()
            .model(m.clone())
            .value("epoch", json!(0))
            .value("batch", json!(0))
            .build()
            .unwrap()
    }

    #[test]
    fn test_one_handler_two_regular() {
        let state = training_state(&model(0.0));
        assert_eq!(state.keys(), vec!["batch", "epoch", "model"]);
        assert_eq!(state.kind("model"), Some(ValueKind::Model));
        assert_eq!(state.kind("epoch"), Some(ValueKind::Plain));
        assert_eq!(state.regular().len(), 2);
        assert!(state.handler("model").is_some());
    }

    #[test]
    fn test_new_with_model_and_optimizer() {
        let registry = HandlerRegistry::standard();
        let state = State::new(
            &registry,
            Some(model(0.0)),
            Some(Optimizer::new(OptimizerState::with_lr(0.1))),
            [("epoch", json!(0))],
        )
        .unwrap();
        assert_eq!(state.keys(), vec!["epoch", "model", "optimizer"]);
        assert!(state.optimizer("optimizer").is_some());
    }

    #[test]
    fn test_commit_mutate_restore() {
        let m = model(1.0);
        let mut state = training_state(&m);
        state.set("epoch", json!(2)).unwrap();
        state.set("batch", json!(5)).unwrap();
        state.commit().unwrap();

        state.set("epoch", json!(3)).unwrap();
        state.set("batch", json!(6)).unwrap();
        m.update(|p| p.get_mut("w").unwrap().map_inplace(|x| x * 10.0)).unwrap();
        state.restore().unwrap();

        assert_eq!(state.get_as::<u64>("epoch").unwrap(), 2);
        assert_eq!(state.get_as::<u64>("batch").unwrap(), 5);
        assert_eq!(weight(&m), vec![1.0; 3]);
    }

    #[test]
    fn test_second_commit_wins() {
        let mut state = training_state(&model(0.0));
        state.set("epoch", json!(1)).unwrap();
        state.commit().unwrap();
        state.set("epoch", json!(2)).unwrap();
        state.commit().unwrap();
        state.set("epoch", json!(3)).unwrap();

        state.restore().unwrap();
        assert_eq!(state.get_as::<u64>("epoch").unwrap(), 2);
        assert_eq!(state.commit_count(), 2);
        assert!(state.last_commit().is_some());
    }

    #[test]
    fn test_restore_twice_is_stable() {
        let mut state = training_state(&model(0.0));
        state.set("epoch", json!(4)).unwrap();
        state.commit().unwrap();
        state.set("epoch", json!(5)).unwrap();

        state.restore().unwrap();
        state.restore().unwrap();
        assert_eq!(state.get_as::<u64>("epoch").unwrap(), 4);
    }

    #[test]
    fn test_restore_before_commit_touches_nothing() {
        let mut state = training_state(&model(0.0));
        state.set("epoch", json!(7)).unwrap();

        let err = state.restore().unwrap_err();
        assert!(matches!(err, StateError::UncommittedRestore { ref key } if key == "model"));
        assert_eq!(state.get_as::<u64>("epoch").unwrap(), 7);
        assert!(!state.is_committed());
    }

    #[test]
    fn test_set_value_then_restore_returns_old_model() {
        let old = model(1.0);
        let mut state = training_state(&old);
        state.commit().unwrap();

        let new = model(8.0);
        state.set("model", new.clone()).unwrap();
        state.restore().unwrap();

        assert_eq!(weight(&new), vec![1.0; 3]);
        assert!(state.model("model").unwrap().ptr_eq(&new));
    }

    #[test]
    fn test_classification_is_fixed() {
        let mut state = training_state(&model(0.0));
        let err = state.set("epoch", model(1.0)).unwrap_err();
        assert!(matches!(
            err,
            StateError::PartitionMiss {
                expected: ValueKind::Plain,
                found: ValueKind::Model,
                ..
            }
        ));

        let err = state.set("model", json!(1)).unwrap_err();
        assert!(matches!(err, StateError::PartitionMiss { .. }));

        assert!(matches!(state.get_as::<u64>("model"), Err(StateError::PartitionMiss { .. })));
    }

    #[test]
    fn test_unknown_key() {
        let mut state = training_state(&model(0.0));
        assert!(matches!(state.get("lr"), Err(StateError::UnknownKey(_))));
        assert!(matches!(state.set("lr", json!(0.1)), Err(StateError::UnknownKey(_))));
        assert_eq!(state.kind("lr"), None);
    }

    #[test]
    fn test_duplicate_model_key() {
        let err = State::builder()
            .model(model(0.0))
            .value("model", json!(1))
            .build()
            .unwrap_err();
        assert!(matches!(err, StateError::DuplicateKey(_)));
    }

    #[test]
    fn test_set_as_and_get_as() {
        let mut state = State::builder().value("seen", json!([])).build().unwrap();
        state.set_as("seen", &vec![1u32, 2, 3]).unwrap();
        assert_eq!(state.get_as::<Vec<u32>>("seen").unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_plain_only_state_restore() {
        let mut state = State::builder().value("epoch", json!(0)).build().unwrap();
        assert!(matches!(state.restore(), Err(StateError::UncommittedRestore { .. })));
        state.commit().unwrap();
        state.set("epoch", json!(1)).unwrap();
        state.restore().unwrap();
        assert_eq!(state.get_as::<u64>("epoch").unwrap(), 0);
    }

    #[test]
    fn test_reset_runs_callbacks_in_order() {
        let mut state = State::builder().value("lr", json!(0.1)).value("resets", json!(0)).build().unwrap();
        state.register_reset_callback(|s| {
            let n: u64 = s.get_as("resets")?;
            s.set("resets", json!(n + 1))
        });
        state.register_reset_callback(|s| {
            let lr: f64 = s.get_as("lr")?;
            s.set("lr", json!(lr * 2.0))
        });

        state.reset().unwrap();
        state.reset().unwrap();

        assert_eq!(state.get_as::<u64>("resets").unwrap(), 2);
        assert_eq!(state.get_as::<f64>("lr").unwrap(), 0.4);
    }

    #[test]
    fn test_reset_callback_error_propagates() {
        let mut state = State::builder().value("epoch", json!(0)).build().unwrap();
        state.register_reset_callback(|_| Err(StateError::Callback("boom".to_string())));
        assert!(matches!(state.reset(), Err(StateError::Callback(_))));
        // Still registered after failing
        assert!(state.reset().is_err());
    }

    #[test]
    fn test_sync_single_process() {
        let m = model(2.0);
        let mut state = training_state(&m);
        state
            .sync(&SyncContext::new(&LocalTransport, 0, Duration::from_millis(10)))
            .unwrap();
        assert_eq!(weight(&m), vec![2.0; 3]);
    }

    #[test]
    fn test_sync_two_workers() {
        let mesh = MemoryTransport::mesh(2);
        let timeout = Duration::from_millis(500);

        let root_model = model(4.0);
        let mut root = State::builder()
            .model(root_model)
            .value("epoch", json!(6))
            .broadcast_regular(true)
            .build()
            .unwrap();
        root.sync(&SyncContext::new(&mesh[0], 0, timeout)).unwrap();

        let peer_model = model(0.0);
        let mut peer = State::builder()
            .model(peer_model.clone())
            .value("epoch", json!(0))
            .broadcast_regular(true)
            .build()
            .unwrap();
        peer.sync(&SyncContext::new(&mesh[1], 0, timeout)).unwrap();

        assert_eq!(weight(&peer_model), vec![4.0; 3]);
        assert_eq!(peer.get_as::<u64>("epoch").unwrap(), 6);
    }
}
