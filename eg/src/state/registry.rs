//! Handler registry - decides which values are special
//!
//! An ordered list of (predicate, constructor) pairs. The first predicate that
//! accepts a value wins; values nobody claims are regular. Classification
//! happens once, when a `State` is built, and is never re-evaluated.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;
use tracing::debug;

use super::error::StateError;
use super::handler::{ModelStateHandler, OptimizerStateHandler, StateHandler};
use crate::domain::{StateValue, ValueKind};

/// Decides whether an entry claims a value
pub type Predicate = Box<dyn Fn(&StateValue) -> bool + Send + Sync>;

/// Builds the handler for a claimed value
pub type Constructor = Box<dyn Fn(&str, StateValue) -> Result<Box<dyn StateHandler>, StateError> + Send + Sync>;

struct HandlerEntry {
    name: String,
    predicate: Predicate,
    constructor: Constructor,
}

/// Result of classifying one value
pub enum Classified {
    Special(Box<dyn StateHandler>),
    Regular(StateValue),
}

/// Special handlers and plain remainders, keyed by name
#[derive(Debug, Default)]
pub struct Partition {
    pub handlers: BTreeMap<String, Box<dyn StateHandler>>,
    pub remainders: BTreeMap<String, Value>,
}

impl Partition {
    /// Every key, handlers first then remainders
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.handlers.keys().chain(self.remainders.keys())
    }
}

/// Ordered list of handler entries
pub struct HandlerRegistry {
    entries: Vec<HandlerEntry>,
}

impl HandlerRegistry {
    /// Registry with no entries; everything is regular
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    /// Registry with the model and optimizer handlers, in that order
    pub fn standard() -> Self {
        Self::empty()
            .with(
                "model",
                |v| v.kind() == ValueKind::Model,
                |key, v| Ok(Box::new(ModelStateHandler::from_value(key, v)?)),
            )
            .with(
                "optimizer",
                |v| v.kind() == ValueKind::Optimizer,
                |key, v| Ok(Box::new(OptimizerStateHandler::from_value(key, v)?)),
            )
    }

    /// Append an entry; it loses ties against every entry already registered
    pub fn register(
        &mut self,
        name: impl Into<String>,
        predicate: impl Fn(&StateValue) -> bool + Send + Sync + 'static,
        constructor: impl Fn(&str, StateValue) -> Result<Box<dyn StateHandler>, StateError> + Send + Sync + 'static,
    ) -> &mut Self {
        let name = name.into();
        debug!(%name, position = self.entries.len(), "HandlerRegistry::register: called");
        self.entries.push(HandlerEntry {
            name,
            predicate: Box::new(predicate),
            constructor: Box::new(constructor),
        });
        self
    }

    /// Builder form of `register`
    pub fn with(
        mut self,
        name: impl Into<String>,
        predicate: impl Fn(&StateValue) -> bool + Send + Sync + 'static,
        constructor: impl Fn(&str, StateValue) -> Result<Box<dyn StateHandler>, StateError> + Send + Sync + 'static,
    ) -> Self {
        self.register(name, predicate, constructor);
        self
    }

    /// Entry names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hand `value` to the first entry that claims it, or give it back as regular
    pub fn classify(&self, key: &str, value: StateValue) -> Result<Classified, StateError> {
        match self.entries.iter().find(|e| (e.predicate)(&value)) {
            Some(entry) => {
                debug!(%key, handler = %entry.name, "classify: claimed");
                Ok(Classified::Special((entry.constructor)(key, value)?))
            }
            None => {
                debug!(%key, kind = %value.kind(), "classify: regular");
                Ok(Classified::Regular(value))
            }
        }
    }

    /// Split named values into handlers and plain remainders.
    ///
    /// Every input key ends up in exactly one of the two maps. A repeated key
    /// is an error, as is a special value that no entry claims (only plain
    /// values can be regular).
    pub fn partition<K: Into<String>>(
        &self,
        values: impl IntoIterator<Item = (K, StateValue)>,
    ) -> Result<Partition, StateError> {
        let mut partition = Partition::default();

        for (key, value) in values {
            let key = key.into();
            if partition.handlers.contains_key(&key) || partition.remainders.contains_key(&key) {
                return Err(StateError::DuplicateKey(key));
            }

            match self.classify(&key, value)? {
                Classified::Special(handler) => {
                    partition.handlers.insert(key, handler);
                }
                Classified::Regular(StateValue::Plain(v)) => {
                    partition.remainders.insert(key, v);
                }
                Classified::Regular(other) => {
                    return Err(StateError::UnclaimedValue {
                        key,
                        kind: other.kind(),
                    });
                }
            }
        }

        debug!(
            handlers = partition.handlers.len(),
            remainders = partition.remainders.len(),
            "partition: done"
        );
        Ok(partition)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry").field("entries", &self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Model, NamedTensors, Optimizer, OptimizerState, Tensor};
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn model() -> Model {
        let mut p = NamedTensors::new();
        p.insert("0.weight".to_string(), Tensor::zeros(vec![10, 10]));
        p.insert("1.weight".to_string(), Tensor::zeros(vec![10, 10]));
        Model::new(p)
    }

    #[test]
    fn test_partition_model_and_plain_values() {
        let registry = HandlerRegistry::standard();
        let partition = registry
            .partition([
                ("model", StateValue::from(model())),
                ("epoch", StateValue::from(json!(0))),
                ("processed_idxs", StateValue::from(json!([1, 2, 3]))),
            ])
            .unwrap();

        assert_eq!(partition.handlers.len(), 1);
        assert_eq!(partition.remainders.len(), 2);
        assert_eq!(partition.handlers["model"].kind(), ValueKind::Model);
        assert_eq!(partition.remainders["epoch"], json!(0));
        assert_eq!(partition.remainders["processed_idxs"], json!([1, 2, 3]));
    }

    #[test]
    fn test_standard_claims_optimizer() {
        let registry = HandlerRegistry::standard();
        let partition = registry
            .partition([("opt", StateValue::from(Optimizer::new(OptimizerState::default())))])
            .unwrap();
        assert_eq!(partition.handlers["opt"].kind(), ValueKind::Optimizer);
        assert_eq!(registry.names(), vec!["model", "optimizer"]);
    }

    #[test]
    fn test_first_match_wins() {
        let hits = Arc::new(AtomicUsize::new(0));
        let second_hits = Arc::clone(&hits);

        let registry = HandlerRegistry::empty()
            .with(
                "first",
                |v| v.kind() == ValueKind::Model,
                |key, v| Ok(Box::new(ModelStateHandler::from_value(key, v)?)),
            )
            .with(
                "second",
                |v| v.kind() == ValueKind::Model,
                move |key, v| {
                    second_hits.fetch_add(1, Ordering::SeqCst);
                    Ok(Box::new(ModelStateHandler::from_value(key, v)?))
                },
            );

        registry.partition([("model", StateValue::from(model()))]).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_registry_rejects_special_values() {
        let registry = HandlerRegistry::empty();
        let err = registry.partition([("model", StateValue::from(model()))]).unwrap_err();
        assert!(matches!(
            err,
            StateError::UnclaimedValue {
                kind: ValueKind::Model,
                ..
            }
        ));
    }

    #[test]
    fn test_duplicate_key() {
        let registry = HandlerRegistry::standard();
        let err = registry
            .partition([("epoch", StateValue::from(json!(0))), ("epoch", StateValue::from(json!(1)))])
            .unwrap_err();
        assert!(matches!(err, StateError::DuplicateKey(ref k) if k == "epoch"));
    }

    #[test]
    fn test_constructor_error_propagates() {
        let registry = HandlerRegistry::empty().with(
            "greedy",
            |_| true,
            |key, v| Ok(Box::new(ModelStateHandler::from_value(key, v)?)),
        );
        let err = registry.partition([("epoch", StateValue::from(json!(0)))]).unwrap_err();
        assert!(matches!(err, StateError::PartitionMiss { .. }));
    }

    fn arb_value() -> impl Strategy<Value = StateValue> {
        prop_oneof![
            any::<i64>().prop_map(|n| StateValue::from(json!(n))),
            ".*".prop_map(|s| StateValue::from(json!(s))),
            Just(()).prop_map(|_| StateValue::from(model())),
            Just(()).prop_map(|_| StateValue::from(Optimizer::new(OptimizerState::default()))),
        ]
    }

    proptest! {
        #[test]
        fn prop_partition_is_complete_and_disjoint(
            values in prop::collection::btree_map("[a-z]{1,8}", arb_value(), 0..12)
        ) {
            let expected: BTreeSet<String> = values.keys().cloned().collect();
            let partition = HandlerRegistry::standard().partition(values).unwrap();

            let handler_keys: BTreeSet<String> = partition.handlers.keys().cloned().collect();
            let remainder_keys: BTreeSet<String> = partition.remainders.keys().cloned().collect();

            prop_assert!(handler_keys.is_disjoint(&remainder_keys));
            let union: BTreeSet<String> = handler_keys.union(&remainder_keys).cloned().collect();
            prop_assert_eq!(union, expected);
            prop_assert_eq!(partition.keys().count(), handler_keys.len() + remainder_keys.len());
        }
    }
}
