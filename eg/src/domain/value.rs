//! Tracked values: shared special state and plain values

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::tensor::{NamedTensors, Tensor};
use crate::state::StateError;

/// Shared handle to live special state.
///
/// Clones share storage: the application keeps one clone and mutates it
/// between coordinator calls, the state handler keeps another.
pub struct Shared<T> {
    label: &'static str,
    inner: Arc<RwLock<T>>,
}

impl<T> Shared<T> {
    fn with_label(label: &'static str, value: T) -> Self {
        Self {
            label,
            inner: Arc::new(RwLock::new(value)),
        }
    }

    /// Run `f` with read access to the live value
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, StateError> {
        let guard = self
            .inner
            .read()
            .map_err(|_| StateError::LockPoisoned(self.label.to_string()))?;
        Ok(f(&guard))
    }

    /// Run `f` with write access to the live value
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, StateError> {
        let mut guard = self
            .inner
            .write()
            .map_err(|_| StateError::LockPoisoned(self.label.to_string()))?;
        Ok(f(&mut guard))
    }

    /// True if both handles point at the same live storage
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone> Shared<T> {
    /// Deep copy of the live value
    pub fn get(&self) -> Result<T, StateError> {
        self.read(T::clone)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            label: self.label,
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("label", &self.label)
            .field("refs", &Arc::strong_count(&self.inner))
            .finish()
    }
}

/// Live model parameters
pub type Model = Shared<NamedTensors>;

/// Live optimizer state
pub type Optimizer = Shared<OptimizerState>;

impl Model {
    pub fn new(params: NamedTensors) -> Self {
        Self::with_label("model", params)
    }
}

impl Optimizer {
    pub fn new(state: OptimizerState) -> Self {
        Self::with_label("optimizer", state)
    }
}

/// Per-parameter optimizer buffers plus the global step counter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    /// Number of optimizer steps taken
    pub step: u64,

    /// Scalar hyper-parameters (lr, betas, weight decay)
    #[serde(default)]
    pub hyper_params: BTreeMap<String, f64>,

    /// parameter name -> buffer name (e.g. "momentum") -> buffer
    #[serde(default)]
    pub buffers: BTreeMap<String, BTreeMap<String, Tensor>>,
}

impl OptimizerState {
    /// Empty state with a learning rate
    pub fn with_lr(lr: f64) -> Self {
        let mut hyper_params = BTreeMap::new();
        hyper_params.insert("lr".to_string(), lr);
        Self {
            step: 0,
            hyper_params,
            buffers: BTreeMap::new(),
        }
    }

    /// Copy `other` into this state, reusing buffer storage where shapes match
    pub fn copy_from(&mut self, other: &OptimizerState) {
        self.step = other.step;
        self.hyper_params = other.hyper_params.clone();

        self.buffers.retain(|param, _| other.buffers.contains_key(param));
        for (param, saved) in &other.buffers {
            copy_tensors(self.buffers.entry(param.clone()).or_default(), saved);
        }
    }
}

/// Copy `saved` into `live`, reusing tensor storage where shapes match
pub(crate) fn copy_tensors(live: &mut NamedTensors, saved: &NamedTensors) {
    live.retain(|name, _| saved.contains_key(name));
    for (name, tensor) in saved {
        let copied = match live.get_mut(name) {
            Some(existing) => existing.copy_from(tensor),
            None => false,
        };
        if !copied {
            live.insert(name.clone(), tensor.clone());
        }
    }
}

/// Kind tag of a tracked value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Model,
    Optimizer,
    Plain,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::Model => "model",
            ValueKind::Optimizer => "optimizer",
            ValueKind::Plain => "plain",
        };
        write!(f, "{}", s)
    }
}

/// A value handed to `State` at construction or through `State::set`
#[derive(Debug, Clone)]
pub enum StateValue {
    Model(Model),
    Optimizer(Optimizer),
    Plain(Value),
}

impl StateValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            StateValue::Model(_) => ValueKind::Model,
            StateValue::Optimizer(_) => ValueKind::Optimizer,
            StateValue::Plain(_) => ValueKind::Plain,
        }
    }

    /// Plain value, if this is one
    pub fn as_plain(&self) -> Option<&Value> {
        match self {
            StateValue::Plain(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_model(&self) -> Option<&Model> {
        match self {
            StateValue::Model(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_optimizer(&self) -> Option<&Optimizer> {
        match self {
            StateValue::Optimizer(o) => Some(o),
            _ => None,
        }
    }
}

impl From<Model> for StateValue {
    fn from(model: Model) -> Self {
        StateValue::Model(model)
    }
}

impl From<Optimizer> for StateValue {
    fn from(optimizer: Optimizer) -> Self {
        StateValue::Optimizer(optimizer)
    }
}

impl From<Value> for StateValue {
    fn from(value: Value) -> Self {
        StateValue::Plain(value)
    }
}
