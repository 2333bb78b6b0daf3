//! Domain types for elasticgoose
//!
//! Live training state as the application sees it: tensors, shared model and
//! optimizer handles, plain values, and the hosts that make up the cluster.

mod host;
mod tensor;
mod value;

pub use host::HostInfo;
pub use tensor::{NamedTensors, Tensor};
pub use value::{Model, Optimizer, OptimizerState, Shared, StateValue, ValueKind};

pub(crate) use value::copy_tensors;
