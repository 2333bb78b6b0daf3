//! Checkpoint, restore and sync of training state
//!
//! - [`HandlerRegistry`] classifies values as special or regular, once
//! - [`StateHandler`]s own snapshots of special state (model, optimizer)
//! - [`RegularState`] owns snapshots of plain values
//! - [`State`] composes them behind one commit/restore/sync/reset contract
//! - [`StateManager`] is the single-owner actor the coordinator talks to

mod composite;
mod error;
mod handler;
mod manager;
mod messages;
mod registry;
mod regular;

pub use composite::{ResetCallback, State, StateBuilder};
pub use error::{StateError, StateResponse};
pub use handler::{
    HandlerSnapshot, ModelStateHandler, OptimizerStateHandler, SharedHandler, SpecialState, StateHandler, SyncContext,
};
pub use manager::StateManager;
pub use messages::{StateCommand, StateJob};
pub use registry::{Classified, Constructor, HandlerRegistry, Partition, Predicate};
pub use regular::RegularState;
