//! ElasticGoose - training state for elastic distributed workers
//!
//! Tracks the state a training job must not lose when workers come and go:
//! model weights, optimizer buffers and plain progress counters. Workers
//! commit known-good checkpoints, restore them after a failure, and sync
//! from an authoritative rank when cluster membership changes.
//!
//! # Modules
//!
//! - [`state`] - handlers, registry, composite `State` and its actor
//! - [`coordinator`] - per-worker recovery loop driven by driver events
//! - [`driver`] - discovery polling and membership/failure signals
//! - [`discovery`] - host enumeration (fixed list or shell script)
//! - [`notification`] - host-change fan-out to listeners
//! - [`network`] - peer transport and broadcast
//! - [`cluster`] - several workers in one process
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod cli;
pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod domain;
pub mod driver;
pub mod network;
pub mod notification;
pub mod state;

pub use cluster::{LocalCluster, Worker};
pub use config::Config;
pub use coordinator::{ElasticCoordinator, RecoveryAction, RecoveryReport, RecoveryStats};
pub use domain::{HostInfo, Model, NamedTensors, Optimizer, OptimizerState, StateValue, Tensor, ValueKind};
pub use driver::{DriverEvent, DriverHandle, ElasticDriver, Interrupt};
pub use state::{HandlerRegistry, RegularState, State, StateError, StateHandler, StateManager};
