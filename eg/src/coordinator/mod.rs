//! Elastic coordinator
//!
//! One per worker. Consumes driver events and maps each to a recovery path:
//! - **Membership changed:** sync from the root rank, reset, then commit
//! - **Node internal error:** restore the last commit
//! - **Shutdown:** stop

mod core;
mod listener;
mod stats;

pub use core::{ElasticCoordinator, RecoveryAction, RecoveryReport};
pub use listener::MembershipListener;
pub use stats::RecoveryStats;
