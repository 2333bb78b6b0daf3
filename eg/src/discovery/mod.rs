//! Node discovery
//!
//! Enumerates the hosts currently available to the job. The driver polls a
//! `NodeDiscovery` and turns changes in the answer into membership events.

mod fixed;
mod script;

pub use fixed::FixedHosts;
pub use script::DiscoveryScript;

use async_trait::async_trait;

use crate::domain::HostInfo;

/// Source of the current host set
#[async_trait]
pub trait NodeDiscovery: Send + Sync {
    /// Current hosts, in the order discovery reports them
    async fn enumerate_hosts(&self) -> eyre::Result<Vec<HostInfo>>;
}
