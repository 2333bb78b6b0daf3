//! Static host list

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use eyre::eyre;
use tracing::debug;

use super::NodeDiscovery;
use crate::domain::HostInfo;

/// Discovery that returns a host list set in code.
///
/// Clones share the list, so a test can change it while a driver polls.
#[derive(Debug, Clone, Default)]
pub struct FixedHosts {
    hosts: Arc<RwLock<Vec<HostInfo>>>,
}

impl FixedHosts {
    pub fn new(hosts: Vec<HostInfo>) -> Self {
        Self {
            hosts: Arc::new(RwLock::new(hosts)),
        }
    }

    /// Replace the host list
    pub fn set_hosts(&self, hosts: Vec<HostInfo>) -> eyre::Result<()> {
        debug!(count = hosts.len(), "FixedHosts::set_hosts: called");
        let mut guard = self.hosts.write().map_err(|_| eyre!("Host list lock poisoned"))?;
        *guard = hosts;
        Ok(())
    }
}

#[async_trait]
impl NodeDiscovery for FixedHosts {
    async fn enumerate_hosts(&self) -> eyre::Result<Vec<HostInfo>> {
        let guard = self.hosts.read().map_err(|_| eyre!("Host list lock poisoned"))?;
        Ok(guard.clone())
    }
}
