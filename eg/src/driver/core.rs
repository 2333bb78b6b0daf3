//! ElasticDriver - discovery poll loop

use std::sync::Arc;
use std::time::Duration;

use eyre::Result;
use tracing::{debug, error, info};

use super::handle::DriverHandle;
use crate::coordinator::MembershipListener;
use crate::discovery::NodeDiscovery;
use crate::domain::HostInfo;
use crate::notification::{HostsUpdated, NotificationManager};

/// Polls discovery and reports membership changes.
///
/// The first successful poll records the baseline host set and raises
/// nothing. Every later poll that differs from the previous one is published
/// on the `NotificationManager`. A `MembershipListener` registered at
/// construction turns it into `DriverEvent::MembershipChanged` for the
/// coordinators behind `handle`.
pub struct ElasticDriver {
    discovery: Arc<dyn NodeDiscovery>,
    notifications: NotificationManager,
    handle: DriverHandle,
    poll_interval: Duration,
    last_hosts: Option<Vec<HostInfo>>,
}

impl ElasticDriver {
    pub fn new(
        discovery: Arc<dyn NodeDiscovery>,
        notifications: NotificationManager,
        handle: DriverHandle,
        poll_interval: Duration,
    ) -> Self {
        notifications.register_listener(Arc::new(MembershipListener::new(handle.clone())));
        Self {
            discovery,
            notifications,
            handle,
            poll_interval,
            last_hosts: None,
        }
    }

    async fn check_for_updates(&mut self) -> Result<bool> {
        let current = self.discovery.enumerate_hosts().await?;

        let Some(previous) = &self.last_hosts else {
            debug!(count = current.len(), "Initial host set");
            self.last_hosts = Some(current);
            return Ok(false);
        };

        let Some(update) = HostsUpdated::diff(previous, &current) else {
            debug!(count = current.len(), "Host set unchanged");
            return Ok(false);
        };

        info!(
            id = %update.id,
            added = update.added.len(),
            removed = update.removed.len(),
            "Host set changed"
        );
        self.last_hosts = Some(current);
        self.notifications.notify_hosts_updated(update);
        Ok(true)
    }

    /// Run the poll loop until every coordinator has gone away
    pub async fn run(mut self) -> Result<()> {
        info!(interval_ms = self.poll_interval.as_millis() as u64, "ElasticDriver started");

        loop {
            if self.handle.is_closed() {
                info!("ElasticDriver stopping: no coordinators left");
                return Ok(());
            }

            if let Err(e) = self.check_for_updates().await {
                error!(error = %e, "Error polling for host changes");
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Run a single poll
    pub async fn check_once(&mut self) -> Result<bool> {
        self.check_for_updates().await
    }

    pub fn last_hosts(&self) -> Option<&[HostInfo]> {
        self.last_hosts.as_deref()
    }

    pub fn handle(&self) -> &DriverHandle {
        &self.handle
    }
}
