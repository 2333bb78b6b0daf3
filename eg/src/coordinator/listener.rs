//! MembershipListener - host changes into coordinator events

use tracing::{debug, warn};

use crate::driver::{DriverEvent, DriverHandle};
use crate::notification::{HostsUpdated, NotificationReceiver};

/// Turns every published host change into `DriverEvent::MembershipChanged`
/// on the coordinators behind `handle`.
pub struct MembershipListener {
    handle: DriverHandle,
}

impl MembershipListener {
    pub fn new(handle: DriverHandle) -> Self {
        Self { handle }
    }
}

impl NotificationReceiver for MembershipListener {
    fn on_hosts_updated(&self, update: &HostsUpdated) {
        debug!(id = %update.id, "MembershipListener::on_hosts_updated: called");
        if let Err(e) = self.handle.try_send(DriverEvent::MembershipChanged(update.clone())) {
            warn!(id = %update.id, error = %e, "Membership change not delivered");
        }
    }
}
