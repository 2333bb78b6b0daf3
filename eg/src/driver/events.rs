//! Driver signals

use thiserror::Error;

use crate::notification::HostsUpdated;

/// Control-flow signals that change what a worker does next.
///
/// These are expected and named, and each has its own recovery path.
#[derive(Debug, Clone, Error)]
pub enum Interrupt {
    /// Hosts joined or left; triggers elastic reconfiguration (sync)
    #[error("Hosts updated: {} added, {} removed", .0.added.len(), .0.removed.len())]
    NodesUpdated(HostsUpdated),

    /// A worker hit an internal error; triggers fault-tolerance restore
    #[error("Node {host} failed: {reason}")]
    NodeInternal { host: String, reason: String },
}

/// Events consumed by the coordinator main loop
#[derive(Debug, Clone)]
pub enum DriverEvent {
    MembershipChanged(HostsUpdated),
    NodeInternalError { host: String, reason: String },
    Shutdown,
}

impl DriverEvent {
    /// Short name for logs and reports
    pub fn name(&self) -> &'static str {
        match self {
            DriverEvent::MembershipChanged(_) => "membership-changed",
            DriverEvent::NodeInternalError { .. } => "node-internal-error",
            DriverEvent::Shutdown => "shutdown",
        }
    }
}

impl From<Interrupt> for DriverEvent {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::NodesUpdated(update) => DriverEvent::MembershipChanged(update),
            Interrupt::NodeInternal { host, reason } => DriverEvent::NodeInternalError { host, reason },
        }
    }
}
