//! Hosts-changed notifications
//!
//! The driver publishes a `HostsUpdated` whenever discovery reports a
//! different host set. Other subsystems either register a listener, called
//! synchronously on publish, or subscribe to a broadcast channel.

mod manager;

pub use manager::{HostsUpdated, NotificationManager, NotificationReceiver};
