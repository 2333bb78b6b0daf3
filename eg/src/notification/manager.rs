//! NotificationManager - fan-out of host membership changes

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::HostInfo;

/// Default broadcast capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// The host set changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostsUpdated {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Full host set after the change
    pub hosts: Vec<HostInfo>,
    pub added: Vec<HostInfo>,
    pub removed: Vec<HostInfo>,
}

impl HostsUpdated {
    /// Diff `previous` against `current`; None if nothing changed
    pub fn diff(previous: &[HostInfo], current: &[HostInfo]) -> Option<Self> {
        let added: Vec<HostInfo> = current.iter().filter(|h| !previous.contains(h)).cloned().collect();
        let removed: Vec<HostInfo> = previous.iter().filter(|h| !current.contains(h)).cloned().collect();

        if added.is_empty() && removed.is_empty() {
            return None;
        }

        Some(Self {
            id: Uuid::now_v7().to_string(),
            timestamp: Utc::now(),
            hosts: current.to_vec(),
            added,
            removed,
        })
    }
}

/// Something that wants to hear about host changes
pub trait NotificationReceiver: Send + Sync {
    fn on_hosts_updated(&self, update: &HostsUpdated);
}

/// Fan-out hub for host changes.
///
/// Cheap to clone; clones share listeners and the broadcast channel.
#[derive(Clone)]
pub struct NotificationManager {
    tx: broadcast::Sender<HostsUpdated>,
    listeners: Arc<RwLock<Vec<Arc<dyn NotificationReceiver>>>>,
}

impl NotificationManager {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "NotificationManager::new: called");
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Add a listener called on every publish
    pub fn register_listener(&self, listener: Arc<dyn NotificationReceiver>) {
        debug!("NotificationManager::register_listener: called");
        match self.listeners.write() {
            Ok(mut listeners) => listeners.push(listener),
            Err(_) => warn!("Listener list lock poisoned; listener not registered"),
        }
    }

    /// Receive updates published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<HostsUpdated> {
        self.tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().map(|l| l.len()).unwrap_or(0)
    }

    /// Deliver `update` to every listener, then to subscribers
    pub fn notify_hosts_updated(&self, update: HostsUpdated) {
        debug!(
            id = %update.id,
            added = update.added.len(),
            removed = update.removed.len(),
            "NotificationManager::notify_hosts_updated: called"
        );

        let listeners = match self.listeners.read() {
            Ok(listeners) => listeners.clone(),
            Err(_) => {
                warn!("Listener list lock poisoned; skipping listeners");
                Vec::new()
            }
        };
        for listener in &listeners {
            listener.on_hosts_updated(&update);
        }

        // No subscribers is fine
        let _ = self.tx.send(update);
    }
}

impl Default for NotificationManager {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(DateTime<Utc>, Vec<HostInfo>)>>,
    }

    impl NotificationReceiver for Recorder {
        fn on_hosts_updated(&self, update: &HostsUpdated) {
            self.events
                .lock()
                .unwrap()
                .push((update.timestamp, update.hosts.clone()));
        }
    }

    fn hosts(names: &[&str]) -> Vec<HostInfo> {
        names.iter().map(|n| HostInfo::new(*n, 1)).collect()
    }

    #[test]
    fn test_diff() {
        assert!(HostsUpdated::diff(&hosts(&["a", "b"]), &hosts(&["a", "b"])).is_none());

        let update = HostsUpdated::diff(&hosts(&["a", "b"]), &hosts(&["b", "c"])).unwrap();
        assert_eq!(update.added, hosts(&["c"]));
        assert_eq!(update.removed, hosts(&["a"]));
        assert_eq!(update.hosts, hosts(&["b", "c"]));
    }

    #[test]
    fn test_slot_change_is_a_change() {
        let before = vec![HostInfo::new("a", 1)];
        let after = vec![HostInfo::new("a", 2)];
        let update = HostsUpdated::diff(&before, &after).unwrap();
        assert_eq!(update.added, after);
        assert_eq!(update.removed, before);
    }

    #[test]
    fn test_listener_receives_updates() {
        let manager = NotificationManager::default();
        let recorder = Arc::new(Recorder::default());
        manager.register_listener(recorder.clone());
        assert_eq!(manager.listener_count(), 1);

        let update = HostsUpdated::diff(&[], &hosts(&["a"])).unwrap();
        manager.notify_hosts_updated(update);

        let events = recorder.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].1, hosts(&["a"]));
    }

    #[tokio::test]
    async fn test_subscriber_receives_updates() {
        let manager = NotificationManager::default();
        let mut rx = manager.subscribe();

        let update = HostsUpdated::diff(&hosts(&["a"]), &[]).unwrap();
        manager.notify_hosts_updated(update.clone());

        assert_eq!(rx.recv().await.unwrap(), update);
    }
}
