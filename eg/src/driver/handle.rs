//! DriverHandle - sending side of the driver event channels

use eyre::{Result, eyre};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::events::{DriverEvent, Interrupt};

/// Delivers driver events to one or more coordinators.
///
/// Cloneable; workers use it to raise interrupts, the driver to report
/// membership changes.
#[derive(Clone)]
pub struct DriverHandle {
    targets: Vec<mpsc::Sender<DriverEvent>>,
}

impl DriverHandle {
    /// Handle plus the receiver for a single coordinator
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<DriverEvent>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { targets: vec![tx] }, rx)
    }

    /// Handle plus one receiver per coordinator
    pub fn fan_out(count: usize, buffer: usize) -> (Self, Vec<mpsc::Receiver<DriverEvent>>) {
        let (targets, receivers): (Vec<_>, Vec<_>) = (0..count).map(|_| mpsc::channel(buffer)).unzip();
        (Self { targets }, receivers)
    }

    /// Deliver `event` to every coordinator still listening.
    ///
    /// Fails only when no coordinator is left.
    pub async fn send(&self, event: DriverEvent) -> Result<()> {
        debug!(event = event.name(), targets = self.targets.len(), "DriverHandle::send: called");
        let mut delivered = 0;
        for tx in &self.targets {
            if tx.send(event.clone()).await.is_ok() {
                delivered += 1;
            }
        }
        if delivered == 0 {
            return Err(eyre!("Coordinator channel closed"));
        }
        Ok(())
    }

    /// Deliver `event` without waiting for channel space.
    ///
    /// Coordinators whose channel is full or closed are skipped. Fails only
    /// when none took the event.
    pub fn try_send(&self, event: DriverEvent) -> Result<()> {
        debug!(event = event.name(), targets = self.targets.len(), "DriverHandle::try_send: called");
        let mut delivered = 0;
        for tx in &self.targets {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(event = event.name(), "Coordinator channel full, event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        if delivered == 0 {
            return Err(eyre!("No coordinator accepted {}", event.name()));
        }
        Ok(())
    }

    /// Raise a named interrupt
    pub async fn raise(&self, interrupt: Interrupt) -> Result<()> {
        debug!(%interrupt, "DriverHandle::raise: called");
        self.send(interrupt.into()).await
    }

    /// Ask every coordinator to stop
    pub async fn shutdown(&self) -> Result<()> {
        self.send(DriverEvent::Shutdown).await
    }

    /// True once every coordinator has gone away
    pub fn is_closed(&self) -> bool {
        self.targets.iter().all(|tx| tx.is_closed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out_reaches_every_receiver() {
        let (handle, mut receivers) = DriverHandle::fan_out(3, 4);
        handle
            .raise(Interrupt::NodeInternal {
                host: "h".to_string(),
                reason: "r".to_string(),
            })
            .await
            .unwrap();

        for rx in &mut receivers {
            assert_eq!(rx.recv().await.unwrap().name(), "node-internal-error");
        }
    }

    #[tokio::test]
    async fn test_send_skips_closed_receivers() {
        let (handle, mut receivers) = DriverHandle::fan_out(2, 4);
        drop(receivers.remove(0));

        handle.shutdown().await.unwrap();
        assert_eq!(receivers[0].recv().await.unwrap().name(), "shutdown");
        assert!(!handle.is_closed());
    }

    #[tokio::test]
    async fn test_all_closed() {
        let (handle, rx) = DriverHandle::channel(1);
        drop(rx);
        assert!(handle.is_closed());
        assert!(handle.shutdown().await.is_err());
    }

    #[tokio::test]
    async fn test_try_send_skips_full_channel() {
        let (handle, mut receivers) = DriverHandle::fan_out(2, 1);
        handle.try_send(DriverEvent::Shutdown).unwrap();
        // Both channels are full now
        assert!(handle.try_send(DriverEvent::Shutdown).is_err());

        assert_eq!(receivers[0].recv().await.unwrap().name(), "shutdown");
        assert_eq!(receivers[1].recv().await.unwrap().name(), "shutdown");
    }
}
