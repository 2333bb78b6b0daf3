//! ElasticCoordinator - per-worker recovery loop

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::stats::RecoveryStats;
use crate::config::ElasticConfig;
use crate::driver::DriverEvent;
use crate::state::{StateError, StateManager, StateResponse};

/// What a coordinator did in response to one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Reconciled with the root rank
    Synced,
    /// Rolled back to the last commit
    Restored,
    /// Sync failed on a peer; rolled back instead
    RestoredAfterPeerFailure,
    Stopped,
}

/// Outcome of one event on one worker
#[derive(Debug, Clone)]
pub struct RecoveryReport {
    pub rank: usize,
    pub event: &'static str,
    pub outcome: Result<RecoveryAction, String>,
}

/// Drives a worker's `State` through the recovery paths.
pub struct ElasticCoordinator {
    config: ElasticConfig,
    state: StateManager,
    events: mpsc::Receiver<DriverEvent>,
    reports: Option<mpsc::UnboundedSender<RecoveryReport>>,
    stats: RecoveryStats,
}

impl ElasticCoordinator {
    pub fn new(config: ElasticConfig, state: StateManager, events: mpsc::Receiver<DriverEvent>) -> Self {
        Self {
            config,
            state,
            events,
            reports: None,
            stats: RecoveryStats::default(),
        }
    }

    /// Send a report for every handled event to `reports`
    pub fn with_reports(mut self, reports: mpsc::UnboundedSender<RecoveryReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    pub fn stats(&self) -> RecoveryStats {
        self.stats
    }

    /// Run until shutdown or until the driver goes away.
    ///
    /// Stops at the first failure that has no recovery path and returns it.
    pub async fn run(mut self) -> StateResponse<RecoveryStats> {
        let rank = self.state.rank();
        info!(rank, "ElasticCoordinator started");

        while let Some(event) = self.events.recv().await {
            let name = event.name();
            let outcome = self.handle(event).await;
            self.report(rank, name, &outcome);

            match outcome {
                Ok(RecoveryAction::Stopped) => break,
                Ok(action) => debug!(rank, ?action, "Event handled"),
                Err(e) => {
                    error!(rank, event = name, error = %e, "Unrecoverable state error");
                    return Err(e);
                }
            }
        }

        info!(rank, stats = %self.stats, "ElasticCoordinator stopped");
        Ok(self.stats)
    }

    /// Apply the recovery path for a single event
    pub async fn handle(&mut self, event: DriverEvent) -> StateResponse<RecoveryAction> {
        let rank = self.state.rank();
        debug!(rank, event = event.name(), "handle: called");

        match event {
            DriverEvent::MembershipChanged(update) => {
                info!(
                    rank,
                    added = update.added.len(),
                    removed = update.removed.len(),
                    "Membership changed, syncing state"
                );
                match self.state.sync().await {
                    Ok(()) => {
                        self.state.reset().await?;
                        if self.config.commit_after_sync {
                            self.state.commit().await?;
                        }
                        self.stats.syncs += 1;
                        Ok(RecoveryAction::Synced)
                    }
                    Err(e) if e.is_peer_failure() => {
                        warn!(rank, error = %e, "Peer failed during sync, restoring");
                        self.stats.peer_failures += 1;
                        self.restore().await?;
                        Ok(RecoveryAction::RestoredAfterPeerFailure)
                    }
                    Err(e) => Err(e),
                }
            }

            DriverEvent::NodeInternalError { host, reason } => {
                warn!(rank, %host, %reason, "Node internal error, restoring");
                self.restore().await?;
                Ok(RecoveryAction::Restored)
            }

            DriverEvent::Shutdown => {
                info!(rank, "Shutdown requested");
                self.state.shutdown().await?;
                Ok(RecoveryAction::Stopped)
            }
        }
    }

    async fn restore(&mut self) -> Result<(), StateError> {
        self.state.restore().await?;
        self.state.reset().await?;
        self.stats.restores += 1;
        Ok(())
    }

    fn report(&self, rank: usize, event: &'static str, outcome: &StateResponse<RecoveryAction>) {
        if let Some(tx) = &self.reports {
            let _ = tx.send(RecoveryReport {
                rank,
                event,
                outcome: outcome.as_ref().copied().map_err(|e| e.to_string()),
            });
        }
    }
}
