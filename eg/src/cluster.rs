//! LocalCluster - several workers in one process
//!
//! Each worker gets its own `State` actor, a `MemoryTransport` endpoint and an
//! `ElasticCoordinator`. A single `DriverHandle` fans events out to all of
//! them, and `raise` waits until every running coordinator has reported.

use std::sync::Arc;

use eyre::{Result, eyre};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ElasticConfig;
use crate::coordinator::{ElasticCoordinator, RecoveryAction, RecoveryReport, RecoveryStats};
use crate::driver::{DriverEvent, DriverHandle};
use crate::network::{MemoryTransport, PeerTransport};
use crate::state::{State, StateManager, StateResponse};

/// One worker of a `LocalCluster`
#[derive(Clone)]
pub struct Worker {
    rank: usize,
    state: StateManager,
    transport: Arc<MemoryTransport>,
}

impl Worker {
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    /// Take this worker off the network; peers see it as failed
    pub fn fail(&self) {
        warn!(rank = self.rank, "Worker failed");
        self.transport.fail();
    }

    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }
}

pub struct LocalCluster {
    workers: Vec<Worker>,
    driver: DriverHandle,
    reports: mpsc::UnboundedReceiver<RecoveryReport>,
    tasks: Vec<JoinHandle<StateResponse<RecoveryStats>>>,
    running: usize,
}

impl LocalCluster {
    /// Spawn `size` workers, building each one's state with `build(rank)`
    pub fn spawn<F>(size: usize, build: F, config: &ElasticConfig) -> Result<Self>
    where
        F: Fn(usize) -> StateResponse<State>,
    {
        debug!(size, "LocalCluster::spawn: called");
        if size == 0 {
            return Err(eyre!("A cluster needs at least one worker"));
        }

        let (driver, receivers) = DriverHandle::fan_out(size, config.channel_buffer);
        let (report_tx, reports) = mpsc::unbounded_channel();

        let mut workers = Vec::with_capacity(size);
        let mut tasks = Vec::with_capacity(size);
        for (transport, events) in MemoryTransport::mesh(size).into_iter().zip(receivers) {
            let transport = Arc::new(transport);
            let rank = transport.rank();
            let state = StateManager::spawn(build(rank)?, transport.clone(), config)?;
            let coordinator = ElasticCoordinator::new(config.clone(), state.clone(), events).with_reports(report_tx.clone());
            tasks.push(tokio::spawn(coordinator.run()));
            workers.push(Worker { rank, state, transport });
        }

        info!(size, "LocalCluster started");
        Ok(Self {
            workers,
            driver,
            reports,
            tasks,
            running: size,
        })
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn worker(&self, rank: usize) -> Option<&Worker> {
        self.workers.get(rank)
    }

    pub fn driver(&self) -> &DriverHandle {
        &self.driver
    }

    /// Deliver `event` to every coordinator and collect one report from each
    /// that is still running. Reports are sorted by rank.
    pub async fn raise(&mut self, event: DriverEvent) -> Result<Vec<RecoveryReport>> {
        debug!(event = event.name(), running = self.running, "LocalCluster::raise: called");
        let expected = self.running;
        self.driver.send(event).await?;

        let mut collected = Vec::with_capacity(expected);
        while collected.len() < expected {
            let report = self
                .reports
                .recv()
                .await
                .ok_or_else(|| eyre!("Every coordinator stopped before reporting"))?;
            if matches!(report.outcome, Ok(RecoveryAction::Stopped) | Err(_)) {
                self.running -= 1;
            }
            collected.push(report);
        }

        collected.sort_by_key(|r| r.rank);
        Ok(collected)
    }

    /// Commit every worker's state
    pub async fn commit_all(&self) -> Result<()> {
        for worker in &self.workers {
            worker.state.commit().await?;
        }
        Ok(())
    }

    /// Stop every coordinator and return their stats by rank
    pub async fn shutdown(mut self) -> Result<Vec<RecoveryStats>> {
        debug!("LocalCluster::shutdown: called");
        if self.running > 0 {
            self.raise(DriverEvent::Shutdown).await?;
        }

        let mut stats = Vec::with_capacity(self.tasks.len());
        for (rank, task) in self.tasks.into_iter().enumerate() {
            match task.await? {
                Ok(s) => stats.push(s),
                Err(e) => {
                    warn!(rank, error = %e, "Coordinator ended with error");
                    stats.push(RecoveryStats::default());
                }
            }
        }
        info!("LocalCluster stopped");
        Ok(stats)
    }
}
