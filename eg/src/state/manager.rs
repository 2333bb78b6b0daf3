//! StateManager - actor that owns a State
//!
//! The state and its transport live on a dedicated thread. Commands arrive
//! over a channel and run one at a time, so a commit, restore or sync always
//! runs to completion before anything else touches the state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::composite::State;
use super::error::{StateError, StateResponse};
use super::handler::SyncContext;
use super::messages::{StateCommand, StateJob};
use crate::config::ElasticConfig;
use crate::domain::StateValue;
use crate::network::PeerTransport;

/// Handle to send commands to the StateManager
#[derive(Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
    rank: usize,
    world_size: usize,
}

impl StateManager {
    /// Spawn a new StateManager actor
    ///
    /// `elastic.sync-regular` turns on plain-value broadcast for the state.
    pub fn spawn(mut state: State, transport: Arc<dyn PeerTransport>, config: &ElasticConfig) -> eyre::Result<Self> {
        let rank = transport.rank();
        let world_size = transport.world_size();
        debug!(rank, world_size, "spawn: called");

        if config.sync_regular {
            state.set_regular_broadcast(true);
        }

        let (tx, rx) = mpsc::channel(config.channel_buffer);
        let root = config.root_rank;
        let timeout = config.sync_timeout();

        std::thread::Builder::new()
            .name(format!("state-manager-{}", rank))
            .spawn(move || actor_loop(state, transport, rx, root, timeout))?;

        info!(rank, world_size, "StateManager spawned");
        Ok(Self { tx, rank, world_size })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> StateCommand) -> Result<T, StateError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)
    }

    /// Snapshot every tracked key
    pub async fn commit(&self) -> StateResponse<()> {
        debug!(rank = self.rank, "commit: called");
        self.request(|reply| StateCommand::Commit { reply }).await?
    }

    /// Roll every tracked key back to the last commit
    pub async fn restore(&self) -> StateResponse<()> {
        debug!(rank = self.rank, "restore: called");
        self.request(|reply| StateCommand::Restore { reply }).await?
    }

    /// Reconcile with the root rank
    pub async fn sync(&self) -> StateResponse<()> {
        debug!(rank = self.rank, "sync: called");
        self.request(|reply| StateCommand::Sync { reply }).await?
    }

    /// Run reset hooks
    pub async fn reset(&self) -> StateResponse<()> {
        debug!(rank = self.rank, "reset: called");
        self.request(|reply| StateCommand::Reset { reply }).await?
    }

    /// Live value of `key`
    pub async fn get(&self, key: &str) -> StateResponse<StateValue> {
        debug!(rank = self.rank, %key, "get: called");
        self.request(|reply| StateCommand::Get {
            key: key.to_string(),
            reply,
        })
        .await?
    }

    /// Replace the live value of `key` without committing
    pub async fn set(&self, key: &str, value: impl Into<StateValue>) -> StateResponse<()> {
        debug!(rank = self.rank, %key, "set: called");
        let value = value.into();
        self.request(|reply| StateCommand::Set {
            key: key.to_string(),
            value,
            reply,
        })
        .await?
    }

    /// Every tracked key, sorted
    pub async fn keys(&self) -> StateResponse<Vec<String>> {
        debug!(rank = self.rank, "keys: called");
        self.request(|reply| StateCommand::Keys { reply }).await
    }

    /// Run `f` on the actor thread with exclusive access to the state
    pub async fn update<R: Send + 'static>(&self, f: impl FnOnce(&mut State) -> R + Send + 'static) -> StateResponse<R> {
        debug!(rank = self.rank, "update: called");
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: StateJob = Box::new(move |state| {
            let _ = reply_tx.send(f(state));
        });
        self.tx
            .send(StateCommand::Update { job })
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)
    }

    /// Shutdown the actor
    pub async fn shutdown(&self) -> StateResponse<()> {
        debug!(rank = self.rank, "shutdown: called");
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }
}

/// The actor loop that owns the State
fn actor_loop(
    mut state: State,
    transport: Arc<dyn PeerTransport>,
    mut rx: mpsc::Receiver<StateCommand>,
    root: usize,
    timeout: Duration,
) {
    let rank = transport.rank();
    let mut round: u64 = 0;
    debug!(rank, "actor_loop: started");

    while let Some(cmd) = rx.blocking_recv() {
        debug!(rank, ?cmd, "actor_loop: received command");
        match cmd {
            StateCommand::Commit { reply } => {
                let _ = reply.send(state.commit());
            }

            StateCommand::Restore { reply } => {
                let _ = reply.send(state.restore());
            }

            StateCommand::Sync { reply } => {
                round += 1;
                let ctx = SyncContext::new(transport.as_ref(), root, timeout).with_round(round);
                let _ = reply.send(state.sync(&ctx));
            }

            StateCommand::Reset { reply } => {
                let _ = reply.send(state.reset());
            }

            StateCommand::Get { key, reply } => {
                let _ = reply.send(state.get(&key));
            }

            StateCommand::Set { key, value, reply } => {
                let _ = reply.send(state.set(&key, value));
            }

            StateCommand::Keys { reply } => {
                let _ = reply.send(state.keys());
            }

            StateCommand::Update { job } => {
                job(&mut state);
            }

            StateCommand::Shutdown => {
                info!(rank, "StateManager shutting down");
                break;
            }
        }
    }

    debug!(rank, "StateManager actor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Model, NamedTensors, Tensor};
    use crate::network::{LocalTransport, MemoryTransport};
    use serde_json::json;

    fn model(fill: f32) -> Model {
        let mut p = NamedTensors::new();
        p.insert("w".to_string(), Tensor::filled(vec![2], fill));
        Model::new(p)
    }

    fn spawn_local(state: State) -> StateManager {
        StateManager::spawn(state, Arc::new(LocalTransport), &ElasticConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_commit_restore_through_actor() {
        let state = State::builder()
            .model(model(1.0))
            .value("epoch", json!(2))
            .value("batch", json!(5))
            .build()
            .unwrap();
        let manager = spawn_local(state);

        manager.commit().await.unwrap();
        manager.set("epoch", json!(3)).await.unwrap();
        manager.set("batch", json!(6)).await.unwrap();
        manager.restore().await.unwrap();

        let epoch = manager.get("epoch").await.unwrap();
        assert_eq!(epoch.as_plain(), Some(&json!(2)));
        let batch: u64 = manager.update(|s| s.get_as("batch")).await.unwrap().unwrap();
        assert_eq!(batch, 5);

        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_restore_before_commit_is_an_error() {
        let manager = spawn_local(State::builder().model(model(0.0)).build().unwrap());
        let err = manager.restore().await.unwrap_err();
        assert!(matches!(err, StateError::UncommittedRestore { .. }));
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_keys() {
        let manager = spawn_local(
            State::builder()
                .model(model(0.0))
                .value("epoch", json!(0))
                .build()
                .unwrap(),
        );
        assert_eq!(manager.keys().await.unwrap(), vec!["epoch", "model"]);
        assert_eq!(manager.rank(), 0);
        assert_eq!(manager.world_size(), 1);
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_fail() {
        let manager = spawn_local(State::builder().value("epoch", json!(0)).build().unwrap());
        manager.shutdown().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(matches!(manager.commit().await, Err(StateError::ChannelError)));
    }

    #[tokio::test]
    async fn test_sync_across_actors() {
        let config = ElasticConfig {
            sync_timeout_ms: 1_000,
            ..Default::default()
        };
        let mut mesh = MemoryTransport::mesh(2).into_iter();
        let root_transport: Arc<dyn PeerTransport> = Arc::new(mesh.next().unwrap());
        let peer_transport: Arc<dyn PeerTransport> = Arc::new(mesh.next().unwrap());

        let root = StateManager::spawn(
            State::builder().model(model(3.0)).build().unwrap(),
            root_transport,
            &config,
        )
        .unwrap();
        let peer_model = model(0.0);
        let peer = StateManager::spawn(
            State::builder().model(peer_model.clone()).build().unwrap(),
            peer_transport,
            &config,
        )
        .unwrap();

        let (a, b) = tokio::join!(root.sync(), peer.sync());
        a.unwrap();
        b.unwrap();

        assert_eq!(peer_model.read(|p| p["w"].data.clone()).unwrap(), vec![3.0, 3.0]);
    }

    #[tokio::test]
    async fn test_sync_times_out_without_root() {
        let config = ElasticConfig {
            sync_timeout_ms: 30,
            ..Default::default()
        };
        let mut mesh = MemoryTransport::mesh(2);
        let peer_transport: Arc<dyn PeerTransport> = Arc::new(mesh.remove(1));

        let peer = StateManager::spawn(State::builder().model(model(0.0)).build().unwrap(), peer_transport, &config)
            .unwrap();
        let err = peer.sync().await.unwrap_err();
        assert!(err.is_peer_failure());
    }

    #[tokio::test]
    async fn test_late_frame_is_not_applied_on_next_sync() {
        let config = ElasticConfig {
            sync_timeout_ms: 50,
            ..Default::default()
        };
        let mut mesh = MemoryTransport::mesh(2).into_iter();
        let root_transport: Arc<dyn PeerTransport> = Arc::new(mesh.next().unwrap());
        let peer_transport: Arc<dyn PeerTransport> = Arc::new(mesh.next().unwrap());

        let root_model = model(1.0);
        let root = StateManager::spawn(
            State::builder().model(root_model.clone()).build().unwrap(),
            root_transport,
            &config,
        )
        .unwrap();
        let peer_model = model(0.0);
        let peer = StateManager::spawn(
            State::builder().model(peer_model.clone()).build().unwrap(),
            peer_transport,
            &config,
        )
        .unwrap();

        // The peer gives up on round 1, then the root's round 1 frame lands late
        assert!(peer.sync().await.unwrap_err().is_peer_failure());
        root.sync().await.unwrap();

        root_model
            .update(|p| p.get_mut("w").unwrap().map_inplace(|_| 2.0))
            .unwrap();
        let (a, b) = tokio::join!(root.sync(), peer.sync());
        a.unwrap();
        b.unwrap();

        assert_eq!(peer_model.read(|p| p["w"].data.clone()).unwrap(), vec![2.0, 2.0]);
    }
}
