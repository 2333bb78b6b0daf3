//! State manager messages
//!
//! Commands and responses for the actor pattern.

use std::fmt;

use tokio::sync::oneshot;

use super::composite::State;
use super::error::StateResponse;
use crate::domain::StateValue;

/// Work run on the actor thread with exclusive access to the state
pub type StateJob = Box<dyn FnOnce(&mut State) + Send>;

/// Commands sent to the StateManager actor
pub enum StateCommand {
    Commit {
        reply: oneshot::Sender<StateResponse<()>>,
    },
    Restore {
        reply: oneshot::Sender<StateResponse<()>>,
    },
    Sync {
        reply: oneshot::Sender<StateResponse<()>>,
    },
    Reset {
        reply: oneshot::Sender<StateResponse<()>>,
    },

    // Attribute access
    Get {
        key: String,
        reply: oneshot::Sender<StateResponse<StateValue>>,
    },
    Set {
        key: String,
        value: StateValue,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    Keys {
        reply: oneshot::Sender<Vec<String>>,
    },

    /// Run arbitrary work against the owned state
    Update { job: StateJob },

    Shutdown,
}

impl fmt::Debug for StateCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateCommand::Commit { .. } => write!(f, "Commit"),
            StateCommand::Restore { .. } => write!(f, "Restore"),
            StateCommand::Sync { .. } => write!(f, "Sync"),
            StateCommand::Reset { .. } => write!(f, "Reset"),
            StateCommand::Get { key, .. } => write!(f, "Get({})", key),
            StateCommand::Set { key, value, .. } => write!(f, "Set({}, {})", key, value.kind()),
            StateCommand::Keys { .. } => write!(f, "Keys"),
            StateCommand::Update { .. } => write!(f, "Update"),
            StateCommand::Shutdown => write!(f, "Shutdown"),
        }
    }
}
