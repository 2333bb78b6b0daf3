//! Process-to-process transport used by state sync
//!
//! The state subsystem only needs a blocking "send/receive a blob to a peer"
//! primitive plus a broadcast built on top of it. Everything here is blocking
//! with caller-supplied timeouts; the `StateManager` actor runs it on a
//! dedicated thread.

mod collective;
mod error;
mod memory;
mod port;
mod transport;

pub use collective::{SyncFrame, broadcast};
pub use error::TransportError;
pub use memory::MemoryTransport;
pub use port::bind_free_port;
pub use transport::{LocalTransport, PeerTransport};
