//! Elastic driver
//!
//! Polls discovery on a background task and turns what it sees into
//! `DriverEvent`s pushed onto coordinator channels. The driver never touches
//! coordinator or state directly.

mod core;
mod events;
mod handle;

pub use core::ElasticDriver;
pub use events::{DriverEvent, Interrupt};
pub use handle::DriverHandle;
