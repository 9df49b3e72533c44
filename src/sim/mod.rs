//! The simulation engine: pure edge resolution, per-kind node executors and
//! the session orchestrator tying them together.

mod executors;
mod session;
pub mod traversal;

pub use session::{EngineConfig, Simulator};
