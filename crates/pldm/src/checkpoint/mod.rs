//! Checkpointing for world models and baselines.
//!
//! Provides:
//! - `Checkpointable` trait for components that can be saved/restored
//! - `CheckpointManager` for rotation, best tracking and loading
//! - `CheckpointState` for the JSON metadata stored next to the weights

mod manager;
mod state;

pub use manager::{CheckpointConfig, CheckpointManager};
pub use state::{CheckpointMetrics, CheckpointState, Checkpointable};
