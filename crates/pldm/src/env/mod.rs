//! Environment traits and wrappers.
//!
//! Provides the core `PldmEnv` trait that all environments must implement,
//! the goal-conditioned `GoalEnv` extension, plus wrappers for episode
//! statistics, action clipping and time limits.

mod traits;
mod wrappers;

pub use traits::{EnvInfo, GoalEnv, PldmEnv, StepResult};
pub use wrappers::{ClipAction, EpisodeStats, TimeLimit};
