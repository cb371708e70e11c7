//! # PLDM
//!
//! Planning with Latent Dynamics Models, learned from reward-free offline data.
//!
//! ## Overview
//!
//! PLDM provides:
//! - Goal-conditioned environment abstractions with the `PldmEnv` / `GoalEnv` traits
//! - Offline trajectory datasets, exploration policies and parallel data collection
//! - Sampling-based latent planners (MPPI and CEM) over any `WorldModel`
//! - JEPA-style encoders, predictors and VICReg objectives - requires `torch` feature
//! - Offline world-model training and a GCBC baseline - requires `torch` feature
//!
//! ## Features
//!
//! - `default` - Environments, data, planning and evaluation without neural networks
//! - `torch` - Enable neural world models and training (requires libtorch)
//! - `tensorboard` - TensorBoard metric logging
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pldm::prelude::*;
//! use pldm_envs::{Wall, WallConfig};
//!
//! let mut env = Wall::new(WallConfig::default());
//! let dataset = DataCollector::new(CollectorConfig::default())
//!     .collect(|| Wall::new(WallConfig::default()), &ExplorationPolicy::momentum(0.9))?;
//! dataset.save("wall.json")?;
//! ```

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod env;
pub mod eval;
pub mod log;
pub mod planning;
pub mod spaces;
pub mod utils;

// Optional modules that require a tensor backend
#[cfg(feature = "torch")]
pub mod baselines;
#[cfg(feature = "torch")]
pub mod models;
#[cfg(feature = "torch")]
pub mod objectives;
#[cfg(feature = "torch")]
pub mod training;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{ModelConfig, ObjectiveConfig, PldmConfig, TrainConfig};
    pub use crate::data::{
        CollectorConfig, DataCollector, ExplorationPolicy, Normalizer, OfflineDataset, Trajectory,
    };
    pub use crate::env::{EnvInfo, GoalEnv, PldmEnv, StepResult};
    pub use crate::eval::{EvalConfig, EvalReport, Evaluator};
    pub use crate::planning::{
        CemPlanner, GoalPolicy, MppiPlanner, Planner, PlannerConfig, PlanningAgent, RandomPolicy,
        WorldModel,
    };
    pub use crate::spaces::{BoxSpace, Space};

    pub use crate::checkpoint::{CheckpointConfig, CheckpointManager, Checkpointable};
    pub use crate::log::{CompositeLogger, ConsoleLogger, MetricLogger, NoOpLogger};
    #[cfg(feature = "tensorboard")]
    pub use crate::log::TensorBoardLogger;

    #[cfg(feature = "torch")]
    pub use crate::baselines::GcbcPolicy;
    #[cfg(feature = "torch")]
    pub use crate::models::PldmModel;
    #[cfg(feature = "torch")]
    pub use crate::objectives::{LossBreakdown, PldmObjective};
    #[cfg(feature = "torch")]
    pub use crate::training::{GcbcTrainer, WorldModelTrainer};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types for the library
#[derive(Debug, thiserror::Error)]
pub enum PldmError {
    #[error("Environment error: {0}")]
    EnvError(String),

    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Dataset error: {0}")]
    DatasetError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[cfg(feature = "torch")]
    #[error("Tensor error: {0}")]
    TensorError(#[from] tch::TchError),
}

pub type Result<T> = std::result::Result<T, PldmError>;
