//! Reward-free offline data.
//!
//! Provides:
//! - `Trajectory` - observation/action/state sequences without rewards
//! - `OfflineDataset` - storage, JSON persistence and batch sampling
//! - `Normalizer` - dataset statistics for observations and actions
//! - `ExplorationPolicy` / `DataCollector` - parallel data generation

mod collector;
mod dataset;
mod exploration;
mod normalizer;
mod trajectory;

pub use collector::{rollout, CollectorConfig, DataCollector};
pub use dataset::{DatasetMetadata, GoalBatch, OfflineDataset, SequenceBatch, DATASET_VERSION};
pub use exploration::{ActionSampler, ExplorationPolicy};
pub use normalizer::{Normalizer, MIN_STD};
pub use trajectory::Trajectory;
