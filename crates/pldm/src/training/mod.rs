//! Offline training loops for the world model and the GCBC baseline.

mod gcbc_trainer;
mod schedule;
mod trainer;

pub use gcbc_trainer::GcbcTrainer;
pub use schedule::CosineSchedule;
pub use trainer::WorldModelTrainer;

use crate::checkpoint::CheckpointConfig;
use crate::config::TrainConfig;
use crate::data::{Normalizer, OfflineDataset};
use crate::Result;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Outcome of a finished training run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainSummary {
    pub epochs: usize,
    pub global_step: u64,
    /// Loss of the very first optimizer step
    pub first_loss: f64,
    /// Mean loss of the last epoch
    pub final_loss: f64,
    /// Lowest epoch mean
    pub best_loss: f64,
    pub elapsed_secs: f64,
}

/// Checkpoint settings matching a training configuration.
pub fn checkpoint_config(dir: impl AsRef<Path>, config: &TrainConfig) -> CheckpointConfig {
    CheckpointConfig::new(dir.as_ref())
        .save_every(config.checkpoint_every)
        .keep_last(config.keep_last)
}

fn dataset_normalizer(dataset: &OfflineDataset, normalize: bool) -> Result<Normalizer> {
    if normalize {
        dataset.normalizer()
    } else {
        Ok(Normalizer::identity(
            dataset.metadata.obs_dim(),
            dataset.metadata.action_dim,
        ))
    }
}

fn progress_bar(len: u64, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    pb
}
