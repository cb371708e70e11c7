//! World-model trainer.

use super::{dataset_normalizer, progress_bar, CosineSchedule, TrainSummary};
use crate::checkpoint::{CheckpointManager, CheckpointMetrics, CheckpointState};
use crate::config::PldmConfig;
use crate::data::OfflineDataset;
use crate::log::{MetricLogger, NoOpLogger};
use crate::models::{array3_to_tensor, ModelMeta, PldmModel};
use crate::objectives::{LossBreakdown, PldmObjective};
use crate::{PldmError, Result};
use std::time::Instant;
use tch::nn::OptimizerConfig;
use tch::{nn, Device};

/// Trains a [`PldmModel`] on an offline dataset.
pub struct WorldModelTrainer {
    config: PldmConfig,
    model: PldmModel,
    objective: PldmObjective,
    optimizer: nn::Optimizer,
    schedule: CosineSchedule,
    logger: Box<dyn MetricLogger>,
    global_step: u64,
    show_progress: bool,
}

impl WorldModelTrainer {
    /// Build a fresh model sized for `dataset`.
    pub fn new(config: PldmConfig, dataset: &OfflineDataset, device: Device) -> Result<Self> {
        config.validate()?;
        let meta = ModelMeta {
            model: config.model.clone(),
            obs_shape: dataset.metadata.obs_shape.clone(),
            action_dim: dataset.metadata.action_dim,
            normalizer: dataset_normalizer(dataset, config.train.normalize)?,
        };
        let model = PldmModel::new(meta, device)?;
        let optimizer = nn::AdamW {
            wd: config.train.weight_decay,
            ..Default::default()
        }
        .build(model.var_store(), config.train.learning_rate)?;

        Ok(Self {
            objective: PldmObjective::new(config.objective.clone()),
            schedule: CosineSchedule::from_config(&config.train),
            config,
            model,
            optimizer,
            logger: Box::new(NoOpLogger),
            global_step: 0,
            show_progress: true,
        })
    }

    pub fn with_logger(mut self, logger: Box<dyn MetricLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_progress(mut self, visible: bool) -> Self {
        self.show_progress = visible;
        self
    }

    pub fn model(&self) -> &PldmModel {
        &self.model
    }

    pub fn into_model(self) -> PldmModel {
        self.model
    }

    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    /// Run one optimizer step on a freshly sampled batch.
    pub fn train_step<R: rand::Rng>(
        &mut self,
        dataset: &OfflineDataset,
        rng: &mut R,
    ) -> Result<LossBreakdown> {
        let train = &self.config.train;
        let batch = dataset.sample_sequences(train.batch_size, train.seq_len, rng)?;
        let (mut observations, mut actions) = (batch.observations, batch.actions);
        let normalizer = self.model.normalizer();
        normalizer.normalize_obs(observations.view_mut());
        normalizer.normalize_actions(actions.view_mut());

        let device = self.model.device();
        let observations = array3_to_tensor(&observations, device)?;
        let actions = array3_to_tensor(&actions, device)?;

        let (loss, parts) = self.objective.compute(&self.model, &observations, &actions)?;
        if !parts.is_finite() {
            return Err(PldmError::TrainingError(format!(
                "loss diverged at step {}: {:?}",
                self.global_step, parts
            )));
        }

        let lr = self.schedule.lr(self.global_step as usize);
        self.optimizer.set_lr(lr);
        self.optimizer
            .backward_step_clip_norm(&loss, train.max_grad_norm);
        self.global_step += 1;

        if self.global_step % train.log_every.max(1) as u64 == 0 {
            let mut metrics = parts.to_metrics("train");
            metrics.insert("train/lr".to_string(), lr);
            self.logger.log_metrics(&metrics, self.global_step);
        }
        Ok(parts)
    }

    /// Train for the configured number of epochs.
    ///
    /// With a checkpoint manager, the model is offered for saving after every
    /// epoch and always written as `checkpoint_final` at the end.
    pub fn train(
        &mut self,
        dataset: &OfflineDataset,
        mut checkpoints: Option<&mut CheckpointManager>,
    ) -> Result<TrainSummary> {
        let epochs = self.config.train.epochs;
        let steps = self.config.train.steps_per_epoch.max(1);
        let mut rng = crate::utils::set_seed(self.config.train.seed);

        tracing::info!(
            env = %dataset.metadata.env_name,
            transitions = dataset.num_transitions(),
            epochs,
            steps_per_epoch = steps,
            latent = ?self.model.latent_shape(),
            "Training world model"
        );

        let pb = progress_bar((epochs * steps) as u64, self.show_progress);
        let start = Instant::now();
        let mut summary = TrainSummary {
            best_loss: f64::INFINITY,
            ..Default::default()
        };
        let mut last_state = None;

        for epoch in 1..=epochs {
            let mut sum = LossBreakdown::default();
            for _ in 0..steps {
                let parts = self.train_step(dataset, &mut rng)?;
                if self.global_step == 1 {
                    summary.first_loss = parts.total;
                }
                sum.accumulate(&parts);
                pb.set_message(format!("loss {:.4}", parts.total));
                pb.inc(1);
            }

            let mean = sum.scaled(1.0 / steps as f64);
            self.logger.log_metrics(&mean.to_metrics("epoch"), epoch as u64);
            tracing::info!(
                epoch,
                step = self.global_step,
                loss = mean.total,
                sim = mean.sim,
                var = mean.var,
                cov = mean.cov,
                "Epoch finished"
            );
            summary.final_loss = mean.total;
            summary.best_loss = summary.best_loss.min(mean.total);

            let state = self.checkpoint_state(epoch as u64, &mean)?;
            if let Some(manager) = checkpoints.as_deref_mut() {
                if let Some(path) = manager.maybe_save(&self.model, &state, -mean.total)? {
                    tracing::debug!(path = %path.display(), "Saved checkpoint");
                }
            }
            last_state = Some(state);
        }

        if let (Some(manager), Some(state)) = (checkpoints, last_state) {
            manager.save_named(&self.model, &state, "checkpoint_final")?;
        }

        pb.finish_with_message("Training complete");
        self.logger.close();
        summary.epochs = epochs;
        summary.global_step = self.global_step;
        summary.elapsed_secs = start.elapsed().as_secs_f64();
        Ok(summary)
    }

    fn checkpoint_state(&self, epoch: u64, mean: &LossBreakdown) -> Result<CheckpointState> {
        let metrics = CheckpointMetrics {
            total_loss: mean.total,
            sim_loss: mean.sim,
            var_loss: mean.var,
            cov_loss: mean.cov,
            time_loss: mean.time,
            idm_loss: mean.idm,
            success_rate: None,
        };
        CheckpointState::new(epoch, self.global_step, "pldm", metrics)
            .with_config(&self.config)?
            .with_extra(self.model.meta())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::checkpoint::{CheckpointConfig, Checkpointable};
    use crate::data::{DatasetMetadata, Trajectory};
    use crate::log::MemoryLogger;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;

    /// Point on a plane moved by its actions.
    pub(crate) fn plane_dataset(episodes: usize, len: usize) -> OfflineDataset {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let mut dataset = OfflineDataset::new(DatasetMetadata::new("plane", vec![2], 2));
        for _ in 0..episodes {
            let mut pos = [rng.gen_range(-1.0f32..1.0), rng.gen_range(-1.0f32..1.0)];
            let mut traj = Trajectory::new(pos.to_vec(), pos.to_vec());
            for _ in 0..len {
                let a = [rng.gen_range(-0.2f32..0.2), rng.gen_range(-0.2f32..0.2)];
                pos = [pos[0] + a[0], pos[1] + a[1]];
                traj.push(a.to_vec(), pos.to_vec(), pos.to_vec());
            }
            dataset.add_trajectory(traj).unwrap();
        }
        dataset
    }

    fn small_config() -> PldmConfig {
        let mut config = PldmConfig::default();
        config.model.latent_dim = 8;
        config.model.hidden_dim = 32;
        config.train.epochs = 3;
        config.train.steps_per_epoch = 40;
        config.train.batch_size = 32;
        config.train.seq_len = 4;
        config.train.learning_rate = 1e-3;
        config.train.warmup_steps = 5;
        config.train.log_every = 10;
        config.train.checkpoint_every = 1;
        config
    }

    #[test]
    fn test_short_run_lowers_loss() {
        let dataset = plane_dataset(16, 30);
        let logger = Arc::new(MemoryLogger::new());
        let mut trainer = WorldModelTrainer::new(small_config(), &dataset, Device::Cpu)
            .unwrap()
            .with_logger(Box::new(logger.clone()))
            .with_progress(false);

        let summary = trainer.train(&dataset, None).unwrap();
        assert_eq!(summary.global_step, 120);
        assert!(
            summary.final_loss < summary.first_loss,
            "{} >= {}",
            summary.final_loss,
            summary.first_loss
        );
        assert_eq!(logger.series("train/total").len(), 12);
        assert_eq!(logger.series("epoch/total").len(), 3);
    }

    #[test]
    fn test_checkpoints_restore_model() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = plane_dataset(8, 20);
        let mut config = small_config();
        config.train.epochs = 2;
        config.train.steps_per_epoch = 5;

        let mut manager = CheckpointManager::new(CheckpointConfig::new(dir.path()));
        let mut trainer = WorldModelTrainer::new(config, &dataset, Device::Cpu)
            .unwrap()
            .with_progress(false);
        trainer.train(&dataset, Some(&mut manager)).unwrap();

        let final_path = dir.path().join("checkpoint_final.bin");
        assert!(final_path.exists());
        let (restored, state) = PldmModel::from_checkpoint(&final_path, Device::Cpu).unwrap();
        assert_eq!(state.epoch, 2);
        assert_eq!(state.global_step, 10);
        assert_eq!(restored.meta(), trainer.model().meta());
        assert_eq!(
            restored.save_state().unwrap().len(),
            trainer.model().save_state().unwrap().len()
        );
    }

    #[test]
    fn test_short_trajectories_are_rejected() {
        let dataset = plane_dataset(4, 2);
        let mut trainer = WorldModelTrainer::new(small_config(), &dataset, Device::Cpu)
            .unwrap()
            .with_progress(false);
        assert!(trainer.train(&dataset, None).is_err());
    }
}
