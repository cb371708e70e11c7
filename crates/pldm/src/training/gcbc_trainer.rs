//! Behaviour-cloning trainer for the GCBC baseline.

use super::{dataset_normalizer, progress_bar, CosineSchedule, TrainSummary};
use crate::baselines::{GcbcMeta, GcbcPolicy};
use crate::checkpoint::{CheckpointManager, CheckpointMetrics, CheckpointState};
use crate::config::PldmConfig;
use crate::data::OfflineDataset;
use crate::log::{MetricLogger, NoOpLogger};
use crate::models::array2_to_tensor;
use crate::{PldmError, Result};
use std::time::Instant;
use tch::nn::OptimizerConfig;
use tch::{nn, Device, Reduction};

/// Fits a [`GcbcPolicy`] to hindsight-relabelled transitions.
pub struct GcbcTrainer {
    config: PldmConfig,
    policy: GcbcPolicy,
    optimizer: nn::Optimizer,
    schedule: CosineSchedule,
    logger: Box<dyn MetricLogger>,
    global_step: u64,
    show_progress: bool,
}

impl GcbcTrainer {
    pub fn new(config: PldmConfig, dataset: &OfflineDataset, device: Device) -> Result<Self> {
        config.validate()?;
        let meta = GcbcMeta {
            obs_dim: dataset.metadata.obs_dim(),
            action_dim: dataset.metadata.action_dim,
            hidden_dim: config.model.hidden_dim,
            normalizer: dataset_normalizer(dataset, config.train.normalize)?,
            max_norm: max_action_norm(dataset).unwrap_or(config.planner.max_norm),
        };
        let policy = GcbcPolicy::new(meta, device);
        let optimizer = nn::AdamW {
            wd: config.train.weight_decay,
            ..Default::default()
        }
        .build(policy.var_store(), config.train.learning_rate)?;

        Ok(Self {
            schedule: CosineSchedule::from_config(&config.train),
            config,
            policy,
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

    pub fn policy(&self) -> &GcbcPolicy {
        &self.policy
    }

    pub fn into_policy(self) -> GcbcPolicy {
        self.policy
    }

    /// One MSE regression step. Returns the loss value.
    pub fn train_step<R: rand::Rng>(
        &mut self,
        dataset: &OfflineDataset,
        rng: &mut R,
    ) -> Result<f64> {
        let batch = dataset.sample_goal_conditioned(self.config.train.batch_size, rng)?;
        let (mut obs, mut actions, mut goals) = (batch.observations, batch.actions, batch.goals);
        let normalizer = &self.policy.meta().normalizer;
        normalizer.normalize_obs(obs.view_mut());
        normalizer.normalize_obs(goals.view_mut());
        normalizer.normalize_actions(actions.view_mut());

        let device = self.policy.var_store().device();
        let obs = array2_to_tensor(&obs, device)?;
        let goals = array2_to_tensor(&goals, device)?;
        let actions = array2_to_tensor(&actions, device)?;

        let loss = self
            .policy
            .forward(&obs, &goals)
            .mse_loss(&actions, Reduction::Mean);
        let value = loss.double_value(&[]);
        if !value.is_finite() {
            return Err(PldmError::TrainingError(format!(
                "behaviour cloning loss diverged at step {}",
                self.global_step
            )));
        }

        let lr = self.schedule.lr(self.global_step as usize);
        self.optimizer.set_lr(lr);
        self.optimizer
            .backward_step_clip_norm(&loss, self.config.train.max_grad_norm);
        self.global_step += 1;

        if self.global_step % self.config.train.log_every.max(1) as u64 == 0 {
            self.logger.log_scalar("gcbc/loss", value, self.global_step);
            self.logger.log_scalar("gcbc/lr", lr, self.global_step);
        }
        Ok(value)
    }

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
            "Training GCBC baseline"
        );

        let pb = progress_bar((epochs * steps) as u64, self.show_progress);
        let start = Instant::now();
        let mut summary = TrainSummary {
            best_loss: f64::INFINITY,
            ..Default::default()
        };
        let mut last_state = None;

        for epoch in 1..=epochs {
            let mut sum = 0.0;
            for _ in 0..steps {
                let loss = self.train_step(dataset, &mut rng)?;
                if self.global_step == 1 {
                    summary.first_loss = loss;
                }
                sum += loss;
                pb.set_message(format!("loss {:.4}", loss));
                pb.inc(1);
            }

            let mean = sum / steps as f64;
            self.logger.log_scalar("epoch/gcbc_loss", mean, epoch as u64);
            tracing::info!(epoch, step = self.global_step, loss = mean, "Epoch finished");
            summary.final_loss = mean;
            summary.best_loss = summary.best_loss.min(mean);

            let metrics = CheckpointMetrics {
                total_loss: mean,
                ..Default::default()
            };
            let state = CheckpointState::new(epoch as u64, self.global_step, "gcbc", metrics)
                .with_config(&self.config)?
                .with_extra(self.policy.meta())?;
            if let Some(manager) = checkpoints.as_deref_mut() {
                manager.maybe_save(&self.policy, &state, -mean)?;
            }
            last_state = Some(state);
        }

        if let (Some(manager), Some(state)) = (checkpoints, last_state) {
            manager.save_named(&self.policy, &state, "checkpoint_final")?;
        }

        pb.finish_with_message("Training complete");
        self.logger.close();
        summary.epochs = epochs;
        summary.global_step = self.global_step;
        summary.elapsed_secs = start.elapsed().as_secs_f64();
        Ok(summary)
    }
}

/// Largest L2 norm among the dataset's actions.
fn max_action_norm(dataset: &OfflineDataset) -> Option<f32> {
    dataset
        .trajectories()
        .iter()
        .flat_map(|t| t.actions.iter())
        .map(|a| a.iter().map(|v| v * v).sum::<f32>().sqrt())
        .filter(|n| n.is_finite() && *n > 0.0)
        .reduce(f32::max)
}
