//! Training objective of the PLDM world model.
//!
//! The model is trained without rewards or reconstruction. Predictions from
//! a recursive rollout must match the encodings of the observed future,
//! while variance, covariance, temporal smoothness and inverse dynamics
//! terms keep the encodings from collapsing.

mod vicreg;

pub use vicreg::{covariance_loss, variance_loss};

use crate::config::ObjectiveConfig;
use crate::log::Metrics;
use crate::models::PldmModel;
use crate::{PldmError, Result};
use serde::{Deserialize, Serialize};
use tch::{Kind, Reduction, Tensor};

/// Weighted loss terms of one training step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LossBreakdown {
    pub total: f64,
    pub sim: f64,
    pub var: f64,
    pub cov: f64,
    pub time: f64,
    pub idm: f64,
}

impl LossBreakdown {
    pub fn is_finite(&self) -> bool {
        [self.total, self.sim, self.var, self.cov, self.time, self.idm]
            .iter()
            .all(|v| v.is_finite())
    }

    pub fn to_metrics(&self, prefix: &str) -> Metrics {
        [
            ("total", self.total),
            ("sim", self.sim),
            ("var", self.var),
            ("cov", self.cov),
            ("time", self.time),
            ("idm", self.idm),
        ]
        .into_iter()
        .map(|(k, v)| (format!("{}/{}", prefix, k), v))
        .collect()
    }

    /// Running sum helper for epoch averages.
    pub fn accumulate(&mut self, other: &LossBreakdown) {
        self.total += other.total;
        self.sim += other.sim;
        self.var += other.var;
        self.cov += other.cov;
        self.time += other.time;
        self.idm += other.idm;
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            total: self.total * factor,
            sim: self.sim * factor,
            var: self.var * factor,
            cov: self.cov * factor,
            time: self.time * factor,
            idm: self.idm * factor,
        }
    }
}

/// `L = sim + a var + b cov + d time + w idm`.
#[derive(Clone, Debug)]
pub struct PldmObjective {
    config: ObjectiveConfig,
}

impl PldmObjective {
    pub fn new(config: ObjectiveConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ObjectiveConfig {
        &self.config
    }

    /// Loss for normalized observations [B, T+1, obs_dim] and actions
    /// [B, T, action_dim]. Returns the differentiable total and the
    /// breakdown of its weighted terms.
    pub fn compute(
        &self,
        model: &PldmModel,
        observations: &Tensor,
        actions: &Tensor,
    ) -> Result<(Tensor, LossBreakdown)> {
        let obs_size = observations.size();
        let act_size = actions.size();
        if obs_size.len() < 3
            || act_size.len() != 3
            || act_size[1] == 0
            || obs_size[1] != act_size[1] + 1
        {
            return Err(PldmError::TrainingError(format!(
                "expected observations [B, T+1, ...] and actions [B, T, A] with T > 0, \
                 got {:?} and {:?}",
                obs_size, act_size
            )));
        }
        let (b, t1) = (obs_size[0], obs_size[1]);
        let t = t1 - 1;
        let c = &self.config;

        // [T+1, B, ...] encodings of every observation
        let time_major = observations.transpose(0, 1).contiguous();
        let flat_obs = time_major.reshape([t1 * b, -1]);
        let encodings = model.encode(&flat_obs);
        let latent_shape = encodings.size()[1..].to_vec();
        let mut shape = vec![t1, b];
        shape.extend_from_slice(&latent_shape);
        let z = encodings.reshape(shape.as_slice());

        // Recursive predictions from the first encoding only
        let actions_tm = actions.transpose(0, 1).contiguous();
        let rollout = model.rollout(&z.get(0), &actions_tm);
        let predicted = rollout.narrow(0, 1, t);
        let target = z.narrow(0, 1, t);
        let sim = predicted.mse_loss(&target, Reduction::Mean);

        // Regularizers on flattened per-step encodings [T+1, B, D]
        let z_flat = z.reshape([t1, b, -1]);
        let var = variance_loss(&z_flat, c.std_target, c.eps);
        let cov = covariance_loss(&z_flat);

        let time = z.narrow(0, 1, t).mse_loss(&z.narrow(0, 0, t), Reduction::Mean);

        let z_prev = z.narrow(0, 0, t).reshape([t * b, -1]);
        let z_next = z.narrow(0, 1, t).reshape([t * b, -1]);
        let idm = match model.inverse_dynamics(&z_prev, &z_next) {
            Some(pred) => pred.mse_loss(&actions_tm.reshape([t * b, -1]), Reduction::Mean),
            None => Tensor::scalar_tensor(0.0, (Kind::Float, z.device())),
        };

        let total = &sim * c.sim_coeff
            + &var * c.var_coeff
            + &cov * c.cov_coeff
            + &time * c.time_coeff
            + &idm * c.idm_coeff;

        let breakdown = LossBreakdown {
            total: total.double_value(&[]),
            sim: sim.double_value(&[]) * c.sim_coeff,
            var: var.double_value(&[]) * c.var_coeff,
            cov: cov.double_value(&[]) * c.cov_coeff,
            time: time.double_value(&[]) * c.time_coeff,
            idm: idm.double_value(&[]) * c.idm_coeff,
        };
        Ok((total, breakdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::data::Normalizer;
    use crate::models::ModelMeta;
    use tch::Device;

    fn model(use_idm: bool) -> PldmModel {
        PldmModel::new(
            ModelMeta {
                model: ModelConfig {
                    latent_dim: 8,
                    hidden_dim: 32,
                    use_idm,
                    ..Default::default()
                },
                obs_shape: vec![2],
                action_dim: 2,
                normalizer: Normalizer::identity(2, 2),
            },
            Device::Cpu,
        )
        .unwrap()
    }

    #[test]
    fn test_breakdown_sums_to_total() {
        let objective = PldmObjective::new(ObjectiveConfig::default());
        let obs = Tensor::randn([16, 5, 2], (Kind::Float, Device::Cpu));
        let act = Tensor::randn([16, 4, 2], (Kind::Float, Device::Cpu));
        let (loss, parts) = objective.compute(&model(true), &obs, &act).unwrap();

        assert_eq!(loss.size(), Vec::<i64>::new());
        let sum = parts.sim + parts.var + parts.cov + parts.time + parts.idm;
        assert!((sum - parts.total).abs() < 1e-4 * parts.total.abs().max(1.0));
        assert!(parts.is_finite());
        assert!(parts.idm > 0.0);
    }

    #[test]
    fn test_idm_term_absent_without_head() {
        let objective = PldmObjective::new(ObjectiveConfig::default());
        let obs = Tensor::randn([8, 3, 2], (Kind::Float, Device::Cpu));
        let act = Tensor::randn([8, 2, 2], (Kind::Float, Device::Cpu));
        let (_, parts) = objective.compute(&model(false), &obs, &act).unwrap();
        assert_eq!(parts.idm, 0.0);
    }

    #[test]
    fn test_misaligned_sequences_rejected() {
        let objective = PldmObjective::new(ObjectiveConfig::default());
        let obs = Tensor::randn([8, 3, 2], (Kind::Float, Device::Cpu));
        let act = Tensor::randn([8, 3, 2], (Kind::Float, Device::Cpu));
        assert!(objective.compute(&model(true), &obs, &act).is_err());
    }

    #[test]
    fn test_metrics_are_prefixed() {
        let parts = LossBreakdown {
            total: 3.0,
            sim: 1.0,
            ..Default::default()
        };
        let metrics = parts.to_metrics("train");
        assert_eq!(metrics.get("train/total"), Some(&3.0));
        assert_eq!(metrics.len(), 6);

        let mut acc = LossBreakdown::default();
        acc.accumulate(&parts);
        acc.accumulate(&parts);
        assert_eq!(acc.scaled(0.5), parts);
    }
}
