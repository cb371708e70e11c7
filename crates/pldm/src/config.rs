//! Run configuration.
//!
//! All structs are plain serde types so a full run can be described by one
//! JSON file. Selected defaults can be overridden through `PLDM_*`
//! environment variables.

use crate::{PldmError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// ResNet layouts available as encoders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResNetPreset {
    /// Four stages of two basic blocks, flattened 512-d output
    Resnet18,
    /// Basic blocks in a 3-4-6-3 layout
    Resnet34,
    /// Bottleneck blocks in a 3-4-6-3 layout
    Resnet50,
    /// Compact spatial variant for 64x64 inputs (1x1 pooled to 64 channels)
    #[serde(rename = "resnet18s_small", alias = "resnet18_small")]
    Resnet18Small,
    /// Residual path only, for ablations
    Resnet18Identity,
    /// `Resnet50` with every stage twice as wide
    Resnet50x2,
    /// Two basic stages, raw spatial output
    Resnet18sA,
    /// Two basic stages, 1x1 pooled to 32 channels
    Resnet18sB,
    /// Two basic stages, 1x1 pooled to 48 channels
    Resnet18sC,
    /// Two basic stages, 1x1 pooled to 64 channels
    Resnet18sD,
    /// Same network as `Resnet18sC`
    Resnet18sE,
    /// Same network as `Resnet18sB`
    Resnet18sF,
}

/// Which encoder maps observations to latents.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EncoderKind {
    /// MLP over flat observations
    Mlp,
    /// Strided CNN with a spatial latent
    Conv,
    /// ResNet backbone
    ResNet { preset: ResNetPreset },
}

/// Architecture of the world model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub encoder: EncoderKind,
    /// Latent width for MLP encoders, latent channels for conv encoders
    pub latent_dim: i64,
    /// Hidden width of MLPs
    pub hidden_dim: i64,
    /// Hidden layers in the predictor
    pub predictor_layers: i64,
    /// Train an inverse dynamics head alongside the predictor
    pub use_idm: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            encoder: EncoderKind::Mlp,
            latent_dim: 32,
            hidden_dim: 256,
            predictor_layers: 2,
            use_idm: true,
        }
    }
}

/// Loss coefficients of the PLDM objective.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveConfig {
    /// Prediction (invariance) term
    pub sim_coeff: f64,
    /// Variance hinge term
    pub var_coeff: f64,
    /// Off-diagonal covariance term
    pub cov_coeff: f64,
    /// Temporal smoothness of consecutive encodings
    pub time_coeff: f64,
    /// Inverse dynamics term (ignored without an IDM head)
    pub idm_coeff: f64,
    /// Target standard deviation for the variance hinge
    pub std_target: f64,
    /// Numerical epsilon inside the square root
    pub eps: f64,
}

impl Default for ObjectiveConfig {
    fn default() -> Self {
        Self {
            sim_coeff: 1.0,
            var_coeff: env_or("PLDM_VAR_COEFF", 8.0),
            cov_coeff: env_or("PLDM_COV_COEFF", 4.0),
            time_coeff: 0.5,
            idm_coeff: 1.0,
            std_target: 1.0,
            eps: 1e-4,
        }
    }
}

/// Offline training loop settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub epochs: usize,
    pub steps_per_epoch: usize,
    pub batch_size: usize,
    /// Number of predicted steps per training sequence
    pub seq_len: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    /// Linear warmup before the cosine decay
    pub warmup_steps: usize,
    /// Final LR as a fraction of the peak LR
    pub min_lr_ratio: f64,
    pub max_grad_norm: f64,
    /// Normalize observations and actions with dataset statistics
    pub normalize: bool,
    pub log_every: usize,
    pub checkpoint_every: u64,
    pub keep_last: usize,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: env_or("PLDM_EPOCHS", 20),
            steps_per_epoch: env_or("PLDM_STEPS_PER_EPOCH", 200),
            batch_size: env_or("PLDM_BATCH_SIZE", 128),
            seq_len: env_or("PLDM_SEQ_LEN", 16),
            learning_rate: env_or("PLDM_LR", 3e-4),
            weight_decay: 1e-5,
            warmup_steps: 500,
            min_lr_ratio: 0.05,
            max_grad_norm: 1.0,
            normalize: true,
            log_every: 50,
            checkpoint_every: 5,
            keep_last: 3,
            seed: 42,
        }
    }
}

/// Sampling-based optimizer used for planning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannerKind {
    Mppi,
    Cem,
}

/// Latent planner settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlannerConfig {
    pub kind: PlannerKind,
    /// Planning horizon in environment steps
    pub horizon: usize,
    /// Candidate action sequences per iteration
    pub num_samples: usize,
    /// Optimization iterations per plan
    pub iterations: usize,
    /// Standard deviation of action perturbations
    pub noise_std: f32,
    /// MPPI temperature
    pub temperature: f32,
    /// CEM elite fraction
    pub elite_frac: f32,
    /// Actions are clipped to this L2 norm
    pub max_norm: f32,
    /// Actions executed from each plan before re-planning
    pub replan_every: usize,
    /// Only score the final predicted latent
    pub terminal_cost_only: bool,
    /// Per-step weight growth when scoring the whole horizon
    pub cost_discount: f32,
    pub seed: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            kind: PlannerKind::Mppi,
            horizon: env_or("PLDM_PLAN_HORIZON", 16),
            num_samples: env_or("PLDM_PLAN_SAMPLES", 256),
            iterations: 4,
            noise_std: 1.0,
            temperature: 0.05,
            elite_frac: 0.1,
            max_norm: 1.0,
            replan_every: 4,
            terminal_cost_only: false,
            cost_discount: 1.1,
            seed: 0,
        }
    }
}

/// Everything needed to train and evaluate one PLDM run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PldmConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub objective: ObjectiveConfig,
    #[serde(default)]
    pub train: TrainConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
}

impl PldmConfig {
    /// Load a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Reject settings the trainer or planner cannot run with.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(PldmError::ConfigError(msg.to_string()));
        if self.model.latent_dim <= 0 || self.model.hidden_dim <= 0 {
            return fail("model dimensions must be positive");
        }
        if self.train.batch_size < 2 {
            return fail("batch_size must be at least 2 for variance statistics");
        }
        if self.train.seq_len == 0 {
            return fail("seq_len must be positive");
        }
        if self.train.learning_rate <= 0.0 {
            return fail("learning_rate must be positive");
        }
        let p = &self.planner;
        if p.horizon == 0 || p.num_samples == 0 || p.iterations == 0 {
            return fail("planner horizon, num_samples and iterations must be positive");
        }
        if p.replan_every == 0 || p.replan_every > p.horizon {
            return fail("replan_every must be in 1..=horizon");
        }
        if p.temperature <= 0.0 {
            return fail("planner temperature must be positive");
        }
        if !(0.0..=1.0).contains(&p.elite_frac) || p.elite_frac == 0.0 {
            return fail("elite_frac must be in (0, 1]");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        PldmConfig::default().validate().unwrap();
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = PldmConfig::default();
        config.model.encoder = EncoderKind::ResNet {
            preset: ResNetPreset::Resnet18Small,
        };
        config.planner.kind = PlannerKind::Cem;
        config.save(&path).unwrap();

        let loaded = PldmConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.json");
        let defaults = PldmConfig::default();
        let mut model = serde_json::to_value(&defaults.model).unwrap();
        model["latent_dim"] = serde_json::json!(64);
        std::fs::write(&path, serde_json::json!({ "model": model }).to_string()).unwrap();

        let loaded = PldmConfig::load(&path).unwrap();
        assert_eq!(loaded.model.latent_dim, 64);
        assert_eq!(loaded.train, defaults.train);
    }

    #[test]
    fn test_rejects_invalid_replan_interval() {
        let mut config = PldmConfig::default();
        config.planner.replan_every = config.planner.horizon + 1;
        assert!(matches!(config.validate(), Err(PldmError::ConfigError(_))));
    }
}
