use crate::checkpoint::{CheckpointManager, CheckpointState, Checkpointable};
use crate::data::Normalizer;
use crate::models::{array2_to_tensor, tensor_to_array2};
use crate::planning::GoalPolicy;
use crate::{PldmError, Result};
use ndarray::{Array2, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;
use tch::{nn, Device, Tensor};

/// Shapes and statistics needed to rebuild a [`GcbcPolicy`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GcbcMeta {
    pub obs_dim: usize,
    pub action_dim: usize,
    pub hidden_dim: i64,
    pub normalizer: Normalizer,
    /// Predicted actions are clipped to this L2 norm, the largest seen in the data
    pub max_norm: f32,
}

/// Goal-conditioned behaviour cloning: an MLP from `[obs, goal]` to the
/// action taken in the data.
pub struct GcbcPolicy {
    vs: nn::VarStore,
    seq: nn::Sequential,
    meta: GcbcMeta,
}

impl GcbcPolicy {
    pub fn new(meta: GcbcMeta, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let p = vs.root();
        let seq = nn::seq()
            .add(nn::linear(
                &p / "l0",
                2 * meta.obs_dim as i64,
                meta.hidden_dim,
                Default::default(),
            ))
            .add_fn(|xs| xs.relu())
            .add(nn::linear(&p / "l1", meta.hidden_dim, meta.hidden_dim, Default::default()))
            .add_fn(|xs| xs.relu())
            .add(nn::linear(
                &p / "out",
                meta.hidden_dim,
                meta.action_dim as i64,
                Default::default(),
            ));
        Self { vs, seq, meta }
    }

    pub fn from_checkpoint(
        path: impl AsRef<Path>,
        device: Device,
    ) -> Result<(Self, CheckpointState)> {
        let state = CheckpointManager::read_state(path.as_ref())?;
        if state.method != "gcbc" {
            return Err(PldmError::ConfigError(format!(
                "checkpoint holds a '{}' model, not a GCBC policy",
                state.method
            )));
        }
        let meta: GcbcMeta = serde_json::from_value(state.extra.clone())?;
        let mut policy = Self::new(meta, device);
        policy.load_state(&std::fs::read(path.as_ref())?)?;
        Ok((policy, state))
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    pub fn meta(&self) -> &GcbcMeta {
        &self.meta
    }

    /// Normalized actions for normalized observations and goals [B, obs_dim].
    pub fn forward(&self, obs: &Tensor, goal: &Tensor) -> Tensor {
        Tensor::cat(&[obs, goal], 1).apply(&self.seq)
    }
}

impl GoalPolicy for GcbcPolicy {
    fn act(&mut self, observation: &ArrayD<f32>, goal: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        let n = &self.meta.normalizer;
        let to_row = |a: &ArrayD<f32>| -> Result<Array2<f32>> {
            let mut row = Array2::from_shape_vec((1, a.len()), a.iter().copied().collect())
                .map_err(|e| PldmError::EnvError(e.to_string()))?;
            n.normalize_obs(row.view_mut());
            Ok(row)
        };
        let device = self.vs.device();
        let obs = array2_to_tensor(&to_row(observation)?, device)?;
        let goal = array2_to_tensor(&to_row(goal)?, device)?;

        let out = tch::no_grad(|| self.forward(&obs, &goal));
        let mut action = tensor_to_array2(&out)?;
        n.denormalize_actions(action.view_mut());

        let mut action = action.row(0).to_owned();
        crate::planning::clip_norm(action.view_mut(), self.meta.max_norm);
        let dim = action.len();
        action
            .into_shape(IxDyn(&[dim]))
            .map_err(|e| PldmError::EnvError(e.to_string()))
    }

    fn name(&self) -> &str {
        "gcbc"
    }
}

impl Checkpointable for GcbcPolicy {
    fn save_state(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.vs.save_to_stream(&mut buffer)?;
        Ok(buffer)
    }

    fn load_state(&mut self, data: &[u8]) -> Result<()> {
        self.vs.load_from_stream(Cursor::new(data))?;
        Ok(())
    }
}
