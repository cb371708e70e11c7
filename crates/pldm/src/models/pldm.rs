//! The PLDM world model: encoder, latent predictor and optional inverse
//! dynamics head in a single `VarStore`.

use super::{
    array2_to_tensor, build_encoder, build_predictor, tensor_to_array2, Encoder, InverseDynamics,
    Predictor,
};
use crate::checkpoint::{CheckpointManager, CheckpointState, Checkpointable};
use crate::config::ModelConfig;
use crate::data::Normalizer;
use crate::planning::WorldModel;
use crate::{PldmError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;
use tch::{nn, Device, Tensor};

/// What has to be known to rebuild a model before loading its weights.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelMeta {
    pub model: ModelConfig,
    pub obs_shape: Vec<usize>,
    pub action_dim: usize,
    pub normalizer: Normalizer,
}

pub struct PldmModel {
    vs: nn::VarStore,
    meta: ModelMeta,
    encoder: Box<dyn Encoder>,
    predictor: Box<dyn Predictor>,
    idm: Option<InverseDynamics>,
    obs_shape: Vec<i64>,
}

impl std::fmt::Debug for PldmModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PldmModel")
            .field("encoder", &self.encoder)
            .field("predictor", &self.predictor)
            .field("latent_shape", &self.latent_shape())
            .finish()
    }
}

impl PldmModel {
    pub fn new(meta: ModelMeta, device: Device) -> Result<Self> {
        if meta.normalizer.obs_dim() != meta.obs_shape.iter().product::<usize>()
            || meta.normalizer.action_dim() != meta.action_dim
        {
            return Err(PldmError::ShapeMismatch {
                expected: vec![meta.obs_shape.iter().product(), meta.action_dim],
                actual: vec![meta.normalizer.obs_dim(), meta.normalizer.action_dim()],
            });
        }

        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let obs_shape: Vec<i64> = meta.obs_shape.iter().map(|&d| d as i64).collect();
        let action_dim = meta.action_dim as i64;

        let encoder = build_encoder(&(&root / "encoder"), &meta.model, &obs_shape)?;
        let latent_shape = encoder.output_shape().to_vec();
        let predictor =
            build_predictor(&(&root / "predictor"), &meta.model, &latent_shape, action_dim);
        let idm = meta.model.use_idm.then(|| {
            InverseDynamics::new(
                &(&root / "idm"),
                encoder.output_dim(),
                action_dim,
                meta.model.hidden_dim,
            )
        });

        tracing::debug!(
            encoder = ?meta.model.encoder,
            latent = ?latent_shape,
            params = vs.trainable_variables().iter().map(|t| t.numel()).sum::<usize>(),
            "Built world model"
        );

        Ok(Self {
            vs,
            meta,
            encoder,
            predictor,
            idm,
            obs_shape,
        })
    }

    /// Rebuild a model from a checkpoint weight file and its metadata.
    pub fn from_checkpoint(
        path: impl AsRef<Path>,
        device: Device,
    ) -> Result<(Self, CheckpointState)> {
        let state = CheckpointManager::read_state(path.as_ref())?;
        if state.method != "pldm" {
            return Err(PldmError::ConfigError(format!(
                "checkpoint holds a '{}' model, not a PLDM world model",
                state.method
            )));
        }
        let meta: ModelMeta = serde_json::from_value(state.extra.clone())?;
        let mut model = Self::new(meta, device)?;
        model.load_state(&std::fs::read(path.as_ref())?)?;
        Ok((model, state))
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    pub fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }

    pub fn device(&self) -> Device {
        self.vs.device()
    }

    pub fn meta(&self) -> &ModelMeta {
        &self.meta
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.meta.normalizer
    }

    pub fn latent_shape(&self) -> &[i64] {
        self.encoder.output_shape()
    }

    pub fn latent_dim(&self) -> i64 {
        self.encoder.output_dim()
    }

    pub fn has_idm(&self) -> bool {
        self.idm.is_some()
    }

    /// Encode normalized observations [B, obs_dim] (or [B, *obs_shape]).
    pub fn encode(&self, obs: &Tensor) -> Tensor {
        let b = obs.size()[0];
        let mut shape = vec![b];
        shape.extend_from_slice(&self.obs_shape);
        self.encoder.forward(&obs.reshape(shape))
    }

    /// One step of latent dynamics with normalized actions [B, A].
    pub fn predict(&self, latent: &Tensor, action: &Tensor) -> Tensor {
        self.predictor.forward(latent, action)
    }

    /// Recursive rollout from `z0` [B, ...] under actions [T, B, A].
    ///
    /// Returns [T + 1, B, ...] with `z0` first. Every step feeds on the
    /// previous prediction, never on an encoding.
    pub fn rollout(&self, z0: &Tensor, actions: &Tensor) -> Tensor {
        let steps = actions.size()[0];
        let mut latents = Vec::with_capacity(steps as usize + 1);
        latents.push(z0.shallow_clone());
        for t in 0..steps {
            let next = self.predict(&latents[t as usize], &actions.get(t));
            latents.push(next);
        }
        Tensor::stack(&latents, 0)
    }

    /// Predicted actions for latent pairs, if the model has an IDM head.
    pub fn inverse_dynamics(&self, z_t: &Tensor, z_next: &Tensor) -> Option<Tensor> {
        self.idm.as_ref().map(|idm| idm.forward(z_t, z_next))
    }
}

impl WorldModel for PldmModel {
    fn encode(&self, observations: &Array2<f32>) -> Result<Array2<f32>> {
        let mut obs = observations.clone();
        self.meta.normalizer.normalize_obs(obs.view_mut());
        let obs = array2_to_tensor(&obs, self.device())?;
        let latents = tch::no_grad(|| PldmModel::encode(self, &obs));
        tensor_to_array2(&latents)
    }

    fn predict(&self, latents: &Array2<f32>, actions: &Array2<f32>) -> Result<Array2<f32>> {
        let mut actions = actions.clone();
        self.meta.normalizer.normalize_actions(actions.view_mut());
        let actions = array2_to_tensor(&actions, self.device())?;

        let mut shape = vec![latents.nrows() as i64];
        shape.extend_from_slice(self.latent_shape());
        let latents = array2_to_tensor(latents, self.device())?.reshape(shape);

        let next = tch::no_grad(|| PldmModel::predict(self, &latents, &actions));
        tensor_to_array2(&next)
    }

    fn action_dim(&self) -> usize {
        self.meta.action_dim
    }
}

impl Checkpointable for PldmModel {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncoderKind;
    use tch::Kind;

    fn meta(encoder: EncoderKind, obs_shape: Vec<usize>) -> ModelMeta {
        let obs_dim = obs_shape.iter().product();
        ModelMeta {
            model: ModelConfig {
                encoder,
                latent_dim: 8,
                hidden_dim: 32,
                ..Default::default()
            },
            obs_shape,
            action_dim: 2,
            normalizer: Normalizer::identity(obs_dim, 2),
        }
    }

    #[test]
    fn test_rollout_shape() {
        let model = PldmModel::new(meta(EncoderKind::Mlp, vec![2]), Device::Cpu).unwrap();
        let obs = Tensor::randn([4, 2], (Kind::Float, Device::Cpu));
        let z0 = model.encode(&obs);
        let actions = Tensor::randn([5, 4, 2], (Kind::Float, Device::Cpu));
        assert_eq!(model.rollout(&z0, &actions).size(), vec![6, 4, 8]);
    }

    #[test]
    fn test_conv_model_world_model_interface() {
        let model = PldmModel::new(meta(EncoderKind::Conv, vec![2, 64, 64]), Device::Cpu).unwrap();
        assert_eq!(model.latent_shape(), &[8, 8, 8]);

        let obs = Array2::<f32>::zeros((3, 2 * 64 * 64));
        let z = WorldModel::encode(&model, &obs).unwrap();
        assert_eq!(z.dim(), (3, 512));
        let a = Array2::<f32>::ones((3, 2));
        let next = WorldModel::predict(&model, &z, &a).unwrap();
        assert_eq!(next.dim(), (3, 512));
    }

    #[test]
    fn test_normalizer_shape_is_checked() {
        let mut m = meta(EncoderKind::Mlp, vec![2]);
        m.normalizer = Normalizer::identity(3, 2);
        assert!(PldmModel::new(m, Device::Cpu).is_err());
    }

    #[test]
    fn test_conv_encoder_rejects_flat_obs() {
        assert!(PldmModel::new(meta(EncoderKind::Conv, vec![2]), Device::Cpu).is_err());
    }

    #[test]
    fn test_state_roundtrip() {
        let a = PldmModel::new(meta(EncoderKind::Mlp, vec![2]), Device::Cpu).unwrap();
        let mut b = PldmModel::new(meta(EncoderKind::Mlp, vec![2]), Device::Cpu).unwrap();
        b.load_state(&a.save_state().unwrap()).unwrap();

        let obs = Array2::from_shape_vec((1, 2), vec![0.3f32, -0.7]).unwrap();
        assert_eq!(
            WorldModel::encode(&a, &obs).unwrap(),
            WorldModel::encode(&b, &obs).unwrap()
        );
    }
}
