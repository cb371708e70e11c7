//! Neural world-model components.
//!
//! Provides:
//! - `Encoder` implementations: `MlpEncoder`, `ConvEncoder`, `ResNet`
//! - `Predictor` implementations: `MlpPredictor`, `ConvPredictor`
//! - `InverseDynamics` head
//! - `PldmModel` tying them together in one `VarStore`

mod convert;
mod encoder;
mod idm;
mod pldm;
mod predictor;
mod resnet;

pub use convert::{array2_to_tensor, array3_to_tensor, tensor_to_array2};
pub use encoder::{ConvEncoder, MlpEncoder};
pub use idm::InverseDynamics;
pub use pldm::{ModelMeta, PldmModel};
pub use predictor::{ConvPredictor, MlpPredictor};
pub use resnet::{BlockKind, FinalPool, LastActivation, ResNet, ResNetSpec};

use crate::config::{EncoderKind, ModelConfig};
use crate::{PldmError, Result};
use tch::{nn, Tensor};

/// Maps a batch of observations [B, *obs_shape] to latents [B, *output_shape].
pub trait Encoder: std::fmt::Debug + Send {
    fn forward(&self, obs: &Tensor) -> Tensor;

    /// Latent shape without the batch dimension
    fn output_shape(&self) -> &[i64];

    /// Flattened latent size
    fn output_dim(&self) -> i64 {
        self.output_shape().iter().product()
    }
}

/// Predicts the next latent from a latent batch and an action batch [B, A].
pub trait Predictor: std::fmt::Debug + Send {
    fn forward(&self, latent: &Tensor, action: &Tensor) -> Tensor;
}

/// Build the encoder selected by `config` for observations of `obs_shape`.
pub fn build_encoder(
    p: &nn::Path,
    config: &ModelConfig,
    obs_shape: &[i64],
) -> Result<Box<dyn Encoder>> {
    match (config.encoder, obs_shape.len()) {
        (EncoderKind::Mlp, _) => {
            let obs_dim = obs_shape.iter().product();
            Ok(Box::new(MlpEncoder::new(
                p,
                obs_dim,
                config.hidden_dim,
                config.latent_dim,
            )))
        }
        (EncoderKind::Conv, 3) => Ok(Box::new(ConvEncoder::new(
            p,
            [obs_shape[0], obs_shape[1], obs_shape[2]],
            config.latent_dim,
        ))),
        (EncoderKind::ResNet { preset }, 3) => {
            let spec = ResNetSpec::preset(preset);
            Ok(Box::new(ResNet::new(
                p,
                &spec,
                [obs_shape[0], obs_shape[1], obs_shape[2]],
            )))
        }
        (kind, _) => Err(PldmError::ConfigError(format!(
            "{:?} encoder needs [C, H, W] observations, got {:?}",
            kind, obs_shape
        ))),
    }
}

/// Spatial latents get a convolutional predictor, flat ones an MLP.
pub fn build_predictor(
    p: &nn::Path,
    config: &ModelConfig,
    latent_shape: &[i64],
    action_dim: i64,
) -> Box<dyn Predictor> {
    if latent_shape.len() == 3 {
        Box::new(ConvPredictor::new(
            p,
            latent_shape[0],
            action_dim,
            config.hidden_dim.min(128),
            config.predictor_layers,
        ))
    } else {
        Box::new(MlpPredictor::new(
            p,
            latent_shape.iter().product(),
            action_dim,
            config.hidden_dim,
            config.predictor_layers,
        ))
    }
}
