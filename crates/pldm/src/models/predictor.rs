use super::Predictor;
use tch::{nn, Tensor};

/// Residual MLP dynamics: `z' = z + f([z, a])`.
#[derive(Debug)]
pub struct MlpPredictor {
    seq: nn::Sequential,
}

impl MlpPredictor {
    pub fn new(
        p: &nn::Path,
        latent_dim: i64,
        action_dim: i64,
        hidden_dim: i64,
        layers: i64,
    ) -> Self {
        let mut seq = nn::seq();
        let mut cur_in = latent_dim + action_dim;
        for i in 0..layers.max(1) {
            seq = seq
                .add(nn::linear(
                    p / format!("l{}", i),
                    cur_in,
                    hidden_dim,
                    Default::default(),
                ))
                .add_fn(|xs| xs.relu());
            cur_in = hidden_dim;
        }
        seq = seq.add(nn::linear(p / "out", cur_in, latent_dim, Default::default()));
        Self { seq }
    }
}

impl Predictor for MlpPredictor {
    fn forward(&self, latent: &Tensor, action: &Tensor) -> Tensor {
        let shape = latent.size();
        let flat = latent.flatten(1, -1);
        let delta = Tensor::cat(&[&flat, action], 1).apply(&self.seq);
        (flat + delta).reshape(shape)
    }
}

/// Residual conv dynamics over spatial latents [B, C, H, W].
///
/// The action is broadcast to `action_dim` constant planes and concatenated
/// with the latent channels.
#[derive(Debug)]
pub struct ConvPredictor {
    seq: nn::Sequential,
}

impl ConvPredictor {
    pub fn new(
        p: &nn::Path,
        channels: i64,
        action_dim: i64,
        hidden_channels: i64,
        layers: i64,
    ) -> Self {
        let cfg = nn::ConvConfig {
            padding: 1,
            ..Default::default()
        };
        let mut seq = nn::seq();
        let mut cur_in = channels + action_dim;
        for i in 0..layers.max(1) {
            seq = seq
                .add(nn::conv2d(
                    p / format!("c{}", i),
                    cur_in,
                    hidden_channels,
                    3,
                    cfg,
                ))
                .add_fn(|xs| xs.relu());
            cur_in = hidden_channels;
        }
        seq = seq.add(nn::conv2d(p / "out", cur_in, channels, 3, cfg));
        Self { seq }
    }
}

impl Predictor for ConvPredictor {
    fn forward(&self, latent: &Tensor, action: &Tensor) -> Tensor {
        let size = latent.size();
        let (b, h, w) = (size[0], size[2], size[3]);
        let planes = action
            .reshape([b, -1, 1, 1])
            .expand([b, action.size()[1], h, w], false);
        let delta = Tensor::cat(&[latent, &planes], 1).apply(&self.seq);
        latent + delta
    }
}
