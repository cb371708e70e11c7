use super::Encoder;
use tch::{nn, nn::Module, Tensor};

/// MLP encoder for flat observations: `obs_dim -> hidden -> hidden -> latent`.
#[derive(Debug)]
pub struct MlpEncoder {
    seq: nn::Sequential,
    output_shape: [i64; 1],
}

impl MlpEncoder {
    pub fn new(p: &nn::Path, obs_dim: i64, hidden_dim: i64, latent_dim: i64) -> Self {
        let seq = nn::seq()
            .add(nn::linear(p / "l0", obs_dim, hidden_dim, Default::default()))
            .add_fn(|xs| xs.relu())
            .add(nn::linear(p / "l1", hidden_dim, hidden_dim, Default::default()))
            .add_fn(|xs| xs.relu())
            .add(nn::linear(p / "out", hidden_dim, latent_dim, Default::default()));
        Self {
            seq,
            output_shape: [latent_dim],
        }
    }
}

impl Encoder for MlpEncoder {
    fn forward(&self, obs: &Tensor) -> Tensor {
        obs.flatten(1, -1).apply(&self.seq)
    }

    fn output_shape(&self) -> &[i64] {
        &self.output_shape
    }
}

fn conv(p: nn::Path, c_in: i64, c_out: i64, k: i64, stride: i64, padding: i64) -> nn::Conv2D {
    nn::conv2d(
        p,
        c_in,
        c_out,
        k,
        nn::ConvConfig {
            stride,
            padding,
            ..Default::default()
        },
    )
}

/// Strided CNN keeping a spatial latent.
///
/// Three stride-2 convolutions reduce `H x W` by 8, then a 1x1 convolution
/// maps to `latent_channels`. A 2x64x64 image becomes `latent_channels x 8 x 8`.
#[derive(Debug)]
pub struct ConvEncoder {
    seq: nn::Sequential,
    output_shape: [i64; 3],
}

impl ConvEncoder {
    pub fn new(p: &nn::Path, input_shape: [i64; 3], latent_channels: i64) -> Self {
        let [c, h, w] = input_shape;
        let seq = nn::seq()
            .add(conv(p / "c1", c, 32, 4, 2, 1))
            .add_fn(|xs| xs.relu())
            .add(conv(p / "c2", 32, 64, 4, 2, 1))
            .add_fn(|xs| xs.relu())
            .add(conv(p / "c3", 64, 64, 4, 2, 1))
            .add_fn(|xs| xs.relu())
            .add(conv(p / "proj", 64, latent_channels, 1, 1, 0));
        Self {
            seq,
            output_shape: [latent_channels, h / 8, w / 8],
        }
    }
}

impl Encoder for ConvEncoder {
    fn forward(&self, obs: &Tensor) -> Tensor {
        self.seq.forward(obs)
    }

    fn output_shape(&self) -> &[i64] {
        &self.output_shape
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    #[test]
    fn test_mlp_encoder_shape() {
        let vs = nn::VarStore::new(Device::Cpu);
        let enc = MlpEncoder::new(&vs.root(), 2, 16, 8);
        let out = enc.forward(&Tensor::randn([5, 2], (Kind::Float, Device::Cpu)));
        assert_eq!(out.size(), vec![5, 8]);
        assert_eq!(enc.output_dim(), 8);
    }

    #[test]
    fn test_conv_encoder_shape() {
        let vs = nn::VarStore::new(Device::Cpu);
        let enc = ConvEncoder::new(&vs.root(), [2, 64, 64], 4);
        let out = enc.forward(&Tensor::randn([3, 2, 64, 64], (Kind::Float, Device::Cpu)));
        assert_eq!(out.size(), vec![3, 4, 8, 8]);
        assert_eq!(enc.output_shape(), &[4, 8, 8]);
    }
}
