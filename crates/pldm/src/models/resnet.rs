//! ResNet backbones with GroupNorm.
//!
//! Follows the torchvision layout with a few changes for small top-down
//! images: an optional constant padding before the stem (the stem padding
//! shrinks from 3 to 2 to compensate), an optional initial max-pool, a
//! configurable final pooling, optional spatial output and an optional
//! LayerNorm on the encoding.

use super::Encoder;
use crate::config::ResNetPreset;
use tch::{nn, nn::Module, Kind, Tensor};

/// Residual block flavour.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    /// Two 3x3 convolutions
    Basic,
    /// 1x1 -> 3x3 -> 1x1, expanding channels by 4
    Bottleneck,
    /// Shortcut only
    Identity,
}

impl BlockKind {
    pub fn expansion(self) -> i64 {
        match self {
            BlockKind::Bottleneck => 4,
            BlockKind::Basic | BlockKind::Identity => 1,
        }
    }
}

/// How the last stage is reduced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FinalPool {
    /// Global average pool to 1x1
    AvgPool,
    /// 1x1 convolution to the given number of channels
    Conv1x1(i64),
    Identity,
}

/// Nonlinearity closing the last block of the last stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LastActivation {
    #[default]
    Relu,
    Sigmoid,
    None,
}

impl LastActivation {
    fn apply(self, xs: Tensor) -> Tensor {
        match self {
            LastActivation::Relu => xs.relu(),
            LastActivation::Sigmoid => xs.sigmoid(),
            LastActivation::None => xs,
        }
    }
}

/// Full description of a ResNet.
#[derive(Clone, Debug, PartialEq)]
pub struct ResNetSpec {
    pub block: BlockKind,
    /// Blocks per stage
    pub layers: Vec<i64>,
    /// Planes per stage
    pub filters: Vec<i64>,
    /// Stride of the first block in each stage
    pub strides: Vec<i64>,
    pub initial_padding: bool,
    pub initial_maxpool: bool,
    pub final_pool: FinalPool,
    /// Keep [C, H, W] instead of flattening
    pub spatial_output: bool,
    /// Start every residual branch at zero
    pub zero_init_residual: bool,
    /// Multiplier on the stem and every stage's width
    pub widen: i64,
    pub last_activation: LastActivation,
    /// LayerNorm over the whole encoding
    pub final_layer_norm: bool,
}

impl ResNetSpec {
    fn standard(block: BlockKind, layers: Vec<i64>) -> Self {
        Self {
            block,
            layers,
            filters: vec![64, 128, 256, 512],
            strides: vec![1, 2, 2, 2],
            initial_padding: true,
            initial_maxpool: true,
            final_pool: FinalPool::AvgPool,
            spatial_output: false,
            zero_init_residual: false,
            widen: 1,
            last_activation: LastActivation::Relu,
            final_layer_norm: false,
        }
    }

    /// Two basic stages at full resolution, kept spatial.
    fn two_stage(final_pool: FinalPool) -> Self {
        Self {
            block: BlockKind::Basic,
            layers: vec![2, 2],
            filters: vec![64, 128],
            strides: vec![1, 2],
            initial_padding: false,
            initial_maxpool: false,
            final_pool,
            spatial_output: true,
            zero_init_residual: false,
            widen: 1,
            last_activation: LastActivation::Relu,
            final_layer_norm: false,
        }
    }

    pub fn preset(preset: ResNetPreset) -> Self {
        match preset {
            ResNetPreset::Resnet18 => Self::standard(BlockKind::Basic, vec![2, 2, 2, 2]),
            ResNetPreset::Resnet34 => Self::standard(BlockKind::Basic, vec![3, 4, 6, 3]),
            ResNetPreset::Resnet50 => Self::standard(BlockKind::Bottleneck, vec![3, 4, 6, 3]),
            ResNetPreset::Resnet18Identity => {
                Self::standard(BlockKind::Identity, vec![2, 2, 2, 2])
            }
            ResNetPreset::Resnet18Small => Self {
                block: BlockKind::Basic,
                layers: vec![2, 2, 2, 2],
                filters: vec![64, 128, 128, 128],
                strides: vec![1, 2, 1, 1],
                initial_padding: true,
                initial_maxpool: false,
                final_pool: FinalPool::Conv1x1(64),
                spatial_output: true,
                zero_init_residual: true,
                widen: 1,
                last_activation: LastActivation::Relu,
                final_layer_norm: false,
            },
            ResNetPreset::Resnet50x2 => Self {
                widen: 2,
                ..Self::standard(BlockKind::Bottleneck, vec![3, 4, 6, 3])
            },
            ResNetPreset::Resnet18sA => Self::two_stage(FinalPool::Identity),
            ResNetPreset::Resnet18sB | ResNetPreset::Resnet18sF => {
                Self::two_stage(FinalPool::Conv1x1(32))
            }
            ResNetPreset::Resnet18sC | ResNetPreset::Resnet18sE => {
                Self::two_stage(FinalPool::Conv1x1(48))
            }
            ResNetPreset::Resnet18sD => Self::two_stage(FinalPool::Conv1x1(64)),
        }
    }
}

fn kaiming_fan_out() -> nn::Init {
    nn::Init::Kaiming {
        dist: nn::NormalOrUniform::Normal,
        fan: nn::FanInOut::FanOut,
        non_linearity: nn::NonLinearity::ReLU,
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
            bias: false,
            ws_init: kaiming_fan_out(),
            ..Default::default()
        },
    )
}

/// GroupNorm with `min(32, channels / 4)` groups.
fn norm(p: nn::Path, channels: i64, zero_weight: bool) -> nn::GroupNorm {
    let groups = (channels / 4).clamp(1, 32);
    nn::group_norm(
        p,
        groups,
        channels,
        nn::GroupNormConfig {
            ws_init: nn::Init::Const(if zero_weight { 0.0 } else { 1.0 }),
            bs_init: nn::Init::Const(0.0),
            ..Default::default()
        },
    )
}

#[derive(Debug)]
struct Downsample {
    conv: nn::Conv2D,
    norm: nn::GroupNorm,
}

impl Downsample {
    fn forward(&self, xs: &Tensor) -> Tensor {
        xs.apply(&self.conv).apply(&self.norm)
    }
}

#[derive(Debug)]
enum Branch {
    Basic {
        conv1: nn::Conv2D,
        norm1: nn::GroupNorm,
        conv2: nn::Conv2D,
        norm2: nn::GroupNorm,
    },
    Bottleneck {
        conv1: nn::Conv2D,
        norm1: nn::GroupNorm,
        conv2: nn::Conv2D,
        norm2: nn::GroupNorm,
        conv3: nn::Conv2D,
        norm3: nn::GroupNorm,
    },
    Identity,
}

#[derive(Debug)]
struct Block {
    branch: Branch,
    downsample: Option<Downsample>,
    activation: LastActivation,
}

impl Block {
    fn new(
        p: nn::Path,
        kind: BlockKind,
        inplanes: i64,
        planes: i64,
        stride: i64,
        downsample: Option<Downsample>,
        zero_init: bool,
    ) -> Self {
        let branch = match kind {
            BlockKind::Basic => Branch::Basic {
                conv1: conv(&p / "conv1", inplanes, planes, 3, stride, 1),
                norm1: norm(&p / "bn1", planes, false),
                conv2: conv(&p / "conv2", planes, planes, 3, 1, 1),
                norm2: norm(&p / "bn2", planes, zero_init),
            },
            BlockKind::Bottleneck => {
                let out = planes * kind.expansion();
                Branch::Bottleneck {
                    conv1: conv(&p / "conv1", inplanes, planes, 1, 1, 0),
                    norm1: norm(&p / "bn1", planes, false),
                    conv2: conv(&p / "conv2", planes, planes, 3, stride, 1),
                    norm2: norm(&p / "bn2", planes, false),
                    conv3: conv(&p / "conv3", planes, out, 1, 1, 0),
                    norm3: norm(&p / "bn3", out, zero_init),
                }
            }
            BlockKind::Identity => Branch::Identity,
        };
        Self {
            branch,
            downsample,
            activation: LastActivation::Relu,
        }
    }

    fn with_activation(mut self, activation: LastActivation) -> Self {
        self.activation = activation;
        self
    }
}

impl Module for Block {
    fn forward(&self, xs: &Tensor) -> Tensor {
        let identity = match &self.downsample {
            Some(d) => d.forward(xs),
            None => xs.shallow_clone(),
        };
        let out = match &self.branch {
            Branch::Basic {
                conv1,
                norm1,
                conv2,
                norm2,
            } => {
                xs.apply(conv1).apply(norm1).relu().apply(conv2).apply(norm2) + identity
            }
            Branch::Bottleneck {
                conv1,
                norm1,
                conv2,
                norm2,
                conv3,
                norm3,
            } => {
                xs.apply(conv1)
                    .apply(norm1)
                    .relu()
                    .apply(conv2)
                    .apply(norm2)
                    .relu()
                    .apply(conv3)
                    .apply(norm3)
                    + identity
            }
            Branch::Identity => identity,
        };
        self.activation.apply(out)
    }
}

/// ResNet encoder over [B, C, H, W] images.
#[derive(Debug)]
pub struct ResNet {
    initial_padding: bool,
    stem_conv: nn::Conv2D,
    stem_norm: nn::GroupNorm,
    initial_maxpool: bool,
    stages: Vec<nn::Sequential>,
    final_pool: FinalPool,
    final_conv: Option<nn::Conv2D>,
    spatial_output: bool,
    final_norm: Option<nn::LayerNorm>,
    output_shape: Vec<i64>,
}

impl ResNet {
    pub fn new(p: &nn::Path, spec: &ResNetSpec, input_shape: [i64; 3]) -> Self {
        let widen = spec.widen.max(1);
        let stem_width = spec.filters[0] * widen;
        let stem_conv = conv(p / "conv1", input_shape[0], stem_width, 7, 2, 2);
        let stem_norm = norm(p / "bn1", stem_width, false);

        let last_stage = spec.layers.len().saturating_sub(1);
        let mut inplanes = stem_width;
        let mut stages = Vec::with_capacity(spec.layers.len());
        for (i, (&blocks, (&planes, &stride))) in spec
            .layers
            .iter()
            .zip(spec.filters.iter().zip(spec.strides.iter()))
            .enumerate()
        {
            let sp = p / format!("layer{}", i + 1);
            let planes = planes * widen;
            let out = planes * spec.block.expansion();
            let mut stage = nn::seq();
            for b in 0..blocks {
                let bp = &sp / b;
                let (block_in, block_stride) = if b == 0 {
                    (inplanes, stride)
                } else {
                    (out, 1)
                };
                let downsample = if b == 0 && (stride != 1 || inplanes != out) {
                    Some(Downsample {
                        conv: conv(&bp / "downsample_conv", inplanes, out, 1, stride, 0),
                        norm: norm(&bp / "downsample_norm", out, false),
                    })
                } else {
                    None
                };
                let activation = if i == last_stage && b + 1 == blocks {
                    spec.last_activation
                } else {
                    LastActivation::Relu
                };
                let block = Block::new(
                    bp,
                    spec.block,
                    block_in,
                    planes,
                    block_stride,
                    downsample,
                    spec.zero_init_residual,
                );
                stage = stage.add(block.with_activation(activation));
            }
            inplanes = out;
            stages.push(stage);
        }

        let final_conv = match spec.final_pool {
            FinalPool::Conv1x1(filters) => Some(nn::conv2d(
                p / "final_pool",
                inplanes,
                filters,
                1,
                nn::ConvConfig {
                    ws_init: kaiming_fan_out(),
                    ..Default::default()
                },
            )),
            _ => None,
        };

        let mut net = Self {
            initial_padding: spec.initial_padding,
            stem_conv,
            stem_norm,
            initial_maxpool: spec.initial_maxpool,
            stages,
            final_pool: spec.final_pool,
            final_conv,
            spatial_output: spec.spatial_output,
            final_norm: None,
            output_shape: Vec::new(),
        };

        // Probe once to learn the latent shape for this input size
        let probe = Tensor::zeros(
            [1, input_shape[0], input_shape[1], input_shape[2]],
            (Kind::Float, p.device()),
        );
        let out = tch::no_grad(|| net.forward(&probe));
        net.output_shape = out.size()[1..].to_vec();
        if spec.final_layer_norm {
            net.final_norm = Some(nn::layer_norm(
                p / "final_ln",
                net.output_shape.clone(),
                Default::default(),
            ));
        }
        net
    }
}

impl Encoder for ResNet {
    fn forward(&self, obs: &Tensor) -> Tensor {
        let mut xs = if self.initial_padding {
            obs.zero_pad2d(1, 1, 1, 1)
        } else {
            obs.shallow_clone()
        };
        xs = xs.apply(&self.stem_conv).apply(&self.stem_norm).relu();
        if self.initial_maxpool {
            xs = xs.max_pool2d([3, 3], [2, 2], [1, 1], [1, 1], false);
        }
        for stage in &self.stages {
            xs = xs.apply(stage);
        }
        xs = match (&self.final_pool, &self.final_conv) {
            (FinalPool::AvgPool, _) => xs.adaptive_avg_pool2d([1, 1]),
            (FinalPool::Conv1x1(_), Some(c)) => xs.apply(c),
            _ => xs,
        };
        if !self.spatial_output {
            xs = xs.flatten(1, -1);
        }
        match &self.final_norm {
            Some(ln) => xs.apply(ln),
            None => xs,
        }
    }

    fn output_shape(&self) -> &[i64] {
        &self.output_shape
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Device;

    fn build(preset: ResNetPreset, input: [i64; 3]) -> (nn::VarStore, ResNet) {
        let vs = nn::VarStore::new(Device::Cpu);
        let net = ResNet::new(&vs.root(), &ResNetSpec::preset(preset), input);
        (vs, net)
    }

    #[test]
    fn test_resnet18_flat_output() {
        let (_vs, net) = build(ResNetPreset::Resnet18, [2, 64, 64]);
        assert_eq!(net.output_shape(), &[512]);
        let out = net.forward(&Tensor::randn([2, 2, 64, 64], (Kind::Float, Device::Cpu)));
        assert_eq!(out.size(), vec![2, 512]);
    }

    #[test]
    fn test_resnet50_expansion() {
        let (_vs, net) = build(ResNetPreset::Resnet50, [1, 32, 32]);
        assert_eq!(net.output_shape(), &[2048]);
    }

    #[test]
    fn test_small_preset_is_spatial() {
        let (_vs, net) = build(ResNetPreset::Resnet18Small, [2, 64, 64]);
        let shape = net.output_shape().to_vec();
        assert_eq!(shape.len(), 3);
        assert_eq!(shape[0], 64);
        let out = net.forward(&Tensor::randn([1, 2, 64, 64], (Kind::Float, Device::Cpu)));
        assert_eq!(out.size()[1..].to_vec(), shape);
    }

    #[test]
    fn test_zero_init_blocks_start_as_identity() {
        // With zero-initialized final norms every block is relu(shortcut).
        let vs = nn::VarStore::new(Device::Cpu);
        let block = Block::new(
            vs.root() / "b",
            BlockKind::Basic,
            8,
            8,
            1,
            None,
            true,
        );
        let xs = Tensor::randn([2, 8, 5, 5], (Kind::Float, Device::Cpu));
        let diff = (block.forward(&xs) - xs.relu()).abs().max();
        assert!(diff.double_value(&[]) < 1e-6);
    }

    #[test]
    fn test_two_stage_presets() {
        let (_vs, raw) = build(ResNetPreset::Resnet18sA, [1, 64, 64]);
        assert_eq!(raw.output_shape().len(), 3);
        assert_eq!(raw.output_shape()[0], 128);

        for (preset, channels) in [
            (ResNetPreset::Resnet18sB, 32),
            (ResNetPreset::Resnet18sC, 48),
            (ResNetPreset::Resnet18sD, 64),
            (ResNetPreset::Resnet18sF, 32),
        ] {
            let (_vs, net) = build(preset, [1, 64, 64]);
            assert_eq!(net.output_shape()[0], channels, "{:?}", preset);
            assert_eq!(net.output_shape()[1..], raw.output_shape()[1..]);
        }
    }

    #[test]
    fn test_widen_scales_every_stage() {
        let (_vs, net) = build(ResNetPreset::Resnet50x2, [1, 32, 32]);
        assert_eq!(net.output_shape(), &[4096]);
    }

    #[test]
    fn test_sigmoid_last_activation_bounds_output() {
        let spec = ResNetSpec {
            last_activation: LastActivation::Sigmoid,
            ..ResNetSpec::preset(ResNetPreset::Resnet18sA)
        };
        let vs = nn::VarStore::new(Device::Cpu);
        let net = ResNet::new(&vs.root(), &spec, [1, 16, 16]);
        let out = net.forward(&Tensor::randn([2, 1, 16, 16], (Kind::Float, Device::Cpu)));
        assert!(out.min().double_value(&[]) >= 0.0);
        assert!(out.max().double_value(&[]) <= 1.0);
    }

    #[test]
    fn test_final_layer_norm_standardizes_encoding() {
        let spec = ResNetSpec {
            final_layer_norm: true,
            ..ResNetSpec::preset(ResNetPreset::Resnet18)
        };
        let vs = nn::VarStore::new(Device::Cpu);
        let net = ResNet::new(&vs.root(), &spec, [1, 32, 32]);
        let out = net.forward(&Tensor::randn([3, 1, 32, 32], (Kind::Float, Device::Cpu)));
        assert_eq!(out.size(), vec![3, 512]);
        let mean = out.mean_dim([1i64].as_slice(), false, Kind::Float);
        assert!(mean.abs().max().double_value(&[]) < 1e-4);
    }

    #[test]
    fn test_identity_preset_shapes() {
        let (_vs, net) = build(ResNetPreset::Resnet18Identity, [1, 64, 64]);
        assert_eq!(net.output_shape(), &[512]);
    }
}
