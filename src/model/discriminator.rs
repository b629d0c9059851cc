//! PatchGAN discriminators
//!
//! N-layer convolutional discriminators producing a grid of per-patch realism
//! logits rather than a single global score. The 2D and 3D variants follow
//! the same layer progression and share one weight-initialization scheme;
//! only the convolution rank differs.

use serde::{Deserialize, Serialize};
use tch::nn::{self, ModuleT};
use tch::Tensor;

/// Normalization layer kind used between convolutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormKind {
    Batch,
    Instance,
}

/// Discriminator network configuration
#[derive(Debug, Clone)]
pub struct DiscriminatorConfig {
    /// Number of input channels
    pub in_channels: i64,
    /// Number of downsampling layers
    pub num_layers: i64,
    /// Base feature width (filters of the first convolution)
    pub base_filters: i64,
    /// Normalization layer kind
    pub norm: NormKind,
    /// Squash logits through a sigmoid at the head
    pub use_sigmoid: bool,
}

impl Default for DiscriminatorConfig {
    fn default() -> Self {
        Self {
            in_channels: 3,
            num_layers: 3,
            base_filters: 64,
            norm: NormKind::Batch,
            use_sigmoid: false,
        }
    }
}

// Convolution weights ~ N(0, 0.02); normalization scale ~ N(1, 0.02), bias 0.
const CONV_INIT: nn::Init = nn::Init::Randn { mean: 0.0, stdev: 0.02 };
const NORM_WS_INIT: nn::Init = nn::Init::Randn { mean: 1.0, stdev: 0.02 };
const NORM_BS_INIT: nn::Init = nn::Init::Const(0.0);

const KERNEL: i64 = 4;
const PADDING: i64 = 1;
const LEAKY_SLOPE: f64 = 0.2;

fn leaky_relu(xs: &Tensor, slope: f64) -> Tensor {
    xs.maximum(&(xs * slope))
}

/// A differentiable map from an image or volume to per-patch realism logits.
///
/// Implementations also expose the channel-like axis along which conditioning
/// tensors are concatenated before the forward pass: volumetric data carries
/// one more leading spatial axis, so the axis differs between ranks.
pub trait PatchDiscriminator: ModuleT {
    /// Concatenation axis for conditioning tensors.
    fn cond_concat_dim(&self) -> i64;
}

/// Instance normalization with learnable per-channel scale and shift.
#[derive(Debug)]
struct InstanceNorm {
    ws: Tensor,
    bs: Tensor,
}

impl InstanceNorm {
    fn new(p: nn::Path, dim: i64) -> Self {
        let ws = p.var("weight", &[dim], NORM_WS_INIT);
        let bs = p.var("bias", &[dim], NORM_BS_INIT);
        Self { ws, bs }
    }
}

impl ModuleT for InstanceNorm {
    fn forward_t(&self, xs: &Tensor, _train: bool) -> Tensor {
        xs.instance_norm(
            Some(&self.ws),
            Some(&self.bs),
            None::<&Tensor>,
            None::<&Tensor>,
            true,
            0.1,
            1e-5,
            false,
        )
    }
}

#[derive(Debug)]
enum NormLayer {
    Batch(nn::BatchNorm),
    Instance(InstanceNorm),
}

impl ModuleT for NormLayer {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        match self {
            NormLayer::Batch(bn) => bn.forward_t(xs, train),
            NormLayer::Instance(inorm) => inorm.forward_t(xs, train),
        }
    }
}

fn batch_norm_config() -> nn::BatchNormConfig {
    nn::BatchNormConfig {
        ws_init: NORM_WS_INIT,
        bs_init: NORM_BS_INIT,
        ..Default::default()
    }
}

fn norm2d(p: nn::Path, kind: NormKind, dim: i64) -> NormLayer {
    match kind {
        NormKind::Batch => NormLayer::Batch(nn::batch_norm2d(&p, dim, batch_norm_config())),
        NormKind::Instance => NormLayer::Instance(InstanceNorm::new(p, dim)),
    }
}

fn norm3d(p: nn::Path, kind: NormKind, dim: i64) -> NormLayer {
    match kind {
        NormKind::Batch => NormLayer::Batch(nn::batch_norm3d(&p, dim, batch_norm_config())),
        NormKind::Instance => NormLayer::Instance(InstanceNorm::new(p, dim)),
    }
}

/// 2D N-layer PatchGAN discriminator
///
/// Architecture:
/// 1. Stride-2 4x4 convolution + LeakyReLU
/// 2. `num_layers - 1` stride-2 conv/norm/LeakyReLU blocks with feature
///    multiplier `min(2^n, 8)`, then one stride-1 block
/// 3. Final stride-1 convolution down to one logit channel
#[derive(Debug)]
pub struct NLayerDiscriminator2d {
    model: nn::SequentialT,
}

impl NLayerDiscriminator2d {
    /// Create a new 2D discriminator under the given variable path.
    pub fn new(p: &nn::Path, config: DiscriminatorConfig) -> Self {
        let ndf = config.base_filters;
        // Normed convolutions carry a bias only under instance norm.
        let bias = matches!(config.norm, NormKind::Instance);

        let head = nn::ConvConfig {
            stride: 2,
            padding: PADDING,
            ws_init: CONV_INIT,
            ..Default::default()
        };
        let mut model = nn::seq_t()
            .add(nn::conv2d(p / "conv0", config.in_channels, ndf, KERNEL, head))
            .add_fn(|xs| leaky_relu(xs, LEAKY_SLOPE));

        let mut mult: i64 = 1;
        for n in 1..=config.num_layers {
            let prev = mult;
            mult = (1 << n).min(8);
            let stride = if n < config.num_layers { 2 } else { 1 };
            let conv = nn::ConvConfig {
                stride,
                padding: PADDING,
                bias,
                ws_init: CONV_INIT,
                ..Default::default()
            };
            model = model
                .add(nn::conv2d(
                    p / format!("conv{n}"),
                    ndf * prev,
                    ndf * mult,
                    KERNEL,
                    conv,
                ))
                .add(norm2d(p / format!("norm{n}"), config.norm, ndf * mult))
                .add_fn(|xs| leaky_relu(xs, LEAKY_SLOPE));
        }

        let tail = nn::ConvConfig {
            stride: 1,
            padding: PADDING,
            ws_init: CONV_INIT,
            ..Default::default()
        };
        model = model.add(nn::conv2d(p / "conv_out", ndf * mult, 1, KERNEL, tail));
        if config.use_sigmoid {
            model = model.add_fn(|xs| xs.sigmoid());
        }

        Self { model }
    }
}

impl ModuleT for NLayerDiscriminator2d {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.model.forward_t(xs, train)
    }
}

impl PatchDiscriminator for NLayerDiscriminator2d {
    fn cond_concat_dim(&self) -> i64 {
        -2
    }
}

/// 3D N-layer PatchGAN discriminator, architecturally parallel to the 2D
/// variant with volumetric convolutions.
#[derive(Debug)]
pub struct NLayerDiscriminator3d {
    model: nn::SequentialT,
}

impl NLayerDiscriminator3d {
    /// Create a new 3D discriminator under the given variable path.
    pub fn new(p: &nn::Path, config: DiscriminatorConfig) -> Self {
        let ndf = config.base_filters;
        let bias = matches!(config.norm, NormKind::Instance);

        let head = nn::ConvConfig {
            stride: 2,
            padding: PADDING,
            ws_init: CONV_INIT,
            ..Default::default()
        };
        let mut model = nn::seq_t()
            .add(nn::conv3d(p / "conv0", config.in_channels, ndf, KERNEL, head))
            .add_fn(|xs| leaky_relu(xs, LEAKY_SLOPE));

        let mut mult: i64 = 1;
        for n in 1..=config.num_layers {
            let prev = mult;
            mult = (1 << n).min(8);
            let stride = if n < config.num_layers { 2 } else { 1 };
            let conv = nn::ConvConfig {
                stride,
                padding: PADDING,
                bias,
                ws_init: CONV_INIT,
                ..Default::default()
            };
            model = model
                .add(nn::conv3d(
                    p / format!("conv{n}"),
                    ndf * prev,
                    ndf * mult,
                    KERNEL,
                    conv,
                ))
                .add(norm3d(p / format!("norm{n}"), config.norm, ndf * mult))
                .add_fn(|xs| leaky_relu(xs, LEAKY_SLOPE));
        }

        let tail = nn::ConvConfig {
            stride: 1,
            padding: PADDING,
            ws_init: CONV_INIT,
            ..Default::default()
        };
        model = model.add(nn::conv3d(p / "conv_out", ndf * mult, 1, KERNEL, tail));
        if config.use_sigmoid {
            model = model.add_fn(|xs| xs.sigmoid());
        }

        Self { model }
    }
}

impl ModuleT for NLayerDiscriminator3d {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.model.forward_t(xs, train)
    }
}

impl PatchDiscriminator for NLayerDiscriminator3d {
    fn cond_concat_dim(&self) -> i64 {
        -3
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::nn::VarStore;
    use tch::{Device, Kind, Tensor};

    #[test]
    fn test_discriminator_2d_patch_logits() {
        let vs = VarStore::new(Device::Cpu);
        let config = DiscriminatorConfig {
            in_channels: 1,
            num_layers: 2,
            base_filters: 8,
            norm: NormKind::Batch,
            use_sigmoid: false,
        };
        let disc = NLayerDiscriminator2d::new(&vs.root(), config);

        let input = Tensor::randn([2, 1, 32, 32], (Kind::Float, Device::Cpu));
        let logits = disc.forward_t(&input, false);

        let size = logits.size();
        assert_eq!(size.len(), 4);
        assert_eq!(size[0], 2);
        assert_eq!(size[1], 1);
        assert!(size[2] > 1 && size[3] > 1);
    }

    #[test]
    fn test_discriminator_3d_patch_logits() {
        let vs = VarStore::new(Device::Cpu);
        let config = DiscriminatorConfig {
            in_channels: 1,
            num_layers: 1,
            base_filters: 4,
            norm: NormKind::Batch,
            use_sigmoid: false,
        };
        let disc = NLayerDiscriminator3d::new(&vs.root(), config);

        let input = Tensor::randn([1, 1, 16, 16, 16], (Kind::Float, Device::Cpu));
        let logits = disc.forward_t(&input, false);

        let size = logits.size();
        assert_eq!(size.len(), 5);
        assert_eq!(size[0], 1);
        assert_eq!(size[1], 1);
    }

    #[test]
    fn test_discriminator_sigmoid_head() {
        let vs = VarStore::new(Device::Cpu);
        let config = DiscriminatorConfig {
            in_channels: 1,
            num_layers: 1,
            base_filters: 4,
            norm: NormKind::Batch,
            use_sigmoid: true,
        };
        let disc = NLayerDiscriminator2d::new(&vs.root(), config);

        let input = Tensor::randn([2, 1, 16, 16], (Kind::Float, Device::Cpu));
        let scores = disc.forward_t(&input, false);

        let min: f64 = scores.min().double_value(&[]);
        let max: f64 = scores.max().double_value(&[]);
        assert!(min >= 0.0 && max <= 1.0);
    }

    #[test]
    fn test_instance_norm_variant() {
        let vs = VarStore::new(Device::Cpu);
        let config = DiscriminatorConfig {
            in_channels: 1,
            num_layers: 2,
            base_filters: 8,
            norm: NormKind::Instance,
            use_sigmoid: false,
        };
        let disc = NLayerDiscriminator2d::new(&vs.root(), config);

        let input = Tensor::randn([2, 1, 32, 32], (Kind::Float, Device::Cpu));
        let logits = disc.forward_t(&input, false);
        assert_eq!(logits.size()[1], 1);
    }

    #[test]
    fn test_weight_initialization() {
        let vs = VarStore::new(Device::Cpu);
        let config = DiscriminatorConfig {
            in_channels: 3,
            num_layers: 2,
            base_filters: 32,
            norm: NormKind::Batch,
            use_sigmoid: false,
        };
        let _disc = NLayerDiscriminator2d::new(&vs.root(), config);

        for (name, var) in vs.variables() {
            if name.starts_with("conv") && name.ends_with("weight") {
                let std: f64 = var.std(true).double_value(&[]);
                assert!(
                    (std - 0.02).abs() < 0.01,
                    "{} std {} too far from 0.02",
                    name,
                    std
                );
            }
            if name.starts_with("norm") && name.ends_with("weight") {
                let mean: f64 = var.mean(Kind::Float).double_value(&[]);
                assert!(
                    (mean - 1.0).abs() < 0.02,
                    "{} mean {} too far from 1.0",
                    name,
                    mean
                );
            }
        }
    }

    #[test]
    fn test_cond_concat_dims() {
        let vs = VarStore::new(Device::Cpu);
        let d2 = NLayerDiscriminator2d::new(&vs.root(), DiscriminatorConfig::default());
        let vs3 = VarStore::new(Device::Cpu);
        let d3 = NLayerDiscriminator3d::new(&vs3.root(), DiscriminatorConfig::default());

        assert_eq!(d2.cond_concat_dim(), -2);
        assert_eq!(d3.cond_concat_dim(), -3);
    }
}
