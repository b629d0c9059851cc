//! # PatchGAN Loss for Volumetric Autoencoders
//!
//! This crate provides the combined reconstruction/adversarial objective used
//! to train a generative autoencoder (e.g. a latent-diffusion VAE) against a
//! PatchGAN-style discriminator, on volumetric (3D) or planar (2D) data.
//!
//! ## Modules
//!
//! - `data`: 2D profile extraction from volumetric tensors
//! - `model`: 2D/3D N-layer patch discriminators
//! - `training`: Loss engine, GAN loss variants, warm-up gate and metrics
//! - `utils`: Configuration with TOML/JSON round-trips
//!
//! The caller owns the generator, both optimizers and the training loop; the
//! engine returns a graph-attached scalar loss per optimizer pass plus a
//! record of detached metrics.

pub mod data;
pub mod model;
pub mod training;
pub mod utils;

pub use data::{avg_profiles, padded_profiles, profiles_2d, CropMode};
pub use model::{
    DiscriminatorConfig, NLayerDiscriminator2d, NLayerDiscriminator3d, NormKind,
    PatchDiscriminator,
};
pub use training::{
    generator_loss, hinge_d_loss, vanilla_d_loss, warmup_weight, GanLossKind, LossBatch,
    MetricsHistory, MetricsRecord, PerceptualDistance, TrainPhase, VaeGanLoss,
};
pub use utils::LossConfig;
