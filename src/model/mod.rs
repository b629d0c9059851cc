//! Model module containing the adversarial network components
//!
//! This module provides:
//! - The patch discriminator interface shared by both convolution ranks
//! - 2D and 3D N-layer PatchGAN discriminators

mod discriminator;

pub use discriminator::{
    DiscriminatorConfig, NLayerDiscriminator2d, NLayerDiscriminator3d, NormKind,
    PatchDiscriminator,
};
