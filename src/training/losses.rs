//! Loss functions for adversarial autoencoder training
//!
//! Implements the hinge and vanilla discriminator losses, the generator
//! adversarial loss, and the discriminator warm-up gate.

use serde::{Deserialize, Serialize};
use tch::{Kind, Tensor};

/// Discriminator loss variant, fixed at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GanLossKind {
    /// Margin-based penalties: `relu(1 -/+ logit)`.
    Hinge,
    /// Log-probability penalties via softplus.
    Vanilla,
}

/// Hinge discriminator loss
///
/// `mean(relu(1 - logits_real)) * 0.5 + mean(relu(1 + logits_fake)) * 0.5`
///
/// Zero when the discriminator scores real samples above +1 and fake samples
/// below -1; exactly 1.0 when both logits are zero.
pub fn hinge_d_loss(logits_real: &Tensor, logits_fake: &Tensor) -> Tensor {
    let loss_real = (logits_real.neg() + 1.0).relu().mean(Kind::Float);
    let loss_fake = (logits_fake + 1.0).relu().mean(Kind::Float);
    loss_real * 0.5 + loss_fake * 0.5
}

/// Vanilla (non-saturating logistic) discriminator loss
///
/// `0.5 * (mean(softplus(-logits_real)) + mean(softplus(logits_fake)))`
pub fn vanilla_d_loss(logits_real: &Tensor, logits_fake: &Tensor) -> Tensor {
    let loss_real = logits_real.neg().softplus().mean(Kind::Float);
    let loss_fake = logits_fake.softplus().mean(Kind::Float);
    (loss_real + loss_fake) * 0.5
}

/// Generator adversarial loss: `-mean(logits_fake)`
///
/// The generator is rewarded for pushing the discriminator's per-patch
/// realism logits up on reconstructions.
pub fn generator_loss(logits_fake: &Tensor) -> Tensor {
    logits_fake.mean(Kind::Float).neg()
}

/// Discriminator warm-up gate
///
/// Returns 0 before `start` and `factor` from `start` onwards, keeping the
/// discriminator inactive until the generator produces plausible outputs.
pub fn warmup_weight(factor: f64, step: i64, start: i64) -> f64 {
    if step < start {
        0.0
    } else {
        factor
    }
}
