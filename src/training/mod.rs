//! Training objective for the adversarial autoencoder
//!
//! This module provides:
//! - The combined reconstruction/adversarial loss engine
//! - Hinge and vanilla discriminator losses and the warm-up gate
//! - Per-call metrics records and an accumulating history

mod losses;
mod metrics;
mod vaegan;

pub use losses::{generator_loss, hinge_d_loss, vanilla_d_loss, warmup_weight, GanLossKind};
pub use metrics::{MetricsHistory, MetricsRecord};
pub use vaegan::{LossBatch, PerceptualDistance, TrainPhase, VaeGanLoss};
