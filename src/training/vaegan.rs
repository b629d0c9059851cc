//! Combined reconstruction/adversarial loss engine
//!
//! Balances reconstruction fidelity against adversarial realism while an
//! autoencoder and a patch discriminator are optimized in alternating steps.
//! The reconstruction term is a Gaussian negative log-likelihood under a
//! learned log-variance; the adversarial term is scaled by a gradient-norm
//! based adaptive weight and gated by a warm-up schedule.

use anyhow::{bail, ensure, Context, Result};
use tch::nn::{self, ModuleT, OptimizerConfig};
use tch::{Device, Kind, Tensor};
use tracing::{info, warn};

use super::losses::{generator_loss, hinge_d_loss, vanilla_d_loss, warmup_weight, GanLossKind};
use super::metrics::MetricsRecord;
use crate::data::profiles_2d;
use crate::model::{
    DiscriminatorConfig, NLayerDiscriminator2d, NLayerDiscriminator3d, PatchDiscriminator,
};
use crate::utils::LossConfig;

/// Which optimizer's pass the current call computes the loss for. The two
/// passes are mutually exclusive within one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainPhase {
    /// Generator update: NLL plus adaptively weighted adversarial loss.
    Generator,
    /// Discriminator update: real/fake logits on detached tensors.
    Discriminator,
}

/// A learned distance between inputs and reconstructions, added to the
/// elementwise reconstruction error when attached to the engine.
pub trait PerceptualDistance: Send {
    fn distance(&self, inputs: &Tensor, reconstructions: &Tensor) -> Tensor;
}

/// One batch of tensors for a `compute` call.
///
/// `inputs` and `reconstructions` must have identical (batch, channels,
/// *spatial) shapes. `last_layer` is the tensor the adaptive weight
/// differentiates against, typically the final decoder weight; it is required
/// whenever the discriminator factor is active in training mode.
#[derive(Debug, Clone, Copy)]
pub struct LossBatch<'a> {
    pub inputs: &'a Tensor,
    pub reconstructions: &'a Tensor,
    pub step: i64,
    pub last_layer: Option<&'a Tensor>,
    pub cond: Option<&'a Tensor>,
    pub split: &'a str,
    pub weights: Option<&'a Tensor>,
    pub overpass_mask: Option<&'a Tensor>,
}

impl<'a> LossBatch<'a> {
    pub fn new(inputs: &'a Tensor, reconstructions: &'a Tensor, step: i64) -> Self {
        Self {
            inputs,
            reconstructions,
            step,
            last_layer: None,
            cond: None,
            split: "train",
            weights: None,
            overpass_mask: None,
        }
    }

    pub fn with_last_layer(mut self, last_layer: &'a Tensor) -> Self {
        self.last_layer = Some(last_layer);
        self
    }

    pub fn with_cond(mut self, cond: &'a Tensor) -> Self {
        self.cond = Some(cond);
        self
    }

    pub fn with_split(mut self, split: &'a str) -> Self {
        self.split = split;
        self
    }

    pub fn with_weights(mut self, weights: &'a Tensor) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn with_overpass_mask(mut self, overpass_mask: &'a Tensor) -> Self {
        self.overpass_mask = Some(overpass_mask);
        self
    }
}

/// Paired generator/discriminator training objective.
///
/// Owns the patch discriminator (in its own variable store, exposed for the
/// discriminator optimizer) and the learned log-variance scalar (registered
/// under the caller's generator path so the generator optimizer trains it).
pub struct VaeGanLoss {
    config: LossConfig,
    logvar: Tensor,
    discriminator: Box<dyn PatchDiscriminator>,
    disc_vs: nn::VarStore,
    perceptual: Option<Box<dyn PerceptualDistance>>,
}

impl VaeGanLoss {
    /// Create the loss engine.
    ///
    /// `gen_path` is a variable path inside the generator's store; the
    /// log-variance parameter is created there. The discriminator variant
    /// (2D or 3D) is fixed by the configuration.
    pub fn new(gen_path: &nn::Path, config: &LossConfig, device: Device) -> Result<Self> {
        config.validate()?;

        let logvar = gen_path.var("logvar", &[], nn::Init::Const(config.logvar_init));

        let disc_vs = nn::VarStore::new(device);
        let disc_config = DiscriminatorConfig {
            in_channels: config.disc_in_channels,
            num_layers: config.disc_num_layers,
            base_filters: config.disc_ndf,
            norm: config.disc_norm,
            use_sigmoid: config.disc_sigmoid,
        };
        let discriminator: Box<dyn PatchDiscriminator> = if config.disc_3d {
            Box::new(NLayerDiscriminator3d::new(&disc_vs.root(), disc_config))
        } else {
            Box::new(NLayerDiscriminator2d::new(&disc_vs.root(), disc_config))
        };

        info!(
            "created {} patch discriminator ({} layers, {} base filters, {:?} loss)",
            if config.disc_3d { "3D" } else { "2D" },
            config.disc_num_layers,
            config.disc_ndf,
            config.disc_loss,
        );

        Ok(Self {
            config: config.clone(),
            logvar,
            discriminator,
            disc_vs,
            perceptual: None,
        })
    }

    /// Attach a learned perceptual distance, added to the reconstruction
    /// error scaled by the configured perceptual weight.
    pub fn with_perceptual(mut self, distance: Box<dyn PerceptualDistance>) -> Self {
        self.perceptual = Some(distance);
        self
    }

    /// The learned log-variance scalar.
    pub fn logvar(&self) -> &Tensor {
        &self.logvar
    }

    /// Variable store holding the discriminator parameters.
    pub fn discriminator_vs(&self) -> &nn::VarStore {
        &self.disc_vs
    }

    /// Adam optimizer over the discriminator parameters with GAN betas.
    pub fn disc_optimizer(&self, lr: f64) -> Result<nn::Optimizer> {
        let opt = nn::Adam { beta1: 0.5, beta2: 0.999, wd: 0.0, eps: 1e-8, amsgrad: false }.build(&self.disc_vs, lr)?;
        Ok(opt)
    }

    /// Compute the loss for one optimizer pass.
    ///
    /// Returns the graph-attached scalar loss for backpropagation and a
    /// record of detached metrics. `train` selects training-mode behavior:
    /// a failed adaptive-weight gradient query is fatal while training and
    /// falls back to a zero weight otherwise.
    pub fn compute(
        &self,
        batch: &LossBatch,
        phase: TrainPhase,
        train: bool,
    ) -> Result<(Tensor, MetricsRecord)> {
        ensure!(
            batch.inputs.size() == batch.reconstructions.size(),
            "inputs shape {:?} does not match reconstructions shape {:?}",
            batch.inputs.size(),
            batch.reconstructions.size()
        );
        ensure!(
            batch.cond.is_some() == self.config.disc_conditional,
            "conditioning tensor {} but the discriminator is {}conditional",
            if batch.cond.is_some() { "supplied" } else { "missing" },
            if self.config.disc_conditional { "" } else { "not " },
        );

        let device = batch.inputs.device();

        let mut rec_loss = (batch.inputs - batch.reconstructions).abs();
        if let Some(perceptual) = &self.perceptual {
            if self.config.perceptual_weight > 0.0 {
                let p_loss = perceptual.distance(batch.inputs, batch.reconstructions);
                rec_loss = rec_loss + p_loss * self.config.perceptual_weight;
            }
        }

        let nll = &rec_loss / self.logvar.exp() + &self.logvar;
        let batch_size = nll.size()[0];
        let weighted = match batch.weights {
            Some(weights) => weights * &nll,
            None => nll.shallow_clone(),
        };
        // Sum over all non-batch dimensions, divided by batch size; the loss
        // scales with per-sample element count.
        let weighted_nll_loss = weighted.sum(Kind::Float) / batch_size as f64;
        let nll_loss = nll.sum(Kind::Float) / batch_size as f64;

        // The discriminator sees profile-reduced tensors when cropping is on;
        // the NLL above always uses the full-resolution originals.
        let (disc_inputs, disc_recon, disc_cond) = if self.config.crop_to_profiles {
            let mode = self.config.crop_mode;
            let max_length = self.config.max_profile_length;
            let pad_value = self.config.profile_pad_value;
            let inputs_p =
                profiles_2d(batch.inputs, mode, batch.overpass_mask, max_length, pad_value)?;
            let recon_p = profiles_2d(
                batch.reconstructions,
                mode,
                batch.overpass_mask,
                max_length,
                pad_value,
            )?;
            let cond_p = match batch.cond {
                Some(cond) => Some(profiles_2d(
                    cond,
                    mode,
                    batch.overpass_mask,
                    max_length,
                    pad_value,
                )?),
                None => None,
            };
            (inputs_p, recon_p, cond_p)
        } else {
            (
                batch.inputs.shallow_clone(),
                batch.reconstructions.shallow_clone(),
                batch.cond.map(Tensor::shallow_clone),
            )
        };

        match phase {
            TrainPhase::Generator => {
                let logits_fake = match &disc_cond {
                    Some(cond) => {
                        let joined =
                            Tensor::cat(&[&disc_recon, cond], self.discriminator.cond_concat_dim());
                        self.discriminator.forward_t(&joined, train)
                    }
                    None => self.discriminator.forward_t(&disc_recon, train),
                };
                let g_loss = generator_loss(&logits_fake);

                let d_weight = if self.config.disc_factor > 0.0 {
                    self.adaptive_weight(&nll_loss, &g_loss, batch.last_layer, train)?
                } else {
                    Tensor::from(0f32).to_device(device)
                };

                let disc_factor =
                    warmup_weight(self.config.disc_factor, batch.step, self.config.disc_start);
                let loss = &weighted_nll_loss + &d_weight * disc_factor * &g_loss;

                let mut metrics = MetricsRecord::new(batch.split);
                metrics.insert("total_loss", loss.double_value(&[]));
                metrics.insert("logvar", self.logvar.double_value(&[]));
                metrics.insert("rec_loss", rec_loss.mean(Kind::Float).double_value(&[]));
                metrics.insert("d_weight", d_weight.double_value(&[]));
                metrics.insert("disc_factor", disc_factor);
                metrics.insert("g_loss", g_loss.double_value(&[]));

                Ok((loss, metrics))
            }
            TrainPhase::Discriminator => {
                // No gradient may flow back into the generator from this pass.
                let (logits_real, logits_fake) = match &disc_cond {
                    Some(cond) => {
                        let dim = self.discriminator.cond_concat_dim();
                        let real = Tensor::cat(&[&disc_inputs.detach(), cond], dim);
                        let fake = Tensor::cat(&[&disc_recon.detach(), cond], dim);
                        (
                            self.discriminator.forward_t(&real, train),
                            self.discriminator.forward_t(&fake, train),
                        )
                    }
                    None => (
                        self.discriminator.forward_t(&disc_inputs.detach(), train),
                        self.discriminator.forward_t(&disc_recon.detach(), train),
                    ),
                };

                let disc_factor =
                    warmup_weight(self.config.disc_factor, batch.step, self.config.disc_start);
                let gan_loss = match self.config.disc_loss {
                    GanLossKind::Hinge => hinge_d_loss(&logits_real, &logits_fake),
                    GanLossKind::Vanilla => vanilla_d_loss(&logits_real, &logits_fake),
                };
                let d_loss = gan_loss * disc_factor;

                let mut metrics = MetricsRecord::new(batch.split);
                metrics.insert("disc_loss", d_loss.double_value(&[]));
                metrics.insert(
                    "logits_real",
                    logits_real.mean(Kind::Float).double_value(&[]),
                );
                metrics.insert(
                    "logits_fake",
                    logits_fake.mean(Kind::Float).double_value(&[]),
                );

                Ok((d_loss, metrics))
            }
        }
    }

    /// Balance the adversarial term against the reconstruction term by the
    /// ratio of their gradient norms at the designated last layer:
    /// `clamp(|grad nll| / (|grad g| + 1e-4), 0, 1e4) * disc_weight`,
    /// detached from the graph.
    fn adaptive_weight(
        &self,
        nll_loss: &Tensor,
        g_loss: &Tensor,
        last_layer: Option<&Tensor>,
        train: bool,
    ) -> Result<Tensor> {
        let device = nll_loss.device();
        let last_layer = match last_layer {
            Some(tensor) => tensor,
            None => {
                if train {
                    bail!("adaptive weighting needs a last-layer handle during training");
                }
                warn!("no last-layer handle supplied, using zero adversarial weight");
                return Ok(Tensor::from(0f32).to_device(device));
            }
        };

        let grads =
            Tensor::f_run_backward(&[nll_loss], &[last_layer], true, false).and_then(|nll_grads| {
                Tensor::f_run_backward(&[g_loss], &[last_layer], true, false)
                    .map(|g_grads| (nll_grads, g_grads))
            });

        match grads {
            Ok((nll_grads, g_grads)) => {
                let ratio = nll_grads[0].norm() / (g_grads[0].norm() + 1e-4);
                Ok(ratio.clamp(0.0, 1e4).detach() * self.config.disc_weight)
            }
            Err(err) if train => Err(err).context(
                "no gradient path from the losses to the last layer; generator wiring is broken",
            ),
            Err(_) => {
                warn!("adaptive-weight gradients unavailable outside training, using zero");
                Ok(Tensor::from(0f32).to_device(device))
            }
        }
    }
}
